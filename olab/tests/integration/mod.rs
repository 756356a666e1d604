mod cli_tests;
mod command_tests;
mod flap_tests;
