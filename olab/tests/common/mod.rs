pub mod assertions;
pub mod fixtures;
pub mod logging;

pub use assertions::{assert_contains, assert_path_exists, read_json};
pub use fixtures::{Testbed, connect, square_testbed};
pub use logging::init_test_logging;
