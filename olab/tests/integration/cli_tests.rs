use std::process::Command;
use std::time::Duration;

use chrono::{Local, TimeZone};
use olab::commands::flap;
use olab::flap::report::{ConvergenceResult, aggregate};
use olab::output::{create_run_dir, write_json};
use olab_common::FlapTarget;

use crate::common::{assert_contains, assert_path_exists, init_test_logging, square_testbed};

fn olab() -> Command {
    let mut command = Command::new(env!("CARGO_BIN_EXE_olab"));
    command.env_remove("OLAB_TESTBED");
    command
}

#[test]
fn test_help_lists_commands() {
    init_test_logging();
    crate::test_log!("TEST START: test_help_lists_commands");

    let output = olab().arg("--help").output().expect("Failed to run olab --help");

    assert!(output.status.success(), "olab --help failed");
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_contains(&stdout, "OSPF lab automation");
    for command in ["connectivity", "deploy", "export", "flap", "reset", "plan", "trend"] {
        assert_contains(&stdout, command);
    }
    crate::test_log!("TEST PASS: test_help_lists_commands");
}

#[test]
fn test_plan_prints_address_plan() {
    init_test_logging();
    crate::test_log!("TEST START: test_plan_prints_address_plan");

    let testbed = square_testbed("");
    let output = olab()
        .arg("--testbed")
        .arg(&testbed.path)
        .arg("plan")
        .output()
        .expect("Failed to run olab plan");

    assert!(output.status.success(), "olab plan failed: {output:?}");
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_contains(&stdout, "OSPF process 10 area 10");
    assert_contains(&stdout, "10.0.0.6/31");
    assert_contains(&stdout, " ip ospf network point-to-point");
    crate::test_log!("TEST PASS: test_plan_prints_address_plan");
}

#[test]
fn test_plan_json() {
    init_test_logging();
    crate::test_log!("TEST START: test_plan_json");

    let testbed = square_testbed("");
    let output = olab()
        .args(["plan", "--json", "--testbed"])
        .arg(&testbed.path)
        .output()
        .expect("Failed to run olab plan --json");

    assert!(output.status.success());
    let plan: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(plan["links"].as_array().unwrap().len(), 4);
    assert_eq!(plan["links"][0]["endpoints"][0]["address"], "10.0.0.0");
    assert_eq!(plan["loopbacks"]["R3"], "3.3.3.3");
    crate::test_log!("TEST PASS: test_plan_json");
}

#[test]
fn test_missing_testbed_is_fatal() {
    init_test_logging();
    crate::test_log!("TEST START: test_missing_testbed_is_fatal");

    let output = olab().arg("plan").output().expect("Failed to run olab plan");

    assert_eq!(output.status.code(), Some(2));
    assert_contains(&String::from_utf8_lossy(&output.stderr), "--testbed");
    crate::test_log!("TEST PASS: test_missing_testbed_is_fatal");
}

#[test]
fn test_invalid_testbed_is_fatal() {
    init_test_logging();
    crate::test_log!("TEST START: test_invalid_testbed_is_fatal");

    let testbed = square_testbed("");
    std::fs::write(&testbed.path, "[[devices]]\nname = \"R1\"\n").unwrap();
    let output = olab()
        .arg("--testbed")
        .arg(&testbed.path)
        .arg("connectivity")
        .output()
        .expect("Failed to run olab connectivity");

    assert_eq!(output.status.code(), Some(2));
    crate::test_log!("TEST PASS: test_invalid_testbed_is_fatal");
}

#[test]
fn test_simulated_connectivity_succeeds() {
    init_test_logging();
    crate::test_log!("TEST START: test_simulated_connectivity_succeeds");

    let testbed = square_testbed("");
    let output = olab()
        .arg("--testbed")
        .arg(&testbed.path)
        .args(["--simulate", "connectivity"])
        .output()
        .expect("Failed to run olab connectivity");

    assert!(output.status.success(), "connectivity failed: {output:?}");
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_contains(&stdout, "R4 - GigabitEthernet0/0 IP is 192.168.1.4");
    assert_path_exists(&testbed.results_dir);
    crate::test_log!("TEST PASS: test_simulated_connectivity_succeeds");
}

#[test]
fn test_trend_over_earlier_runs() {
    init_test_logging();
    crate::test_log!("TEST START: test_trend_over_earlier_runs");

    let testbed = square_testbed("");
    let trend = || {
        olab()
            .args(["trend", "--json", "--testbed"])
            .arg(&testbed.path)
            .output()
            .expect("Failed to run olab trend")
    };

    // Nothing to analyze yet.
    assert_eq!(trend().status.code(), Some(1));

    let target = FlapTarget::new("R1", "GigabitEthernet0/1");
    for (day, millis) in [(14, 4000), (15, 3000)] {
        let at = Local.with_ymd_and_hms(2026, 3, day, 9, 0, 0).unwrap();
        let elapsed = Duration::from_millis(millis);
        let report = aggregate(
            &[ConvergenceResult::converged(&target, elapsed, elapsed * 3, 10.0)],
            10.0,
        );
        let dir = create_run_dir(&testbed.results_dir, "ospf_flap", at).unwrap();
        write_json(&dir.join(flap::RESULTS_FILE), &report.to_file(at)).unwrap();
    }

    let output = trend();
    assert!(output.status.success(), "olab trend failed: {output:?}");
    let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(json["stability"]["runs"], 2);
    assert_eq!(json["stability"]["passed"], 2);
    let interface = &json["interfaces"]["R1:GigabitEthernet0/1"];
    assert_eq!(interface["measurements"], 2);
    assert_eq!(interface["trend"], "IMPROVING");
    assert_path_exists(&testbed.results_dir.join(olab::commands::trend::REPORT_FILE));
    crate::test_log!("TEST PASS: test_trend_over_earlier_runs");
}
