use crate::common::{connect, init_test_logging, read_json, square_testbed};
use olab::commands::flap;
use olab::flap::Outcome;
use olab_common::mock::{MockConfig, MockConnector, MockRouter};
use olab_common::DeviceId;
use std::net::Ipv4Addr;
use std::time::Duration;

const TWO_TARGETS: &str = r#"
[[lab.flap.targets]]
device = "R1"
interface = "GigabitEthernet0/1"

[[lab.flap.targets]]
device = "R1"
interface = "GigabitEthernet0/2"
"#;

fn ip(a: u8, b: u8, c: u8, d: u8) -> Ipv4Addr {
    Ipv4Addr::new(a, b, c, d)
}

/// R1 with a fast link on Gi0/1 and a link on Gi0/2 that never converges in time.
fn fast_and_slow() -> MockConnector {
    MockConnector::new()
        .with_router(
            MockRouter::new("R1", ip(1, 1, 1, 1))
                .with_link(
                    "Gi0/1",
                    ip(10, 0, 0, 0),
                    ip(2, 2, 2, 2),
                    ip(10, 0, 0, 1),
                    Duration::from_millis(3200),
                )
                .with_link(
                    "Gi0/2",
                    ip(10, 0, 0, 2),
                    ip(4, 4, 4, 4),
                    ip(10, 0, 0, 3),
                    Duration::from_secs(45),
                ),
        )
        .with_router(MockRouter::new("R2", ip(2, 2, 2, 2)))
}

#[tokio::test(start_paused = true)]
async fn test_one_converged_one_timed_out() {
    init_test_logging();
    crate::test_log!("TEST START: test_one_converged_one_timed_out");

    let testbed = square_testbed(&format!("sla_target_secs = 10.0\n{TWO_TARGETS}"));
    let connector = fast_and_slow();
    let r1 = connector.router("R1").unwrap().clone();
    let ctx = connect(testbed.config(), connector).await;

    let report = flap::flap_all(&ctx).await;
    let summary = &report.summary;
    assert_eq!(summary.total_tests, 2);
    assert_eq!(summary.passed, 1);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.timed_out, 1);
    assert_eq!(summary.setup_failures, 0);
    assert!(!summary.sla_met);
    let average = summary.average_convergence_secs.unwrap();
    assert!((3.19..=3.31).contains(&average), "average {average}");

    assert_eq!(report.results[0].interface, "GigabitEthernet0/1");
    assert_eq!(report.results[0].outcome, Outcome::Converged);
    assert_eq!(report.results[1].outcome, Outcome::TimedOut);

    // Both targets share R1's session, so they never overlapped.
    assert_eq!(r1.max_concurrent_calls(), 1);
    assert!(r1.is_admin_up("Gi0/1"));
    assert!(r1.is_admin_up("Gi0/2"));

    ctx.close().await;
    crate::test_log!("TEST PASS: test_one_converged_one_timed_out");
}

#[tokio::test(start_paused = true)]
async fn test_unreachable_device_does_not_block_others() {
    init_test_logging();
    crate::test_log!("TEST START: test_unreachable_device_does_not_block_others");

    let testbed = square_testbed(
        r#"
[[lab.flap.targets]]
device = "R1"
interface = "GigabitEthernet0/1"

[[lab.flap.targets]]
device = "R2"
interface = "GigabitEthernet0/1"
"#,
    );
    let connector = MockConnector::new()
        .with_router(
            MockRouter::new("R1", ip(1, 1, 1, 1))
                .with_link(
                    "Gi0/1",
                    ip(10, 0, 0, 0),
                    ip(2, 2, 2, 2),
                    ip(10, 0, 0, 1),
                    Duration::from_secs(2),
                ),
        )
        .with_router(
            MockRouter::new("R2", ip(2, 2, 2, 2))
                .with_link(
                    "Gi0/1",
                    ip(10, 0, 0, 1),
                    ip(1, 1, 1, 1),
                    ip(10, 0, 0, 0),
                    Duration::from_secs(2),
                )
                .with_config(MockConfig::connection_failure()),
        );
    let ctx = connect(testbed.config(), connector).await;

    let report = flap::flap_all(&ctx).await;
    assert_eq!(report.summary.total_tests, 2);
    assert_eq!(report.summary.passed, 1);
    assert_eq!(report.summary.setup_failures, 1);
    assert!(!report.summary.sla_met);

    let r2 = report
        .results
        .iter()
        .find(|r| r.device == DeviceId::new("R2"))
        .unwrap();
    assert_eq!(r2.outcome, Outcome::SetupFailed);
    assert!(r2.reason.as_deref().unwrap().contains("refused"));

    ctx.close().await;
    crate::test_log!("TEST PASS: test_unreachable_device_does_not_block_others");
}

#[tokio::test(start_paused = true)]
async fn test_poller_fault_restores_interface() {
    init_test_logging();
    crate::test_log!("TEST START: test_poller_fault_restores_interface");

    let testbed = square_testbed(
        r#"
[[lab.flap.targets]]
device = "R1"
interface = "GigabitEthernet0/1"
"#,
    );
    // Baseline and the confirmation read succeed, then the transport fails.
    let connector = MockConnector::new().with_router(
        MockRouter::new("R1", ip(1, 1, 1, 1))
            .with_link(
                "Gi0/1",
                ip(10, 0, 0, 0),
                ip(2, 2, 2, 2),
                ip(10, 0, 0, 1),
                Duration::from_secs(2),
            )
            .with_config(MockConfig {
                fail_neighbor_reads_after: Some(2),
                ..MockConfig::default()
            }),
    );
    let r1 = connector.router("R1").unwrap().clone();
    let ctx = connect(testbed.config(), connector).await;

    let report = flap::flap_all(&ctx).await;
    let result = &report.results[0];
    assert_eq!(result.outcome, Outcome::SetupFailed);
    assert_eq!(result.elapsed_secs, None);
    assert!(r1.is_admin_up("Gi0/1"));
    assert_eq!(
        r1.admin_history().last(),
        Some(&("GigabitEthernet0/1".to_string(), true))
    );

    ctx.close().await;
    crate::test_log!("TEST PASS: test_poller_fault_restores_interface");
}

#[tokio::test(start_paused = true)]
async fn test_run_writes_results_file() {
    init_test_logging();
    crate::test_log!("TEST START: test_run_writes_results_file");

    let testbed = square_testbed(&format!("sla_target_secs = 10.0\n{TWO_TARGETS}"));
    let ctx = connect(
        testbed.config(),
        MockConnector::square_lab(Duration::from_millis(1500)),
    )
    .await;

    let outcome = flap::run(&ctx).await.unwrap();
    assert!(outcome.success);
    let run_dir = outcome.run_dir.unwrap();
    assert!(run_dir.starts_with(&testbed.results_dir));
    assert!(
        run_dir
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("ospf_flap_")
    );

    let json = read_json(&run_dir.join(flap::RESULTS_FILE));
    assert_eq!(json["test_name"], "OSPF Interface Flap Test");
    assert_eq!(json["summary"]["total_tests"], 2);
    assert_eq!(json["summary"]["sla_target"], 10.0);
    assert_eq!(json["summary"]["sla_met"], true);
    assert_eq!(json["results"].as_array().unwrap().len(), 2);
    assert_eq!(json["results"][0]["outcome"], "converged");

    ctx.close().await;
    crate::test_log!("TEST PASS: test_run_writes_results_file");
}

#[tokio::test(start_paused = true)]
async fn test_restore_failure_is_reported() {
    init_test_logging();
    crate::test_log!("TEST START: test_restore_failure_is_reported");

    let testbed = square_testbed(
        r#"
restore_attempts = 2

[[lab.flap.targets]]
device = "R1"
interface = "GigabitEthernet0/1"
"#,
    );
    let connector = MockConnector::new().with_router(
        MockRouter::new("R1", ip(1, 1, 1, 1))
            .with_link(
                "Gi0/1",
                ip(10, 0, 0, 0),
                ip(2, 2, 2, 2),
                ip(10, 0, 0, 1),
                Duration::from_secs(2),
            )
            .with_config(MockConfig {
                fail_no_shutdown: 2,
                ..MockConfig::default()
            }),
    );
    let r1 = connector.router("R1").unwrap().clone();
    let ctx = connect(testbed.config(), connector).await;

    let report = flap::flap_all(&ctx).await;
    let result = &report.results[0];
    assert_eq!(result.outcome, Outcome::SetupFailed);
    assert!(result.reason.as_deref().unwrap().contains("after 2 attempts"));

    // Closing waits for the background restore, which now succeeds.
    ctx.close().await;
    assert!(r1.is_admin_up("Gi0/1"));
    crate::test_log!("TEST PASS: test_restore_failure_is_reported");
}

#[tokio::test(start_paused = true)]
async fn test_same_device_targets_run_one_after_another() {
    init_test_logging();
    crate::test_log!("TEST START: test_same_device_targets_run_one_after_another");

    let testbed = square_testbed(TWO_TARGETS);
    let mut config = testbed.config();
    config.lab.max_workers = 10;
    let convergence = Duration::from_secs(2);
    let connector = MockConnector::square_lab(convergence);
    let r1 = connector.router("R1").unwrap().clone();
    let ctx = connect(config, connector).await;

    let report = flap::flap_all(&ctx).await;
    assert_eq!(report.summary.passed, 2);

    let changes = r1.admin_changes();
    let order: Vec<(&str, bool)> = changes
        .iter()
        .map(|c| (c.interface.as_str(), c.up))
        .collect();
    assert_eq!(
        order,
        vec![
            ("GigabitEthernet0/1", false),
            ("GigabitEthernet0/1", true),
            ("GigabitEthernet0/2", false),
            ("GigabitEthernet0/2", true),
        ]
    );
    // Gi0/2 only goes down once polling saw Gi0/1 back at FULL.
    assert!(changes[2].at >= changes[1].at + convergence);
    assert_eq!(r1.max_concurrent_calls(), 1);

    ctx.close().await;
    crate::test_log!("TEST PASS: test_same_device_targets_run_one_after_another");
}

#[tokio::test(start_paused = true)]
async fn test_busy_device_does_not_hold_other_devices_back() {
    init_test_logging();
    crate::test_log!("TEST START: test_busy_device_does_not_hold_other_devices_back");

    let testbed = square_testbed(&format!(
        "{TWO_TARGETS}
[[lab.flap.targets]]
device = \"R2\"
interface = \"GigabitEthernet0/2\"
"
    ));
    let mut config = testbed.config();
    config.lab.max_workers = 2;
    let connector = MockConnector::square_lab(Duration::from_secs(2));
    let r1 = connector.router("R1").unwrap().clone();
    let r2 = connector.router("R2").unwrap().clone();
    let ctx = connect(config, connector).await;

    let report = flap::flap_all(&ctx).await;
    assert_eq!(report.summary.total_tests, 3);
    assert_eq!(report.summary.passed, 3);

    // R2 flaps alongside R1's first target instead of queueing behind R1.
    let r1_changes = r1.admin_changes();
    let r2_changes = r2.admin_changes();
    assert!(r2_changes[0].at < r1_changes[1].at);

    ctx.close().await;
    crate::test_log!("TEST PASS: test_busy_device_does_not_hold_other_devices_back");
}
