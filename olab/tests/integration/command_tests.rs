use crate::common::{
    assert_contains, assert_path_exists, connect, init_test_logging, read_json, square_testbed,
};
use olab::commands::{connectivity, deploy, export, reset};
use olab_common::mock::{MockConnector, MockRouter};
use olab_common::{AddressPlan, DeviceId};
use std::net::Ipv4Addr;
use std::time::Duration;

fn plan_for(config: &olab_common::TestbedConfig) -> AddressPlan {
    AddressPlan::build(&config.lab.ospf, &config.devices).unwrap()
}

/// Four routers that answer but carry no fabric configuration yet.
fn blank_routers() -> MockConnector {
    (1..=4u8).fold(MockConnector::new(), |connector, n| {
        connector.with_router(MockRouter::new(format!("R{n}"), Ipv4Addr::new(n, n, n, n)))
    })
}

#[tokio::test]
async fn test_connectivity_reports_missing_address() {
    init_test_logging();
    crate::test_log!("TEST START: test_connectivity_reports_missing_address");

    let testbed = square_testbed("");
    let connector = MockConnector::new()
        .with_router(MockRouter::new("R1", Ipv4Addr::new(1, 1, 1, 1)))
        .with_router(MockRouter::new("R2", Ipv4Addr::new(2, 2, 2, 2)))
        .with_router(MockRouter::new("R3", Ipv4Addr::new(3, 3, 3, 3)).without_management_address());
    let ctx = connect(testbed.config(), connector).await;

    let checks = connectivity::check_all(&ctx).await;
    assert_eq!(checks.len(), 4);
    assert!(checks[0].passed());
    assert_eq!(checks[0].address, Some(Ipv4Addr::new(192, 168, 1, 1)));
    assert!(!checks[2].passed());
    // R4 is not in the simulated lab at all.
    assert!(checks[3].error.is_some());

    let outcome = connectivity::run(&ctx).await.unwrap();
    assert!(!outcome.success);
    let report_path = outcome.run_dir.unwrap().join(connectivity::REPORT_FILE);
    assert_path_exists(&report_path);
    let report = std::fs::read_to_string(&report_path).unwrap();
    assert_contains(&report, "R1 - GigabitEthernet0/0 IP is 192.168.1.1");
    assert_contains(&report, "R3 - GigabitEthernet0/0 has no IP");
    assert_contains(&report, "R4 - Error:");

    ctx.close().await;
    crate::test_log!("TEST PASS: test_connectivity_reports_missing_address");
}

#[tokio::test(start_paused = true)]
async fn test_deploy_configures_and_verifies_fabric() {
    init_test_logging();
    crate::test_log!("TEST START: test_deploy_configures_and_verifies_fabric");

    let testbed = square_testbed("");
    let config = testbed.config();
    let plan = plan_for(&config);
    let wait = config.lab.ospf.convergence_wait();
    let connector = MockConnector::square_lab(Duration::from_secs(1));
    let r1 = connector.router("R1").unwrap().clone();
    let ctx = connect(config, connector).await;

    let outcome = deploy::run(&ctx, &plan, wait).await.unwrap();
    assert!(outcome.success);
    let report =
        std::fs::read_to_string(outcome.run_dir.unwrap().join(deploy::REPORT_FILE)).unwrap();
    assert_contains(&report, "OSPF Deployment Verification Report");
    assert_contains(&report, "R1 - configured");
    assert_contains(&report, "[OK] R1 -> 2.2.2.2: FULL");

    let log = r1.config_log();
    assert!(log.contains(&" ip address 10.0.0.0 255.255.255.254".to_string()));
    assert!(log.contains(&" ip ospf network point-to-point".to_string()));
    assert!(log.contains(&" router-id 1.1.1.1".to_string()));

    ctx.close().await;
    crate::test_log!("TEST PASS: test_deploy_configures_and_verifies_fabric");
}

#[tokio::test(start_paused = true)]
async fn test_deploy_flags_routers_without_neighbors() {
    init_test_logging();
    crate::test_log!("TEST START: test_deploy_flags_routers_without_neighbors");

    let testbed = square_testbed("");
    let config = testbed.config();
    let plan = plan_for(&config);
    let wait = config.lab.ospf.convergence_wait();
    let ctx = connect(config, blank_routers()).await;

    let pushes = deploy::push_all(&ctx, &plan).await;
    assert_eq!(pushes.len(), 4);
    assert!(pushes.iter().all(|p| p.error.is_none()));

    tokio::time::sleep(wait).await;
    let verifications = deploy::verify_all(&ctx, vec![DeviceId::new("R1")]).await;
    // The simulated routers know no peers, so nothing forms.
    assert!(!verifications[0].passed());
    assert!(verifications[0].neighbors.is_empty());
    assert!(verifications[0].not_point_to_point.is_empty());

    ctx.close().await;
    crate::test_log!("TEST PASS: test_deploy_flags_routers_without_neighbors");
}

#[tokio::test]
async fn test_export_writes_topology() {
    init_test_logging();
    crate::test_log!("TEST START: test_export_writes_topology");

    let testbed = square_testbed("");
    let ctx = connect(testbed.config(), MockConnector::square_lab(Duration::from_secs(1))).await;

    let outcome = export::run(&ctx).await.unwrap();
    assert!(outcome.success);
    let run_dir = outcome.run_dir.unwrap();
    for file in [export::EXPORT_FILE, export::TOPOLOGY_FILE, export::SUMMARY_FILE] {
        assert_path_exists(&run_dir.join(file));
    }

    let topology = read_json(&run_dir.join(export::TOPOLOGY_FILE));
    assert_eq!(topology["nodes"].as_array().unwrap().len(), 4);
    // Four /31 links in the square, each seen from both ends.
    assert_eq!(topology["links"].as_array().unwrap().len(), 4);

    let summary = read_json(&run_dir.join(export::SUMMARY_FILE));
    assert_eq!(summary["device_count"], 4);
    assert_eq!(summary["devices"]["R1"]["ospf_neighbors"], 2);
    assert_eq!(summary["devices"]["R1"]["loopback"], "1.1.1.1");

    ctx.close().await;
    crate::test_log!("TEST PASS: test_export_writes_topology");
}

#[tokio::test]
async fn test_reset_removes_ospf() {
    init_test_logging();
    crate::test_log!("TEST START: test_reset_removes_ospf");

    let testbed = square_testbed("");
    let config = testbed.config();
    let plan = plan_for(&config);
    let connector = MockConnector::square_lab(Duration::from_secs(1));
    let routers: Vec<MockRouter> = (1..=4)
        .map(|n| connector.router(&format!("R{n}")).unwrap().clone())
        .collect();
    let ctx = connect(config, connector).await;

    let outcome = reset::run(&ctx, &plan).await.unwrap();
    assert!(outcome.success);
    for router in &routers {
        assert!(!router.ospf_running(), "{} still runs OSPF", router.name());
        assert!(router.config_log().contains(&"no interface Loopback0".to_string()));
    }

    ctx.close().await;
    crate::test_log!("TEST PASS: test_reset_removes_ospf");
}
