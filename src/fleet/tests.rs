//! Unit tests for the fleet orchestrator.

use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use rstest::rstest;

use super::*;
use crate::test_support::{FakeProvider, FakeProviderError, FakeShellFactory, ObservationStep};

fn plan(min: i64, max: i64, prefix: &str) -> FleetPlan {
    FleetPlan {
        min,
        max,
        prefix: prefix.to_owned(),
        region: String::from("fra1"),
        image: String::from("debian-7-0-x64"),
        size: String::from("2gb"),
        ssh_keys: vec![101],
        password: Some(String::from("s3cret")),
        script_url: String::from("https://example.com/install.sh"),
        salt_master: false,
        salt_master_address: String::from("10.0.0.100"),
        pubkeyfile: None,
    }
}

fn orchestrator<'a>(
    provider: &FakeProvider,
    shells: &FakeShellFactory,
    out: &'a mut Vec<u8>,
) -> FleetOrchestrator<FakeProvider, FakeShellFactory, &'a mut Vec<u8>> {
    FleetOrchestrator::new(provider.clone(), shells.clone(), out)
        .with_delays(Duration::ZERO, Duration::ZERO, Duration::ZERO)
        .with_session_retry(RetryPolicy {
            max_attempts: 2,
            backoff: Duration::ZERO,
        })
}

fn addr(last: u8) -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(10, 0, 0, last))
}

fn active(address: IpAddr) -> ObservationStep {
    Ok((InstanceStatus::Active, Some(address)))
}

fn pending() -> ObservationStep {
    Ok((InstanceStatus::Pending, None))
}

fn timeout_error() -> SessionError {
    SessionError::Timeout {
        host: String::from("10.0.0.1"),
        message: String::from("connection timed out"),
    }
}

fn command_failure() -> SessionError {
    SessionError::CommandFailure {
        program: String::from("ssh"),
        host: String::from("10.0.0.1"),
        status_text: String::from("1"),
        stderr: String::from("boom"),
    }
}

#[rstest]
#[case(0, 2, "mw", vec!["mw0", "mw1", "mw2"])]
#[case(1, 5, "db", vec!["db1", "db2", "db3", "db4", "db5"])]
#[case(0, 0, "saltmaster", vec!["saltmaster0"])]
fn plan_derives_distinct_sequential_names(
    #[case] min: i64,
    #[case] max: i64,
    #[case] prefix: &str,
    #[case] expected: Vec<&str>,
) {
    let specs = plan(min, max, prefix).specs().expect("specs should build");
    let names: Vec<&str> = specs.iter().map(|spec| spec.name.as_str()).collect();
    assert_eq!(names, expected);
}

#[tokio::test]
async fn all_active_on_first_poll_bootstraps_in_one_round() {
    let provider = FakeProvider::new();
    let shells = FakeShellFactory::new();
    for (name, last) in [("mw0", 1), ("mw1", 2), ("mw2", 3)] {
        provider.script_observation(name, active(addr(last)));
    }

    let mut out = Vec::new();
    let report = orchestrator(&provider, &shells, &mut out)
        .run(&plan(0, 2, "mw"))
        .await
        .expect("run should succeed");

    assert_eq!(
        report,
        FleetReport {
            created: 3,
            bootstrapped: 3
        }
    );
    assert_eq!(provider.created_names(), vec!["mw0", "mw1", "mw2"]);
    for name in ["mw0", "mw1", "mw2"] {
        assert_eq!(provider.observe_count(name), 1, "{name} polled once");
    }

    let executed = shells.executed();
    let hosts: Vec<&str> = executed.iter().map(|(host, _)| host.as_str()).collect();
    assert_eq!(hosts, vec!["10.0.0.1", "10.0.0.2", "10.0.0.3"]);
    for (_, command) in &executed {
        assert!(
            command.contains("bash /var/tmp/bootstrap.sh 10.0.0.100"),
            "master address missing from: {command}"
        );
    }

    let rendered = String::from_utf8(out).expect("utf8 output");
    assert!(rendered.contains("Creating node mw0"));
    assert!(rendered.contains("Bootstrapping mw2 (10.0.0.3)"));
}

#[tokio::test]
async fn pending_rounds_are_repolled_until_active() {
    let provider = FakeProvider::new();
    let shells = FakeShellFactory::new();
    provider.script_observations("node0", vec![pending(), pending(), active(addr(1))]);

    let mut out = Vec::new();
    let report = orchestrator(&provider, &shells, &mut out)
        .run(&plan(0, 0, "node"))
        .await
        .expect("run should succeed");

    assert_eq!(report.bootstrapped, 1);
    assert_eq!(provider.observe_count("node0"), 3);
    assert_eq!(shells.executed().len(), 1);
}

#[tokio::test]
async fn ready_droplets_are_never_repolled_or_rebootstrapped() {
    let provider = FakeProvider::new();
    let shells = FakeShellFactory::new();
    provider.script_observation("mw0", active(addr(1)));
    provider.script_observations("mw1", vec![pending(), active(addr(2))]);

    let mut out = Vec::new();
    orchestrator(&provider, &shells, &mut out)
        .run(&plan(0, 1, "mw"))
        .await
        .expect("run should succeed");

    assert_eq!(provider.observe_count("mw0"), 1);
    assert_eq!(provider.observe_count("mw1"), 2);
    let executed = shells.executed();
    assert_eq!(executed.len(), 2);
    let hosts: Vec<&str> = executed.iter().map(|(host, _)| host.as_str()).collect();
    assert_eq!(hosts, vec!["10.0.0.1", "10.0.0.2"]);
}

#[tokio::test]
async fn other_status_and_missing_address_stay_pending() {
    let provider = FakeProvider::new();
    let shells = FakeShellFactory::new();
    provider.script_observations(
        "node0",
        vec![
            Ok((InstanceStatus::Other(String::from("off")), None)),
            Ok((InstanceStatus::Active, None)),
            active(addr(7)),
        ],
    );

    let mut out = Vec::new();
    orchestrator(&provider, &shells, &mut out)
        .run(&plan(0, 0, "node"))
        .await
        .expect("run should succeed");

    assert_eq!(provider.observe_count("node0"), 3);
    assert_eq!(shells.executed().len(), 1);
}

#[tokio::test]
async fn transient_poll_errors_are_skipped_and_retried() {
    let provider = FakeProvider::new();
    let shells = FakeShellFactory::new();
    provider.script_observations(
        "node0",
        vec![
            Err(FakeProviderError::Transient(String::from("not yet visible"))),
            active(addr(1)),
        ],
    );

    let mut out = Vec::new();
    let report = orchestrator(&provider, &shells, &mut out)
        .run(&plan(0, 0, "node"))
        .await
        .expect("run should succeed");

    assert_eq!(report.bootstrapped, 1);
    assert_eq!(provider.observe_count("node0"), 2);
}

#[tokio::test]
async fn fatal_poll_errors_abort_the_run() {
    let provider = FakeProvider::new();
    let shells = FakeShellFactory::new();
    provider.script_observation(
        "node0",
        Err(FakeProviderError::Fatal(String::from("forbidden"))),
    );

    let mut out = Vec::new();
    let err = orchestrator(&provider, &shells, &mut out)
        .run(&plan(0, 0, "node"))
        .await
        .expect_err("run should fail");

    assert!(matches!(err, FleetError::Poll { ref id, .. } if id == "fake-node0"));
    assert!(shells.executed().is_empty());
}

#[tokio::test]
async fn create_failure_is_fatal_and_nothing_is_rolled_back() {
    let provider = FakeProvider::new();
    let shells = FakeShellFactory::new();
    provider.script_create_failure("mw1", FakeProviderError::Fatal(String::from("quota")));

    let mut out = Vec::new();
    let err = orchestrator(&provider, &shells, &mut out)
        .run(&plan(0, 2, "mw"))
        .await
        .expect_err("run should fail");

    assert!(matches!(err, FleetError::Create { ref name, .. } if name == "mw1"));
    assert_eq!(provider.created_names(), vec!["mw0"]);
    assert!(provider.destroyed_ids().is_empty(), "no rollback expected");
}

#[tokio::test]
async fn session_open_retries_once_after_timeout() {
    let provider = FakeProvider::new();
    let shells = FakeShellFactory::new();
    provider.script_observation("node0", active(addr(1)));
    shells.push_open_result(Err(timeout_error()));

    let mut out = Vec::new();
    let report = orchestrator(&provider, &shells, &mut out)
        .run(&plan(0, 0, "node"))
        .await
        .expect("run should succeed after the retry");

    assert_eq!(report.bootstrapped, 1);
    assert_eq!(shells.opened_hosts().len(), 2, "exactly two open attempts");
    assert_eq!(shells.executed().len(), 1);
    let rendered = String::from_utf8(out).expect("utf8 output");
    assert!(
        rendered.contains("trying one last time"),
        "missing retry warning: {rendered}"
    );
}

#[tokio::test]
async fn second_session_open_failure_aborts_the_run() {
    let provider = FakeProvider::new();
    let shells = FakeShellFactory::new();
    provider.script_observation("node0", active(addr(1)));
    shells.push_open_result(Err(timeout_error()));
    shells.push_open_result(Err(timeout_error()));

    let mut out = Vec::new();
    let err = orchestrator(&provider, &shells, &mut out)
        .run(&plan(0, 0, "node"))
        .await
        .expect_err("run should fail");

    assert!(matches!(err, FleetError::Session { .. }));
    assert_eq!(shells.opened_hosts().len(), 2);
    assert!(shells.executed().is_empty());
}

#[tokio::test]
async fn non_retryable_open_failure_is_not_retried() {
    let provider = FakeProvider::new();
    let shells = FakeShellFactory::new();
    provider.script_observation("node0", active(addr(1)));
    shells.push_open_result(Err(command_failure()));

    let mut out = Vec::new();
    let err = orchestrator(&provider, &shells, &mut out)
        .run(&plan(0, 0, "node"))
        .await
        .expect_err("run should fail");

    assert!(matches!(err, FleetError::Session { .. }));
    assert_eq!(shells.opened_hosts().len(), 1, "no retry for fatal errors");
}

#[tokio::test]
async fn stage_failure_is_fatal_and_skips_dispatch() {
    let provider = FakeProvider::new();
    let shells = FakeShellFactory::new();
    provider.script_observation("node0", active(addr(1)));
    shells.push_stage_result(Err(command_failure()));

    let mut out = Vec::new();
    let err = orchestrator(&provider, &shells, &mut out)
        .run(&plan(0, 0, "node"))
        .await
        .expect_err("run should fail");

    assert!(matches!(err, FleetError::Stage { .. }));
    assert!(shells.executed().is_empty());
}

#[tokio::test]
async fn dispatch_failure_is_fatal() {
    let provider = FakeProvider::new();
    let shells = FakeShellFactory::new();
    provider.script_observation("node0", active(addr(1)));
    shells.push_execute_result(Err(command_failure()));

    let mut out = Vec::new();
    let err = orchestrator(&provider, &shells, &mut out)
        .run(&plan(0, 0, "node"))
        .await
        .expect_err("run should fail");

    assert!(matches!(err, FleetError::Dispatch { .. }));
}

#[tokio::test]
async fn bootstrap_stages_script_and_dispatches_template() {
    let provider = FakeProvider::new();
    let shells = FakeShellFactory::new();
    provider.script_observation("mw0", active(addr(1)));

    let mut out = Vec::new();
    orchestrator(&provider, &shells, &mut out)
        .run(&plan(0, 0, "mw"))
        .await
        .expect("run should succeed");

    let staged = shells.staged();
    assert_eq!(
        staged,
        vec![(
            String::from("10.0.0.1"),
            String::from("https://example.com/install.sh"),
            String::from("/var/tmp/bootstrap.sh"),
        )]
    );

    let executed = shells.executed();
    let (_, command) = executed.first().expect("one dispatch");
    assert!(command.starts_with("export DEBIAN_FRONTEND=noninteractive; "));
    assert!(command.contains("apt-get install -qy screen || yum install -y screen"));
    assert!(command.ends_with("&> /tmp/vm-bootstrap.log"));
}
