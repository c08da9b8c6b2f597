#![cfg(unix)]

use std::fs;
use std::path::Path;
use std::process::Command;
use std::time::{Duration, Instant};

use srt_testkit::{
    BoundedRunner, CommandLauncher, RunnerConfig, RunnerError, TestUnit, UnitLauncher,
    UnitStatus,
};
use tempfile::tempdir;

fn shell_launcher(unit: &TestUnit) -> Command {
    let mut command = Command::new("sh");
    command.arg("-c").arg(unit.id());
    command
}

fn config(unit_timeout: Duration) -> RunnerConfig {
    RunnerConfig {
        unit_timeout,
        termination_grace: Duration::from_secs(2),
    }
}

fn record(log: &Path, name: &str, exit_code: i32) -> TestUnit {
    TestUnit::new(format!(
        "echo {name} >> '{}'; exit {exit_code}",
        log.display()
    ))
}

#[test]
fn runs_every_unit_in_order_when_all_succeed() {
    let dir = tempdir().expect("tempdir");
    let log = dir.path().join("units.log");
    let units = vec![record(&log, "a", 0), record(&log, "b", 0), record(&log, "c", 0)];

    let runner = BoundedRunner::new(shell_launcher, config(Duration::from_secs(30)));
    let report = runner.run(&units).expect("run");

    assert!(report.success());
    assert_eq!(report.exit_code(), 0);
    assert_eq!(report.outcomes.len(), 3);
    assert!(report.skipped.is_empty());
    assert_eq!(fs::read_to_string(&log).expect("log"), "a\nb\nc\n");
}

#[test]
fn stops_after_first_failing_unit_and_skips_the_rest() {
    let dir = tempdir().expect("tempdir");
    let log = dir.path().join("units.log");
    let units = vec![record(&log, "a", 0), record(&log, "b", 4), record(&log, "c", 0)];

    let runner = BoundedRunner::new(shell_launcher, config(Duration::from_secs(30)));
    let report = runner.run(&units).expect("run");

    assert!(!report.success());
    assert_eq!(report.exit_code(), 1);
    assert_eq!(report.outcomes.len(), 2);
    assert_eq!(report.outcomes[0].status, UnitStatus::Succeeded);
    assert_eq!(
        report.outcomes[1].status,
        UnitStatus::Failed { exit_code: Some(4) }
    );
    assert_eq!(report.skipped, vec![units[2].clone()]);
    assert_eq!(fs::read_to_string(&log).expect("log"), "a\nb\n");
}

#[test]
fn kills_unit_that_exceeds_its_timeout() {
    let dir = tempdir().expect("tempdir");
    let log = dir.path().join("units.log");
    let units = vec![
        TestUnit::new("exec sleep 30"),
        record(&log, "never", 0),
    ];

    let started = Instant::now();
    let runner = BoundedRunner::new(shell_launcher, config(Duration::from_millis(200)));
    let report = runner.run(&units).expect("run");

    assert!(started.elapsed() < Duration::from_secs(10));
    assert_eq!(report.outcomes.len(), 1);
    assert_eq!(report.outcomes[0].status, UnitStatus::TimedOut);
    assert_eq!(report.skipped.len(), 1);
    assert!(!log.exists());
}

#[test]
fn empty_unit_list_is_a_successful_run() {
    let runner = BoundedRunner::new(shell_launcher, RunnerConfig::default());
    let report = runner.run(&[]).expect("run");
    assert!(report.success());
    assert!(report.outcomes.is_empty());
}

#[test]
fn command_launcher_appends_unit_id_as_last_argument() {
    let dir = tempdir().expect("tempdir");
    let script = dir.path().join("unit.sh");
    let marker = dir.path().join("marker");
    fs::write(&script, format!("touch '{}'\n", marker.display())).expect("write unit");

    let launcher = CommandLauncher::parse("sh -e").expect("launcher");
    let command = launcher.command(&TestUnit::from(script.as_path()));
    assert_eq!(command.get_program(), "sh");

    let runner = BoundedRunner::new(launcher, config(Duration::from_secs(30)));
    let report = runner
        .run(&[TestUnit::from(script.as_path())])
        .expect("run");
    assert!(report.success());
    assert!(marker.exists());
}

#[test]
fn spawn_failure_is_reported_as_runner_error() {
    let launcher = CommandLauncher::new("/nonexistent/srt-worker", Vec::new());
    let runner = BoundedRunner::new(launcher, RunnerConfig::default());

    let error = runner
        .run(&[TestUnit::new("test_anything.py")])
        .expect_err("missing worker binary");
    match error {
        RunnerError::Spawn { unit, .. } => assert_eq!(unit, "test_anything.py"),
        other => panic!("expected RunnerError::Spawn, got {other:?}"),
    }
}
