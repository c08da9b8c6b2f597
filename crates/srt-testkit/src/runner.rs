//! Sequential, process-isolated execution of test units.
//!
//! Each unit runs in its own child process under a wall-clock bound. A unit
//! that fails or times out stops the run; remaining units are reported as
//! skipped. Timed-out workers are killed and then reaped within a bounded
//! grace period.

use std::fmt;
use std::path::Path;
use std::process::{Child, Command};
use std::time::{Duration, Instant};

use thiserror::Error;
use wait_timeout::ChildExt;

pub const DEFAULT_UNIT_TIMEOUT: Duration = Duration::from_secs(2_000);
pub const DEFAULT_TERMINATION_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
/// Opaque identifier of one test unit, typically a test file path.
pub struct TestUnit {
    id: String,
}

impl TestUnit {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }

    pub fn id(&self) -> &str {
        &self.id
    }
}

impl fmt::Display for TestUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id)
    }
}

impl From<&str> for TestUnit {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for TestUnit {
    fn from(id: String) -> Self {
        Self::new(id)
    }
}

impl From<&Path> for TestUnit {
    fn from(path: &Path) -> Self {
        Self::new(path.display().to_string())
    }
}

/// Builds the isolated worker process for one unit.
pub trait UnitLauncher {
    fn command(&self, unit: &TestUnit) -> Command;
}

impl<F> UnitLauncher for F
where
    F: Fn(&TestUnit) -> Command,
{
    fn command(&self, unit: &TestUnit) -> Command {
        self(unit)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Runs `<program> <args...> <unit id>` for every unit.
pub struct CommandLauncher {
    program: String,
    args: Vec<String>,
}

impl CommandLauncher {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Parses a shell-style command line such as `python3 -m unittest -vb`.
    pub fn parse(command_line: &str) -> Result<Self, RunnerError> {
        let trimmed = command_line.trim();
        let tokens = shell_words::split(trimmed)
            .map_err(|error| RunnerError::InvalidCommand(format!("'{trimmed}': {error}")))?;
        let mut tokens = tokens.into_iter();
        let program = tokens.next().ok_or_else(|| {
            RunnerError::InvalidCommand("worker command must not be empty".to_string())
        })?;
        Ok(Self::new(program, tokens.collect()))
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }
}

impl UnitLauncher for CommandLauncher {
    fn command(&self, unit: &TestUnit) -> Command {
        let mut command = Command::new(&self.program);
        command.args(&self.args).arg(unit.id());
        command
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Terminal state of a unit that was run.
pub enum UnitStatus {
    Succeeded,
    Failed { exit_code: Option<i32> },
    TimedOut,
}

impl UnitStatus {
    pub fn is_success(self) -> bool {
        matches!(self, Self::Succeeded)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Succeeded => "succeeded",
            Self::Failed { .. } => "failed",
            Self::TimedOut => "timed_out",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitOutcome {
    pub unit: TestUnit,
    pub status: UnitStatus,
    pub elapsed: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Aggregated result of one run. `skipped` holds units never started.
pub struct RunReport {
    pub outcomes: Vec<UnitOutcome>,
    pub skipped: Vec<TestUnit>,
    pub elapsed: Duration,
}

impl RunReport {
    pub fn success(&self) -> bool {
        self.skipped.is_empty()
            && self
                .outcomes
                .iter()
                .all(|outcome| outcome.status.is_success())
    }

    pub fn failed_outcome(&self) -> Option<&UnitOutcome> {
        self.outcomes
            .iter()
            .find(|outcome| !outcome.status.is_success())
    }

    pub fn exit_code(&self) -> i32 {
        if self.success() {
            0
        } else {
            1
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunnerConfig {
    pub unit_timeout: Duration,
    pub termination_grace: Duration,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            unit_timeout: DEFAULT_UNIT_TIMEOUT,
            termination_grace: DEFAULT_TERMINATION_GRACE,
        }
    }
}

#[derive(Debug, Error)]
/// Enumerates supported `RunnerError` values.
pub enum RunnerError {
    #[error("invalid worker command {0}")]
    InvalidCommand(String),
    #[error("failed to spawn worker for test unit {unit}: {source}")]
    Spawn {
        unit: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed while waiting for test unit {unit}: {source}")]
    Wait {
        unit: String,
        #[source]
        source: std::io::Error,
    },
}

/// Runs units one at a time, stopping at the first failure or timeout.
pub struct BoundedRunner<L> {
    launcher: L,
    config: RunnerConfig,
}

impl<L: UnitLauncher> BoundedRunner<L> {
    pub fn new(launcher: L, config: RunnerConfig) -> Self {
        Self { launcher, config }
    }

    pub fn config(&self) -> RunnerConfig {
        self.config
    }

    pub fn run(&self, units: &[TestUnit]) -> Result<RunReport, RunnerError> {
        let started = Instant::now();
        let mut outcomes = Vec::with_capacity(units.len());
        let mut skipped = Vec::new();

        for (position, unit) in units.iter().enumerate() {
            let outcome = self.run_unit(unit)?;
            let stop = !outcome.status.is_success();
            outcomes.push(outcome);
            if stop {
                skipped = units[position + 1..].to_vec();
                break;
            }
        }

        let report = RunReport {
            outcomes,
            skipped,
            elapsed: started.elapsed(),
        };
        let elapsed_ms = report.elapsed.as_millis() as u64;
        if report.success() {
            tracing::info!(units = report.outcomes.len(), elapsed_ms, "test run succeeded");
        } else {
            tracing::warn!(
                ran = report.outcomes.len(),
                skipped = report.skipped.len(),
                elapsed_ms,
                "test run failed"
            );
        }
        Ok(report)
    }

    fn run_unit(&self, unit: &TestUnit) -> Result<UnitOutcome, RunnerError> {
        tracing::info!(unit = %unit, "running test unit");
        let started = Instant::now();
        let mut child = self
            .launcher
            .command(unit)
            .spawn()
            .map_err(|source| RunnerError::Spawn {
                unit: unit.id().to_string(),
                source,
            })?;

        let waited = child
            .wait_timeout(self.config.unit_timeout)
            .map_err(|source| RunnerError::Wait {
                unit: unit.id().to_string(),
                source,
            })?;
        let status = match waited {
            Some(exit) if exit.success() => UnitStatus::Succeeded,
            Some(exit) => UnitStatus::Failed {
                exit_code: exit.code(),
            },
            None => {
                terminate_child(&mut child, self.config.termination_grace);
                UnitStatus::TimedOut
            }
        };

        let elapsed = started.elapsed();
        match status {
            UnitStatus::Succeeded => {
                tracing::info!(
                    unit = %unit,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "test unit succeeded"
                );
            }
            UnitStatus::Failed { exit_code } => {
                tracing::warn!(unit = %unit, exit_code = ?exit_code, "test unit failed");
            }
            UnitStatus::TimedOut => {
                tracing::warn!(
                    unit = %unit,
                    timeout_ms = self.config.unit_timeout.as_millis() as u64,
                    "test unit timed out and was terminated"
                );
            }
        }

        Ok(UnitOutcome {
            unit: unit.clone(),
            status,
            elapsed,
        })
    }
}

/// Kills `child` and waits at most `grace` for it to be reaped.
pub(crate) fn terminate_child(child: &mut Child, grace: Duration) {
    let pid = child.id();
    if let Err(error) = child.kill() {
        tracing::warn!(pid, %error, "failed to kill child process");
    }
    match child.wait_timeout(grace) {
        Ok(Some(_)) => {}
        Ok(None) => {
            tracing::warn!(
                pid,
                grace_ms = grace.as_millis() as u64,
                "child process still running after termination grace period"
            );
        }
        Err(error) => {
            tracing::warn!(pid, %error, "failed to reap terminated child process");
        }
    }
}
