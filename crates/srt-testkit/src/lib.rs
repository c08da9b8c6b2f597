//! Test harness support for the SRT client: bounded process-isolated test
//! runs, thread-bounded calls and server launch with readiness polling.
mod runner;
mod server_launch;
mod timeout;

pub use runner::{
    BoundedRunner, CommandLauncher, RunReport, RunnerConfig, RunnerError, TestUnit, UnitLauncher,
    UnitOutcome, UnitStatus, DEFAULT_TERMINATION_GRACE, DEFAULT_UNIT_TIMEOUT,
};
pub use server_launch::{
    launch_server, split_base_url, wait_until_ready, LaunchError, ServerLaunchSpec, ServerProcess,
    DEFAULT_LAUNCH_TIMEOUT, DEFAULT_READINESS_POLL_INTERVAL, DEFAULT_SERVER_LAUNCHER,
    READINESS_PATH,
};
pub use timeout::{run_with_timeout, RunWithTimeoutError};
