//! Launching an SRT server process and polling it until it serves requests.

use std::process::{Child, Command};
use std::thread;
use std::time::{Duration, Instant};

use reqwest::header::CONTENT_TYPE;
use reqwest::StatusCode;
use thiserror::Error;

use crate::runner::{terminate_child, DEFAULT_TERMINATION_GRACE};

pub const DEFAULT_SERVER_LAUNCHER: &[&str] = &["python3", "-m", "sglang.launch_server"];
pub const READINESS_PATH: &str = "/v1/models";
pub const DEFAULT_LAUNCH_TIMEOUT: Duration = Duration::from_secs(300);
pub const DEFAULT_READINESS_POLL_INTERVAL: Duration = Duration::from_secs(10);
const READINESS_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
/// Enumerates supported `LaunchError` values.
pub enum LaunchError {
    #[error("invalid server base url '{0}': expected scheme://host:port")]
    InvalidBaseUrl(String),
    #[error("invalid launch spec: {0}")]
    InvalidSpec(String),
    #[error("failed to spawn server command {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to poll server process: {0}")]
    Poll(#[source] std::io::Error),
    #[error("failed to build readiness client: {0}")]
    Http(#[from] reqwest::Error),
    #[error("server exited before becoming ready (exit code {exit_code:?})")]
    ServerExited { exit_code: Option<i32> },
    #[error(
        "server failed to start within {} ms after {attempts} readiness probes",
        .timeout.as_millis()
    )]
    TimedOut { timeout: Duration, attempts: usize },
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Public struct `ServerLaunchSpec` used by srt test harnesses.
pub struct ServerLaunchSpec {
    pub launcher: Vec<String>,
    pub model_path: String,
    pub base_url: String,
    pub api_key: Option<String>,
    pub extra_args: Vec<String>,
    pub timeout: Duration,
    pub poll_interval: Duration,
}

impl ServerLaunchSpec {
    pub fn new(model_path: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            launcher: DEFAULT_SERVER_LAUNCHER
                .iter()
                .map(|token| token.to_string())
                .collect(),
            model_path: model_path.into(),
            base_url: base_url.into(),
            api_key: None,
            extra_args: Vec::new(),
            timeout: DEFAULT_LAUNCH_TIMEOUT,
            poll_interval: DEFAULT_READINESS_POLL_INTERVAL,
        }
    }

    /// Full argv: launcher, model/host/port flags, extra args, then the key.
    pub fn command_line(&self) -> Result<Vec<String>, LaunchError> {
        if self.launcher.is_empty() {
            return Err(LaunchError::InvalidSpec(
                "launcher command must not be empty".to_string(),
            ));
        }
        let (host, port) = split_base_url(&self.base_url)?;
        let mut argv = self.launcher.clone();
        argv.extend([
            "--model-path".to_string(),
            self.model_path.clone(),
            "--host".to_string(),
            host,
            "--port".to_string(),
            port.to_string(),
        ]);
        argv.extend(self.extra_args.iter().cloned());
        if let Some(api_key) = self.api_key.as_deref().filter(|key| !key.is_empty()) {
            argv.extend(["--api-key".to_string(), api_key.to_string()]);
        }
        Ok(argv)
    }
}

/// Splits `http://host:port` into its host and port.
pub fn split_base_url(base_url: &str) -> Result<(String, u16), LaunchError> {
    let invalid = || LaunchError::InvalidBaseUrl(base_url.to_string());
    let (_, authority) = base_url.trim().split_once("://").ok_or_else(invalid)?;
    let authority = authority.trim_end_matches('/');
    let (host, port) = authority.rsplit_once(':').ok_or_else(invalid)?;
    if host.is_empty() || host.contains('/') {
        return Err(invalid());
    }
    let port = port.parse::<u16>().map_err(|_| invalid())?;
    Ok((host.to_string(), port))
}

#[derive(Debug)]
/// A launched server. Must be stopped with [`ServerProcess::shutdown`].
pub struct ServerProcess {
    child: Child,
    base_url: String,
}

impl ServerProcess {
    pub fn pid(&self) -> u32 {
        self.child.id()
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn shutdown(mut self, grace: Duration) {
        tracing::info!(pid = self.child.id(), "shutting down srt server");
        terminate_child(&mut self.child, grace);
    }
}

pub fn launch_server(spec: &ServerLaunchSpec) -> Result<ServerProcess, LaunchError> {
    let argv = spec.command_line()?;
    let (program, args) = argv.split_first().ok_or_else(|| {
        LaunchError::InvalidSpec("launcher command must not be empty".to_string())
    })?;
    let mut child = Command::new(program)
        .args(args)
        .spawn()
        .map_err(|source| LaunchError::Spawn {
            program: program.clone(),
            source,
        })?;
    tracing::info!(
        pid = child.id(),
        base_url = %spec.base_url,
        model = %spec.model_path,
        "launched srt server"
    );

    match poll_until_ready(
        &spec.base_url,
        spec.api_key.as_deref(),
        spec.timeout,
        spec.poll_interval,
        Some(&mut child),
    ) {
        Ok(()) => Ok(ServerProcess {
            child,
            base_url: spec.base_url.clone(),
        }),
        Err(error) => {
            if !matches!(error, LaunchError::ServerExited { .. }) {
                terminate_child(&mut child, DEFAULT_TERMINATION_GRACE);
            }
            Err(error)
        }
    }
}

/// Polls `GET {base_url}/v1/models` until it answers 200 or `timeout` passes.
pub fn wait_until_ready(
    base_url: &str,
    api_key: Option<&str>,
    timeout: Duration,
    poll_interval: Duration,
) -> Result<(), LaunchError> {
    poll_until_ready(base_url, api_key, timeout, poll_interval, None)
}

fn poll_until_ready(
    base_url: &str,
    api_key: Option<&str>,
    timeout: Duration,
    poll_interval: Duration,
    mut child: Option<&mut Child>,
) -> Result<(), LaunchError> {
    let client = reqwest::blocking::Client::builder()
        .timeout(READINESS_PROBE_TIMEOUT)
        .build()?;
    let url = format!("{}{READINESS_PATH}", base_url.trim().trim_end_matches('/'));
    let started = Instant::now();
    let mut attempts = 0;

    while started.elapsed() < timeout {
        if let Some(child) = child.as_deref_mut() {
            if let Some(status) = child.try_wait().map_err(LaunchError::Poll)? {
                return Err(LaunchError::ServerExited {
                    exit_code: status.code(),
                });
            }
        }

        attempts += 1;
        let mut request = client
            .get(&url)
            .header(CONTENT_TYPE, "application/json; charset=utf-8");
        if let Some(api_key) = api_key {
            request = request.bearer_auth(api_key);
        }
        match request.send() {
            Ok(response) if response.status() == StatusCode::OK => {
                tracing::info!(
                    url = %url,
                    attempts,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "srt server is ready"
                );
                return Ok(());
            }
            Ok(response) => {
                tracing::debug!(
                    url = %url,
                    status = response.status().as_u16(),
                    "server not ready"
                );
            }
            Err(error) => {
                tracing::debug!(url = %url, %error, "server not reachable yet");
            }
        }

        let remaining = timeout.saturating_sub(started.elapsed());
        thread::sleep(poll_interval.min(remaining));
    }

    Err(LaunchError::TimedOut { timeout, attempts })
}
