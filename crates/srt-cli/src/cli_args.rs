use std::path::PathBuf;

use clap::{ArgAction, Args, Parser, Subcommand};
use srt_client::OutputDtype;

pub(crate) const DEFAULT_BASE_URL: &str = "http://127.0.0.1:30000";

fn parse_positive_u64(value: &str) -> Result<u64, String> {
    let parsed = value
        .parse::<u64>()
        .map_err(|error| format!("failed to parse integer: {error}"))?;
    if parsed == 0 {
        return Err("value must be greater than 0".to_string());
    }
    Ok(parsed)
}

fn parse_temperature(value: &str) -> Result<f32, String> {
    let parsed = value
        .parse::<f32>()
        .map_err(|error| format!("failed to parse float: {error}"))?;
    if !parsed.is_finite() || parsed < 0.0 {
        return Err("value must be a finite number >= 0".to_string());
    }
    Ok(parsed)
}

fn parse_dtype(value: &str) -> Result<OutputDtype, String> {
    value.parse::<OutputDtype>().map_err(|error| error.to_string())
}

#[derive(Debug, Parser)]
#[command(
    name = "srt",
    about = "Client and test harness for the SRT generation server",
    version
)]
/// Public struct `Cli` used across srt command components.
pub(crate) struct Cli {
    #[command(flatten)]
    pub(crate) endpoint: EndpointArgs,

    #[command(subcommand)]
    pub(crate) command: CliCommand,
}

#[derive(Debug, Args)]
pub(crate) struct EndpointArgs {
    #[arg(
        long = "base-url",
        env = "SRT_BASE_URL",
        default_value = DEFAULT_BASE_URL,
        global = true,
        help = "Base URL of the SRT server (scheme://host:port)"
    )]
    pub(crate) base_url: String,

    #[arg(
        long = "api-key",
        env = "SRT_API_KEY",
        global = true,
        hide_env_values = true,
        help = "Bearer token sent with every request"
    )]
    pub(crate) api_key: Option<String>,

    #[arg(
        long = "ca-bundle",
        env = "SRT_CA_BUNDLE",
        global = true,
        conflicts_with = "insecure",
        help = "PEM bundle of extra root certificates trusted for https servers"
    )]
    pub(crate) ca_bundle: Option<PathBuf>,

    #[arg(
        long,
        env = "SRT_INSECURE",
        global = true,
        default_value_t = false,
        help = "Skip TLS certificate verification (testing only)"
    )]
    pub(crate) insecure: bool,

    #[arg(
        long = "request-timeout-ms",
        env = "SRT_REQUEST_TIMEOUT_MS",
        global = true,
        value_parser = parse_positive_u64,
        help = "Per-request timeout in milliseconds, covering the whole response body including streams; unbounded when omitted"
    )]
    pub(crate) request_timeout_ms: Option<u64>,

    #[arg(
        long = "skip-special-tokens",
        env = "SRT_SKIP_SPECIAL_TOKENS",
        global = true,
        default_value_t = true,
        action = ArgAction::Set,
        num_args = 0..=1,
        require_equals = true,
        default_missing_value = "true",
        help = "Strip special tokens from generated text"
    )]
    pub(crate) skip_special_tokens: bool,

    #[arg(
        long = "spaces-between-special-tokens",
        env = "SRT_SPACES_BETWEEN_SPECIAL_TOKENS",
        global = true,
        default_value_t = true,
        action = ArgAction::Set,
        num_args = 0..=1,
        require_equals = true,
        default_missing_value = "true",
        help = "Insert spaces between special tokens when detokenizing"
    )]
    pub(crate) spaces_between_special_tokens: bool,
}

#[derive(Debug, Subcommand)]
/// Enumerates supported `CliCommand` values.
pub(crate) enum CliCommand {
    /// Print the model metadata cached at connect time.
    ModelInfo,
    /// Print the server's launch arguments.
    ServerArgs,
    /// Clear the server-side prefix cache.
    FlushCache,
    /// Warm the server cache with a prompt prefix.
    CachePrefix {
        #[arg(help = "Prefix text to evaluate without generating")]
        prefix: String,
    },
    /// Generate a completion for one prompt.
    Generate(GenerateArgs),
    /// Pick the most likely continuation among fixed choices.
    Select(SelectArgs),
    /// Merge cached request state into a destination request.
    Concat {
        #[arg(long = "src", required = true, help = "Source request id (repeatable)")]
        src: Vec<String>,
        #[arg(long, help = "Destination request id")]
        dst: String,
    },
    /// Run test units one per process with a wall-clock bound each.
    RunTests(RunTestsArgs),
}

#[derive(Debug, Args)]
pub(crate) struct GenerateArgs {
    #[arg(long, help = "Prompt text")]
    pub(crate) prompt: String,

    #[arg(
        long = "max-new-tokens",
        default_value_t = srt_client::DEFAULT_MAX_NEW_TOKENS,
        help = "Maximum number of tokens to generate; 0 evaluates the prompt only"
    )]
    pub(crate) max_new_tokens: u32,

    #[arg(
        long,
        default_value_t = srt_client::DEFAULT_TEMPERATURE,
        value_parser = parse_temperature,
        help = "Sampling temperature; 0 is greedy"
    )]
    pub(crate) temperature: f32,

    #[arg(long = "stop", help = "Stop string (repeatable)")]
    pub(crate) stop: Vec<String>,

    #[arg(
        long,
        value_parser = parse_dtype,
        help = "Output dtype selector; only 'int' is supported"
    )]
    pub(crate) dtype: Option<OutputDtype>,

    #[arg(long = "image-file", help = "Image attached to the prompt")]
    pub(crate) image_file: Option<PathBuf>,

    #[arg(long = "return-logprob", help = "Ask the server for token logprobs")]
    pub(crate) return_logprob: bool,

    #[arg(long = "logprob-start-len", help = "Prompt token index where logprobs start")]
    pub(crate) logprob_start_len: Option<i64>,

    #[arg(long = "top-logprobs-num", help = "Number of top alternatives per token")]
    pub(crate) top_logprobs_num: Option<u32>,

    #[arg(long = "return-text-in-logprobs", help = "Include token text in logprobs")]
    pub(crate) return_text_in_logprobs: bool,

    #[arg(long, help = "Print text deltas as they arrive")]
    pub(crate) stream: bool,
}

#[derive(Debug, Args)]
pub(crate) struct SelectArgs {
    #[arg(long, help = "Prompt text shared by every choice")]
    pub(crate) prompt: String,

    #[arg(long = "choice", required = true, help = "Candidate continuation (repeatable)")]
    pub(crate) choices: Vec<String>,

    #[arg(
        long,
        default_value_t = 0.0,
        value_parser = parse_temperature,
        help = "Selection temperature; must be effectively zero"
    )]
    pub(crate) temperature: f32,

    #[arg(long = "image-file", help = "Image attached to the prompt")]
    pub(crate) image_file: Option<PathBuf>,
}

#[derive(Debug, Args)]
pub(crate) struct RunTestsArgs {
    #[arg(
        long = "worker-command",
        env = "SRT_TEST_WORKER_COMMAND",
        help = "Command that runs one unit; the unit id is appended as the last argument"
    )]
    pub(crate) worker_command: String,

    #[arg(
        long = "timeout-secs",
        env = "SRT_TEST_TIMEOUT_SECS",
        default_value_t = srt_testkit::DEFAULT_UNIT_TIMEOUT.as_secs(),
        value_parser = parse_positive_u64,
        help = "Wall-clock bound for each unit in seconds"
    )]
    pub(crate) timeout_secs: u64,

    #[arg(
        long = "grace-ms",
        default_value_t = srt_testkit::DEFAULT_TERMINATION_GRACE.as_millis() as u64,
        help = "Time allowed for a killed unit to be reaped"
    )]
    pub(crate) grace_ms: u64,

    #[arg(required = true, help = "Test units to run, in order")]
    pub(crate) units: Vec<String>,
}

#[cfg(test)]
mod tests {
    use clap::Parser;
    use srt_client::OutputDtype;

    use super::{Cli, CliCommand, DEFAULT_BASE_URL};

    #[test]
    fn parses_generate_with_defaults() {
        let cli = Cli::try_parse_from(["srt", "generate", "--prompt", "The capital of France is"])
            .expect("parse");
        assert_eq!(cli.endpoint.base_url, DEFAULT_BASE_URL);
        assert!(cli.endpoint.skip_special_tokens);
        assert!(cli.endpoint.spaces_between_special_tokens);
        let CliCommand::Generate(args) = cli.command else {
            panic!("expected generate command");
        };
        assert_eq!(args.max_new_tokens, 128);
        assert_eq!(args.temperature, 1.0);
        assert!(args.stop.is_empty());
        assert!(!args.stream);
        assert_eq!(args.dtype, None);
    }

    #[test]
    fn parses_global_options_after_subcommand() {
        let cli = Cli::try_parse_from([
            "srt",
            "generate",
            "--prompt",
            "1 + 1 =",
            "--dtype",
            "int",
            "--stop",
            "\n",
            "--stop",
            ".",
            "--base-url",
            "http://localhost:8157",
            "--skip-special-tokens=false",
        ])
        .expect("parse");
        assert_eq!(cli.endpoint.base_url, "http://localhost:8157");
        assert!(!cli.endpoint.skip_special_tokens);
        let CliCommand::Generate(args) = cli.command else {
            panic!("expected generate command");
        };
        assert_eq!(args.dtype, Some(OutputDtype::Int));
        assert_eq!(args.stop, ["\n", "."]);
    }

    #[test]
    fn accepts_zero_max_new_tokens_for_prompt_evaluation() {
        let cli = Cli::try_parse_from([
            "srt",
            "generate",
            "--prompt",
            "x",
            "--max-new-tokens",
            "0",
        ])
        .expect("zero tokens is a valid request");
        let CliCommand::Generate(args) = cli.command else {
            panic!("expected generate command");
        };
        assert_eq!(args.max_new_tokens, 0);
    }

    #[test]
    fn rejects_unknown_dtype_and_negative_temperature() {
        assert!(
            Cli::try_parse_from(["srt", "generate", "--prompt", "x", "--dtype", "float"]).is_err()
        );
        assert!(
            Cli::try_parse_from(["srt", "generate", "--prompt", "x", "--temperature", "-1"])
                .is_err()
        );
    }

    #[test]
    fn select_requires_at_least_one_choice() {
        assert!(Cli::try_parse_from(["srt", "select", "--prompt", "x"]).is_err());
        let cli = Cli::try_parse_from([
            "srt", "select", "--prompt", "x", "--choice", "yes", "--choice", "no",
        ])
        .expect("parse");
        let CliCommand::Select(args) = cli.command else {
            panic!("expected select command");
        };
        assert_eq!(args.choices, ["yes", "no"]);
        assert_eq!(args.temperature, 0.0);
    }

    #[test]
    fn parses_run_tests_with_units_in_order() {
        let cli = Cli::try_parse_from([
            "srt",
            "run-tests",
            "--worker-command",
            "python3 -m unittest",
            "--timeout-secs",
            "30",
            "test_a.py",
            "test_b.py",
        ])
        .expect("parse");
        let CliCommand::RunTests(args) = cli.command else {
            panic!("expected run-tests command");
        };
        assert_eq!(args.worker_command, "python3 -m unittest");
        assert_eq!(args.timeout_secs, 30);
        assert_eq!(args.grace_ms, 5_000);
        assert_eq!(args.units, ["test_a.py", "test_b.py"]);
        assert!(Cli::try_parse_from([
            "srt",
            "run-tests",
            "--worker-command",
            "x",
            "--timeout-secs",
            "0",
            "t.py",
        ])
        .is_err());
    }

    #[test]
    fn ca_bundle_conflicts_with_insecure() {
        assert!(Cli::try_parse_from([
            "srt",
            "--ca-bundle",
            "/tmp/ca.pem",
            "--insecure",
            "model-info",
        ])
        .is_err());
    }
}
