use std::fs;
use std::io::{self, Write};
use std::path::Path;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine as _;
use serde_json::{json, Value};
use srt_client::{
    ImageAttachment, LogprobOptions, OutputFormatting, ProgramState, RuntimeEndpoint,
    RuntimeEndpointConfig, SamplingParams, TlsVerification,
};
use srt_testkit::{BoundedRunner, CommandLauncher, RunReport, RunnerConfig, TestUnit};

use crate::cli_args::{Cli, CliCommand, EndpointArgs, GenerateArgs, RunTestsArgs, SelectArgs};

pub(crate) fn run_cli(cli: Cli) -> Result<ExitCode> {
    let Cli { endpoint, command } = cli;
    match command {
        CliCommand::ModelInfo => {
            let endpoint = connect(&endpoint)?;
            print_json(&serde_json::to_value(endpoint.model_info())?)?;
        }
        CliCommand::ServerArgs => print_json(&connect(&endpoint)?.get_server_args()?)?,
        CliCommand::FlushCache => {
            connect(&endpoint)?.flush_cache()?;
            print_json(&json!({ "flushed": true }))?;
        }
        CliCommand::CachePrefix { prefix } => {
            connect(&endpoint)?.cache_prefix(&prefix)?;
            print_json(&json!({ "cached": true }))?;
        }
        CliCommand::Generate(args) => generate(&connect(&endpoint)?, &args)?,
        CliCommand::Select(args) => select(&connect(&endpoint)?, &args)?,
        CliCommand::Concat { src, dst } => {
            connect(&endpoint)?.concatenate_and_append(&src, &dst)?;
            print_json(&json!({ "merged": src.len(), "dst_rid": dst }))?;
        }
        CliCommand::RunTests(args) => return run_tests(&args),
    }
    Ok(ExitCode::SUCCESS)
}

fn connect(args: &EndpointArgs) -> Result<RuntimeEndpoint> {
    RuntimeEndpoint::connect(endpoint_config(args))
        .with_context(|| format!("failed to connect to {}", args.base_url))
}

pub(crate) fn endpoint_config(args: &EndpointArgs) -> RuntimeEndpointConfig {
    let tls = match (&args.ca_bundle, args.insecure) {
        (_, true) => TlsVerification::Insecure,
        (Some(path), false) => TlsVerification::CaBundle(path.clone()),
        (None, false) => TlsVerification::System,
    };
    RuntimeEndpointConfig {
        base_url: args.base_url.clone(),
        api_key: args.api_key.clone().filter(|key| !key.trim().is_empty()),
        tls,
        request_timeout_ms: args.request_timeout_ms,
        formatting: OutputFormatting {
            skip_special_tokens: args.skip_special_tokens,
            spaces_between_special_tokens: args.spaces_between_special_tokens,
        },
    }
}

pub(crate) fn sampling_params(args: &GenerateArgs) -> SamplingParams {
    SamplingParams {
        max_new_tokens: args.max_new_tokens,
        temperature: args.temperature,
        stop: args.stop.clone(),
        dtype: args.dtype,
        logprobs: LogprobOptions {
            return_logprob: args.return_logprob.then_some(true),
            logprob_start_len: args.logprob_start_len,
            top_logprobs_num: args.top_logprobs_num,
            return_text_in_logprobs: args.return_text_in_logprobs.then_some(true),
        },
        ..SamplingParams::default()
    }
}

fn program_state(prompt: &str, image_file: Option<&Path>) -> Result<ProgramState> {
    let state = ProgramState::new(prompt);
    let Some(path) = image_file else {
        return Ok(state);
    };
    let bytes = fs::read(path)
        .with_context(|| format!("failed to read image file {}", path.display()))?;
    let image = ImageAttachment::new(path.display().to_string(), BASE64_STANDARD.encode(bytes));
    Ok(state.with_image(image))
}

fn generate(endpoint: &RuntimeEndpoint, args: &GenerateArgs) -> Result<()> {
    let state = program_state(&args.prompt, args.image_file.as_deref())?;
    let params = sampling_params(args);

    if !args.stream {
        let generation = endpoint.generate(&state, &params)?;
        return print_json(&serde_json::to_value(generation)?);
    }

    let mut stdout = io::stdout().lock();
    let mut last_meta = None;
    for delta in endpoint.generate_stream(&state, &params)? {
        let delta = delta?;
        stdout
            .write_all(delta.text.as_bytes())
            .context("failed to write streamed text")?;
        stdout.flush().context("failed to flush stdout")?;
        last_meta = Some(delta.meta_info);
    }
    writeln!(stdout).context("failed to write stdout")?;
    if let Some(meta_info) = last_meta {
        tracing::info!(
            completion_tokens = ?meta_info.completion_tokens,
            finish_reason = ?meta_info.finish_reason,
            "stream finished"
        );
    }
    Ok(())
}

fn select(endpoint: &RuntimeEndpoint, args: &SelectArgs) -> Result<()> {
    let state = program_state(&args.prompt, args.image_file.as_deref())?;
    let selection = endpoint.select(&state, &args.choices, args.temperature)?;
    print_json(&serde_json::to_value(selection)?)
}

fn run_tests(args: &RunTestsArgs) -> Result<ExitCode> {
    let launcher = CommandLauncher::parse(&args.worker_command)?;
    let config = RunnerConfig {
        unit_timeout: Duration::from_secs(args.timeout_secs),
        termination_grace: Duration::from_millis(args.grace_ms),
    };
    let units: Vec<TestUnit> = args
        .units
        .iter()
        .map(|unit| TestUnit::new(unit.as_str()))
        .collect();
    let report = BoundedRunner::new(launcher, config).run(&units)?;
    print_json(&report_json(&report))?;
    Ok(ExitCode::from(report.exit_code() as u8))
}

pub(crate) fn report_json(report: &RunReport) -> Value {
    let outcomes: Vec<Value> = report
        .outcomes
        .iter()
        .map(|outcome| {
            json!({
                "unit": outcome.unit.id(),
                "status": outcome.status.as_str(),
                "elapsed_ms": outcome.elapsed.as_millis() as u64,
            })
        })
        .collect();
    json!({
        "success": report.success(),
        "outcomes": outcomes,
        "skipped": report.skipped.iter().map(TestUnit::id).collect::<Vec<_>>(),
        "elapsed_ms": report.elapsed.as_millis() as u64,
    })
}

fn print_json(value: &Value) -> Result<()> {
    let rendered = serde_json::to_string_pretty(value).context("failed to render json output")?;
    println!("{rendered}");
    Ok(())
}
