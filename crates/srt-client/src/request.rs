//! Wire payloads for `POST /generate` and the builders that produce them.
//!
//! Generation payloads carry the caller's sampling parameters and the explicit
//! output-formatting flags. Priming and scoring payloads only ever send
//! `max_new_tokens: 0`, so the server evaluates the prompt without sampling.

use serde::Serialize;

use crate::{OutputDtype, OutputFormatting, ProgramState, SamplingParams, SrtClientError};

/// Selection is only defined for deterministic scoring.
pub const SELECT_MAX_TEMPERATURE: f32 = 1e-5;

/// Tokens to back off from the primed prompt length when opening the logprob
/// window. The last prompt token can merge with the first choice token; this
/// constant is empirical and depends on the tokenizer family.
pub const LOGPROB_BOUNDARY_BACKOFF_TOKENS: u64 = 2;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
/// Single prompt or a batch of prompts scored in one request.
pub enum PromptInput {
    Single(String),
    Batch(Vec<String>),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct WireSamplingParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skip_special_tokens: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub spaces_between_special_tokens: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dtype: Option<OutputDtype>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_new_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_token_ids: Option<Vec<u32>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_k: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ignore_eos: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub regex: Option<String>,
}

impl WireSamplingParams {
    fn zero_tokens() -> Self {
        Self {
            max_new_tokens: Some(0),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
/// Public struct `GenerateRequest` used across srt client components.
pub struct GenerateRequest {
    pub text: PromptInput,
    pub sampling_params: WireSamplingParams,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub return_logprob: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logprob_start_len: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_logprobs_num: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub return_text_in_logprobs: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_data: Option<String>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub stream: bool,
}

impl GenerateRequest {
    fn zero_tokens(text: PromptInput) -> Self {
        Self {
            text,
            sampling_params: WireSamplingParams::zero_tokens(),
            return_logprob: None,
            logprob_start_len: None,
            top_logprobs_num: None,
            return_text_in_logprobs: None,
            image_data: None,
            stream: false,
        }
    }

    pub fn streaming(mut self) -> Self {
        self.stream = true;
        self
    }

    fn attach_image(mut self, state: &ProgramState) -> Result<Self, SrtClientError> {
        if let Some(image) = state.single_image()? {
            self.image_data = Some(image.data.clone());
        }
        Ok(self)
    }
}

fn non_empty<T: Clone>(values: &[T]) -> Option<Vec<T>> {
    if values.is_empty() {
        None
    } else {
        Some(values.to_vec())
    }
}

pub fn build_generate_request(
    state: &ProgramState,
    params: &SamplingParams,
    formatting: &OutputFormatting,
) -> Result<GenerateRequest, SrtClientError> {
    let sampling_params = WireSamplingParams {
        skip_special_tokens: Some(formatting.skip_special_tokens),
        spaces_between_special_tokens: Some(formatting.spaces_between_special_tokens),
        dtype: params.dtype,
        max_new_tokens: Some(params.max_new_tokens),
        stop: non_empty(&params.stop),
        stop_token_ids: non_empty(&params.stop_token_ids),
        temperature: Some(params.temperature),
        top_p: params.top_p,
        top_k: params.top_k,
        frequency_penalty: params.frequency_penalty,
        presence_penalty: params.presence_penalty,
        ignore_eos: params.ignore_eos.then_some(true),
        regex: params.regex.clone(),
    };

    GenerateRequest {
        text: PromptInput::Single(state.text.clone()),
        sampling_params,
        return_logprob: params.logprobs.return_logprob,
        logprob_start_len: params.logprobs.logprob_start_len,
        top_logprobs_num: params.logprobs.top_logprobs_num,
        return_text_in_logprobs: params.logprobs.return_text_in_logprobs,
        image_data: None,
        stream: false,
    }
    .attach_image(state)
}

/// Zero-token request over the state's text and image.
pub fn build_prime_request(state: &ProgramState) -> Result<GenerateRequest, SrtClientError> {
    GenerateRequest::zero_tokens(PromptInput::Single(state.text.clone())).attach_image(state)
}

/// Zero-token request over a bare prefix, used to warm the prefix cache.
pub fn build_prefix_request(prefix: &str) -> GenerateRequest {
    GenerateRequest::zero_tokens(PromptInput::Single(prefix.to_string()))
}

pub fn logprob_start_len_for(prompt_tokens: u64) -> i64 {
    let start = prompt_tokens.saturating_sub(LOGPROB_BOUNDARY_BACKOFF_TOKENS);
    i64::try_from(start).unwrap_or(i64::MAX)
}

/// Batched scoring request: one input per choice, each prefixed by the prompt.
pub fn build_selection_request(
    state: &ProgramState,
    choices: &[String],
    prompt_tokens: u64,
) -> Result<GenerateRequest, SrtClientError> {
    let inputs = choices
        .iter()
        .map(|choice| format!("{}{choice}", state.text))
        .collect();
    let mut request = GenerateRequest::zero_tokens(PromptInput::Batch(inputs));
    request.return_logprob = Some(true);
    request.logprob_start_len = Some(logprob_start_len_for(prompt_tokens));
    request.attach_image(state)
}

/// Checks the selection preconditions that must hold before any network call.
pub fn validate_selection(
    state: &ProgramState,
    choices: &[String],
    temperature: f32,
) -> Result<(), SrtClientError> {
    if temperature.is_nan() || temperature > SELECT_MAX_TEMPERATURE {
        return Err(SrtClientError::Usage(format!(
            "select requires temperature <= {SELECT_MAX_TEMPERATURE}, got {temperature}"
        )));
    }
    if choices.is_empty() {
        return Err(SrtClientError::Usage(
            "select requires at least one choice".to_string(),
        ));
    }
    state.single_image()?;
    Ok(())
}
