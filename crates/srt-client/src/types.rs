use std::str::FromStr;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::{ChatTemplate, StreamDelta};

pub const DEFAULT_MAX_NEW_TOKENS: u32 = 128;
pub const DEFAULT_TEMPERATURE: f32 = 1.0;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
/// Output datatype selector. Unset means text output.
pub enum OutputDtype {
    Int,
}

impl OutputDtype {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Int => "int",
        }
    }
}

impl FromStr for OutputDtype {
    type Err = SrtClientError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim() {
            "int" => Ok(Self::Int),
            other => Err(SrtClientError::Usage(format!(
                "invalid dtype '{other}': expected 'int' or unset"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Server-side detokenization flags sent with every generation request.
pub struct OutputFormatting {
    pub skip_special_tokens: bool,
    pub spaces_between_special_tokens: bool,
}

impl Default for OutputFormatting {
    fn default() -> Self {
        Self {
            skip_special_tokens: true,
            spaces_between_special_tokens: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
/// Optional logprob instrumentation. Unset fields are never sent.
pub struct LogprobOptions {
    pub return_logprob: Option<bool>,
    pub logprob_start_len: Option<i64>,
    pub top_logprobs_num: Option<u32>,
    pub return_text_in_logprobs: Option<bool>,
}

#[derive(Debug, Clone, PartialEq)]
/// Public struct `SamplingParams` used across srt client components.
pub struct SamplingParams {
    pub max_new_tokens: u32,
    pub temperature: f32,
    pub stop: Vec<String>,
    pub stop_token_ids: Vec<u32>,
    pub top_p: Option<f32>,
    pub top_k: Option<i32>,
    pub frequency_penalty: Option<f32>,
    pub presence_penalty: Option<f32>,
    pub ignore_eos: bool,
    pub regex: Option<String>,
    pub dtype: Option<OutputDtype>,
    pub logprobs: LogprobOptions,
}

impl Default for SamplingParams {
    fn default() -> Self {
        Self {
            max_new_tokens: DEFAULT_MAX_NEW_TOKENS,
            temperature: DEFAULT_TEMPERATURE,
            stop: Vec::new(),
            stop_token_ids: Vec::new(),
            top_p: None,
            top_k: None,
            frequency_penalty: None,
            presence_penalty: None,
            ignore_eos: false,
            regex: None,
            dtype: None,
            logprobs: LogprobOptions::default(),
        }
    }
}

impl SamplingParams {
    pub fn greedy(max_new_tokens: u32) -> Self {
        Self {
            max_new_tokens,
            temperature: 0.0,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Image attached to a program state; `data` is already base64 encoded.
pub struct ImageAttachment {
    pub source: String,
    pub data: String,
}

impl ImageAttachment {
    pub fn new(source: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            data: data.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
/// Caller-owned program text plus attached images.
pub struct ProgramState {
    pub text: String,
    pub images: Vec<ImageAttachment>,
}

impl ProgramState {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            images: Vec::new(),
        }
    }

    pub fn with_image(mut self, image: ImageAttachment) -> Self {
        self.images.push(image);
        self
    }

    pub fn append_text(&mut self, text: &str) {
        self.text.push_str(text);
    }

    /// Returns the attached image, rejecting states that carry more than one.
    pub fn single_image(&self) -> Result<Option<&ImageAttachment>, SrtClientError> {
        match self.images.as_slice() {
            [] => Ok(None),
            [image] => Ok(Some(image)),
            images => Err(SrtClientError::Usage(format!(
                "only one image per request is supported, got {}",
                images.len()
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
/// One `[logprob, token_id, token_text?]` entry from the server.
pub struct TokenLogprob {
    pub logprob: Option<f64>,
    pub token_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawTokenLogprob {
    WithText(Option<f64>, i64, Option<String>),
    Bare(Option<f64>, i64),
}

impl<'de> Deserialize<'de> for TokenLogprob {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(match RawTokenLogprob::deserialize(deserializer)? {
            RawTokenLogprob::WithText(logprob, token_id, text) => Self {
                logprob,
                token_id,
                text,
            },
            RawTokenLogprob::Bare(logprob, token_id) => Self {
                logprob,
                token_id,
                text: None,
            },
        })
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
/// Server-reported metadata attached to a generation or stream snapshot.
pub struct MetaInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub normalized_prompt_logprob: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_token_logprobs: Option<Vec<TokenLogprob>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_token_logprobs: Option<Vec<TokenLogprob>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
/// Public struct `Generation` used across srt client components.
pub struct Generation {
    #[serde(deserialize_with = "deserialize_text_or_number")]
    pub text: String,
    #[serde(default)]
    pub meta_info: MetaInfo,
}

/// Integer-typed output may arrive as a JSON number instead of a string.
pub(crate) fn deserialize_text_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(text) => Ok(text),
        Value::Number(number) => Ok(number.to_string()),
        other => Err(D::Error::custom(format!(
            "expected text or number, got {other}"
        ))),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
/// Outcome of a logprob-scored choice selection.
pub struct Selection {
    pub decision: String,
    pub index: usize,
    pub normalized_prompt_logprobs: Vec<f64>,
    pub input_token_logprobs: Vec<Vec<TokenLogprob>>,
    pub output_token_logprobs: Vec<Vec<TokenLogprob>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Coarse error classes surfaced to callers.
pub enum SrtErrorKind {
    Connection,
    Protocol,
    Usage,
}

#[derive(Debug, Error)]
/// Enumerates supported `SrtClientError` values.
pub enum SrtClientError {
    #[error("failed to reach {url}: {source}")]
    Connection {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("failed to read streaming response: {0}")]
    StreamRead(#[source] std::io::Error),
    #[error("server returned non-success status {status}: {body}")]
    HttpStatus { status: u16, body: String },
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
    #[error("invalid usage: {0}")]
    Usage(String),
    #[error("invalid endpoint config: {0}")]
    Config(String),
}

impl SrtClientError {
    pub fn kind(&self) -> SrtErrorKind {
        match self {
            Self::Connection { .. } | Self::StreamRead(_) => SrtErrorKind::Connection,
            Self::HttpStatus { .. } | Self::Serde(_) | Self::InvalidResponse(_) => {
                SrtErrorKind::Protocol
            }
            Self::Usage(_) | Self::Config(_) => SrtErrorKind::Usage,
        }
    }

    /// Decodes the body of a non-success response, when it is JSON.
    pub fn detail_json(&self) -> Option<Value> {
        match self {
            Self::HttpStatus { body, .. } => serde_json::from_str(body).ok(),
            _ => None,
        }
    }
}

pub type DeltaStream = Box<dyn Iterator<Item = Result<StreamDelta, SrtClientError>> + Send>;

/// Trait contract for `Backend` behavior.
pub trait Backend: Send + Sync {
    fn model_name(&self) -> &str;

    fn chat_template(&self) -> &ChatTemplate;

    fn generate(
        &self,
        state: &ProgramState,
        params: &SamplingParams,
    ) -> Result<Generation, SrtClientError>;

    fn generate_stream(
        &self,
        state: &ProgramState,
        params: &SamplingParams,
    ) -> Result<DeltaStream, SrtClientError>;

    fn select(
        &self,
        state: &ProgramState,
        choices: &[String],
        temperature: f32,
    ) -> Result<Selection, SrtClientError>;

    fn flush_cache(&self) -> Result<(), SrtClientError>;

    fn cache_prefix(&self, prefix: &str) -> Result<(), SrtClientError> {
        let _ = prefix;
        Ok(())
    }

    fn supports_concatenate_and_append(&self) -> bool {
        false
    }

    fn concatenate_and_append(
        &self,
        src_rids: &[String],
        dst_rid: &str,
    ) -> Result<(), SrtClientError> {
        Err(SrtClientError::Usage(format!(
            "backend does not support concatenate_and_append ({} sources into '{dst_rid}')",
            src_rids.len()
        )))
    }
}
