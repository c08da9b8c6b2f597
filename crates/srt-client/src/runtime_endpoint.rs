use std::io::BufReader;
use std::path::PathBuf;
use std::time::Duration;

use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::{
    request::{
        build_generate_request, build_prefix_request, build_prime_request,
        build_selection_request, validate_selection,
    },
    resolve_chat_template,
    selection::score_choices,
    Backend, ChatTemplate, DeltaStream, GenerateStream, Generation, OutputFormatting,
    ProgramState, SamplingParams, Selection, SrtClientError,
};

pub const GET_MODEL_INFO_PATH: &str = "/get_model_info";
pub const FLUSH_CACHE_PATH: &str = "/flush_cache";
pub const GET_SERVER_ARGS_PATH: &str = "/get_server_args";
pub const GENERATE_PATH: &str = "/generate";
pub const CONCATENATE_AND_APPEND_PATH: &str = "/concate_and_append_request";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
/// Enumerates supported `TlsVerification` values.
pub enum TlsVerification {
    #[default]
    System,
    CaBundle(PathBuf),
    Insecure,
}

#[derive(Debug, Clone)]
/// Public struct `RuntimeEndpointConfig` used across srt client components.
pub struct RuntimeEndpointConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub tls: TlsVerification,
    /// Total time allowed per request, including reading the whole body. A
    /// stream that outlives it ends with `StreamRead`; leave unset for
    /// long-running streams.
    pub request_timeout_ms: Option<u64>,
    pub formatting: OutputFormatting,
}

impl RuntimeEndpointConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: None,
            tls: TlsVerification::default(),
            request_timeout_ms: None,
            formatting: OutputFormatting::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
/// Model metadata reported by `GET /get_model_info`.
pub struct ModelInfo {
    pub model_path: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone)]
/// Session against one SRT runtime server.
///
/// Model metadata is fetched once in [`RuntimeEndpoint::connect`] and is
/// read-only afterwards. No call is retried.
pub struct RuntimeEndpoint {
    client: Client,
    config: RuntimeEndpointConfig,
    model_info: ModelInfo,
    chat_template: ChatTemplate,
}

impl RuntimeEndpoint {
    pub fn connect(config: RuntimeEndpointConfig) -> Result<Self, SrtClientError> {
        let client = build_http_client(&config)?;
        let url = endpoint_url(&config.base_url, GET_MODEL_INFO_PATH);
        let response = send_checked(client.get(&url), &url)?;
        let model_info: ModelInfo = read_json(response, &url)?;
        let chat_template = resolve_chat_template(&model_info.model_path);
        tracing::info!(
            base_url = %config.base_url,
            model = %model_info.model_path,
            chat_template = %chat_template.name,
            "connected to srt runtime"
        );

        Ok(Self {
            client,
            config,
            model_info,
            chat_template,
        })
    }

    pub fn config(&self) -> &RuntimeEndpointConfig {
        &self.config
    }

    pub fn model_info(&self) -> &ModelInfo {
        &self.model_info
    }

    pub fn model_name(&self) -> &str {
        &self.model_info.model_path
    }

    pub fn chat_template(&self) -> &ChatTemplate {
        &self.chat_template
    }

    pub fn flush_cache(&self) -> Result<(), SrtClientError> {
        self.get(FLUSH_CACHE_PATH).map(drop)
    }

    pub fn get_server_args(&self) -> Result<Value, SrtClientError> {
        let url = self.url(GET_SERVER_ARGS_PATH);
        let response = send_checked(self.client.get(&url), &url)?;
        read_json(response, &url)
    }

    pub fn cache_prefix(&self, prefix: &str) -> Result<(), SrtClientError> {
        self.post(GENERATE_PATH, &build_prefix_request(prefix))
            .map(drop)
    }

    /// Evaluates the state's text and image without generating, so later
    /// requests sharing this prefix hit the server cache.
    pub fn prime(&self, state: &ProgramState) -> Result<Generation, SrtClientError> {
        self.post_json(GENERATE_PATH, &build_prime_request(state)?)
    }

    pub fn generate(
        &self,
        state: &ProgramState,
        params: &SamplingParams,
    ) -> Result<Generation, SrtClientError> {
        let body = build_generate_request(state, params, &self.config.formatting)?;
        self.post_json(GENERATE_PATH, &body)
    }

    pub fn generate_stream(
        &self,
        state: &ProgramState,
        params: &SamplingParams,
    ) -> Result<GenerateStream<BufReader<Response>>, SrtClientError> {
        let body = build_generate_request(state, params, &self.config.formatting)?.streaming();
        let response = self.post(GENERATE_PATH, &body)?;
        Ok(GenerateStream::new(BufReader::new(response)))
    }

    pub fn select(
        &self,
        state: &ProgramState,
        choices: &[String],
        temperature: f32,
    ) -> Result<Selection, SrtClientError> {
        validate_selection(state, choices, temperature)?;

        let primed: Generation = self.post_json(GENERATE_PATH, &build_prime_request(state)?)?;
        let prompt_tokens = primed.meta_info.prompt_tokens.ok_or_else(|| {
            SrtClientError::InvalidResponse(
                "prime response is missing meta_info.prompt_tokens".to_string(),
            )
        })?;

        let request = build_selection_request(state, choices, prompt_tokens)?;
        let scored: Vec<Generation> = self.post_json(GENERATE_PATH, &request)?;
        let selection = score_choices(choices, scored)?;
        tracing::debug!(
            prompt_tokens,
            choices = choices.len(),
            selected = selection.index,
            "scored selection choices"
        );
        Ok(selection)
    }

    pub fn concatenate_and_append(
        &self,
        src_rids: &[String],
        dst_rid: &str,
    ) -> Result<(), SrtClientError> {
        let body = json!({ "src_rids": src_rids, "dst_rid": dst_rid });
        self.post(CONCATENATE_AND_APPEND_PATH, &body).map(drop)
    }

    fn url(&self, path: &str) -> String {
        endpoint_url(&self.config.base_url, path)
    }

    fn get(&self, path: &str) -> Result<Response, SrtClientError> {
        let url = self.url(path);
        send_checked(self.client.get(&url), &url)
    }

    fn post<B: Serialize>(&self, path: &str, body: &B) -> Result<Response, SrtClientError> {
        let url = self.url(path);
        send_checked(self.client.post(&url).json(body), &url)
    }

    fn post_json<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, SrtClientError> {
        let url = self.url(path);
        let response = send_checked(self.client.post(&url).json(body), &url)?;
        read_json(response, &url)
    }
}

impl Backend for RuntimeEndpoint {
    fn model_name(&self) -> &str {
        RuntimeEndpoint::model_name(self)
    }

    fn chat_template(&self) -> &ChatTemplate {
        RuntimeEndpoint::chat_template(self)
    }

    fn generate(
        &self,
        state: &ProgramState,
        params: &SamplingParams,
    ) -> Result<Generation, SrtClientError> {
        RuntimeEndpoint::generate(self, state, params)
    }

    fn generate_stream(
        &self,
        state: &ProgramState,
        params: &SamplingParams,
    ) -> Result<DeltaStream, SrtClientError> {
        let stream = RuntimeEndpoint::generate_stream(self, state, params)?;
        Ok(Box::new(stream))
    }

    fn select(
        &self,
        state: &ProgramState,
        choices: &[String],
        temperature: f32,
    ) -> Result<Selection, SrtClientError> {
        RuntimeEndpoint::select(self, state, choices, temperature)
    }

    fn flush_cache(&self) -> Result<(), SrtClientError> {
        RuntimeEndpoint::flush_cache(self)
    }

    fn cache_prefix(&self, prefix: &str) -> Result<(), SrtClientError> {
        RuntimeEndpoint::cache_prefix(self, prefix)
    }

    fn supports_concatenate_and_append(&self) -> bool {
        true
    }

    fn concatenate_and_append(
        &self,
        src_rids: &[String],
        dst_rid: &str,
    ) -> Result<(), SrtClientError> {
        RuntimeEndpoint::concatenate_and_append(self, src_rids, dst_rid)
    }
}

fn build_http_client(config: &RuntimeEndpointConfig) -> Result<Client, SrtClientError> {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    if let Some(api_key) = config
        .api_key
        .as_deref()
        .map(str::trim)
        .filter(|key| !key.is_empty())
    {
        let bearer = format!("Bearer {api_key}");
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&bearer).map_err(|e| {
                SrtClientError::Config(format!("invalid API key header: {e}"))
            })?,
        );
    }

    let mut builder = Client::builder().default_headers(headers).timeout(
        config
            .request_timeout_ms
            .map(|timeout_ms| Duration::from_millis(timeout_ms.max(1))),
    );
    match &config.tls {
        TlsVerification::System => {}
        TlsVerification::CaBundle(path) => {
            let pem = std::fs::read(path).map_err(|e| {
                SrtClientError::Config(format!(
                    "failed to read CA bundle {}: {e}",
                    path.display()
                ))
            })?;
            let certificates = reqwest::Certificate::from_pem_bundle(&pem).map_err(|e| {
                SrtClientError::Config(format!(
                    "failed to parse CA bundle {}: {e}",
                    path.display()
                ))
            })?;
            for certificate in certificates {
                builder = builder.add_root_certificate(certificate);
            }
        }
        TlsVerification::Insecure => {
            tracing::warn!("TLS certificate verification is disabled");
            builder = builder.danger_accept_invalid_certs(true);
        }
    }

    builder
        .build()
        .map_err(|e| SrtClientError::Config(format!("failed to build http client: {e}")))
}

fn endpoint_url(base_url: &str, path: &str) -> String {
    format!("{}{path}", base_url.trim().trim_end_matches('/'))
}

fn send_checked(request: RequestBuilder, url: &str) -> Result<Response, SrtClientError> {
    tracing::debug!(url, "sending srt request");
    let response = request.send().map_err(|source| SrtClientError::Connection {
        url: url.to_string(),
        source,
    })?;

    let status = response.status();
    if status == StatusCode::OK {
        return Ok(response);
    }

    let body = response.text().map_err(|source| SrtClientError::Connection {
        url: url.to_string(),
        source,
    })?;
    tracing::debug!(url, status = status.as_u16(), "srt request rejected");
    Err(SrtClientError::HttpStatus {
        status: status.as_u16(),
        body,
    })
}

fn read_json<T: DeserializeOwned>(response: Response, url: &str) -> Result<T, SrtClientError> {
    let raw = response.text().map_err(|source| SrtClientError::Connection {
        url: url.to_string(),
        source,
    })?;
    Ok(serde_json::from_str(&raw)?)
}
