use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use httpmock::prelude::*;
use serde_json::json;
use srt_client::{
    resolve_chat_template, Backend, ChatTemplate, DeltaStream, Generation, MetaInfo,
    ProgramState, RuntimeEndpoint, RuntimeEndpointConfig, SamplingParams, Selection,
    SrtClientError, SrtErrorKind,
};
use srt_testkit::wait_until_ready;

const MODEL_PATH: &str = "mistralai/Mistral-7B-Instruct-v0.2";

/// Completes the prompt, then asks the backend to judge its own answer.
fn answer_then_judge(
    backend: &dyn Backend,
    question: &str,
) -> Result<(ProgramState, Selection), SrtClientError> {
    let mut state = ProgramState::new(question);
    let answer = backend.generate(&state, &SamplingParams::greedy(8))?;
    state.append_text(&answer.text);
    state.append_text("\nCorrect? Answer:");
    let choices = vec![" yes".to_string(), " no".to_string()];
    let verdict = backend.select(&state, &choices, 0.0)?;
    state.append_text(&verdict.decision);
    Ok((state, verdict))
}

fn collect_stream(stream: DeltaStream) -> Result<String, SrtClientError> {
    let mut text = String::new();
    for delta in stream {
        text.push_str(&delta?.text);
    }
    Ok(text)
}

struct ScriptedBackend {
    template: ChatTemplate,
    answers: Mutex<VecDeque<String>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedBackend {
    fn new(answers: &[&str]) -> Self {
        Self {
            template: resolve_chat_template("scripted-model"),
            answers: Mutex::new(answers.iter().map(|answer| answer.to_string()).collect()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    fn next_answer(&self, prompt: &str) -> Result<String, SrtClientError> {
        self.prompts
            .lock()
            .expect("prompts lock")
            .push(prompt.to_string());
        self.answers
            .lock()
            .expect("answers lock")
            .pop_front()
            .ok_or_else(|| SrtClientError::InvalidResponse("scripted answers exhausted".into()))
    }
}

impl Backend for ScriptedBackend {
    fn model_name(&self) -> &str {
        "scripted-model"
    }

    fn chat_template(&self) -> &ChatTemplate {
        &self.template
    }

    fn generate(
        &self,
        state: &ProgramState,
        _params: &SamplingParams,
    ) -> Result<Generation, SrtClientError> {
        Ok(Generation {
            text: self.next_answer(&state.text)?,
            meta_info: MetaInfo::default(),
        })
    }

    fn generate_stream(
        &self,
        state: &ProgramState,
        params: &SamplingParams,
    ) -> Result<DeltaStream, SrtClientError> {
        let _ = (state, params);
        Err(SrtClientError::Usage("scripted backend does not stream".into()))
    }

    fn select(
        &self,
        state: &ProgramState,
        choices: &[String],
        _temperature: f32,
    ) -> Result<Selection, SrtClientError> {
        let decision = self.next_answer(&state.text)?;
        let index = choices
            .iter()
            .position(|choice| *choice == decision)
            .ok_or_else(|| SrtClientError::InvalidResponse(format!("unknown choice {decision}")))?;
        Ok(Selection {
            decision,
            index,
            normalized_prompt_logprobs: vec![0.0; choices.len()],
            input_token_logprobs: vec![Vec::new(); choices.len()],
            output_token_logprobs: vec![Vec::new(); choices.len()],
        })
    }

    fn flush_cache(&self) -> Result<(), SrtClientError> {
        Ok(())
    }
}

#[test]
fn program_flow_runs_against_runtime_endpoint_as_dyn_backend() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/get_model_info");
        then.status(200).json_body(json!({"model_path": MODEL_PATH}));
    });
    let answer = server.mock(|when, then| {
        when.method(POST).path("/generate").json_body_includes(
            json!({
                "text": "The capital of France is",
                "sampling_params": {"max_new_tokens": 8, "temperature": 0.0}
            })
            .to_string(),
        );
        then.status(200)
            .json_body(json!({"text": " Paris.", "meta_info": {"completion_tokens": 2}}));
    });
    let prime = server.mock(|when, then| {
        when.method(POST).path("/generate").json_body_includes(
            json!({
                "text": "The capital of France is Paris.\nCorrect? Answer:",
                "sampling_params": {"max_new_tokens": 0}
            })
            .to_string(),
        );
        then.status(200)
            .json_body(json!({"text": "", "meta_info": {"prompt_tokens": 12}}));
    });
    let score = server.mock(|when, then| {
        when.method(POST).path("/generate").json_body_includes(
            json!({
                "text": [
                    "The capital of France is Paris.\nCorrect? Answer: yes",
                    "The capital of France is Paris.\nCorrect? Answer: no"
                ],
                "return_logprob": true,
                "logprob_start_len": 10
            })
            .to_string(),
        );
        then.status(200).json_body(json!([
            {"text": "", "meta_info": {"normalized_prompt_logprob": -0.2}},
            {"text": "", "meta_info": {"normalized_prompt_logprob": -3.1}}
        ]));
    });
    let flush = server.mock(|when, then| {
        when.method(GET).path("/flush_cache");
        then.status(200).body("Cache flushed.");
    });

    let endpoint = RuntimeEndpoint::connect(RuntimeEndpointConfig {
        request_timeout_ms: Some(5_000),
        ..RuntimeEndpointConfig::new(server.base_url())
    })
    .expect("endpoint should connect");
    let backend: Box<dyn Backend> = Box::new(endpoint);
    assert_eq!(backend.model_name(), MODEL_PATH);
    assert_eq!(backend.chat_template().name, "mistral");
    assert!(backend.supports_concatenate_and_append());

    let (state, verdict) =
        answer_then_judge(backend.as_ref(), "The capital of France is").expect("program");
    assert_eq!(verdict.index, 0);
    assert_eq!(
        state.text,
        "The capital of France is Paris.\nCorrect? Answer: yes"
    );
    backend.flush_cache().expect("flush");

    answer.assert_calls(1);
    prime.assert_calls(1);
    score.assert_calls(1);
    flush.assert_calls(1);
}

#[test]
fn streamed_generation_reassembles_full_text_through_dyn_backend() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/get_model_info");
        then.status(200).json_body(json!({"model_path": MODEL_PATH}));
    });
    server.mock(|when, then| {
        when.method(POST)
            .path("/generate")
            .json_body_includes(json!({"text": "Count to three:", "stream": true}).to_string());
        then.status(200).body(concat!(
            "data: {\"text\":\" 1\",\"meta_info\":{}}\n\n",
            ": keep-alive\n\n",
            "data: {\"text\":\" 1, 2\",\"meta_info\":{}}\n\n",
            "data: {\"text\":\" 1, 2, 3\",\"meta_info\":{\"finish_reason\":\"stop\"}}\n\n",
            "data: [DONE]\n\n"
        ));
    });

    let backend: Box<dyn Backend> = Box::new(
        RuntimeEndpoint::connect(RuntimeEndpointConfig::new(server.base_url())).expect("connect"),
    );
    let stream = backend
        .generate_stream(
            &ProgramState::new("Count to three:"),
            &SamplingParams::greedy(16),
        )
        .expect("stream should open");
    assert_eq!(collect_stream(stream).expect("stream"), " 1, 2, 3");
}

#[test]
fn program_flow_runs_against_scripted_backend_with_default_capabilities() {
    let backend = ScriptedBackend::new(&[" Paris.", " yes"]);

    let (state, verdict) =
        answer_then_judge(&backend, "The capital of France is").expect("program");
    assert_eq!(verdict.decision, " yes");
    assert_eq!(
        state.text,
        "The capital of France is Paris.\nCorrect? Answer: yes"
    );
    assert_eq!(
        backend.prompts.lock().expect("prompts lock").as_slice(),
        [
            "The capital of France is",
            "The capital of France is Paris.\nCorrect? Answer:"
        ]
    );

    assert!(!backend.supports_concatenate_and_append());
    backend.cache_prefix("The capital").expect("default cache_prefix is a no-op");
    let error = backend
        .concatenate_and_append(&["rid-1".to_string()], "rid-2")
        .expect_err("unsupported merge");
    assert_eq!(error.kind(), SrtErrorKind::Usage);
}

#[test]
fn client_connects_once_harness_reports_server_ready() {
    let server = MockServer::start();
    let models = server.mock(|when, then| {
        when.method(GET)
            .path("/v1/models")
            .header("authorization", "Bearer sk-test");
        then.status(200).json_body(json!({"object": "list", "data": []}));
    });
    let info = server.mock(|when, then| {
        when.method(GET)
            .path("/get_model_info")
            .header("authorization", "Bearer sk-test");
        then.status(200).json_body(json!({"model_path": MODEL_PATH}));
    });

    wait_until_ready(
        &server.base_url(),
        Some("sk-test"),
        Duration::from_secs(5),
        Duration::from_millis(20),
    )
    .expect("ready");
    let endpoint = RuntimeEndpoint::connect(RuntimeEndpointConfig {
        api_key: Some("sk-test".to_string()),
        ..RuntimeEndpointConfig::new(server.base_url())
    })
    .expect("connect");

    models.assert_calls(1);
    info.assert_calls(1);
    assert_eq!(endpoint.model_name(), MODEL_PATH);
}
