//! Client for the SRT runtime generation server: request building, unary and
//! streamed generation, logprob-scored choice selection and request merging.
mod chat_template;
mod request;
mod runtime_endpoint;
mod selection;
mod stream;
mod types;

pub use chat_template::{resolve_chat_template, ChatTemplate, DEFAULT_CHAT_TEMPLATE};
pub use request::{
    build_generate_request, build_prefix_request, build_prime_request, build_selection_request,
    logprob_start_len_for, validate_selection, GenerateRequest, PromptInput, WireSamplingParams,
    LOGPROB_BOUNDARY_BACKOFF_TOKENS, SELECT_MAX_TEMPERATURE,
};
pub use runtime_endpoint::{
    ModelInfo, RuntimeEndpoint, RuntimeEndpointConfig, TlsVerification,
    CONCATENATE_AND_APPEND_PATH, FLUSH_CACHE_PATH, GENERATE_PATH, GET_MODEL_INFO_PATH,
    GET_SERVER_ARGS_PATH,
};
pub use selection::{argmax_first, score_choices};
pub use stream::{
    classify_stream_line, GenerateStream, StreamCursor, StreamDelta, StreamFrame,
    STREAM_DATA_PREFIX, STREAM_DONE_SENTINEL,
};
pub use types::{
    Backend, DeltaStream, Generation, ImageAttachment, LogprobOptions, MetaInfo, OutputDtype,
    OutputFormatting, ProgramState, SamplingParams, Selection, SrtClientError, SrtErrorKind,
    TokenLogprob, DEFAULT_MAX_NEW_TOKENS, DEFAULT_TEMPERATURE,
};
