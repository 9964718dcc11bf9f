use lingua_llm::ServiceError;
use lingua_storage::StorageError;
use snafu::Snafu;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ChatError {
    #[snafu(display("unknown message type '{tag}'"))]
    UnknownMessageType { stage: &'static str, tag: String },
    #[snafu(display("stored message has no `type` field"))]
    MissingMessageType { stage: &'static str },
    #[snafu(display("message payload for '{tag}' is malformed on `{stage}`: {source}"))]
    MalformedMessage {
        stage: &'static str,
        tag: String,
        source: serde_json::Error,
    },
    #[snafu(display("unknown input handler type '{tag}'"))]
    UnknownInputHandlerType { stage: &'static str, tag: String },
    #[snafu(display("input handler payload for '{tag}' is malformed on `{stage}`: {source}"))]
    MalformedInputHandler {
        stage: &'static str,
        tag: String,
        source: serde_json::Error,
    },
    #[snafu(display("{entity} index {index} is out of range for length {len}"))]
    IndexOutOfRange {
        stage: &'static str,
        entity: &'static str,
        index: usize,
        len: usize,
    },
    #[snafu(display("{entity} '{id}' was not found"))]
    NotFound {
        stage: &'static str,
        entity: &'static str,
        id: String,
    },
    #[snafu(display("chat '{chat_id}' is not answered by an LLM service"))]
    NoLlmIntelligence { stage: &'static str, chat_id: String },
    #[snafu(display("chat storage failed on `{stage}`: {source}"))]
    Storage {
        stage: &'static str,
        source: StorageError,
    },
    #[snafu(display("LLM service lookup failed on `{stage}`: {source}"))]
    Service {
        stage: &'static str,
        source: ServiceError,
    },
    #[snafu(display("chat invariant violation: {details}"))]
    InvariantViolation {
        stage: &'static str,
        details: String,
    },
}

pub type ChatResult<T> = Result<T, ChatError>;
