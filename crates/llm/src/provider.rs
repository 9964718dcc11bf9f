use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};
use snafu::Snafu;
use tokio::sync::{mpsc, oneshot};

use super::model::Model;

/// Speaker role in a completion history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderMessage {
    pub role: Role,
    pub content: String,
}

impl ProviderMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// Settings shared by every OpenAI-style chat-completion service.
///
/// `URL` is the full chat-completions endpoint, as stored by the settings UI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenAiSettings {
    #[serde(rename = "URL")]
    pub url: String,
    #[serde(rename = "apiKey")]
    pub api_key: String,
    #[serde(rename = "chatCompletionModel")]
    pub chat_completion_model: String,
}

const CHAT_COMPLETIONS_SUFFIX: &str = "/chat/completions";

impl OpenAiSettings {
    pub fn new(
        url: impl Into<String>,
        api_key: impl Into<String>,
        chat_completion_model: impl Into<String>,
    ) -> Self {
        Self {
            url: url.into().trim().to_string(),
            api_key: api_key.into().trim().to_string(),
            chat_completion_model: chat_completion_model.into().trim().to_string(),
        }
    }

    /// API root derived from the endpoint URL, e.g. `https://api.openai.com/v1`.
    pub fn base_url(&self) -> &str {
        let trimmed = self.url.trim_end_matches('/');
        trimmed
            .strip_suffix(CHAT_COMPLETIONS_SUFFIX)
            .unwrap_or(trimmed)
    }

    pub fn to_value(&self) -> serde_json::Value {
        serde_json::json!({
            "URL": self.url,
            "apiKey": self.api_key,
            "chatCompletionModel": self.chat_completion_model,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StreamRequest {
    pub messages: Vec<ProviderMessage>,
    pub model_id: Option<String>,
    pub preamble: Option<String>,
}

impl StreamRequest {
    pub fn new(messages: Vec<ProviderMessage>) -> Self {
        Self {
            messages,
            model_id: None,
            preamble: None,
        }
    }

    pub fn with_model(mut self, model_id: impl Into<String>) -> Self {
        self.model_id = Some(model_id.into());
        self
    }

    pub fn with_preamble(mut self, preamble: impl Into<String>) -> Self {
        self.preamble = Some(preamble.into());
        self
    }
}

/// Provider-agnostic stream payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    Delta(String),
    ReasoningDelta(String),
    Done,
    Error(String),
}

pub type ProviderWorker = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;
pub type ProviderResult<T> = Result<T, ProviderError>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ProviderError {
    #[snafu(display("settings for service type '{service_type}' are invalid: {source}"))]
    InvalidSettingsShape {
        stage: &'static str,
        service_type: &'static str,
        source: serde_json::Error,
    },
    #[snafu(display("missing API key for service type '{service_type}'"))]
    MissingApiKey {
        stage: &'static str,
        service_type: &'static str,
    },
    #[snafu(display("no chat completion model configured for '{service_type}'"))]
    MissingModel {
        stage: &'static str,
        service_type: &'static str,
    },
    #[snafu(display("stream request has no user or assistant messages"))]
    EmptyMessageSet { stage: &'static str },
    #[snafu(display("http client failed on `{stage}`, {source}"))]
    HttpClient {
        stage: &'static str,
        source: rig::http_client::Error,
    },
    #[snafu(display("completions failed on `{stage}`, {source}"))]
    CompletionsFailed {
        stage: &'static str,
        source: rig::completion::CompletionError,
    },
}

pub struct ProviderEventStream {
    events: mpsc::UnboundedReceiver<StreamEvent>,
    cancel_tx: Option<oneshot::Sender<()>>,
}

/// Receiving half plus the worker future that must be spawned to drive it.
pub struct ProviderStreamHandle {
    pub stream: ProviderEventStream,
    pub worker: ProviderWorker,
}

impl ProviderEventStream {
    pub(crate) fn new(
        events: mpsc::UnboundedReceiver<StreamEvent>,
        cancel_tx: oneshot::Sender<()>,
    ) -> Self {
        Self {
            events,
            cancel_tx: Some(cancel_tx),
        }
    }

    pub async fn recv(&mut self) -> Option<StreamEvent> {
        self.events.recv().await
    }

    pub fn cancel(&mut self) -> bool {
        self.cancel_tx
            .take()
            .map(|tx| tx.send(()).is_ok())
            .unwrap_or(false)
    }

    /// Drains the stream until `Done`, concatenating text deltas.
    pub async fn collect_text(mut self) -> Result<String, String> {
        let mut text = String::new();
        while let Some(event) = self.recv().await {
            match event {
                StreamEvent::Delta(delta) => text.push_str(&delta),
                StreamEvent::ReasoningDelta(_) => {}
                StreamEvent::Done => break,
                StreamEvent::Error(message) => return Err(message),
            }
        }
        Ok(text)
    }
}

impl Drop for ProviderEventStream {
    fn drop(&mut self) {
        if let Some(cancel_tx) = self.cancel_tx.take() {
            let _ = cancel_tx.send(());
        }
    }
}

/// One chat-completion backend with its fixed defaults.
pub trait LlmProvider: Send + Sync {
    fn service_type(&self) -> &'static str;
    fn name(&self) -> &str;
    fn settings(&self) -> &OpenAiSettings;
    fn available_models(&self) -> &[Model];
    /// Model used when a request does not override it.
    fn model_id(&self) -> &str;
    fn stream_chat(&self, request: StreamRequest) -> ProviderResult<ProviderStreamHandle>;
}

pub(crate) fn make_event_stream() -> (
    mpsc::UnboundedSender<StreamEvent>,
    ProviderEventStream,
    oneshot::Receiver<()>,
) {
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let (cancel_tx, cancel_rx) = oneshot::channel();
    (
        event_tx,
        ProviderEventStream::new(event_rx, cancel_tx),
        cancel_rx,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_strips_chat_completions_suffix() {
        let settings = OpenAiSettings::new(
            "https://api.openai.com/v1/chat/completions",
            "sk-test",
            "gpt-4o-mini",
        );
        assert_eq!(settings.base_url(), "https://api.openai.com/v1");

        let proxy = OpenAiSettings::new("https://proxy.example/v1/", "k", "m");
        assert_eq!(proxy.base_url(), "https://proxy.example/v1");
    }

    #[test]
    fn settings_use_stored_field_names() {
        let settings = OpenAiSettings::new("https://x/v1/chat/completions", "k", "m");
        let value = settings.to_value();
        assert_eq!(value["URL"], "https://x/v1/chat/completions");
        assert_eq!(value["apiKey"], "k");
        assert_eq!(value["chatCompletionModel"], "m");

        let decoded: OpenAiSettings = serde_json::from_value(value).unwrap();
        assert_eq!(decoded, settings);
    }

    #[tokio::test]
    async fn collect_text_concatenates_until_done() {
        let (event_tx, stream, _cancel_rx) = make_event_stream();
        event_tx.send(StreamEvent::Delta("Hel".to_string())).unwrap();
        event_tx
            .send(StreamEvent::ReasoningDelta("thinking".to_string()))
            .unwrap();
        event_tx.send(StreamEvent::Delta("lo".to_string())).unwrap();
        event_tx.send(StreamEvent::Done).unwrap();

        assert_eq!(stream.collect_text().await, Ok("Hello".to_string()));
    }

    #[tokio::test]
    async fn dropping_stream_signals_cancel() {
        let (_event_tx, stream, cancel_rx) = make_event_stream();
        drop(stream);
        assert!(cancel_rx.await.is_ok());
    }
}
