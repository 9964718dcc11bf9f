//! Streaming chat completions over rig's OpenAI Chat Completions client,
//! shared by every OpenAI-style service.

use futures::StreamExt;
use rig::completion::{CompletionModel, Message as RigMessage};
use rig::prelude::CompletionClient;
use rig::providers::openai;
use rig::streaming::StreamedAssistantContent;
use snafu::{ResultExt, ensure};
use tokio::sync::{mpsc, oneshot};

use super::provider::{
    CompletionsFailedSnafu, EmptyMessageSetSnafu, HttpClientSnafu, MissingApiKeySnafu,
    OpenAiSettings, ProviderError, ProviderMessage, ProviderResult, ProviderStreamHandle,
    ProviderWorker, Role, StreamEvent, StreamRequest, make_event_stream,
};

type RigStreamingResponse = rig::streaming::StreamingCompletionResponse<
    rig::providers::openai::completion::streaming::StreamingCompletionResponse,
>;

/// Validates the request and returns a stream plus the worker that feeds it.
pub(crate) fn spawn_chat_stream(
    service_type: &'static str,
    settings: &OpenAiSettings,
    model_id: String,
    request: StreamRequest,
) -> ProviderResult<ProviderStreamHandle> {
    ensure!(
        !settings.api_key.is_empty(),
        MissingApiKeySnafu {
            stage: "spawn-chat-stream",
            service_type,
        }
    );
    ensure!(
        request.messages.iter().any(is_conversational),
        EmptyMessageSetSnafu {
            stage: "spawn-chat-stream",
        }
    );

    let (event_tx, stream, cancel_rx) = make_event_stream();
    let worker: ProviderWorker = Box::pin(run_stream_worker(
        service_type,
        settings.clone(),
        model_id,
        request,
        event_tx,
        cancel_rx,
    ));

    Ok(ProviderStreamHandle { stream, worker })
}

fn is_conversational(message: &ProviderMessage) -> bool {
    !matches!(message.role, Role::System)
}

// Compatible providers only speak `/chat/completions`, never `/responses`.
fn build_client(settings: &OpenAiSettings) -> ProviderResult<openai::CompletionsClient> {
    let mut builder = openai::Client::builder().api_key(settings.api_key.as_str());
    let base_url = settings.base_url();
    if !base_url.is_empty() {
        builder = builder.base_url(base_url);
    }
    let client = builder.build().context(HttpClientSnafu {
        stage: "build-client",
    })?;
    Ok(client.completions_api())
}

fn to_rig_message(message: &ProviderMessage) -> Option<RigMessage> {
    match message.role {
        Role::System => None,
        Role::User => Some(RigMessage::user(message.content.clone())),
        Role::Assistant => Some(RigMessage::assistant(message.content.clone())),
    }
}

pub(crate) fn merged_preamble(request: &StreamRequest) -> Option<String> {
    let mut preamble_parts = Vec::new();

    if let Some(preamble) = &request.preamble
        && !preamble.trim().is_empty()
    {
        preamble_parts.push(preamble.clone());
    }

    // Rig exposes a single preamble field, so system-role messages are folded into it.
    for message in &request.messages {
        if matches!(message.role, Role::System) && !message.content.trim().is_empty() {
            preamble_parts.push(message.content.clone());
        }
    }

    if preamble_parts.is_empty() {
        None
    } else {
        Some(preamble_parts.join("\n\n"))
    }
}

async fn open_stream(
    settings: &OpenAiSettings,
    model_id: &str,
    request: &StreamRequest,
) -> ProviderResult<RigStreamingResponse> {
    let client = build_client(settings)?;
    let model = client.completion_model(model_id);

    let mut messages = request
        .messages
        .iter()
        .filter_map(to_rig_message)
        .collect::<Vec<_>>();

    let Some(prompt) = messages.pop() else {
        tracing::warn!(
            model_id = %model_id,
            total_message_count = request.messages.len(),
            "cannot open stream because no user/assistant messages remain after filtering"
        );
        return EmptyMessageSetSnafu {
            stage: "open-stream-pop-prompt",
        }
        .fail();
    };
    let mut builder = model.completion_request(prompt).messages(messages);

    if let Some(preamble) = merged_preamble(request) {
        builder = builder.preamble(preamble);
    }

    builder.stream().await.context(CompletionsFailedSnafu {
        stage: "open-stream",
    })
}

fn emit_error_event(event_tx: &mpsc::UnboundedSender<StreamEvent>, error: ProviderError) {
    let _ = event_tx.send(StreamEvent::Error(error.to_string()));
}

fn map_stream_item<R>(item: StreamedAssistantContent<R>) -> Option<StreamEvent>
where
    R: Clone + Unpin,
{
    match item {
        StreamedAssistantContent::Text(text) => Some(StreamEvent::Delta(text.text)),
        StreamedAssistantContent::Reasoning(reasoning) => {
            let text = reasoning.reasoning.join("");
            (!text.is_empty()).then_some(StreamEvent::ReasoningDelta(text))
        }
        StreamedAssistantContent::ReasoningDelta { reasoning, .. } => {
            (!reasoning.is_empty()).then_some(StreamEvent::ReasoningDelta(reasoning))
        }
        StreamedAssistantContent::ToolCall { .. }
        | StreamedAssistantContent::ToolCallDelta { .. }
        | StreamedAssistantContent::Final(_) => None,
    }
}

async fn run_stream_worker(
    service_type: &'static str,
    settings: OpenAiSettings,
    model_id: String,
    request: StreamRequest,
    event_tx: mpsc::UnboundedSender<StreamEvent>,
    mut cancel_rx: oneshot::Receiver<()>,
) {
    let mut stream = match open_stream(&settings, &model_id, &request).await {
        Ok(stream) => stream,
        Err(error) => {
            tracing::error!(
                service_type,
                model_id = %model_id,
                error = %error,
                "failed to open provider stream"
            );
            emit_error_event(&event_tx, error);
            return;
        }
    };

    let mut cancelled = false;
    let mut stream_failed = false;

    loop {
        tokio::select! {
            _ = &mut cancel_rx => {
                cancelled = true;
                tracing::debug!(service_type, "provider stream cancelled");
                stream.cancel();
                break;
            }
            next_item = stream.next() => {
                match next_item {
                    Some(Ok(item)) => {
                        if let Some(mapped) = map_stream_item(item)
                            && event_tx.send(mapped).is_err()
                        {
                            return;
                        }
                    }
                    Some(Err(source)) => {
                        stream_failed = true;
                        tracing::warn!(
                            service_type,
                            error = %source,
                            "provider stream emitted an error chunk"
                        );
                        emit_error_event(&event_tx, ProviderError::CompletionsFailed {
                            stage: "stream-chunk",
                            source,
                        });
                        break;
                    }
                    None => break,
                }
            }
        }
    }

    if !cancelled && !stream_failed {
        let _ = event_tx.send(StreamEvent::Done);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn settings_with_key(api_key: &str) -> OpenAiSettings {
        OpenAiSettings::new(
            "https://api.openai.com/v1/chat/completions",
            api_key,
            "gpt-4o-mini",
        )
    }

    /// Accepts one connection, answers 500 and returns the request line.
    async fn record_first_request_line(listener: TcpListener) -> String {
        let (mut socket, _) = listener.accept().await.expect("accept connection");
        let mut received = Vec::new();
        let mut buf = [0_u8; 4096];
        while !received.windows(4).any(|window| window == b"\r\n\r\n") {
            let read = socket.read(&mut buf).await.expect("read request");
            if read == 0 {
                break;
            }
            received.extend_from_slice(&buf[..read]);
        }
        let response = concat!(
            "HTTP/1.1 500 Internal Server Error\r\n",
            "content-length: 0\r\n",
            "connection: close\r\n\r\n",
        );
        socket
            .write_all(response.as_bytes())
            .await
            .expect("write response");
        let head = String::from_utf8_lossy(&received).into_owned();
        head.lines().next().unwrap_or_default().to_owned()
    }

    #[test]
    fn system_messages_fold_into_preamble() {
        let request = StreamRequest::new(vec![
            ProviderMessage::new(Role::System, "You are a Spanish tutor."),
            ProviderMessage::new(Role::User, "Hola"),
            ProviderMessage::new(Role::System, "Answer briefly."),
        ])
        .with_preamble("Correct mistakes.");

        assert_eq!(
            merged_preamble(&request).as_deref(),
            Some("Correct mistakes.\n\nYou are a Spanish tutor.\n\nAnswer briefly.")
        );
    }

    #[test]
    fn missing_api_key_is_rejected_before_spawning() {
        let request = StreamRequest::new(vec![ProviderMessage::new(Role::User, "Hi")]);
        let result = spawn_chat_stream(
            "openai",
            &settings_with_key(""),
            "gpt-4o-mini".into(),
            request,
        );
        assert!(matches!(result, Err(ProviderError::MissingApiKey { .. })));
    }

    #[test]
    fn system_only_history_is_rejected() {
        let request = StreamRequest::new(vec![ProviderMessage::new(Role::System, "setup")]);
        let result = spawn_chat_stream(
            "openai",
            &settings_with_key("sk-test"),
            "gpt-4o-mini".into(),
            request,
        );
        assert!(matches!(result, Err(ProviderError::EmptyMessageSet { .. })));
    }

    #[tokio::test]
    async fn stream_posts_to_chat_completions_under_configured_base() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind listener");
        let port = listener.local_addr().expect("local addr").port();
        let server = tokio::spawn(record_first_request_line(listener));

        let settings = OpenAiSettings::new(
            format!("http://127.0.0.1:{port}/v1/chat/completions"),
            "sk-test",
            "deepseek-ai/DeepSeek-V2.5",
        );
        let request = StreamRequest::new(vec![ProviderMessage::new(Role::User, "Hola")]);
        let ProviderStreamHandle { mut stream, worker } = spawn_chat_stream(
            "siliconflow",
            &settings,
            "deepseek-ai/DeepSeek-V2.5".into(),
            request,
        )
        .expect("stream handle");

        tokio::time::timeout(Duration::from_secs(10), worker)
            .await
            .expect("worker finishes after the provider error");
        let request_line = server.await.expect("server task");

        assert_eq!(request_line, "POST /v1/chat/completions HTTP/1.1");
        assert!(matches!(stream.recv().await, Some(StreamEvent::Error(_))));
    }
}
