//! Request/response shapes of the HTTP collaborators the core calls into.
//! Transport and retries belong to the caller.

use serde::{Deserialize, Serialize};

use super::provider::Role;

pub const DEFAULT_TTS_VOICE: &str = "zh-CN-XiaoxiaoNeural";
pub const DEFAULT_TTS_OUTPUT_FORMAT: &str = "audio-24khz-48kbitrate-mono-mp3";

/// Multipart field carrying the uploaded image.
pub const IMAGE_RECOGNITION_FORM_FIELD: &str = "image";

/// Single-turn chat proxy request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatProxyRequest {
    pub message: String,
    #[serde(default = "default_proxy_role")]
    pub role: Role,
}

/// Always served with status 200. Upstream failures come back as a canned
/// reply flagged with `isMock`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatProxyResponse {
    pub reply: String,
    #[serde(default)]
    pub is_mock: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Text-to-speech request; the response body is raw audio bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TtsRequest {
    pub text: String,
    #[serde(default = "default_tts_voice")]
    pub voice: String,
    #[serde(default = "default_tts_output_format")]
    pub output_format: String,
}

impl TtsRequest {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            voice: default_tts_voice(),
            output_format: default_tts_output_format(),
        }
    }
}

/// Image sent as the `image` part of a multipart form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRecognitionUpload {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

impl ImageRecognitionUpload {
    pub fn new(
        file_name: impl Into<String>,
        content_type: impl Into<String>,
        bytes: Vec<u8>,
    ) -> Self {
        Self {
            file_name: file_name.into(),
            content_type: content_type.into(),
            bytes,
        }
    }

    pub fn field_name(&self) -> &'static str {
        IMAGE_RECOGNITION_FORM_FIELD
    }
}

/// Served with status 200 unless the `image` part is missing (400 with
/// [`EndpointErrorBody`]).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageRecognitionResponse {
    pub description: String,
    #[serde(default)]
    pub is_mock: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Body of the bodiless realtime token POST. Failures carry status 500
/// and `success: false`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeTokenResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ws_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Credentials for opening the realtime WebSocket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RealtimeSession {
    pub token: String,
    pub ws_url: String,
}

impl RealtimeTokenResponse {
    pub fn into_session(self) -> Result<RealtimeSession, EndpointErrorBody> {
        if !self.success {
            return Err(EndpointErrorBody {
                error: self
                    .error
                    .unwrap_or_else(|| "realtime token request failed".to_string()),
            });
        }

        match (self.token, self.ws_url) {
            (Some(token), Some(ws_url)) => Ok(RealtimeSession { token, ws_url }),
            _ => Err(EndpointErrorBody {
                error: "realtime token response lacks `token` or `wsUrl`".to_string(),
            }),
        }
    }
}

/// Error body returned by every collaborator on non-2xx status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointErrorBody {
    pub error: String,
}

fn default_proxy_role() -> Role {
    Role::User
}

fn default_tts_voice() -> String {
    DEFAULT_TTS_VOICE.to_string()
}

fn default_tts_output_format() -> String {
    DEFAULT_TTS_OUTPUT_FORMAT.to_string()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn tts_request_fills_voice_and_format_defaults() {
        let request: TtsRequest = serde_json::from_value(json!({"text": "你好"})).unwrap();
        assert_eq!(request, TtsRequest::new("你好"));

        let encoded = serde_json::to_value(&request).unwrap();
        assert_eq!(encoded["outputFormat"], DEFAULT_TTS_OUTPUT_FORMAT);
    }

    #[test]
    fn chat_proxy_role_defaults_to_user() {
        let request: ChatProxyRequest = serde_json::from_value(json!({"message": "hi"})).unwrap();
        assert_eq!(request.role, Role::User);

        let response: ChatProxyResponse = serde_json::from_value(json!({
            "reply": "hello",
            "isMock": true,
            "originalError": "upstream 502"
        }))
        .unwrap();
        assert!(response.is_mock);
        assert_eq!(response.original_error.as_deref(), Some("upstream 502"));
    }

    #[test]
    fn realtime_success_body_yields_session() {
        let response: RealtimeTokenResponse = serde_json::from_value(json!({
            "success": true,
            "token": "header.payload.signature",
            "wsUrl": "wss://open.bigmodel.cn/api/rtav/GLM-Realtime",
            "message": "ready"
        }))
        .unwrap();
        assert_eq!(response.message.as_deref(), Some("ready"));

        let session = response.into_session().unwrap();
        assert_eq!(session.token, "header.payload.signature");
        assert_eq!(session.ws_url, "wss://open.bigmodel.cn/api/rtav/GLM-Realtime");
    }

    #[test]
    fn realtime_failure_body_carries_error() {
        let response: RealtimeTokenResponse =
            serde_json::from_value(json!({"success": false, "error": "bad key"})).unwrap();
        assert_eq!(
            response.into_session(),
            Err(EndpointErrorBody {
                error: "bad key".to_string()
            })
        );

        let incomplete: RealtimeTokenResponse =
            serde_json::from_value(json!({"success": true, "token": "t"})).unwrap();
        assert!(incomplete.into_session().is_err());
    }

    #[test]
    fn image_recognition_fallback_is_flagged_as_mock() {
        let live: ImageRecognitionResponse =
            serde_json::from_value(json!({"description": "a cat on a windowsill"})).unwrap();
        assert!(!live.is_mock);
        assert_eq!(
            serde_json::to_value(&live).unwrap(),
            json!({"description": "a cat on a windowsill", "isMock": false})
        );

        let fallback: ImageRecognitionResponse = serde_json::from_value(json!({
            "description": "a city street",
            "isMock": true,
            "originalError": "quota exceeded"
        }))
        .unwrap();
        assert!(fallback.is_mock);
        assert_eq!(fallback.original_error.as_deref(), Some("quota exceeded"));

        let upload = ImageRecognitionUpload::new("photo.jpg", "image/jpeg", vec![0xff, 0xd8]);
        assert_eq!(upload.field_name(), "image");
    }
}
