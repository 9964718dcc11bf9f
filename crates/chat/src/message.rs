//! Chat message variants and their stored form.
//!
//! A stored message is a JSON object `{type, ...payload}`; the `type` tag is a
//! sibling of the payload fields and picks the variant on load.

use lingua_llm::{ProviderMessage, Role};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use snafu::{OptionExt, ResultExt};

use crate::error::{
    ChatResult, InvariantViolationSnafu, MalformedMessageSnafu, MissingMessageTypeSnafu,
    UnknownMessageTypeSnafu,
};

/// Payload half of a message variant. The tag is never part of the payload.
pub trait MessagePayload: Serialize + DeserializeOwned {
    const TAG: &'static str;

    fn serialize_payload(&self) -> ChatResult<String> {
        serde_json::to_string(self).context(MalformedMessageSnafu {
            stage: "serialize-message-payload",
            tag: Self::TAG,
        })
    }

    fn deserialize_payload(payload: &str) -> ChatResult<Self> {
        serde_json::from_str(payload).context(MalformedMessageSnafu {
            stage: "deserialize-message-payload",
            tag: Self::TAG,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemMessage {
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextMessage {
    pub is_user: bool,
    pub text: String,
}

impl TextMessage {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            is_user: true,
            text: text.into(),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            is_user: false,
            text: text.into(),
        }
    }
}

/// Assistant reply that is still being produced by a provider stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamingTextMessage {
    pub is_user: bool,
    pub text: String,
    #[serde(default)]
    pub streaming_finished: bool,
}

impl StreamingTextMessage {
    pub fn assistant() -> Self {
        Self {
            is_user: false,
            text: String::new(),
            streaming_finished: false,
        }
    }

    pub fn push_delta(&mut self, delta: &str) {
        if !self.streaming_finished {
            self.text.push_str(delta);
        }
    }

    pub fn finish(&mut self) {
        self.streaming_finished = true;
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeakAiMessage {
    pub is_user: bool,
    pub text: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FreeTrialMessage {}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HintMessage {
    pub hint: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueClickOnTranslationMessage {}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NonInteractiveTutorialMessage {
    pub tutorial_state_id: String,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentifiedTextMessage {
    pub message_id: String,
    pub is_user: bool,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NextStepTutorialMessage {
    pub current_state_id: String,
    pub next_state_id: String,
    pub explanation: String,
}

macro_rules! message_payload {
    ($($payload:ty => $tag:literal),+ $(,)?) => {
        $(
            impl MessagePayload for $payload {
                const TAG: &'static str = $tag;
            }
        )+
    };
}

message_payload! {
    SystemMessage => "systemMessage",
    TextMessage => "text",
    StreamingTextMessage => "streamingText",
    SpeakAiMessage => "speakAI",
    FreeTrialMessage => "freeTrial",
    HintMessage => "hint",
    QueClickOnTranslationMessage => "queClickOnTranslation",
    NonInteractiveTutorialMessage => "nonInteractiveTutorial",
    IdentifiedTextMessage => "identifiedText",
    NextStepTutorialMessage => "nextStepTutorial",
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    System,
    Text,
    StreamingText,
    SpeakAi,
    FreeTrial,
    Hint,
    QueClickOnTranslation,
    NonInteractiveTutorial,
    IdentifiedText,
    NextStepTutorial,
}

impl MessageKind {
    pub const ALL: [MessageKind; 10] = [
        MessageKind::System,
        MessageKind::Text,
        MessageKind::StreamingText,
        MessageKind::SpeakAi,
        MessageKind::FreeTrial,
        MessageKind::Hint,
        MessageKind::QueClickOnTranslation,
        MessageKind::NonInteractiveTutorial,
        MessageKind::IdentifiedText,
        MessageKind::NextStepTutorial,
    ];

    pub fn tag(self) -> &'static str {
        match self {
            MessageKind::System => SystemMessage::TAG,
            MessageKind::Text => TextMessage::TAG,
            MessageKind::StreamingText => StreamingTextMessage::TAG,
            MessageKind::SpeakAi => SpeakAiMessage::TAG,
            MessageKind::FreeTrial => FreeTrialMessage::TAG,
            MessageKind::Hint => HintMessage::TAG,
            MessageKind::QueClickOnTranslation => QueClickOnTranslationMessage::TAG,
            MessageKind::NonInteractiveTutorial => NonInteractiveTutorialMessage::TAG,
            MessageKind::IdentifiedText => IdentifiedTextMessage::TAG,
            MessageKind::NextStepTutorial => NextStepTutorialMessage::TAG,
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.tag() == tag)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    System(SystemMessage),
    Text(TextMessage),
    StreamingText(StreamingTextMessage),
    SpeakAi(SpeakAiMessage),
    FreeTrial(FreeTrialMessage),
    Hint(HintMessage),
    QueClickOnTranslation(QueClickOnTranslationMessage),
    NonInteractiveTutorial(NonInteractiveTutorialMessage),
    IdentifiedText(IdentifiedTextMessage),
    NextStepTutorial(NextStepTutorialMessage),
}

impl Message {
    pub fn kind(&self) -> MessageKind {
        match self {
            Message::System(_) => MessageKind::System,
            Message::Text(_) => MessageKind::Text,
            Message::StreamingText(_) => MessageKind::StreamingText,
            Message::SpeakAi(_) => MessageKind::SpeakAi,
            Message::FreeTrial(_) => MessageKind::FreeTrial,
            Message::Hint(_) => MessageKind::Hint,
            Message::QueClickOnTranslation(_) => MessageKind::QueClickOnTranslation,
            Message::NonInteractiveTutorial(_) => MessageKind::NonInteractiveTutorial,
            Message::IdentifiedText(_) => MessageKind::IdentifiedText,
            Message::NextStepTutorial(_) => MessageKind::NextStepTutorial,
        }
    }

    pub fn tag(&self) -> &'static str {
        self.kind().tag()
    }

    /// Encodes the stored form `{type, ...payload}`.
    pub fn serialize(&self) -> ChatResult<String> {
        let payload = match self {
            Message::System(message) => message.serialize_payload()?,
            Message::Text(message) => message.serialize_payload()?,
            Message::StreamingText(message) => message.serialize_payload()?,
            Message::SpeakAi(message) => message.serialize_payload()?,
            Message::FreeTrial(message) => message.serialize_payload()?,
            Message::Hint(message) => message.serialize_payload()?,
            Message::QueClickOnTranslation(message) => message.serialize_payload()?,
            Message::NonInteractiveTutorial(message) => message.serialize_payload()?,
            Message::IdentifiedText(message) => message.serialize_payload()?,
            Message::NextStepTutorial(message) => message.serialize_payload()?,
        };

        let tag = self.tag();
        let mut fields = parse_object(&payload, tag, "serialize-message-object")?;
        fields.insert("type".to_string(), Value::String(tag.to_string()));
        serde_json::to_string(&fields).context(MalformedMessageSnafu {
            stage: "serialize-message-encode",
            tag,
        })
    }

    /// Decodes a stored message, dispatching on its `type` field.
    pub fn deserialize(raw: &str) -> ChatResult<Self> {
        let mut fields = parse_object(raw, "<untagged>", "deserialize-message-object")?;
        let tag = match fields.remove("type") {
            Some(Value::String(tag)) => tag,
            _ => {
                return MissingMessageTypeSnafu {
                    stage: "deserialize-message-tag",
                }
                .fail();
            }
        };
        let kind = MessageKind::from_tag(&tag).context(UnknownMessageTypeSnafu {
            stage: "deserialize-message-dispatch",
            tag: tag.clone(),
        })?;

        let payload = serde_json::to_string(&fields).context(MalformedMessageSnafu {
            stage: "deserialize-message-strip-tag",
            tag,
        })?;
        Ok(match kind {
            MessageKind::System => Message::System(SystemMessage::deserialize_payload(&payload)?),
            MessageKind::Text => Message::Text(TextMessage::deserialize_payload(&payload)?),
            MessageKind::StreamingText => {
                Message::StreamingText(StreamingTextMessage::deserialize_payload(&payload)?)
            }
            MessageKind::SpeakAi => {
                Message::SpeakAi(SpeakAiMessage::deserialize_payload(&payload)?)
            }
            MessageKind::FreeTrial => {
                Message::FreeTrial(FreeTrialMessage::deserialize_payload(&payload)?)
            }
            MessageKind::Hint => Message::Hint(HintMessage::deserialize_payload(&payload)?),
            MessageKind::QueClickOnTranslation => Message::QueClickOnTranslation(
                QueClickOnTranslationMessage::deserialize_payload(&payload)?,
            ),
            MessageKind::NonInteractiveTutorial => Message::NonInteractiveTutorial(
                NonInteractiveTutorialMessage::deserialize_payload(&payload)?,
            ),
            MessageKind::IdentifiedText => {
                Message::IdentifiedText(IdentifiedTextMessage::deserialize_payload(&payload)?)
            }
            MessageKind::NextStepTutorial => {
                Message::NextStepTutorial(NextStepTutorialMessage::deserialize_payload(&payload)?)
            }
        })
    }

    /// History entry sent to an LLM provider, if this message is conversational.
    ///
    /// Tutorial, hint and free-trial messages only drive the UI.
    pub fn as_provider_message(&self) -> Option<ProviderMessage> {
        let speaker = |is_user: bool| if is_user { Role::User } else { Role::Assistant };
        match self {
            Message::System(message) => Some(ProviderMessage::new(Role::System, &message.text)),
            Message::Text(message) => {
                Some(ProviderMessage::new(speaker(message.is_user), &message.text))
            }
            Message::StreamingText(message) if !message.text.is_empty() => {
                Some(ProviderMessage::new(speaker(message.is_user), &message.text))
            }
            Message::SpeakAi(message) => {
                Some(ProviderMessage::new(speaker(message.is_user), &message.text))
            }
            Message::IdentifiedText(message) => {
                Some(ProviderMessage::new(speaker(message.is_user), &message.text))
            }
            Message::StreamingText(_)
            | Message::FreeTrial(_)
            | Message::Hint(_)
            | Message::QueClickOnTranslation(_)
            | Message::NonInteractiveTutorial(_)
            | Message::NextStepTutorial(_) => None,
        }
    }
}

fn parse_object(raw: &str, tag: &str, stage: &'static str) -> ChatResult<Map<String, Value>> {
    let value: Value = serde_json::from_str(raw).context(MalformedMessageSnafu { stage, tag })?;
    match value {
        Value::Object(fields) => Ok(fields),
        other => InvariantViolationSnafu {
            stage,
            details: format!("message '{tag}' is not a JSON object: {other}"),
        }
        .fail(),
    }
}
