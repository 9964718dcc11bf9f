use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use snafu::ResultExt;

use crate::error::{
    ChatResult, InvariantViolationSnafu, MalformedInputHandlerSnafu, UnknownInputHandlerTypeSnafu,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranslationHandler {
    pub target_language: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GrammarCheckHandler {
    #[serde(default)]
    pub explain_corrections: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PronunciationHintHandler {
    pub language: String,
}

/// Processing step attached to a chat's input pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputHandler {
    Translation(TranslationHandler),
    GrammarCheck(GrammarCheckHandler),
    PronunciationHint(PronunciationHintHandler),
}

impl InputHandler {
    pub const TAGS: [&'static str; 3] = ["translation", "grammarCheck", "pronunciationHint"];

    pub fn translation(target_language: impl Into<String>) -> Self {
        Self::Translation(TranslationHandler {
            target_language: target_language.into(),
        })
    }

    pub fn grammar_check(explain_corrections: bool) -> Self {
        Self::GrammarCheck(GrammarCheckHandler {
            explain_corrections,
        })
    }

    pub fn pronunciation_hint(language: impl Into<String>) -> Self {
        Self::PronunciationHint(PronunciationHintHandler {
            language: language.into(),
        })
    }

    pub fn tag(&self) -> &'static str {
        match self {
            InputHandler::Translation(_) => Self::TAGS[0],
            InputHandler::GrammarCheck(_) => Self::TAGS[1],
            InputHandler::PronunciationHint(_) => Self::TAGS[2],
        }
    }

    /// Prompt text this handler contributes for a user input.
    pub fn instruction(&self, input: &str) -> String {
        match self {
            InputHandler::Translation(handler) => format!(
                "Translate the following text into {}: {input}",
                handler.target_language
            ),
            InputHandler::GrammarCheck(handler) if handler.explain_corrections => format!(
                "Check the grammar of the following sentence and explain every correction: {input}"
            ),
            InputHandler::GrammarCheck(_) => {
                format!("Correct the grammar of the following sentence: {input}")
            }
            InputHandler::PronunciationHint(handler) => format!(
                "Give {} pronunciation hints for: {input}",
                handler.language
            ),
        }
    }

    /// Opaque payload string `{type, ...fields}` stored in `rawInputHandlers`.
    pub fn serialize(&self) -> ChatResult<String> {
        let tag = self.tag();
        let encoded = match self {
            InputHandler::Translation(handler) => serde_json::to_value(handler),
            InputHandler::GrammarCheck(handler) => serde_json::to_value(handler),
            InputHandler::PronunciationHint(handler) => serde_json::to_value(handler),
        }
        .context(MalformedInputHandlerSnafu {
            stage: "serialize-input-handler",
            tag,
        })?;

        let Value::Object(mut fields) = encoded else {
            return InvariantViolationSnafu {
                stage: "serialize-input-handler",
                details: format!("input handler '{tag}' did not encode to an object"),
            }
            .fail();
        };
        fields.insert("type".to_string(), Value::String(tag.to_string()));
        Ok(Value::Object(fields).to_string())
    }

    pub fn deserialize(payload: &str) -> ChatResult<Self> {
        let mut fields: Map<String, Value> =
            serde_json::from_str(payload).context(MalformedInputHandlerSnafu {
                stage: "deserialize-input-handler-object",
                tag: "<untagged>",
            })?;
        let tag = match fields.remove("type") {
            Some(Value::String(tag)) => tag,
            _ => String::new(),
        };
        let fields = Value::Object(fields);

        let handler = match tag.as_str() {
            "translation" => serde_json::from_value(fields).map(InputHandler::Translation),
            "grammarCheck" => serde_json::from_value(fields).map(InputHandler::GrammarCheck),
            "pronunciationHint" => {
                serde_json::from_value(fields).map(InputHandler::PronunciationHint)
            }
            _ => {
                return UnknownInputHandlerTypeSnafu {
                    stage: "deserialize-input-handler-dispatch",
                    tag: tag.clone(),
                }
                .fail();
            }
        };
        handler.context(MalformedInputHandlerSnafu {
            stage: "deserialize-input-handler-fields",
            tag,
        })
    }
}

/// Handler together with its visibility in the input UI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputHandlerEntry {
    pub handler: InputHandler,
    pub display: bool,
}

impl InputHandlerEntry {
    pub fn visible(handler: InputHandler) -> Self {
        Self {
            handler,
            display: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ChatError;

    #[test]
    fn payload_carries_type_next_to_fields() {
        let payload = InputHandler::translation("en").serialize().unwrap();
        let value: Value = serde_json::from_str(&payload).unwrap();
        assert_eq!(
            value,
            serde_json::json!({"type": "translation", "targetLanguage": "en"})
        );

        for handler in [
            InputHandler::translation("en"),
            InputHandler::grammar_check(true),
            InputHandler::pronunciation_hint("zh"),
        ] {
            let payload = handler.serialize().unwrap();
            assert_eq!(InputHandler::deserialize(&payload).unwrap(), handler);
        }
    }

    #[test]
    fn unknown_handler_type_is_reported() {
        let error = InputHandler::deserialize(r#"{"type":"summarize"}"#).unwrap_err();
        assert!(matches!(
            error,
            ChatError::UnknownInputHandlerType { ref tag, .. } if tag == "summarize"
        ));

        let error = InputHandler::deserialize(r#"{"type":"translation"}"#).unwrap_err();
        assert!(matches!(error, ChatError::MalformedInputHandler { .. }));
    }

    #[test]
    fn instruction_embeds_the_input() {
        let instruction = InputHandler::translation("French").instruction("good morning");
        assert_eq!(
            instruction,
            "Translate the following text into French: good morning"
        );
        assert!(
            InputHandler::grammar_check(true)
                .instruction("he go home")
                .contains("explain every correction")
        );
    }
}
