use serde::{Deserialize, Serialize};
use snafu::ResultExt;

use super::model::{DEFAULT_OPENAI_MODEL, Model, openai_chat_models, siliconflow_chat_models};
use super::provider::{
    InvalidSettingsShapeSnafu, LlmProvider, MissingModelSnafu, OpenAiSettings, ProviderResult,
    ProviderStreamHandle, StreamRequest,
};
use super::rig_adapter::spawn_chat_stream;

pub const OPENAI_CHAT_COMPLETION_URL: &str = "https://api.openai.com/v1/chat/completions";
pub const SILICONFLOW_CHAT_COMPLETION_URL: &str = "https://api.siliconflow.cn/v1/chat/completions";

fn resolve_model(
    service_type: &'static str,
    configured: &str,
    available_models: &[Model],
    request: &StreamRequest,
) -> ProviderResult<String> {
    let requested = request
        .model_id
        .as_deref()
        .map(str::trim)
        .filter(|model| !model.is_empty());
    let configured = Some(configured.trim()).filter(|model| !model.is_empty());

    requested
        .or(configured)
        .or_else(|| available_models.first().map(|model| model.id.as_str()))
        .map(str::to_string)
        .ok_or_else(|| {
            MissingModelSnafu {
                stage: "resolve-model",
                service_type,
            }
            .build()
        })
}

pub struct OpenAiService {
    settings: OpenAiSettings,
    models: Vec<Model>,
}

impl OpenAiService {
    pub const TYPE: &'static str = "openai";

    pub fn new(settings: OpenAiSettings) -> Self {
        Self {
            settings,
            models: openai_chat_models(),
        }
    }

    pub fn default_settings() -> OpenAiSettings {
        OpenAiSettings::new(OPENAI_CHAT_COMPLETION_URL, "", DEFAULT_OPENAI_MODEL)
    }

    /// Builds the service from a stored settings object after checking its shape.
    pub fn deserialize(settings: &serde_json::Value) -> ProviderResult<Self> {
        let settings = OpenAiSettings::deserialize(settings).context(InvalidSettingsShapeSnafu {
            stage: "openai-deserialize-settings",
            service_type: Self::TYPE,
        })?;
        Ok(Self::new(settings))
    }
}

impl LlmProvider for OpenAiService {
    fn service_type(&self) -> &'static str {
        Self::TYPE
    }

    fn name(&self) -> &str {
        "OpenAI"
    }

    fn settings(&self) -> &OpenAiSettings {
        &self.settings
    }

    fn available_models(&self) -> &[Model] {
        &self.models
    }

    fn model_id(&self) -> &str {
        &self.settings.chat_completion_model
    }

    fn stream_chat(&self, request: StreamRequest) -> ProviderResult<ProviderStreamHandle> {
        let model_id = resolve_model(Self::TYPE, self.model_id(), &self.models, &request)?;
        spawn_chat_stream(Self::TYPE, &self.settings, model_id, request)
    }
}

/// SiliconFlow always talks to its own endpoint; only key and model vary.
pub struct SiliconFlowService {
    settings: OpenAiSettings,
    models: Vec<Model>,
}

impl SiliconFlowService {
    pub const TYPE: &'static str = "siliconflow";

    pub fn new(api_key: impl Into<String>, chat_completion_model: impl Into<String>) -> Self {
        Self {
            settings: OpenAiSettings::new(
                SILICONFLOW_CHAT_COMPLETION_URL,
                api_key,
                chat_completion_model,
            ),
            models: siliconflow_chat_models(),
        }
    }

    pub fn default_settings() -> OpenAiSettings {
        OpenAiSettings::new(SILICONFLOW_CHAT_COMPLETION_URL, "", "")
    }

    pub fn deserialize(settings: &serde_json::Value) -> ProviderResult<Self> {
        let settings = OpenAiSettings::deserialize(settings).context(InvalidSettingsShapeSnafu {
            stage: "siliconflow-deserialize-settings",
            service_type: Self::TYPE,
        })?;
        Ok(Self::new(settings.api_key, settings.chat_completion_model))
    }
}

impl LlmProvider for SiliconFlowService {
    fn service_type(&self) -> &'static str {
        Self::TYPE
    }

    fn name(&self) -> &str {
        "SiliconFlow"
    }

    fn settings(&self) -> &OpenAiSettings {
        &self.settings
    }

    fn available_models(&self) -> &[Model] {
        &self.models
    }

    fn model_id(&self) -> &str {
        &self.settings.chat_completion_model
    }

    fn stream_chat(&self, request: StreamRequest) -> ProviderResult<ProviderStreamHandle> {
        let model_id = resolve_model(Self::TYPE, self.model_id(), &self.models, &request)?;
        spawn_chat_stream(Self::TYPE, &self.settings, model_id, request)
    }
}

/// Settings of a user-defined OpenAI-compatible endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenAiCompatibleApiSettings {
    pub name: String,
    #[serde(flatten)]
    pub endpoint: OpenAiSettings,
}

pub struct OpenAiCompatibleApiService {
    name: String,
    settings: OpenAiSettings,
}

impl OpenAiCompatibleApiService {
    pub const TYPE: &'static str = "openai-compatible-api";

    pub fn new(settings: OpenAiCompatibleApiSettings) -> Self {
        Self {
            name: settings.name,
            settings: settings.endpoint,
        }
    }

    pub fn deserialize(settings: &serde_json::Value) -> ProviderResult<Self> {
        let settings = OpenAiCompatibleApiSettings::deserialize(settings).context(
            InvalidSettingsShapeSnafu {
                stage: "openai-compatible-deserialize-settings",
                service_type: Self::TYPE,
            },
        )?;
        Ok(Self::new(settings))
    }
}

impl LlmProvider for OpenAiCompatibleApiService {
    fn service_type(&self) -> &'static str {
        Self::TYPE
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn settings(&self) -> &OpenAiSettings {
        &self.settings
    }

    // The model list of an arbitrary proxy is unknown.
    fn available_models(&self) -> &[Model] {
        &[]
    }

    fn model_id(&self) -> &str {
        &self.settings.chat_completion_model
    }

    fn stream_chat(&self, request: StreamRequest) -> ProviderResult<ProviderStreamHandle> {
        let model_id = resolve_model(Self::TYPE, self.model_id(), &[], &request)?;
        spawn_chat_stream(Self::TYPE, &self.settings, model_id, request)
    }
}
