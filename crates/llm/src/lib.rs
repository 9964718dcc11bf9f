pub mod endpoints;
mod model;
mod provider;
mod registry;
mod rig_adapter;
mod services;

pub use model::{
    DEFAULT_OPENAI_MODEL, Model, openai_chat_models, siliconflow_chat_models,
};
pub use provider::{
    LlmProvider, OpenAiSettings, ProviderError, ProviderEventStream, ProviderMessage,
    ProviderResult, ProviderStreamHandle, ProviderWorker, Role, StreamEvent, StreamRequest,
};
pub use registry::{
    LlmServiceRegistry, LlmServiceSettingsRecord, LocalizedText, NewCustomLlmService,
    ServiceError, ServiceResult, built_in_services, create_provider,
};
pub use services::{
    OPENAI_CHAT_COMPLETION_URL, OpenAiCompatibleApiService, OpenAiCompatibleApiSettings,
    OpenAiService, SILICONFLOW_CHAT_COMPLETION_URL, SiliconFlowService,
};
