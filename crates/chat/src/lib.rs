pub mod config;
mod context;
mod error;
mod input_handler;
pub mod logging;
mod message;
mod registry;
mod settings;

pub use context::ChatContext;
pub use error::{ChatError, ChatResult};
pub use input_handler::{
    GrammarCheckHandler, InputHandler, InputHandlerEntry, PronunciationHintHandler,
    TranslationHandler,
};
pub use message::{
    FreeTrialMessage, HintMessage, IdentifiedTextMessage, Message, MessageKind, MessagePayload,
    NextStepTutorialMessage, NonInteractiveTutorialMessage, QueClickOnTranslationMessage,
    SpeakAiMessage, StreamingTextMessage, SystemMessage, TextMessage,
};
pub use registry::{ChatSelection, ChatSelectionState, NewChat};
pub use settings::{ChatIntelligenceSettings, ChatSettings, InputComponent, LoadedChatSettings};
