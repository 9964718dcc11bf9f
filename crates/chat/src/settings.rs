//! Per-chat settings that either follow the global defaults or own a local copy.

use lingua_llm::OpenAiService;
use lingua_storage::keys::{GLOBAL_DEFAULT_CHAT_SETTINGS_KEY, chat_settings_key};
use lingua_storage::{ChatId, ServiceId};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use snafu::ensure;

use crate::context::ChatContext;
use crate::error::{ChatError, ChatResult, IndexOutOfRangeSnafu};
use crate::input_handler::{InputHandler, InputHandlerEntry};

/// Which backend answers a chat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "id")]
pub enum ChatIntelligenceSettings {
    #[serde(rename = "freeTrial")]
    FreeTrial,
    #[serde(rename = "llm")]
    Llm {
        #[serde(rename = "llmServiceId")]
        llm_service_id: ServiceId,
    },
}

impl Default for ChatIntelligenceSettings {
    fn default() -> Self {
        Self::Llm {
            llm_service_id: ServiceId::built_in(OpenAiService::TYPE),
        }
    }
}

/// Restores the input UI mode: a component type plus its opaque payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputComponent {
    #[serde(rename = "type")]
    pub component_type: String,
    #[serde(default)]
    pub payload: Value,
}

impl Default for InputComponent {
    fn default() -> Self {
        Self {
            component_type: "text".to_string(),
            payload: Value::Object(Default::default()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChatSettings {
    pub input_handlers: Vec<InputHandlerEntry>,
    pub intelligence: ChatIntelligenceSettings,
    pub auto_play_audio: bool,
    pub input_component: InputComponent,
}

/// Settings as seen by a chat, with the mode they were resolved from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedChatSettings {
    pub using_global_settings: bool,
    pub settings: ChatSettings,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct RawInputHandler {
    payload: String,
    display: bool,
}

/// Persisted layout of `chatSettings_{id}` and the global settings key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredChatSettings {
    #[serde(default)]
    raw_input_handlers: Vec<RawInputHandler>,
    #[serde(rename = "ChatISettings", default)]
    chat_i_settings: ChatIntelligenceSettings,
    #[serde(default)]
    auto_play_audio: bool,
    #[serde(default)]
    input_component: InputComponent,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    using_global_settings: Option<bool>,
}

impl StoredChatSettings {
    fn encode(settings: &ChatSettings, using_global_settings: Option<bool>) -> ChatResult<Self> {
        let raw_input_handlers = settings
            .input_handlers
            .iter()
            .map(|entry| {
                Ok(RawInputHandler {
                    payload: entry.handler.serialize()?,
                    display: entry.display,
                })
            })
            .collect::<ChatResult<Vec<_>>>()?;

        Ok(Self {
            raw_input_handlers,
            chat_i_settings: settings.intelligence.clone(),
            auto_play_audio: settings.auto_play_audio,
            input_component: settings.input_component.clone(),
            using_global_settings,
        })
    }

    // Handlers that no longer decode are dropped so the rest stays usable.
    fn decode(self) -> ChatSettings {
        let input_handlers = self
            .raw_input_handlers
            .into_iter()
            .filter_map(|raw| match InputHandler::deserialize(&raw.payload) {
                Ok(handler) => Some(InputHandlerEntry {
                    handler,
                    display: raw.display,
                }),
                Err(error) => {
                    tracing::warn!(error = %error, "skipping undecodable input handler");
                    None
                }
            })
            .collect();

        ChatSettings {
            input_handlers,
            intelligence: self.chat_i_settings,
            auto_play_audio: self.auto_play_audio,
            input_component: self.input_component,
        }
    }

    fn follows_global(&self) -> bool {
        self.using_global_settings == Some(true)
    }
}

enum ActiveSettings {
    Global(ChatSettings),
    Local(ChatSettings),
}

impl ActiveSettings {
    fn settings_mut(&mut self) -> &mut ChatSettings {
        match self {
            ActiveSettings::Global(settings) | ActiveSettings::Local(settings) => settings,
        }
    }
}

impl ChatContext {
    /// Resolves a chat's settings.
    ///
    /// A chat follows the global settings when it has no stored settings or
    /// when its stored object carries `usingGlobalSettings: true`; the global
    /// key is re-read on every call in that case.
    pub fn load_chat_settings(&self, chat_id: &ChatId) -> ChatResult<LoadedChatSettings> {
        let _guard = self.lock("load-chat-settings")?;
        let stored: Option<StoredChatSettings> =
            self.read_lenient(&chat_settings_key(chat_id), "load-chat-settings")?;

        match stored {
            Some(stored) if !stored.follows_global() => Ok(LoadedChatSettings {
                using_global_settings: false,
                settings: stored.decode(),
            }),
            _ => Ok(LoadedChatSettings {
                using_global_settings: true,
                settings: self.global_settings_or_seed()?,
            }),
        }
    }

    /// Global defaults, created and persisted on first access.
    pub fn load_global_chat_settings(&self) -> ChatResult<ChatSettings> {
        let _guard = self.lock("load-global-chat-settings")?;
        self.global_settings_or_seed()
    }

    pub fn set_global_chat_settings(&self, settings: &ChatSettings) -> ChatResult<()> {
        let _guard = self.lock("set-global-chat-settings")?;
        self.write_global(settings)
    }

    /// Installs an explicit local settings object for the chat.
    pub fn set_local_chat_settings(
        &self,
        chat_id: &ChatId,
        settings: &ChatSettings,
    ) -> ChatResult<()> {
        let _guard = self.lock("set-local-chat-settings")?;
        self.write_local(chat_id, settings)
    }

    /// Copies the current global settings into the chat as its local baseline.
    pub fn switch_to_local_chat_settings(&self, chat_id: &ChatId) -> ChatResult<ChatSettings> {
        let _guard = self.lock("switch-to-local-chat-settings")?;
        self.snapshot_global_into(chat_id)
    }

    /// Makes the chat follow global settings again. The local object stays in
    /// storage but is ignored until the chat switches back.
    pub fn switch_to_global_chat_settings(&self, chat_id: &ChatId) -> ChatResult<()> {
        let _guard = self.lock("switch-to-global-chat-settings")?;
        let key = chat_settings_key(chat_id);
        let Some(mut stored) =
            self.read::<StoredChatSettings>(&key, "switch-to-global-chat-settings")?
        else {
            return Ok(());
        };
        if stored.follows_global() {
            return Ok(());
        }
        stored.using_global_settings = Some(true);
        self.write(&key, &stored, "switch-to-global-chat-settings")
    }

    /// Appends visible handlers to the sequence the chat currently uses.
    pub fn add_input_handlers_in_chat(
        &self,
        chat_id: &ChatId,
        handlers: Vec<InputHandler>,
    ) -> ChatResult<()> {
        self.update_active_settings(chat_id, "add-input-handlers", |settings| {
            settings
                .input_handlers
                .extend(handlers.into_iter().map(InputHandlerEntry::visible));
            Ok(())
        })
    }

    /// Replaces the handler at `index` and makes it visible.
    pub fn update_input_handler_in_local_storage(
        &self,
        chat_id: &ChatId,
        index: usize,
        handler: InputHandler,
    ) -> ChatResult<()> {
        self.update_active_settings(chat_id, "update-input-handler", |settings| {
            let entry = handler_at(settings, index, "update-input-handler")?;
            *entry = InputHandlerEntry::visible(handler);
            Ok(())
        })
    }

    pub fn set_input_handler_display(
        &self,
        chat_id: &ChatId,
        index: usize,
        display: bool,
    ) -> ChatResult<()> {
        self.update_active_settings(chat_id, "set-input-handler-display", |settings| {
            handler_at(settings, index, "set-input-handler-display")?.display = display;
            Ok(())
        })
    }

    /// Replaces only the input component payload; the component type is kept.
    pub fn update_input_settings_payload_in_local_storage(
        &self,
        chat_id: &ChatId,
        payload: Value,
    ) -> ChatResult<()> {
        self.update_active_settings(chat_id, "update-input-settings-payload", |settings| {
            settings.input_component.payload = payload;
            Ok(())
        })
    }

    pub(crate) fn write_local(&self, chat_id: &ChatId, settings: &ChatSettings) -> ChatResult<()> {
        let stored = StoredChatSettings::encode(settings, None)?;
        self.write(&chat_settings_key(chat_id), &stored, "write-local-chat-settings")?;
        tracing::debug!(chat_id = %chat_id, "stored local chat settings");
        Ok(())
    }

    pub(crate) fn snapshot_global_into(&self, chat_id: &ChatId) -> ChatResult<ChatSettings> {
        let global = self.global_settings_strict()?;
        self.write_local(chat_id, &global)?;
        tracing::info!(chat_id = %chat_id, "chat switched to local settings");
        Ok(global)
    }

    fn update_active_settings<F>(
        &self,
        chat_id: &ChatId,
        stage: &'static str,
        update: F,
    ) -> ChatResult<()>
    where
        F: FnOnce(&mut ChatSettings) -> ChatResult<()>,
    {
        let _guard = self.lock(stage)?;
        let mut active = self.active_settings(chat_id, stage)?;
        update(active.settings_mut())?;

        match active {
            ActiveSettings::Global(settings) => self.write_global(&settings),
            ActiveSettings::Local(settings) => self.write_local(chat_id, &settings),
        }
    }

    fn active_settings(&self, chat_id: &ChatId, stage: &'static str) -> ChatResult<ActiveSettings> {
        let stored: Option<StoredChatSettings> = self.read(&chat_settings_key(chat_id), stage)?;
        match stored {
            Some(stored) if !stored.follows_global() => Ok(ActiveSettings::Local(stored.decode())),
            _ => Ok(ActiveSettings::Global(self.global_settings_strict()?)),
        }
    }

    fn global_settings_or_seed(&self) -> ChatResult<ChatSettings> {
        let key = GLOBAL_DEFAULT_CHAT_SETTINGS_KEY;
        match self.read::<StoredChatSettings>(key, "load-global-chat-settings") {
            Ok(Some(stored)) => Ok(stored.decode()),
            Ok(None) => {
                let defaults = ChatSettings::default();
                self.write_global(&defaults)?;
                tracing::info!("created default global chat settings");
                Ok(defaults)
            }
            Err(ChatError::Storage { source, .. }) if source.is_corruption() => {
                tracing::warn!(
                    key,
                    error = %source,
                    "global chat settings are unreadable; using defaults"
                );
                Ok(ChatSettings::default())
            }
            Err(error) => Err(error),
        }
    }

    fn global_settings_strict(&self) -> ChatResult<ChatSettings> {
        let stored: Option<StoredChatSettings> =
            self.read(GLOBAL_DEFAULT_CHAT_SETTINGS_KEY, "read-global-chat-settings")?;
        Ok(stored.map(StoredChatSettings::decode).unwrap_or_default())
    }

    fn write_global(&self, settings: &ChatSettings) -> ChatResult<()> {
        let stored = StoredChatSettings::encode(settings, None)?;
        self.write(GLOBAL_DEFAULT_CHAT_SETTINGS_KEY, &stored, "write-global-chat-settings")
    }
}

fn handler_at<'a>(
    settings: &'a mut ChatSettings,
    index: usize,
    stage: &'static str,
) -> ChatResult<&'a mut InputHandlerEntry> {
    let len = settings.input_handlers.len();
    ensure!(
        index < len,
        IndexOutOfRangeSnafu {
            stage,
            entity: "input handler",
            index,
            len,
        }
    );
    Ok(&mut settings.input_handlers[index])
}
