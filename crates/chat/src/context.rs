use std::sync::{Arc, Mutex, MutexGuard};

use lingua_llm::{LlmProvider, LlmServiceRegistry, ProviderMessage, create_provider};
use lingua_storage::{ChatId, KeyValueStore, MemoryStore, SqliteStore, read_json, write_json};
use serde::Serialize;
use serde::de::DeserializeOwned;
use snafu::{OptionExt, ResultExt};

use crate::config::{StorageBackend, StorageConfig};
use crate::error::{
    ChatResult, InvariantViolationSnafu, NoLlmIntelligenceSnafu, NotFoundSnafu, ServiceSnafu,
    StorageSnafu,
};
use crate::settings::ChatIntelligenceSettings;

/// Explicit application context: the injected store, the LLM service
/// registry over the same store, and the writer lock that serializes every
/// read-modify-write sequence on chat keys.
pub struct ChatContext {
    store: Arc<dyn KeyValueStore>,
    services: LlmServiceRegistry,
    write_lock: Mutex<()>,
}

impl ChatContext {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            services: LlmServiceRegistry::new(Arc::clone(&store)),
            store,
            write_lock: Mutex::new(()),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()))
    }

    pub async fn open(config: &StorageConfig) -> ChatResult<Self> {
        let store: Arc<dyn KeyValueStore> = match config.backend {
            StorageBackend::Memory => Arc::new(MemoryStore::new()),
            StorageBackend::Sqlite => {
                let location = config.database_path.to_string_lossy();
                let store = SqliteStore::open(&location)
                    .await
                    .context(StorageSnafu {
                        stage: "open-sqlite-store",
                    })?;
                tracing::info!(database = %location, "opened sqlite chat store");
                Arc::new(store)
            }
        };
        Ok(Self::new(store))
    }

    pub fn store(&self) -> &dyn KeyValueStore {
        self.store.as_ref()
    }

    pub fn services(&self) -> &LlmServiceRegistry {
        &self.services
    }

    /// Provider history for a chat, oldest first.
    pub fn completion_history(&self, chat_id: &ChatId) -> ChatResult<Vec<ProviderMessage>> {
        Ok(self
            .load_chat_messages(chat_id)?
            .iter()
            .filter_map(|message| message.as_provider_message())
            .collect())
    }

    /// Builds the provider selected by the chat's active intelligence settings.
    pub fn resolve_llm_provider(&self, chat_id: &ChatId) -> ChatResult<Arc<dyn LlmProvider>> {
        let loaded = self.load_chat_settings(chat_id)?;
        let ChatIntelligenceSettings::Llm { llm_service_id } = loaded.settings.intelligence else {
            return NoLlmIntelligenceSnafu {
                stage: "resolve-llm-provider",
                chat_id: chat_id.to_string(),
            }
            .fail();
        };

        let record = self
            .services
            .get_llm_service_settings_record(&llm_service_id)
            .context(ServiceSnafu {
                stage: "resolve-llm-provider-lookup",
            })?
            .context(NotFoundSnafu {
                stage: "resolve-llm-provider-lookup",
                entity: "LLM service",
                id: llm_service_id.to_string(),
            })?;

        tracing::debug!(
            chat_id = %chat_id,
            service_id = %record.id,
            service_type = %record.service_type,
            "resolved chat LLM provider"
        );
        create_provider(&record).context(ServiceSnafu {
            stage: "resolve-llm-provider-create",
        })
    }

    pub(crate) fn lock(&self, stage: &'static str) -> ChatResult<MutexGuard<'_, ()>> {
        self.write_lock.lock().ok().context(InvariantViolationSnafu {
            stage,
            details: "chat writer lock was poisoned".to_string(),
        })
    }

    /// Mutation-path read: corruption is surfaced instead of overwritten.
    pub(crate) fn read<T>(&self, key: &str, stage: &'static str) -> ChatResult<Option<T>>
    where
        T: DeserializeOwned,
    {
        read_json(self.store(), key).context(StorageSnafu { stage })
    }

    /// Display-path read: unreadable values are logged and treated as absent.
    pub(crate) fn read_lenient<T>(&self, key: &str, stage: &'static str) -> ChatResult<Option<T>>
    where
        T: DeserializeOwned,
    {
        match read_json(self.store(), key) {
            Ok(value) => Ok(value),
            Err(error) if error.is_corruption() => {
                tracing::warn!(
                    key,
                    stage,
                    error = %error,
                    "stored value is unreadable; using default"
                );
                Ok(None)
            }
            Err(source) => Err(source).context(StorageSnafu { stage }),
        }
    }

    pub(crate) fn write<T>(&self, key: &str, value: &T, stage: &'static str) -> ChatResult<()>
    where
        T: Serialize + ?Sized,
    {
        write_json(self.store(), key, value).context(StorageSnafu { stage })
    }

    pub(crate) fn remove(&self, key: &str, stage: &'static str) -> ChatResult<()> {
        self.store.remove(key).context(StorageSnafu { stage })
    }
}

#[cfg(test)]
mod tests {
    use lingua_llm::{NewCustomLlmService, Role};
    use lingua_storage::ServiceId;
    use serde_json::json;

    use super::*;
    use crate::error::ChatError;
    use crate::message::{HintMessage, Message, SystemMessage, TextMessage};
    use crate::settings::{ChatSettings, LoadedChatSettings};

    #[test]
    fn completion_history_skips_ui_only_messages() {
        let context = ChatContext::in_memory();
        let chat = context.add_new_chat("Demo", &[], None).unwrap().chat_selection;
        context
            .add_messages_in_chat(
                &chat.id,
                &[
                    Message::System(SystemMessage {
                        text: "Be concise".to_string(),
                    }),
                    Message::Hint(HintMessage {
                        hint: "use 了".to_string(),
                    }),
                    Message::Text(TextMessage::user("Hi")),
                    Message::Text(TextMessage::assistant("Hello")),
                ],
            )
            .unwrap();

        let history = context.completion_history(&chat.id).unwrap();
        assert_eq!(
            history,
            vec![
                ProviderMessage::new(Role::System, "Be concise"),
                ProviderMessage::new(Role::User, "Hi"),
                ProviderMessage::new(Role::Assistant, "Hello"),
            ]
        );
    }

    #[test]
    fn default_intelligence_resolves_to_built_in_openai() {
        let context = ChatContext::in_memory();
        let chat = context.add_new_chat("Demo", &[], None).unwrap().chat_selection;

        let provider = context.resolve_llm_provider(&chat.id).unwrap();
        assert_eq!(provider.service_type(), "openai");
        assert_eq!(provider.model_id(), "gpt-4o-mini");
    }

    #[test]
    fn chat_can_select_a_custom_service() {
        let context = ChatContext::in_memory();
        let record = context
            .services()
            .add_custom_llm_service_settings(NewCustomLlmService {
                service_type: "openai-compatible-api".to_string(),
                settings: json!({
                    "name": "MyProxy",
                    "URL": "https://proxy.example/v1/chat/completions",
                    "apiKey": "key",
                    "chatCompletionModel": "llama-3"
                }),
            })
            .unwrap();
        let chat = context.add_new_chat("Proxy chat", &[], None).unwrap().chat_selection;

        let mut settings = ChatSettings::default();
        settings.intelligence = ChatIntelligenceSettings::Llm {
            llm_service_id: record.id.clone(),
        };
        context.set_local_chat_settings(&chat.id, &settings).unwrap();

        let provider = context.resolve_llm_provider(&chat.id).unwrap();
        assert_eq!(provider.name(), "MyProxy");
    }

    #[test]
    fn free_trial_and_unknown_services_do_not_resolve() {
        let context = ChatContext::in_memory();
        let free_trial = ChatSettings {
            intelligence: ChatIntelligenceSettings::FreeTrial,
            ..ChatSettings::default()
        };
        let chat = context
            .add_new_chat(
                "Trial",
                &[],
                Some(&LoadedChatSettings {
                    using_global_settings: false,
                    settings: free_trial,
                }),
            )
            .unwrap()
            .chat_selection;
        assert!(matches!(
            context.resolve_llm_provider(&chat.id),
            Err(ChatError::NoLlmIntelligence { .. })
        ));

        let dangling = ChatSettings {
            intelligence: ChatIntelligenceSettings::Llm {
                llm_service_id: ServiceId::parse("deleted-service").unwrap(),
            },
            ..ChatSettings::default()
        };
        context.set_local_chat_settings(&chat.id, &dangling).unwrap();
        assert!(matches!(
            context.resolve_llm_provider(&chat.id),
            Err(ChatError::NotFound { .. })
        ));
    }
}
