use std::sync::{Arc, Mutex, MutexGuard};

use lingua_storage::keys::{BUILT_IN_LLM_SERVICES_KEY, CUSTOM_LLM_SERVICES_KEY};
use lingua_storage::{KeyValueStore, ServiceId, StorageError, read_json, write_json};
use serde::{Deserialize, Serialize};
use snafu::{OptionExt, ResultExt, Snafu, ensure};

use super::provider::{LlmProvider, ProviderError};
use super::services::{OpenAiCompatibleApiService, OpenAiService, SiliconFlowService};

pub type ServiceResult<T> = Result<T, ServiceError>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ServiceError {
    #[snafu(display("LLM service '{id}' was not found"))]
    NotFound { stage: &'static str, id: String },
    #[snafu(display("LLM service '{id}' is built in and cannot be deleted"))]
    NotDeletable { stage: &'static str, id: String },
    #[snafu(display("custom LLM service settings must carry a string `name`"))]
    MissingServiceName { stage: &'static str },
    #[snafu(display("LLM service type '{service_type}' is not supported"))]
    UnsupportedServiceType {
        stage: &'static str,
        service_type: String,
    },
    #[snafu(display("failed to construct provider on `{stage}`: {source}"))]
    Provider {
        stage: &'static str,
        source: ProviderError,
    },
    #[snafu(display("LLM service storage failed on `{stage}`: {source}"))]
    Storage {
        stage: &'static str,
        source: StorageError,
    },
    #[snafu(display("LLM service registry invariant violation: {details}"))]
    InvariantViolation {
        stage: &'static str,
        details: String,
    },
}

/// Display name as stored by the i18n-aware settings UI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalizedText {
    pub text: String,
}

impl LocalizedText {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmServiceSettingsRecord {
    pub id: ServiceId,
    #[serde(rename = "type")]
    pub service_type: String,
    pub name: LocalizedText,
    pub deletable: bool,
    pub settings: serde_json::Value,
}

/// User-supplied service definition; `settings.name` is required.
#[derive(Debug, Clone, PartialEq)]
pub struct NewCustomLlmService {
    pub service_type: String,
    pub settings: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct StoredCustomService {
    id: ServiceId,
    #[serde(rename = "type")]
    service_type: String,
    settings: serde_json::Value,
}

impl StoredCustomService {
    fn into_record(self) -> LlmServiceSettingsRecord {
        let name = service_name(&self.settings).unwrap_or_default().to_string();
        LlmServiceSettingsRecord {
            id: self.id,
            service_type: self.service_type,
            name: LocalizedText::new(name),
            deletable: true,
            settings: self.settings,
        }
    }
}

fn service_name(settings: &serde_json::Value) -> Option<&str> {
    settings.get("name").and_then(serde_json::Value::as_str)
}

/// Services seeded on first access. Ids equal their provider type.
pub fn built_in_services() -> Vec<LlmServiceSettingsRecord> {
    vec![LlmServiceSettingsRecord {
        id: ServiceId::built_in(OpenAiService::TYPE),
        service_type: OpenAiService::TYPE.to_string(),
        name: LocalizedText::new("OpenAI"),
        deletable: false,
        settings: OpenAiService::default_settings().to_value(),
    }]
}

/// Maps a record's `type` to a provider, checking its settings shape.
pub fn create_provider(record: &LlmServiceSettingsRecord) -> ServiceResult<Arc<dyn LlmProvider>> {
    let provider: Arc<dyn LlmProvider> = match record.service_type.as_str() {
        OpenAiService::TYPE => Arc::new(
            OpenAiService::deserialize(&record.settings).context(ProviderSnafu {
                stage: "create-provider-openai",
            })?,
        ),
        SiliconFlowService::TYPE => Arc::new(
            SiliconFlowService::deserialize(&record.settings).context(ProviderSnafu {
                stage: "create-provider-siliconflow",
            })?,
        ),
        OpenAiCompatibleApiService::TYPE => Arc::new(
            OpenAiCompatibleApiService::deserialize(&record.settings).context(ProviderSnafu {
                stage: "create-provider-openai-compatible",
            })?,
        ),
        other => {
            return UnsupportedServiceTypeSnafu {
                stage: "create-provider",
                service_type: other.to_string(),
            }
            .fail();
        }
    };

    Ok(provider)
}

/// Built-in and user-defined LLM service settings, persisted apart from chat settings.
pub struct LlmServiceRegistry {
    store: Arc<dyn KeyValueStore>,
    write_lock: Mutex<()>,
}

impl LlmServiceRegistry {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            write_lock: Mutex::new(()),
        }
    }

    /// All services, built-in first.
    pub fn get_llm_service_settings(&self) -> ServiceResult<Vec<LlmServiceSettingsRecord>> {
        let mut services = self.get_built_in_llm_services_settings()?;
        services.extend(self.get_custom_llm_service_settings()?);
        Ok(services)
    }

    pub fn get_llm_service_settings_record(
        &self,
        id: &ServiceId,
    ) -> ServiceResult<Option<LlmServiceSettingsRecord>> {
        Ok(self
            .get_llm_service_settings()?
            .into_iter()
            .find(|service| &service.id == id))
    }

    /// Read with lazy initialization: built-ins missing from storage are
    /// appended and persisted in one write; a fully seeded store is only read.
    pub fn get_built_in_llm_services_settings(
        &self,
    ) -> ServiceResult<Vec<LlmServiceSettingsRecord>> {
        let _guard = self.lock("built-in-services-seed")?;

        let services = match self.read_built_in() {
            Ok(services) => services,
            Err(ServiceError::Storage { source, .. }) if source.is_corruption() => {
                tracing::warn!(
                    key = BUILT_IN_LLM_SERVICES_KEY,
                    error = %source,
                    "built-in LLM services are unreadable; serving defaults without seeding"
                );
                return Ok(built_in_services());
            }
            Err(error) => return Err(error),
        };

        self.seed_missing_built_in(services)
    }

    pub fn get_custom_llm_service_settings(&self) -> ServiceResult<Vec<LlmServiceSettingsRecord>> {
        let services = match self.read_custom() {
            Ok(services) => services,
            Err(ServiceError::Storage { source, .. }) if source.is_corruption() => {
                tracing::warn!(
                    key = CUSTOM_LLM_SERVICES_KEY,
                    error = %source,
                    "custom LLM services are unreadable; serving an empty list"
                );
                Vec::new()
            }
            Err(error) => return Err(error),
        };

        Ok(services
            .into_iter()
            .map(StoredCustomService::into_record)
            .collect())
    }

    pub fn add_custom_llm_service_settings(
        &self,
        service: NewCustomLlmService,
    ) -> ServiceResult<LlmServiceSettingsRecord> {
        ensure!(
            service_name(&service.settings).is_some(),
            MissingServiceNameSnafu {
                stage: "add-custom-service",
            }
        );

        let _guard = self.lock("add-custom-service")?;
        let mut services = self.read_custom()?;
        let stored = StoredCustomService {
            id: ServiceId::generate(),
            service_type: service.service_type,
            settings: service.settings,
        };
        services.push(stored.clone());
        self.save_custom(&services)?;

        tracing::info!(
            service_id = %stored.id,
            service_type = %stored.service_type,
            "added custom LLM service"
        );
        Ok(stored.into_record())
    }

    /// Replaces the settings object of a built-in or custom service.
    pub fn update_llm_service_settings(
        &self,
        id: &ServiceId,
        settings: serde_json::Value,
    ) -> ServiceResult<()> {
        let _guard = self.lock("update-service-settings")?;

        let mut built_in = self.seed_missing_built_in(self.read_built_in()?)?;
        if let Some(service) = built_in.iter_mut().find(|service| &service.id == id) {
            service.settings = settings;
            return self.save_built_in(&built_in);
        }

        let mut custom = self.read_custom()?;
        let service = custom
            .iter_mut()
            .find(|service| &service.id == id)
            .context(NotFoundSnafu {
                stage: "update-service-settings-lookup",
                id: id.to_string(),
            })?;
        ensure!(
            service_name(&settings).is_some(),
            MissingServiceNameSnafu {
                stage: "update-custom-service",
            }
        );
        service.settings = settings;
        self.save_custom(&custom)
    }

    pub fn delete_custom_llm_service(&self, id: &ServiceId) -> ServiceResult<()> {
        let _guard = self.lock("delete-custom-service")?;

        if built_in_services().iter().any(|service| &service.id == id)
            || self.read_built_in()?.iter().any(|service| &service.id == id)
        {
            return NotDeletableSnafu {
                stage: "delete-custom-service",
                id: id.to_string(),
            }
            .fail();
        }

        let mut custom = self.read_custom()?;
        let before = custom.len();
        custom.retain(|service| &service.id != id);
        ensure!(
            custom.len() != before,
            NotFoundSnafu {
                stage: "delete-custom-service-lookup",
                id: id.to_string(),
            }
        );
        self.save_custom(&custom)
    }

    fn lock(&self, stage: &'static str) -> ServiceResult<MutexGuard<'_, ()>> {
        self.write_lock.lock().ok().context(InvariantViolationSnafu {
            stage,
            details: "LLM service registry lock was poisoned".to_string(),
        })
    }

    /// Caller holds the write lock.
    fn seed_missing_built_in(
        &self,
        mut services: Vec<LlmServiceSettingsRecord>,
    ) -> ServiceResult<Vec<LlmServiceSettingsRecord>> {
        let stored_count = services.len();
        for default_service in built_in_services() {
            if !services.iter().any(|service| service.id == default_service.id) {
                services.push(default_service);
            }
        }

        if services.len() != stored_count {
            tracing::info!(
                seeded = services.len() - stored_count,
                "seeded missing built-in LLM services"
            );
            self.save_built_in(&services)?;
        }

        Ok(services)
    }

    fn read_built_in(&self) -> ServiceResult<Vec<LlmServiceSettingsRecord>> {
        Ok(read_json(self.store.as_ref(), BUILT_IN_LLM_SERVICES_KEY)
            .context(StorageSnafu {
                stage: "read-built-in-services",
            })?
            .unwrap_or_default())
    }

    fn save_built_in(&self, services: &[LlmServiceSettingsRecord]) -> ServiceResult<()> {
        write_json(self.store.as_ref(), BUILT_IN_LLM_SERVICES_KEY, services).context(StorageSnafu {
            stage: "save-built-in-services",
        })
    }

    fn read_custom(&self) -> ServiceResult<Vec<StoredCustomService>> {
        Ok(read_json(self.store.as_ref(), CUSTOM_LLM_SERVICES_KEY)
            .context(StorageSnafu {
                stage: "read-custom-services",
            })?
            .unwrap_or_default())
    }

    fn save_custom(&self, services: &[StoredCustomService]) -> ServiceResult<()> {
        write_json(self.store.as_ref(), CUSTOM_LLM_SERVICES_KEY, services).context(StorageSnafu {
            stage: "save-custom-services",
        })
    }
}
