use std::path::{Path, PathBuf};

use figment::Figment;
use figment::providers::{Env, Format, Json, Serialized};
use serde::{Deserialize, Serialize};

const APP_DIR_NAME: &str = "lingua";
const CONFIG_FILE_NAME: &str = "config.json";
const DATABASE_FILE_NAME: &str = "lingua.db";
const ENV_PREFIX: &str = "LINGUA_";
pub const DEFAULT_LOG_FILTER: &str = "info";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Memory,
    #[default]
    Sqlite,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::default(),
            database_path: default_database_path(),
        }
    }
}

impl StorageConfig {
    pub fn memory() -> Self {
        Self {
            backend: StorageBackend::Memory,
            ..Self::default()
        }
    }

    pub fn sqlite(database_path: impl Into<PathBuf>) -> Self {
        Self {
            backend: StorageBackend::Sqlite,
            database_path: database_path.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            storage: StorageConfig::default(),
            log_filter: default_log_filter(),
        }
    }
}

impl AppConfig {
    pub fn default_config_path() -> PathBuf {
        app_dir(dirs::config_dir()).join(CONFIG_FILE_NAME)
    }

    pub fn load() -> Self {
        Self::load_from(&Self::default_config_path())
    }

    /// Defaults, then the JSON file if present, then `LINGUA_*` variables.
    ///
    /// Nested keys use `__`, e.g. `LINGUA_STORAGE__BACKEND=memory`.
    pub fn load_from(path: &Path) -> Self {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));
        if path.exists() {
            figment = figment.merge(Json::file(path));
        }
        figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));

        match figment.extract::<Self>() {
            Ok(config) => config,
            Err(error) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %error,
                    "invalid configuration; falling back to defaults"
                );
                Self::default()
            }
        }
    }
}

fn app_dir(base: Option<PathBuf>) -> PathBuf {
    base.unwrap_or_else(|| PathBuf::from(".")).join(APP_DIR_NAME)
}

fn default_database_path() -> PathBuf {
    app_dir(dirs::data_dir()).join(DATABASE_FILE_NAME)
}

fn default_log_filter() -> String {
    DEFAULT_LOG_FILTER.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig::load_from(&dir.path().join("absent.json"));
        assert_eq!(config.storage.backend, StorageBackend::Sqlite);
        assert!(config.storage.database_path.ends_with("lingua/lingua.db"));
        assert_eq!(config.log_filter, DEFAULT_LOG_FILTER);
    }

    #[test]
    fn file_values_override_defaults_field_by_field() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{"storage": {"backend": "memory"}, "log_filter": "lingua_chat=debug"}"#,
        )
        .unwrap();

        let config = AppConfig::load_from(&path);
        assert_eq!(config.storage.backend, StorageBackend::Memory);
        assert_eq!(config.storage.database_path, default_database_path());
        assert_eq!(config.log_filter, "lingua_chat=debug");
    }

    #[test]
    fn invalid_file_degrades_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"storage": {"backend": "floppy"}}"#).unwrap();

        assert_eq!(AppConfig::load_from(&path), AppConfig::default());
    }
}
