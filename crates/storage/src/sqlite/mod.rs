use std::future::Future;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use std::time::{SystemTime, UNIX_EPOCH};

use snafu::ResultExt;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Connection, SqliteConnection};

use super::KeyValueStore;
use super::error::{
    CreateSqliteDirectorySnafu, InvariantViolationSnafu, SqliteConnectOptionsSnafu,
    SqliteConnectSnafu, SqliteMigrateSnafu, SqlitePragmaSnafu, SqliteQuerySnafu,
    SqliteRuntimeInitSnafu, SqliteThreadSpawnSnafu, StorageResult,
};

/// On-disk key-value store backed by a single `kv_entries` table.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    database_url: String,
}

impl SqliteStore {
    pub async fn open(database_location: &str) -> StorageResult<Self> {
        ensure_database_directory(database_location)?;

        let database_url = normalize_database_url(database_location);
        let connect_options = SqliteConnectOptions::from_str(&database_url)
            .context(SqliteConnectOptionsSnafu {
                stage: "sqlite-open-parse-url",
                database_url: database_url.clone(),
            })?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_millis(5_000));

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(connect_options)
            .await
            .context(SqliteConnectSnafu {
                stage: "sqlite-open-connect",
                database_url: database_url.clone(),
            })?;

        // Explicit PRAGMA writes make bootstrap behavior deterministic for QA checks.
        let _: String = sqlx::query_scalar("PRAGMA journal_mode = WAL;")
            .fetch_one(&pool)
            .await
            .context(SqlitePragmaSnafu {
                stage: "sqlite-open-pragma-journal-mode",
                pragma: "journal_mode",
            })?;
        sqlx::query("PRAGMA busy_timeout = 5000;")
            .execute(&pool)
            .await
            .context(SqlitePragmaSnafu {
                stage: "sqlite-open-pragma-busy-timeout",
                pragma: "busy_timeout",
            })?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .context(SqliteMigrateSnafu {
                stage: "sqlite-open-migrate",
            })?;

        // Bootstrap only; every store call opens its own connection.
        pool.close().await;

        tracing::info!(database_url = %database_url, "opened sqlite key-value store");
        Ok(Self { database_url })
    }

    fn run_db_call<T, F>(&self, stage: &'static str, op: F) -> StorageResult<T>
    where
        T: Send + 'static,
        F: Future<Output = StorageResult<T>> + Send + 'static,
    {
        // Store traits are sync, so each call executes on a dedicated worker thread
        // with its own current-thread runtime to avoid nested-runtime blocking panics.
        let worker = std::thread::Builder::new()
            .name(format!("sqlite-store-{stage}"))
            .spawn(move || {
                let runtime = tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                    .context(SqliteRuntimeInitSnafu {
                        stage: "sqlite-store-runtime-build",
                    })?;
                runtime.block_on(op)
            })
            .context(SqliteThreadSpawnSnafu {
                stage: "sqlite-store-spawn-worker",
            })?;

        match worker.join() {
            Ok(result) => result,
            Err(_) => InvariantViolationSnafu {
                stage,
                details: "sqlite storage worker thread panicked".to_string(),
            }
            .fail(),
        }
    }
}

impl KeyValueStore for SqliteStore {
    fn get(&self, key: &str) -> StorageResult<Option<String>> {
        let database_url = self.database_url.clone();
        let key = key.to_string();
        self.run_db_call("kv-get", async move {
            let mut connection = connect_store_connection(&database_url, "kv-get-connect").await?;
            sqlx::query_scalar::<_, String>("SELECT value FROM kv_entries WHERE key = ?")
                .bind(key)
                .fetch_optional(&mut connection)
                .await
                .context(SqliteQuerySnafu {
                    stage: "kv-get-query",
                })
        })
    }

    fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        let database_url = self.database_url.clone();
        let key = key.to_string();
        let value = value.to_string();
        self.run_db_call("kv-set", async move {
            let mut connection = connect_store_connection(&database_url, "kv-set-connect").await?;
            sqlx::query(
                "INSERT INTO kv_entries (key, value, updated_at) VALUES (?, ?, ?) \
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            )
            .bind(key)
            .bind(value)
            .bind(unix_timestamp_seconds())
            .execute(&mut connection)
            .await
            .context(SqliteQuerySnafu {
                stage: "kv-set-upsert",
            })?;
            Ok(())
        })
    }

    fn remove(&self, key: &str) -> StorageResult<()> {
        let database_url = self.database_url.clone();
        let key = key.to_string();
        self.run_db_call("kv-remove", async move {
            let mut connection =
                connect_store_connection(&database_url, "kv-remove-connect").await?;
            sqlx::query("DELETE FROM kv_entries WHERE key = ?")
                .bind(key)
                .execute(&mut connection)
                .await
                .context(SqliteQuerySnafu {
                    stage: "kv-remove-delete",
                })?;
            Ok(())
        })
    }

    fn keys(&self) -> StorageResult<Vec<String>> {
        let database_url = self.database_url.clone();
        self.run_db_call("kv-keys", async move {
            let mut connection = connect_store_connection(&database_url, "kv-keys-connect").await?;
            sqlx::query_scalar::<_, String>("SELECT key FROM kv_entries ORDER BY key")
                .fetch_all(&mut connection)
                .await
                .context(SqliteQuerySnafu {
                    stage: "kv-keys-query",
                })
        })
    }
}

async fn connect_store_connection(
    database_url: &str,
    stage: &'static str,
) -> StorageResult<SqliteConnection> {
    let mut connection =
        SqliteConnection::connect(database_url)
            .await
            .context(SqliteConnectSnafu {
                stage,
                database_url: database_url.to_string(),
            })?;

    sqlx::query("PRAGMA busy_timeout = 5000;")
        .execute(&mut connection)
        .await
        .context(SqlitePragmaSnafu {
            stage: "sqlite-store-pragma-busy-timeout",
            pragma: "busy_timeout",
        })?;

    Ok(connection)
}

fn unix_timestamp_seconds() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0_i64, |duration| duration.as_secs() as i64)
}

fn ensure_database_directory(database_location: &str) -> StorageResult<()> {
    if database_location.starts_with("sqlite:") {
        return Ok(());
    }

    let path = Path::new(database_location);
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).context(CreateSqliteDirectorySnafu {
            stage: "sqlite-open-create-directory",
            path: parent.display().to_string(),
        })?;
    }

    Ok(())
}

// Every call opens its own connection, so `:memory:` databases are not
// supported here; use `MemoryStore` instead.
fn normalize_database_url(database_location: &str) -> String {
    if database_location.starts_with("sqlite:") {
        return database_location.to_string();
    }

    format!("sqlite://{database_location}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn values_survive_reopen() {
        let directory = tempfile::tempdir().unwrap();
        let db_path = directory.path().join("nested").join("lingua.db");
        let db_path = db_path.to_str().unwrap().to_string();

        {
            let store = SqliteStore::open(&db_path).await.unwrap();
            store.set("chatSelectionList", r#"[{"id":"a","title":"Demo"}]"#).unwrap();
            store.set("chatCounter", "1").unwrap();
            store.set("chatCounter", "2").unwrap();
        }

        let reopened = SqliteStore::open(&db_path).await.unwrap();
        assert_eq!(reopened.get("chatCounter").unwrap().as_deref(), Some("2"));
        assert_eq!(
            reopened.keys().unwrap(),
            vec!["chatCounter".to_string(), "chatSelectionList".to_string()]
        );
    }

    #[tokio::test]
    async fn remove_is_idempotent() {
        let directory = tempfile::tempdir().unwrap();
        let db_path = directory.path().join("lingua.db");
        let store = SqliteStore::open(db_path.to_str().unwrap()).await.unwrap();

        store.set("chat_x", "[]").unwrap();
        store.remove("chat_x").unwrap();
        store.remove("chat_x").unwrap();
        assert!(store.get("chat_x").unwrap().is_none());
    }

    #[test]
    fn plain_paths_become_sqlite_urls() {
        assert_eq!(normalize_database_url("data/lingua.db"), "sqlite://data/lingua.db");
        assert_eq!(normalize_database_url("sqlite://x.db"), "sqlite://x.db");
    }
}
