pub mod error;
pub mod ids;
pub mod json;
pub mod keys;
pub mod memory;
pub mod sqlite;

pub use error::{StorageError, StorageResult};
pub use ids::{ChatId, ServiceId};
pub use json::{read_json, write_json};
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Durable string-keyed store. Values are opaque strings, usually JSON.
///
/// Writes replace the whole value; callers needing partial updates must
/// read, modify and write back the full value themselves.
pub trait KeyValueStore: Send + Sync {
    /// Returns `None` for a missing key; never an error for absence.
    fn get(&self, key: &str) -> StorageResult<Option<String>>;
    fn set(&self, key: &str, value: &str) -> StorageResult<()>;
    /// Removing an absent key succeeds.
    fn remove(&self, key: &str) -> StorageResult<()>;
    fn keys(&self) -> StorageResult<Vec<String>>;
}
