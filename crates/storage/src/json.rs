use serde::Serialize;
use serde::de::DeserializeOwned;
use snafu::ResultExt;

use super::KeyValueStore;
use super::error::{CorruptionSnafu, SerializeSnafu, StorageResult};

/// Reads and decodes a JSON value. Missing keys yield `Ok(None)`; a value
/// that does not decode yields `StorageError::Corruption`.
pub fn read_json<T>(store: &dyn KeyValueStore, key: &str) -> StorageResult<Option<T>>
where
    T: DeserializeOwned,
{
    let Some(raw) = store.get(key)? else {
        return Ok(None);
    };

    serde_json::from_str(&raw).map(Some).context(CorruptionSnafu {
        stage: "read-json-decode",
        key: key.to_string(),
    })
}

pub fn write_json<T>(store: &dyn KeyValueStore, key: &str, value: &T) -> StorageResult<()>
where
    T: Serialize + ?Sized,
{
    let encoded = serde_json::to_string(value).context(SerializeSnafu {
        stage: "write-json-encode",
        key: key.to_string(),
    })?;
    store.set(key, &encoded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryStore;

    #[test]
    fn missing_key_reads_as_none() {
        let store = MemoryStore::new();
        let value: Option<Vec<String>> = read_json(&store, "absent").unwrap();
        assert!(value.is_none());
    }

    #[test]
    fn malformed_value_is_reported_as_corruption() {
        let store = MemoryStore::new();
        store.set("chatSelectionList", "[{not json").unwrap();

        let error = read_json::<Vec<String>>(&store, "chatSelectionList").unwrap_err();
        assert!(error.is_corruption());
    }

    #[test]
    fn written_value_reads_back() {
        let store = MemoryStore::new();
        write_json(&store, "list", &vec!["a", "b"]).unwrap();

        assert_eq!(store.get("list").unwrap().as_deref(), Some(r#"["a","b"]"#));
        let value: Option<Vec<String>> = read_json(&store, "list").unwrap();
        assert_eq!(value, Some(vec!["a".to_string(), "b".to_string()]));
    }
}
