use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use snafu::ensure;
use uuid::Uuid;

use super::error::{InvalidIdSnafu, StorageError, StorageResult};

// Ids are opaque strings on disk: records written by older clients use
// arbitrary base36 tokens, so only blank input is rejected on parse.
macro_rules! define_record_id {
    ($name:ident, $id_type:literal) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Mints a fresh time-ordered id. Unique, but not a security token.
            pub fn generate() -> Self {
                Self(Uuid::now_v7().to_string())
            }

            pub fn parse(raw: &str) -> StorageResult<Self> {
                let trimmed = raw.trim();
                ensure!(
                    !trimmed.is_empty(),
                    InvalidIdSnafu {
                        stage: "parse-record-id",
                        id_type: $id_type,
                        raw: raw.to_string(),
                    }
                );
                Ok(Self(trimmed.to_string()))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
                formatter.write_str(&self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl FromStr for $name {
            type Err = StorageError;

            fn from_str(raw: &str) -> StorageResult<Self> {
                Self::parse(raw)
            }
        }
    };
}

define_record_id!(ChatId, "chat-id");
define_record_id!(ServiceId, "service-id");

impl ServiceId {
    /// Built-in services are keyed by their provider type, e.g. `openai`.
    pub fn built_in(service_type: &str) -> Self {
        Self(service_type.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_are_distinct_and_parse_back() {
        let first = ChatId::generate();
        let second = ChatId::generate();
        assert_ne!(first, second);

        let parsed = ChatId::parse(first.as_str()).unwrap();
        assert_eq!(parsed, first);
    }

    #[test]
    fn legacy_tokens_are_accepted_and_blank_is_rejected() {
        let legacy = ChatId::parse("k3j9x0a1b2c3lz8q1m").unwrap();
        assert_eq!(legacy.as_str(), "k3j9x0a1b2c3lz8q1m");

        let error = ChatId::parse("   ").unwrap_err();
        assert!(matches!(error, StorageError::InvalidId { id_type: "chat-id", .. }));
    }

    #[test]
    fn ids_serialize_as_bare_strings() {
        let id = ServiceId::built_in("openai");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"openai\"");
    }
}
