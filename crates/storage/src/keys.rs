//! Durable key layout. Export/import and sync tooling depend on these names
//! staying byte-identical.

use super::ids::ChatId;

pub const CHAT_SELECTION_LIST_KEY: &str = "chatSelectionList";
pub const CURRENT_SELECTED_CHAT_ID_KEY: &str = "currentSelectedChatID";
pub const CHAT_COUNTER_KEY: &str = "chatCounter";
pub const GLOBAL_DEFAULT_CHAT_SETTINGS_KEY: &str = "globalDefaultChatSettings";
pub const BUILT_IN_LLM_SERVICES_KEY: &str = "builtInLLMServices";
pub const CUSTOM_LLM_SERVICES_KEY: &str = "customLLMServices";

const CHAT_MESSAGES_PREFIX: &str = "chat_";
const CHAT_SETTINGS_PREFIX: &str = "chatSettings_";
const INPUT_HANDLERS_PREFIX: &str = "inputHandlers_";

pub fn chat_messages_key(chat_id: &ChatId) -> String {
    format!("{CHAT_MESSAGES_PREFIX}{chat_id}")
}

pub fn chat_settings_key(chat_id: &ChatId) -> String {
    format!("{CHAT_SETTINGS_PREFIX}{chat_id}")
}

/// Legacy per-chat handler list, only ever removed.
pub fn input_handlers_key(chat_id: &ChatId) -> String {
    format!("{INPUT_HANDLERS_PREFIX}{chat_id}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn per_chat_keys_follow_prefix_scheme() {
        let chat_id = ChatId::parse("abc123").unwrap();
        assert_eq!(chat_messages_key(&chat_id), "chat_abc123");
        assert_eq!(chat_settings_key(&chat_id), "chatSettings_abc123");
        assert_eq!(input_handlers_key(&chat_id), "inputHandlers_abc123");
    }
}
