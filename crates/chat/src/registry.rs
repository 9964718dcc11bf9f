use lingua_storage::keys::{
    CHAT_COUNTER_KEY, CHAT_SELECTION_LIST_KEY, CURRENT_SELECTED_CHAT_ID_KEY, chat_messages_key,
    chat_settings_key, input_handlers_key,
};
use lingua_storage::ChatId;
use serde::{Deserialize, Serialize};
use snafu::{ResultExt, ensure};

use crate::context::ChatContext;
use crate::error::{ChatResult, IndexOutOfRangeSnafu, StorageSnafu};
use crate::message::Message;
use crate::settings::LoadedChatSettings;

/// Entry of the chat index. List order is display order, newest first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatSelection {
    pub id: ChatId,
    pub title: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChatSelectionState {
    pub chat_selection_list: Vec<ChatSelection>,
    pub current_selected_chat_id: Option<ChatId>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewChat {
    pub chat_selection: ChatSelection,
}

impl ChatContext {
    pub fn load_chat_selection_list(&self) -> ChatResult<ChatSelectionState> {
        let Some(chat_selection_list) = self.read_lenient::<Vec<ChatSelection>>(
            CHAT_SELECTION_LIST_KEY,
            "load-chat-selection-list",
        )?
        else {
            return Ok(ChatSelectionState::default());
        };

        let current_selected_chat_id = self
            .store()
            .get(CURRENT_SELECTED_CHAT_ID_KEY)
            .context(StorageSnafu {
                stage: "load-current-selected-chat",
            })?
            .and_then(|raw| ChatId::parse(&raw).ok());

        Ok(ChatSelectionState {
            chat_selection_list,
            current_selected_chat_id,
        })
    }

    pub fn set_current_selected_chat_id(&self, chat_id: Option<&ChatId>) -> ChatResult<()> {
        let _guard = self.lock("set-current-selected-chat")?;
        match chat_id {
            Some(chat_id) => self
                .store()
                .set(CURRENT_SELECTED_CHAT_ID_KEY, chat_id.as_str())
                .context(StorageSnafu {
                    stage: "set-current-selected-chat",
                }),
            None => self.remove(CURRENT_SELECTED_CHAT_ID_KEY, "clear-current-selected-chat"),
        }
    }

    /// Messages of a chat in stored order. A message with an unknown tag
    /// fails this load only.
    pub fn load_chat_messages(&self, chat_id: &ChatId) -> ChatResult<Vec<Message>> {
        self.read_lenient::<Vec<String>>(&chat_messages_key(chat_id), "load-chat-messages")?
            .unwrap_or_default()
            .iter()
            .map(|raw| Message::deserialize(raw))
            .collect()
    }

    /// Registers a chat at the top of the index and stores its first messages.
    ///
    /// Settings flagged `using_global_settings` ask the chat to start from a
    /// snapshot of the global settings; otherwise they are installed as the
    /// chat's local settings.
    pub fn add_new_chat(
        &self,
        title: &str,
        initial_messages: &[Message],
        chat_settings: Option<&LoadedChatSettings>,
    ) -> ChatResult<NewChat> {
        let encoded = encode_messages(initial_messages)?;

        let _guard = self.lock("add-new-chat")?;
        let mut chat_selection_list: Vec<ChatSelection> = self
            .read(CHAT_SELECTION_LIST_KEY, "add-new-chat-read-index")?
            .unwrap_or_default();

        let chat_selection = ChatSelection {
            id: ChatId::generate(),
            title: title.to_string(),
        };
        chat_selection_list.insert(0, chat_selection.clone());
        self.write(CHAT_SELECTION_LIST_KEY, &chat_selection_list, "add-new-chat-write-index")?;
        self.write(
            &chat_messages_key(&chat_selection.id),
            &encoded,
            "add-new-chat-write-messages",
        )?;

        match chat_settings {
            Some(loaded) if loaded.using_global_settings => {
                self.snapshot_global_into(&chat_selection.id)?;
            }
            Some(loaded) => self.write_local(&chat_selection.id, &loaded.settings)?,
            None => {}
        }

        tracing::info!(chat_id = %chat_selection.id, title, "created chat");
        Ok(NewChat { chat_selection })
    }

    /// Appends messages in a single write. Empty input leaves storage untouched.
    pub fn add_messages_in_chat(&self, chat_id: &ChatId, messages: &[Message]) -> ChatResult<()> {
        if messages.is_empty() {
            return Ok(());
        }
        let encoded = encode_messages(messages)?;

        let _guard = self.lock("add-messages")?;
        let key = chat_messages_key(chat_id);
        let mut stored: Vec<String> = self.read(&key, "add-messages-read")?.unwrap_or_default();
        stored.extend(encoded);
        self.write(&key, &stored, "add-messages-write")
    }

    /// Replaces the message at list position `index`.
    pub fn persist_message_update_in_chat(
        &self,
        chat_id: &ChatId,
        index: usize,
        message: &Message,
    ) -> ChatResult<()> {
        let encoded = message.serialize()?;

        let _guard = self.lock("update-message")?;
        let key = chat_messages_key(chat_id);
        let mut stored: Vec<String> = self.read(&key, "update-message-read")?.unwrap_or_default();
        let len = stored.len();
        ensure!(
            index < len,
            IndexOutOfRangeSnafu {
                stage: "update-message",
                entity: "message",
                index,
                len,
            }
        );
        stored[index] = encoded;
        self.write(&key, &stored, "update-message-write")
    }

    /// Unknown ids are ignored.
    pub fn update_chat_title(&self, chat_id: &ChatId, title: &str) -> ChatResult<()> {
        let _guard = self.lock("update-chat-title")?;
        let mut chat_selection_list: Vec<ChatSelection> = self
            .read(CHAT_SELECTION_LIST_KEY, "update-chat-title-read")?
            .unwrap_or_default();

        let Some(selection) = chat_selection_list
            .iter_mut()
            .find(|selection| &selection.id == chat_id)
        else {
            tracing::debug!(chat_id = %chat_id, "title update for unknown chat ignored");
            return Ok(());
        };
        selection.title = title.to_string();
        self.write(CHAT_SELECTION_LIST_KEY, &chat_selection_list, "update-chat-title-write")
    }

    /// Removes every trace of a chat. Deleting an absent chat succeeds.
    pub fn delete_chat_data(&self, chat_id: &ChatId) -> ChatResult<()> {
        let _guard = self.lock("delete-chat")?;

        if let Some(mut chat_selection_list) =
            self.read::<Vec<ChatSelection>>(CHAT_SELECTION_LIST_KEY, "delete-chat-read-index")?
        {
            let before = chat_selection_list.len();
            chat_selection_list.retain(|selection| &selection.id != chat_id);
            if chat_selection_list.len() != before {
                self.write(
                    CHAT_SELECTION_LIST_KEY,
                    &chat_selection_list,
                    "delete-chat-write-index",
                )?;
            }
        }

        self.remove(&chat_messages_key(chat_id), "delete-chat-messages")?;
        self.remove(&input_handlers_key(chat_id), "delete-chat-input-handlers")?;
        self.remove(&chat_settings_key(chat_id), "delete-chat-settings")?;

        let current = self
            .store()
            .get(CURRENT_SELECTED_CHAT_ID_KEY)
            .context(StorageSnafu {
                stage: "delete-chat-read-current",
            })?;
        if current.as_deref() == Some(chat_id.as_str()) {
            self.remove(CURRENT_SELECTED_CHAT_ID_KEY, "delete-chat-clear-current")?;
        }

        tracing::info!(chat_id = %chat_id, "deleted chat");
        Ok(())
    }

    /// Increments and returns the chat numbering counter.
    /// Counters are signed: a stored `-5` yields `-4`.
    pub fn get_next_chat_counter(&self) -> ChatResult<i64> {
        let _guard = self.lock("next-chat-counter")?;
        let raw = self.store().get(CHAT_COUNTER_KEY).context(StorageSnafu {
            stage: "next-chat-counter-read",
        })?;

        let current = match raw.as_deref().map(str::trim) {
            None => 0,
            Some(raw) => parse_leading_integer(raw).unwrap_or_else(|| {
                tracing::warn!(value = raw, "chat counter is not a number; restarting from 0");
                0
            }),
        };
        let next = current.saturating_add(1);
        self.store()
            .set(CHAT_COUNTER_KEY, &next.to_string())
            .context(StorageSnafu {
                stage: "next-chat-counter-write",
            })?;
        Ok(next)
    }
}

/// Optional sign plus the leading digit run; trailing text is ignored.
fn parse_leading_integer(raw: &str) -> Option<i64> {
    let unsigned = raw.strip_prefix(['-', '+']).unwrap_or(raw);
    let digits = unsigned
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(unsigned.len());
    let sign_len = raw.len() - unsigned.len();
    raw[..sign_len + digits].parse().ok()
}

fn encode_messages(messages: &[Message]) -> ChatResult<Vec<String>> {
    messages.iter().map(Message::serialize).collect()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use lingua_storage::{KeyValueStore, MemoryStore};

    use super::*;
    use crate::error::ChatError;
    use crate::input_handler::{InputHandler, InputHandlerEntry};
    use crate::message::TextMessage;
    use crate::settings::ChatSettings;

    fn context_with_store() -> (ChatContext, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        (ChatContext::new(store.clone()), store)
    }

    fn hi_hello() -> Vec<Message> {
        vec![
            Message::Text(TextMessage::user("Hi")),
            Message::Text(TextMessage::assistant("Hello")),
        ]
    }

    #[test]
    fn empty_store_has_no_chats_and_no_selection() {
        let (context, _store) = context_with_store();
        assert_eq!(
            context.load_chat_selection_list().unwrap(),
            ChatSelectionState::default()
        );
        assert!(
            context
                .load_chat_messages(&ChatId::parse("missing").unwrap())
                .unwrap()
                .is_empty()
        );
    }

    #[test]
    fn demo_chat_keeps_messages_in_order() {
        let (context, _store) = context_with_store();
        let chat = context.add_new_chat("Demo", &[], None).unwrap().chat_selection;
        assert!(context.load_chat_messages(&chat.id).unwrap().is_empty());

        context.add_messages_in_chat(&chat.id, &hi_hello()).unwrap();

        let messages = context.load_chat_messages(&chat.id).unwrap();
        assert_eq!(messages, hi_hello());
        let Message::Text(first) = &messages[0] else {
            panic!("expected a text message, got {:?}", messages[0]);
        };
        assert!(first.is_user);
        assert_eq!(first.text, "Hi");
    }

    #[test]
    fn new_chats_are_prepended() {
        let (context, _store) = context_with_store();
        let first = context.add_new_chat("First", &[], None).unwrap().chat_selection;
        let second = context.add_new_chat("Second", &[], None).unwrap().chat_selection;
        assert_ne!(first.id, second.id);

        let state = context.load_chat_selection_list().unwrap();
        assert_eq!(state.chat_selection_list, vec![second, first]);
    }

    #[test]
    fn empty_append_is_not_written() {
        let (context, store) = context_with_store();
        let chat = context.add_new_chat("Demo", &hi_hello(), None).unwrap().chat_selection;
        let key = chat_messages_key(&chat.id);
        let before = store.get(&key).unwrap();
        let writes = store.write_count();

        context.add_messages_in_chat(&chat.id, &[]).unwrap();

        assert_eq!(store.get(&key).unwrap(), before);
        assert_eq!(store.write_count(), writes);
    }

    #[test]
    fn out_of_range_update_leaves_messages_unchanged() {
        let (context, store) = context_with_store();
        let chat = context.add_new_chat("Demo", &hi_hello(), None).unwrap().chat_selection;
        let key = chat_messages_key(&chat.id);
        let before = store.get(&key).unwrap();

        let error = context
            .persist_message_update_in_chat(&chat.id, 5, &Message::Text(TextMessage::user("x")))
            .unwrap_err();
        assert!(matches!(
            error,
            ChatError::IndexOutOfRange { index: 5, len: 2, .. }
        ));
        assert_eq!(store.get(&key).unwrap(), before);

        let replacement = Message::Text(TextMessage::assistant("Hello there"));
        context
            .persist_message_update_in_chat(&chat.id, 1, &replacement)
            .unwrap();
        assert_eq!(context.load_chat_messages(&chat.id).unwrap()[1], replacement);
    }

    #[test]
    fn unknown_tag_fails_only_that_chat() {
        let (context, store) = context_with_store();
        let broken = context.add_new_chat("Broken", &[], None).unwrap().chat_selection;
        let healthy = context.add_new_chat("Healthy", &hi_hello(), None).unwrap().chat_selection;
        store
            .set(
                &chat_messages_key(&broken.id),
                r#"["{\"type\":\"hologram\"}"]"#,
            )
            .unwrap();

        assert!(matches!(
            context.load_chat_messages(&broken.id),
            Err(ChatError::UnknownMessageType { .. })
        ));
        assert_eq!(context.load_chat_messages(&healthy.id).unwrap().len(), 2);
    }

    #[test]
    fn renaming_unknown_chat_changes_nothing() {
        let (context, store) = context_with_store();
        let chat = context.add_new_chat("Demo", &[], None).unwrap().chat_selection;
        let before = store.get(CHAT_SELECTION_LIST_KEY).unwrap();
        let writes = store.write_count();

        context
            .update_chat_title(&ChatId::parse("nonexistent").unwrap(), "X")
            .unwrap();
        assert_eq!(store.get(CHAT_SELECTION_LIST_KEY).unwrap(), before);
        assert_eq!(store.write_count(), writes);

        context.update_chat_title(&chat.id, "Renamed").unwrap();
        let state = context.load_chat_selection_list().unwrap();
        assert_eq!(state.chat_selection_list[0].title, "Renamed");
    }

    #[test]
    fn deleting_twice_matches_deleting_once() {
        let (context, store) = context_with_store();
        let keep = context.add_new_chat("Keep", &[], None).unwrap().chat_selection;
        let chat = context
            .add_new_chat(
                "Doomed",
                &hi_hello(),
                Some(&LoadedChatSettings {
                    using_global_settings: false,
                    settings: ChatSettings::default(),
                }),
            )
            .unwrap()
            .chat_selection;
        store.set(&input_handlers_key(&chat.id), "[]").unwrap();
        context.set_current_selected_chat_id(Some(&chat.id)).unwrap();

        context.delete_chat_data(&chat.id).unwrap();
        let once = store.keys().unwrap();
        let once_values: Vec<_> = once.iter().map(|key| store.get(key).unwrap()).collect();

        context.delete_chat_data(&chat.id).unwrap();
        let twice = store.keys().unwrap();
        let twice_values: Vec<_> = twice.iter().map(|key| store.get(key).unwrap()).collect();

        assert_eq!(once, twice);
        assert_eq!(once_values, twice_values);
        assert!(!once.contains(&chat_messages_key(&chat.id)));
        assert!(!once.contains(&chat_settings_key(&chat.id)));
        assert!(!once.contains(&input_handlers_key(&chat.id)));

        let state = context.load_chat_selection_list().unwrap();
        assert_eq!(state.chat_selection_list, vec![keep]);
        assert_eq!(state.current_selected_chat_id, None);
    }

    #[test]
    fn deleting_another_chat_keeps_the_selection() {
        let (context, _store) = context_with_store();
        let selected = context.add_new_chat("Selected", &[], None).unwrap().chat_selection;
        let other = context.add_new_chat("Other", &[], None).unwrap().chat_selection;
        context.set_current_selected_chat_id(Some(&selected.id)).unwrap();

        context.delete_chat_data(&other.id).unwrap();
        assert_eq!(
            context.load_chat_selection_list().unwrap().current_selected_chat_id,
            Some(selected.id)
        );
    }

    #[test]
    fn counter_increments_and_recovers_from_garbage() {
        let (context, store) = context_with_store();
        assert_eq!(context.get_next_chat_counter().unwrap(), 1);
        assert_eq!(context.get_next_chat_counter().unwrap(), 2);
        assert_eq!(store.get(CHAT_COUNTER_KEY).unwrap().as_deref(), Some("2"));

        store.set(CHAT_COUNTER_KEY, "three").unwrap();
        assert_eq!(context.get_next_chat_counter().unwrap(), 1);
    }

    #[test]
    fn counter_keeps_sign_and_leading_digits() {
        let (context, store) = context_with_store();

        store.set(CHAT_COUNTER_KEY, "-5").unwrap();
        assert_eq!(context.get_next_chat_counter().unwrap(), -4);
        assert_eq!(store.get(CHAT_COUNTER_KEY).unwrap().as_deref(), Some("-4"));

        store.set(CHAT_COUNTER_KEY, "12abc").unwrap();
        assert_eq!(context.get_next_chat_counter().unwrap(), 13);

        store.set(CHAT_COUNTER_KEY, "-").unwrap();
        assert_eq!(context.get_next_chat_counter().unwrap(), 1);
    }

    #[test]
    fn new_chat_settings_switch_or_set() {
        let (context, _store) = context_with_store();
        let mut global = ChatSettings::default();
        global
            .input_handlers
            .push(InputHandlerEntry::visible(InputHandler::translation("en")));
        context.set_global_chat_settings(&global).unwrap();

        let inheriting = context
            .add_new_chat(
                "Inherits",
                &[],
                Some(&LoadedChatSettings {
                    using_global_settings: true,
                    settings: ChatSettings::default(),
                }),
            )
            .unwrap()
            .chat_selection;
        let loaded = context.load_chat_settings(&inheriting.id).unwrap();
        assert!(!loaded.using_global_settings);
        assert_eq!(loaded.settings, global);

        let explicit = ChatSettings {
            auto_play_audio: true,
            ..ChatSettings::default()
        };
        let owning = context
            .add_new_chat(
                "Owns",
                &[],
                Some(&LoadedChatSettings {
                    using_global_settings: false,
                    settings: explicit.clone(),
                }),
            )
            .unwrap()
            .chat_selection;
        let loaded = context.load_chat_settings(&owning.id).unwrap();
        assert!(!loaded.using_global_settings);
        assert_eq!(loaded.settings, explicit);
    }

    #[test]
    fn corrupt_index_reads_empty_but_blocks_new_chats() {
        let (context, store) = context_with_store();
        store.set(CHAT_SELECTION_LIST_KEY, "[{oops").unwrap();

        assert!(
            context
                .load_chat_selection_list()
                .unwrap()
                .chat_selection_list
                .is_empty()
        );
        assert!(matches!(
            context.add_new_chat("Demo", &[], None),
            Err(ChatError::Storage { .. })
        ));
        assert_eq!(store.get(CHAT_SELECTION_LIST_KEY).unwrap().as_deref(), Some("[{oops"));
    }
}
