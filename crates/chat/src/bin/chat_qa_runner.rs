use std::env;
use std::path::Path;
use std::sync::Arc;

use serde_json::json;
use snafu::{OptionExt, ResultExt, Snafu};

use lingua_chat::config::{AppConfig, StorageBackend, StorageConfig};
use lingua_chat::{
    ChatContext, ChatError, InputHandler, InputHandlerEntry, Message, SpeakAiMessage, TextMessage,
};
use lingua_llm::{LlmServiceRegistry, NewCustomLlmService, ServiceError, built_in_services};
use lingua_storage::keys::{CHAT_SELECTION_LIST_KEY, chat_messages_key};
use lingua_storage::{ChatId, KeyValueStore, MemoryStore, StorageError};

#[derive(Debug, Clone)]
struct RunnerArgs {
    scenario: Scenario,
    db_path: Option<String>,
}

/// `--db` names a scratch file wiped before every chat scenario; without it
/// the configured store is used as is.
#[derive(Debug, Clone, PartialEq, Eq)]
enum StorageTarget {
    Scratch(String),
    Configured(StorageConfig),
}

impl StorageTarget {
    fn resolve(db_path: Option<String>, config: &AppConfig) -> Self {
        match db_path {
            Some(db_path) => Self::Scratch(db_path),
            None => Self::Configured(config.storage.clone()),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Scenario {
    MessageRoundtrip,
    DemoMessages,
    IndexOutOfRange,
    TitleMissing,
    IdempotentDelete,
    AppendNoop,
    SettingsReadThrough,
    SeedOnce,
    CustomService,
    All,
}

impl Scenario {
    const EACH: [Scenario; 9] = [
        Scenario::MessageRoundtrip,
        Scenario::DemoMessages,
        Scenario::IndexOutOfRange,
        Scenario::TitleMissing,
        Scenario::IdempotentDelete,
        Scenario::AppendNoop,
        Scenario::SettingsReadThrough,
        Scenario::SeedOnce,
        Scenario::CustomService,
    ];

    fn parse(raw: &str) -> Option<Self> {
        match raw {
            "message_roundtrip" => Some(Self::MessageRoundtrip),
            "demo_messages" => Some(Self::DemoMessages),
            "index_out_of_range" => Some(Self::IndexOutOfRange),
            "title_missing" => Some(Self::TitleMissing),
            "idempotent_delete" => Some(Self::IdempotentDelete),
            "append_noop" => Some(Self::AppendNoop),
            "settings_read_through" => Some(Self::SettingsReadThrough),
            "seed_once" => Some(Self::SeedOnce),
            "custom_service" => Some(Self::CustomService),
            "all" => Some(Self::All),
            _ => None,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Self::MessageRoundtrip => "message_roundtrip",
            Self::DemoMessages => "demo_messages",
            Self::IndexOutOfRange => "index_out_of_range",
            Self::TitleMissing => "title_missing",
            Self::IdempotentDelete => "idempotent_delete",
            Self::AppendNoop => "append_noop",
            Self::SettingsReadThrough => "settings_read_through",
            Self::SeedOnce => "seed_once",
            Self::CustomService => "custom_service",
            Self::All => "all",
        }
    }
}

#[derive(Debug, Snafu)]
enum RunnerError {
    #[snafu(display("missing required --scenario argument"))]
    MissingScenario { stage: &'static str },
    #[snafu(display("missing value for argument '{arg}'"))]
    MissingArgumentValue {
        stage: &'static str,
        arg: &'static str,
    },
    #[snafu(display("unknown scenario '{raw}'"))]
    UnknownScenario { stage: &'static str, raw: String },
    #[snafu(display("unknown argument '{raw}'"))]
    UnknownArgument { stage: &'static str, raw: String },
    #[snafu(display("chat operation failed: {source}"))]
    Chat {
        stage: &'static str,
        source: ChatError,
    },
    #[snafu(display("LLM service operation failed: {source}"))]
    Service {
        stage: &'static str,
        source: ServiceError,
    },
    #[snafu(display("storage operation failed: {source}"))]
    Storage {
        stage: &'static str,
        source: StorageError,
    },
    #[snafu(display("scenario '{scenario}' failed: {reason}"))]
    ScenarioFailed {
        stage: &'static str,
        scenario: &'static str,
        reason: String,
    },
    #[snafu(display("file operation failed at '{path}': {source}"))]
    FileIo {
        stage: &'static str,
        path: String,
        source: std::io::Error,
    },
}

type RunnerResult<T> = Result<T, RunnerError>;

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let config = AppConfig::load();
    lingua_chat::logging::init_tracing(&config.log_filter);
    if let Err(error) = run(&config).await {
        println!("runner_ok=false");
        eprintln!("runner_error={error}");
        std::process::exit(1);
    }
}

async fn run(config: &AppConfig) -> RunnerResult<()> {
    let args = parse_args(env::args().skip(1))?;
    println!("scenario={}", args.scenario.name());
    let target = StorageTarget::resolve(args.db_path, config);
    match &target {
        StorageTarget::Scratch(db_path) => println!("db_path={db_path}"),
        StorageTarget::Configured(storage) => match storage.backend {
            StorageBackend::Memory => println!("storage_backend=memory"),
            StorageBackend::Sqlite => {
                println!("storage_backend=sqlite");
                println!("db_path={}", storage.database_path.display());
            }
        },
    }

    let scenarios: &[Scenario] = match args.scenario {
        Scenario::All => &Scenario::EACH,
        ref single => std::slice::from_ref(single),
    };
    for scenario in scenarios {
        run_scenario(*scenario, &target).await?;
    }

    println!("runner_ok=true");
    Ok(())
}

async fn run_scenario(scenario: Scenario, target: &StorageTarget) -> RunnerResult<()> {
    match scenario {
        Scenario::MessageRoundtrip => run_message_roundtrip(),
        Scenario::SeedOnce => run_seed_once(),
        Scenario::All => Ok(()),
        chat_scenario => {
            let context = open_context(target).await?;
            match chat_scenario {
                Scenario::DemoMessages => run_demo_messages(&context),
                Scenario::IndexOutOfRange => run_index_out_of_range(&context),
                Scenario::TitleMissing => run_title_missing(&context),
                Scenario::IdempotentDelete => run_idempotent_delete(&context),
                Scenario::AppendNoop => run_append_noop(&context),
                Scenario::SettingsReadThrough => run_settings_read_through(&context),
                Scenario::CustomService => run_custom_service(&context),
                Scenario::MessageRoundtrip | Scenario::SeedOnce | Scenario::All => Ok(()),
            }
        }
    }
}

fn parse_args(args: impl IntoIterator<Item = String>) -> RunnerResult<RunnerArgs> {
    let mut scenario = None;
    let mut db_path = None;
    let mut pending = args.into_iter();

    while let Some(argument) = pending.next() {
        match argument.as_str() {
            "--scenario" => {
                let value = pending.next().context(MissingArgumentValueSnafu {
                    stage: "parse-args-scenario-value",
                    arg: "--scenario",
                })?;

                let parsed = Scenario::parse(&value).context(UnknownScenarioSnafu {
                    stage: "parse-args-scenario",
                    raw: value,
                })?;
                scenario = Some(parsed);
            }
            "--db" => {
                let value = pending.next().context(MissingArgumentValueSnafu {
                    stage: "parse-args-db-value",
                    arg: "--db",
                })?;
                db_path = Some(value);
            }
            _ => {
                return UnknownArgumentSnafu {
                    stage: "parse-args",
                    raw: argument,
                }
                .fail();
            }
        }
    }

    Ok(RunnerArgs {
        scenario: scenario.context(MissingScenarioSnafu {
            stage: "parse-args-scenario-required",
        })?,
        db_path,
    })
}

async fn open_context(target: &StorageTarget) -> RunnerResult<ChatContext> {
    let storage = match target {
        StorageTarget::Scratch(db_path) => {
            reset_sqlite_files(db_path)?;
            StorageConfig::sqlite(db_path)
        }
        StorageTarget::Configured(storage) => storage.clone(),
    };

    ChatContext::open(&storage).await.context(ChatSnafu {
        stage: "open-scenario-context",
    })
}

fn run_message_roundtrip() -> RunnerResult<()> {
    let messages = [
        Message::Text(TextMessage::user("Hi")),
        Message::SpeakAi(SpeakAiMessage {
            is_user: false,
            text: "你好".to_string(),
        }),
    ];
    for message in &messages {
        let encoded = message.serialize().context(ChatSnafu {
            stage: "scenario-message-roundtrip-encode",
        })?;
        let decoded = Message::deserialize(&encoded).context(ChatSnafu {
            stage: "scenario-message-roundtrip-decode",
        })?;
        check(
            decoded == *message,
            "scenario-message-roundtrip-compare",
            "message_roundtrip",
            || format!("'{}' did not survive a round trip", message.tag()),
        )?;
    }

    println!("message_roundtrip=true");
    Ok(())
}

fn run_demo_messages(context: &ChatContext) -> RunnerResult<()> {
    let chat = context
        .add_new_chat("Demo", &[], None)
        .context(ChatSnafu {
            stage: "scenario-demo-create",
        })?
        .chat_selection;
    context
        .add_messages_in_chat(
            &chat.id,
            &[
                Message::Text(TextMessage::user("Hi")),
                Message::Text(TextMessage::assistant("Hello")),
            ],
        )
        .context(ChatSnafu {
            stage: "scenario-demo-append",
        })?;

    let loaded = context.load_chat_messages(&chat.id).context(ChatSnafu {
        stage: "scenario-demo-load",
    })?;
    let texts: Vec<(bool, &str)> = loaded
        .iter()
        .filter_map(|message| match message {
            Message::Text(text) => Some((text.is_user, text.text.as_str())),
            _ => None,
        })
        .collect();
    check(
        loaded.len() == 2 && texts == [(true, "Hi"), (false, "Hello")],
        "scenario-demo-compare",
        "demo_messages",
        || format!("unexpected messages: {loaded:?}"),
    )?;

    println!("demo_message_count={}", loaded.len());
    println!("demo_messages=true");
    Ok(())
}

fn run_index_out_of_range(context: &ChatContext) -> RunnerResult<()> {
    let chat = context
        .add_new_chat(
            "Demo",
            &[
                Message::Text(TextMessage::user("Hi")),
                Message::Text(TextMessage::assistant("Hello")),
            ],
            None,
        )
        .context(ChatSnafu {
            stage: "scenario-index-create",
        })?
        .chat_selection;
    let key = chat_messages_key(&chat.id);
    let before = read_raw(context.store(), &key)?;

    let outcome = context.persist_message_update_in_chat(
        &chat.id,
        5,
        &Message::Text(TextMessage::user("replacement")),
    );
    let rejected = matches!(outcome, Err(ChatError::IndexOutOfRange { .. }));
    let unchanged = read_raw(context.store(), &key)? == before;

    println!("index_out_of_range_error={rejected}");
    println!("messages_unchanged={unchanged}");
    check(
        rejected && unchanged,
        "scenario-index-compare",
        "index_out_of_range",
        || format!("update outcome was {outcome:?}"),
    )
}

fn run_title_missing(context: &ChatContext) -> RunnerResult<()> {
    context.add_new_chat("Demo", &[], None).context(ChatSnafu {
        stage: "scenario-title-create",
    })?;
    let before = read_raw(context.store(), CHAT_SELECTION_LIST_KEY)?;

    let missing = ChatId::parse("nonexistent").context(StorageSnafu {
        stage: "scenario-title-parse-id",
    })?;
    context.update_chat_title(&missing, "X").context(ChatSnafu {
        stage: "scenario-title-update",
    })?;

    let unchanged = read_raw(context.store(), CHAT_SELECTION_LIST_KEY)? == before;
    println!("selection_list_unchanged={unchanged}");
    check(unchanged, "scenario-title-compare", "title_missing", || {
        "renaming an unknown chat modified the index".to_string()
    })
}

fn run_idempotent_delete(context: &ChatContext) -> RunnerResult<()> {
    let chat = context
        .add_new_chat("Doomed", &[Message::Text(TextMessage::user("Hi"))], None)
        .context(ChatSnafu {
            stage: "scenario-delete-create",
        })?
        .chat_selection;
    context
        .set_current_selected_chat_id(Some(&chat.id))
        .context(ChatSnafu {
            stage: "scenario-delete-select",
        })?;

    context.delete_chat_data(&chat.id).context(ChatSnafu {
        stage: "scenario-delete-first",
    })?;
    let once = snapshot(context.store())?;
    context.delete_chat_data(&chat.id).context(ChatSnafu {
        stage: "scenario-delete-second",
    })?;
    let twice = snapshot(context.store())?;

    let state = context.load_chat_selection_list().context(ChatSnafu {
        stage: "scenario-delete-load",
    })?;
    println!("delete_idempotent={}", once == twice);
    println!("selection_cleared={}", state.current_selected_chat_id.is_none());
    let removed = state
        .chat_selection_list
        .iter()
        .all(|selection| selection.id != chat.id);
    check(
        once == twice && removed,
        "scenario-delete-compare",
        "idempotent_delete",
        || "second delete changed the stored state".to_string(),
    )
}

fn run_append_noop(context: &ChatContext) -> RunnerResult<()> {
    let chat = context
        .add_new_chat("Demo", &[Message::Text(TextMessage::user("Hi"))], None)
        .context(ChatSnafu {
            stage: "scenario-append-create",
        })?
        .chat_selection;
    let key = chat_messages_key(&chat.id);
    let before = read_raw(context.store(), &key)?;

    context.add_messages_in_chat(&chat.id, &[]).context(ChatSnafu {
        stage: "scenario-append-empty",
    })?;

    let unchanged = read_raw(context.store(), &key)? == before;
    println!("append_noop_unchanged={unchanged}");
    check(unchanged, "scenario-append-compare", "append_noop", || {
        "empty append rewrote the message list".to_string()
    })
}

fn run_settings_read_through(context: &ChatContext) -> RunnerResult<()> {
    let chat = context
        .add_new_chat("Inherits", &[], None)
        .context(ChatSnafu {
            stage: "scenario-settings-create",
        })?
        .chat_selection;
    let first = context.load_chat_settings(&chat.id).context(ChatSnafu {
        stage: "scenario-settings-first-load",
    })?;

    let mut global = first.settings.clone();
    global
        .input_handlers
        .push(InputHandlerEntry::visible(InputHandler::translation("en")));
    context.set_global_chat_settings(&global).context(ChatSnafu {
        stage: "scenario-settings-update-global",
    })?;

    let second = context.load_chat_settings(&chat.id).context(ChatSnafu {
        stage: "scenario-settings-second-load",
    })?;
    let read_through = first.using_global_settings
        && second.using_global_settings
        && second.settings == global;
    println!("settings_read_through={read_through}");
    check(
        read_through,
        "scenario-settings-compare",
        "settings_read_through",
        || format!("chat settings did not follow global: {second:?}"),
    )
}

// Seeding is observed through the write counter, so this one is memory-only.
fn run_seed_once() -> RunnerResult<()> {
    let store = Arc::new(MemoryStore::new());
    let registry = LlmServiceRegistry::new(store.clone());

    registry
        .get_built_in_llm_services_settings()
        .context(ServiceSnafu {
            stage: "scenario-seed-first",
        })?;
    let after_first = store.write_count();
    registry
        .get_built_in_llm_services_settings()
        .context(ServiceSnafu {
            stage: "scenario-seed-second",
        })?;
    let after_second = store.write_count();

    println!("seed_writes={after_second}");
    check(
        after_first == 1 && after_second == 1,
        "scenario-seed-compare",
        "seed_once",
        || format!("expected exactly one write, saw {after_first} then {after_second}"),
    )
}

fn run_custom_service(context: &ChatContext) -> RunnerResult<()> {
    let record = context
        .services()
        .add_custom_llm_service_settings(NewCustomLlmService {
            service_type: "openai-compatible-api".to_string(),
            settings: json!({
                "name": "MyProxy",
                "URL": "https://proxy.example/v1/chat/completions",
                "apiKey": "",
                "chatCompletionModel": "llama-3"
            }),
        })
        .context(ServiceSnafu {
            stage: "scenario-custom-add",
        })?;

    let services = context
        .services()
        .get_llm_service_settings()
        .context(ServiceSnafu {
            stage: "scenario-custom-list",
        })?;
    let listed = services.iter().any(|service| {
        service.id == record.id && service.deletable && service.name.text == "MyProxy"
    });
    let distinct = built_in_services()
        .iter()
        .all(|built_in| built_in.id != record.id);

    println!("custom_service_listed={listed}");
    println!("custom_service_id_distinct={distinct}");
    check(
        listed && distinct,
        "scenario-custom-compare",
        "custom_service",
        || format!("unexpected service list: {services:?}"),
    )
}

fn check(
    condition: bool,
    stage: &'static str,
    scenario: &'static str,
    reason: impl FnOnce() -> String,
) -> RunnerResult<()> {
    if condition {
        return Ok(());
    }
    ScenarioFailedSnafu {
        stage,
        scenario,
        reason: reason(),
    }
    .fail()
}

fn read_raw(store: &dyn KeyValueStore, key: &str) -> RunnerResult<Option<String>> {
    store.get(key).context(StorageSnafu {
        stage: "scenario-read-raw",
    })
}

fn snapshot(store: &dyn KeyValueStore) -> RunnerResult<Vec<(String, Option<String>)>> {
    let keys = store.keys().context(StorageSnafu {
        stage: "scenario-snapshot-keys",
    })?;
    keys.into_iter()
        .map(|key| {
            let value = read_raw(store, &key)?;
            Ok((key, value))
        })
        .collect()
}

fn reset_sqlite_files(db_path: &str) -> RunnerResult<()> {
    for path in [
        db_path.to_string(),
        format!("{db_path}-wal"),
        format!("{db_path}-shm"),
    ] {
        remove_file_if_exists(Path::new(&path), "scenario-reset-sqlite")?;
    }
    Ok(())
}

fn remove_file_if_exists(path: &Path, stage: &'static str) -> RunnerResult<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(source) if source.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(RunnerError::FileIo {
            stage,
            path: path.display().to_string(),
            source,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn db_flag_overrides_configured_storage() {
        let config = AppConfig {
            storage: StorageConfig::memory(),
            ..AppConfig::default()
        };

        assert_eq!(
            StorageTarget::resolve(Some("/tmp/qa.db".to_string()), &config),
            StorageTarget::Scratch("/tmp/qa.db".to_string())
        );
        assert_eq!(
            StorageTarget::resolve(None, &config),
            StorageTarget::Configured(StorageConfig::memory())
        );
    }

    #[test]
    fn db_flag_is_parsed_next_to_scenario() {
        let argv = ["--scenario", "all", "--db", "/tmp/qa.db"].map(String::from);
        let args = parse_args(argv).unwrap();
        assert!(matches!(args.scenario, Scenario::All));
        assert_eq!(args.db_path.as_deref(), Some("/tmp/qa.db"));
    }
}
