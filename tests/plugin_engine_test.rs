//! Integration tests for plugin discovery, lifecycle and dispatch

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use sambung_bot::application::errors::{BotError, CommandError, PluginError, PluginResult};
use sambung_bot::application::services::build_plugin_manager;
use sambung_bot::domain::entities::{CommandHandler, Message};
use sambung_bot::domain::traits::{Connection, SendOptions};
use sambung_bot::infrastructure::config::Config;
use sambung_bot::infrastructure::plugins::{ManifestLoader, StaticLoader};
use sambung_bot::plugins::builtin::help::render_help;
use sambung_bot::plugins::{
    DispatchOutcome, LoadState, Plugin, PluginContext, PluginInfo, PluginManager, FAILURE_NOTICE,
};

type Log = Arc<Mutex<Vec<String>>>;

/// Connection that records every outgoing message
#[derive(Default)]
struct Recorder {
    sent: Mutex<Vec<(String, String)>>,
}

impl Recorder {
    fn texts(&self) -> Vec<String> {
        self.sent.lock().unwrap().iter().map(|(_, text)| text.clone()).collect()
    }
}

#[async_trait]
impl Connection for Recorder {
    async fn send(&self, chat_id: &str, content: &str, _options: SendOptions) -> Result<String, BotError> {
        let mut sent = self.sent.lock().unwrap();
        sent.push((chat_id.to_string(), content.to_string()));
        Ok(sent.len().to_string())
    }
}

#[derive(Clone, Copy)]
enum OnCommand {
    Reply,
    Fail,
    Panic,
}

#[derive(Clone, Copy)]
enum OnMessage {
    Ignore,
    Decline,
    Claim,
    Fail,
}

/// Plugin whose behaviour is chosen by the test
#[derive(Clone)]
struct Scripted {
    info: PluginInfo,
    own_category: Option<String>,
    tokens: Vec<String>,
    on_command: OnCommand,
    on_message: OnMessage,
    log: Log,
}

impl Scripted {
    fn new(name: &str, log: &Log) -> Self {
        Self {
            info: PluginInfo::new(name, "1.0.0", "tests"),
            own_category: None,
            tokens: Vec::new(),
            on_command: OnCommand::Reply,
            on_message: OnMessage::Ignore,
            log: log.clone(),
        }
    }

    fn tokens(mut self, tokens: &[&str]) -> Self {
        self.tokens = tokens.iter().map(|t| t.to_string()).collect();
        self
    }

    fn on_command(mut self, on_command: OnCommand) -> Self {
        self.on_command = on_command;
        self
    }

    fn on_message(mut self, on_message: OnMessage) -> Self {
        self.on_message = on_message;
        self
    }
}

#[async_trait]
impl Plugin for Scripted {
    fn info(&self) -> &PluginInfo {
        &self.info
    }

    fn category(&self) -> Option<&str> {
        self.own_category.as_deref()
    }

    fn commands(&self) -> Vec<CommandHandler> {
        if self.tokens.is_empty() {
            return Vec::new();
        }

        let name = self.info.name.clone();
        let log = self.log.clone();
        let on_command = self.on_command;
        vec![CommandHandler::new(self.tokens.clone()).with_handler(
            move |conn: Arc<dyn Connection>, message: Message, _args: Vec<String>| {
                let name = name.clone();
                let log = log.clone();
                async move {
                    log.lock().unwrap().push(format!("{}:command", name));
                    match on_command {
                        OnCommand::Reply => {
                            let reply = format!("{} handled {}", name, message.command.unwrap_or_default());
                            conn.send(&message.chat_id, &reply, SendOptions::default())
                                .await
                                .map(|_| ())
                                .map_err(|e| CommandError::Reply(e.to_string()))
                        }
                        OnCommand::Fail => Err(CommandError::ExecutionFailed("boom".to_string())),
                        OnCommand::Panic => panic!("handler exploded"),
                    }
                }
            },
        )]
    }

    fn handles_messages(&self) -> bool {
        !matches!(self.on_message, OnMessage::Ignore)
    }

    async fn handle_message(&self, _conn: Arc<dyn Connection>, _message: &Message) -> PluginResult<bool> {
        self.log.lock().unwrap().push(format!("{}:message", self.info.name));
        match self.on_message {
            OnMessage::Ignore | OnMessage::Decline => Ok(false),
            OnMessage::Claim => Ok(true),
            OnMessage::Fail => Err(PluginError::Handler("nope".to_string())),
        }
    }
}

/// Register each plugin as a compiled-in module and load them in the given order
async fn load_in_order(plugins: Vec<Scripted>) -> (PluginManager, Vec<PathBuf>) {
    let statics = StaticLoader::new();
    let mut locations = Vec::new();
    for plugin in plugins {
        let name = plugin.info.name.clone();
        let location = statics
            .register(&name, move |_ctx: &mut PluginContext| {
                let instance: Arc<dyn Plugin> = Arc::new(plugin.clone());
                Ok(instance)
            })
            .unwrap();
        locations.push(location);
    }

    let manager = PluginManager::new(Arc::new(statics), "/");
    for location in &locations {
        assert!(manager.register_location(location, Some("test".to_string())));
        assert!(manager.load(location).await.unwrap());
    }
    (manager, locations)
}

fn write(root: &Path, relative: &str, content: &str) -> PathBuf {
    let path = root.join(relative);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(&path, content).unwrap();
    path
}

fn manifest(name: &str, tokens: &[&str], reply: &str) -> String {
    format!(
        "name: {}\nversion: 1.0.0\ncommands:\n  - tokens: [{}]\n    reply: \"{}\"\n",
        name,
        tokens.join(", "),
        reply
    )
}

fn yaml_manager() -> PluginManager {
    PluginManager::new(Arc::new(ManifestLoader::new()), "/")
}

#[tokio::test]
async fn test_empty_root_is_created_and_loads_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("plugins");
    let manager = yaml_manager();

    assert_eq!(manager.discover(&root).unwrap(), 0);
    assert!(root.is_dir());

    let summary = manager.load_all().await;
    assert_eq!(summary.discovered, 0);
    assert_eq!(summary.loaded, 0);
    assert_eq!(summary.commands, 0);
}

#[tokio::test]
async fn test_token_count_is_sum_of_disjoint_plugins() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "fun/dice.yaml", &manifest("dice", &["roll", "dice"], "4"));
    write(dir.path(), "tools/echo.yml", &manifest("echo", &["echo"], "{args}"));
    write(dir.path(), "tools/deep/nested/time.yaml", &manifest("time", &["time", "now", "clock"], "noon"));
    write(dir.path(), "notes.txt", "not a plugin");
    write(dir.path(), ".hidden/secret.yaml", &manifest("secret", &["secret"], "x"));

    let manager = yaml_manager();
    assert_eq!(manager.discover(dir.path()).unwrap(), 3);

    let summary = manager.load_all().await;
    assert_eq!(summary.loaded, 3);
    assert_eq!(summary.failed, 0);
    assert_eq!(summary.commands, 6);
    assert_eq!(manager.command_count(), 6);

    // Deeper directories inherit the first-level category
    assert_eq!(manager.lookup("clock").unwrap().category.as_deref(), Some("tools"));
    assert_eq!(manager.lookup("ROLL").unwrap().category.as_deref(), Some("fun"));
}

#[tokio::test]
async fn test_discover_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "fun/dice.yaml", &manifest("dice", &["roll"], "4"));

    let manager = yaml_manager();
    assert_eq!(manager.discover(dir.path()).unwrap(), 1);
    assert_eq!(manager.discover(dir.path()).unwrap(), 0);
    assert_eq!(manager.plugins().len(), 1);
    assert_eq!(manager.plugins()[0].state, LoadState::Unloaded);
}

#[tokio::test]
async fn test_colliding_token_keeps_a_single_handler() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "a/first.yaml", &manifest("first", &["dup", "only-first"], "first"));
    write(dir.path(), "b/second.yaml", &manifest("second", &["DUP", "only-second"], "second"));

    let manager = yaml_manager();
    manager.discover(dir.path()).unwrap();
    let summary = manager.load_all().await;

    assert_eq!(summary.loaded, 2);
    assert_eq!(summary.commands, 3);

    let owner = manager.lookup("dup").unwrap();
    let winner = owner.category.clone().unwrap();
    assert!(winner == "a" || winner == "b");
    // The winner's other token points at the same handler
    let sibling = if winner == "a" { "only-first" } else { "only-second" };
    assert!(Arc::ptr_eq(&owner, &manager.lookup(sibling).unwrap()));
}

#[tokio::test]
async fn test_failed_init_leaves_plugin_unloaded() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "fun/dice.yaml", &manifest("dice", &["roll"], "4"));
    let broken = write(
        dir.path(),
        "fun/broken.yaml",
        "name: broken\nversion: 1.0.0\ncommands:\n  - tokens: [broken]\n    reply: x\nreplies:\n  - pattern: \"(unclosed\"\n    reply: y\n",
    );
    write(dir.path(), "fun/garbage.yaml", "::: not yaml :::");

    let manager = yaml_manager();
    assert_eq!(manager.discover(dir.path()).unwrap(), 3);
    let summary = manager.load_all().await;

    assert_eq!(summary.discovered, 3);
    assert_eq!(summary.loaded, 1);
    assert_eq!(summary.failed, 2);
    assert!(manager.lookup("broken").is_none());
    assert!(manager.lookup("roll").is_some());
    assert_eq!(manager.state_of(&broken), Some(LoadState::Unloaded));
}

#[tokio::test]
async fn test_reload_runs_new_content() {
    let dir = tempfile::tempdir().unwrap();
    let path = write(dir.path(), "fun/greet.yaml", &manifest("greet", &["hello"], "v1"));

    let manager = yaml_manager();
    manager.discover(dir.path()).unwrap();
    manager.load_all().await;

    let conn = Arc::new(Recorder::default());
    manager.dispatch(conn.clone(), Message::from_command("c", "hello", vec![])).await;

    write(dir.path(), "fun/greet.yaml", &manifest("greet", &["hello", "hi"], "v2"));
    assert!(manager.reload(&path).await);

    let outcome = manager.dispatch(conn.clone(), Message::from_command("c", "hi", vec![])).await;
    assert_eq!(outcome, DispatchOutcome::Command("hi".to_string()));
    manager.dispatch(conn.clone(), Message::from_command("c", "hello", vec![])).await;

    assert_eq!(conn.texts(), vec!["v1", "v2", "v2"]);
    assert_eq!(manager.command_count(), 2);
    assert_eq!(manager.plugins().len(), 1);
}

#[tokio::test]
async fn test_reload_of_broken_file_reports_false_and_unregisters() {
    let dir = tempfile::tempdir().unwrap();
    let path = write(dir.path(), "fun/greet.yaml", &manifest("greet", &["hello"], "v1"));

    let manager = yaml_manager();
    manager.discover(dir.path()).unwrap();
    manager.load_all().await;

    std::fs::write(&path, "name: [unterminated").unwrap();
    assert!(!manager.reload(&path).await);
    assert!(manager.lookup("hello").is_none());
    assert_eq!(manager.state_of(&path), Some(LoadState::Unloaded));
}

#[tokio::test]
async fn test_reload_of_unknown_location_infers_category() {
    let dir = tempfile::tempdir().unwrap();
    let manager = yaml_manager();
    manager.discover(dir.path()).unwrap();

    let path = write(dir.path(), "games/deep/dice.yaml", &manifest("dice", &["roll"], "6"));
    assert!(manager.reload(&path).await);

    assert_eq!(manager.state_of(&path), Some(LoadState::Loaded));
    let summary = &manager.plugins()[0];
    assert_eq!(summary.category.as_deref(), Some("games"));
    assert_eq!(summary.commands, vec!["roll".to_string()]);
    assert_eq!(manager.lookup("roll").unwrap().category.as_deref(), Some("games"));

    let stray = write(dir.path(), "README.md", "docs");
    assert!(!manager.reload(&stray).await);
}

#[tokio::test]
async fn test_unload_keeps_descriptor() {
    let log = Log::default();
    let (manager, locations) = load_in_order(vec![Scripted::new("ping", &log).tokens(&["ping", "pong"])]).await;

    assert!(manager.unload(&locations[0]));
    assert!(manager.lookup("ping").is_none());
    assert!(manager.lookup("pong").is_none());
    assert_eq!(manager.state_of(&locations[0]), Some(LoadState::Unloaded));
    assert_eq!(manager.plugins().len(), 1);

    assert!(!manager.unload(&locations[0]));
    assert!(!manager.unload("builtin:unknown"));

    // Loading again restores the same tokens
    assert!(manager.load(&locations[0]).await.unwrap());
    assert!(!manager.load(&locations[0]).await.unwrap());
    assert_eq!(manager.command_count(), 2);
}

#[tokio::test]
async fn test_command_wins_over_message_handlers() {
    let log = Log::default();
    let (manager, _) = load_in_order(vec![
        Scripted::new("echo", &log).tokens(&["echo"]),
        Scripted::new("catchall", &log).on_message(OnMessage::Claim),
    ])
    .await;

    let conn = Arc::new(Recorder::default());
    let outcome = manager
        .dispatch(conn.clone(), Message::from_command("c", "ECHO", vec!["hi".to_string()]))
        .await;

    assert_eq!(outcome, DispatchOutcome::Command("echo".to_string()));
    assert_eq!(*log.lock().unwrap(), vec!["echo:command"]);
    assert_eq!(conn.texts(), vec!["echo handled ECHO"]);
}

#[tokio::test]
async fn test_unknown_command_falls_back_to_message_handlers() {
    let log = Log::default();
    let (manager, _) = load_in_order(vec![Scripted::new("catchall", &log).on_message(OnMessage::Claim)]).await;

    let outcome = manager
        .dispatch(Arc::new(Recorder::default()), Message::from_command("c", "nosuch", vec![]))
        .await;
    assert_eq!(outcome, DispatchOutcome::Handled("catchall".to_string()));
}

#[tokio::test]
async fn test_message_handlers_run_in_load_order_until_claimed() {
    let log = Log::default();
    let (manager, _) = load_in_order(vec![
        Scripted::new("quiet", &log),
        Scripted::new("first", &log).on_message(OnMessage::Decline),
        Scripted::new("broken", &log).on_message(OnMessage::Fail),
        Scripted::new("second", &log).on_message(OnMessage::Claim),
        Scripted::new("third", &log).on_message(OnMessage::Claim),
    ])
    .await;

    let outcome = manager
        .dispatch(Arc::new(Recorder::default()), Message::from_text("c", "good morning"))
        .await;

    assert_eq!(outcome, DispatchOutcome::Handled("second".to_string()));
    assert_eq!(
        *log.lock().unwrap(),
        vec!["first:message", "broken:message", "second:message"]
    );
}

#[tokio::test]
async fn test_unclaimed_message_is_unhandled() {
    let log = Log::default();
    let (manager, _) = load_in_order(vec![Scripted::new("first", &log).on_message(OnMessage::Decline)]).await;

    let outcome = manager
        .dispatch(Arc::new(Recorder::default()), Message::from_text("c", "anyone?"))
        .await;
    assert_eq!(outcome, DispatchOutcome::Unhandled);
}

#[tokio::test]
async fn test_failing_command_sends_notice_without_fallthrough() {
    let log = Log::default();
    let (manager, _) = load_in_order(vec![
        Scripted::new("bad", &log).tokens(&["boom"]).on_command(OnCommand::Fail),
        Scripted::new("worse", &log).tokens(&["crash"]).on_command(OnCommand::Panic),
        Scripted::new("catchall", &log).on_message(OnMessage::Claim),
    ])
    .await;

    let conn = Arc::new(Recorder::default());
    let outcome = manager.dispatch(conn.clone(), Message::from_command("c", "boom", vec![])).await;
    assert_eq!(outcome, DispatchOutcome::CommandFailed("boom".to_string()));

    let outcome = manager.dispatch(conn.clone(), Message::from_command("c", "crash", vec![])).await;
    assert_eq!(outcome, DispatchOutcome::CommandFailed("crash".to_string()));

    assert_eq!(conn.texts(), vec![FAILURE_NOTICE, FAILURE_NOTICE]);
    assert!(!log.lock().unwrap().contains(&"catchall:message".to_string()));

    // The engine keeps serving afterwards
    let outcome = manager.dispatch(conn.clone(), Message::from_text("c", "still there?")).await;
    assert_eq!(outcome, DispatchOutcome::Handled("catchall".to_string()));
}

#[tokio::test]
async fn test_dispatch_is_not_memoized() {
    let log = Log::default();
    let (manager, _) = load_in_order(vec![Scripted::new("echo", &log).tokens(&["echo"])]).await;
    let conn = Arc::new(Recorder::default());
    let message = Message::from_command("c", "echo", vec![]);

    let first = manager.dispatch(conn.clone(), message.clone()).await;
    let second = manager.dispatch(conn.clone(), message).await;

    assert_eq!(first, second);
    assert_eq!(log.lock().unwrap().len(), 2);
    assert_eq!(conn.texts(), vec!["echo handled echo", "echo handled echo"]);
}

#[tokio::test]
async fn test_imperative_commands_take_descriptor_category() {
    let statics = StaticLoader::new();
    let location = statics
        .register("extra", |ctx: &mut PluginContext| {
            assert_eq!(ctx.category(), Some("tools"));
            ctx.register_command(CommandHandler::new(["extra"]).with_category(Some("mine".to_string())));
            let mut plugin = Scripted::new("extra", &Log::default());
            plugin.own_category = Some("mine".to_string());
            let instance: Arc<dyn Plugin> = Arc::new(plugin);
            Ok(instance)
        })
        .unwrap();

    let manager = PluginManager::new(Arc::new(statics), "/");
    manager.register_location(&location, Some("tools".to_string()));
    assert!(manager.load(&location).await.unwrap());

    assert_eq!(manager.lookup("extra").unwrap().category.as_deref(), Some("tools"));
    assert_eq!(manager.plugins()[0].category.as_deref(), Some("tools"));

    // Imperative commands leave with their plugin
    assert!(manager.unload(&location));
    assert!(manager.lookup("extra").is_none());
}

#[tokio::test]
async fn test_plugins_can_enumerate_commands() {
    let statics = StaticLoader::new();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let seen_in_factory = seen.clone();
    statics
        .register("a", |_ctx: &mut PluginContext| {
            let instance: Arc<dyn Plugin> = Arc::new(Scripted::new("a", &Log::default()).tokens(&["alpha"]));
            Ok(instance)
        })
        .unwrap();
    let late = statics
        .register("late", move |ctx: &mut PluginContext| {
            *seen_in_factory.lock().unwrap() = ctx.manager().commands().keys().cloned().collect::<Vec<_>>();
            let instance: Arc<dyn Plugin> = Arc::new(Scripted::new("late", &Log::default()));
            Ok(instance)
        })
        .unwrap();

    let manager = PluginManager::new(Arc::new(statics), "/");
    manager.register_location(StaticLoader::location("a"), None);
    manager.register_location(&late, None);
    manager.load(StaticLoader::location("a")).await.unwrap();
    manager.load(&late).await.unwrap();

    assert_eq!(*seen.lock().unwrap(), vec!["alpha".to_string()]);
}

#[tokio::test]
async fn test_load_of_unknown_location_is_an_error() {
    let manager = yaml_manager();
    assert!(matches!(
        manager.load("/nowhere/x.yaml").await,
        Err(PluginError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_builtin_ping_and_help() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = Config::default();
    config.plugins.directory = dir.path().join("plugins");
    write(&config.plugins.directory, "fun/dice.yaml", &manifest("dice", &["roll"], "4"));

    let manager = build_plugin_manager(&config).unwrap();
    manager.discover(&config.plugins.directory).unwrap();
    let summary = manager.load_all().await;
    assert_eq!(summary.loaded, 3);
    assert_eq!(summary.commands, 5);

    let conn = Arc::new(Recorder::default());
    let outcome = manager.dispatch(conn.clone(), Message::from_command("c", "PONG", vec![])).await;
    assert_eq!(outcome, DispatchOutcome::Command("pong".to_string()));
    assert!(conn.texts()[0].starts_with("Pong!"));

    manager.dispatch(conn.clone(), Message::from_command("c", "menu", vec![])).await;
    let help = conn.texts()[1].clone();
    assert!(help.contains("[general]"));
    assert!(help.contains("[fun]"));
    assert!(help.contains("/ping - Check bot latency"));
    assert!(help.contains("/roll"));
    assert_eq!(help.matches("/ping").count(), 1);

    manager
        .dispatch(conn.clone(), Message::from_command("c", "help", vec!["pong".to_string()]))
        .await;
    assert_eq!(conn.texts()[2], "/ping - Check bot latency\nAliases: pong");
}

#[tokio::test]
async fn test_builtins_can_be_disabled() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = Config::default();
    config.plugins.directory = dir.path().to_path_buf();
    config.plugins.builtin = false;

    let manager = build_plugin_manager(&config).unwrap();
    manager.discover(&config.plugins.directory).unwrap();
    assert_eq!(manager.load_all().await.commands, 0);
}

/// Plugin whose `init` panics from the second call on
struct FragileInit {
    info: PluginInfo,
    inits: Arc<std::sync::atomic::AtomicUsize>,
}

#[async_trait]
impl Plugin for FragileInit {
    fn info(&self) -> &PluginInfo {
        &self.info
    }

    async fn init(&self) -> PluginResult<()> {
        if self.inits.fetch_add(1, std::sync::atomic::Ordering::SeqCst) > 0 {
            panic!("init exploded on reload");
        }
        Ok(())
    }

    fn commands(&self) -> Vec<CommandHandler> {
        vec![CommandHandler::new(["fragile"])]
    }
}

#[tokio::test]
async fn test_panicking_reload_reports_false() {
    let inits = Arc::new(std::sync::atomic::AtomicUsize::new(0));
    let statics = StaticLoader::new();
    let factory_inits = inits.clone();
    let location = statics
        .register("fragile", move |_ctx: &mut PluginContext| {
            let instance: Arc<dyn Plugin> = Arc::new(FragileInit {
                info: PluginInfo::new("fragile", "1.0.0", "tests"),
                inits: factory_inits.clone(),
            });
            Ok(instance)
        })
        .unwrap();

    let manager = PluginManager::new(Arc::new(statics), "/");
    manager.register_location(&location, Some("tools".to_string()));
    assert_eq!(manager.load_all().await.loaded, 1);

    assert!(!manager.reload(&location).await);
    assert_eq!(manager.state_of(&location), Some(LoadState::Unloaded));
    assert!(manager.lookup("fragile").is_none());

    // The engine keeps working for everything else
    let outcome = manager
        .dispatch(Arc::new(Recorder::default()), Message::from_text("c", "hello"))
        .await;
    assert_eq!(outcome, DispatchOutcome::Unhandled);
}

#[tokio::test]
async fn test_help_lists_only_tokens_a_plugin_still_owns() {
    let log = Log::default();
    let (manager, _) = load_in_order(vec![
        Scripted::new("first", &log).tokens(&["dup"]),
        Scripted::new("second", &log).tokens(&["DUP", "other", "more"]),
    ])
    .await;
    let view = manager.view();

    let listing = render_help(&view, None);
    assert_eq!(listing.matches("/dup").count(), 1);
    assert!(listing.contains("  /other - "));
    assert!(!listing.contains("/more"));

    assert_eq!(render_help(&view, Some("more")), "/other - No description\nAliases: more");
    assert_eq!(render_help(&view, Some("dup")), "/dup - No description");
}
