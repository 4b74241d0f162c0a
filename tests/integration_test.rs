use hotcog::core::{
    BusErrorSink, ExtensionClassifier, ExtensionManager, HotReloader, LifecycleDriver, Transition,
};
use hotcog::{
    ChangeKind, Config, DispatchOutcome, Dispatcher, HotEvent, HotReloadConfig, ModuleId,
    PathResolver,
};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::{tempdir, NamedTempFile, TempDir};
use tokio::sync::{broadcast, Mutex};

const PING: &str = r#"
function setup(ctx)
    ctx.log("pong")
end
"#;

struct Bot {
    _dir: TempDir,
    base: PathBuf,
    manager: Arc<Mutex<ExtensionManager>>,
    events: broadcast::Receiver<HotEvent>,
    dispatcher: Dispatcher<ExtensionManager>,
}

fn bot() -> Bot {
    let dir = tempdir().expect("Failed to create temp dir");
    // Watchers report canonical paths
    let base = dir.path().canonicalize().unwrap();
    std::fs::create_dir_all(base.join("src/cogs")).unwrap();

    let resolver = PathResolver::new(&base, ".lua");
    let classifier = ExtensionClassifier::new(resolver.clone(), "setup");
    let manager = Arc::new(Mutex::new(
        ExtensionManager::new(resolver.clone(), "setup").unwrap(),
    ));
    let bus = hotcog::core::EventBus::default();
    let events = bus.subscribe();
    let dispatcher = Dispatcher::new(
        resolver,
        classifier,
        LifecycleDriver::new(Arc::clone(&manager)),
        bus.clone(),
    )
    .with_error_sink(Arc::new(BusErrorSink::new(bus)));

    Bot {
        _dir: dir,
        base,
        manager,
        events,
        dispatcher,
    }
}

fn cog_path(bot: &Bot, name: &str) -> PathBuf {
    bot.base.join("src/cogs").join(name)
}

#[tokio::test]
async fn test_config_from_file() {
    let config_content = r#"
[hot_reload]
extensions_path = "plugins/"
entry_point = "init"
ignore_dirs = [".git"]
"#;

    let mut temp_file = NamedTempFile::new().expect("Failed to create temp file");
    temp_file
        .write_all(config_content.as_bytes())
        .expect("Failed to write to temp file");
    let temp_path = temp_file.path().to_str().unwrap();

    let config = Config::load(temp_path).await.expect("Failed to load config");

    assert_eq!(config.hot_reload.extensions_path, "plugins/");
    assert_eq!(config.hot_reload.entry_point, "init");
    assert_eq!(config.hot_reload.ignore_dirs, vec![".git".to_string()]);
    assert_eq!(config.hot_reload.source_suffix, ".lua");
}

#[tokio::test]
async fn test_missing_config_file_uses_defaults() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("absent.toml");

    let config = Config::load_or_default(path.to_str().unwrap()).await.unwrap();
    assert_eq!(config.hot_reload, HotReloadConfig::default());
    assert!(Config::load(path.to_str().unwrap()).await.is_err());
}

#[tokio::test]
async fn test_ping_cog_lifecycle() {
    let mut bot = bot();
    let path = cog_path(&bot, "ping.lua");
    let id = ModuleId::from("src.cogs.ping");

    // Created with an entry point: loaded once, file_added emitted
    std::fs::write(&path, PING).unwrap();
    let outcome = bot.dispatcher.dispatch(ChangeKind::Added, &path).await;
    assert_eq!(outcome, DispatchOutcome::Handled(Transition::Loaded));
    assert!(bot.manager.lock().await.is_loaded(&id));
    match bot.events.try_recv().unwrap() {
        HotEvent::FileAdded { module, .. } => assert_eq!(module, id),
        other => panic!("Wrong event type: {:?}", other),
    }

    // Edited, still an extension: reloaded
    std::fs::write(&path, format!("{}\n-- edited", PING)).unwrap();
    let outcome = bot.dispatcher.dispatch(ChangeKind::Modified, &path).await;
    assert_eq!(outcome, DispatchOutcome::Handled(Transition::Reloaded));
    assert_eq!(bot.events.try_recv().unwrap().name(), "file_modified");

    // Deleted while loaded: unloaded, file_deleted emitted
    std::fs::remove_file(&path).unwrap();
    let outcome = bot.dispatcher.dispatch(ChangeKind::Deleted, &path).await;
    assert_eq!(outcome, DispatchOutcome::Handled(Transition::Unloaded));
    assert!(!bot.manager.lock().await.is_loaded(&id));
    match bot.events.try_recv().unwrap() {
        HotEvent::FileDeleted { module } => assert_eq!(module, id),
        other => panic!("Wrong event type: {:?}", other),
    }

    // Deleted again: no error
    let outcome = bot.dispatcher.dispatch(ChangeKind::Deleted, &path).await;
    assert_eq!(outcome, DispatchOutcome::Handled(Transition::NoOp));
}

#[tokio::test]
async fn test_file_becoming_an_extension_is_loaded_on_modify() {
    let bot = bot();
    let path = cog_path(&bot, "late.lua");

    std::fs::write(&path, "-- work in progress").unwrap();
    let outcome = bot.dispatcher.dispatch(ChangeKind::Added, &path).await;
    assert_eq!(outcome, DispatchOutcome::Handled(Transition::NoOp));

    std::fs::write(&path, PING).unwrap();
    let outcome = bot.dispatcher.dispatch(ChangeKind::Modified, &path).await;
    assert_eq!(outcome, DispatchOutcome::Handled(Transition::Loaded));
}

#[tokio::test]
async fn test_broken_cog_does_not_block_others() {
    let mut bot = bot();
    let broken = cog_path(&bot, "broken.lua");
    let ok = cog_path(&bot, "ok.lua");
    std::fs::write(&broken, "function setup(ctx) error('broken on purpose') end").unwrap();
    std::fs::write(&ok, PING).unwrap();

    assert_eq!(
        bot.dispatcher.dispatch(ChangeKind::Added, &broken).await,
        DispatchOutcome::Failed
    );
    assert_eq!(
        bot.dispatcher.dispatch(ChangeKind::Added, &ok).await,
        DispatchOutcome::Handled(Transition::Loaded)
    );

    match bot.events.try_recv().unwrap() {
        HotEvent::Error { kind, message, .. } => {
            assert_eq!(kind, ChangeKind::Added);
            assert!(message.contains("broken on purpose"));
        }
        other => panic!("Wrong event type: {:?}", other),
    }
    assert_eq!(
        bot.manager.lock().await.get_loaded_extensions(),
        vec![ModuleId::from("src.cogs.ok")]
    );
}

#[tokio::test]
async fn test_helper_modules_are_left_alone() {
    let mut bot = bot();
    let opts = cog_path(&bot, "opts.lua");
    let retired = cog_path(&bot, "retired.lua");
    std::fs::write(&opts, "return {\n  setup = function(opts) end,\n}\n").unwrap();
    std::fs::write(&retired, "--[[\nfunction setup(ctx)\nend\n]]\nreturn {}\n").unwrap();

    for path in [&opts, &retired] {
        assert_eq!(
            bot.dispatcher.dispatch(ChangeKind::Added, path).await,
            DispatchOutcome::Handled(Transition::NoOp)
        );
        assert_eq!(bot.events.try_recv().unwrap().name(), "file_added");
    }

    assert!(bot.events.try_recv().is_err());
    assert_eq!(bot.manager.lock().await.get_extension_count(), 0);
}

async fn wait_for_added(events: &mut broadcast::Receiver<HotEvent>, id: &ModuleId) {
    loop {
        match events.recv().await {
            Ok(HotEvent::FileAdded { module, .. }) if &module == id => return,
            Ok(_) => continue,
            Err(e) => panic!("Event bus failed: {}", e),
        }
    }
}

#[tokio::test]
async fn test_watcher_loads_new_cog_from_disk() {
    let Bot {
        _dir,
        base,
        manager,
        mut events,
        dispatcher,
    } = bot();
    let staging = tempdir().unwrap();

    let config = HotReloadConfig {
        watch_root: base.to_string_lossy().into_owned(),
        ..HotReloadConfig::default()
    };
    let reloader = HotReloader::start(&config, dispatcher).unwrap();

    // Move a complete file in so the watcher never sees it half-written
    let staged = staging.path().join("ping.lua");
    std::fs::write(&staged, PING).unwrap();
    std::fs::rename(&staged, base.join("src/cogs/ping.lua")).unwrap();

    let id = ModuleId::from("src.cogs.ping");
    tokio::time::timeout(Duration::from_secs(10), wait_for_added(&mut events, &id))
        .await
        .expect("Timed out waiting for file_added");
    assert!(manager.lock().await.is_loaded(&id));

    reloader.close().await;
}

#[test]
fn test_resolver_ignores_spelling() {
    let resolver = PathResolver::new("/srv/bot", ".lua");
    let spellings = [
        "/srv/bot/src/cogs/ping.lua",
        "./src/cogs/ping.lua",
        "src/cogs/ping.lua",
    ];

    for spelling in spellings {
        assert_eq!(resolver.resolve(Path::new(spelling)).as_str(), "src.cogs.ping");
    }
}
