//! Hot reload through real coordinator wiring: sources, dispatch, debounce.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::json;

use live_config::hot_reload::{HotReloadCoordinator, HotReloadEvent, RemoteChangeSource};
use live_config::settings::HotReloadSettings;

mod common;

fn settings(debounce_ms: u64) -> HotReloadSettings {
    HotReloadSettings {
        debounce_ms,
        ..HotReloadSettings::default()
    }
}

fn direct_client() -> reqwest::Client {
    reqwest::Client::builder().no_proxy().build().unwrap()
}

#[tokio::test(start_paused = true)]
async fn test_rapid_file_signals_reload_once_with_last_value() {
    let manager = common::manager(json!({"rate": {"limit": 0}}));
    let coordinator = HotReloadCoordinator::new(settings(100), Arc::clone(&manager));
    let source = common::FakeChangeSource::new("/etc/app/live.json");
    coordinator.add_source(source.clone());

    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    coordinator.on_hot_reload(move |event| sink.lock().unwrap().push(event.clone()));

    coordinator.start();
    assert!(common::eventually(Duration::from_secs(1), || source.is_watching()).await);

    for i in 1..=20 {
        assert!(source.emit(json!({"rate": {"limit": i}})));
        tokio::time::sleep(Duration::from_millis(3)).await;
    }
    tokio::time::sleep(Duration::from_millis(300)).await;

    let events = events.lock().unwrap();
    assert_eq!(events.len(), 1, "events: {events:?}");
    match &events[0] {
        HotReloadEvent::Reloaded { key, affected_paths, .. } => {
            assert_eq!(key, "/etc/app/live.json");
            assert_eq!(affected_paths, &vec!["rate.limit".to_string()]);
        }
        other => panic!("unexpected event {other:?}"),
    }
    assert_eq!(manager.get_current_configuration()["rate"]["limit"], 20);
    assert_eq!(manager.get_runtime_statistics().total_updates, 1);

    coordinator.stop();
}

#[tokio::test(start_paused = true)]
async fn test_separate_keys_debounce_independently() {
    let manager = common::manager(json!({}));
    let coordinator = HotReloadCoordinator::new(settings(50), Arc::clone(&manager));
    let a = common::FakeChangeSource::new("a.json");
    let b = common::FakeChangeSource::new("b.json");
    coordinator.add_source(a.clone());
    coordinator.add_source(b.clone());
    coordinator.start();
    assert!(common::eventually(Duration::from_secs(1), || a.is_watching() && b.is_watching()).await);

    a.emit(json!({"a": 1}));
    b.emit(json!({"b": 1}));
    tokio::time::sleep(Duration::from_millis(100)).await;

    let config = manager.get_current_configuration();
    assert_eq!(config, json!({"a": 1, "b": 1}));
    assert_eq!(coordinator.get_status().reloads, 2);
}

#[tokio::test(start_paused = true)]
async fn test_stop_prevents_pending_reload() {
    let manager = common::manager(json!({"v": 0}));
    let coordinator = HotReloadCoordinator::new(settings(100), Arc::clone(&manager));
    let source = common::FakeChangeSource::new("c.json");
    coordinator.add_source(source.clone());
    coordinator.start();
    assert!(common::eventually(Duration::from_secs(1), || source.is_watching()).await);

    source.emit(json!({"v": 1}));
    tokio::time::sleep(Duration::from_millis(20)).await;
    coordinator.stop();
    tokio::time::sleep(Duration::from_millis(300)).await;

    assert_eq!(manager.get_current_configuration()["v"], 0);
    assert_eq!(coordinator.pending_count(), 0);
}

#[tokio::test]
async fn test_remote_source_reports_unchanged_documents() {
    let addr = common::start_document_server(vec![
        json!({"flags": {"beta": true}}),
        json!({"flags": {"beta": true}}),
        json!({"flags": {"beta": false}}),
    ])
    .await;

    let manager = common::manager(json!({"flags": {"beta": false}}));
    let coordinator = HotReloadCoordinator::new(settings(10), Arc::clone(&manager));
    coordinator.add_source(Arc::new(RemoteChangeSource::new(
        "flags",
        format!("http://{addr}/flags"),
        Duration::from_secs(30),
    )
    .with_client(direct_client())));

    let first = coordinator.trigger_reload("flags").await;
    assert!(matches!(first, HotReloadEvent::Reloaded { .. }), "{first:?}");
    assert_eq!(manager.get_current_configuration()["flags"]["beta"], true);

    let second = coordinator.trigger_reload("flags").await;
    assert!(matches!(second, HotReloadEvent::Unchanged { .. }), "{second:?}");

    let third = coordinator.trigger_reload("flags").await;
    assert!(matches!(third, HotReloadEvent::Reloaded { .. }), "{third:?}");
    assert_eq!(manager.get_current_configuration()["flags"]["beta"], false);
}

#[tokio::test]
async fn test_unreachable_remote_is_load_failure() {
    let manager = common::manager(json!({}));
    let coordinator = HotReloadCoordinator::new(settings(10), Arc::clone(&manager));
    coordinator.add_source(Arc::new(RemoteChangeSource::new(
        "down",
        "http://127.0.0.1:9/config",
        Duration::from_secs(1),
    )
    .with_client(direct_client())));

    let event = coordinator.trigger_reload("down").await;
    assert!(matches!(event, HotReloadEvent::LoadFailed { .. }), "{event:?}");
    assert_eq!(coordinator.get_status().failures, 1);
}
