//! Integration tests for the memory worker protocol.
//!
//! Each test starts a real worker host thread against a temporary workspace
//! and drives it through the proxy.

use std::path::Path;
use std::time::Duration;

use serde_json::json;
use tempfile::TempDir;
use tokio::time::{sleep, timeout};

use mylobster_memory::config::{resolve_memory_search_config, Config, ResolvedConfig};
use mylobster_memory::memory::{
    MemoryError, MemorySearchOptions, SyncOptions, WorkerProxy, WorkerState,
};

const DEADLINE: Duration = Duration::from_secs(10);

fn resolved(root: &Path, memory_search: serde_json::Value) -> ResolvedConfig {
    let mut config: Config = serde_json::from_value(json!({
        "agents": { "list": [{
            "id": "main",
            "workspace": root.join("ws").to_string_lossy(),
            "sessionsDir": root.join("sessions").to_string_lossy(),
        }]},
        "memorySearch": memory_search,
    }))
    .unwrap();
    config.state_dir = root.join("state");
    resolve_memory_search_config(&config, "main")
        .unwrap()
        .unwrap()
}

fn quiet() -> serde_json::Value {
    json!({ "sync": { "watch": false, "onSearch": false } })
}

fn write(path: &Path, content: &str) {
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, content).unwrap();
}

async fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    timeout(DEADLINE, async {
        while !condition() {
            sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .is_ok()
}

#[tokio::test]
async fn ready_sync_search_and_status() {
    let tmp = TempDir::new().unwrap();
    write(
        &tmp.path().join("ws/MEMORY.md"),
        "# Preferences\nDeploys happen on Tuesdays after standup.",
    );

    let proxy = WorkerProxy::spawn(resolved(tmp.path(), quiet())).unwrap();
    timeout(DEADLINE, proxy.wait_ready()).await.unwrap().unwrap();
    assert_eq!(proxy.state(), WorkerState::Ready);

    let report = timeout(DEADLINE, proxy.sync(SyncOptions::default()))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(report.files_indexed, 1);

    let results = proxy
        .search(
            "deploys tuesdays",
            MemorySearchOptions {
                min_score: Some(0.0),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(results[0].path, "MEMORY.md");
    assert!(results[0].snippet.contains("Tuesdays"));

    let status = proxy.status().await.unwrap();
    assert_eq!(status.key, "agent:main");
    assert_eq!(status.files, 1);
    assert!(status.fts.available);
    assert!(!status.dirty);

    proxy.close().await.unwrap();
}

#[tokio::test]
async fn dirty_flag_follows_host_state() {
    let tmp = TempDir::new().unwrap();
    write(&tmp.path().join("ws/MEMORY.md"), "initial notes");

    let proxy = WorkerProxy::spawn(resolved(tmp.path(), quiet())).unwrap();
    assert!(wait_until(|| proxy.is_dirty()).await, "never reported dirty");

    proxy.sync_dirty().await.unwrap();
    assert!(wait_until(|| !proxy.is_dirty()).await, "never reported clean");

    proxy.close().await.unwrap();
}

#[tokio::test]
async fn watch_indexes_new_files() {
    let tmp = TempDir::new().unwrap();
    write(&tmp.path().join("ws/MEMORY.md"), "root memory");

    let proxy = WorkerProxy::spawn(resolved(
        tmp.path(),
        json!({ "sync": { "watch": true, "watchDebounceMs": 100 } }),
    ))
    .unwrap();
    proxy.sync(SyncOptions::default()).await.unwrap();

    write(
        &tmp.path().join("ws/memory/2026-03-01.md"),
        "Picked the postgres connection pooler.",
    );

    let indexed = timeout(DEADLINE, async {
        loop {
            if proxy.status().await.unwrap().files == 2 {
                break;
            }
            sleep(Duration::from_millis(50)).await;
        }
    })
    .await;
    assert!(indexed.is_ok(), "watched file was never indexed");

    proxy.close().await.unwrap();
}

#[tokio::test]
async fn close_is_idempotent_and_rejects_later_calls() {
    let tmp = TempDir::new().unwrap();
    let proxy = WorkerProxy::spawn(resolved(tmp.path(), quiet())).unwrap();
    proxy.wait_ready().await.unwrap();

    proxy.close().await.unwrap();
    proxy.close().await.unwrap();
    assert_eq!(proxy.state(), WorkerState::Closed);

    let err = timeout(DEADLINE, proxy.search("anything", Default::default()))
        .await
        .unwrap()
        .unwrap_err();
    assert!(matches!(err, MemoryError::WorkerClosed));
}

#[tokio::test]
async fn init_failure_reaches_pending_and_later_calls() {
    let tmp = TempDir::new().unwrap();
    let proxy = WorkerProxy::spawn(resolved(
        tmp.path(),
        json!({ "model": "missing-model", "fallback": "none" }),
    ))
    .unwrap();

    // Issued before the host has reported anything.
    let in_flight = timeout(DEADLINE, proxy.search("query", Default::default()))
        .await
        .expect("in-flight request hung")
        .unwrap_err();
    assert!(matches!(in_flight, MemoryError::WorkerInit(_)), "{in_flight}");

    let ready = timeout(DEADLINE, proxy.wait_ready()).await.unwrap();
    assert!(matches!(ready, Err(MemoryError::WorkerInit(_))));

    let later = timeout(DEADLINE, proxy.status())
        .await
        .expect("later request hung")
        .unwrap_err();
    assert!(matches!(later, MemoryError::WorkerInit(_)));
    assert_eq!(proxy.state(), WorkerState::Failed);

    proxy.close().await.unwrap();
}

#[tokio::test]
async fn per_request_errors_keep_host_alive() {
    let tmp = TempDir::new().unwrap();
    let proxy = WorkerProxy::spawn(resolved(tmp.path(), quiet())).unwrap();
    proxy.wait_ready().await.unwrap();

    // A memory file that is not UTF-8 fails its sync request only.
    write(&tmp.path().join("ws/MEMORY.md"), "fine");
    std::fs::create_dir_all(tmp.path().join("ws/memory")).unwrap();
    std::fs::write(tmp.path().join("ws/memory/broken.md"), [0xff, 0xfe, 0xfd]).unwrap();

    let err = proxy.sync(SyncOptions::default()).await.unwrap_err();
    assert!(matches!(err, MemoryError::Worker(ref m) if m.contains("sync incomplete")));

    let status = proxy.status().await.unwrap();
    assert_eq!(status.files, 1);

    proxy.close().await.unwrap();
}
