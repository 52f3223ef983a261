//! Integration tests for the process-wide manager registry.
//!
//! Every test uses its own agent ids: the registry is global to the test
//! binary and each test runs on its own runtime.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tempfile::TempDir;

use mylobster_memory::config::Config;
use mylobster_memory::memory::{
    self, get_memory_search_manager, Closable, MemorySearchManager, SyncOptions, Syncable,
};

fn config(root: &Path, value: serde_json::Value) -> Config {
    let mut config: Config = serde_json::from_value(value).unwrap();
    config.state_dir = root.to_path_buf();
    config
}

#[tokio::test]
async fn repeated_lookups_share_one_manager() {
    let tmp = TempDir::new().unwrap();
    let cfg = config(
        tmp.path(),
        json!({ "memorySearch": { "sync": { "watch": false } } }),
    );

    let first = get_memory_search_manager(&cfg, "registry-a").unwrap().unwrap();
    let second = get_memory_search_manager(&cfg, "registry-a").unwrap().unwrap();
    assert!(Arc::ptr_eq(&first, &second));

    let other = get_memory_search_manager(&cfg, "registry-b").unwrap().unwrap();
    assert!(!Arc::ptr_eq(&first, &other));

    for manager in [first, other] {
        manager.as_closable().unwrap().close().await.unwrap();
    }
}

#[tokio::test]
async fn all_agents_scope_uses_shared_key() {
    let tmp = TempDir::new().unwrap();
    let cfg = config(
        tmp.path(),
        json!({
            "agents": { "list": [{ "id": "shared-x" }, { "id": "shared-y" }] },
            "memorySearch": { "scope": "all", "sync": { "watch": false } }
        }),
    );

    let x = get_memory_search_manager(&cfg, "shared-x").unwrap().unwrap();
    let y = get_memory_search_manager(&cfg, "shared-y").unwrap().unwrap();
    assert!(Arc::ptr_eq(&x, &y));
    assert_eq!(x.status().await.unwrap().key, "all-agents");

    x.as_closable().unwrap().close().await.unwrap();
}

#[tokio::test]
async fn disabled_memory_search_has_no_manager() {
    let tmp = TempDir::new().unwrap();
    let cfg = config(tmp.path(), json!({ "memorySearch": { "enabled": false } }));

    assert!(get_memory_search_manager(&cfg, "registry-off").unwrap().is_none());
    let results = memory::search(&cfg, "registry-off", "anything", Default::default())
        .await
        .unwrap();
    assert!(results.is_empty());
}

#[tokio::test]
async fn capabilities_are_discoverable() {
    let tmp = TempDir::new().unwrap();
    let workspace = tmp.path().join("workspace-registry-caps");
    std::fs::create_dir_all(&workspace).unwrap();
    std::fs::write(workspace.join("MEMORY.md"), "Ferris is the project mascot.").unwrap();

    let cfg = config(
        tmp.path(),
        json!({ "memorySearch": { "sync": { "watch": false, "onSearch": false } } }),
    );
    let manager = get_memory_search_manager(&cfg, "registry-caps")
        .unwrap()
        .unwrap();

    let report = manager
        .as_syncable()
        .expect("worker managers sync")
        .sync(SyncOptions::default())
        .await
        .unwrap();
    assert_eq!(report.files_indexed, 1);
    assert!(manager.as_dirty_observable().is_some());

    let results = memory::search(
        &cfg,
        "registry-caps",
        "project mascot",
        memory::MemorySearchOptions {
            min_score: Some(0.0),
            ..Default::default()
        },
    )
    .await
    .unwrap();
    assert_eq!(results[0].agent_id, "registry-caps");

    manager.as_closable().unwrap().close().await.unwrap();
}

#[tokio::test]
async fn lookup_after_close_starts_fresh_manager() {
    let tmp = TempDir::new().unwrap();
    let cfg = config(
        tmp.path(),
        json!({ "memorySearch": { "sync": { "watch": false } } }),
    );

    let first = get_memory_search_manager(&cfg, "registry-reopen")
        .unwrap()
        .unwrap();
    first.as_closable().unwrap().close().await.unwrap();

    let second = get_memory_search_manager(&cfg, "registry-reopen")
        .unwrap()
        .unwrap();
    assert!(!Arc::ptr_eq(&first, &second));
    let results = second.search("anything", Default::default()).await.unwrap();
    assert!(results.is_empty());

    // A live instance is still shared.
    let third = get_memory_search_manager(&cfg, "registry-reopen")
        .unwrap()
        .unwrap();
    assert!(Arc::ptr_eq(&second, &third));

    second.as_closable().unwrap().close().await.unwrap();
}

#[test]
fn manager_outlives_the_runtime_that_created_it() {
    let tmp = TempDir::new().unwrap();
    let workspace = tmp.path().join("workspace-registry-runtimes");
    std::fs::create_dir_all(&workspace).unwrap();
    std::fs::write(workspace.join("MEMORY.md"), "The release train leaves on Fridays.").unwrap();
    let cfg = config(
        tmp.path(),
        json!({ "memorySearch": { "sync": { "watch": false } } }),
    );
    let options = || memory::MemorySearchOptions {
        min_score: Some(0.0),
        ..Default::default()
    };

    // Lookups do not need a runtime.
    let created = get_memory_search_manager(&cfg, "registry-runtimes")
        .unwrap()
        .unwrap();

    let first = tokio::runtime::Runtime::new().unwrap();
    first.block_on(async {
        created
            .as_syncable()
            .unwrap()
            .sync(SyncOptions::default())
            .await
            .unwrap();
        let results = created.search("release train", options()).await.unwrap();
        assert_eq!(results.len(), 1);
    });
    drop(first);

    let second = tokio::runtime::Runtime::new().unwrap();
    second.block_on(async {
        let manager = get_memory_search_manager(&cfg, "registry-runtimes")
            .unwrap()
            .unwrap();
        assert!(Arc::ptr_eq(&created, &manager));

        let results = tokio::time::timeout(
            Duration::from_secs(5),
            manager.search("release train", options()),
        )
        .await
        .expect("search answered after the first runtime was dropped")
        .unwrap();
        assert_eq!(results[0].path, "MEMORY.md");

        manager.as_closable().unwrap().close().await.unwrap();
    });
}
