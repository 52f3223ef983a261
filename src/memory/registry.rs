//! Process-wide registry of live memory managers.
//!
//! Populated lazily on first lookup per key, shared by concurrent lookups,
//! and torn down by [`close_all_memory_search_managers`]. An instance closed
//! through its own handle is replaced on the next lookup.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::join_all;
use once_cell::sync::Lazy;
use tracing::{info, warn};

use crate::config::{resolve_memory_search_config, Config};

use super::error::MemoryResult;
use super::types::MemorySearchManager;
use super::worker::{WorkerProxy, WorkerState};

static MANAGERS: Lazy<DashMap<String, Arc<WorkerProxy>>> = Lazy::new(DashMap::new);

/// Return the manager serving `agent_id`, starting one if needed.
///
/// Returns `Ok(None)` when memory search is disabled. Agents that share a
/// scope (`scope: all`) share one manager.
pub fn get_memory_search_manager(
    config: &Config,
    agent_id: &str,
) -> MemoryResult<Option<Arc<dyn MemorySearchManager>>> {
    let Some(resolved) = resolve_memory_search_config(config, agent_id)? else {
        return Ok(None);
    };

    let proxy = match MANAGERS.entry(resolved.key()) {
        Entry::Occupied(mut entry) => {
            if is_live(entry.get()) {
                Arc::clone(entry.get())
            } else {
                // Closed through its own handle; start a fresh one.
                let proxy = Arc::new(WorkerProxy::spawn(resolved)?);
                entry.insert(Arc::clone(&proxy));
                info!(key = %entry.key(), "memory manager restarted after close");
                proxy
            }
        }
        Entry::Vacant(entry) => {
            let key = entry.key().clone();
            let proxy = Arc::new(WorkerProxy::spawn(resolved)?);
            entry.insert(Arc::clone(&proxy));
            info!(key = %key, "memory manager registered");
            proxy
        }
    };
    Ok(Some(proxy))
}

/// Failed instances stay registered so their init error keeps surfacing.
fn is_live(proxy: &WorkerProxy) -> bool {
    !matches!(proxy.state(), WorkerState::Closing | WorkerState::Closed)
}

/// Number of live managers.
pub fn active_manager_count() -> usize {
    MANAGERS.len()
}

/// Drain the registry and close every manager.
pub async fn close_all_memory_search_managers() {
    let keys: Vec<String> = MANAGERS.iter().map(|entry| entry.key().clone()).collect();
    let proxies: Vec<Arc<WorkerProxy>> = keys
        .iter()
        .filter_map(|key| MANAGERS.remove(key).map(|(_, proxy)| proxy))
        .collect();

    let outcomes = join_all(proxies.iter().map(|proxy| proxy.close())).await;
    for (proxy, outcome) in proxies.iter().zip(outcomes) {
        if let Err(e) = outcome {
            warn!(key = %proxy.key(), error = %e, "failed to close memory manager");
        }
    }
}
