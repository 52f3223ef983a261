//! Worker host: a dedicated thread that owns one [`MemoryIndexManager`].
//!
//! The store connection and embedding provider never leave this thread.
//! Requests arrive over an unbounded channel and are handled one at a time
//! on a current-thread runtime; background ticks poll the dirty flag, watch
//! the source files, and run periodic syncs in between.

use std::thread::JoinHandle;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::{interval, interval_at, Instant, Interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::config::{ResolvedConfig, DIRTY_POLL_INTERVAL_MS};
use crate::memory::error::MemoryResult;
use crate::memory::manager::MemoryIndexManager;
use crate::memory::types::{SyncOptions, SyncReason};

use super::protocol::{WorkerMessage, WorkerRequest};

/// Start the host thread for `config`.
pub(crate) fn spawn_host(
    config: ResolvedConfig,
    requests: mpsc::UnboundedReceiver<WorkerRequest>,
    messages: mpsc::UnboundedSender<WorkerMessage>,
) -> std::io::Result<JoinHandle<()>> {
    let name = format!("memory-worker-{}", config.key());
    std::thread::Builder::new().name(name).spawn(move || {
        let runtime = match tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
        {
            Ok(runtime) => runtime,
            Err(e) => {
                error!(error = %e, "failed to build memory worker runtime");
                let _ = messages.send(WorkerMessage::fatal(format!("runtime: {e}")));
                return;
            }
        };
        runtime.block_on(run_host(config, requests, messages));
    })
}

async fn run_host(
    config: ResolvedConfig,
    mut requests: mpsc::UnboundedReceiver<WorkerRequest>,
    messages: mpsc::UnboundedSender<WorkerMessage>,
) {
    let key = config.key();
    let mut manager = match MemoryIndexManager::open(config) {
        Ok(manager) => manager,
        Err(e) => {
            error!(key = %key, error = %e, "memory worker failed to initialise");
            let _ = messages.send(WorkerMessage::fatal(e.to_string()));
            return;
        }
    };
    let _ = messages.send(WorkerMessage::Ready);
    info!(key = %key, "memory worker ready");

    let policy = *manager.sync_policy();
    let mut dirty_tick = interval(Duration::from_millis(DIRTY_POLL_INTERVAL_MS));
    dirty_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut watch_tick = policy.watch.then(|| delayed_interval(policy.watch_debounce));
    let mut sync_tick = policy.interval.map(delayed_interval);
    let mut last_dirty: Option<bool> = None;

    loop {
        tokio::select! {
            request = requests.recv() => {
                let Some(request) = request else {
                    debug!(key = %key, "memory proxy dropped, stopping worker");
                    break;
                };
                if let WorkerRequest::Close { id } = request {
                    drop(manager);
                    let _ = messages.send(WorkerMessage::result(id, Value::Null));
                    info!(key = %key, "memory worker closed");
                    return;
                }

                let follow_up = matches!(request, WorkerRequest::Search { .. });
                let reply = handle_request(&mut manager, request).await;
                if messages.send(reply).is_err() {
                    break;
                }
                if follow_up && manager.is_dirty() {
                    background_sync(&mut manager, SyncReason::Search).await;
                }
            }
            _ = tick_opt(&mut watch_tick) => {
                match manager.poll_changes() {
                    Ok(true) => background_sync(&mut manager, SyncReason::Watch).await,
                    Ok(false) => {}
                    Err(e) => warn!(key = %key, error = %e, "watch poll failed"),
                }
            }
            _ = tick_opt(&mut sync_tick) => {
                background_sync(&mut manager, SyncReason::Interval).await;
            }
            _ = dirty_tick.tick() => {
                let dirty = manager.is_dirty();
                if last_dirty != Some(dirty) {
                    last_dirty = Some(dirty);
                    if messages.send(WorkerMessage::Dirty { value: dirty }).is_err() {
                        break;
                    }
                }
            }
        }
    }
    info!(key = %key, "memory worker stopped");
}

async fn handle_request(manager: &mut MemoryIndexManager, request: WorkerRequest) -> WorkerMessage {
    let id = request.id().to_string();
    let kind = request.kind();

    let outcome: MemoryResult<Value> = match request {
        WorkerRequest::Search { query, options, .. } => manager
            .search(&query, &options)
            .await
            .and_then(|results| Ok(serde_json::to_value(results)?)),
        WorkerRequest::Sync { options, .. } => manager
            .sync(options)
            .await
            .and_then(|report| Ok(serde_json::to_value(report)?)),
        WorkerRequest::SyncDirty { .. } => manager
            .sync_dirty()
            .await
            .and_then(|report| Ok(serde_json::to_value(report)?)),
        WorkerRequest::Status { .. } => manager
            .status()
            .and_then(|status| Ok(serde_json::to_value(status)?)),
        WorkerRequest::Close { .. } => Ok(Value::Null),
    };

    match outcome {
        Ok(data) => WorkerMessage::result(id, data),
        Err(e) => {
            warn!(request = kind, error = %e, "memory worker request failed");
            WorkerMessage::error(id, e.to_string())
        }
    }
}

async fn background_sync(manager: &mut MemoryIndexManager, reason: SyncReason) {
    match manager.sync(SyncOptions::reason(reason)).await {
        Ok(report) if report.skipped => {}
        Ok(report) => debug!(
            ?reason,
            indexed = report.files_indexed,
            "background sync finished"
        ),
        Err(e) => warn!(?reason, error = %e, "background sync failed"),
    }
}

/// An interval whose first tick fires one `period` from now.
fn delayed_interval(period: Duration) -> Interval {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

async fn tick_opt(ticker: &mut Option<Interval>) -> Instant {
    match ticker {
        Some(ticker) => ticker.tick().await,
        None => std::future::pending().await,
    }
}
