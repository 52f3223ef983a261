use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::ResolvedConfig;
use crate::memory::error::{MemoryError, MemoryResult};
use crate::memory::search::{MemorySearchOptions, MemorySearchResult};
use crate::memory::types::{
    Closable, DirtyObservable, IndexStatus, MemorySearchManager, SyncOptions, SyncReport, Syncable,
};

use super::host::spawn_host;
use super::protocol::{WorkerMessage, WorkerRequest};

/// Lifecycle of a worker host as seen from its proxy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// Host thread started, `ready` not yet received.
    Initializing,
    /// Host is serving requests.
    Ready,
    /// Host failed to initialise and terminated.
    Failed,
    Closing,
    Closed,
}

type PendingMap = HashMap<String, oneshot::Sender<MemoryResult<Value>>>;

struct ProxyInner {
    state: WorkerState,
    init_error: Option<String>,
    pending: PendingMap,
    requests: Option<mpsc::UnboundedSender<WorkerRequest>>,
    threads: Vec<JoinHandle<()>>,
    state_tx: watch::Sender<WorkerState>,
}

impl ProxyInner {
    fn set_state(&mut self, state: WorkerState) {
        self.state = state;
        let _ = self.state_tx.send(state);
    }

    fn closed_error(&self) -> MemoryError {
        match &self.init_error {
            Some(message) => MemoryError::WorkerInit(message.clone()),
            None => MemoryError::WorkerClosed,
        }
    }

    /// Register a pending request and hand it to the host.
    fn submit(&mut self, request: WorkerRequest) -> MemoryResult<oneshot::Receiver<MemoryResult<Value>>> {
        let Some(sender) = self.requests.clone() else {
            return Err(self.closed_error());
        };
        let (tx, rx) = oneshot::channel();
        self.pending.insert(request.id().to_string(), tx);
        // A failed send means the host is exiting; the dispatcher resolves
        // the pending entry once the host's message channel closes.
        let _ = sender.send(request);
        Ok(rx)
    }
}

/// Caller-side handle to a worker host.
///
/// Every operation is a correlated request/response round trip, except
/// [`WorkerProxy::is_dirty`], which answers from the last `dirty`
/// notification.
pub struct WorkerProxy {
    key: String,
    inner: Arc<Mutex<ProxyInner>>,
    dirty: Arc<AtomicBool>,
    state_rx: watch::Receiver<WorkerState>,
}

impl WorkerProxy {
    /// Start a worker host for `config`.
    ///
    /// The host and the response dispatcher each run on a thread owned by
    /// the proxy, so the proxy keeps working after the runtime that created
    /// it is gone, and can be created outside any runtime.
    pub fn spawn(config: ResolvedConfig) -> MemoryResult<Self> {
        let key = config.key();
        let (request_tx, request_rx) = mpsc::unbounded_channel();
        let (message_tx, message_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(WorkerState::Initializing);

        let inner = Arc::new(Mutex::new(ProxyInner {
            state: WorkerState::Initializing,
            init_error: None,
            pending: HashMap::new(),
            requests: Some(request_tx),
            threads: Vec::new(),
            state_tx,
        }));
        let dirty = Arc::new(AtomicBool::new(false));

        let dispatcher = {
            let key = key.clone();
            let inner = Arc::clone(&inner);
            let dirty = Arc::clone(&dirty);
            std::thread::Builder::new()
                .name(format!("memory-dispatch-{key}"))
                .spawn(move || dispatch(&key, message_rx, &inner, &dirty))?
        };
        // Without a host the dispatcher sees its channel close at once and
        // marks the proxy closed.
        let host = spawn_host(config, request_rx, message_tx)?;
        inner.lock().threads.extend([host, dispatcher]);
        debug!(key = %key, "memory worker spawned");

        Ok(Self {
            key,
            inner,
            dirty,
            state_rx,
        })
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn state(&self) -> WorkerState {
        self.inner.lock().state
    }

    /// Wait until the host reports ready, or surface its init failure.
    pub async fn wait_ready(&self) -> MemoryResult<()> {
        let mut rx = self.state_rx.clone();
        let state = *rx
            .wait_for(|s| *s != WorkerState::Initializing)
            .await
            .map_err(|_| MemoryError::WorkerClosed)?;
        match state {
            WorkerState::Ready => Ok(()),
            WorkerState::Failed => Err(self.inner.lock().closed_error()),
            _ => Err(MemoryError::WorkerClosed),
        }
    }

    async fn request<F>(&self, build: F) -> MemoryResult<Value>
    where
        F: FnOnce(String) -> WorkerRequest + Send,
    {
        let rx = {
            let mut inner = self.inner.lock();
            match inner.state {
                WorkerState::Failed | WorkerState::Closing | WorkerState::Closed => {
                    return Err(inner.closed_error());
                }
                WorkerState::Initializing | WorkerState::Ready => {}
            }
            inner.submit(build(Uuid::new_v4().to_string()))?
        };
        rx.await.map_err(|_| MemoryError::WorkerClosed)?
    }

    /// Last dirty value reported by the host.
    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::SeqCst)
    }

    pub async fn search(
        &self,
        query: &str,
        options: MemorySearchOptions,
    ) -> MemoryResult<Vec<MemorySearchResult>> {
        let query = query.to_string();
        let data = self
            .request(|id| WorkerRequest::Search { id, query, options })
            .await?;
        Ok(serde_json::from_value(data)?)
    }

    pub async fn sync(&self, options: SyncOptions) -> MemoryResult<SyncReport> {
        let data = self
            .request(|id| WorkerRequest::Sync { id, options })
            .await?;
        Ok(serde_json::from_value(data)?)
    }

    pub async fn sync_dirty(&self) -> MemoryResult<SyncReport> {
        let data = self.request(|id| WorkerRequest::SyncDirty { id }).await?;
        Ok(serde_json::from_value(data)?)
    }

    pub async fn status(&self) -> MemoryResult<IndexStatus> {
        let data = self.request(|id| WorkerRequest::Status { id }).await?;
        Ok(serde_json::from_value(data)?)
    }

    /// Close the host and wait for its thread to exit. Idempotent.
    pub async fn close(&self) -> MemoryResult<()> {
        let (reply, threads) = {
            let mut inner = self.inner.lock();
            match inner.state {
                WorkerState::Closing | WorkerState::Closed => return Ok(()),
                WorkerState::Failed => {
                    inner.requests = None;
                    (None, std::mem::take(&mut inner.threads))
                }
                WorkerState::Initializing | WorkerState::Ready => {
                    inner.set_state(WorkerState::Closing);
                    let id = Uuid::new_v4().to_string();
                    let reply = inner.submit(WorkerRequest::Close { id }).ok();
                    // Close is the last request the host reads.
                    inner.requests = None;
                    (reply, std::mem::take(&mut inner.threads))
                }
            }
        };

        if let Some(reply) = reply {
            // The host may already be gone; either outcome means closed.
            let _ = reply.await;
        }
        if !threads.is_empty() {
            let joined = tokio::task::spawn_blocking(move || {
                threads.into_iter().all(|handle| handle.join().is_ok())
            })
            .await;
            if !matches!(joined, Ok(true)) {
                warn!(key = %self.key, "memory worker threads did not join cleanly");
            }
        }

        let mut inner = self.inner.lock();
        inner.requests = None;
        if inner.state != WorkerState::Failed {
            inner.set_state(WorkerState::Closed);
        }
        info!(key = %self.key, "memory manager closed");
        Ok(())
    }
}

impl Drop for WorkerProxy {
    fn drop(&mut self) {
        let mut inner = self.inner.lock();
        if matches!(inner.state, WorkerState::Initializing | WorkerState::Ready) {
            if let Some(sender) = inner.requests.take() {
                let _ = sender.send(WorkerRequest::Close {
                    id: Uuid::new_v4().to_string(),
                });
            }
            inner.set_state(WorkerState::Closing);
        }
    }
}

/// Route host messages to pending requests until the host exits. Runs on
/// its own thread.
fn dispatch(
    key: &str,
    mut messages: mpsc::UnboundedReceiver<WorkerMessage>,
    inner: &Mutex<ProxyInner>,
    dirty: &AtomicBool,
) {
    while let Some(message) = messages.blocking_recv() {
        match message {
            WorkerMessage::Ready => {
                let mut inner = inner.lock();
                if inner.state == WorkerState::Initializing {
                    inner.set_state(WorkerState::Ready);
                }
            }
            WorkerMessage::Result { id, data } => {
                let waiter = inner.lock().pending.remove(&id);
                match waiter {
                    Some(tx) => {
                        let _ = tx.send(Ok(data));
                    }
                    None => debug!(key = %key, id = %id, "dropping result for unknown request"),
                }
            }
            WorkerMessage::Error {
                id: Some(id),
                message,
            } => {
                let waiter = inner.lock().pending.remove(&id);
                if let Some(tx) = waiter {
                    let _ = tx.send(Err(MemoryError::Worker(message)));
                }
            }
            WorkerMessage::Error { id: None, message } => {
                warn!(key = %key, error = %message, "memory worker failed to start");
                let mut inner = inner.lock();
                inner.init_error = Some(message.clone());
                inner.set_state(WorkerState::Failed);
                for (_, tx) in inner.pending.drain() {
                    let _ = tx.send(Err(MemoryError::WorkerInit(message.clone())));
                }
            }
            WorkerMessage::Dirty { value } => {
                let previous = dirty.swap(value, Ordering::SeqCst);
                if previous != value {
                    debug!(key = %key, dirty = value, "memory dirty state changed");
                }
            }
        }
    }

    // Host exited: nothing can answer what is still pending.
    let mut inner = inner.lock();
    inner.requests = None;
    let pending: Vec<_> = inner.pending.drain().collect();
    for (_, tx) in pending {
        let _ = tx.send(Err(inner.closed_error()));
    }
    if matches!(inner.state, WorkerState::Initializing | WorkerState::Ready) {
        inner.set_state(WorkerState::Closed);
    }
    debug!(key = %key, "memory worker dispatcher stopped");
}

// ---------------------------------------------------------------------------
// Capabilities
// ---------------------------------------------------------------------------

#[async_trait]
impl MemorySearchManager for WorkerProxy {
    async fn search(
        &self,
        query: &str,
        options: MemorySearchOptions,
    ) -> MemoryResult<Vec<MemorySearchResult>> {
        WorkerProxy::search(self, query, options).await
    }

    async fn status(&self) -> MemoryResult<IndexStatus> {
        WorkerProxy::status(self).await
    }

    fn as_syncable(&self) -> Option<&dyn Syncable> {
        Some(self)
    }

    fn as_dirty_observable(&self) -> Option<&dyn DirtyObservable> {
        Some(self)
    }

    fn as_closable(&self) -> Option<&dyn Closable> {
        Some(self)
    }
}

#[async_trait]
impl Syncable for WorkerProxy {
    async fn sync(&self, options: SyncOptions) -> MemoryResult<SyncReport> {
        WorkerProxy::sync(self, options).await
    }

    async fn sync_dirty(&self) -> MemoryResult<SyncReport> {
        WorkerProxy::sync_dirty(self).await
    }
}

impl DirtyObservable for WorkerProxy {
    fn is_dirty(&self) -> bool {
        WorkerProxy::is_dirty(self)
    }
}

#[async_trait]
impl Closable for WorkerProxy {
    async fn close(&self) -> MemoryResult<()> {
        WorkerProxy::close(self).await
    }
}
