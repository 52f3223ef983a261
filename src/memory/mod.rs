mod cache;
mod chunking;
mod embeddings;
mod error;
mod files;
mod hybrid;
mod indexer;
mod manager;
mod registry;
mod schema;
mod search;
mod sessions;
mod store;
mod types;
mod worker;

pub use cache::{CacheScope, EmbeddingCache};
pub use chunking::{chunk_text, TextChunk};
pub use embeddings::{
    create_provider, EmbeddingProvider, EmbeddingProviderBox, HashEmbeddingProvider,
};
pub use error::{MemoryError, MemoryResult};
pub use manager::MemoryIndexManager;
pub use registry::{
    active_manager_count, close_all_memory_search_managers, get_memory_search_manager,
};
pub use schema::{CapabilityStatus, SchemaStatus};
pub use search::{MemorySearchOptions, MemorySearchResult, SearchMode};
pub use sessions::{should_flush, SessionDelta};
pub use store::{ChunkRecord, FileRecord, MemoryStore, StoreHit};
pub use types::{
    Closable, DirtyObservable, IndexStatus, MemorySearchManager, SyncFailure, SyncOptions,
    SyncReason, SyncReport, Syncable,
};
pub use worker::{WorkerMessage, WorkerProxy, WorkerRequest, WorkerState};

use crate::config::Config;

/// Search memory for content relevant to `query`.
///
/// Looks up (or starts) the manager serving `agent_id` and delegates to it.
/// Returns no results when memory search is disabled.
pub async fn search(
    config: &Config,
    agent_id: &str,
    query: &str,
    options: MemorySearchOptions,
) -> MemoryResult<Vec<MemorySearchResult>> {
    match get_memory_search_manager(config, agent_id)? {
        Some(manager) => manager.search(query, options).await,
        None => Ok(Vec::new()),
    }
}
