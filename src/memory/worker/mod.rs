//! Worker isolation for memory managers.
//!
//! Each manager key gets one host thread that owns the store and embedding
//! provider, and one [`WorkerProxy`] that talks to it over typed channels.

mod host;
mod protocol;
mod proxy;

pub use protocol::{WorkerMessage, WorkerRequest};
pub use proxy::{WorkerProxy, WorkerState};
