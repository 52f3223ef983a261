//! Local hybrid search over agent memory files and session transcripts.

pub mod config;
pub mod logging;
pub mod memory;
