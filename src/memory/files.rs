//! Discovery and loading of indexable files.
//!
//! Memory files are `MEMORY.md` / `memory.md` at the workspace root, every
//! `*.md` below `memory/`, and any configured extra paths. Session files are
//! `*.jsonl` transcripts in an agent's sessions directory. Symlinks are
//! never followed.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use serde_json::Value;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::config::MemorySource;

use super::chunking::hash_text;
use super::error::MemoryResult;

/// A file loaded for indexing.
#[derive(Debug, Clone)]
pub struct MemoryFileEntry {
    /// Stable key stored in the index (workspace-relative when possible).
    pub path: String,
    pub abs_path: PathBuf,
    pub agent_id: String,
    pub source: MemorySource,
    /// Hash of the raw file contents.
    pub hash: String,
    pub mtime_ms: i64,
    pub size: i64,
    /// Text that gets chunked. For transcripts this is the extracted
    /// conversation, not the raw JSONL.
    pub content: String,
}

/// Cheap change detector used by the watch loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStamp {
    pub mtime_ms: i64,
    pub size: u64,
}

pub fn file_stamp(path: &Path) -> Option<FileStamp> {
    let meta = std::fs::symlink_metadata(path).ok()?;
    if !meta.is_file() {
        return None;
    }
    Some(FileStamp {
        mtime_ms: mtime_ms(&meta),
        size: meta.len(),
    })
}

fn mtime_ms(meta: &std::fs::Metadata) -> i64 {
    meta.modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

fn is_markdown(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("md"))
}

fn is_regular_file(path: &Path) -> bool {
    std::fs::symlink_metadata(path)
        .map(|m| m.file_type().is_file())
        .unwrap_or(false)
}

fn walk_markdown(root: &Path, out: &mut Vec<PathBuf>) {
    for entry in WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
    {
        if entry.file_type().is_file() && is_markdown(entry.path()) {
            out.push(entry.into_path());
        }
    }
}

/// List memory files for one workspace plus the configured extra paths.
/// Missing directories simply contribute nothing.
pub fn list_memory_files(workspace: &Path, extra_paths: &[PathBuf]) -> Vec<PathBuf> {
    let mut files = Vec::new();

    for name in ["MEMORY.md", "memory.md"] {
        let candidate = workspace.join(name);
        if is_regular_file(&candidate) {
            files.push(candidate);
        }
    }

    let memory_dir = workspace.join("memory");
    if std::fs::symlink_metadata(&memory_dir).is_ok_and(|m| m.is_dir()) {
        walk_markdown(&memory_dir, &mut files);
    }

    for extra in extra_paths {
        let extra = if extra.is_absolute() {
            extra.clone()
        } else {
            workspace.join(extra)
        };
        match std::fs::symlink_metadata(&extra) {
            Ok(meta) if meta.is_dir() => walk_markdown(&extra, &mut files),
            Ok(meta) if meta.is_file() && is_markdown(&extra) => files.push(extra),
            Ok(_) => debug!(path = %extra.display(), "skipping non-markdown extra path"),
            Err(_) => debug!(path = %extra.display(), "extra path does not exist"),
        }
    }

    // MEMORY.md and memory.md are the same file on case-insensitive
    // filesystems; extra paths may also overlap the workspace.
    let mut seen = HashSet::new();
    files.retain(|p| {
        let key = std::fs::canonicalize(p).unwrap_or_else(|_| p.clone());
        seen.insert(key)
    });
    files
}

/// List `*.jsonl` transcripts directly inside `sessions_dir`.
pub fn list_session_files(sessions_dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = std::fs::read_dir(sessions_dir) else {
        return Vec::new();
    };
    let mut files: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().map(|t| t.is_file()).unwrap_or(false))
        .map(|e| e.path())
        .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("jsonl"))
        .collect();
    files.sort();
    files
}

/// Index key for a file: workspace-relative with forward slashes, or the
/// absolute path for files outside the workspace.
pub fn memory_path_key(workspace: &Path, abs: &Path) -> String {
    match abs.strip_prefix(workspace) {
        Ok(rel) => rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/"),
        Err(_) => abs.to_string_lossy().into_owned(),
    }
}

pub fn session_path_key(abs: &Path) -> String {
    let name = abs
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    format!("sessions/{name}")
}

/// Read a file and compute its hash and stamp.
pub fn build_file_entry(
    abs_path: &Path,
    path_key: String,
    agent_id: &str,
    source: MemorySource,
) -> MemoryResult<MemoryFileEntry> {
    let meta = std::fs::metadata(abs_path)?;
    let raw = match source {
        MemorySource::Memory => std::fs::read_to_string(abs_path)?,
        // Transcripts are append-only logs; one bad byte must not block the rest.
        MemorySource::Sessions => String::from_utf8_lossy(&std::fs::read(abs_path)?).into_owned(),
    };
    let hash = hash_text(&raw);
    let content = match source {
        MemorySource::Memory => raw,
        MemorySource::Sessions => extract_session_text(&raw),
    };

    Ok(MemoryFileEntry {
        path: path_key,
        abs_path: abs_path.to_path_buf(),
        agent_id: agent_id.to_string(),
        source,
        hash,
        mtime_ms: mtime_ms(&meta),
        size: meta.len() as i64,
        content,
    })
}

/// Flatten a JSONL transcript into `Role: text` lines.
///
/// Only `{"type":"message"}` records from the user or assistant are kept.
/// Content may be a plain string or an array of `{"type":"text"}` parts.
/// Malformed lines are skipped.
pub fn extract_session_text(raw: &str) -> String {
    let mut out = Vec::new();
    for (idx, line) in raw.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let record: Value = match serde_json::from_str(line) {
            Ok(v) => v,
            Err(e) => {
                warn!(line = idx + 1, error = %e, "skipping malformed transcript line");
                continue;
            }
        };
        if record.get("type").and_then(Value::as_str) != Some("message") {
            continue;
        }
        let message = record.get("message").unwrap_or(&record);
        let label = match message.get("role").and_then(Value::as_str) {
            Some("user") => "User",
            Some("assistant") => "Assistant",
            _ => continue,
        };
        let text = message_text(message.get("content"));
        let text = text.split_whitespace().collect::<Vec<_>>().join(" ");
        if !text.is_empty() {
            out.push(format!("{label}: {text}"));
        }
    }
    out.join("\n")
}

fn message_text(content: Option<&Value>) -> String {
    match content {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Array(parts)) => parts
            .iter()
            .filter(|p| p.get("type").and_then(Value::as_str) == Some("text"))
            .filter_map(|p| p.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join(" "),
        _ => String::new(),
    }
}
