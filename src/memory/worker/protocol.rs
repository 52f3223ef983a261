use serde::{Deserialize, Serialize};

use crate::memory::search::MemorySearchOptions;
use crate::memory::types::SyncOptions;

// ============================================================================
// Worker wire protocol
// ============================================================================
//
// Requests carry a caller-generated correlation id. The host answers each
// one with exactly one `result` or `error` carrying the same id, in any
// order. `ready` and `dirty` are unsolicited.

/// Request sent from the proxy to the worker host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum WorkerRequest {
    Search {
        id: String,
        query: String,
        #[serde(default)]
        options: MemorySearchOptions,
    },
    Sync {
        id: String,
        #[serde(default)]
        options: SyncOptions,
    },
    SyncDirty {
        id: String,
    },
    Status {
        id: String,
    },
    Close {
        id: String,
    },
}

impl WorkerRequest {
    pub fn id(&self) -> &str {
        match self {
            WorkerRequest::Search { id, .. }
            | WorkerRequest::Sync { id, .. }
            | WorkerRequest::SyncDirty { id }
            | WorkerRequest::Status { id }
            | WorkerRequest::Close { id } => id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            WorkerRequest::Search { .. } => "search",
            WorkerRequest::Sync { .. } => "sync",
            WorkerRequest::SyncDirty { .. } => "syncDirty",
            WorkerRequest::Status { .. } => "status",
            WorkerRequest::Close { .. } => "close",
        }
    }
}

/// Message sent from the worker host to the proxy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum WorkerMessage {
    /// The host finished initialising.
    Ready,
    Result {
        id: String,
        data: serde_json::Value,
    },
    /// Error for one request. Without an id the host failed to initialise
    /// and is terminating.
    Error {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        message: String,
    },
    /// Dirty flag changed.
    Dirty { value: bool },
}

impl WorkerMessage {
    pub fn result(id: impl Into<String>, data: serde_json::Value) -> Self {
        WorkerMessage::Result {
            id: id.into(),
            data,
        }
    }

    pub fn error(id: impl Into<String>, message: impl Into<String>) -> Self {
        WorkerMessage::Error {
            id: Some(id.into()),
            message: message.into(),
        }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        WorkerMessage::Error {
            id: None,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::types::SyncReason;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn requests_are_tagged_by_kind() {
        let request = WorkerRequest::SyncDirty { id: "r1".into() };
        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            json!({ "type": "syncDirty", "id": "r1" })
        );

        let parsed: WorkerRequest = serde_json::from_value(json!({
            "type": "sync",
            "id": "r2",
            "options": { "reason": "compaction" }
        }))
        .unwrap();
        assert_eq!(parsed.id(), "r2");
        assert!(matches!(
            parsed,
            WorkerRequest::Sync { ref options, .. } if options.reason == SyncReason::Compaction
        ));
    }

    #[test]
    fn search_options_default_when_omitted() {
        let parsed: WorkerRequest =
            serde_json::from_value(json!({ "type": "search", "id": "q", "query": "notes" }))
                .unwrap();
        assert_eq!(
            parsed,
            WorkerRequest::Search {
                id: "q".into(),
                query: "notes".into(),
                options: MemorySearchOptions::default(),
            }
        );
    }

    #[test]
    fn outbound_messages_match_wire_shape() {
        assert_eq!(
            serde_json::to_value(WorkerMessage::Ready).unwrap(),
            json!({ "type": "ready" })
        );
        assert_eq!(
            serde_json::to_value(WorkerMessage::Dirty { value: true }).unwrap(),
            json!({ "type": "dirty", "value": true })
        );
        assert_eq!(
            serde_json::to_value(WorkerMessage::fatal("boom")).unwrap(),
            json!({ "type": "error", "message": "boom" })
        );
        assert_eq!(
            serde_json::to_value(WorkerMessage::error("x", "bad")).unwrap(),
            json!({ "type": "error", "id": "x", "message": "bad" })
        );
    }
}
