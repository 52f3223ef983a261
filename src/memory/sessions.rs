//! Session delta tracking.
//!
//! Each transcript has a persisted watermark: the number of lines already
//! consumed into the index. The delta since the watermark decides whether a
//! transcript is worth flushing.

use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::FlushThresholds;

use super::error::MemoryResult;

/// Read access to per-session watermarks.
pub trait WatermarkStore {
    /// Last consumed line for `session_id`, 0 when never flushed.
    fn watermark(&self, session_id: &str) -> MemoryResult<u64>;
}

/// Unflushed growth of one transcript.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionDelta {
    pub session_id: String,
    /// First unconsumed line (0-based).
    pub from_line: u64,
    pub total_lines: u64,
    pub delta_bytes: u64,
    pub delta_messages: u64,
}

impl SessionDelta {
    pub fn is_empty(&self) -> bool {
        self.delta_bytes == 0 && self.delta_messages == 0
    }
}

/// Session id assumed for a transcript before its header is read.
pub fn assumed_session_id(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Compute the delta for the transcript at `path`.
///
/// Invalid UTF-8 is replaced rather than rejected; a damaged byte only
/// spoils the JSONL record it sits in.
pub fn evaluate_delta(path: &Path, store: &dyn WatermarkStore) -> MemoryResult<SessionDelta> {
    let bytes = std::fs::read(path)?;
    let content = String::from_utf8_lossy(&bytes);
    evaluate_delta_in(&content, &assumed_session_id(path), store)
}

/// Compute the delta for transcript `content`.
///
/// The session id starts as `assumed_id`. If the transcript carries a
/// `{"type":"session","id":..}` header naming a different session, the delta
/// is recomputed against that session's watermark, counting no earlier than
/// the header itself.
pub fn evaluate_delta_in(
    content: &str,
    assumed_id: &str,
    store: &dyn WatermarkStore,
) -> MemoryResult<SessionDelta> {
    let lines: Vec<&str> = content.lines().collect();

    let mut observed: Option<(String, usize)> = None;
    for (idx, line) in lines.iter().enumerate() {
        if let Some(id) = session_header_id(line) {
            observed = Some((id, idx));
        }
    }

    let (session_id, floor) = match observed {
        Some((id, idx)) if id != assumed_id => (id, idx as u64),
        _ => (assumed_id.to_string(), 0),
    };

    let watermark = store.watermark(&session_id)?;
    let from_line = watermark.max(floor);

    let mut delta_bytes = 0u64;
    let mut delta_messages = 0u64;
    for line in lines.iter().skip(from_line as usize) {
        delta_bytes += line.len() as u64 + 1;
        if is_message_line(line) {
            delta_messages += 1;
        }
    }

    Ok(SessionDelta {
        session_id,
        from_line,
        total_lines: lines.len() as u64,
        delta_bytes,
        delta_messages,
    })
}

/// True when at least one enabled threshold is met.
pub fn should_flush(delta: &SessionDelta, thresholds: &FlushThresholds) -> bool {
    if !thresholds.is_enabled() {
        return false;
    }
    (thresholds.delta_bytes > 0 && delta.delta_bytes >= thresholds.delta_bytes)
        || (thresholds.delta_messages > 0 && delta.delta_messages >= thresholds.delta_messages)
}

fn session_header_id(line: &str) -> Option<String> {
    if !line.contains("\"session\"") {
        return None;
    }
    let record: Value = serde_json::from_str(line.trim()).ok()?;
    if record.get("type").and_then(Value::as_str) != Some("session") {
        return None;
    }
    record
        .get("id")
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
}

fn is_message_line(line: &str) -> bool {
    if !line.contains("\"message\"") {
        return false;
    }
    serde_json::from_str::<Value>(line.trim())
        .ok()
        .and_then(|v| v.get("type").and_then(Value::as_str).map(|t| t == "message"))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    #[derive(Default)]
    struct Marks(HashMap<String, u64>);

    impl WatermarkStore for Marks {
        fn watermark(&self, session_id: &str) -> MemoryResult<u64> {
            Ok(self.0.get(session_id).copied().unwrap_or(0))
        }
    }

    fn message(text: &str) -> String {
        serde_json::json!({
            "type": "message",
            "message": { "role": "user", "content": text }
        })
        .to_string()
    }

    fn thresholds(bytes: u64, messages: u64) -> FlushThresholds {
        FlushThresholds {
            delta_bytes: bytes,
            delta_messages: messages,
        }
    }

    fn delta(bytes: u64, messages: u64) -> SessionDelta {
        SessionDelta {
            session_id: "s".into(),
            from_line: 0,
            total_lines: 0,
            delta_bytes: bytes,
            delta_messages: messages,
        }
    }

    #[test]
    fn below_both_thresholds_does_not_flush() {
        assert!(!should_flush(&delta(50_000, 40), &thresholds(100_000, 50)));
    }

    #[test]
    fn crossing_message_threshold_flushes() {
        assert!(should_flush(&delta(50_000, 51), &thresholds(100_000, 50)));
        assert!(should_flush(&delta(100_000, 0), &thresholds(100_000, 50)));
    }

    #[test]
    fn disabled_thresholds_never_flush() {
        assert!(!should_flush(&delta(u64::MAX, u64::MAX), &thresholds(0, 0)));
        assert!(should_flush(&delta(0, 7), &thresholds(0, 7)));
    }

    #[test]
    fn normalised_config_values_behave_as_disabled() {
        let t = FlushThresholds::normalized(Some(f64::NAN), Some(-1.0));
        assert!(!should_flush(&delta(1 << 40, 1 << 20), &t));
    }

    #[test]
    fn delta_counts_lines_after_watermark() {
        let lines = vec![
            r#"{"type":"session","id":"abc"}"#.to_string(),
            message("one"),
            message("two"),
            r#"{"type":"custom","data":1}"#.to_string(),
            message("three"),
        ];
        let content = lines.join("\n");

        let mut marks = Marks::default();
        marks.0.insert("abc".into(), 2);

        let d = evaluate_delta_in(&content, "abc", &marks).unwrap();

        let expected_bytes: u64 = lines[2..].iter().map(|l| l.len() as u64 + 1).sum();
        assert_eq!(d.session_id, "abc");
        assert_eq!(d.from_line, 2);
        assert_eq!(d.total_lines, 5);
        assert_eq!(d.delta_messages, 2);
        assert_eq!(d.delta_bytes, expected_bytes);
    }

    #[test]
    fn observed_session_id_switches_watermark() {
        let lines = vec![
            message("old"),
            r#"{"type":"session","id":"new-session"}"#.to_string(),
            message("a"),
            message("b"),
        ];
        let content = lines.join("\n");

        let mut marks = Marks::default();
        marks.0.insert("file-stem".into(), 4);

        let d = evaluate_delta_in(&content, "file-stem", &marks).unwrap();

        assert_eq!(d.session_id, "new-session");
        // Counting starts at the header of the observed session.
        assert_eq!(d.from_line, 1);
        assert_eq!(d.delta_messages, 2);
    }

    #[test]
    fn watermark_past_end_yields_empty_delta() {
        let content = message("x");
        let mut marks = Marks::default();
        marks.0.insert("s".into(), 10);

        let d = evaluate_delta_in(&content, "s", &marks).unwrap();
        assert!(d.is_empty());
    }

    #[test]
    fn invalid_utf8_transcript_still_evaluates() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("s.jsonl");
        let mut bytes = vec![0xff, 0xfe, b'\n'];
        bytes.extend_from_slice(message("still counted").as_bytes());
        std::fs::write(&path, bytes).unwrap();

        let d = evaluate_delta(&path, &Marks::default()).unwrap();
        assert_eq!(d.session_id, "s");
        assert_eq!(d.total_lines, 2);
        assert_eq!(d.delta_messages, 1);
    }

    #[test]
    fn session_id_defaults_to_file_stem() {
        assert_eq!(
            assumed_session_id(Path::new("/x/sessions/7f3a.jsonl")),
            "7f3a"
        );
    }
}
