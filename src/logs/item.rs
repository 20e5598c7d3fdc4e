//! Decoded telemetry log items.

use serde::Deserialize;

/// Item type emitted by the platform when a function invocation completes.
pub const RUNTIME_DONE: &str = "platform.runtimeDone";

/// One element of a telemetry batch.
///
/// Only `type` is interpreted; `record` is carried through untouched.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LogItem {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub time: Option<String>,
    #[serde(default)]
    pub record: serde_json::Value,
}

impl LogItem {
    pub fn is_runtime_done(&self) -> bool {
        self.kind == RUNTIME_DONE
    }
}

/// Decode one delivery body, a JSON array of log items.
pub fn decode_batch(bytes: &[u8]) -> Result<Vec<LogItem>, serde_json::Error> {
    serde_json::from_slice(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_platform_items() {
        let body = br#"[
            {"time":"2024-01-01T00:00:00.000Z","type":"platform.start","record":{"requestId":"r-1"}},
            {"time":"2024-01-01T00:00:00.120Z","type":"platform.runtimeDone","record":{"requestId":"r-1","status":"success"}}
        ]"#;
        let items = decode_batch(body).unwrap();

        assert_eq!(items.len(), 2);
        assert!(!items[0].is_runtime_done());
        assert!(items[1].is_runtime_done());
        assert_eq!(items[1].record["status"], "success");
        assert_eq!(items[0].time.as_deref(), Some("2024-01-01T00:00:00.000Z"));
    }

    #[test]
    fn minimal_item_needs_only_type() {
        let items = decode_batch(br#"[{"type":"platform.runtimeDone"}]"#).unwrap();
        assert_eq!(items.len(), 1);
        assert!(items[0].is_runtime_done());
        assert!(items[0].time.is_none());
        assert!(items[0].record.is_null());
    }

    #[test]
    fn empty_array_is_valid() {
        assert!(decode_batch(b"[]").unwrap().is_empty());
    }

    #[test]
    fn string_record_is_kept() {
        let items = decode_batch(br#"[{"type":"function","record":"hello\n"}]"#).unwrap();
        assert_eq!(items[0].record, serde_json::Value::String("hello\n".into()));
    }

    #[test]
    fn malformed_body_is_an_error() {
        assert!(decode_batch(b"not json").is_err());
        assert!(decode_batch(br#"{"type":"platform.runtimeDone"}"#).is_err());
        assert!(decode_batch(br#"[{"time":"t"}]"#).is_err());
        assert!(decode_batch(b"null").is_err());
    }

    #[test]
    fn marker_match_is_exact() {
        let items = decode_batch(br#"[{"type":"platform.runtimedone"},{"type":"platform.runtimeDone.extra"}]"#)
            .unwrap();
        assert!(items.iter().all(|i| !i.is_runtime_done()));
    }
}
