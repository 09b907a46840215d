//! Decoders for kopia's JSON output.
//!
//! Each polled fact has its own decoder and the decoders are independent:
//! malformed repository-status output never blocks snapshot decoding. The
//! decoders are strict about the fields that identify a record (id, source,
//! timestamps) and tolerant about everything optional: a missing `error`
//! field means no error, a missing `incomplete` flag means complete, missing
//! cache sub-fields mean zero.

use chrono::{DateTime, Utc};
use serde::Deserialize;

/// Error type for decoding failures.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodeError {
    pub message: String,
}

impl DecodeError {
    fn new(what: &str, err: serde_json::Error) -> Self {
        Self {
            message: format!("{}: {}", what, err),
        }
    }
}

impl std::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "decode error: {}", self.message)
    }
}

impl std::error::Error for DecodeError {}

/// One completed or attempted backup, as reported by `kopia snapshot list`.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotRecord {
    pub id: String,
    /// Logical identity of the backed-up dataset; becomes the `source` label.
    pub source: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    #[serde(default)]
    pub stats: SnapshotStats,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub incomplete: bool,
}

impl SnapshotRecord {
    /// A snapshot is healthy when it finished without error.
    pub fn is_healthy(&self) -> bool {
        self.error.is_none() && !self.incomplete
    }
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotStats {
    #[serde(default)]
    pub total_size: u64,
    #[serde(default)]
    pub files: u64,
}

/// Repository connection state as reported by `kopia repository status`.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Connected,
    Disconnected,
    #[default]
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct RepositoryStatus {
    #[serde(default)]
    pub status: ConnectionStatus,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub cache: CacheStats,
}

impl RepositoryStatus {
    pub fn is_connected(&self) -> bool {
        self.status == ConnectionStatus::Connected
    }
}

/// Cumulative cache statistics. kopia reports running totals, not deltas.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
pub struct CacheStats {
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub hits: u64,
    #[serde(default)]
    pub miss: u64,
}

/// Decodes the JSON array printed by `kopia snapshot list --json`.
pub fn decode_snapshots(raw: &[u8]) -> Result<Vec<SnapshotRecord>, DecodeError> {
    serde_json::from_slice(raw).map_err(|e| DecodeError::new("snapshot list", e))
}

/// Decodes the JSON object printed by `kopia repository status --json`.
pub fn decode_repository_status(raw: &[u8]) -> Result<RepositoryStatus, DecodeError> {
    serde_json::from_slice(raw).map_err(|e| DecodeError::new("repository status", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_full_snapshot_record() {
        let raw = br#"[{
            "id": "s1",
            "source": "home",
            "startTime": "2024-01-01T00:00:00Z",
            "endTime": "2024-01-01T00:10:00Z",
            "stats": {"totalSize": 1048576, "files": 10}
        }]"#;

        let records = decode_snapshots(raw).unwrap();
        assert_eq!(records.len(), 1);
        let r = &records[0];
        assert_eq!(r.id, "s1");
        assert_eq!(r.source, "home");
        assert_eq!(r.stats.total_size, 1_048_576);
        assert_eq!(r.stats.files, 10);
        assert_eq!(r.error, None);
        assert!(!r.incomplete);
        assert!(r.is_healthy());
        assert_eq!((r.end_time - r.start_time).num_seconds(), 600);
    }

    #[test]
    fn optional_fields_default() {
        let raw = br#"[{
            "id": "s2",
            "source": "etc",
            "startTime": "2024-01-01T00:00:00Z",
            "endTime": "2024-01-01T00:00:05Z"
        }]"#;

        let records = decode_snapshots(raw).unwrap();
        assert_eq!(records[0].stats, SnapshotStats::default());
        assert!(records[0].is_healthy());
    }

    #[test]
    fn error_and_incomplete_mark_unhealthy() {
        let raw = br#"[
            {"id": "a", "source": "x", "startTime": "2024-01-01T00:00:00Z",
             "endTime": "2024-01-01T00:01:00Z", "error": "permission denied"},
            {"id": "b", "source": "y", "startTime": "2024-01-01T00:00:00Z",
             "endTime": "2024-01-01T00:01:00Z", "incomplete": true}
        ]"#;

        let records = decode_snapshots(raw).unwrap();
        assert!(!records[0].is_healthy());
        assert!(!records[1].is_healthy());
    }

    #[test]
    fn missing_required_field_is_error() {
        // No source.
        let raw = br#"[{"id": "s1", "startTime": "2024-01-01T00:00:00Z",
                        "endTime": "2024-01-01T00:10:00Z"}]"#;
        let err = decode_snapshots(raw).unwrap_err();
        assert!(err.message.contains("snapshot list"));
    }

    #[test]
    fn malformed_json_is_error() {
        assert!(decode_snapshots(b"not json").is_err());
        assert!(decode_repository_status(b"[1,2,3]").is_err());
    }

    #[test]
    fn decodes_repository_status() {
        let raw = br#"{"status": "connected", "size": 4096,
                       "cache": {"size": 100, "hits": 7, "miss": 2}}"#;
        let status = decode_repository_status(raw).unwrap();
        assert!(status.is_connected());
        assert_eq!(status.size, 4096);
        assert_eq!(status.cache.hits, 7);
        assert_eq!(status.cache.miss, 2);
    }

    #[test]
    fn unknown_status_maps_to_unknown() {
        let raw = br#"{"status": "maintenance", "size": 0}"#;
        let status = decode_repository_status(raw).unwrap();
        assert_eq!(status.status, ConnectionStatus::Unknown);
        assert!(!status.is_connected());
        assert_eq!(status.cache, CacheStats::default());
    }

    #[test]
    fn empty_snapshot_list_is_ok() {
        assert_eq!(decode_snapshots(b"[]").unwrap(), Vec::new());
    }
}
