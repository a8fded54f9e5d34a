use serde::{Deserialize, Serialize};
use std::fmt::Display;
use time::OffsetDateTime;

use common::time_utils::utc_now_nanos;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReplicaStatus {
    Ready,
    Missing,
    Stale,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FileState {
    Allocated, // metadata reserved, no commit seen yet
    Partial,   // committed with fewer than R uploaded replicas
    Available, // R or more replicas READY
    Degraded,  // was AVAILABLE, lost at least one replica
    Deleted,   // terminal
}

impl Display for FileState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FileState::Allocated => write!(f, "ALLOCATED"),
            FileState::Partial => write!(f, "PARTIAL"),
            FileState::Available => write!(f, "AVAILABLE"),
            FileState::Degraded => write!(f, "DEGRADED"),
            FileState::Deleted => write!(f, "DELETED"),
        }
    }
}

/// A value-typed entry in a file's replica list. The URL is cached at
/// placement time so lookups survive node-record churn.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplicaInfo {
    pub node_id: String,
    pub url: String,
    pub status: ReplicaStatus,
    #[serde(with = "time::serde::rfc3339")]
    pub last_verified_at: OffsetDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileMeta {
    pub file_id: String,
    pub filename: String,
    pub size: i64,
    pub checksum: String,
    pub content_type: String,
    pub version: i32,
    pub replicas: Vec<ReplicaInfo>,
    pub state: FileState,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

/// Opaque file identifier: 32 hex chars grouped 8-4-4-4-12, derived from a
/// hash of the filename and the wall-clock nanoseconds.
pub fn new_file_id(filename: &str) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(filename.as_bytes());
    hasher.update(&utc_now_nanos().to_be_bytes());

    let hex = hasher.finalize().to_hex();
    let h = &hex.as_str()[..32];
    format!(
        "{}-{}-{}-{}-{}",
        &h[..8],
        &h[8..12],
        &h[12..16],
        &h[16..20],
        &h[20..32]
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_id_shape() {
        let id = new_file_id("report.pdf");
        let groups: Vec<&str> = id.split('-').collect();
        assert_eq!(
            groups.iter().map(|g| g.len()).collect::<Vec<_>>(),
            vec![8, 4, 4, 4, 12]
        );
        assert!(groups
            .iter()
            .all(|g| g.chars().all(|c| c.is_ascii_hexdigit())));
    }

    #[test]
    fn file_id_unique_per_call() {
        assert_ne!(new_file_id("a"), new_file_id("a"));
    }
}
