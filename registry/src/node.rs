use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};

use common::constants::{DOWN_AFTER_SECS, SUSPECT_AFTER_SECS};

/// A registered storage node. Liveness is never stored: it is derived from
/// `last_seen_at` wherever it is read.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeRecord {
    pub node_id: String,
    pub url: String,
    pub capacity_bytes: i64,
    pub used_bytes: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    #[serde(with = "time::serde::rfc3339")]
    pub last_seen_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub last_chosen: OffsetDateTime,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeStatus {
    Healthy,
    Suspect,
    Down,
}

impl NodeStatus {
    /// Liveness oracle: a pure function of the heartbeat age.
    pub fn derive(last_seen_at: OffsetDateTime, now: OffsetDateTime) -> NodeStatus {
        let age = now - last_seen_at;
        if age <= Duration::seconds(SUSPECT_AFTER_SECS) {
            NodeStatus::Healthy
        } else if age <= Duration::seconds(DOWN_AFTER_SECS) {
            NodeStatus::Suspect
        } else {
            NodeStatus::Down
        }
    }
}

impl NodeRecord {
    pub fn status(&self, now: OffsetDateTime) -> NodeStatus {
        NodeStatus::derive(self.last_seen_at, now)
    }

    pub fn free_bytes(&self) -> i64 {
        self.capacity_bytes - self.used_bytes
    }

    /// Fill ratio used as the primary placement key. Non-positive capacity
    /// sorts last; such a node never passes the candidate filter anyway.
    pub fn load_factor(&self) -> f64 {
        if self.capacity_bytes <= 0 {
            return f64::INFINITY;
        }
        self.used_bytes as f64 / self.capacity_bytes as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(secs: i64) -> OffsetDateTime {
        OffsetDateTime::UNIX_EPOCH + Duration::seconds(secs)
    }

    #[test]
    fn liveness_thresholds() {
        let seen = at(0);
        assert_eq!(NodeStatus::derive(seen, at(0)), NodeStatus::Healthy);
        assert_eq!(NodeStatus::derive(seen, at(10)), NodeStatus::Healthy);
        assert_eq!(NodeStatus::derive(seen, at(11)), NodeStatus::Suspect);
        assert_eq!(NodeStatus::derive(seen, at(20)), NodeStatus::Suspect);
        assert_eq!(NodeStatus::derive(seen, at(21)), NodeStatus::Down);
    }

    #[test]
    fn load_factor_guards_zero_capacity() {
        let node = NodeRecord {
            node_id: "n".into(),
            url: "http://localhost:9001".into(),
            capacity_bytes: 0,
            used_bytes: 0,
            zone: None,
            tags: None,
            last_seen_at: at(0),
            last_chosen: OffsetDateTime::UNIX_EPOCH,
        };
        assert!(node.load_factor().is_infinite());
    }
}
