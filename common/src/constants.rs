/// Heartbeat age after which a node is considered SUSPECT.
pub const SUSPECT_AFTER_SECS: i64 = 10;
/// Heartbeat age after which a node is considered DOWN.
pub const DOWN_AFTER_SECS: i64 = 20;

pub const DEFAULT_REPLICATION_FACTOR: usize = 2;
pub const HEAL_INTERVAL_SECS: u64 = 30;
pub const HEARTBEAT_INTERVAL_SECS: u64 = 5;

/// Transport timeouts (seconds).
pub const HEARTBEAT_TIMEOUT_SECS: u64 = 5;
pub const REGISTRY_RPC_TIMEOUT_SECS: u64 = 10;
pub const NODE_UPLOAD_TIMEOUT_SECS: u64 = 15;

pub const FILES_SNAPSHOT_NAME: &str = "files.json";
pub const NODES_SNAPSHOT_NAME: &str = "nodes.json";

pub const CHECKSUM_PREFIX: &str = "sha256:";

/// Grace between answering a shutdown request and exiting.
pub const SHUTDOWN_DELAY_MS: u64 = 200;
