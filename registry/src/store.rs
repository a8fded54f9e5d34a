use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use time::OffsetDateTime;
use tracing::{info, warn};

use common::constants::CHECKSUM_PREFIX;
use common::error::ApiError;
use common::schemas::{
    AllocateRequest, AllocateResponse, RegisterNodeRequest, ReplicaTarget,
};
use common::time_utils::epoch;
use common::url_utils::sanitize_url;

use crate::meta::{new_file_id, FileMeta, FileState, ReplicaInfo, ReplicaStatus};
use crate::node::{NodeRecord, NodeStatus};
use crate::placement;

/// The registry's authoritative state: both maps behind one object, every
/// mutation a method taking `now` so liveness and healing stay testable.
/// Handlers never touch the maps directly.
pub struct Store {
    files: HashMap<String, FileMeta>,
    nodes: HashMap<String, NodeRecord>,
    rep_factor: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileSummary {
    pub file_id: String,
    pub filename: String,
    pub size: i64,
    pub state: FileState,
    pub replica_count: usize,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// Derived per-node view for admin queries; status, free space, and load
/// are computed at read time.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeView {
    pub node_id: String,
    pub url: String,
    pub status: NodeStatus,
    pub capacity_bytes: i64,
    pub used_bytes: i64,
    pub free_bytes: i64,
    pub load_factor: f64,
    #[serde(with = "time::serde::rfc3339")]
    pub last_seen_at: OffsetDateTime,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeCounts {
    pub healthy: usize,
    pub suspect: usize,
    pub down: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageTotals {
    pub capacity: i64,
    pub used: i64,
    pub free: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Metrics {
    pub total_files: usize,
    pub total_nodes: usize,
    pub total_size_bytes: i64,
    pub nodes: NodeCounts,
    pub storage: StorageTotals,
    pub files_by_state: BTreeMap<FileState, usize>,
}

impl Store {
    pub fn new(rep_factor: usize) -> Self {
        Self::from_maps(HashMap::new(), HashMap::new(), rep_factor)
    }

    pub fn from_maps(
        files: HashMap<String, FileMeta>,
        nodes: HashMap<String, NodeRecord>,
        rep_factor: usize,
    ) -> Self {
        Self {
            files,
            nodes,
            rep_factor,
        }
    }

    pub fn rep_factor(&self) -> usize {
        self.rep_factor
    }

    pub fn files(&self) -> &HashMap<String, FileMeta> {
        &self.files
    }

    pub fn nodes(&self) -> &HashMap<String, NodeRecord> {
        &self.nodes
    }

    pub fn node_mut(&mut self, node_id: &str) -> Option<&mut NodeRecord> {
        self.nodes.get_mut(node_id)
    }

    /// Upsert a node record. Re-registering is idempotent but destructive:
    /// usedBytes and the selection timer reset.
    pub fn register_node(
        &mut self,
        req: RegisterNodeRequest,
        now: OffsetDateTime,
    ) -> Result<(), ApiError> {
        if req.node_id.is_empty() {
            return Err(ApiError::BadRequest("missing nodeId".into()));
        }
        if req.capacity_bytes <= 0 {
            return Err(ApiError::BadRequest("capacityBytes must be positive".into()));
        }
        let url = sanitize_url(&req.url).map_err(|e| ApiError::BadRequest(e.to_string()))?;

        self.nodes.insert(
            req.node_id.clone(),
            NodeRecord {
                node_id: req.node_id,
                url,
                capacity_bytes: req.capacity_bytes,
                used_bytes: 0,
                zone: req.zone,
                tags: req.tags,
                last_seen_at: now,
                last_chosen: epoch(),
            },
        );
        Ok(())
    }

    pub fn heartbeat(
        &mut self,
        node_id: &str,
        used_bytes: i64,
        now: OffsetDateTime,
    ) -> Result<NodeStatus, ApiError> {
        if used_bytes < 0 {
            return Err(ApiError::BadRequest("usedBytes must be non-negative".into()));
        }
        let node = self.nodes.get_mut(node_id).ok_or(ApiError::UnknownNode)?;
        node.used_bytes = used_bytes;
        node.last_seen_at = now;
        Ok(node.status(now))
    }

    pub fn allocate(
        &mut self,
        req: AllocateRequest,
        now: OffsetDateTime,
    ) -> Result<AllocateResponse, ApiError> {
        if req.filename.is_empty() {
            return Err(ApiError::BadRequest("missing filename".into()));
        }
        if req.size <= 0 {
            return Err(ApiError::BadRequest("size must be positive".into()));
        }
        if !req.checksum.starts_with(CHECKSUM_PREFIX) {
            return Err(ApiError::BadRequest(format!(
                "checksum must start with {}",
                CHECKSUM_PREFIX
            )));
        }

        let targets = placement::pick_initial(&self.nodes, req.size, self.rep_factor, now)
            .ok_or(ApiError::InsufficientCapacity)?;

        let file_id = new_file_id(&req.filename);
        let replicas: Vec<ReplicaInfo> = targets
            .iter()
            .map(|t| ReplicaInfo {
                node_id: t.node_id.clone(),
                url: t.url.clone(),
                status: ReplicaStatus::Ready,
                last_verified_at: now,
            })
            .collect();

        for target in &targets {
            if let Some(node) = self.nodes.get_mut(&target.node_id) {
                node.last_chosen = now;
            }
        }

        self.files.insert(
            file_id.clone(),
            FileMeta {
                file_id: file_id.clone(),
                filename: req.filename,
                size: req.size,
                checksum: req.checksum,
                content_type: req.content_type.unwrap_or_default(),
                version: 1,
                replicas,
                state: FileState::Allocated,
                created_at: now,
                updated_at: now,
            },
        );

        Ok(AllocateResponse {
            file_id,
            replicas: targets,
        })
    }

    /// Apply a commit report: replicas named in `uploaded` become READY, the
    /// file state follows from how many of its replicas that covers.
    pub fn commit(
        &mut self,
        file_id: &str,
        uploaded: &[String],
        now: OffsetDateTime,
    ) -> Result<FileState, ApiError> {
        let meta = self.files.get_mut(file_id).ok_or(ApiError::FileNotFound)?;

        let uploaded: HashSet<&str> = uploaded.iter().map(String::as_str).collect();
        let mut count = 0usize;
        for replica in meta.replicas.iter_mut() {
            if uploaded.contains(replica.node_id.as_str()) {
                count += 1;
                replica.status = ReplicaStatus::Ready;
                replica.last_verified_at = now;
            }
        }

        meta.state = if count == 0 {
            FileState::Allocated
        } else if count < self.rep_factor {
            FileState::Partial
        } else {
            FileState::Available
        };
        meta.updated_at = now;

        Ok(meta.state)
    }

    /// Replica list for readers, HEALTHY-hosted entries first. A replica on a
    /// node missing from the map counts as non-healthy.
    pub fn lookup(
        &self,
        file_id: &str,
        now: OffsetDateTime,
    ) -> Result<Vec<ReplicaTarget>, ApiError> {
        let meta = self.files.get(file_id).ok_or(ApiError::FileNotFound)?;

        let mut healthy = Vec::new();
        let mut others = Vec::new();
        for replica in &meta.replicas {
            let target = ReplicaTarget {
                node_id: replica.node_id.clone(),
                url: replica.url.clone(),
            };
            let is_healthy = self
                .nodes
                .get(&replica.node_id)
                .map(|n| n.status(now) == NodeStatus::Healthy)
                .unwrap_or(false);
            if is_healthy {
                healthy.push(target);
            } else {
                others.push(target);
            }
        }

        healthy.extend(others);
        Ok(healthy)
    }

    /// A reader or node saw no bytes on `node_id`: mark that node's replicas
    /// MISSING and degrade the file if it was AVAILABLE.
    pub fn report_missing(
        &mut self,
        file_id: &str,
        node_id: &str,
        now: OffsetDateTime,
    ) -> Result<FileState, ApiError> {
        let meta = self.files.get_mut(file_id).ok_or(ApiError::FileNotFound)?;

        let mut not_ready = 0usize;
        for replica in meta.replicas.iter_mut() {
            if replica.node_id == node_id {
                replica.status = ReplicaStatus::Missing;
            }
            if replica.status != ReplicaStatus::Ready {
                not_ready += 1;
            }
        }

        if not_ready > 0 && meta.state == FileState::Available {
            meta.state = FileState::Degraded;
        }
        meta.updated_at = now;

        Ok(meta.state)
    }

    /// Hard delete: the record is removed outright. DELETED remains in the
    /// state alphabet but no mutation produces it.
    pub fn delete_file(&mut self, file_id: &str) -> Result<(), ApiError> {
        self.files
            .remove(file_id)
            .map(|_| ())
            .ok_or(ApiError::FileNotFound)
    }

    pub fn file_info(&self, file_id: &str) -> Result<FileMeta, ApiError> {
        self.files
            .get(file_id)
            .cloned()
            .ok_or(ApiError::FileNotFound)
    }

    pub fn list_files(&self) -> Vec<FileSummary> {
        let mut files: Vec<FileSummary> = self
            .files
            .values()
            .map(|f| FileSummary {
                file_id: f.file_id.clone(),
                filename: f.filename.clone(),
                size: f.size,
                state: f.state,
                replica_count: f.replicas.len(),
                created_at: f.created_at,
            })
            .collect();
        files.sort_by(|a, b| a.file_id.cmp(&b.file_id));
        files
    }

    pub fn list_nodes(&self, now: OffsetDateTime) -> Vec<NodeView> {
        let mut nodes: Vec<NodeView> = self
            .nodes
            .values()
            .map(|n| NodeView {
                node_id: n.node_id.clone(),
                url: n.url.clone(),
                status: n.status(now),
                capacity_bytes: n.capacity_bytes,
                used_bytes: n.used_bytes,
                free_bytes: n.free_bytes(),
                load_factor: n.load_factor(),
                last_seen_at: n.last_seen_at,
            })
            .collect();
        nodes.sort_by(|a, b| a.node_id.cmp(&b.node_id));
        nodes
    }

    pub fn metrics(&self, now: OffsetDateTime) -> Metrics {
        let mut files_by_state = BTreeMap::new();
        let mut total_size = 0i64;
        for f in self.files.values() {
            total_size += f.size;
            *files_by_state.entry(f.state).or_insert(0) += 1;
        }

        let mut counts = NodeCounts {
            healthy: 0,
            suspect: 0,
            down: 0,
        };
        let mut capacity = 0i64;
        let mut used = 0i64;
        for n in self.nodes.values() {
            capacity += n.capacity_bytes;
            used += n.used_bytes;
            match n.status(now) {
                NodeStatus::Healthy => counts.healthy += 1,
                NodeStatus::Suspect => counts.suspect += 1,
                NodeStatus::Down => counts.down += 1,
            }
        }

        Metrics {
            total_files: self.files.len(),
            total_nodes: self.nodes.len(),
            total_size_bytes: total_size,
            nodes: counts,
            storage: StorageTotals {
                capacity,
                used,
                free: capacity - used,
            },
            files_by_state,
        }
    }

    /// One healing sweep: extend every non-terminal file that has fewer than
    /// R healthy READY replicas. Metadata only; new entries start MISSING and
    /// wait for a repair worker to copy bytes and commit them. Returns how
    /// many files were extended.
    pub fn heal_pass(&mut self, now: OffsetDateTime) -> usize {
        let rep_factor = self.rep_factor;
        let max_replicas = 2 * rep_factor;
        let nodes = &self.nodes;
        let mut healed = 0usize;

        for (file_id, meta) in self.files.iter_mut() {
            if matches!(meta.state, FileState::Deleted | FileState::Allocated) {
                continue;
            }

            let healthy = meta
                .replicas
                .iter()
                .filter(|r| {
                    r.status == ReplicaStatus::Ready
                        && nodes
                            .get(&r.node_id)
                            .map(|n| n.status(now) == NodeStatus::Healthy)
                            .unwrap_or(false)
                })
                .count();
            if healthy >= rep_factor {
                continue;
            }

            let need = rep_factor - healthy;
            info!(
                file_id = %file_id,
                filename = %meta.filename,
                healthy,
                need,
                "file under-replicated, healing"
            );

            let slots = max_replicas.saturating_sub(meta.replicas.len());
            if slots == 0 {
                warn!(file_id = %file_id, "replica list at cap, skipping");
                continue;
            }

            let exclude: HashSet<&str> =
                meta.replicas.iter().map(|r| r.node_id.as_str()).collect();
            let candidates = placement::pick_additional(nodes, &exclude, meta.size, now);
            if candidates.len() < need {
                warn!(
                    file_id = %file_id,
                    need,
                    have = candidates.len(),
                    "not enough candidate nodes to heal"
                );
                continue;
            }

            for target in candidates.into_iter().take(need.min(slots)) {
                info!(file_id = %file_id, node_id = %target.node_id, "appended replica");
                meta.replicas.push(ReplicaInfo {
                    node_id: target.node_id,
                    url: target.url,
                    status: ReplicaStatus::Missing,
                    last_verified_at: now,
                });
            }

            if meta.state == FileState::Available {
                meta.state = FileState::Degraded;
            }
            meta.updated_at = now;
            healed += 1;
        }

        healed
    }

    /// Serialize both maps for the snapshot worker. Called under the read
    /// lock; the strings are written to disk outside it.
    pub fn snapshot_json(&self) -> anyhow::Result<(String, String)> {
        let files = serde_json::to_string_pretty(&self.files)?;
        let nodes = serde_json::to_string_pretty(&self.nodes)?;
        Ok((files, nodes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::Duration;

    fn at(secs: i64) -> OffsetDateTime {
        OffsetDateTime::UNIX_EPOCH + Duration::seconds(secs)
    }

    fn register(store: &mut Store, id: &str, capacity: i64, now: OffsetDateTime) {
        store
            .register_node(
                RegisterNodeRequest {
                    node_id: id.to_string(),
                    url: format!("http://{}:9001", id),
                    capacity_bytes: capacity,
                    zone: None,
                    tags: None,
                },
                now,
            )
            .unwrap();
    }

    fn alloc(store: &mut Store, filename: &str, size: i64, now: OffsetDateTime) -> AllocateResponse {
        store
            .allocate(
                AllocateRequest {
                    filename: filename.to_string(),
                    size,
                    checksum: "sha256:abcdef".to_string(),
                    content_type: None,
                },
                now,
            )
            .unwrap()
    }

    fn replica_ids(resp: &AllocateResponse) -> Vec<&str> {
        resp.replicas.iter().map(|r| r.node_id.as_str()).collect()
    }

    #[test]
    fn register_then_heartbeat_updates_used() {
        let mut store = Store::new(2);
        register(&mut store, "a", 1000, at(0));

        let status = store.heartbeat("a", 123, at(1)).unwrap();
        assert_eq!(status, NodeStatus::Healthy);
        assert_eq!(store.nodes()["a"].used_bytes, 123);
        assert_eq!(store.nodes()["a"].last_seen_at, at(1));
    }

    #[test]
    fn register_validates_payload() {
        let mut store = Store::new(2);
        let bad = RegisterNodeRequest {
            node_id: String::new(),
            url: "http://x:1".into(),
            capacity_bytes: 1,
            zone: None,
            tags: None,
        };
        assert!(matches!(
            store.register_node(bad, at(0)),
            Err(ApiError::BadRequest(_))
        ));

        let zero_cap = RegisterNodeRequest {
            node_id: "a".into(),
            url: "http://x:1".into(),
            capacity_bytes: 0,
            zone: None,
            tags: None,
        };
        assert!(matches!(
            store.register_node(zero_cap, at(0)),
            Err(ApiError::BadRequest(_))
        ));

        let bad_url = RegisterNodeRequest {
            node_id: "a".into(),
            url: "ftp://x:1".into(),
            capacity_bytes: 1,
            zone: None,
            tags: None,
        };
        assert!(matches!(
            store.register_node(bad_url, at(0)),
            Err(ApiError::BadRequest(_))
        ));
    }

    #[test]
    fn reregister_resets_usage() {
        let mut store = Store::new(2);
        register(&mut store, "a", 1000, at(0));
        store.heartbeat("a", 500, at(1)).unwrap();

        register(&mut store, "a", 2000, at(2));
        assert_eq!(store.nodes()["a"].used_bytes, 0);
        assert_eq!(store.nodes()["a"].capacity_bytes, 2000);
    }

    #[test]
    fn heartbeat_unknown_node() {
        let mut store = Store::new(2);
        assert!(matches!(
            store.heartbeat("ghost", 0, at(0)),
            Err(ApiError::UnknownNode)
        ));
    }

    #[test]
    fn allocate_validates_payload() {
        let mut store = Store::new(2);
        register(&mut store, "a", 1000, at(0));
        register(&mut store, "b", 1000, at(0));

        let cases = [
            AllocateRequest {
                filename: String::new(),
                size: 10,
                checksum: "sha256:ab".into(),
                content_type: None,
            },
            AllocateRequest {
                filename: "x".into(),
                size: 0,
                checksum: "sha256:ab".into(),
                content_type: None,
            },
            AllocateRequest {
                filename: "x".into(),
                size: 10,
                checksum: "md5:ab".into(),
                content_type: None,
            },
        ];
        for req in cases {
            assert!(matches!(
                store.allocate(req, at(0)),
                Err(ApiError::BadRequest(_))
            ));
        }
    }

    #[test]
    fn allocate_insufficient_capacity() {
        let mut store = Store::new(2);
        register(&mut store, "a", 1000, at(0));

        let err = store
            .allocate(
                AllocateRequest {
                    filename: "x".into(),
                    size: 10,
                    checksum: "sha256:ab".into(),
                    content_type: None,
                },
                at(0),
            )
            .unwrap_err();
        assert!(matches!(err, ApiError::InsufficientCapacity));
    }

    #[test]
    fn allocate_creates_ready_replicas() {
        let mut store = Store::new(2);
        register(&mut store, "a", 1000, at(0));
        register(&mut store, "b", 1000, at(0));

        let resp = alloc(&mut store, "x", 100, at(1));
        assert_eq!(resp.replicas.len(), 2);

        let ids = replica_ids(&resp);
        let unique: HashSet<&&str> = ids.iter().collect();
        assert_eq!(unique.len(), 2, "placement never picks a node twice");

        let meta = &store.files()[&resp.file_id];
        assert_eq!(meta.state, FileState::Allocated);
        assert_eq!(meta.version, 1);
        assert!(meta
            .replicas
            .iter()
            .all(|r| r.status == ReplicaStatus::Ready));
        for id in ids {
            assert_eq!(store.nodes()[id].last_chosen, at(1));
        }
    }

    #[test]
    fn commit_all_replicas_is_available() {
        let mut store = Store::new(2);
        register(&mut store, "a", 1000, at(0));
        register(&mut store, "b", 1000, at(0));
        let resp = alloc(&mut store, "x", 100, at(1));

        let uploaded: Vec<String> = resp.replicas.iter().map(|r| r.node_id.clone()).collect();
        let state = store.commit(&resp.file_id, &uploaded, at(2)).unwrap();
        assert_eq!(state, FileState::Available);

        // Idempotent in outcome.
        let state = store.commit(&resp.file_id, &uploaded, at(3)).unwrap();
        assert_eq!(state, FileState::Available);
    }

    #[test]
    fn commit_subset_is_partial() {
        let mut store = Store::new(2);
        register(&mut store, "a", 1000, at(0));
        register(&mut store, "b", 1000, at(0));
        let resp = alloc(&mut store, "x", 100, at(1));

        let uploaded = vec![resp.replicas[0].node_id.clone()];
        let state = store.commit(&resp.file_id, &uploaded, at(2)).unwrap();
        assert_eq!(state, FileState::Partial);
    }

    #[test]
    fn commit_nothing_stays_allocated() {
        let mut store = Store::new(2);
        register(&mut store, "a", 1000, at(0));
        register(&mut store, "b", 1000, at(0));
        let resp = alloc(&mut store, "x", 100, at(1));

        let state = store.commit(&resp.file_id, &[], at(2)).unwrap();
        assert_eq!(state, FileState::Allocated);
    }

    #[test]
    fn commit_unknown_file() {
        let mut store = Store::new(2);
        assert!(matches!(
            store.commit("nope", &[], at(0)),
            Err(ApiError::FileNotFound)
        ));
    }

    #[test]
    fn recommit_leaves_unnamed_replicas_untouched() {
        let mut store = Store::new(2);
        register(&mut store, "a", 1000, at(0));
        register(&mut store, "b", 1000, at(0));
        let resp = alloc(&mut store, "x", 100, at(1));
        let (first, second) = (
            resp.replicas[0].node_id.clone(),
            resp.replicas[1].node_id.clone(),
        );

        store
            .commit(&resp.file_id, &[first.clone(), second.clone()], at(2))
            .unwrap();
        store.report_missing(&resp.file_id, &second, at(3)).unwrap();

        // Re-commit naming only the first: the second keeps MISSING.
        store.commit(&resp.file_id, &[first], at(4)).unwrap();
        let meta = store.file_info(&resp.file_id).unwrap();
        let missing = meta
            .replicas
            .iter()
            .find(|r| r.node_id == second)
            .unwrap();
        assert_eq!(missing.status, ReplicaStatus::Missing);
    }

    #[test]
    fn report_missing_degrades_available() {
        let mut store = Store::new(2);
        register(&mut store, "a", 1000, at(0));
        register(&mut store, "b", 1000, at(0));
        let resp = alloc(&mut store, "x", 100, at(1));
        let uploaded: Vec<String> = resp.replicas.iter().map(|r| r.node_id.clone()).collect();
        store.commit(&resp.file_id, &uploaded, at(2)).unwrap();

        let reported = resp.replicas[1].node_id.clone();
        let state = store
            .report_missing(&resp.file_id, &reported, at(3))
            .unwrap();
        assert_eq!(state, FileState::Degraded);

        let meta = store.file_info(&resp.file_id).unwrap();
        let rep = meta
            .replicas
            .iter()
            .find(|r| r.node_id == reported)
            .unwrap();
        assert_eq!(rep.status, ReplicaStatus::Missing);

        // DEGRADED stays DEGRADED on further reports.
        let state = store
            .report_missing(&resp.file_id, &reported, at(4))
            .unwrap();
        assert_eq!(state, FileState::Degraded);
    }

    #[test]
    fn report_missing_leaves_partial_alone() {
        let mut store = Store::new(2);
        register(&mut store, "a", 1000, at(0));
        register(&mut store, "b", 1000, at(0));
        let resp = alloc(&mut store, "x", 100, at(1));
        store
            .commit(&resp.file_id, &[resp.replicas[0].node_id.clone()], at(2))
            .unwrap();

        let state = store
            .report_missing(&resp.file_id, &resp.replicas[1].node_id, at(3))
            .unwrap();
        assert_eq!(state, FileState::Partial);
    }

    #[test]
    fn lookup_orders_healthy_first() {
        let mut store = Store::new(2);
        register(&mut store, "a", 1000, at(0));
        register(&mut store, "b", 1000, at(0));
        let resp = alloc(&mut store, "x", 100, at(1));

        // "a" goes quiet; by t=30 it is DOWN while "b" keeps heartbeating.
        let quiet = resp.replicas[0].node_id.clone();
        let live = resp.replicas[1].node_id.clone();
        store.heartbeat(&live, 0, at(29)).unwrap();

        let entries = store.lookup(&resp.file_id, at(30)).unwrap();
        assert_eq!(entries[0].node_id, live);
        assert_eq!(entries[1].node_id, quiet);
    }

    #[test]
    fn lookup_treats_ghost_node_as_unhealthy() {
        let now = at(0);
        let file = FileMeta {
            file_id: "f1".into(),
            filename: "x".into(),
            size: 10,
            checksum: "sha256:ab".into(),
            content_type: String::new(),
            version: 1,
            replicas: vec![
                ReplicaInfo {
                    node_id: "ghost".into(),
                    url: "http://ghost:9001".into(),
                    status: ReplicaStatus::Ready,
                    last_verified_at: now,
                },
                ReplicaInfo {
                    node_id: "a".into(),
                    url: "http://a:9001".into(),
                    status: ReplicaStatus::Ready,
                    last_verified_at: now,
                },
            ],
            state: FileState::Available,
            created_at: now,
            updated_at: now,
        };
        let mut files = HashMap::new();
        files.insert("f1".to_string(), file);
        let mut store = Store::from_maps(files, HashMap::new(), 2);
        register(&mut store, "a", 1000, now);

        let entries = store.lookup("f1", now).unwrap();
        assert_eq!(entries[0].node_id, "a");
        assert_eq!(entries[1].node_id, "ghost");
    }

    #[test]
    fn delete_file_removes_record() {
        let mut store = Store::new(2);
        register(&mut store, "a", 1000, at(0));
        register(&mut store, "b", 1000, at(0));
        let resp = alloc(&mut store, "x", 100, at(1));

        store.delete_file(&resp.file_id).unwrap();
        assert!(matches!(
            store.file_info(&resp.file_id),
            Err(ApiError::FileNotFound)
        ));
        assert!(matches!(
            store.delete_file(&resp.file_id),
            Err(ApiError::FileNotFound)
        ));
    }

    #[test]
    fn tie_break_rotates_across_allocations() {
        let mut store = Store::new(2);
        register(&mut store, "a", 1000, at(0));
        register(&mut store, "b", 1000, at(0));
        register(&mut store, "c", 1000, at(0));

        let first = alloc(&mut store, "f1", 10, at(1));
        let chosen: HashSet<String> = first
            .replicas
            .iter()
            .map(|r| r.node_id.clone())
            .collect();
        let spare: Vec<String> = ["a", "b", "c"]
            .iter()
            .map(|s| s.to_string())
            .filter(|id| !chosen.contains(id))
            .collect();
        assert_eq!(spare.len(), 1);

        // The node skipped in round one has the oldest lastChosen now.
        let second = alloc(&mut store, "f2", 10, at(2));
        assert!(
            second.replicas.iter().any(|r| r.node_id == spare[0]),
            "expected {} in {:?}",
            spare[0],
            replica_ids(&second)
        );
    }

    #[test]
    fn heal_extends_underreplicated_file() {
        let mut store = Store::new(2);
        register(&mut store, "a", 1000, at(0));
        register(&mut store, "b", 1000, at(0));
        register(&mut store, "c", 1000, at(0));

        let resp = alloc(&mut store, "x", 100, at(1));
        let uploaded: Vec<String> = resp.replicas.iter().map(|r| r.node_id.clone()).collect();
        store.commit(&resp.file_id, &uploaded, at(2)).unwrap();

        // Keep everyone alive except the second chosen replica.
        let lost = resp.replicas[1].node_id.clone();
        for id in ["a", "b", "c"] {
            if id != lost {
                store.heartbeat(id, 0, at(25)).unwrap();
            }
        }

        let healed = store.heal_pass(at(25));
        assert_eq!(healed, 1);

        let meta = store.file_info(&resp.file_id).unwrap();
        assert_eq!(meta.state, FileState::Degraded);
        assert_eq!(meta.replicas.len(), 3);
        let appended = meta.replicas.last().unwrap();
        assert_eq!(appended.status, ReplicaStatus::Missing);
        assert!(!uploaded.contains(&appended.node_id));

        // Second pass: no new candidates until a repair worker commits.
        let healed = store.heal_pass(at(26));
        assert_eq!(healed, 0);
        assert_eq!(store.file_info(&resp.file_id).unwrap().replicas.len(), 3);
    }

    #[test]
    fn heal_skips_allocated_files() {
        let mut store = Store::new(2);
        register(&mut store, "a", 1000, at(0));
        register(&mut store, "b", 1000, at(0));
        let resp = alloc(&mut store, "x", 100, at(1));

        // Never committed: the healing loop must not touch it.
        assert_eq!(store.heal_pass(at(30)), 0);
        assert_eq!(store.file_info(&resp.file_id).unwrap().replicas.len(), 2);
    }

    #[test]
    fn heal_without_candidates_leaves_file_unchanged() {
        let mut store = Store::new(2);
        register(&mut store, "a", 1000, at(0));
        register(&mut store, "b", 1000, at(0));
        let resp = alloc(&mut store, "x", 100, at(1));
        let uploaded: Vec<String> = resp.replicas.iter().map(|r| r.node_id.clone()).collect();
        store.commit(&resp.file_id, &uploaded, at(2)).unwrap();

        store.heartbeat(&uploaded[0], 0, at(25)).unwrap();

        // Only the surviving host is healthy and it already has the file.
        assert_eq!(store.heal_pass(at(25)), 0);
        let meta = store.file_info(&resp.file_id).unwrap();
        assert_eq!(meta.replicas.len(), 2);
        assert_eq!(meta.state, FileState::Available);
    }

    #[test]
    fn heal_caps_replica_list() {
        let rep_factor = 1;
        let mut store = Store::new(rep_factor);
        for id in ["a", "b", "c", "d"] {
            register(&mut store, id, 1000, at(0));
        }
        let resp = alloc(&mut store, "x", 10, at(1));
        store
            .commit(&resp.file_id, &[resp.replicas[0].node_id.clone()], at(2))
            .unwrap();

        // The host goes dark; every other node stays live.
        let host = resp.replicas[0].node_id.clone();
        for id in ["a", "b", "c", "d"] {
            if id != host {
                store.heartbeat(id, 0, at(25)).unwrap();
            }
        }

        store.heal_pass(at(25));
        assert_eq!(store.file_info(&resp.file_id).unwrap().replicas.len(), 2);

        // Cap is 2×R = 2: further passes must not grow the list even though
        // healthy candidates remain.
        store.heal_pass(at(26));
        assert_eq!(store.file_info(&resp.file_id).unwrap().replicas.len(), 2);
    }

    #[test]
    fn metrics_aggregates() {
        let mut store = Store::new(2);
        register(&mut store, "a", 1000, at(0));
        register(&mut store, "b", 1000, at(0));
        store.heartbeat("a", 100, at(1)).unwrap();
        let resp = alloc(&mut store, "x", 50, at(1));
        let uploaded: Vec<String> = resp.replicas.iter().map(|r| r.node_id.clone()).collect();
        store.commit(&resp.file_id, &uploaded, at(2)).unwrap();

        let metrics = store.metrics(at(2));
        assert_eq!(metrics.total_files, 1);
        assert_eq!(metrics.total_nodes, 2);
        assert_eq!(metrics.total_size_bytes, 50);
        assert_eq!(metrics.nodes.healthy, 2);
        assert_eq!(metrics.storage.capacity, 2000);
        assert_eq!(metrics.storage.used, 100);
        assert_eq!(metrics.files_by_state[&FileState::Available], 1);
    }

    #[test]
    fn projections_have_no_side_effects() {
        let mut store = Store::new(2);
        register(&mut store, "a", 1000, at(0));
        register(&mut store, "b", 1000, at(0));
        let resp = alloc(&mut store, "x", 50, at(1));

        let before = store.snapshot_json().unwrap();
        store.list_files();
        store.list_nodes(at(2));
        store.metrics(at(2));
        store.lookup(&resp.file_id, at(2)).unwrap();
        let after = store.snapshot_json().unwrap();
        assert_eq!(before, after);
    }
}
