use std::collections::{HashMap, HashSet};
use time::OffsetDateTime;

use common::schemas::ReplicaTarget;

use crate::node::{NodeRecord, NodeStatus};

/// Select `n` nodes for a new file of `size` bytes: HEALTHY nodes with room,
/// least-filled first, ties broken by staleness of last selection so equally
/// loaded peers rotate. Returns None when fewer than `n` candidates exist.
pub fn pick_initial(
    nodes: &HashMap<String, NodeRecord>,
    size: i64,
    n: usize,
    now: OffsetDateTime,
) -> Option<Vec<ReplicaTarget>> {
    let mut candidates: Vec<&NodeRecord> = nodes
        .values()
        .filter(|node| node.status(now) == NodeStatus::Healthy && node.free_bytes() >= size)
        .collect();

    if candidates.len() < n {
        return None;
    }

    candidates.sort_by(|a, b| {
        a.load_factor()
            .total_cmp(&b.load_factor())
            .then_with(|| a.last_chosen.cmp(&b.last_chosen))
    });

    Some(
        candidates
            .into_iter()
            .take(n)
            .map(|node| ReplicaTarget {
                node_id: node.node_id.clone(),
                url: node.url.clone(),
            })
            .collect(),
    )
}

/// Candidates for extending an under-replicated file: HEALTHY, room for the
/// file, not already hosting it. Sorted by load factor only; the caller
/// decides whether enough came back.
pub fn pick_additional(
    nodes: &HashMap<String, NodeRecord>,
    exclude: &HashSet<&str>,
    size: i64,
    now: OffsetDateTime,
) -> Vec<ReplicaTarget> {
    let mut candidates: Vec<&NodeRecord> = nodes
        .values()
        .filter(|node| {
            !exclude.contains(node.node_id.as_str())
                && node.status(now) == NodeStatus::Healthy
                && node.free_bytes() >= size
        })
        .collect();

    candidates.sort_by(|a, b| a.load_factor().total_cmp(&b.load_factor()));

    candidates
        .into_iter()
        .map(|node| ReplicaTarget {
            node_id: node.node_id.clone(),
            url: node.url.clone(),
        })
        .collect()
}
