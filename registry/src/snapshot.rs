use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::watch;
use tracing::{error, info};

use common::constants::{FILES_SNAPSHOT_NAME, NODES_SNAPSHOT_NAME};

use crate::meta::FileMeta;
use crate::node::NodeRecord;
use crate::state::RegistryState;

/// Snapshot-based durability: the whole of each map, pretty-printed, written
/// atomically (`*.tmp` then rename). Loading is best-effort; a missing or
/// unparseable file starts empty.
pub struct SnapshotStore {
    files_path: PathBuf,
    nodes_path: PathBuf,
}

impl SnapshotStore {
    pub fn new(base: &Path) -> Self {
        Self {
            files_path: base.join(FILES_SNAPSHOT_NAME),
            nodes_path: base.join(NODES_SNAPSHOT_NAME),
        }
    }

    pub fn load(&self) -> (HashMap<String, FileMeta>, HashMap<String, NodeRecord>) {
        (read_map(&self.files_path), read_map(&self.nodes_path))
    }

    pub async fn write(&self, files_json: String, nodes_json: String) -> anyhow::Result<()> {
        write_atomic(&self.files_path, files_json).await?;
        write_atomic(&self.nodes_path, nodes_json).await?;
        Ok(())
    }
}

fn read_map<T: DeserializeOwned>(path: &Path) -> HashMap<String, T> {
    match std::fs::read(path) {
        Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_default(),
        Err(_) => HashMap::new(),
    }
}

async fn write_atomic(path: &Path, contents: String) -> anyhow::Result<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    tokio::fs::write(&tmp, contents).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

/// Serial snapshot worker. Mutations bump a version counter; each observed
/// change serializes both maps under the read lock and writes outside it, so
/// bursts coalesce and every snapshot is a consistent point in time. Write
/// failures are logged and swallowed: the in-memory state stays
/// authoritative.
pub async fn snapshot_worker(
    state: RegistryState,
    mut version: watch::Receiver<u64>,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    loop {
        tokio::select! {
            changed = version.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
        }

        write_once(&state).await;
    }

    // Final snapshot so disk matches memory after a clean shutdown.
    write_once(&state).await;
    info!("snapshot worker stopped");

    Ok(())
}

async fn write_once(state: &RegistryState) {
    let serialized = {
        match state.store.read() {
            Ok(store) => store.snapshot_json(),
            Err(e) => {
                error!("failed to acquire store read lock: {}", e);
                return;
            }
        }
    };

    match serialized {
        Ok((files_json, nodes_json)) => {
            if let Err(e) = state.snapshots.write(files_json, nodes_json).await {
                error!("snapshot write failed: {e:#}");
            }
        }
        Err(e) => error!("snapshot serialization failed: {e:#}"),
    }
}
