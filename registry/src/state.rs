use anyhow::anyhow;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::watch;

use common::error::ApiError;

use crate::snapshot::SnapshotStore;
use crate::store::Store;

/// Shared handle threaded through every handler and background task. The
/// store lock is the single reader/writer lock of the design: reads take it
/// shared, mutations exclusive, and no I/O happens inside it.
#[derive(Clone)]
pub struct RegistryState {
    pub store: Arc<RwLock<Store>>,
    pub snapshots: Arc<SnapshotStore>,
    snapshot_tx: Arc<watch::Sender<u64>>,
    shutdown_tx: watch::Sender<bool>,
}

impl RegistryState {
    pub fn new(
        store: Store,
        snapshots: SnapshotStore,
        shutdown_tx: watch::Sender<bool>,
    ) -> (Self, watch::Receiver<u64>) {
        let (snapshot_tx, snapshot_rx) = watch::channel(0u64);
        (
            Self {
                store: Arc::new(RwLock::new(store)),
                snapshots: Arc::new(snapshots),
                snapshot_tx: Arc::new(snapshot_tx),
                shutdown_tx,
            },
            snapshot_rx,
        )
    }

    pub fn store_read(&self) -> Result<RwLockReadGuard<'_, Store>, ApiError> {
        self.store
            .read()
            .map_err(|e| ApiError::Any(anyhow!("failed to acquire store read lock: {}", e)))
    }

    pub fn store_write(&self) -> Result<RwLockWriteGuard<'_, Store>, ApiError> {
        self.store
            .write()
            .map_err(|e| ApiError::Any(anyhow!("failed to acquire store write lock: {}", e)))
    }

    /// Schedule a snapshot after a successful mutation.
    pub fn mark_dirty(&self) {
        self.snapshot_tx.send_modify(|v| *v = v.wrapping_add(1));
    }

    pub fn request_shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}
