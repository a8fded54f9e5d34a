use reqwest::Client;
use std::path::PathBuf;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;

#[derive(Clone)]
pub struct NodeState {
    pub http_client: Client,
    pub data_root: Arc<PathBuf>,
    pub node_id: String,
    pub registry_url: String,
    pub public_url: String,
    pub capacity_bytes: i64,
    used_bytes: Arc<AtomicI64>,
    shutdown_tx: Arc<watch::Sender<bool>>,
}

impl NodeState {
    pub fn new(
        http_client: Client,
        data_root: PathBuf,
        node_id: String,
        registry_url: String,
        public_url: String,
        capacity_bytes: i64,
        initial_used: i64,
        shutdown_tx: watch::Sender<bool>,
    ) -> Self {
        Self {
            http_client,
            data_root: Arc::new(data_root),
            node_id,
            registry_url,
            public_url,
            capacity_bytes,
            used_bytes: Arc::new(AtomicI64::new(initial_used.max(0))),
            shutdown_tx: Arc::new(shutdown_tx),
        }
    }

    /// Adjust the logical usage counter, floored at zero.
    pub fn add_used(&self, delta: i64) {
        let _ = self
            .used_bytes
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| {
                Some((v + delta).max(0))
            });
    }

    pub fn current_used(&self) -> i64 {
        self.used_bytes.load(Ordering::Relaxed)
    }

    pub fn free_bytes(&self) -> i64 {
        self.capacity_bytes - self.current_used()
    }

    pub fn request_shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}
