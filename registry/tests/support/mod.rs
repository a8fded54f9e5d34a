#![allow(dead_code)]

use std::future::Future;
use std::net::SocketAddr;

use anyhow::Result;
use axum_server::Server;
use reqwest::{Client, StatusCode};
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration, Instant};

use common::schemas::{
    AllocateRequest, AllocateResponse, CommitRequest, HeartbeatRequest, LookupEntry,
    RegisterNodeRequest, ReportMissingRequest,
};
use registry::routes::router;
use registry::snapshot::{snapshot_worker, SnapshotStore};
use registry::state::RegistryState;
use registry::store::Store;

pub struct TestRegistry {
    pub handle: JoinHandle<Result<(), anyhow::Error>>,
    pub snapshot_handle: JoinHandle<Result<(), anyhow::Error>>,
    pub shutdown_tx: watch::Sender<bool>,
    pub shutdown_rx: watch::Receiver<bool>,
    pub addr: SocketAddr,
    pub url: String,
    pub state: RegistryState,
    pub data_dir: TempDir,
}

impl TestRegistry {
    pub async fn new(rep_factor: usize) -> Result<Self> {
        let data_dir = TempDir::new()?;
        let snapshots = SnapshotStore::new(data_dir.path());
        let (files, nodes) = snapshots.load();
        let store = Store::from_maps(files, nodes, rep_factor);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (state, snapshot_rx) = RegistryState::new(store, snapshots, shutdown_tx.clone());

        let snapshot_handle = tokio::spawn(snapshot_worker(
            state.clone(),
            snapshot_rx,
            shutdown_rx.clone(),
        ));

        let app = router(state.clone());
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let url = format!("http://{}", addr);

        let mut server_shutdown_rx = shutdown_rx.clone();
        let handle = tokio::spawn(async move {
            let server = Server::from_tcp(listener.into_std()?).serve(app.into_make_service());
            tokio::select! {
                res = server => res.map_err(anyhow::Error::from),
                _ = server_shutdown_rx.changed() => Ok(()),
            }
        });

        Ok(TestRegistry {
            handle,
            snapshot_handle,
            shutdown_tx,
            shutdown_rx,
            addr,
            url,
            state,
            data_dir,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Backdate a node's heartbeat so liveness transitions without sleeping.
    pub fn age_node(&self, node_id: &str, secs: i64) {
        let mut store = self.state.store.write().unwrap();
        let node = store.node_mut(node_id).expect("node registered");
        node.last_seen_at -= time::Duration::seconds(secs);
    }

    pub async fn shutdown(self) -> Result<()> {
        let _ = self.shutdown_tx.send(true);
        self.handle.abort();
        let _ = self.handle.await;
        let _ = self.snapshot_handle.await;
        Ok(())
    }
}

pub async fn register_node(
    client: &Client,
    base: &str,
    node_id: &str,
    capacity: i64,
) -> Result<StatusCode> {
    let resp = client
        .post(format!("{}/register-node", base))
        .json(&RegisterNodeRequest {
            node_id: node_id.to_string(),
            url: format!("http://{}.local:9001", node_id),
            capacity_bytes: capacity,
            zone: None,
            tags: None,
        })
        .send()
        .await?;
    Ok(resp.status())
}

pub async fn heartbeat(
    client: &Client,
    base: &str,
    node_id: &str,
    used_bytes: i64,
) -> Result<(StatusCode, Option<serde_json::Value>)> {
    let resp = client
        .post(format!("{}/heartbeat", base))
        .json(&HeartbeatRequest {
            node_id: node_id.to_string(),
            used_bytes,
        })
        .send()
        .await?;
    let status = resp.status();
    if status.is_success() {
        Ok((status, Some(resp.json().await?)))
    } else {
        Ok((status, None))
    }
}

pub async fn allocate(
    client: &Client,
    base: &str,
    filename: &str,
    size: i64,
    checksum: &str,
) -> Result<(StatusCode, Option<AllocateResponse>)> {
    let resp = client
        .post(format!("{}/allocate", base))
        .json(&AllocateRequest {
            filename: filename.to_string(),
            size,
            checksum: checksum.to_string(),
            content_type: None,
        })
        .send()
        .await?;
    let status = resp.status();
    if status.is_success() {
        Ok((status, Some(resp.json().await?)))
    } else {
        Ok((status, None))
    }
}

pub async fn commit(
    client: &Client,
    base: &str,
    file_id: &str,
    uploaded: Vec<String>,
) -> Result<(StatusCode, Option<String>)> {
    let resp = client
        .post(format!("{}/commit", base))
        .json(&CommitRequest {
            file_id: file_id.to_string(),
            uploaded,
        })
        .send()
        .await?;
    let status = resp.status();
    if status.is_success() {
        let body: serde_json::Value = resp.json().await?;
        Ok((status, body["state"].as_str().map(String::from)))
    } else {
        Ok((status, None))
    }
}

pub async fn lookup(
    client: &Client,
    base: &str,
    file_id: &str,
) -> Result<(StatusCode, Vec<LookupEntry>)> {
    let resp = client
        .get(format!("{}/lookup/{}", base, file_id))
        .send()
        .await?;
    let status = resp.status();
    if status.is_success() {
        Ok((status, resp.json().await?))
    } else {
        Ok((status, Vec::new()))
    }
}

pub async fn report_missing(
    client: &Client,
    base: &str,
    file_id: &str,
    node_id: &str,
) -> Result<(StatusCode, Option<String>)> {
    let resp = client
        .post(format!("{}/report-missing", base))
        .json(&ReportMissingRequest {
            file_id: file_id.to_string(),
            node_id: node_id.to_string(),
        })
        .send()
        .await?;
    let status = resp.status();
    if status.is_success() {
        let body: serde_json::Value = resp.json().await?;
        Ok((status, body["state"].as_str().map(String::from)))
    } else {
        Ok((status, None))
    }
}

/// Poll a condition until it holds or the timeout elapses.
pub async fn wait_until<F, Fut>(timeout_ms: u64, mut cond: F) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool>>,
{
    let deadline = Instant::now() + Duration::from_millis(timeout_ms);
    loop {
        if cond().await? {
            return Ok(());
        }
        if Instant::now() > deadline {
            anyhow::bail!("condition not met within {}ms", timeout_ms);
        }
        sleep(Duration::from_millis(50)).await;
    }
}
