use axum::{
    extract::{Json, Path, State},
    routing::{get, post},
    Router,
};
use serde::Serialize;
use std::time::Duration;
use tracing::info;

use common::constants::SHUTDOWN_DELAY_MS;
use common::error::ApiError;
use common::schemas::{
    AllocateRequest, AllocateResponse, CommitRequest, DeleteRequest, HeartbeatRequest,
    LookupEntry, RegisterNodeRequest, ReportMissingRequest,
};
use common::time_utils::utc_now;

use crate::meta::{FileMeta, FileState};
use crate::node::NodeStatus;
use crate::state::RegistryState;
use crate::store::{FileSummary, Metrics, NodeView};

#[derive(Serialize)]
pub struct OkResponse {
    pub ok: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatResponse {
    pub ok: bool,
    pub status: NodeStatus,
}

#[derive(Serialize)]
pub struct CommitResponse {
    pub state: FileState,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportMissingResponse {
    pub accepted: bool,
    pub state: FileState,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteFileResponse {
    pub deleted: bool,
    pub file_id: String,
}

pub fn router(state: RegistryState) -> Router {
    Router::new()
        // Node management
        .route("/register-node", post(register_node))
        .route("/heartbeat", post(heartbeat))
        // File operations
        .route("/allocate", post(allocate))
        .route("/commit", post(commit))
        .route("/lookup/{file_id}", get(lookup))
        .route("/report-missing", post(report_missing))
        // Monitoring & admin
        .route("/metrics", get(metrics))
        .route("/list-files", get(list_files))
        .route("/list-nodes", get(list_nodes))
        .route("/file-info/{file_id}", get(file_info))
        .route("/delete-file", post(delete_file))
        .route("/shutdown", post(shutdown))
        .with_state(state)
}

// POST /register-node
#[tracing::instrument(name = "registry.register_node", skip(state, req), fields(node_id = %req.node_id))]
pub async fn register_node(
    State(state): State<RegistryState>,
    Json(req): Json<RegisterNodeRequest>,
) -> Result<Json<OkResponse>, ApiError> {
    {
        let mut store = state.store_write()?;
        store.register_node(req, utc_now())?;
    }
    state.mark_dirty();

    Ok(Json(OkResponse { ok: true }))
}

// POST /heartbeat
#[tracing::instrument(name = "registry.heartbeat", skip(state, req), fields(node_id = %req.node_id))]
pub async fn heartbeat(
    State(state): State<RegistryState>,
    Json(req): Json<HeartbeatRequest>,
) -> Result<Json<HeartbeatResponse>, ApiError> {
    let status = {
        let mut store = state.store_write()?;
        store.heartbeat(&req.node_id, req.used_bytes, utc_now())?
    };
    state.mark_dirty();

    Ok(Json(HeartbeatResponse { ok: true, status }))
}

// POST /allocate
#[tracing::instrument(name = "registry.allocate", skip(state, req), fields(filename = %req.filename, size = req.size))]
pub async fn allocate(
    State(state): State<RegistryState>,
    Json(req): Json<AllocateRequest>,
) -> Result<Json<AllocateResponse>, ApiError> {
    let resp = {
        let mut store = state.store_write()?;
        store.allocate(req, utc_now())?
    };
    state.mark_dirty();

    info!(file_id = %resp.file_id, replicas = resp.replicas.len(), "allocated");
    Ok(Json(resp))
}

// POST /commit
#[tracing::instrument(name = "registry.commit", skip(state, req), fields(file_id = %req.file_id))]
pub async fn commit(
    State(state): State<RegistryState>,
    Json(req): Json<CommitRequest>,
) -> Result<Json<CommitResponse>, ApiError> {
    let file_state = {
        let mut store = state.store_write()?;
        store.commit(&req.file_id, &req.uploaded, utc_now())?
    };
    state.mark_dirty();

    Ok(Json(CommitResponse { state: file_state }))
}

// GET /lookup/{file_id}
#[tracing::instrument(name = "registry.lookup", skip(state))]
pub async fn lookup(
    State(state): State<RegistryState>,
    Path(file_id): Path<String>,
) -> Result<Json<Vec<LookupEntry>>, ApiError> {
    let targets = state.store_read()?.lookup(&file_id, utc_now())?;

    let entries = targets
        .into_iter()
        .map(|t| LookupEntry {
            node_id: t.node_id,
            url: t.url,
        })
        .collect();
    Ok(Json(entries))
}

// POST /report-missing
#[tracing::instrument(name = "registry.report_missing", skip(state, req), fields(file_id = %req.file_id, node_id = %req.node_id))]
pub async fn report_missing(
    State(state): State<RegistryState>,
    Json(req): Json<ReportMissingRequest>,
) -> Result<Json<ReportMissingResponse>, ApiError> {
    let file_state = {
        let mut store = state.store_write()?;
        store.report_missing(&req.file_id, &req.node_id, utc_now())?
    };
    state.mark_dirty();

    Ok(Json(ReportMissingResponse {
        accepted: true,
        state: file_state,
    }))
}

// GET /metrics
#[tracing::instrument(name = "registry.metrics", skip(state))]
pub async fn metrics(State(state): State<RegistryState>) -> Result<Json<Metrics>, ApiError> {
    Ok(Json(state.store_read()?.metrics(utc_now())))
}

// GET /list-files
#[tracing::instrument(name = "registry.list_files", skip(state))]
pub async fn list_files(
    State(state): State<RegistryState>,
) -> Result<Json<Vec<FileSummary>>, ApiError> {
    Ok(Json(state.store_read()?.list_files()))
}

// GET /list-nodes
#[tracing::instrument(name = "registry.list_nodes", skip(state))]
pub async fn list_nodes(
    State(state): State<RegistryState>,
) -> Result<Json<Vec<NodeView>>, ApiError> {
    Ok(Json(state.store_read()?.list_nodes(utc_now())))
}

// GET /file-info/{file_id}
#[tracing::instrument(name = "registry.file_info", skip(state))]
pub async fn file_info(
    State(state): State<RegistryState>,
    Path(file_id): Path<String>,
) -> Result<Json<FileMeta>, ApiError> {
    Ok(Json(state.store_read()?.file_info(&file_id)?))
}

// POST /delete-file
#[tracing::instrument(name = "registry.delete_file", skip(state, req), fields(file_id = %req.file_id))]
pub async fn delete_file(
    State(state): State<RegistryState>,
    Json(req): Json<DeleteRequest>,
) -> Result<Json<DeleteFileResponse>, ApiError> {
    {
        let mut store = state.store_write()?;
        store.delete_file(&req.file_id)?;
    }
    state.mark_dirty();

    Ok(Json(DeleteFileResponse {
        deleted: true,
        file_id: req.file_id,
    }))
}

// POST /shutdown
#[tracing::instrument(name = "registry.shutdown", skip(state))]
pub async fn shutdown(State(state): State<RegistryState>) -> Json<OkResponse> {
    info!("shutdown requested");
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(SHUTDOWN_DELAY_MS)).await;
        state.request_shutdown();
    });

    Json(OkResponse { ok: true })
}
