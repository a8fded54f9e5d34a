use axum::{
    body::Body,
    extract::{DefaultBodyLimit, Json, Multipart, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use bytes::Bytes;
use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use common::constants::CHECKSUM_PREFIX;
use common::error::ApiError;
use common::schemas::{
    AllocateRequest, DeleteRequest, LookupEntry, ReplicaTarget,
};

use crate::client;
use crate::state::GatewayState;

const MAX_UPLOAD_BYTES: usize = 1024 * 1024 * 1024;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadSummary {
    pub file_id: String,
    pub filename: String,
    pub size: i64,
    pub checksum: String,
    pub uploaded: Vec<String>,
    pub commit: serde_json::Value,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteSummary {
    pub deleted: bool,
    pub file_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileIdQuery {
    pub file_id: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadQuery {
    pub file_id: Option<String>,
    pub node_url: Option<String>,
}

#[derive(Deserialize)]
pub struct SearchQuery {
    #[serde(default)]
    pub q: String,
}

pub fn router(state: GatewayState) -> Router {
    Router::new()
        .route("/api/upload", post(upload_handler))
        .route("/api/lookup", get(lookup_handler))
        .route("/api/download", get(download_handler))
        .route("/api/files", get(files_handler))
        .route("/api/nodes", get(nodes_handler))
        .route("/api/metrics", get(metrics_handler))
        .route("/api/delete", post(delete_handler))
        .route("/api/search", get(search_handler))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .with_state(state)
}

// POST /api/upload: allocate, fan the bytes out, commit, enforce quorum.
#[tracing::instrument(name = "gateway.upload", skip(state, multipart))]
pub async fn upload_handler(
    State(state): State<GatewayState>,
    mut multipart: Multipart,
) -> Result<Json<UploadSummary>, ApiError> {
    let mut filename: Option<String> = None;
    let mut file_bytes: Option<Bytes> = None;
    let mut content_type: Option<String> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(e.to_string()))?
    {
        let field_name = field.name().map(|s| s.to_string());
        match field_name.as_deref() {
            Some("filename") => {
                filename = Some(
                    field
                        .text()
                        .await
                        .map_err(|e| ApiError::BadRequest(e.to_string()))?,
                );
            }
            Some("file") => {
                content_type = field.content_type().map(|s| s.to_string());
                file_bytes = Some(
                    field
                        .bytes()
                        .await
                        .map_err(|e| ApiError::BadRequest(e.to_string()))?,
                );
            }
            _ => {}
        }
    }

    let filename = filename
        .filter(|f| !f.is_empty())
        .ok_or_else(|| ApiError::BadRequest("missing filename".into()))?;
    let bytes = file_bytes.ok_or_else(|| ApiError::BadRequest("missing file".into()))?;

    let size = bytes.len() as i64;
    let checksum = format!("{}{}", CHECKSUM_PREFIX, hex::encode(Sha256::digest(&bytes)));

    // 1) Allocate a placement.
    let alloc = client::allocate(
        &state,
        &AllocateRequest {
            filename: filename.clone(),
            size,
            checksum: checksum.clone(),
            content_type,
        },
    )
    .await?;

    // 2) Push the bytes to every allocated node; failures are skipped and
    // settle in the commit below.
    let uploads = alloc.replicas.iter().map(|replica| {
        let upload_client = state.upload_client.clone();
        let file_id = alloc.file_id.clone();
        let filename = filename.clone();
        let bytes = bytes.clone();
        let replica = replica.clone();
        async move {
            match client::push_to_node(&upload_client, &replica.url, &file_id, &filename, bytes)
                .await
            {
                Ok(()) => Some(replica.node_id),
                Err(e) => {
                    warn!(node_id = %replica.node_id, "replica upload failed: {e:#}");
                    None
                }
            }
        }
    });
    let uploaded: Vec<String> = join_all(uploads).await.into_iter().flatten().collect();

    // 3) Commit whatever landed, then enforce write-quorum = R. A failed
    // quorum still leaves the partial file in the registry for cleanup.
    let commit = client::commit(&state, &alloc.file_id, &uploaded).await?;

    if uploaded.len() < alloc.replicas.len() {
        warn!(
            file_id = %alloc.file_id,
            uploaded = uploaded.len(),
            required = alloc.replicas.len(),
            "write quorum not met"
        );
        return Err(ApiError::WriteQuorum {
            uploaded: uploaded.len(),
            required: alloc.replicas.len(),
        });
    }

    info!(file_id = %alloc.file_id, size, "upload committed");

    Ok(Json(UploadSummary {
        file_id: alloc.file_id,
        filename,
        size,
        checksum,
        uploaded,
        commit,
    }))
}

// GET /api/lookup?fileId=, normalizing the registry's wire format for
// browser-side consumers.
#[tracing::instrument(name = "gateway.lookup", skip(state, query))]
pub async fn lookup_handler(
    State(state): State<GatewayState>,
    Query(query): Query<FileIdQuery>,
) -> Result<Response, ApiError> {
    let file_id = query
        .file_id
        .ok_or_else(|| ApiError::BadRequest("missing fileId".into()))?;

    let resp = state
        .registry_client
        .get(format!("{}/lookup/{}", state.naming_url, file_id))
        .send()
        .await?;

    let status = StatusCode::from_u16(resp.status().as_u16())
        .unwrap_or(StatusCode::BAD_GATEWAY);
    if !status.is_success() {
        let body = resp.bytes().await?;
        return Ok((status, body).into_response());
    }

    let entries: Vec<LookupEntry> = resp.json().await?;
    let normalized: Vec<ReplicaTarget> = entries
        .into_iter()
        .map(|e| ReplicaTarget {
            node_id: e.node_id,
            url: e.url,
        })
        .collect();

    Ok(Json(normalized).into_response())
}

// GET /api/download?fileId=&nodeUrl=, proxying the node byte stream.
#[tracing::instrument(name = "gateway.download", skip(state, query))]
pub async fn download_handler(
    State(state): State<GatewayState>,
    Query(query): Query<DownloadQuery>,
) -> Result<Response, ApiError> {
    let (file_id, node_url) = match (query.file_id, query.node_url) {
        (Some(f), Some(n)) if !f.is_empty() && !n.is_empty() => (f, n),
        _ => return Err(ApiError::BadRequest("missing fileId or nodeUrl".into())),
    };

    let url = format!("{}/download/{}", node_url.trim_end_matches('/'), file_id);
    let resp = state.upload_client.get(url).send().await?;

    let status = StatusCode::from_u16(resp.status().as_u16())
        .unwrap_or(StatusCode::BAD_GATEWAY);
    let mut response = Response::builder().status(status);
    for name in [header::CONTENT_TYPE, header::CONTENT_LENGTH] {
        if let Some(value) = resp.headers().get(name.as_str()) {
            if let Ok(value) = value.to_str() {
                response = response.header(name, value);
            }
        }
    }

    let body = Body::from_stream(resp.bytes_stream());
    response
        .body(body)
        .map_err(|e| ApiError::Any(anyhow::anyhow!("failed to build response: {}", e)))
}

// GET /api/files
pub async fn files_handler(State(state): State<GatewayState>) -> Result<Response, ApiError> {
    proxy_registry_get(&state, "/list-files").await
}

// GET /api/nodes
pub async fn nodes_handler(State(state): State<GatewayState>) -> Result<Response, ApiError> {
    proxy_registry_get(&state, "/list-nodes").await
}

// GET /api/metrics
pub async fn metrics_handler(State(state): State<GatewayState>) -> Result<Response, ApiError> {
    proxy_registry_get(&state, "/metrics").await
}

// POST /api/delete: drop the registry record, then best-effort byte
// deletion on every replica that was hosting it.
#[tracing::instrument(name = "gateway.delete", skip(state, req), fields(file_id = %req.file_id))]
pub async fn delete_handler(
    State(state): State<GatewayState>,
    Json(req): Json<DeleteRequest>,
) -> Result<Json<DeleteSummary>, ApiError> {
    if req.file_id.is_empty() {
        return Err(ApiError::BadRequest("missing fileId".into()));
    }

    // Snapshot the replica set before the record disappears.
    let replicas: Vec<LookupEntry> = match state
        .registry_client
        .get(format!("{}/lookup/{}", state.naming_url, req.file_id))
        .send()
        .await
    {
        Ok(resp) if resp.status().is_success() => resp.json().await.unwrap_or_default(),
        _ => Vec::new(),
    };

    client::delete_file(&state, &req.file_id).await?;

    let deletions = replicas.iter().map(|replica| {
        let upload_client = state.upload_client.clone();
        let file_id = req.file_id.clone();
        let url = replica.url.clone();
        let node_id = replica.node_id.clone();
        async move {
            if let Err(e) = client::delete_on_node(&upload_client, &url, &file_id).await {
                warn!(node_id = %node_id, "replica delete failed: {e:#}");
            }
        }
    });
    join_all(deletions).await;

    Ok(Json(DeleteSummary {
        deleted: true,
        file_id: req.file_id,
    }))
}

// GET /api/search?q=: substring filter over the registry file summaries.
#[tracing::instrument(name = "gateway.search", skip(state, query))]
pub async fn search_handler(
    State(state): State<GatewayState>,
    Query(query): Query<SearchQuery>,
) -> Result<Json<Vec<serde_json::Value>>, ApiError> {
    let resp = state
        .registry_client
        .get(format!("{}/list-files", state.naming_url))
        .send()
        .await?;
    let files: Vec<serde_json::Value> = resp.json().await?;

    let needle = query.q.to_lowercase();
    let matches = files
        .into_iter()
        .filter(|f| {
            f["filename"]
                .as_str()
                .map(|name| name.to_lowercase().contains(&needle))
                .unwrap_or(false)
        })
        .collect();

    Ok(Json(matches))
}

async fn proxy_registry_get(state: &GatewayState, path: &str) -> Result<Response, ApiError> {
    let resp = state
        .registry_client
        .get(format!("{}{}", state.naming_url, path))
        .send()
        .await?;

    let status = StatusCode::from_u16(resp.status().as_u16())
        .unwrap_or(StatusCode::BAD_GATEWAY);
    let bytes = resp.bytes().await?;

    Ok((
        status,
        [(header::CONTENT_TYPE, "application/json")],
        bytes,
    )
        .into_response())
}
