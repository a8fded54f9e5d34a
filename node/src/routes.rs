use axum::{
    body::Body,
    extract::{multipart::Field, DefaultBodyLimit, Json, Multipart, Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::time::Duration;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;
use tracing::info;

use common::constants::{CHECKSUM_PREFIX, SHUTDOWN_DELAY_MS};
use common::error::ApiError;
use common::schemas::{DeleteRequest, HasResponse, UploadResponse, VerifyRequest, VerifyResponse};

use crate::state::NodeState;
use crate::store::{data_path, file_checksum, file_exists, list_stored};

const MAX_UPLOAD_BYTES: usize = 1024 * 1024 * 1024;

#[derive(Serialize)]
pub struct OkResponse {
    pub ok: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub node_id: String,
    pub status: &'static str,
    pub used_bytes: i64,
    pub capacity_bytes: i64,
    pub free_bytes: i64,
    pub data_dir: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileEntry {
    pub file_id: String,
    pub size: i64,
}

#[derive(Serialize)]
pub struct ListResponse {
    pub files: Vec<FileEntry>,
    pub count: usize,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteResponse {
    pub deleted: bool,
    pub exists: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HasQuery {
    pub file_id: Option<String>,
}

pub fn router(state: NodeState) -> Router {
    Router::new()
        .route("/upload", post(upload_handler))
        .route("/download/{file_id}", get(download_handler))
        .route("/has", get(has_handler))
        .route("/health", get(health_handler))
        .route("/list", get(list_handler))
        .route("/verify", post(verify_handler))
        .route("/delete", post(delete_handler))
        .route("/shutdown", post(shutdown_handler))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .with_state(state)
}

fn bad_req<E: std::fmt::Display>(e: E) -> ApiError {
    ApiError::BadRequest(e.to_string())
}

async fn stream_field_to_file(
    field: &mut Field<'_>,
    path: &std::path::Path,
) -> Result<(i64, String), ApiError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }

    let mut file = fs::File::create(path).await?;
    let mut hasher = Sha256::new();
    let mut total: i64 = 0;

    while let Some(chunk) = field.chunk().await.map_err(bad_req)? {
        hasher.update(&chunk);
        total += chunk.len() as i64;
        file.write_all(&chunk).await?;
    }
    file.flush().await?;

    let checksum = format!("{}{}", CHECKSUM_PREFIX, hex::encode(hasher.finalize()));
    Ok((total, checksum))
}

// POST /upload (multipart: fileId field, then file part)
#[tracing::instrument(name = "node.upload", skip(ctx, multipart))]
pub async fn upload_handler(
    State(ctx): State<NodeState>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, ApiError> {
    let mut file_id: Option<String> = None;
    let mut stored: Option<(i64, String, String)> = None;

    while let Some(mut field) = multipart.next_field().await.map_err(bad_req)? {
        let field_name = field.name().map(|s| s.to_string());
        match field_name.as_deref() {
            Some("fileId") => {
                file_id = Some(field.text().await.map_err(bad_req)?);
            }
            Some("file") => {
                let id = file_id
                    .as_deref()
                    .ok_or_else(|| ApiError::BadRequest("fileId must precede file part".into()))?;
                let name = field.file_name().unwrap_or(id).to_string();
                let target = data_path(&ctx.data_root, id);
                let (size, checksum) = stream_field_to_file(&mut field, &target).await?;
                stored = Some((size, checksum, name));
            }
            _ => {}
        }
    }

    let file_id = file_id.ok_or_else(|| ApiError::BadRequest("missing fileId".into()))?;
    let (size, checksum, name) =
        stored.ok_or_else(|| ApiError::BadRequest("missing file".into()))?;

    ctx.add_used(size);
    info!(file_id = %file_id, size, "stored payload");

    Ok(Json(UploadResponse {
        ok: true,
        file_id,
        size,
        checksum,
        name,
    }))
}

// GET /download/{file_id}
#[tracing::instrument(name = "node.download", skip(ctx))]
pub async fn download_handler(
    Path(file_id): Path<String>,
    State(ctx): State<NodeState>,
) -> Result<impl IntoResponse, ApiError> {
    let path = data_path(&ctx.data_root, &file_id);
    if !file_exists(&path).await {
        return Err(ApiError::FileNotFound);
    }

    let file = fs::File::open(&path).await?;
    let stream = ReaderStream::new(file);
    Ok((StatusCode::OK, Body::from_stream(stream)).into_response())
}

// GET /has?fileId=
#[tracing::instrument(name = "node.has", skip(ctx, query))]
pub async fn has_handler(
    Query(query): Query<HasQuery>,
    State(ctx): State<NodeState>,
) -> Result<Json<HasResponse>, ApiError> {
    let file_id = query
        .file_id
        .ok_or_else(|| ApiError::BadRequest("missing fileId".into()))?;

    let exists = file_exists(&data_path(&ctx.data_root, &file_id)).await;
    Ok(Json(HasResponse { exists }))
}

// GET /health
pub async fn health_handler(State(ctx): State<NodeState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        node_id: ctx.node_id.clone(),
        status: "HEALTHY",
        used_bytes: ctx.current_used(),
        capacity_bytes: ctx.capacity_bytes,
        free_bytes: ctx.free_bytes(),
        data_dir: ctx.data_root.display().to_string(),
    })
}

// GET /list
#[tracing::instrument(name = "node.list", skip(ctx))]
pub async fn list_handler(State(ctx): State<NodeState>) -> Json<ListResponse> {
    let files: Vec<FileEntry> = list_stored(&ctx.data_root)
        .into_iter()
        .map(|entry| FileEntry {
            file_id: entry.file_id,
            size: entry.size,
        })
        .collect();
    let count = files.len();

    Json(ListResponse { files, count })
}

// POST /verify
#[tracing::instrument(name = "node.verify", skip(ctx, req), fields(file_id = %req.file_id))]
pub async fn verify_handler(
    State(ctx): State<NodeState>,
    Json(req): Json<VerifyRequest>,
) -> Result<Json<VerifyResponse>, ApiError> {
    let path = data_path(&ctx.data_root, &req.file_id);
    if !file_exists(&path).await {
        return Err(ApiError::FileNotFound);
    }

    let actual = file_checksum(&path).await?;
    let verified = actual == req.checksum;

    Ok(Json(VerifyResponse {
        file_id: req.file_id,
        expected_checksum: req.checksum,
        actual_checksum: actual,
        verified,
    }))
}

// POST /delete
#[tracing::instrument(name = "node.delete", skip(ctx, req), fields(file_id = %req.file_id))]
pub async fn delete_handler(
    State(ctx): State<NodeState>,
    Json(req): Json<DeleteRequest>,
) -> Result<Json<DeleteResponse>, ApiError> {
    if req.file_id.is_empty() {
        return Err(ApiError::BadRequest("missing fileId".into()));
    }

    let path = data_path(&ctx.data_root, &req.file_id);
    let size = match fs::metadata(&path).await {
        Ok(meta) => meta.len() as i64,
        Err(_) => {
            return Ok(Json(DeleteResponse {
                deleted: false,
                exists: false,
            }))
        }
    };

    fs::remove_file(&path).await?;
    ctx.add_used(-size);
    info!(file_id = %req.file_id, size, "deleted payload");

    Ok(Json(DeleteResponse {
        deleted: true,
        exists: true,
    }))
}

// POST /shutdown
#[tracing::instrument(name = "node.shutdown", skip(ctx))]
pub async fn shutdown_handler(State(ctx): State<NodeState>) -> Json<OkResponse> {
    info!("shutdown requested");
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(SHUTDOWN_DELAY_MS)).await;
        ctx.request_shutdown();
    });

    Json(OkResponse { ok: true })
}
