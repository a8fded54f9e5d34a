use anyhow::anyhow;
use bytes::Bytes;
use reqwest::{multipart, Client};

use common::error::ApiError;
use common::schemas::{AllocateRequest, AllocateResponse, CommitRequest, DeleteRequest};

use crate::state::GatewayState;

/// Ask the registry for a placement. Upstream rejections come back verbatim
/// as a 400 to the caller, matching the orchestration contract.
pub async fn allocate(
    state: &GatewayState,
    req: &AllocateRequest,
) -> Result<AllocateResponse, ApiError> {
    let resp = state
        .registry_client
        .post(format!("{}/allocate", state.naming_url))
        .json(req)
        .send()
        .await?;

    if !resp.status().is_success() {
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        return Err(ApiError::BadRequest(format!(
            "allocate error: status {}: {}",
            status,
            body.trim()
        )));
    }

    Ok(resp.json().await?)
}

pub async fn commit(
    state: &GatewayState,
    file_id: &str,
    uploaded: &[String],
) -> Result<serde_json::Value, ApiError> {
    let resp = state
        .registry_client
        .post(format!("{}/commit", state.naming_url))
        .json(&CommitRequest {
            file_id: file_id.to_string(),
            uploaded: uploaded.to_vec(),
        })
        .send()
        .await?;

    if !resp.status().is_success() {
        return Err(ApiError::Any(anyhow!(
            "commit failed: status {}",
            resp.status()
        )));
    }

    Ok(resp.json().await?)
}

pub async fn delete_file(state: &GatewayState, file_id: &str) -> Result<(), ApiError> {
    let resp = state
        .registry_client
        .post(format!("{}/delete-file", state.naming_url))
        .json(&DeleteRequest {
            file_id: file_id.to_string(),
        })
        .send()
        .await?;

    match resp.status() {
        status if status.is_success() => Ok(()),
        reqwest::StatusCode::NOT_FOUND => Err(ApiError::FileNotFound),
        status => Err(ApiError::Any(anyhow!("delete-file failed: status {}", status))),
    }
}

/// Push bytes to one storage node as the multipart form it expects.
pub async fn push_to_node(
    client: &Client,
    base: &str,
    file_id: &str,
    filename: &str,
    bytes: Bytes,
) -> anyhow::Result<()> {
    let form = multipart::Form::new()
        .text("fileId", file_id.to_string())
        .part(
            "file",
            multipart::Part::stream(reqwest::Body::from(bytes))
                .file_name(filename.to_string()),
        );

    let resp = client
        .post(format!("{}/upload", base))
        .multipart(form)
        .send()
        .await?;
    if !resp.status().is_success() {
        anyhow::bail!("upload to {} failed: {}", base, resp.status());
    }

    Ok(())
}

/// Best-effort byte deletion on a replica node.
pub async fn delete_on_node(client: &Client, base: &str, file_id: &str) -> anyhow::Result<()> {
    let resp = client
        .post(format!("{}/delete", base))
        .json(&DeleteRequest {
            file_id: file_id.to_string(),
        })
        .send()
        .await?;
    if !resp.status().is_success() {
        anyhow::bail!("delete on {} failed: {}", base, resp.status());
    }

    Ok(())
}
