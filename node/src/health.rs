use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};

use common::schemas::{HeartbeatRequest, RegisterNodeRequest};

use crate::state::NodeState;

pub async fn register_with_registry(state: &NodeState) -> anyhow::Result<()> {
    let payload = RegisterNodeRequest {
        node_id: state.node_id.clone(),
        url: state.public_url.clone(),
        capacity_bytes: state.capacity_bytes,
        zone: None,
        tags: None,
    };

    let url = format!("{}/register-node", state.registry_url);
    let resp = state.http_client.post(url).json(&payload).send().await?;
    if !resp.status().is_success() {
        anyhow::bail!("register failed: {}", resp.status());
    }

    info!("registered with registry as {}", state.node_id);
    Ok(())
}

/// Periodic heartbeat with the current usage counter. A 404 means the
/// registry no longer knows us (e.g. it restarted with fresh state), so
/// re-register and carry on.
pub async fn heartbeat_loop(
    state: NodeState,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let url = format!("{}/heartbeat", state.registry_url);
    let mut tick = tokio::time::interval(interval);

    loop {
        tokio::select! {
            _ = tick.tick() => {}
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
        }

        let hb = HeartbeatRequest {
            node_id: state.node_id.clone(),
            used_bytes: state.current_used(),
        };

        match state.http_client.post(&url).json(&hb).send().await {
            Ok(resp) if resp.status().is_success() => {}
            Ok(resp) if resp.status() == reqwest::StatusCode::NOT_FOUND => {
                warn!("registry does not know us, re-registering");
                if let Err(e) = register_with_registry(&state).await {
                    warn!("re-register failed: {e:#}");
                }
            }
            Ok(resp) => warn!("heartbeat non-200: {}", resp.status()),
            Err(e) => warn!("heartbeat error: {e}"),
        }
    }

    info!("heartbeat loop stopped");

    Ok(())
}
