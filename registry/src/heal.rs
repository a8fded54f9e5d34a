use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info};

use common::time_utils::utc_now;

use crate::state::RegistryState;

/// Periodic healing tick. Each pass runs to completion under the write lock
/// before the next tick; the pass itself is metadata-only (see
/// `Store::heal_pass`).
pub async fn healing_loop(
    state: RegistryState,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
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

        let healed = match state.store.write() {
            Ok(mut store) => store.heal_pass(utc_now()),
            Err(e) => {
                error!("failed to acquire store write lock: {}", e);
                continue;
            }
        };

        if healed > 0 {
            info!(healed, "healing pass extended files");
            state.mark_dirty();
        } else {
            debug!("healing pass found nothing to do");
        }
    }

    info!("healing loop stopped");

    Ok(())
}
