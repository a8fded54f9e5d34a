use axum_server::Server;
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::watch;
use tracing::info;

use common::constants::{DEFAULT_REPLICATION_FACTOR, HEAL_INTERVAL_SECS};
use common::telemetry::init_telemetry;
use common::url_utils::parse_socket_addr;

use registry::heal::healing_loop;
use registry::routes::router;
use registry::snapshot::{snapshot_worker, SnapshotStore};
use registry::state::RegistryState;
use registry::store::Store;

#[derive(Parser, Debug, Clone)]
#[command(version, about)]
struct Args {
    /// Metadata base directory (holds files.json / nodes.json)
    #[arg(long, default_value = "./metadata")]
    data: PathBuf,

    /// Address to listen on
    #[arg(long, default_value = "0.0.0.0:8000")]
    listen: String,

    /// Minimum READY replicas for a file to be AVAILABLE
    #[arg(long, default_value_t = DEFAULT_REPLICATION_FACTOR)]
    replication_factor: usize,

    /// Healing tick interval (seconds)
    #[arg(long, default_value_t = HEAL_INTERVAL_SECS)]
    heal_interval_secs: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_telemetry("registry");

    let args = Args::parse();
    serve(args).await
}

async fn serve(args: Args) -> anyhow::Result<()> {
    std::fs::create_dir_all(&args.data)?;

    let snapshots = SnapshotStore::new(&args.data);
    let (files, nodes) = snapshots.load();
    info!(
        files = files.len(),
        nodes = nodes.len(),
        "loaded snapshots from {}",
        args.data.display()
    );
    let store = Store::from_maps(files, nodes, args.replication_factor);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (state, snapshot_rx) = RegistryState::new(store, snapshots, shutdown_tx.clone());

    let snapshot_handle = tokio::spawn(snapshot_worker(
        state.clone(),
        snapshot_rx,
        shutdown_rx.clone(),
    ));
    let heal_handle = tokio::spawn(healing_loop(
        state.clone(),
        Duration::from_secs(args.heal_interval_secs),
        shutdown_rx.clone(),
    ));

    let app = router(state);

    let socket_addr = parse_socket_addr(&args.listen)?;
    let server = Server::bind(socket_addr).serve(app.into_make_service());

    info!(
        "registry listening on {} (replication factor {})",
        args.listen, args.replication_factor
    );

    let mut shutdown_rx_main = shutdown_rx;
    tokio::select! {
        res = server => { res?; }
        _ = tokio::signal::ctrl_c() => {}
        _ = shutdown_rx_main.changed() => {}
    }

    // Stop background tasks and let the snapshot worker flush.
    let _ = shutdown_tx.send(true);
    let _ = heal_handle.await;
    let _ = snapshot_handle.await;

    Ok(())
}
