use axum_server::Server;
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};

use common::constants::{HEARTBEAT_INTERVAL_SECS, HEARTBEAT_TIMEOUT_SECS};
use common::telemetry::init_telemetry;
use common::url_utils::parse_socket_addr;

use node::health::{heartbeat_loop, register_with_registry};
use node::routes::router;
use node::state::NodeState;
use node::store::scan_used_bytes;

#[derive(Parser, Debug, Clone)]
#[command(version, about)]
struct Args {
    /// Stable node identifier
    #[arg(long, env = "NODE_ID", default_value = "node-a")]
    node_id: String,

    /// Port to listen on
    #[arg(long, env = "PORT", default_value_t = 9001)]
    port: u16,

    /// Directory for stored payloads
    #[arg(long, env = "DATA_DIR", default_value = "./data")]
    data_dir: PathBuf,

    /// Registry base URL
    #[arg(long, env = "NAMING_URL", default_value = "http://localhost:8000")]
    naming_url: String,

    /// Advertised capacity in bytes
    #[arg(long, env = "CAPACITY_BYTES", default_value_t = 1 << 30)]
    capacity_bytes: i64,

    /// Externally reachable base URL; defaults to http://localhost:{port}
    #[arg(long, env = "PUBLIC_URL")]
    public_url: Option<String>,

    /// Heartbeat interval (seconds)
    #[arg(long, default_value_t = HEARTBEAT_INTERVAL_SECS)]
    heartbeat_interval_secs: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_telemetry("node");

    let args = Args::parse();

    std::fs::create_dir_all(&args.data_dir)?;
    let initial_used = scan_used_bytes(&args.data_dir);

    let http_client = reqwest::Client::builder()
        .timeout(Duration::from_secs(HEARTBEAT_TIMEOUT_SECS))
        .build()?;

    let public_url = args
        .public_url
        .clone()
        .unwrap_or_else(|| format!("http://localhost:{}", args.port));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let state = NodeState::new(
        http_client,
        args.data_dir.clone(),
        args.node_id.clone(),
        args.naming_url.clone(),
        public_url,
        args.capacity_bytes,
        initial_used,
        shutdown_tx.clone(),
    );

    // Best-effort: the registry may come up after us; the heartbeat loop
    // re-registers once it answers.
    if let Err(e) = register_with_registry(&state).await {
        warn!("initial register failed: {e:#}");
    }

    let hb_handle = tokio::spawn(heartbeat_loop(
        state.clone(),
        Duration::from_secs(args.heartbeat_interval_secs),
        shutdown_rx.clone(),
    ));

    let app = router(state);

    let socket_addr = parse_socket_addr(&format!(":{}", args.port))?;
    let server = Server::bind(socket_addr).serve(app.into_make_service());

    info!(
        "storage node {} listening on :{} (data={}, used={})",
        args.node_id,
        args.port,
        args.data_dir.display(),
        initial_used
    );

    let mut shutdown_rx_main = shutdown_rx;
    tokio::select! {
        res = server => { res?; }
        _ = tokio::signal::ctrl_c() => {}
        _ = shutdown_rx_main.changed() => {}
    }

    let _ = shutdown_tx.send(true);
    let _ = hb_handle.await;

    Ok(())
}
