use axum_server::Server;
use clap::Parser;
use std::time::Duration;
use tracing::info;

use common::constants::{NODE_UPLOAD_TIMEOUT_SECS, REGISTRY_RPC_TIMEOUT_SECS};
use common::telemetry::init_telemetry;
use common::url_utils::parse_socket_addr;

use gateway::routes::router;
use gateway::state::GatewayState;

#[derive(Parser, Debug, Clone)]
#[command(version, about)]
struct Args {
    /// Registry base URL
    #[arg(long, env = "NAMING_URL", default_value = "http://localhost:8000")]
    naming_url: String,

    /// Address to listen on
    #[arg(long, env = "ADDR", default_value = ":8080")]
    listen: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_telemetry("gateway");

    let args = Args::parse();

    let registry_client = reqwest::Client::builder()
        .timeout(Duration::from_secs(REGISTRY_RPC_TIMEOUT_SECS))
        .build()?;
    let upload_client = reqwest::Client::builder()
        .timeout(Duration::from_secs(NODE_UPLOAD_TIMEOUT_SECS))
        .build()?;

    let state = GatewayState {
        registry_client,
        upload_client,
        naming_url: args.naming_url.trim_end_matches('/').to_string(),
    };

    let app = router(state);

    let socket_addr = parse_socket_addr(&args.listen)?;
    let server = Server::bind(socket_addr).serve(app.into_make_service());

    info!(
        "gateway listening on {} (registry at {})",
        args.listen, args.naming_url
    );

    tokio::select! {
        res = server => { res?; }
        _ = tokio::signal::ctrl_c() => {}
    }

    Ok(())
}
