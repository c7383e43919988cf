//! dss relay: forwards messages and folders between connected peers.
//!
//! Reads `HOST`, `PORT` and `DEBUG` from the environment and serves
//! until Ctrl-C.

mod config;

use config::RelayConfig;
use dss_share::server::RelayServer;
use env_logger::Env;
use log::{error, info};

#[tokio::main]
async fn main() {
    let config = RelayConfig::from_env();

    env_logger::Builder::from_env(Env::default().default_filter_or(config.log_filter())).init();

    let server = RelayServer::new(config.server_config());
    info!("Starting dss relay on {}", server.bind_addr());

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl-C: {e}");
            std::future::pending::<()>().await;
        }
    };

    if let Err(e) = server.run_until(shutdown).await {
        error!("Relay stopped: {e}");
        std::process::exit(1);
    }

    let stats = server.stats().await;
    info!(
        "Relay stopped after {} connections, {} forwarded, {} dropped",
        stats.total_connections, stats.relay.forwarded, stats.relay.dropped
    );
}
