use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use gridlock::{GridlockServer, ServerConfig, DEFAULT_PORT};

/// Serves synthetic traffic snapshots over TCP, one JSON line per request.
#[derive(Parser, Debug)]
#[command(name = "gridlock-server", version, about)]
struct Args {
    /// Address to listen on
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    /// Port to listen on
    #[arg(long, default_value_t = DEFAULT_PORT)]
    port: u16,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let server = Arc::new(GridlockServer::new(ServerConfig {
        host: args.host,
        port: args.port,
    }));

    // Ctrl-C stops the accept loop and closes open connections
    let signal_target = Arc::clone(&server);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
            signal_target.stop();
        }
    });

    if let Err(e) = server.start().await {
        error!("server error: {e}");
        std::process::exit(1);
    }
}
