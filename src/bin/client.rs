use std::time::Duration;

use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use gridlock::{ClientSession, SessionEvent, DEFAULT_PORT};

/// Requests traffic snapshots from a gridlock server and prints each
/// received line to stdout.
#[derive(Parser, Debug)]
#[command(name = "gridlock-client", version, about)]
struct Args {
    /// Server host to connect to
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Server port to connect to
    #[arg(long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Number of snapshot requests to send
    #[arg(long, default_value_t = 1)]
    requests: u32,

    /// Delay between requests in milliseconds
    #[arg(long, default_value_t = 1000)]
    interval_ms: u64,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let (mut session, mut events) = match ClientSession::connect(&args.host, args.port).await {
        Ok(connected) => connected,
        Err(e) => {
            error!("{e}");
            std::process::exit(1);
        }
    };
    info!(host = %args.host, port = args.port, "connected");

    for i in 0..args.requests {
        if i > 0 {
            tokio::time::sleep(Duration::from_millis(args.interval_ms)).await;
        }
        if let Err(e) = session.request_snapshot().await {
            error!("request failed: {e}");
            break;
        }
        match events.recv().await {
            Some(SessionEvent::Line(line)) => println!("{line}"),
            Some(SessionEvent::Disconnected) | None => {
                warn!("server closed the connection");
                break;
            }
        }
    }

    session.disconnect().await;
    info!("disconnected");
}
