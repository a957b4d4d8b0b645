use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::snapshot::SnapshotGenerator;

// The single request line the server understands
pub const REQUEST_SIMULATION_DATA: &str = "REQUEST_SIMULATION_DATA";

pub const DEFAULT_PORT: u16 = 12345;

// Listener address configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
        }
    }
}

#[derive(Debug, Error)]
pub enum ServerError {
    /// The listener could not be bound; the server never comes up.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },
}

// Accepts connections and serves one snapshot per request line. Share it
// behind an Arc: `start` runs the accept loop on the caller's task while
// `stop` may be called from anywhere.
pub struct GridlockServer {
    config: ServerConfig,
    generator: Arc<SnapshotGenerator>,
    running: AtomicBool,
    active: Arc<AtomicUsize>,
    local_addr: Mutex<Option<SocketAddr>>,
    shutdown: watch::Sender<bool>,
}

impl GridlockServer {
    pub fn new(config: ServerConfig) -> Self {
        Self::with_generator(config, Arc::new(SnapshotGenerator::new()))
    }

    // Inject the snapshot source (seeded in tests)
    pub fn with_generator(config: ServerConfig, generator: Arc<SnapshotGenerator>) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            config,
            generator,
            running: AtomicBool::new(false),
            active: Arc::new(AtomicUsize::new(0)),
            local_addr: Mutex::new(None),
            shutdown,
        }
    }

    /// Bind the configured address and serve until [`stop`](Self::stop) is
    /// called. Each accepted connection gets its own handler task; a failed
    /// bind is the only fatal error. A stop requested before startup makes
    /// `start` return immediately without binding.
    pub async fn start(&self) -> Result<(), ServerError> {
        // Subscribe before binding: a stop is seen either as the value
        // already stored here or as a change inside the loop below.
        let mut shutdown_rx = self.shutdown.subscribe();
        let stop_pending = *shutdown_rx.borrow_and_update();
        if stop_pending {
            self.shutdown.send_replace(false);
            info!("stop requested before startup, not serving");
            return Ok(());
        }

        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = TcpListener::bind(addr.as_str())
            .await
            .map_err(|source| ServerError::Bind {
                addr: addr.clone(),
                source,
            })?;
        let local = listener
            .local_addr()
            .map_err(|source| ServerError::Bind { addr, source })?;

        *self
            .local_addr
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(local);
        self.running.store(true, Ordering::SeqCst);
        info!(addr = %local, "gridlock server listening");

        let mut handlers: Vec<JoinHandle<()>> = Vec::new();

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            info!(%peer, "client connected");
                            let generator = Arc::clone(&self.generator);
                            let guard = ConnectionGuard::register(&self.active);
                            handlers.retain(|handle| !handle.is_finished());
                            handlers.push(tokio::spawn(handle_connection(
                                stream, peer, generator, guard,
                            )));
                        }
                        Err(e) => {
                            // Accept failures racing a stop request are expected
                            if self.running.load(Ordering::SeqCst) {
                                warn!(error = %e, "failed to accept connection");
                            } else {
                                break;
                            }
                        }
                    }
                }
                _ = shutdown_rx.changed() => break,
            }
        }

        // Release the port before tearing down handlers
        drop(listener);
        for handle in &handlers {
            handle.abort();
        }
        for handle in handlers {
            let _ = handle.await;
        }
        self.running.store(false, Ordering::SeqCst);
        // Clear the consumed stop request so a later start serves again
        self.shutdown.send_replace(false);
        info!("gridlock server stopped");
        Ok(())
    }

    /// Request shutdown: the accept loop exits, the port is released and
    /// every open connection is closed. Safe to call from any task, any
    /// number of times. A stop that lands before the server is up is held
    /// and consumed by the next [`start`](Self::start).
    pub fn stop(&self) {
        if self.running.swap(false, Ordering::SeqCst) {
            info!("stop requested");
        }
        // send_replace stores the request even with no receiver subscribed;
        // a plain send would discard it until start() subscribes.
        self.shutdown.send_replace(true);
    }

    /// Address actually bound, once the server is up (port 0 resolves here).
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self
            .local_addr
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Number of connections currently being served.
    pub fn active_connections(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }
}

// Keeps the live-connection count honest even when a handler task is
// aborted mid-read: the decrement rides on Drop.
struct ConnectionGuard {
    active: Arc<AtomicUsize>,
}

impl ConnectionGuard {
    fn register(active: &Arc<AtomicUsize>) -> Self {
        active.fetch_add(1, Ordering::SeqCst);
        Self {
            active: Arc::clone(active),
        }
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    generator: Arc<SnapshotGenerator>,
    _guard: ConnectionGuard,
) {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if line == REQUEST_SIMULATION_DATA {
                    let snapshot = generator.generate();
                    let mut payload = match serde_json::to_string(&snapshot) {
                        Ok(json) => json,
                        Err(e) => {
                            warn!(%peer, error = %e, "failed to encode snapshot");
                            continue;
                        }
                    };
                    payload.push('\n');
                    if let Err(e) = writer.write_all(payload.as_bytes()).await {
                        warn!(%peer, error = %e, "failed to send snapshot");
                        break;
                    }
                    if let Err(e) = writer.flush().await {
                        warn!(%peer, error = %e, "failed to flush snapshot");
                        break;
                    }
                    info!(%peer, "served simulation snapshot");
                } else {
                    // Anything else is deliberately a no-op; the connection stays open
                    debug!(%peer, input = %line, "ignoring unrecognized input");
                }
            }
            Ok(None) => {
                info!(%peer, "client disconnected");
                break;
            }
            Err(e) => {
                warn!(%peer, error = %e, "connection error");
                break;
            }
        }
    }

    if let Err(e) = writer.shutdown().await {
        debug!(%peer, error = %e, "error closing connection");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_uses_the_well_known_port() {
        let config = ServerConfig::default();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, DEFAULT_PORT);
    }

    #[test]
    fn bind_error_names_the_address() {
        let err = ServerError::Bind {
            addr: "0.0.0.0:12345".to_string(),
            source: io::Error::new(io::ErrorKind::AddrInUse, "address in use"),
        };
        assert!(err.to_string().contains("0.0.0.0:12345"));
    }
}
