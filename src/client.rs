use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::server::REQUEST_SIMULATION_DATA;

/// Event-channel capacity per session. A slow consumer backpressures the
/// read loop instead of losing lines.
pub const EVENT_CHANNEL_CAPACITY: usize = 32;

/// Notifications a session delivers to its consumer, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// One line received from the server.
    Line(String),
    /// The session left the connected state (peer close, I/O error or a
    /// local disconnect). Sent exactly once per session, after any lines
    /// already queued.
    Disconnected,
}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },
    #[error("session is not connected")]
    NotConnected,
    #[error("failed to send command: {0}")]
    Write(#[from] io::Error),
}

// The non-visual half of a client: owns the connection, runs a background
// read task and hands every received line to the consumer through the
// event channel returned by `connect`.
pub struct ClientSession {
    writer: OwnedWriteHalf,
    connected: Arc<AtomicBool>,
    events: mpsc::Sender<SessionEvent>,
    read_task: JoinHandle<()>,
}

impl ClientSession {
    /// Connect to a server and start reading lines. The returned receiver
    /// yields [`SessionEvent`]s until the session disconnects.
    pub async fn connect(
        host: &str,
        port: u16,
    ) -> Result<(Self, mpsc::Receiver<SessionEvent>), ClientError> {
        let stream = TcpStream::connect((host, port))
            .await
            .map_err(|source| ClientError::Connect {
                addr: format!("{}:{}", host, port),
                source,
            })?;
        let (reader, writer) = stream.into_split();

        let connected = Arc::new(AtomicBool::new(true));
        let (events, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let read_task = tokio::spawn(read_loop(
            reader,
            Arc::clone(&connected),
            events.clone(),
        ));

        let session = Self {
            writer,
            connected,
            events,
            read_task,
        };
        Ok((session, events_rx))
    }

    /// Send one command line (the terminator is appended here).
    pub async fn send_command(&mut self, command: &str) -> Result<(), ClientError> {
        if !self.is_connected() {
            return Err(ClientError::NotConnected);
        }

        let mut line = String::with_capacity(command.len() + 1);
        line.push_str(command);
        line.push('\n');

        if let Err(e) = self.write_line(&line).await {
            warn!(error = %e, "send failed, closing session");
            self.read_task.abort();
            if self.connected.swap(false, Ordering::SeqCst) {
                notify_disconnected(&self.events);
            }
            return Err(ClientError::Write(e));
        }
        Ok(())
    }

    async fn write_line(&mut self, line: &str) -> io::Result<()> {
        self.writer.write_all(line.as_bytes()).await?;
        self.writer.flush().await
    }

    /// Ask the server for one fresh snapshot line.
    pub async fn request_snapshot(&mut self) -> Result<(), ClientError> {
        self.send_command(REQUEST_SIMULATION_DATA).await
    }

    /// Close both sides of the connection and stop the read task. Calling
    /// this on an already-closed session is a no-op.
    pub async fn disconnect(&mut self) {
        // Stop the reader before queueing the event so no line can land
        // behind it
        let was_connected = self.connected.swap(false, Ordering::SeqCst);
        self.read_task.abort();
        if was_connected {
            notify_disconnected(&self.events);
        }
        if let Err(e) = self.writer.shutdown().await {
            debug!(error = %e, "error closing connection");
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

impl Drop for ClientSession {
    fn drop(&mut self) {
        self.read_task.abort();
    }
}

async fn read_loop(
    reader: OwnedReadHalf,
    connected: Arc<AtomicBool>,
    events: mpsc::Sender<SessionEvent>,
) {
    let mut lines = BufReader::new(reader).lines();

    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                // Consumer gone means nobody is listening anymore
                if events.send(SessionEvent::Line(line)).await.is_err() {
                    break;
                }
            }
            Ok(None) => {
                debug!("server closed the connection");
                break;
            }
            Err(e) => {
                warn!(error = %e, "connection error");
                break;
            }
        }
    }

    if connected.swap(false, Ordering::SeqCst) {
        notify_disconnected(&events);
    }
}

// Must stay synchronous: callers swap `connected` and hand off with no await
// in between, so an abort cannot land mid-delivery. A channel full of
// undrained lines defers the event to a detached task that sends it once the
// consumer frees a slot, keeping it behind the lines already queued.
fn notify_disconnected(events: &mpsc::Sender<SessionEvent>) {
    if let Err(TrySendError::Full(event)) = events.try_send(SessionEvent::Disconnected) {
        let events = events.clone();
        tokio::spawn(async move {
            let _ = events.send(event).await;
        });
    }
}
