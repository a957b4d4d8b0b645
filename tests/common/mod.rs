//! Shared harness: an in-process server on an ephemeral port plus a raw
//! line-oriented client for driving the wire protocol directly.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use gridlock::{GridlockServer, ServerConfig, SnapshotGenerator};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio::time::timeout;

pub struct TestServer {
    pub server: Arc<GridlockServer>,
    pub addr: SocketAddr,
    run_task: JoinHandle<()>,
}

impl TestServer {
    /// Bind 127.0.0.1 on an ephemeral port and wait until the listener
    /// is up.
    pub async fn start() -> TestServer {
        Self::start_seeded(SnapshotGenerator::new()).await
    }

    pub async fn start_seeded(generator: SnapshotGenerator) -> TestServer {
        let config = ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
        };
        let server = Arc::new(GridlockServer::with_generator(config, Arc::new(generator)));

        let runner = Arc::clone(&server);
        let run_task = tokio::spawn(async move {
            runner.start().await.expect("test server failed to start");
        });

        let addr = wait_for(|| server.local_addr()).await;
        TestServer {
            server,
            addr,
            run_task,
        }
    }

    /// Stop the server and wait for the accept loop to wind down.
    pub async fn stop(self) {
        self.server.stop();
        let _ = self.run_task.await;
    }
}

/// Poll `check` every 10ms until it yields a value, for at most two seconds.
pub async fn wait_for<T>(mut check: impl FnMut() -> Option<T>) -> T {
    for _ in 0..200 {
        if let Some(value) = check() {
            return value;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached within two seconds");
}

pub struct LineClient {
    lines: Lines<BufReader<OwnedReadHalf>>,
    writer: OwnedWriteHalf,
}

impl LineClient {
    pub async fn connect(addr: SocketAddr) -> LineClient {
        let stream = TcpStream::connect(addr).await.expect("connect failed");
        let (reader, writer) = stream.into_split();
        LineClient {
            lines: BufReader::new(reader).lines(),
            writer,
        }
    }

    /// Send one line; the terminator is appended here.
    pub async fn send_line(&mut self, line: &str) {
        self.send_raw(format!("{line}\n").as_bytes()).await;
    }

    pub async fn send_raw(&mut self, bytes: &[u8]) {
        self.writer.write_all(bytes).await.expect("write failed");
        self.writer.flush().await.expect("flush failed");
    }

    /// Next line within `wait`; None when the server stays silent.
    pub async fn try_read_line(&mut self, wait: Duration) -> Option<String> {
        match timeout(wait, self.lines.next_line()).await {
            Ok(Ok(line)) => line,
            Ok(Err(e)) => panic!("read failed: {e}"),
            Err(_) => None,
        }
    }

    /// Next line, failing the test if nothing arrives in time.
    pub async fn read_line(&mut self) -> String {
        self.try_read_line(Duration::from_secs(2))
            .await
            .expect("expected a response line")
    }

    /// True once the server has closed its side of the connection.
    pub async fn read_eof(&mut self, wait: Duration) -> bool {
        matches!(
            timeout(wait, self.lines.next_line()).await,
            Ok(Ok(None)) | Ok(Err(_))
        )
    }
}
