//! TCP client for the Carbon plaintext listener.
//!
//! The client owns at most one connection. It never retries and never
//! buffers: a failed write drops the connection and reports the error, and
//! the caller decides when to reconnect.

use std::future::Future;
use std::io;

use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

use crate::config::Config;

/// Errors that can occur while talking to the collector.
#[derive(Debug)]
pub enum CollectorError {
    /// TCP connection could not be established
    Connect { addr: String, source: io::Error },

    /// Writing to an established connection failed
    Write(io::Error),

    /// A send was attempted without an open connection
    NotConnected,
}

impl std::fmt::Display for CollectorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CollectorError::Connect { addr, source } => {
                write!(f, "Failed to connect to {}: {}", addr, source)
            }
            CollectorError::Write(e) => write!(f, "Failed to send metric: {}", e),
            CollectorError::NotConnected => write!(f, "Not connected to collector"),
        }
    }
}

impl std::error::Error for CollectorError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CollectorError::Connect { source, .. } => Some(source),
            CollectorError::Write(e) => Some(e),
            CollectorError::NotConnected => None,
        }
    }
}

/// Counters about client operations.
#[derive(Debug, Clone, Default)]
pub struct ClientStats {
    /// Connections successfully opened
    pub connects: u64,

    /// Connection attempts that failed
    pub failed_connects: u64,

    /// Lines written in full
    pub lines_sent: u64,

    /// Writes that failed and dropped the connection
    pub failed_sends: u64,
}

/// Destination for serialized metric lines.
///
/// `CollectorClient` is the TCP implementation; the poll loop is generic over
/// this trait so its state machine can be driven with a scripted transport.
pub trait MetricSink {
    /// Open the connection. Must not open a second one while connected.
    fn connect(&mut self) -> impl Future<Output = Result<(), CollectorError>>;

    /// Write one complete line. On error the connection is gone.
    fn send_line(&mut self, line: &str) -> impl Future<Output = Result<(), CollectorError>>;

    /// Drop the connection, if any.
    fn disconnect(&mut self);

    fn is_connected(&self) -> bool;
}

/// Persistent TCP connection to a Carbon collector.
///
/// # Example
///
/// ```no_run
/// use w1_graphite::client::{CollectorClient, MetricSink};
/// use w1_graphite::config::Config;
///
/// #[tokio::main(flavor = "current_thread")]
/// async fn main() {
///     let config = Config::default();
///     let mut client = CollectorClient::new(&config);
///
///     if client.connect().await.is_ok() {
///         client.send_line("server-room.temp1 21.5 1700000000\n").await.ok();
///     }
/// }
/// ```
pub struct CollectorClient {
    /// `host:port` of the collector
    addr: String,

    /// Open connection, `None` while disconnected
    stream: Option<TcpStream>,

    stats: ClientStats,
}

impl CollectorClient {
    /// Create a disconnected client for the collector named in `config`.
    pub fn new(config: &Config) -> Self {
        Self::with_addr(config.collector_addr())
    }

    /// Create a disconnected client for an explicit `host:port`.
    pub fn with_addr(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            stream: None,
            stats: ClientStats::default(),
        }
    }

    /// Get the collector address.
    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Get current client statistics.
    pub fn stats(&self) -> &ClientStats {
        &self.stats
    }
}

impl MetricSink for CollectorClient {
    async fn connect(&mut self) -> Result<(), CollectorError> {
        if self.stream.is_some() {
            debug!(addr = %self.addr, "Already connected, not reconnecting");
            return Ok(());
        }

        match TcpStream::connect(&self.addr).await {
            Ok(stream) => {
                // One small line per cadence; don't let Nagle hold it back.
                stream.set_nodelay(true).ok();
                self.stats.connects += 1;
                info!(
                    addr = %self.addr,
                    connects = self.stats.connects,
                    failed_connects = self.stats.failed_connects,
                    lines_sent = self.stats.lines_sent,
                    failed_sends = self.stats.failed_sends,
                    "Connected to collector"
                );
                self.stream = Some(stream);
                Ok(())
            }
            Err(source) => {
                self.stats.failed_connects += 1;
                Err(CollectorError::Connect {
                    addr: self.addr.clone(),
                    source,
                })
            }
        }
    }

    async fn send_line(&mut self, line: &str) -> Result<(), CollectorError> {
        let stream = self.stream.as_mut().ok_or(CollectorError::NotConnected)?;

        let written = match stream.write_all(line.as_bytes()).await {
            Ok(()) => stream.flush().await,
            Err(e) => Err(e),
        };

        match written {
            Ok(()) => {
                self.stats.lines_sent += 1;
                debug!(bytes = line.len(), "Metric line sent");
                Ok(())
            }
            Err(e) => {
                self.stats.failed_sends += 1;
                self.stream = None;
                warn!(
                    addr = %self.addr,
                    error = %e,
                    lines_sent = self.stats.lines_sent,
                    failed_sends = self.stats.failed_sends,
                    "Collector connection lost"
                );
                Err(CollectorError::Write(e))
            }
        }
    }

    fn disconnect(&mut self) {
        if self.stream.take().is_some() {
            debug!(addr = %self.addr, "Dropped collector connection");
        }
    }

    fn is_connected(&self) -> bool {
        self.stream.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;
    use tokio::io::AsyncBufReadExt;
    use tokio::io::BufReader;
    use tokio::net::TcpListener;

    async fn closed_port_addr() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);
        addr
    }

    #[test]
    fn test_collector_error_display() {
        let err = CollectorError::NotConnected;
        assert_eq!(format!("{}", err), "Not connected to collector");

        let err = CollectorError::Connect {
            addr: "10.0.0.1:2003".to_string(),
            source: io::Error::new(io::ErrorKind::ConnectionRefused, "refused"),
        };
        assert!(format!("{}", err).contains("10.0.0.1:2003"));
        assert!(err.source().is_some());

        let err = CollectorError::Write(io::Error::new(io::ErrorKind::BrokenPipe, "pipe"));
        assert!(format!("{}", err).contains("pipe"));
    }

    #[test]
    fn test_client_creation() {
        let config = Config::default();
        let client = CollectorClient::new(&config);
        assert_eq!(client.addr(), "192.168.10.20:2003");
        assert!(!client.is_connected());
        assert_eq!(client.stats().connects, 0);
    }

    #[tokio::test]
    async fn test_send_without_connection() {
        let mut client = CollectorClient::with_addr("127.0.0.1:1");
        let result = client.send_line("a 1 1\n").await;
        assert!(matches!(result, Err(CollectorError::NotConnected)));
    }

    #[tokio::test]
    async fn test_connect_failure_is_reported() {
        let mut client = CollectorClient::with_addr(closed_port_addr().await);
        let result = client.connect().await;
        assert!(matches!(result, Err(CollectorError::Connect { .. })));
        assert!(!client.is_connected());
        assert_eq!(client.stats().failed_connects, 1);
    }

    #[tokio::test]
    async fn test_send_line_reaches_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let mut lines = BufReader::new(socket).lines();
            let mut received = Vec::new();
            while let Some(line) = lines.next_line().await.unwrap() {
                received.push(line);
            }
            received
        });

        let mut client = CollectorClient::with_addr(addr);
        client.connect().await.unwrap();
        assert!(client.is_connected());

        client.send_line("ns 23.5 1700000000\n").await.unwrap();
        client.send_line("ns 23.625 1700000005\n").await.unwrap();
        assert_eq!(client.stats().lines_sent, 2);

        client.disconnect();
        assert!(!client.is_connected());

        let received = server.await.unwrap();
        assert_eq!(received, vec!["ns 23.5 1700000000", "ns 23.625 1700000005"]);
    }

    #[tokio::test]
    async fn test_write_after_peer_close_drops_connection() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let mut client = CollectorClient::with_addr(addr);
        client.connect().await.unwrap();
        let (socket, _) = listener.accept().await.unwrap();
        drop(socket);

        // The first write after the peer closes usually succeeds; the RST it
        // provokes makes a later one fail.
        let mut failure = None;
        for _ in 0..50 {
            match client.send_line("ns 1 1\n").await {
                Ok(()) => tokio::time::sleep(std::time::Duration::from_millis(10)).await,
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }

        assert!(matches!(failure, Some(CollectorError::Write(_))));
        assert!(!client.is_connected());
        assert_eq!(client.stats().failed_sends, 1);
        assert!(matches!(
            client.send_line("ns 1 1\n").await,
            Err(CollectorError::NotConnected)
        ));

        client.connect().await.unwrap();
        assert_eq!(client.stats().connects, 2);
    }

    #[tokio::test]
    async fn test_connect_is_noop_while_connected() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let mut client = CollectorClient::with_addr(addr);
        client.connect().await.unwrap();
        client.connect().await.unwrap();
        assert_eq!(client.stats().connects, 1);

        let (_first, _) = listener.accept().await.unwrap();
        let second = tokio::time::timeout(
            std::time::Duration::from_millis(100),
            listener.accept(),
        )
        .await;
        assert!(second.is_err(), "a second connection was opened");
    }
}
