//! Upstream dialing and bidirectional byte forwarding
//!
//! The router never looks at the bytes it moves: a spliced session is two
//! sockets joined by `copy_bidirectional`, raced against a sever signal.

use crate::error::BridgeError;
use socket2::{SockRef, TcpKeepalive};
use std::io;
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Keepalive idle time applied to both legs of a session
const TCP_KEEPALIVE_TIME: Duration = Duration::from_secs(15);

/// Bytes moved by one finished session
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionStats {
    pub bytes_client_to_backend: u64,
    pub bytes_backend_to_client: u64,
    pub connection_duration_ms: u64,
}

/// How a splice ended
#[derive(Debug)]
pub enum SpliceOutcome {
    /// Both directions reached EOF
    Completed(ConnectionStats),
    /// The owning backend severed the session
    Severed,
    /// One side failed mid-stream
    Failed(io::Error),
}

/// Dials upstream nodes and tunes sockets
#[derive(Debug, Clone)]
pub struct Connector {
    dial_timeout: Duration,
    keepalive: Duration,
}

impl Connector {
    pub fn new(dial_timeout: Duration) -> Self {
        Self {
            dial_timeout,
            keepalive: TCP_KEEPALIVE_TIME,
        }
    }

    pub fn dial_timeout(&self) -> Duration {
        self.dial_timeout
    }

    /// Connect to an upstream node, bounded by the dial timeout
    pub async fn connect(&self, host: &str, port: u16) -> Result<TcpStream, BridgeError> {
        let addr = format!("{}:{}", host, port);
        debug!(backend = %addr, "Connecting to backend");

        match timeout(self.dial_timeout, TcpStream::connect(&addr)).await {
            Ok(Ok(stream)) => {
                if let Err(e) = self.configure_stream(&stream) {
                    warn!(backend = %addr, error = %e, "Failed to configure backend stream");
                }
                Ok(stream)
            }
            Ok(Err(source)) => Err(BridgeError::Dial { addr, source }),
            Err(_) => Err(BridgeError::DialTimeout {
                addr,
                timeout: self.dial_timeout,
            }),
        }
    }

    /// Disable Nagle and enable keepalive so dead peers are noticed
    pub fn configure_stream(&self, stream: &TcpStream) -> io::Result<()> {
        stream.set_nodelay(true)?;
        let keepalive = TcpKeepalive::new().with_time(self.keepalive);
        SockRef::from(stream).set_tcp_keepalive(&keepalive)?;
        Ok(())
    }
}

impl Default for Connector {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

/// Copy bytes both ways until both sides close, one side fails, or `sever` fires.
///
/// The caller keeps ownership of both sockets; dropping them after a
/// `Severed` outcome is what actually tears the session down.
pub async fn splice(
    client: &mut TcpStream,
    upstream: &mut TcpStream,
    sever: &mut oneshot::Receiver<()>,
) -> SpliceOutcome {
    let started = Instant::now();

    tokio::select! {
        biased;
        _ = sever => SpliceOutcome::Severed,
        result = tokio::io::copy_bidirectional(client, upstream) => match result {
            Ok((to_backend, to_client)) => SpliceOutcome::Completed(ConnectionStats {
                bytes_client_to_backend: to_backend,
                bytes_backend_to_client: to_client,
                connection_duration_ms: started.elapsed().as_millis() as u64,
            }),
            Err(e) => SpliceOutcome::Failed(e),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{closed_port, echo_server};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    async fn socket_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (connected, accepted) = tokio::join!(TcpStream::connect(addr), listener.accept());
        (connected.unwrap(), accepted.unwrap().0)
    }

    #[tokio::test]
    async fn test_connect_success() {
        let port = echo_server().await;
        let connector = Connector::default();

        let stream = connector.connect("127.0.0.1", port).await.unwrap();
        assert!(stream.nodelay().unwrap());
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let port = closed_port().await;
        let connector = Connector::default();

        let result = connector.connect("127.0.0.1", port).await;
        assert!(matches!(result, Err(BridgeError::Dial { .. })));
    }

    #[tokio::test]
    async fn test_splice_forwards_and_reports_stats() {
        let upstream_port = echo_server().await;
        let connector = Connector::default();
        let (mut client_side, mut proxy_side) = socket_pair().await;
        let mut upstream = connector
            .connect("127.0.0.1", upstream_port)
            .await
            .unwrap();
        let (_sever_tx, mut sever_rx) = oneshot::channel();

        let splicer =
            tokio::spawn(
                async move { splice(&mut proxy_side, &mut upstream, &mut sever_rx).await },
            );

        client_side.write_all(b"SELECT 1").await.unwrap();
        let mut buffer = [0u8; 8];
        client_side.read_exact(&mut buffer).await.unwrap();
        assert_eq!(&buffer, b"SELECT 1");

        client_side.shutdown().await.unwrap();
        drop(client_side);

        match splicer.await.unwrap() {
            SpliceOutcome::Completed(stats) => {
                assert_eq!(stats.bytes_client_to_backend, 8);
                assert_eq!(stats.bytes_backend_to_client, 8);
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_splice_stops_when_severed() {
        let upstream_port = echo_server().await;
        let connector = Connector::default();
        let (_client_side, mut proxy_side) = socket_pair().await;
        let mut upstream = connector
            .connect("127.0.0.1", upstream_port)
            .await
            .unwrap();
        let (sever_tx, mut sever_rx) = oneshot::channel();

        let splicer =
            tokio::spawn(
                async move { splice(&mut proxy_side, &mut upstream, &mut sever_rx).await },
            );

        sever_tx.send(()).unwrap();
        let outcome = timeout(Duration::from_secs(2), splicer).await.unwrap().unwrap();
        assert!(matches!(outcome, SpliceOutcome::Severed));
    }
}
