//! Loopback fixtures shared by unit tests

use crate::config::BackendConfig;
use crate::core::Backend;
use crate::error::HealthCheckError;
use crate::health::{HealthChecker, NodeHealthSnapshot, WsrepLocalState};
use async_trait::async_trait;
use fnv::FnvHashMap;
use parking_lot::Mutex;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

/// Self-signed CA used to build TLS health checkers
pub const TEST_CA_PEM: &str = "-----BEGIN CERTIFICATE-----\n\
MIIBlDCCATmgAwIBAgIUIWXzyC20ddr709Jk1SciOS4d8OIwCgYIKoZIzj0EAwIw\n\
HjEcMBoGA1UEAwwTc3dpdGNoYm9hcmQgdGVzdCBDQTAgFw0yNjEwMTYwOTAzMTZa\n\
GA8yMTI2MDkyMjA5MDMxNlowHjEcMBoGA1UEAwwTc3dpdGNoYm9hcmQgdGVzdCBD\n\
QTBZMBMGByqGSM49AgEGCCqGSM49AwEHA0IABGrOik7VT073x2JtJ7rz+zFEJu8t\n\
vl2XcJ1NqHP+21QsJjv0+Hi99L6/zvfFMMZBNPJsN+3BO44ZZyv0b6XqcBmjUzBR\n\
MB0GA1UdDgQWBBQvCaRPKRKoR5ZZCgTgQ3HyDBFUjTAfBgNVHSMEGDAWgBQvCaRP\n\
KRKoR5ZZCgTgQ3HyDBFUjTAPBgNVHRMBAf8EBTADAQH/MAoGCCqGSM49BAMCA0kA\n\
MEYCIQCnz+02YuVsxqZ6Sd6l11zOzJquPfOsrmQHq5X9+rNtUQIhAMkTLn8XICMj\n\
O5kvP2rriF6CCdgIjmvnizh/97aT+UFf\n\
-----END CERTIFICATE-----\n\
";

pub fn backend_config(name: &str, port: u16, status_port: u16) -> BackendConfig {
    BackendConfig {
        name: name.to_string(),
        host: "127.0.0.1".to_string(),
        port,
        status_port,
        status_endpoint: "api/v1/status".to_string(),
    }
}

/// A loopback port with nothing listening on it
pub async fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

/// Starts a TCP echo server, standing in for a database node
pub async fn echo_server() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut buffer = [0u8; 1024];
                while let Ok(n) = stream.read(&mut buffer).await {
                    if n == 0 || stream.write_all(&buffer[..n]).await.is_err() {
                        break;
                    }
                }
            });
        }
    });
    port
}

/// Answers whatever arrives with a plain HTTP error and hangs up
pub async fn plaintext_http_server() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut buffer = [0u8; 1024];
                let _ = stream.read(&mut buffer).await;
                let _ = stream
                    .write_all(
                        b"HTTP/1.1 400 Bad Request\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
                    )
                    .await;
                let _ = stream.shutdown().await;
            });
        }
    });
    port
}

pub fn node(state: WsrepLocalState, read_only: bool) -> NodeHealthSnapshot {
    NodeHealthSnapshot {
        local_index: 0,
        local_state: state,
        read_only,
        maintenance_enabled: false,
    }
}

pub fn synced() -> NodeHealthSnapshot {
    node(WsrepLocalState::Synced, false)
}

/// Poll `condition` until it holds, panicking after two seconds
pub async fn wait_until<F, Fut>(mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    tokio::time::timeout(Duration::from_secs(2), async {
        while !condition().await {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition never became true");
}

struct AgentReply {
    status: u16,
    body: String,
    stalled: bool,
}

/// Minimal galera agent answering every request with a canned reply
pub struct FakeAgent {
    port: u16,
    reply: Arc<Mutex<AgentReply>>,
    requests: Arc<AtomicUsize>,
}

impl FakeAgent {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let reply = Arc::new(Mutex::new(AgentReply {
            status: 200,
            body: "{}".to_string(),
            stalled: false,
        }));
        let requests = Arc::new(AtomicUsize::new(0));

        let task_reply = Arc::clone(&reply);
        let task_requests = Arc::clone(&requests);
        tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                let reply = Arc::clone(&task_reply);
                let requests = Arc::clone(&task_requests);
                tokio::spawn(async move {
                    let mut request = Vec::new();
                    let mut buffer = [0u8; 1024];
                    loop {
                        match stream.read(&mut buffer).await {
                            Ok(0) | Err(_) => return,
                            Ok(n) => request.extend_from_slice(&buffer[..n]),
                        }
                        if request.windows(4).any(|w| w == b"\r\n\r\n") {
                            break;
                        }
                    }
                    requests.fetch_add(1, Ordering::SeqCst);

                    let (status, body, stalled) = {
                        let reply = reply.lock();
                        (reply.status, reply.body.clone(), reply.stalled)
                    };
                    if stalled {
                        tokio::time::sleep(Duration::from_secs(3600)).await;
                        return;
                    }

                    let response = format!(
                        "HTTP/1.1 {} Canned\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                        status,
                        body.len(),
                        body
                    );
                    let _ = stream.write_all(response.as_bytes()).await;
                    let _ = stream.shutdown().await;
                });
            }
        });

        Self {
            port,
            reply,
            requests,
        }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn respond(&self, status: u16, body: &str) {
        let mut reply = self.reply.lock();
        reply.status = status;
        reply.body = body.to_string();
        reply.stalled = false;
    }

    pub fn respond_with(&self, snapshot: &NodeHealthSnapshot) {
        self.respond(200, &serde_json::to_string(snapshot).unwrap());
    }

    /// Accept requests but never answer them
    pub fn stall(&self) {
        self.reply.lock().stalled = true;
    }

    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }
}

/// Health checker whose answers are set per backend name by the test
#[derive(Default)]
pub struct ScriptedHealthChecker {
    answers: Mutex<FnvHashMap<String, Option<NodeHealthSnapshot>>>,
}

impl ScriptedHealthChecker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, backend: &str, snapshot: NodeHealthSnapshot) {
        self.answers.lock().insert(backend.to_string(), Some(snapshot));
    }

    pub fn fail(&self, backend: &str) {
        self.answers.lock().insert(backend.to_string(), None);
    }
}

#[async_trait]
impl HealthChecker for ScriptedHealthChecker {
    async fn check(&self, backend: &Backend) -> Result<NodeHealthSnapshot, HealthCheckError> {
        match self.answers.lock().get(backend.name()) {
            Some(Some(snapshot)) => Ok(snapshot.clone()),
            _ => Err(HealthCheckError::Request {
                url: backend.healthcheck_url("http"),
                reason: "scripted failure".to_string(),
            }),
        }
    }
}
