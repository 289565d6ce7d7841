//! Data-plane listener
//!
//! A [`BridgeRunner`] owns one TCP listener. A dedicated accept task feeds
//! accepted sockets into a single event loop, which is the only place the
//! runner's routing state (`traffic_enabled`, the active backend) is read
//! or written. Because severing the previous backend and routing a new
//! connection both happen in that loop, a connection accepted after a
//! switch is never routed before the old backend's sessions are gone.
//!
//! Each runner carries a [`TrafficClass`] and only ever severs sessions of
//! its own class, so the primary and inactive routers can share backends.

use crate::core::{
    backend_name, same_backend, ActiveBackend, ActiveBackendReceiver, ActiveBackendSender,
    TrafficClass, TrafficEnabledReceiver, TrafficEnabledSender,
};
use crate::error::BridgeError;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Accepted connections waiting for the event loop
const ACCEPT_QUEUE_DEPTH: usize = 128;

/// Pause after a failed accept, e.g. when out of file descriptors
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(50);

pub struct BridgeRunner {
    class: TrafficClass,
    listener: TcpListener,
    local_addr: SocketAddr,
    shutdown_delay: Duration,
    active_tx: ActiveBackendSender,
    active_rx: ActiveBackendReceiver,
    traffic_tx: TrafficEnabledSender,
    traffic_rx: TrafficEnabledReceiver,
}

/// Routing state, touched only by the event loop
struct Routing {
    traffic_enabled: bool,
    active: ActiveBackend,
}

impl BridgeRunner {
    /// Bind the listener. Failure here is fatal to the process.
    pub async fn bind(
        class: TrafficClass,
        addr: &str,
        shutdown_delay: Duration,
    ) -> Result<Self, BridgeError> {
        let listener = TcpListener::bind(addr).await.map_err(|source| BridgeError::Bind {
            addr: addr.to_string(),
            source,
        })?;
        let local_addr = listener.local_addr().map_err(|source| BridgeError::Bind {
            addr: addr.to_string(),
            source,
        })?;

        let (active_tx, active_rx) = mpsc::unbounded_channel();
        let (traffic_tx, traffic_rx) = mpsc::unbounded_channel();

        Ok(Self {
            class,
            listener,
            local_addr,
            shutdown_delay,
            active_tx,
            active_rx,
            traffic_tx,
            traffic_rx,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn class(&self) -> TrafficClass {
        self.class
    }

    /// Queue to register with a cluster monitor
    pub fn active_backend_sender(&self) -> ActiveBackendSender {
        self.active_tx.clone()
    }

    /// Queue to register with the cluster state
    pub fn traffic_enabled_sender(&self) -> TrafficEnabledSender {
        self.traffic_tx.clone()
    }

    /// Route connections until shutdown, then close the listener after the shutdown delay
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let class = self.class;
        info!(runner = %class, addr = %self.local_addr, "Proxy listening");

        let (conn_tx, mut connections) = mpsc::channel(ACCEPT_QUEUE_DEPTH);
        let accept_task = spawn_accept_loop(self.listener, conn_tx, class);

        let mut routing = Routing {
            traffic_enabled: true,
            active: None,
        };

        loop {
            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                Some(enabled) = self.traffic_rx.recv() => {
                    set_traffic_enabled(class, &mut routing, enabled).await;
                }
                Some(active) = self.active_rx.recv() => {
                    set_active_backend(class, &mut routing, active).await;
                }
                Some((stream, peer)) = connections.recv() => {
                    route(class, &routing, stream, peer);
                }
            }
        }

        info!(
            runner = %class,
            delay_ms = self.shutdown_delay.as_millis() as u64,
            "Received shutdown signal"
        );

        // Connections accepted during the delay are closed without being routed
        let drain = async {
            while let Some((stream, peer)) = connections.recv().await {
                debug!(runner = %class, client = %peer, "Shutting down; closing client connection");
                drop(stream);
            }
        };
        tokio::select! {
            _ = tokio::time::sleep(self.shutdown_delay) => {}
            _ = drain => {}
        }

        accept_task.abort();
        let _ = accept_task.await;

        info!(runner = %class, "Proxy runner has exited");
    }
}

fn spawn_accept_loop(
    listener: TcpListener,
    connections: mpsc::Sender<(TcpStream, SocketAddr)>,
    class: TrafficClass,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok(accepted) => {
                    if connections.send(accepted).await.is_err() {
                        return;
                    }
                }
                Err(e) => {
                    error!(runner = %class, error = %e, "Error accepting client connection");
                    tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                }
            }
        }
    })
}

async fn set_traffic_enabled(class: TrafficClass, routing: &mut Routing, enabled: bool) {
    if routing.traffic_enabled && !enabled {
        if let Some(active) = &routing.active {
            info!(runner = %class, backend = %active, "Traffic disabled; severing connections");
            active.sever_class_connections(class).await;
        }
    }
    if routing.traffic_enabled != enabled {
        info!(runner = %class, traffic_enabled = enabled, "Traffic state changed");
    }
    routing.traffic_enabled = enabled;
}

async fn set_active_backend(class: TrafficClass, routing: &mut Routing, active: ActiveBackend) {
    if same_backend(&routing.active, &active) {
        return;
    }
    if let Some(previous) = &routing.active {
        previous.sever_class_connections(class).await;
    }
    info!(
        runner = %class,
        previous = backend_name(&routing.active),
        backend = backend_name(&active),
        "Done severing connections, new active backend"
    );
    routing.active = active;
}

fn route(class: TrafficClass, routing: &Routing, stream: TcpStream, peer: SocketAddr) {
    if !routing.traffic_enabled {
        debug!(runner = %class, client = %peer, "Traffic disabled; closing client connection");
        return;
    }

    let Some(backend) = &routing.active else {
        warn!(runner = %class, client = %peer, "No active backend");
        return;
    };

    // Registered here, before the task runs, so a later sever covers it
    let session = backend.open_session(class, peer);
    let backend = Arc::clone(backend);
    tokio::spawn(async move {
        if let Err(e) = backend.bridge_session(session, stream).await {
            error!(backend = %backend, client = %peer, error = %e, "Error routing to backend");
        }
    });
}
