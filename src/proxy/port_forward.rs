//! Raw TCP port-forward.
//!
//! # Responsibilities
//! - Bind a local port and accept connections until stopped
//! - Dial the remote endpoint for each connection and copy bytes both ways
//! - Stop in order: cancel, close the listener, wait for every tunnel task
//!
//! # Design Decisions
//! - Bind-then-report: `start` returns only after the listener is bound
//! - `start` and `stop` are idempotent; lifecycle calls serialize on an async mutex
//! - A failed dial closes only the client connection that triggered it

use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::copy_bidirectional;
use tokio::net::{TcpSocket, TcpStream};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::config::PortForwardConfig;
use crate::net::{ConnectionGuard, ConnectionPermit, ConnectionTracker, Listener, ListenerError};

/// Local and remote addresses of a port-forward.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub remote_host: String,
    pub remote_port: u16,
    pub local_port: u16,
}

impl Endpoint {
    pub fn remote(&self) -> String {
        format!("{}:{}", self.remote_host, self.remote_port)
    }
}

/// Listener settings shared by every port-forward of a gateway.
#[derive(Debug, Clone)]
pub struct PortForwardSettings {
    pub bind_host: String,
    pub dial_timeout: Duration,
    pub max_connections: usize,
}

impl Default for PortForwardSettings {
    fn default() -> Self {
        Self::from(&PortForwardConfig::default())
    }
}

impl From<&PortForwardConfig> for PortForwardSettings {
    fn from(config: &PortForwardConfig) -> Self {
        Self {
            bind_host: config.bind_host.clone(),
            dial_timeout: Duration::from_secs(config.dial_timeout_secs),
            max_connections: config.max_connections,
        }
    }
}

struct Running {
    cancel: CancellationToken,
    tasks: TaskTracker,
    accept: JoinHandle<()>,
    local_addr: SocketAddr,
}

/// A port-forward and its (optional) running listener.
#[derive(Debug)]
pub struct PortForward {
    id: String,
    endpoint: Endpoint,
    settings: PortForwardSettings,
    running: Mutex<Option<Running>>,
    bound: parking_lot::Mutex<Option<SocketAddr>>,
    connections: ConnectionTracker,
}

impl std::fmt::Debug for Running {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Running")
            .field("local_addr", &self.local_addr)
            .field("tunnels", &self.tasks.len())
            .finish()
    }
}

impl PortForward {
    pub fn new(id: String, endpoint: Endpoint, settings: PortForwardSettings) -> Self {
        Self {
            id,
            endpoint,
            settings,
            running: Mutex::new(None),
            bound: parking_lot::Mutex::new(None),
            connections: ConnectionTracker::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn is_started(&self) -> bool {
        self.bound.lock().is_some()
    }

    /// Address the listener is bound to while started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.bound.lock()
    }

    pub fn active_connections(&self) -> u64 {
        self.connections.active_count()
    }

    /// Bind the local port and start accepting. No-op if already started.
    pub async fn start(&self) -> Result<SocketAddr, ListenerError> {
        let mut running = self.running.lock().await;
        if let Some(current) = running.as_ref() {
            return Ok(current.local_addr);
        }

        let bind_addr = format!("{}:{}", self.settings.bind_host, self.endpoint.local_port);
        let listener = Listener::bind(&bind_addr, self.settings.max_connections).await?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| ListenerError::Bind {
                addr: bind_addr.clone(),
                source,
            })?;

        let cancel = CancellationToken::new();
        let tasks = TaskTracker::new();
        let accept = tokio::spawn(accept_loop(
            listener,
            AcceptContext {
                id: self.id.clone(),
                remote: self.endpoint.remote(),
                dial_timeout: self.settings.dial_timeout,
                cancel: cancel.clone(),
                tasks: tasks.clone(),
                connections: self.connections.clone(),
            },
        ));

        *running = Some(Running {
            cancel,
            tasks,
            accept,
            local_addr,
        });
        *self.bound.lock() = Some(local_addr);

        tracing::info!(
            proxy_id = %self.id,
            local_addr = %local_addr,
            remote = %self.endpoint.remote(),
            "Port-forward started"
        );
        Ok(local_addr)
    }

    /// Stop accepting, release the port and wait for open tunnels. No-op if stopped.
    pub async fn stop(&self) {
        let mut running = self.running.lock().await;
        let Some(current) = running.take() else {
            return;
        };

        current.cancel.cancel();
        if let Err(e) = current.accept.await {
            tracing::warn!(proxy_id = %self.id, error = %e, "Accept loop ended abnormally");
        }
        current.tasks.close();
        current.tasks.wait().await;
        *self.bound.lock() = None;

        tracing::info!(
            proxy_id = %self.id,
            local_addr = %current.local_addr,
            "Port-forward stopped"
        );
    }

    /// Stop then start.
    pub async fn reset(&self) -> Result<SocketAddr, ListenerError> {
        self.stop().await;
        self.start().await
    }
}

struct AcceptContext {
    id: String,
    remote: String,
    dial_timeout: Duration,
    cancel: CancellationToken,
    tasks: TaskTracker,
    connections: ConnectionTracker,
}

/// Runs until cancelled; the listener is dropped (closed) when this returns.
async fn accept_loop(listener: Listener, ctx: AcceptContext) {
    loop {
        let accepted = tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => break,
            accepted = listener.accept() => accepted,
        };

        match accepted {
            Ok((stream, peer, permit)) => {
                let guard = ctx.connections.track();
                ctx.tasks.spawn(tunnel(
                    stream,
                    peer,
                    permit,
                    guard,
                    ctx.remote.clone(),
                    ctx.dial_timeout,
                    ctx.cancel.clone(),
                ));
            }
            Err(ListenerError::Closed) => break,
            Err(e) => {
                tracing::warn!(proxy_id = %ctx.id, error = %e, "Accept failed");
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        }
    }
    tracing::debug!(proxy_id = %ctx.id, "Accept loop exited");
}

async fn tunnel(
    mut inbound: TcpStream,
    peer: SocketAddr,
    _permit: ConnectionPermit,
    guard: ConnectionGuard,
    remote: String,
    dial_timeout: Duration,
    cancel: CancellationToken,
) {
    let mut outbound = match dial(&remote, dial_timeout).await {
        Ok(stream) => stream,
        Err(e) => {
            tracing::warn!(
                connection_id = %guard.id(),
                peer_addr = %peer,
                remote = %remote,
                error = %e,
                "Port-forward dial failed"
            );
            metrics::counter!("gateway_port_forward_dial_errors_total").increment(1);
            return;
        }
    };

    tokio::select! {
        result = copy_bidirectional(&mut inbound, &mut outbound) => match result {
            Ok((sent, received)) => tracing::debug!(
                connection_id = %guard.id(),
                sent,
                received,
                "Tunnel closed"
            ),
            Err(e) => tracing::debug!(connection_id = %guard.id(), error = %e, "Tunnel error"),
        },
        _ = cancel.cancelled() => {
            tracing::debug!(connection_id = %guard.id(), "Tunnel closed by stop");
        }
    }
}

/// Connect to `remote` with keep-alive, giving up after `timeout`.
async fn dial(remote: &str, timeout: Duration) -> std::io::Result<TcpStream> {
    let connect = async {
        let mut last_err = None;
        for addr in tokio::net::lookup_host(remote).await? {
            let socket = if addr.is_ipv4() {
                TcpSocket::new_v4()?
            } else {
                TcpSocket::new_v6()?
            };
            socket.set_keepalive(true)?;
            match socket.connect(addr).await {
                Ok(stream) => return Ok(stream),
                Err(e) => last_err = Some(e),
            }
        }
        Err(last_err.unwrap_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::NotFound, "no address resolved")
        }))
    };

    tokio::time::timeout(timeout, connect)
        .await
        .map_err(|_| std::io::Error::new(std::io::ErrorKind::TimedOut, "dial timed out"))?
}
