//! Local-port-forward tunnel.
//!
//! A [`Tunnel`] owns one authenticated transport, one listener on
//! `127.0.0.1:<local_port>`, and every forwarded connection accepted on it.
//! Everything it owns is released by [`Tunnel::close`]:
//!
//! 1. stop accepting,
//! 2. cancel and await every forwarded connection,
//! 3. drop the listener so the port can be bound again,
//! 4. disconnect the transport.
//!
//! `close` is idempotent. A tunnel dropped without `close` cancels its tasks
//! and disconnects in the background, but callers are expected to close
//! explicitly (see [`crate::migrate::lifecycle`]).

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::net::TcpListener;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::migrate::client::{self, ConnectOptions};
use crate::migrate::error::{MigrateError, Result};
use crate::migrate::forward::{ForwardTransport, SshTransport, forward_connection};
use crate::migrate::types::{RemoteTarget, TunnelSpec, TunnelState};

/// Pause after a failed accept before trying again.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

pub struct Tunnel {
    id: Uuid,
    local_addr: SocketAddr,
    target: RemoteTarget,
    transport: Arc<dyn ForwardTransport>,
    state: watch::Sender<TunnelState>,
    accept_cancel: CancellationToken,
    connections_cancel: CancellationToken,
    connections: Arc<DashMap<Uuid, SocketAddr>>,
    tracker: TaskTracker,
    /// Accept loop; hands the listener back when it stops. `None` once closed.
    accept_task: Mutex<Option<JoinHandle<TcpListener>>>,
}

impl Tunnel {
    /// Connect and authenticate over SSH, then start forwarding
    /// `127.0.0.1:<spec.local_port>` to the spec's remote target.
    ///
    /// On any error nothing is left open: no listener, no SSH session.
    pub async fn open(spec: &TunnelSpec, options: ConnectOptions) -> Result<Self> {
        let (state, _) = watch::channel(TunnelState::Closed);
        Self::open_with_state(spec, options, state).await
    }

    /// [`open`](Self::open) reporting every state change on `state`,
    /// including `Connecting` while the SSH handshake runs.
    ///
    /// The sender becomes the tunnel's own, so receivers subscribed before
    /// the call keep following it until close.
    pub async fn open_with_state(
        spec: &TunnelSpec,
        options: ConnectOptions,
        state: watch::Sender<TunnelState>,
    ) -> Result<Self> {
        state.send_replace(TunnelState::Connecting);
        debug!("Tunnel {} -> {} is connecting", spec.local_port, spec.target());

        let handle = match client::connect(spec, options).await {
            Ok(handle) => handle,
            Err(e) => {
                state.send_replace(TunnelState::Closed);
                return Err(e);
            }
        };
        let transport = Arc::new(SshTransport::new(handle, spec.ssh_address()));

        Self::launch(transport, spec.local_port, spec.target(), state).await
    }

    /// Start forwarding over an already established transport.
    ///
    /// Port 0 binds an ephemeral port; see [`local_addr`](Self::local_addr).
    /// If the port cannot be bound the transport is disconnected before the
    /// error is returned.
    pub async fn start(
        transport: Arc<dyn ForwardTransport>,
        local_port: u16,
        target: RemoteTarget,
    ) -> Result<Self> {
        let (state, _) = watch::channel(TunnelState::Closed);
        Self::launch(transport, local_port, target, state).await
    }

    async fn launch(
        transport: Arc<dyn ForwardTransport>,
        local_port: u16,
        target: RemoteTarget,
        state: watch::Sender<TunnelState>,
    ) -> Result<Self> {
        let bound = match TcpListener::bind((Ipv4Addr::LOCALHOST, local_port)).await {
            Ok(listener) => listener.local_addr().map(|addr| (listener, addr)),
            Err(e) => Err(e),
        };

        let (listener, local_addr) = match bound {
            Ok(bound) => bound,
            Err(source) => {
                transport.disconnect().await;
                state.send_replace(TunnelState::Closed);
                return Err(MigrateError::Bind {
                    port: local_port,
                    source,
                });
            }
        };

        let id = Uuid::new_v4();
        let accept_cancel = CancellationToken::new();
        let connections_cancel = CancellationToken::new();
        let connections = Arc::new(DashMap::new());
        let tracker = TaskTracker::new();

        let accept_task = tokio::spawn(accept_loop(
            listener,
            transport.clone(),
            target.clone(),
            accept_cancel.clone(),
            connections_cancel.clone(),
            connections.clone(),
            tracker.clone(),
        ));

        info!(
            "Tunnel {} open: {} -> {} via {}",
            id,
            local_addr,
            target,
            transport.describe()
        );

        state.send_replace(TunnelState::Open);

        Ok(Self {
            id,
            local_addr,
            target,
            transport,
            state,
            accept_cancel,
            connections_cancel,
            connections,
            tracker,
            accept_task: Mutex::new(Some(accept_task)),
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn target(&self) -> &RemoteTarget {
        &self.target
    }

    pub fn state(&self) -> TunnelState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<TunnelState> {
        self.state.subscribe()
    }

    /// Number of forwarded connections currently in flight.
    pub fn active_connections(&self) -> usize {
        self.connections.len()
    }

    /// Release everything the tunnel owns. Safe to call more than once;
    /// concurrent callers wait for the first to finish.
    pub async fn close(&self) {
        let mut accept_task = self.accept_task.lock().await;
        let Some(task) = accept_task.take() else {
            return;
        };

        self.state.send_replace(TunnelState::Closing);
        info!("Closing tunnel {} on {}", self.id, self.local_addr);

        self.accept_cancel.cancel();
        let listener = match task.await {
            Ok(listener) => Some(listener),
            Err(e) => {
                warn!("Accept loop for tunnel {} ended abnormally: {}", self.id, e);
                None
            }
        };

        let in_flight = self.connections.len();
        if in_flight > 0 {
            debug!("Cancelling {} forwarded connection(s)", in_flight);
        }
        self.connections_cancel.cancel();
        self.tracker.close();
        self.tracker.wait().await;

        drop(listener);

        self.transport.disconnect().await;
        self.state.send_replace(TunnelState::Closed);
        info!("Tunnel {} closed", self.id);
    }
}

impl Drop for Tunnel {
    fn drop(&mut self) {
        if *self.state.borrow() == TunnelState::Closed {
            return;
        }

        warn!("Tunnel {} dropped without close; tearing down", self.id);
        self.accept_cancel.cancel();
        self.connections_cancel.cancel();

        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            let transport = self.transport.clone();
            runtime.spawn(async move {
                transport.disconnect().await;
            });
        }
    }
}

async fn accept_loop(
    listener: TcpListener,
    transport: Arc<dyn ForwardTransport>,
    target: RemoteTarget,
    accept_cancel: CancellationToken,
    connections_cancel: CancellationToken,
    connections: Arc<DashMap<Uuid, SocketAddr>>,
    tracker: TaskTracker,
) -> TcpListener {
    loop {
        tokio::select! {
            biased;
            _ = accept_cancel.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    debug!("Accepted {} for {}", peer, target);

                    let connection_id = Uuid::new_v4();
                    connections.insert(connection_id, peer);

                    let transport = transport.clone();
                    let target = target.clone();
                    let cancel = connections_cancel.child_token();
                    let connections = connections.clone();

                    tracker.spawn(async move {
                        if let Err(e) =
                            forward_connection(transport.as_ref(), stream, peer, &target, cancel).await
                        {
                            warn!("Forwarding {} -> {} failed: {}", peer, target, e);
                        }
                        connections.remove(&connection_id);
                    });
                }
                Err(e) => {
                    warn!("Error accepting connection: {}", e);
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                }
            },
        }
    }

    listener
}
