//! Per-connection forwarding for tunnels.
//!
//! Each local connection accepted by a [`Tunnel`](crate::migrate::tunnel::Tunnel)
//! gets its own `direct-tcpip` channel (RFC 4254) to the tunnel target, and
//! bytes are pumped in both directions until either side closes:
//!
//! - local client -> SSH channel -> remote target
//! - remote target -> SSH channel -> local client
//!
//! The SSH handle is only locked while a channel is opened, so many
//! connections can share one transport. Channel I/O never takes the lock.
//!
//! [`ForwardTransport`] is the seam between the tunnel and SSH. Production
//! code uses [`SshTransport`]; tests substitute a plain TCP transport.

use std::net::SocketAddr;
use std::pin::Pin;

use async_trait::async_trait;
use russh::client;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::migrate::error::{MigrateError, Result};
use crate::migrate::session::TunnelClientHandler;
use crate::migrate::types::RemoteTarget;

/// Byte stream carried by a forwarded channel.
pub trait ForwardIo: AsyncRead + AsyncWrite + Send {}

impl<T: AsyncRead + AsyncWrite + Send> ForwardIo for T {}

pub type ForwardStream = Pin<Box<dyn ForwardIo>>;

/// Opens channels to a tunnel target over an established transport.
#[async_trait]
pub trait ForwardTransport: Send + Sync {
    /// Open a channel to `target` on behalf of the local peer `originator`.
    async fn open_channel(
        &self,
        target: &RemoteTarget,
        originator: SocketAddr,
    ) -> Result<ForwardStream>;

    /// Tear down the transport. Called once, after every channel is closed.
    async fn disconnect(&self);

    /// Human-readable transport address for logs.
    fn describe(&self) -> String;
}

/// SSH connection used as a forwarding transport.
pub struct SshTransport {
    handle: Mutex<client::Handle<TunnelClientHandler>>,
    address: String,
}

impl SshTransport {
    pub fn new(handle: client::Handle<TunnelClientHandler>, address: impl Into<String>) -> Self {
        Self {
            handle: Mutex::new(handle),
            address: address.into(),
        }
    }
}

#[async_trait]
impl ForwardTransport for SshTransport {
    async fn open_channel(
        &self,
        target: &RemoteTarget,
        originator: SocketAddr,
    ) -> Result<ForwardStream> {
        let handle = self.handle.lock().await;

        let channel = handle
            .channel_open_direct_tcpip(
                target.host.as_str(),
                u32::from(target.port),
                originator.ip().to_string(),
                u32::from(originator.port()),
            )
            .await
            .map_err(|e| {
                MigrateError::Transport(format!(
                    "Failed to open direct-tcpip channel to {} via {}: {}",
                    target, self.address, e
                ))
            })?;

        drop(handle);

        Ok(Box::pin(channel.into_stream()))
    }

    async fn disconnect(&self) {
        let handle = self.handle.lock().await;
        if let Err(e) = handle
            .disconnect(russh::Disconnect::ByApplication, "", "en")
            .await
        {
            debug!("SSH disconnect from {} failed: {}", self.address, e);
        }
    }

    fn describe(&self) -> String {
        self.address.clone()
    }
}

/// Forward one accepted local connection until either side closes or
/// `cancel` fires.
pub(crate) async fn forward_connection(
    transport: &dyn ForwardTransport,
    local_stream: TcpStream,
    peer: SocketAddr,
    target: &RemoteTarget,
    cancel: CancellationToken,
) -> Result<()> {
    let channel_stream = tokio::select! {
        _ = cancel.cancelled() => return Ok(()),
        stream = transport.open_channel(target, peer) => stream?,
    };

    let (mut local_read, mut local_write) = tokio::io::split(local_stream);
    let (mut channel_read, mut channel_write) = tokio::io::split(channel_stream);

    let local_to_remote = tokio::io::copy(&mut local_read, &mut channel_write);
    let remote_to_local = tokio::io::copy(&mut channel_read, &mut local_write);

    tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            debug!("Connection from {} cancelled", peer);
        }
        result = local_to_remote => {
            if let Err(e) = result {
                debug!("Local to remote copy for {} ended: {}", peer, e);
            }
        }
        result = remote_to_local => {
            if let Err(e) = result {
                debug!("Remote to local copy for {} ended: {}", peer, e);
            }
        }
    }

    debug!("Forwarded connection from {} closed", peer);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrate::testing::{TcpTransport, spawn_echo_server};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    async fn local_pair() -> (TcpStream, TcpStream, SocketAddr) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap())
            .await
            .unwrap();
        let (server, peer) = listener.accept().await.unwrap();
        (client, server, peer)
    }

    #[tokio::test]
    async fn test_bytes_flow_both_ways() {
        let echo = spawn_echo_server().await;
        let target = RemoteTarget {
            host: echo.ip().to_string(),
            port: echo.port(),
        };
        let transport = TcpTransport::new();
        let (mut client, server, peer) = local_pair().await;

        let task = tokio::spawn(async move {
            forward_connection(&transport, server, peer, &target, CancellationToken::new()).await
        });

        client.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");

        drop(client);
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_channel_open_failure_is_transport_error() {
        let transport = TcpTransport::new();
        transport.disconnect().await;
        let (_client, server, peer) = local_pair().await;
        let target = RemoteTarget {
            host: "127.0.0.1".to_string(),
            port: 9,
        };

        let err = forward_connection(&transport, server, peer, &target, CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, MigrateError::Transport(_)));
    }

    #[tokio::test]
    async fn test_cancel_ends_idle_connection() {
        let echo = spawn_echo_server().await;
        let target = RemoteTarget {
            host: echo.ip().to_string(),
            port: echo.port(),
        };
        let transport = TcpTransport::new();
        let (mut client, server, peer) = local_pair().await;
        let cancel = CancellationToken::new();

        let child = cancel.clone();
        let task = tokio::spawn(async move {
            forward_connection(&transport, server, peer, &target, child).await
        });

        // Make sure the channel is up before cancelling
        client.write_all(b"x").await.unwrap();
        let mut buf = [0u8; 1];
        client.read_exact(&mut buf).await.unwrap();

        cancel.cancel();
        task.await.unwrap().unwrap();

        let n = client.read(&mut buf).await.unwrap_or(0);
        assert_eq!(n, 0);
    }
}
