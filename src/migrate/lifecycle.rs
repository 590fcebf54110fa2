//! Scoped tunnel acquisition.
//!
//! [`with_tunnel`] opens a tunnel, waits for the store to answer through it,
//! runs one operation, and closes the tunnel on every exit path: success,
//! error, or SIGINT/SIGTERM. Interruption is a cancellation of the operation
//! future followed by the normal close, never a process-exit hook.

use std::future::Future;

use tracing::{info, warn};

use crate::migrate::config::RunSettings;
use crate::migrate::error::{MigrateError, Result};
use crate::migrate::transport::{ConfigTransport, TransportOptions};
use crate::migrate::tunnel::Tunnel;
use crate::migrate::types::TunnelSpec;

/// Run `op` against the store behind `spec`, interrupted by process signals.
pub async fn with_tunnel<F, Fut, T>(spec: &TunnelSpec, settings: &RunSettings, op: F) -> Result<T>
where
    F: FnOnce(ConfigTransport) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    with_tunnel_until(spec, settings, shutdown_signal(), op).await
}

/// [`with_tunnel`] with an explicit shutdown future.
pub async fn with_tunnel_until<S, F, Fut, T>(
    spec: &TunnelSpec,
    settings: &RunSettings,
    shutdown: S,
    op: F,
) -> Result<T>
where
    S: Future<Output = ()>,
    F: FnOnce(ConfigTransport) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    tokio::pin!(shutdown);

    let tunnel = tokio::select! {
        opened = Tunnel::open(spec, settings.connect) => opened?,
        _ = &mut shutdown => {
            warn!("Interrupted while opening tunnel to {}", spec.ssh_address());
            return Err(MigrateError::Interrupted);
        }
    };

    run_scoped(tunnel, &settings.transport, shutdown, op).await
}

/// Run `op` over an open tunnel, then close it whatever happened.
pub async fn run_scoped<S, F, Fut, T>(
    tunnel: Tunnel,
    options: &TransportOptions,
    shutdown: S,
    op: F,
) -> Result<T>
where
    S: Future<Output = ()>,
    F: FnOnce(ConfigTransport) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let operation = async {
        let transport = ConfigTransport::new(tunnel.local_addr(), options.clone())?;
        transport.wait_ready().await?;
        op(transport).await
    };

    let outcome = tokio::select! {
        result = operation => result,
        _ = shutdown => {
            warn!("Interrupted; closing tunnel on {}", tunnel.local_addr());
            Err(MigrateError::Interrupted)
        }
    };

    tunnel.close().await;
    outcome
}

/// Resolve on SIGINT, or SIGTERM on unix.
pub async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(sigterm) => sigterm,
            Err(e) => {
                warn!("Cannot listen for SIGTERM: {}", e);
                return wait_ctrl_c().await;
            }
        };

        tokio::select! {
            _ = sigterm.recv() => info!("Received SIGTERM"),
            _ = wait_ctrl_c() => {}
        }
    }

    #[cfg(not(unix))]
    wait_ctrl_c().await;
}

async fn wait_ctrl_c() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Received SIGINT"),
        Err(e) => {
            warn!("Cannot listen for SIGINT: {}", e);
            std::future::pending::<()>().await;
        }
    }
}
