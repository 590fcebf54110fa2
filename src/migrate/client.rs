//! SSH transport establishment for tunnels.
//!
//! ## Connection Lifecycle
//!
//! 1. **Client Configuration**: Build the russh client configuration with
//!    keepalive and compression settings.
//!
//! 2. **Connection Establishment**: TCP connect plus key exchange against
//!    `ssh_host:ssh_port`, bounded by the connect timeout.
//!
//! 3. **Authentication**: Password or private key, chosen from the
//!    configured [`Credential`](crate::migrate::types::Credential).
//!
//! There is deliberately no retry loop here. A rejected credential is an
//! [`MigrateError::Auth`] and an unreachable server is a
//! [`MigrateError::Connect`]; the caller decides whether to try again.

use std::net::Ipv6Addr;
use std::sync::Arc;
use std::time::Duration;

use russh::client;
use tracing::{debug, info};

use crate::migrate::auth::strategy_for;
use crate::migrate::error::{MigrateError, Result, ssh_error};
use crate::migrate::session::TunnelClientHandler;
use crate::migrate::types::TunnelSpec;

/// Options that shape the SSH transport but are not part of the tunnel identity.
#[derive(Debug, Clone, Copy)]
pub struct ConnectOptions {
    /// Bound on TCP connect, key exchange and authentication
    pub timeout: Duration,
    pub compress: bool,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(crate::migrate::config::DEFAULT_CONNECT_TIMEOUT_SECS),
            compress: true,
        }
    }
}

/// Build russh client configuration.
///
/// Tunnels sit idle between store requests, so there is no inactivity
/// timeout; keepalives detect a dead peer instead.
pub(crate) fn build_client_config(compress: bool) -> Arc<client::Config> {
    let compression = if compress {
        (&[russh::compression::ZLIB, russh::compression::NONE][..]).into()
    } else {
        (&[russh::compression::NONE][..]).into()
    };

    let preferred = russh::Preferred {
        compression,
        ..Default::default()
    };

    Arc::new(client::Config {
        inactivity_timeout: None,
        keepalive_interval: Some(Duration::from_secs(30)),
        keepalive_max: 3,
        preferred,
        ..Default::default()
    })
}

/// Parse address string into host and port components.
///
/// Supports `host:port`, `host` (default SSH port 22), bare IPv6 literals
/// (`::1`, always port 22) and bracketed IPv6 with an optional port
/// (`[::1]:2222`). Brackets are stripped from the returned host.
pub(crate) fn parse_address(address: &str) -> Result<(String, u16)> {
    if address.parse::<Ipv6Addr>().is_ok() {
        return Ok((address.to_string(), 22));
    }

    if let Some(bracketed) = address.strip_prefix('[') {
        let (host, rest) = bracketed.split_once(']').ok_or_else(|| {
            MigrateError::Config(format!("Unclosed '[' in address {:?}", address))
        })?;
        if host.parse::<Ipv6Addr>().is_err() {
            return Err(MigrateError::Config(format!(
                "Invalid IPv6 address in {:?}",
                address
            )));
        }
        let port = match rest {
            "" => 22,
            _ => match rest.strip_prefix(':') {
                Some(port_str) => parse_port(address, port_str)?,
                None => {
                    return Err(MigrateError::Config(format!(
                        "Unexpected {:?} after ']' in {:?}",
                        rest, address
                    )));
                }
            },
        };
        return Ok((host.to_string(), port));
    }

    match address.split_once(':') {
        Some((host, port_str)) if !port_str.contains(':') => {
            Ok((host.to_string(), parse_port(address, port_str)?))
        }
        Some(_) => Err(MigrateError::Config(format!(
            "Invalid address {:?}; write IPv6 with a port as [addr]:port",
            address
        ))),
        None => Ok((address.to_string(), 22)),
    }
}

fn parse_port(address: &str, port_str: &str) -> Result<u16> {
    port_str
        .parse::<u16>()
        .map_err(|e| MigrateError::Config(format!("Invalid port number in {:?}: {}", address, e)))
}

/// Establish and authenticate the SSH transport described by `spec`.
///
/// The whole handshake, including authentication, is bounded by
/// `options.timeout`.
pub(crate) async fn connect(
    spec: &TunnelSpec,
    options: ConnectOptions,
) -> Result<client::Handle<TunnelClientHandler>> {
    info!("Opening SSH transport to {}", spec.ssh_address());

    tokio::time::timeout(options.timeout, connect_and_authenticate(spec, options))
        .await
        .map_err(|_| {
            MigrateError::Connect(format!(
                "Connection to {} timed out after {:?}",
                spec.ssh_address(),
                options.timeout
            ))
        })?
}

async fn connect_and_authenticate(
    spec: &TunnelSpec,
    options: ConnectOptions,
) -> Result<client::Handle<TunnelClientHandler>> {
    let config = build_client_config(options.compress);
    let handler = TunnelClientHandler::new(spec.ssh_host.clone());

    let mut handle = client::connect(config, (spec.ssh_host.as_str(), spec.ssh_port), handler)
        .await
        .map_err(|e| {
            // Anything before the auth exchange is a reachability problem
            MigrateError::Connect(format!("Failed to connect to {}: {}", spec.ssh_address(), e))
        })?;

    let strategy = strategy_for(&spec.ssh_credential);
    debug!("Authenticating {} with {} strategy", spec.ssh_address(), strategy.name());

    let accepted = match strategy.authenticate(&mut handle, &spec.ssh_username).await {
        Ok(accepted) => accepted,
        Err(e) => {
            let _ = handle
                .disconnect(russh::Disconnect::ByApplication, "", "en")
                .await;
            return Err(e);
        }
    };

    if !accepted {
        let _ = handle
            .disconnect(russh::Disconnect::ByApplication, "", "en")
            .await;
        return Err(ssh_error(format!(
            "Authentication failed: {} rejected for {}",
            strategy.name(),
            spec.ssh_address()
        )));
    }

    info!("SSH transport to {} authenticated", spec.ssh_address());
    Ok(handle)
}
