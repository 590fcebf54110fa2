//! Tunnel description and lifecycle types.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// SSH credential for a device. Exactly one kind is configured per device.
#[derive(Clone, PartialEq, Eq)]
pub enum Credential {
    Password(String),
    /// Private key file, with an optional passphrase for encrypted keys
    KeyFile {
        path: PathBuf,
        passphrase: Option<String>,
    },
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credential::Password(_) => f.write_str("Password(***)"),
            Credential::KeyFile { path, .. } => f
                .debug_struct("KeyFile")
                .field("path", path)
                .finish_non_exhaustive(),
        }
    }
}

/// Everything needed to open one local-port-forward tunnel.
///
/// Immutable once a tunnel has been opened from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelSpec {
    pub remote_host: String,
    pub remote_port: u16,
    pub ssh_host: String,
    pub ssh_port: u16,
    pub ssh_username: String,
    pub ssh_credential: Credential,
    pub local_port: u16,
}

impl TunnelSpec {
    pub fn target(&self) -> RemoteTarget {
        RemoteTarget {
            host: self.remote_host.clone(),
            port: self.remote_port,
        }
    }

    pub fn ssh_address(&self) -> String {
        format!("{}@{}:{}", self.ssh_username, self.ssh_host, self.ssh_port)
    }
}

/// The fixed `host:port` every forwarded connection is sent to, resolved on the SSH server side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteTarget {
    pub host: String,
    pub port: u16,
}

impl fmt::Display for RemoteTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Lifecycle of a [`Tunnel`](crate::migrate::tunnel::Tunnel).
///
/// `Connecting` precedes the tunnel value itself; it is only seen by
/// receivers of a sender passed to
/// [`Tunnel::open_with_state`](crate::migrate::tunnel::Tunnel::open_with_state).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TunnelState {
    Closed,
    Connecting,
    Open,
    Closing,
}

impl fmt::Display for TunnelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TunnelState::Closed => write!(f, "closed"),
            TunnelState::Connecting => write!(f, "connecting"),
            TunnelState::Open => write!(f, "open"),
            TunnelState::Closing => write!(f, "closing"),
        }
    }
}
