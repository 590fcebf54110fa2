//! Error taxonomy for tunnel-mediated migrations.
//!
//! Errors fall into two propagation classes:
//!
//! 1. **Tunnel-level** (`Connect`, `Auth`, `Bind`): nothing useful can happen
//!    without connectivity, so these abort the whole collect/restore run.
//!
//! 2. **Document-level** (`Document`, `RemoteApi`): caught at the document
//!    boundary, recorded in the report, and the batch continues.
//!
//! `Transport` sits between the two: the SSH transport (or the forwarded
//! connection) dropped mid-operation. It is never retried by the tunnel.
//!
//! # SSH failure classification
//!
//! russh reports handshake and authentication problems as free-form errors.
//! [`classify_ssh_failure`] sorts those messages into authentication failures
//! (bad password, rejected key) and connection failures (refused, timeout,
//! DNS). Authentication patterns take precedence: a message mentioning both
//! is an authentication failure, so callers never mistake bad credentials for
//! an unreachable host.

use std::path::PathBuf;

use thiserror::Error;

/// Errors produced while opening tunnels, talking to the store, and handling
/// artifacts.
#[derive(Debug, Error)]
pub enum MigrateError {
    /// SSH endpoint unreachable: DNS failure, timeout, refused, handshake failure
    #[error("SSH connection failed: {0}")]
    Connect(String),

    /// Credentials or key rejected by the SSH server
    #[error("SSH authentication failed: {0}")]
    Auth(String),

    /// Local forward port could not be bound
    #[error("Failed to bind local port {port}: {source}")]
    Bind {
        port: u16,
        #[source]
        source: std::io::Error,
    },

    /// Transport dropped mid-operation (not retried automatically)
    #[error("Transport error: {0}")]
    Transport(String),

    /// Non-success response from the store
    #[error("Remote API error (status {status}): {body}")]
    RemoteApi { status: u16, body: String },

    /// Malformed or unsupported document content
    #[error("Document error: {0}")]
    Document(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Operation cancelled by SIGINT/SIGTERM
    #[error("Interrupted by signal")]
    Interrupted,
}

pub type Result<T> = std::result::Result<T, MigrateError>;

impl MigrateError {
    /// Whether this error aborts an entire collect/restore invocation.
    pub fn is_tunnel_level(&self) -> bool {
        matches!(
            self,
            MigrateError::Connect(_) | MigrateError::Auth(_) | MigrateError::Bind { .. }
        )
    }

    /// Whether this error is scoped to a single document and the batch may continue.
    pub fn is_document_level(&self) -> bool {
        matches!(
            self,
            MigrateError::Document(_) | MigrateError::RemoteApi { .. }
        )
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        MigrateError::Io {
            path: path.into(),
            source,
        }
    }
}

impl From<reqwest::Error> for MigrateError {
    fn from(e: reqwest::Error) -> Self {
        if let Some(status) = e.status() {
            return MigrateError::RemoteApi {
                status: status.as_u16(),
                body: e.to_string(),
            };
        }
        if e.is_decode() {
            return MigrateError::Document(format!("Failed to decode store response: {}", e));
        }
        MigrateError::Transport(e.to_string())
    }
}

/// Authentication error patterns that indicate rejected credentials.
const AUTH_ERRORS: &[&str] = &[
    "authentication failed",
    "password authentication failed",
    "key authentication failed",
    "permission denied",
    "publickey",
    "auth fail",
    "no authentication",
    "all authentication methods failed",
    "failed to load private key",
];

/// Connection error patterns that indicate an unreachable SSH endpoint.
const CONNECT_ERRORS: &[&str] = &[
    "connection refused",
    "connection reset",
    "connection timed out",
    "timed out",
    "timeout",
    "network is unreachable",
    "no route to host",
    "host is down",
    "temporary failure",
    "name or service not known",
    "failed to lookup address",
    "handshake failed",
    "failed to connect",
    "broken pipe",
];

/// Outcome of classifying an SSH failure message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SshFailure {
    Auth,
    Connect,
}

/// Sort an SSH failure message into authentication vs connection failure.
///
/// Authentication patterns are checked first and take priority. Anything that
/// matches neither table happened before the server accepted our credentials,
/// so it is reported as a connection failure.
pub(crate) fn classify_ssh_failure(message: &str) -> SshFailure {
    let lower = message.to_lowercase();

    if AUTH_ERRORS.iter().any(|p| lower.contains(p)) {
        return SshFailure::Auth;
    }

    if CONNECT_ERRORS.iter().any(|p| lower.contains(p)) {
        return SshFailure::Connect;
    }

    SshFailure::Connect
}

/// Build the tunnel-level error for an SSH failure message.
pub(crate) fn ssh_error(message: impl Into<String>) -> MigrateError {
    let message = message.into();
    match classify_ssh_failure(&message) {
        SshFailure::Auth => MigrateError::Auth(message),
        SshFailure::Connect => MigrateError::Connect(message),
    }
}
