//! russh client handler used by tunnel transports.
//!
//! Devices are reached by address from operator config and are typically
//! freshly provisioned, so there is no known_hosts entry to verify against.
//! The handler accepts the server key and logs its SHA-256 fingerprint so an
//! operator can compare it out of band.

use russh::{client, keys};
use tracing::info;

/// Client handler for tunnel transports.
pub struct TunnelClientHandler {
    host: String,
}

impl TunnelClientHandler {
    pub fn new(host: impl Into<String>) -> Self {
        Self { host: host.into() }
    }
}

impl client::Handler for TunnelClientHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &keys::PublicKey,
    ) -> Result<bool, Self::Error> {
        info!(
            "SSH host key for {}: {}",
            self.host,
            server_public_key.fingerprint(keys::HashAlg::Sha256)
        );
        Ok(true)
    }
}
