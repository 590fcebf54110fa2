//! Private key file authentication.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use russh::{client, keys};
use tracing::debug;

use crate::migrate::error::{MigrateError, Result, ssh_error};
use crate::migrate::session::TunnelClientHandler;

use super::traits::AuthStrategy;

/// Public key authentication from a key file; encrypted keys need the
/// configured passphrase.
pub struct KeyAuth {
    key_path: PathBuf,
    passphrase: Option<String>,
}

impl KeyAuth {
    pub fn new(key_path: impl Into<PathBuf>, passphrase: Option<String>) -> Self {
        Self {
            key_path: key_path.into(),
            passphrase,
        }
    }

    fn load(&self) -> Result<keys::PrivateKey> {
        keys::load_secret_key(&self.key_path, self.passphrase.as_deref()).map_err(|e| {
            let hint = if self.passphrase.is_none() {
                " (encrypted keys need ssh_key_passphrase)"
            } else {
                ""
            };
            MigrateError::Auth(format!(
                "Failed to load private key from {:?}: {}{}",
                self.key_path, e, hint
            ))
        })
    }
}

#[async_trait]
impl AuthStrategy for KeyAuth {
    async fn authenticate(
        &self,
        handle: &mut client::Handle<TunnelClientHandler>,
        username: &str,
    ) -> Result<bool> {
        let key = self.load()?;
        debug!("Offering {} key {:?} for {}", key.algorithm(), self.key_path, username);

        // RSA keys sign with the strongest hash the server advertises
        let rsa_hash = handle
            .best_supported_rsa_hash()
            .await
            .ok()
            .flatten()
            .flatten();

        let outcome = handle
            .authenticate_publickey(username, keys::PrivateKeyWithHashAlg::new(Arc::new(key), rsa_hash))
            .await
            .map_err(|e| ssh_error(format!("Public key exchange for {} failed: {}", username, e)))?;

        Ok(outcome.success())
    }

    fn name(&self) -> &'static str {
        "key"
    }
}
