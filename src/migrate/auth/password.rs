//! Password authentication.

use async_trait::async_trait;
use russh::client;
use tracing::debug;

use crate::migrate::error::{Result, ssh_error};
use crate::migrate::session::TunnelClientHandler;

use super::traits::AuthStrategy;

pub struct PasswordAuth {
    password: String,
}

impl PasswordAuth {
    pub fn new(password: impl Into<String>) -> Self {
        Self {
            password: password.into(),
        }
    }
}

#[async_trait]
impl AuthStrategy for PasswordAuth {
    async fn authenticate(
        &self,
        handle: &mut client::Handle<TunnelClientHandler>,
        username: &str,
    ) -> Result<bool> {
        debug!("Offering password for {}", username);

        // A rejected password is Ok(false); Err means the exchange itself broke
        let outcome = handle
            .authenticate_password(username, self.password.as_str())
            .await
            .map_err(|e| ssh_error(format!("Password exchange for {} failed: {}", username, e)))?;

        if !outcome.success() {
            debug!("Server rejected password for {}", username);
        }
        Ok(outcome.success())
    }

    fn name(&self) -> &'static str {
        "password"
    }
}
