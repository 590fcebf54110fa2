//! Authentication strategy trait definition.

use async_trait::async_trait;
use russh::client;

use crate::migrate::error::Result;
use crate::migrate::session::TunnelClientHandler;

/// Trait for SSH authentication strategies.
///
/// Implementations must be thread-safe (`Send + Sync`) for use across
/// async tasks.
#[async_trait]
pub trait AuthStrategy: Send + Sync {
    /// Attempt to authenticate with the SSH server.
    ///
    /// # Returns
    ///
    /// * `Ok(true)` - Authentication succeeded
    /// * `Ok(false)` - Credentials rejected by the server
    /// * `Err(_)` - The attempt itself failed (unreadable key, dropped connection)
    async fn authenticate(
        &self,
        handle: &mut client::Handle<TunnelClientHandler>,
        username: &str,
    ) -> Result<bool>;

    /// Get the name of this authentication strategy, for logging.
    fn name(&self) -> &'static str;
}
