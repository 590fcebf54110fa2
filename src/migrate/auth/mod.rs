//! Authentication strategies for tunnel transports.
//!
//! A device is configured with exactly one credential, so a strategy is
//! picked from the [`Credential`](crate::migrate::types::Credential) rather
//! than chained.
//!
//! - [`PasswordAuth`]: Password-based authentication
//! - [`KeyAuth`]: Private key file authentication

mod key;
mod password;
mod traits;

pub use key::KeyAuth;
pub use password::PasswordAuth;
pub use traits::AuthStrategy;

use crate::migrate::types::Credential;

/// Pick the authentication strategy for a configured credential.
pub fn strategy_for(credential: &Credential) -> Box<dyn AuthStrategy> {
    match credential {
        Credential::Password(password) => Box::new(PasswordAuth::new(password.clone())),
        Credential::KeyFile { path, passphrase } => {
            Box::new(KeyAuth::new(path.clone(), passphrase.clone()))
        }
    }
}
