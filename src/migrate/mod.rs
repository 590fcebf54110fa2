//! Alert and report migration between devices over SSH tunnels.
//!
//! This module is organized into the following submodules:
//!
//! - `types`: Tunnel description and lifecycle state
//! - `error`: Error taxonomy and SSH failure classification
//! - `config`: Config file, environment fallback and settings resolution
//! - `auth`, `session`, `client`: SSH transport establishment
//! - `forward`, `tunnel`: Local port forwarding over the transport
//! - `document`: Alert/report documents and definitions projection
//! - `transport`: HTTP client for the store behind a tunnel
//! - `artifact`: Timestamped capture files
//! - `collector`, `restorer`: Capture and replay
//! - `lifecycle`: Scoped tunnel acquisition with signal handling
//! - `commands`: Orchestration used by the binary

pub mod artifact;
pub(crate) mod auth;
pub(crate) mod client;
pub mod collector;
pub mod commands;
pub mod config;
pub mod document;
pub mod error;
pub mod forward;
pub mod lifecycle;
pub mod restorer;
pub mod session;
#[cfg(test)]
pub(crate) mod testing;
pub mod transport;
pub mod tunnel;
pub mod types;

pub use client::ConnectOptions;
pub use error::{MigrateError, Result};
pub use tunnel::Tunnel;
