//! Configuration for source and destination devices.
//!
//! Device connection details come from a TOML file (default `migrate.toml`):
//!
//! ```toml
//! [source_device]
//! ssh_host = "10.0.0.5"
//! ssh_username = "admin"
//! ssh_password = "secret"        # or ssh_key_path = "~/.ssh/id_ed25519"
//! local_port = 9201
//!
//! [destination_device]
//! ssh_host = "10.0.0.6:2222"
//! ssh_username = "admin"
//! ssh_key_path = "/home/op/.ssh/id_ed25519"
//!
//! [settings]
//! output_dir = "json_files"
//! ```
//!
//! When the file does not exist the same fields are read from environment
//! variables prefixed with the device role (`SOURCE_SSH_HOST`,
//! `DESTINATION_SSH_KEY_PATH`, ...). Both paths produce the same
//! [`TunnelSpec`].
//!
//! Tunables resolve with priority: parameter -> environment variable -> file -> default.
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `MIGRATE_CONNECT_TIMEOUT` | 10s | SSH connect + auth timeout in seconds |
//! | `MIGRATE_REQUEST_TIMEOUT` | 30s | Store request timeout in seconds |
//! | `MIGRATE_PAGE_SIZE` | 500 | Documents per scroll page |
//! | `MIGRATE_READY_RETRIES` | 3 | Readiness probe retries after a tunnel opens |
//! | `MIGRATE_OUTPUT_DIR` | json_files | Artifact directory |
//! | `SSH_COMPRESSION` | true | Enable zlib compression |

use std::env;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;
use tracing::{info, warn};

use crate::migrate::client::{ConnectOptions, parse_address};
use crate::migrate::error::{MigrateError, Result};
use crate::migrate::transport::{StoreIndices, TransportOptions};
use crate::migrate::types::{Credential, TunnelSpec};

/// Default configuration file name
pub const DEFAULT_CONFIG_FILE: &str = "migrate.toml";

/// Default SSH connect + authentication timeout in seconds
pub(crate) const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Default store request timeout in seconds
pub(crate) const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Default scroll page size
pub(crate) const DEFAULT_PAGE_SIZE: u32 = 500;

/// Default scroll context keepalive
pub(crate) const DEFAULT_SCROLL_KEEPALIVE: &str = "1m";

/// Default readiness probe retries
pub(crate) const DEFAULT_READY_RETRIES: u32 = 3;

/// Initial readiness probe delay
pub(crate) const DEFAULT_READY_DELAY: Duration = Duration::from_millis(500);

/// Maximum readiness probe delay
pub(crate) const MAX_READY_DELAY: Duration = Duration::from_secs(10);

pub(crate) const DEFAULT_OUTPUT_DIR: &str = "json_files";
pub(crate) const DEFAULT_REMOTE_HOST: &str = "localhost";
pub(crate) const DEFAULT_REMOTE_PORT: u16 = 9200;

pub(crate) const CONNECT_TIMEOUT_ENV_VAR: &str = "MIGRATE_CONNECT_TIMEOUT";
pub(crate) const REQUEST_TIMEOUT_ENV_VAR: &str = "MIGRATE_REQUEST_TIMEOUT";
pub(crate) const PAGE_SIZE_ENV_VAR: &str = "MIGRATE_PAGE_SIZE";
pub(crate) const READY_RETRIES_ENV_VAR: &str = "MIGRATE_READY_RETRIES";
pub(crate) const OUTPUT_DIR_ENV_VAR: &str = "MIGRATE_OUTPUT_DIR";
pub(crate) const COMPRESSION_ENV_VAR: &str = "SSH_COMPRESSION";

/// Which side of a migration a device is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceRole {
    Source,
    Destination,
}

impl DeviceRole {
    pub fn section(&self) -> &'static str {
        match self {
            DeviceRole::Source => "source_device",
            DeviceRole::Destination => "destination_device",
        }
    }

    fn env_prefix(&self) -> &'static str {
        match self {
            DeviceRole::Source => "SOURCE",
            DeviceRole::Destination => "DESTINATION",
        }
    }

    /// Distinct defaults so both tunnels can be open at once.
    pub fn default_local_port(&self) -> u16 {
        match self {
            DeviceRole::Source => 9201,
            DeviceRole::Destination => 9202,
        }
    }
}

/// Connection details for one device, as written in the config file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DeviceConfig {
    /// `host` or `host:port`
    pub ssh_host: String,
    pub ssh_port: Option<u16>,
    pub ssh_username: String,
    pub ssh_password: Option<String>,
    pub ssh_key_path: Option<PathBuf>,
    pub ssh_key_passphrase: Option<String>,
    pub local_port: Option<u16>,
    pub remote_host: Option<String>,
    pub remote_port: Option<u16>,
}

/// `[settings]` table. Every field is optional; see the module docs for defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub output_dir: Option<PathBuf>,
    pub connect_timeout: Option<u64>,
    pub request_timeout: Option<u64>,
    pub page_size: Option<u32>,
    pub scroll_keepalive: Option<String>,
    pub ready_retries: Option<u32>,
    pub compression: Option<bool>,
    pub alerts_index: Option<String>,
    pub reports_index: Option<String>,
}

/// The whole configuration file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct MigrateConfig {
    pub source_device: Option<DeviceConfig>,
    pub destination_device: Option<DeviceConfig>,
    #[serde(default)]
    pub settings: Settings,
}

/// Command-line overrides, highest priority.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub output_dir: Option<PathBuf>,
    pub request_timeout: Option<u64>,
    pub connect_timeout: Option<u64>,
}

/// Fully resolved runtime settings.
#[derive(Debug, Clone)]
pub struct RunSettings {
    pub output_dir: PathBuf,
    pub connect: ConnectOptions,
    pub transport: TransportOptions,
}

impl MigrateConfig {
    /// Load configuration from `path`, falling back to environment variables
    /// when the file does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(text) => {
                info!("Loading configuration from {}", path.display());
                Self::from_toml_str(&text)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(
                    "Configuration file {} not found, reading device settings from environment",
                    path.display()
                );
                Self::from_env()
            }
            Err(e) => Err(MigrateError::io(path, e)),
        }
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| MigrateError::Config(format!("Invalid config file: {}", e)))
    }

    /// Build the configuration from `SOURCE_*` / `DESTINATION_*` variables.
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            source_device: DeviceConfig::from_env(DeviceRole::Source)?,
            destination_device: DeviceConfig::from_env(DeviceRole::Destination)?,
            settings: Settings::default(),
        })
    }

    pub fn device(&self, role: DeviceRole) -> Result<&DeviceConfig> {
        let device = match role {
            DeviceRole::Source => self.source_device.as_ref(),
            DeviceRole::Destination => self.destination_device.as_ref(),
        };
        device.ok_or_else(|| {
            MigrateError::Config(format!(
                "Missing [{}] configuration (or {}_SSH_HOST)",
                role.section(),
                role.env_prefix()
            ))
        })
    }

    pub fn tunnel_spec(&self, role: DeviceRole) -> Result<TunnelSpec> {
        self.device(role)?.tunnel_spec(role)
    }

    pub fn resolve(&self, overrides: &Overrides) -> RunSettings {
        self.settings.resolve(overrides)
    }
}

impl DeviceConfig {
    /// Read a device from `<ROLE>_*` environment variables.
    ///
    /// Returns `Ok(None)` when `<ROLE>_SSH_HOST` is not set.
    pub fn from_env(role: DeviceRole) -> Result<Option<Self>> {
        let prefix = role.env_prefix();
        let var = |name: &str| env::var(format!("{}_{}", prefix, name)).ok();
        let port = |name: &str| -> Result<Option<u16>> {
            var(name)
                .map(|v| {
                    v.parse::<u16>().map_err(|e| {
                        MigrateError::Config(format!("Invalid {}_{}: {}", prefix, name, e))
                    })
                })
                .transpose()
        };

        let Some(ssh_host) = var("SSH_HOST") else {
            return Ok(None);
        };
        let ssh_username = var("SSH_USERNAME").ok_or_else(|| {
            MigrateError::Config(format!("{}_SSH_USERNAME is required", prefix))
        })?;

        Ok(Some(Self {
            ssh_host,
            ssh_port: port("SSH_PORT")?,
            ssh_username,
            ssh_password: var("SSH_PASSWORD"),
            ssh_key_path: var("SSH_KEY_PATH").map(PathBuf::from),
            ssh_key_passphrase: var("SSH_KEY_PASSPHRASE"),
            local_port: port("LOCAL_PORT")?,
            remote_host: var("REMOTE_HOST"),
            remote_port: port("REMOTE_PORT")?,
        }))
    }

    /// Build the tunnel spec, enforcing exactly one credential.
    pub fn tunnel_spec(&self, role: DeviceRole) -> Result<TunnelSpec> {
        let ssh_credential = match (&self.ssh_password, &self.ssh_key_path) {
            (Some(password), None) => Credential::Password(password.clone()),
            (None, Some(path)) => Credential::KeyFile {
                path: path.clone(),
                passphrase: self.ssh_key_passphrase.clone(),
            },
            (Some(_), Some(_)) => {
                return Err(MigrateError::Config(format!(
                    "[{}] sets both ssh_password and ssh_key_path; configure exactly one",
                    role.section()
                )));
            }
            (None, None) => {
                return Err(MigrateError::Config(format!(
                    "[{}] needs ssh_password or ssh_key_path",
                    role.section()
                )));
            }
        };

        // An explicit ssh_port wins over a port embedded in ssh_host
        let (ssh_host, embedded_port) = parse_address(&self.ssh_host)?;
        let ssh_port = self.ssh_port.unwrap_or(embedded_port);

        Ok(TunnelSpec {
            remote_host: self
                .remote_host
                .clone()
                .unwrap_or_else(|| DEFAULT_REMOTE_HOST.to_string()),
            remote_port: self.remote_port.unwrap_or(DEFAULT_REMOTE_PORT),
            ssh_host,
            ssh_port,
            ssh_username: self.ssh_username.clone(),
            ssh_credential,
            local_port: self.local_port.unwrap_or_else(|| role.default_local_port()),
        })
    }
}

impl Settings {
    pub fn resolve(&self, overrides: &Overrides) -> RunSettings {
        let output_dir = overrides
            .output_dir
            .clone()
            .or_else(|| env::var(OUTPUT_DIR_ENV_VAR).ok().map(PathBuf::from))
            .or_else(|| self.output_dir.clone())
            .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_DIR));

        let connect = ConnectOptions {
            timeout: Duration::from_secs(resolve_connect_timeout(
                overrides.connect_timeout,
                self.connect_timeout,
            )),
            compress: resolve_compression(None, self.compression),
        };

        let indices = StoreIndices {
            alerts: self
                .alerts_index
                .clone()
                .unwrap_or_else(|| StoreIndices::default().alerts),
            reports: self
                .reports_index
                .clone()
                .unwrap_or_else(|| StoreIndices::default().reports),
        };

        let transport = TransportOptions {
            request_timeout: Duration::from_secs(resolve_request_timeout(
                overrides.request_timeout,
                self.request_timeout,
            )),
            page_size: resolve_page_size(None, self.page_size),
            scroll_keepalive: self
                .scroll_keepalive
                .clone()
                .unwrap_or_else(|| DEFAULT_SCROLL_KEEPALIVE.to_string()),
            indices,
            ready_retries: resolve_ready_retries(None, self.ready_retries),
            ready_delay: DEFAULT_READY_DELAY,
        };

        RunSettings {
            output_dir,
            connect,
            transport,
        }
    }
}

/// Resolve a value with priority: parameter -> env var -> file -> default.
/// Unparseable environment values are ignored.
fn resolve<T: FromStr>(param: Option<T>, env_var: &str, file: Option<T>, default: T) -> T {
    if let Some(value) = param {
        return value;
    }

    if let Ok(raw) = env::var(env_var)
        && let Ok(value) = raw.parse::<T>()
    {
        return value;
    }

    file.unwrap_or(default)
}

pub(crate) fn resolve_connect_timeout(param: Option<u64>, file: Option<u64>) -> u64 {
    resolve(param, CONNECT_TIMEOUT_ENV_VAR, file, DEFAULT_CONNECT_TIMEOUT_SECS)
}

pub(crate) fn resolve_request_timeout(param: Option<u64>, file: Option<u64>) -> u64 {
    resolve(param, REQUEST_TIMEOUT_ENV_VAR, file, DEFAULT_REQUEST_TIMEOUT_SECS)
}

/// Page size is clamped to at least 1 so a scroll always makes progress.
pub(crate) fn resolve_page_size(param: Option<u32>, file: Option<u32>) -> u32 {
    resolve(param, PAGE_SIZE_ENV_VAR, file, DEFAULT_PAGE_SIZE).max(1)
}

pub(crate) fn resolve_ready_retries(param: Option<u32>, file: Option<u32>) -> u32 {
    resolve(param, READY_RETRIES_ENV_VAR, file, DEFAULT_READY_RETRIES)
}

/// Compression: parameter -> env var ("true"/"1") -> file -> default (true)
pub(crate) fn resolve_compression(param: Option<bool>, file: Option<bool>) -> bool {
    if let Some(compress) = param {
        return compress;
    }

    if let Ok(env_compress) = env::var(COMPRESSION_ENV_VAR) {
        return env_compress.eq_ignore_ascii_case("true") || env_compress == "1";
    }

    file.unwrap_or(true)
}
