//! Configuration file handling.
//!
//! Configuration is stored as TOML, `chunkdrop.toml` in the working
//! directory unless a path is given. Every field is optional.

use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};

use anyhow::Context;
use chunkdrop_server::DEFAULT_PORT;
use chunkdrop_store::{DEFAULT_MAX_CHUNK_SIZE, StoreConfig};
use serde::{Deserialize, Serialize};

/// File looked up when no `--config` is given.
pub const DEFAULT_CONFIG_FILE: &str = "chunkdrop.toml";

/// Server and logging configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Address the server listens on.
    #[serde(default = "default_bind")]
    pub bind: String,

    /// Server port (0 = auto-assign).
    #[serde(default = "default_port")]
    pub port: u16,

    /// Directory holding merged artifacts and staged chunks.
    #[serde(default = "default_storage_root")]
    pub storage_root: PathBuf,

    /// Largest chunk payload the server accepts, in bytes.
    #[serde(default = "default_max_chunk_size")]
    pub max_chunk_size: u64,

    /// Log filter used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_bind() -> String {
    "0.0.0.0".into()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_storage_root() -> PathBuf {
    PathBuf::from("storage")
}

fn default_max_chunk_size() -> u64 {
    DEFAULT_MAX_CHUNK_SIZE
}

fn default_log_level() -> String {
    "info".into()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
            storage_root: default_storage_root(),
            max_chunk_size: default_max_chunk_size(),
            log_level: default_log_level(),
        }
    }
}

impl Config {
    /// Loads `path`, or [`DEFAULT_CONFIG_FILE`] if it exists, or defaults.
    ///
    /// An explicitly given path must exist.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(path) => Self::load_file(path),
            None => {
                let path = Path::new(DEFAULT_CONFIG_FILE);
                if path.exists() {
                    Self::load_file(path)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    fn load_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("parsing config {}", path.display()))?;
        Ok(config)
    }

    /// Socket address built from `bind` and `port`.
    pub fn bind_addr(&self) -> anyhow::Result<SocketAddr> {
        let ip: IpAddr = self
            .bind
            .parse()
            .with_context(|| format!("invalid bind address {:?}", self.bind))?;
        Ok(SocketAddr::new(ip, self.port))
    }

    pub fn store_config(&self) -> StoreConfig {
        StoreConfig {
            root: self.storage_root.clone(),
            max_chunk_size: self.max_chunk_size,
        }
    }
}
