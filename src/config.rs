//! TOML configuration parsing and validation.
//!
//! Baobab Reader is configured via a TOML file (default:
//! `./config/baobab.toml`). Only `[local]` is required; every other section
//! has defaults.
//!
//! ```toml
//! [local]
//! path = "./data/local.sqlite"
//!
//! [remote]
//! path = "./data/remote.sqlite"
//! # url = "http://127.0.0.1:7340"
//! timeout_secs = 30
//!
//! [server]
//! bind = "127.0.0.1:7340"
//!
//! [sync]
//! retry_errored = true
//! max_in_flight = 8
//!
//! [upload]
//! max_bytes = 104857600
//! ```
//!
//! When `remote.url` is set, client commands push to that server over HTTP.
//! Otherwise they write straight into the remote database at `remote.path`
//! (the same file `baobab serve` uses).

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub local: LocalConfig,
    #[serde(default)]
    pub remote: RemoteConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub upload: UploadConfig,
}

/// Client-side cache database.
#[derive(Debug, Deserialize, Clone)]
pub struct LocalConfig {
    pub path: PathBuf,
}

/// Server of record: its database, and optionally its HTTP address.
#[derive(Debug, Deserialize, Clone)]
pub struct RemoteConfig {
    #[serde(default = "default_remote_path")]
    pub path: PathBuf,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            path: default_remote_path(),
            url: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_remote_path() -> PathBuf {
    PathBuf::from("./data/remote.sqlite")
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:7340".to_string()
}

/// Retry and fan-out policy for catalog-load syncs.
#[derive(Debug, Deserialize, Clone)]
pub struct SyncConfig {
    /// Whether records in `error` are retried on the next catalog load.
    #[serde(default = "default_retry_errored")]
    pub retry_errored: bool,
    /// Upper bound on syncs running at once. Launching never waits on it.
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            retry_errored: default_retry_errored(),
            max_in_flight: default_max_in_flight(),
        }
    }
}

fn default_retry_errored() -> bool {
    true
}
fn default_max_in_flight() -> usize {
    8
}

#[derive(Debug, Deserialize, Clone)]
pub struct UploadConfig {
    #[serde(default = "default_max_bytes")]
    pub max_bytes: usize,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_bytes: default_max_bytes(),
        }
    }
}

fn default_max_bytes() -> usize {
    100 * 1024 * 1024
}

impl Config {
    /// Checks cross-field constraints that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.sync.max_in_flight == 0 {
            anyhow::bail!("sync.max_in_flight must be >= 1");
        }
        if self.upload.max_bytes == 0 {
            anyhow::bail!("upload.max_bytes must be >= 1");
        }
        if self.remote.timeout_secs == 0 {
            anyhow::bail!("remote.timeout_secs must be >= 1");
        }
        if let Some(url) = &self.remote.url {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                anyhow::bail!(
                    "remote.url must start with http:// or https://, got '{}'",
                    url
                );
            }
        }
        Ok(())
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    config.validate()?;

    Ok(config)
}
