//! Client configuration
//!
//! Connection settings live in a JSON file next to other per-user
//! configuration. Missing fields take their defaults, so a file containing
//! only `{"host": "myibmi"}` is complete.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use log::warn;
use serde::{Deserialize, Serialize};

use crate::codec::lookup;
use crate::error::{ConfigError, ConfigResult};

/// Plain-text port of the remote command server
pub const DEFAULT_PORT: u16 = 8475;
/// TLS port of the remote command server
pub const DEFAULT_TLS_PORT: u16 = 9475;
/// Highest datastream level this client speaks
pub const MAX_DATASTREAM_LEVEL: u16 = 10;

/// Settings for one host server connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub host: String,
    pub port: u16,
    pub tls: bool,
    /// PEM bundle of extra trusted CAs
    pub tls_ca_bundle_path: Option<String>,
    pub connect_timeout_ms: u64,
    /// Read and write timeout for each request/reply pair
    pub io_timeout_ms: u64,
    pub user: Option<String>,
    /// Pre-issued profile token, base64 encoded
    pub profile_token: Option<String>,
    pub client_ccsid: u32,
    pub datastream_level: u16,
    pub max_reply_length: usize,
    /// Records requested per list fetch
    pub list_chunk_size: i32,
    pub pool_buffers: usize,
    pub pool_workers: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: DEFAULT_PORT,
            tls: false,
            tls_ca_bundle_path: None,
            connect_timeout_ms: 30_000,
            io_timeout_ms: 60_000,
            user: None,
            profile_token: None,
            client_ccsid: 37,
            datastream_level: MAX_DATASTREAM_LEVEL,
            max_reply_length: 16 * 1024 * 1024,
            list_chunk_size: 1000,
            pool_buffers: 8,
            pool_workers: 4,
        }
    }
}

impl ClientConfig {
    pub fn new<S: Into<String>>(host: S) -> Self {
        Self { host: host.into(), ..Self::default() }
    }

    /// Set the port; the standard TLS port turns TLS on
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        if port == DEFAULT_TLS_PORT {
            self.tls = true;
        }
        self
    }

    /// Enable or disable TLS explicitly (overrides the port-based default)
    pub fn with_tls(mut self, enabled: bool) -> Self {
        self.tls = enabled;
        self
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn io_timeout(&self) -> Duration {
        Duration::from_millis(self.io_timeout_ms)
    }

    /// Decode the stored profile token, if any
    pub fn profile_token_bytes(&self) -> ConfigResult<Option<Vec<u8>>> {
        match &self.profile_token {
            None => Ok(None),
            Some(encoded) => STANDARD.decode(encoded.trim()).map(Some).map_err(|e| {
                ConfigError::InvalidParameter {
                    parameter: "profile_token".to_string(),
                    value: "<redacted>".to_string(),
                    reason: e.to_string(),
                }
            }),
        }
    }

    /// Check every field that would otherwise fail later on the wire
    pub fn validate(&self) -> ConfigResult<()> {
        if self.host.trim().is_empty() {
            return Err(ConfigError::MissingRequired { parameter: "host".to_string() });
        }
        if self.port == 0 {
            return Err(invalid("port", self.port, "must be non-zero"));
        }
        if self.connect_timeout_ms == 0 {
            return Err(invalid("connect_timeout_ms", self.connect_timeout_ms, "must be non-zero"));
        }
        if self.io_timeout_ms == 0 {
            return Err(invalid("io_timeout_ms", self.io_timeout_ms, "must be non-zero"));
        }
        if lookup(self.client_ccsid).is_err() {
            return Err(invalid("client_ccsid", self.client_ccsid, "unsupported code page"));
        }
        if self.datastream_level > MAX_DATASTREAM_LEVEL {
            return Err(invalid(
                "datastream_level",
                self.datastream_level,
                &format!("highest supported level is {MAX_DATASTREAM_LEVEL}"),
            ));
        }
        if self.max_reply_length < crate::envelope::HEADER_LENGTH {
            return Err(invalid("max_reply_length", self.max_reply_length, "smaller than an envelope header"));
        }
        if self.list_chunk_size <= 0 {
            return Err(invalid("list_chunk_size", self.list_chunk_size, "must be positive"));
        }
        if self.pool_buffers == 0 {
            return Err(invalid("pool_buffers", self.pool_buffers, "must be positive"));
        }
        if self.pool_workers > self.pool_buffers {
            return Err(invalid("pool_workers", self.pool_workers, "cannot exceed pool_buffers"));
        }
        if let Some(path) = &self.tls_ca_bundle_path {
            if !Path::new(path).exists() {
                return Err(ConfigError::FileError {
                    path: path.clone(),
                    error: "CA bundle not found".to_string(),
                });
            }
        }
        self.profile_token_bytes()?;
        Ok(())
    }
}

fn invalid<V: ToString>(parameter: &str, value: V, reason: &str) -> ConfigError {
    ConfigError::InvalidParameter {
        parameter: parameter.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

/// Determine the default config file path.
/// Priority:
/// 1) HOSTSERVER_CONFIG env var
/// 2) platform config dir, e.g. ~/.config/hostserver/client.json
/// 3) ./client.json
pub fn default_config_path() -> PathBuf {
    if let Ok(p) = std::env::var("HOSTSERVER_CONFIG") {
        return PathBuf::from(p);
    }
    match dirs::config_dir() {
        Some(base) => base.join("hostserver").join("client.json"),
        None => PathBuf::from("client.json"),
    }
}

/// Load configuration from `path`. A missing file yields the defaults; an
/// unreadable or malformed one is an error.
pub fn load_config(path: &Path) -> ConfigResult<ClientConfig> {
    if !path.exists() {
        warn!("config file {} not found, using defaults", path.display());
        return Ok(ClientConfig::default());
    }
    let text = fs::read_to_string(path).map_err(|e| file_error(path, e))?;
    serde_json::from_str(&text).map_err(|e| file_error(path, e))
}

/// Write configuration as pretty JSON, creating parent directories.
pub fn save_config(config: &ClientConfig, path: &Path) -> ConfigResult<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent).map_err(|e| file_error(path, e))?;
        }
    }
    let json = serde_json::to_string_pretty(config).map_err(|e| file_error(path, e))?;
    fs::write(path, json).map_err(|e| file_error(path, e))
}

fn file_error<E: std::fmt::Display>(path: &Path, error: E) -> ConfigError {
    ConfigError::FileError { path: path.display().to_string(), error: error.to_string() }
}
