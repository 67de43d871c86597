// Configuration: JSON file values with defaults, turned into runtime settings

use crate::coin::Network;
use crate::error::{Error, Result};
use crate::sync::{ReorgPolicy, SyncConfig};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// File-level configuration. Every field has a default, durations are milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// `host:port`; the coin's default port is used when the port is missing
    pub server: String,
    pub tls: bool,
    pub network: Network,
    /// Directory holding the header store
    pub data_dir: PathBuf,
    pub connect_timeout_ms: u64,
    pub request_timeout_ms: u64,
    pub keepalive_interval_ms: u64,
    /// Per-subscriber notification queue length
    pub subscription_capacity: usize,
    /// Highest request id used before the connection must be replaced
    pub max_request_id: u64,
    /// Log raw wire traffic for this connection
    pub debug: bool,
    pub client_name: String,
    pub protocol_version: String,
    /// Headers requested per catch-up call
    pub batch_size: u64,
    pub batch_delay_ms: u64,
    pub reorg_policy: ReorgPolicy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: "127.0.0.1".to_string(),
            tls: false,
            network: Network::Mainnet,
            data_dir: PathBuf::from("./data"),
            connect_timeout_ms: 10_000,
            request_timeout_ms: 30_000,
            keepalive_interval_ms: 5_000,
            subscription_capacity: 64,
            max_request_id: i64::MAX as u64,
            debug: false,
            client_name: concat!("electrum-sync/", env!("CARGO_PKG_VERSION")).to_string(),
            protocol_version: "1.4".to_string(),
            batch_size: 20,
            batch_delay_ms: 50,
            reorg_policy: ReorgPolicy::default(),
        }
    }
}

impl Config {
    /// Load a JSON config file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())
            .map_err(|e| Error::Config(format!("cannot read {}: {}", path.as_ref().display(), e)))?;
        let config: Config = serde_json::from_str(&text)
            .map_err(|e| Error::Config(format!("cannot parse {}: {}", path.as_ref().display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.server.trim().is_empty() {
            return Err(Error::Config("server must not be empty".to_string()));
        }
        if self.request_timeout_ms == 0 || self.connect_timeout_ms == 0 {
            return Err(Error::Config("timeouts must be positive".to_string()));
        }
        if self.keepalive_interval_ms == 0 {
            return Err(Error::Config("keepalive_interval_ms must be positive".to_string()));
        }
        if self.batch_size == 0 {
            return Err(Error::Config("batch_size must be positive".to_string()));
        }
        if self.max_request_id == 0 {
            return Err(Error::Config("max_request_id must be positive".to_string()));
        }
        Ok(())
    }

    /// Runtime settings for one connection to `server`
    pub fn client_config(&self, server: String) -> ClientConfig {
        ClientConfig {
            server,
            tls: self.tls.then(default_tls_config),
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            request_timeout: Duration::from_millis(self.request_timeout_ms),
            keepalive_interval: Duration::from_millis(self.keepalive_interval_ms),
            subscription_capacity: self.subscription_capacity,
            max_request_id: self.max_request_id,
            debug: self.debug,
        }
    }

    pub fn sync_config(&self) -> SyncConfig {
        SyncConfig {
            batch_size: self.batch_size,
            batch_delay: Duration::from_millis(self.batch_delay_ms),
            reorg_policy: self.reorg_policy,
        }
    }
}

/// Settings for one protocol client connection
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// `host:port`
    pub server: String,
    /// TLS settings; `None` for plain TCP
    pub tls: Option<Arc<rustls::ClientConfig>>,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    pub keepalive_interval: Duration,
    pub subscription_capacity: usize,
    pub max_request_id: u64,
    pub debug: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Config::default().client_config("127.0.0.1:50001".to_string())
    }
}

/// TLS client settings trusting the Mozilla root store
pub fn default_tls_config() -> Arc<rustls::ClientConfig> {
    let mut roots = rustls::RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    Arc::new(
        rustls::ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth(),
    )
}

/// Append `port` unless `server` already names one
pub fn with_default_port(server: &str, port: u16) -> String {
    let has_port = match server.rsplit_once(':') {
        // bare IPv6 literals contain colons but no bracketed port
        Some((host, p)) => p.parse::<u16>().is_ok() && (!host.contains(':') || host.ends_with(']')),
        None => false,
    };
    if has_port {
        server.to_string()
    } else if server.contains(':') && !server.starts_with('[') {
        format!("[{}]:{}", server, port)
    } else {
        format!("{}:{}", server, port)
    }
}
