//! Server configuration.
//!
//! Loaded from a JSON file; every field has a default so a minimal config
//! can be `{}`.

use std::path::Path;

use serde::{Deserialize, Serialize};

use kite_core::{Error, Result};

/// Listener and dispatch settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    /// Bind address.
    pub ip: String,
    /// Bind port.
    pub port: u16,
    /// Client password; empty disables auth.
    pub auth: String,
    /// Reader pool size.
    pub readers: usize,
    /// Writer pool size.
    pub writers: usize,
    /// IP prefixes allowed to connect (empty = all).
    pub allow: Vec<String>,
    /// IP prefixes rejected at accept.
    pub deny: Vec<String>,
}

impl Default for ServerSection {
    fn default() -> ServerSection {
        ServerSection {
            ip: "127.0.0.1".to_string(),
            port: 8888,
            auth: String::new(),
            readers: 10,
            writers: 1,
            allow: Vec::new(),
            deny: Vec::new(),
        }
    }
}

/// One upstream this node replicates from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlaveOf {
    /// Primary address.
    pub ip: String,
    /// Primary port.
    pub port: u16,
    /// `sync` or `mirror`.
    #[serde(default = "default_repl_kind")]
    pub kind: String,
    /// Password for the primary, when it requires auth.
    #[serde(default)]
    pub auth: String,
}

fn default_repl_kind() -> String {
    "sync".to_string()
}

/// Replication settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplicationSection {
    /// Outbound throttle in MiB/s; 0 disables throttling.
    pub sync_speed: u64,
    /// Upstreams to pull from.
    pub slaveof: Vec<SlaveOf>,
}

/// Binlog settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BinlogSection {
    /// Retained record count before trimming (0 = built-in default).
    pub capacity: u64,
}

impl Default for BinlogSection {
    fn default() -> BinlogSection {
        BinlogSection { capacity: 0 }
    }
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSection {
    /// Tracing filter, e.g. `info` or `kite_store=debug`.
    pub level: String,
}

impl Default for LogSection {
    fn default() -> LogSection {
        LogSection {
            level: "info".to_string(),
        }
    }
}

/// Full server configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Listener and dispatch.
    pub server: ServerSection,
    /// Replication.
    pub replication: ReplicationSection,
    /// Binlog retention.
    pub binlog: BinlogSection,
    /// Logging.
    pub log: LogSection,
}

impl Config {
    /// Load and parse a JSON config file.
    pub fn load(path: &Path) -> Result<Config> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::invalid_input(format!("cannot read config: {}", e)))?;
        serde_json::from_str(&text)
            .map_err(|e| Error::invalid_input(format!("cannot parse config: {}", e)))
    }
}
