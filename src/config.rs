//! Command-line configuration.

use crate::storage::ExpiryConfig;
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

/// snapkv - an in-memory Redis-compatible server seeded from an RDB snapshot
#[derive(Parser, Debug, Clone, PartialEq, Eq)]
#[command(name = "snapkv", version, about, long_about = None)]
pub struct ServerConfig {
    /// Host to bind to
    #[arg(long, default_value = "0.0.0.0")]
    pub host: String,

    /// Port to listen on
    #[arg(short, long, default_value_t = crate::DEFAULT_PORT)]
    pub port: u16,

    /// Directory holding the RDB snapshot
    #[arg(long)]
    pub dir: Option<PathBuf>,

    /// File name of the RDB snapshot inside `--dir`
    #[arg(long)]
    pub dbfilename: Option<String>,

    /// Milliseconds between background expiry sweeps
    #[arg(long, default_value_t = 100, value_parser = clap::value_parser!(u64).range(1..))]
    pub sweep_interval_ms: u64,
}

impl ServerConfig {
    /// Returns the bind address as a string
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// The snapshot to load, when both `--dir` and `--dbfilename` are given.
    pub fn snapshot_path(&self) -> Option<PathBuf> {
        match (&self.dir, &self.dbfilename) {
            (Some(dir), Some(file)) => Some(dir.join(file)),
            _ => None,
        }
    }

    /// Parameters answered by `CONFIG GET`.
    pub fn config_pairs(&self) -> Vec<(String, String)> {
        let mut pairs = Vec::with_capacity(4);
        if let Some(dir) = &self.dir {
            pairs.push(("dir".to_string(), dir.display().to_string()));
        }
        if let Some(file) = &self.dbfilename {
            pairs.push(("dbfilename".to_string(), file.clone()));
        }
        pairs.push(("port".to_string(), self.port.to_string()));
        pairs.push(("bind".to_string(), self.host.clone()));
        pairs
    }

    pub fn expiry_config(&self) -> ExpiryConfig {
        ExpiryConfig {
            interval: Duration::from_millis(self.sweep_interval_ms),
        }
    }
}
