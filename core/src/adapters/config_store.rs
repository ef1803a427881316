//! JSON file configuration store.
//!
//! The proxy keeps its settings in a single JSON document (for trojan,
//! `/usr/local/etc/trojan/config.json`). Only the port field is rewritten;
//! every other field, the key order and the indentation survive a commit.

use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::{debug, info};

use super::atomic_file;
use crate::domain::{ConfigTransaction, ServiceConfig, DEFAULT_PORT_POINTER};
use crate::error::{Error, Result};
use crate::ports::ConfigRepository;

/// Configuration store backed by a JSON file.
pub struct JsonConfigStore {
    /// Path to the proxy's configuration file.
    config_path: PathBuf,

    /// JSON pointer to the port field.
    port_pointer: String,
}

impl JsonConfigStore {
    /// Create a store for `config_path` with the port at `port_pointer`.
    pub fn new(config_path: impl Into<PathBuf>, port_pointer: impl Into<String>) -> Self {
        Self {
            config_path: config_path.into(),
            port_pointer: port_pointer.into(),
        }
    }

    /// Create a store using the default `/local_port` pointer.
    pub fn with_path(config_path: impl Into<PathBuf>) -> Self {
        Self::new(config_path, DEFAULT_PORT_POINTER)
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn port_pointer(&self) -> &str {
        &self.port_pointer
    }
}

impl ConfigRepository for JsonConfigStore {
    async fn load(&self) -> Result<ServiceConfig> {
        let content = match fs::read_to_string(&self.config_path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::ConfigUnreadable(format!(
                    "No configuration file at {}",
                    self.config_path.display()
                )));
            }
            Err(e) => {
                return Err(Error::ConfigUnreadable(format!(
                    "Failed to read {}: {}",
                    self.config_path.display(),
                    e
                )));
            }
        };

        let config = ServiceConfig::parse(&content, &self.port_pointer)?;
        debug!(path = %self.config_path.display(), port = %config.port(), "Loaded proxy config");
        Ok(config)
    }

    async fn commit(&self, tx: &ConfigTransaction) -> Result<()> {
        let content = tx.candidate().render()?;
        atomic_file::replace(&self.config_path, content)
            .await
            .map_err(|e| {
                Error::PersistFailure(format!(
                    "Failed to write {}: {}",
                    self.config_path.display(),
                    e
                ))
            })?;

        info!(
            tx = %tx.id(),
            path = %self.config_path.display(),
            from = %tx.previous_port(),
            to = %tx.new_port(),
            "Committed proxy config"
        );
        Ok(())
    }
}
