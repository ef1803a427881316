//! User settings for the `proxyport` tool.
//!
//! Stored in JSON format at `~/.proxyport/settings.json`, or wherever
//! `PROXYPORT_SETTINGS` points.

use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::debug;

use crate::adapters::{atomic_file, LockPolicy, SystemdOptions};
use crate::application::ReconfigureOptions;
use crate::domain::{ServiceConfig, DEFAULT_LISTEN_POINTER, DEFAULT_PORT_POINTER};
use crate::error::{Error, Result};

/// Environment variable overriding the settings file location.
pub const SETTINGS_ENV: &str = "PROXYPORT_SETTINGS";

/// Slack on top of the service bounds for a whole apply or recovery.
const APPLY_SLACK: Duration = Duration::from_secs(5);

/// Settings describing which proxy to manage and how.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    /// The proxy's JSON configuration file.
    pub config_path: PathBuf,

    /// JSON pointer to the port field inside it.
    pub port_pointer: String,

    /// JSON pointer to the listen address, used to aim the health probe.
    pub listen_pointer: String,

    /// Address the health probe connects to, overriding the listen address.
    pub probe_host: Option<IpAddr>,

    /// systemd unit running the proxy.
    pub service_unit: String,

    /// The proxy picks up a new port on `systemctl reload`.
    pub reload_supported: bool,

    pub stop_timeout_secs: u64,
    pub start_timeout_secs: u64,
    pub persist_timeout_secs: u64,

    /// Require the new port to accept connections before reporting success.
    pub health_probe: bool,

    /// Refuse ports another process is listening on.
    pub check_port_available: bool,

    pub lock_policy: LockPolicy,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            config_path: PathBuf::from("/usr/local/etc/trojan/config.json"),
            port_pointer: DEFAULT_PORT_POINTER.to_string(),
            listen_pointer: DEFAULT_LISTEN_POINTER.to_string(),
            probe_host: None,
            service_unit: "trojan".to_string(),
            reload_supported: false,
            stop_timeout_secs: 10,
            start_timeout_secs: 10,
            persist_timeout_secs: 5,
            health_probe: true,
            check_port_available: true,
            lock_policy: LockPolicy::FailFast,
        }
    }
}

impl Settings {
    /// Lock file guarding reconfiguration of `config_path`.
    pub fn lock_path(&self) -> PathBuf {
        let mut path = self.config_path.clone().into_os_string();
        path.push(".lock");
        PathBuf::from(path)
    }

    /// Where the health probe connects: `probe_host`, else the proxy's
    /// configured listen address, else loopback.
    pub fn probe_host_for(&self, config: Option<&ServiceConfig>) -> IpAddr {
        self.probe_host
            .or_else(|| config.and_then(|c| c.listen_host(&self.listen_pointer)))
            .unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST))
    }

    pub fn systemd_options(&self, config: Option<&ServiceConfig>) -> SystemdOptions {
        SystemdOptions {
            reload_supported: self.reload_supported,
            stop_timeout: Duration::from_secs(self.stop_timeout_secs),
            start_timeout: Duration::from_secs(self.start_timeout_secs),
            health_probe: self.health_probe,
            probe_host: self.probe_host_for(config),
            ..SystemdOptions::default()
        }
    }

    pub fn orchestrator_options(&self) -> ReconfigureOptions {
        let service_bound =
            Duration::from_secs(self.stop_timeout_secs + self.start_timeout_secs) + APPLY_SLACK;
        ReconfigureOptions {
            persist_timeout: Duration::from_secs(self.persist_timeout_secs),
            apply_timeout: service_bound,
            recovery_timeout: service_bound,
            lock_policy: self.lock_policy,
            lock_file: Some(self.lock_path()),
            lock_wait: service_bound,
            check_port_available: self.check_port_available,
        }
    }
}

/// Reads and writes [`Settings`].
pub struct SettingsStore {
    path: PathBuf,
}

impl SettingsStore {
    /// Create a store at `$PROXYPORT_SETTINGS` or `~/.proxyport/settings.json`.
    pub fn new() -> Result<Self> {
        if let Some(path) = std::env::var_os(SETTINGS_ENV).filter(|p| !p.is_empty()) {
            return Ok(Self::with_path(PathBuf::from(path)));
        }

        let home = dirs::home_dir()
            .ok_or_else(|| Error::Settings("Could not determine home directory".to_string()))?;

        Ok(Self::with_path(home.join(".proxyport").join("settings.json")))
    }

    /// Create a store with a custom path (for testing).
    pub fn with_path(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load settings from disk.
    ///
    /// Returns defaults if the file doesn't exist.
    pub async fn load(&self) -> Result<Settings> {
        let content = match fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "No settings file, using defaults");
                return Ok(Settings::default());
            }
            Err(e) => return Err(Error::Settings(format!("Failed to read settings: {}", e))),
        };

        serde_json::from_str(&content)
            .map_err(|e| Error::Settings(format!("Failed to parse settings: {}", e)))
    }

    /// Save settings to disk.
    ///
    /// Creates the settings directory if it doesn't exist.
    pub async fn save(&self, settings: &Settings) -> Result<()> {
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir).await.map_err(|e| {
                Error::Settings(format!("Failed to create settings directory: {}", e))
            })?;
        }

        let mut content = serde_json::to_string_pretty(settings)
            .map_err(|e| Error::Settings(format!("Failed to serialize settings: {}", e)))?;
        content.push('\n');

        atomic_file::replace(&self.path, content)
            .await
            .map_err(|e| Error::Settings(format!("Failed to write settings: {}", e)))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_missing_file_gives_defaults() {
        let dir = tempdir().unwrap();
        let store = SettingsStore::with_path(dir.path().join("settings.json"));

        let settings = store.load().await.unwrap();
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.port_pointer, "/local_port");
        assert_eq!(settings.lock_policy, LockPolicy::FailFast);
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let dir = tempdir().unwrap();
        let store = SettingsStore::with_path(dir.path().join("nested").join("settings.json"));

        let settings = Settings {
            config_path: PathBuf::from("/etc/xray/config.json"),
            port_pointer: "/inbounds/0/port".to_string(),
            service_unit: "xray".to_string(),
            reload_supported: true,
            lock_policy: LockPolicy::Wait,
            ..Default::default()
        };
        store.save(&settings).await.unwrap();

        assert_eq!(store.load().await.unwrap(), settings);
        let leftovers = std::fs::read_dir(dir.path().join("nested")).unwrap().count();
        assert_eq!(leftovers, 1);
    }

    #[tokio::test]
    async fn test_partial_file_fills_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"serviceUnit": "trojan-go", "lockPolicy": "wait"}"#).unwrap();

        let settings = SettingsStore::with_path(path).load().await.unwrap();
        assert_eq!(settings.service_unit, "trojan-go");
        assert_eq!(settings.lock_policy, LockPolicy::Wait);
        assert_eq!(settings.stop_timeout_secs, 10);
    }

    #[tokio::test]
    async fn test_malformed_file_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{").unwrap();

        let err = SettingsStore::with_path(path).load().await.unwrap_err();
        assert!(matches!(err, Error::Settings(_)));
    }

    #[test]
    fn test_derived_options() {
        let settings = Settings::default();
        assert_eq!(
            settings.lock_path(),
            PathBuf::from("/usr/local/etc/trojan/config.json.lock")
        );

        let systemd = settings.systemd_options(None);
        assert_eq!(systemd.stop_timeout, Duration::from_secs(10));
        assert!(systemd.health_probe);
        assert_eq!(systemd.probe_host, IpAddr::V4(Ipv4Addr::LOCALHOST));

        let options = settings.orchestrator_options();
        assert_eq!(options.persist_timeout, Duration::from_secs(5));
        assert_eq!(options.apply_timeout, Duration::from_secs(25));
        assert_eq!(options.lock_file, Some(settings.lock_path()));
        assert!(options.check_port_available);
    }

    #[test]
    fn test_probe_host_follows_listen_address() {
        let raw = r#"{"local_addr": "10.0.0.5", "local_port": 443}"#;
        let config = ServiceConfig::parse(raw, DEFAULT_PORT_POINTER).unwrap();

        let settings = Settings::default();
        assert_eq!(
            settings.systemd_options(Some(&config)).probe_host,
            "10.0.0.5".parse::<IpAddr>().unwrap()
        );

        let pinned = Settings {
            probe_host: Some("192.168.1.1".parse().unwrap()),
            ..Default::default()
        };
        assert_eq!(
            pinned.probe_host_for(Some(&config)),
            "192.168.1.1".parse::<IpAddr>().unwrap()
        );

        let wildcard = ServiceConfig::parse(
            r#"{"local_addr": "0.0.0.0", "local_port": 443}"#,
            DEFAULT_PORT_POINTER,
        )
        .unwrap();
        assert_eq!(
            settings.probe_host_for(Some(&wildcard)),
            IpAddr::V4(Ipv4Addr::LOCALHOST)
        );
    }
}
