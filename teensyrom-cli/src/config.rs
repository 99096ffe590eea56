//! Configuration file support for the teensyrom CLI.
//!
//! Configuration is loaded from multiple sources with the following priority (highest first):
//! 1. Command-line arguments
//! 2. Environment variables (TEENSYROM_*)
//! 3. Local config file (./teensyrom.toml)
//! 4. Global config file (<config dir>/teensyrom/config.toml)
//!
//! Ports a cartridge answered on are remembered separately in
//! `teensyrom_ports.toml` (next to a local config) or
//! `<config dir>/teensyrom/ports.toml`, and tried first next time.

use {
    directories::ProjectDirs,
    log::{debug, info, warn},
    serde::{Deserialize, Serialize},
    std::{
        fs,
        path::{Path, PathBuf},
        time::Duration,
    },
    teensyrom::{ConnectionConfig, StorageTarget},
};

const LOCAL_CONFIG: &str = "teensyrom.toml";
const LOCAL_PORTS: &str = "teensyrom_ports.toml";

/// `[connection]` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConnectionSection {
    /// Preferred serial port (e.g., "/dev/ttyACM0" or "COM3").
    pub port: Option<String>,
    /// Baud rate.
    pub baud: Option<u32>,
    /// Health check and discovery period in milliseconds.
    pub health_check_ms: Option<u64>,
    /// Handshake response wait in milliseconds.
    pub handshake_timeout_ms: Option<u64>,
}

/// `[transfer]` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TransferSection {
    /// Default storage target.
    pub storage: Option<StorageTarget>,
    /// Announce uploads with the legacy send-file token.
    #[serde(default)]
    pub legacy_token: bool,
}

/// Remembered ports file.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
struct PortsFile {
    #[serde(default)]
    known_ports: Vec<String>,
}

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    /// Ports a cartridge answered on before, most recent first.
    #[serde(default)]
    pub known_ports: Vec<String>,
    /// Connection settings.
    #[serde(default)]
    pub connection: ConnectionSection,
    /// Transfer settings.
    #[serde(default)]
    pub transfer: TransferSection,
}

impl Config {
    /// Load configuration from all available sources.
    pub fn load() -> Self {
        let mut config = Self::default();

        if let Some(global_path) = Self::global_config_path() {
            if let Some(global_config) = Self::load_from_file(&global_path) {
                debug!("Loaded global config from {}", global_path.display());
                config.merge(global_config);
            }
        }

        if let Some(local_config) = Self::load_from_file(Path::new(LOCAL_CONFIG)) {
            debug!("Loaded local config from {LOCAL_CONFIG}");
            config.merge(local_config);
        }

        config.merge_known_ports(Self::load_ports_file());
        config
    }

    /// Load configuration from a specific file path (--config flag).
    pub fn load_from_path(path: &Path) -> Self {
        if let Some(config) = Self::load_from_file(path) {
            debug!("Loaded config from {}", path.display());
            config
        } else {
            warn!(
                "Could not load config from {}, using defaults",
                path.display()
            );
            Self::default()
        }
    }

    fn load_from_file<T: serde::de::DeserializeOwned>(path: &Path) -> Option<T> {
        if !path.exists() {
            return None;
        }

        match fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => Some(config),
                Err(e) => {
                    warn!("Failed to parse config file {}: {}", path.display(), e);
                    None
                },
            },
            Err(e) => {
                warn!("Failed to read config file {}: {}", path.display(), e);
                None
            },
        }
    }

    fn load_ports_file() -> Vec<String> {
        let local: Option<PortsFile> = Self::load_from_file(Path::new(LOCAL_PORTS));
        let global = || {
            Self::global_config_dir()
                .and_then(|dir| Self::load_from_file::<PortsFile>(&dir.join("ports.toml")))
        };
        local
            .or_else(global)
            .map(|file| file.known_ports)
            .unwrap_or_default()
    }

    /// Get the global configuration directory.
    pub fn global_config_dir() -> Option<PathBuf> {
        ProjectDirs::from("", "", "teensyrom").map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Get the global configuration file path.
    pub fn global_config_path() -> Option<PathBuf> {
        Self::global_config_dir().map(|dir| dir.join("config.toml"))
    }

    /// Merge another config into this one. Set values in `other` win.
    fn merge(&mut self, other: Self) {
        if other.connection.port.is_some() {
            self.connection.port = other.connection.port;
        }
        if other.connection.baud.is_some() {
            self.connection.baud = other.connection.baud;
        }
        if other.connection.health_check_ms.is_some() {
            self.connection.health_check_ms = other.connection.health_check_ms;
        }
        if other.connection.handshake_timeout_ms.is_some() {
            self.connection.handshake_timeout_ms = other.connection.handshake_timeout_ms;
        }

        if other.transfer.storage.is_some() {
            self.transfer.storage = other.transfer.storage;
        }
        if other.transfer.legacy_token {
            self.transfer.legacy_token = true;
        }

        self.merge_known_ports(other.known_ports);
    }

    /// Put `ports` in front of the known list, keeping it free of duplicates.
    fn merge_known_ports(&mut self, ports: Vec<String>) {
        let mut merged = ports;
        for port in self
            .known_ports
            .drain(..)
        {
            if !merged.contains(&port) {
                merged.push(port);
            }
        }
        self.known_ports = merged;
    }

    /// Library connection settings, with `baud` from the command line
    /// taking priority over the file.
    pub fn connection_config(&self, baud: Option<u32>, legacy_token: bool) -> ConnectionConfig {
        let mut config = ConnectionConfig::default()
            .with_legacy_send_file(legacy_token || self.transfer.legacy_token);
        if let Some(baud) = baud.or(self.connection.baud) {
            config = config.with_baud_rate(baud);
        }
        if let Some(ms) = self
            .connection
            .health_check_ms
        {
            config = config.with_health_check_interval(Duration::from_millis(ms));
        }
        if let Some(ms) = self
            .connection
            .handshake_timeout_ms
        {
            config = config.with_handshake_timeout(Duration::from_millis(ms));
        }
        config
    }

    /// Storage target, command line first.
    pub fn storage(&self, cli: Option<StorageTarget>) -> StorageTarget {
        cli.or(self.transfer.storage)
            .unwrap_or_default()
    }

    /// Save the known ports list if it changed.
    ///
    /// Writes next to a local config if there is one, otherwise to the
    /// global config directory.
    pub fn remember_ports(&mut self, ports: Vec<String>) -> anyhow::Result<()> {
        if ports == self.known_ports {
            return Ok(());
        }

        let path = if Path::new(LOCAL_PORTS).exists() || Path::new(LOCAL_CONFIG).exists() {
            PathBuf::from(LOCAL_PORTS)
        } else if let Some(global_dir) = Self::global_config_dir() {
            fs::create_dir_all(&global_dir)?;
            global_dir.join("ports.toml")
        } else {
            PathBuf::from(LOCAL_PORTS)
        };

        self.known_ports = ports;
        let content = toml::to_string_pretty(&PortsFile {
            known_ports: self
                .known_ports
                .clone(),
        })?;
        fs::write(&path, content)?;
        info!("Saved known ports to {}", path.display());
        Ok(())
    }
}
