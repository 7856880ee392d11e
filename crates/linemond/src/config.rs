//! Settings model and settings-file loading.
//!
//! The daemon reads a TOML file shaped like:
//!
//! ```toml
//! listen_address = "0.0.0.0:162"
//! poll_interval_ms = 1000
//! retries = 1
//! timeout_ms = 1500
//! credential = "public"
//! version = "1"
//!
//! [[devices]]
//! name = "north-gate"
//! address = "192.168.1.214"
//!
//! [[devices.lines]]
//! name = "door"
//! poll_identifier = "1.3.6.1.4.1.25728.8900.1.1.2.1"
//! notify_identifier = "1.3.6.1.4.1.25728.8900.1.1.2.1"
//! on = { text = "Open", foreground = "#000000", background = "#00C800" }
//! off = { text = "Closed", foreground = "#000000", background = "#E00000" }
//! ```
//!
//! Identifiers are kept as strings here and parsed per line, so one bad
//! identifier leaves that line unscheduled instead of failing the file.

use std::collections::HashSet;
use std::fs;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use linemon_core::{DeviceId, DomainError, ObjectId, Presentation};
use linemon_protocol::ProtocolVersion;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default notification endpoint.
pub const DEFAULT_LISTEN_ADDRESS: &str = "0.0.0.0:162";

/// Default port value requests are sent to.
pub const DEFAULT_AGENT_PORT: u16 = 161;

pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1000;
pub const DEFAULT_RETRIES: u32 = 1;
pub const DEFAULT_TIMEOUT_MS: u64 = 1500;
pub const DEFAULT_CREDENTIAL: &str = "public";

// ============================================================================
// Settings file
// ============================================================================

/// Top-level settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub listen_address: SocketAddr,

    #[serde(flatten)]
    pub poll: PollSettings,

    pub devices: Vec<DeviceSettings>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            listen_address: SocketAddr::from(([0, 0, 0, 0], 162)),
            poll: PollSettings::default(),
            devices: Vec::new(),
        }
    }
}

/// Global parameters every poll reads on each tick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollSettings {
    pub poll_interval_ms: u64,
    pub retries: u32,
    pub timeout_ms: u64,
    pub credential: String,
    pub version: ProtocolVersion,
}

impl PollSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn validate(&self) -> Result<(), DomainError> {
        if self.poll_interval_ms == 0 {
            return Err(DomainError::InvalidFieldValue {
                field: "poll_interval_ms".to_string(),
                value: "0".to_string(),
                expected: "a positive number of milliseconds".to_string(),
            });
        }
        if self.timeout_ms == 0 {
            return Err(DomainError::InvalidFieldValue {
                field: "timeout_ms".to_string(),
                value: "0".to_string(),
                expected: "a positive number of milliseconds".to_string(),
            });
        }
        Ok(())
    }
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            retries: DEFAULT_RETRIES,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            credential: DEFAULT_CREDENTIAL.to_string(),
            version: ProtocolVersion::default(),
        }
    }
}

/// A device as written in the settings file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceSettings {
    pub name: String,
    pub address: IpAddr,
    #[serde(default = "default_agent_port")]
    pub port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
    #[serde(default)]
    pub lines: Vec<LineSettings>,
}

/// A line as written in the settings file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineSettings {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub poll_identifier: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notify_identifier: Option<String>,
    #[serde(default = "Presentation::default_on")]
    pub on: Presentation,
    #[serde(default = "Presentation::default_off")]
    pub off: Presentation,
}

fn default_agent_port() -> u16 {
    DEFAULT_AGENT_PORT
}

impl Settings {
    /// Default settings file location: `<config_dir>/linemon/config.toml`.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("linemon").join("config.toml"))
    }

    /// Parses settings from TOML text and validates them.
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let settings: Settings =
            toml::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Loads settings from a file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        Self::from_toml(&text)
    }

    /// Loads settings from a file, falling back to defaults if it does not exist.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Checks everything that can be checked without touching the network.
    ///
    /// Identifiers are not checked here; they are parsed per line when the
    /// line is registered.
    pub fn validate(&self) -> Result<(), DomainError> {
        self.poll.validate()?;

        let mut device_names = HashSet::new();
        for device in &self.devices {
            if !device_names.insert(device.name.as_str()) {
                return Err(DomainError::Duplicate {
                    kind: "device",
                    name: device.name.clone(),
                });
            }

            let mut line_names = HashSet::new();
            for line in &device.lines {
                if !line_names.insert(line.name.as_str()) {
                    return Err(DomainError::Duplicate {
                        kind: "line",
                        name: format!("{}/{}", device.name, line.name),
                    });
                }
            }
        }
        Ok(())
    }
}

// ============================================================================
// Engine-facing configuration
// ============================================================================

/// A device as the monitor sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceConfig {
    pub id: DeviceId,
    pub address: IpAddr,
    pub port: u16,
    /// Overrides the global credential when set
    pub credential: Option<String>,
}

impl DeviceConfig {
    pub fn new(id: impl Into<String>, address: IpAddr) -> Self {
        Self {
            id: DeviceId::new(id),
            address,
            port: DEFAULT_AGENT_PORT,
            credential: None,
        }
    }

    /// Address value requests are sent to.
    pub fn agent_address(&self) -> SocketAddr {
        SocketAddr::new(self.address, self.port)
    }
}

impl From<&DeviceSettings> for DeviceConfig {
    fn from(settings: &DeviceSettings) -> Self {
        Self {
            id: DeviceId::new(settings.name.clone()),
            address: settings.address,
            port: settings.port,
            credential: settings.credential.clone(),
        }
    }
}

/// A line as the monitor sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineConfig {
    pub name: String,
    pub poll_identifier: Option<ObjectId>,
    pub notify_identifier: Option<ObjectId>,
    pub on: Presentation,
    pub off: Presentation,
}

impl LineConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            poll_identifier: None,
            notify_identifier: None,
            on: Presentation::default_on(),
            off: Presentation::default_off(),
        }
    }

    pub fn with_identifiers(mut self, poll: ObjectId, notify: ObjectId) -> Self {
        self.poll_identifier = Some(poll);
        self.notify_identifier = Some(notify);
        self
    }

    pub fn with_presentations(mut self, on: Presentation, off: Presentation) -> Self {
        self.on = on;
        self.off = off;
        self
    }
}

impl LineSettings {
    /// Parses the identifiers of this line.
    pub fn to_config(&self) -> Result<LineConfig, DomainError> {
        let parse = |raw: &Option<String>| -> Result<Option<ObjectId>, DomainError> {
            match raw.as_deref().map(str::trim) {
                None | Some("") => Ok(None),
                Some(s) => ObjectId::parse(s).map(Some),
            }
        };

        Ok(LineConfig {
            name: self.name.clone(),
            poll_identifier: parse(&self.poll_identifier)?,
            notify_identifier: parse(&self.notify_identifier)?,
            on: self.on.clone(),
            off: self.off.clone(),
        })
    }

    /// Same line with no identifiers; used when `to_config` fails so the
    /// line is still shown, as `Unknown`.
    pub fn to_inert_config(&self) -> LineConfig {
        LineConfig::new(self.name.clone()).with_presentations(self.on.clone(), self.off.clone())
    }
}

/// Errors that can occur while loading settings.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read settings file {path}: {reason}")]
    Read { path: PathBuf, reason: String },

    #[error("Failed to parse settings: {0}")]
    Parse(String),

    #[error("Invalid settings: {0}")]
    Invalid(#[from] DomainError),
}
