//! Configuration file support for lldpd
//!
//! Loads and validates lldpd configuration from TOML files.
//! Default location: /etc/sonic/lldpd.toml

use crate::capture::CaptureConfig;
use crate::error::{LldpError, Result};
use crate::session::EngineSettings;
use crate::tx::TxTiming;
use crate::types::{IfIndex, MacAddress, PortInfo};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::warn;

pub const DEFAULT_CONFIG_PATH: &str = "/etc/sonic/lldpd.toml";

/// Global LLDP settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalConfig {
    /// Run LLDP on enabled ports
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Seconds between transmitted frames
    #[serde(default = "default_tx_interval")]
    pub tx_interval_secs: u64,

    /// Advertised TTL is the interval times this multiplier
    #[serde(default = "default_tx_hold_multiplier")]
    pub tx_hold_multiplier: u64,

    /// Depth of the dispatcher's channels
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

/// Live capture parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureSection {
    #[serde(default = "default_snaplen")]
    pub snaplen: i32,

    #[serde(default = "default_promiscuous")]
    pub promiscuous: bool,

    /// Read timeout in milliseconds
    #[serde(default = "default_read_timeout")]
    pub read_timeout_ms: u64,
}

/// One physical port
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortConfig {
    pub if_index: IfIndex,

    #[serde(default)]
    pub port_number: u32,

    pub name: String,

    /// Port MAC address, `aa:bb:cc:dd:ee:ff`
    pub mac: String,

    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

/// Complete lldpd configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LldpdConfig {
    #[serde(default)]
    pub global: GlobalConfig,

    #[serde(default)]
    pub capture: CaptureSection,

    #[serde(default)]
    pub ports: Vec<PortConfig>,
}

/// Runtime configuration change
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigChange {
    /// Enable or disable LLDP on every port
    GlobalEnable(bool),
    /// Enable or disable LLDP on one port
    PortEnable { if_index: IfIndex, enabled: bool },
    /// New transmit interval and hold multiplier
    TxTiming {
        interval_secs: u64,
        hold_multiplier: u64,
    },
}

// Default functions
fn default_enabled() -> bool {
    true
}

fn default_tx_interval() -> u64 {
    30
}

fn default_tx_hold_multiplier() -> u64 {
    4
}

fn default_channel_capacity() -> usize {
    1024
}

fn default_snaplen() -> i32 {
    65535
}

fn default_promiscuous() -> bool {
    true
}

fn default_read_timeout() -> u64 {
    1000
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            tx_interval_secs: default_tx_interval(),
            tx_hold_multiplier: default_tx_hold_multiplier(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

impl Default for CaptureSection {
    fn default() -> Self {
        Self {
            snaplen: default_snaplen(),
            promiscuous: default_promiscuous(),
            read_timeout_ms: default_read_timeout(),
        }
    }
}

impl LldpdConfig {
    /// Load configuration from file, falling back to defaults if file not found
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        match fs::read_to_string(path) {
            Ok(content) => Self::from_toml(&content).map_err(|e| {
                LldpError::Config(format!(
                    "Failed to parse config file {}: {}",
                    path.display(),
                    e
                ))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(path = %path.display(), "Config file not found, using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(LldpError::Io(e)),
        }
    }

    /// Load from default location or defaults
    pub fn load() -> Result<Self> {
        Self::load_or_default(DEFAULT_CONFIG_PATH)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| LldpError::Config(e.to_string()))
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        TxTiming::new(self.global.tx_interval_secs, self.global.tx_hold_multiplier)?;

        if self.global.channel_capacity == 0 {
            return Err(LldpError::Config(
                "channel_capacity must be > 0".to_string(),
            ));
        }
        if self.capture.snaplen <= 0 {
            return Err(LldpError::Config("snaplen must be > 0".to_string()));
        }

        let mut seen = HashSet::new();
        for port in &self.ports {
            if port.name.is_empty() {
                return Err(LldpError::Config(format!(
                    "port with ifindex {} has no name",
                    port.if_index
                )));
            }
            if !seen.insert(port.if_index) {
                return Err(LldpError::Config(format!(
                    "duplicate ifindex {} ({})",
                    port.if_index, port.name
                )));
            }
            port.mac.parse::<MacAddress>()?;
        }

        Ok(())
    }

    /// Get read timeout as Duration
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.capture.read_timeout_ms)
    }

    pub fn engine_settings(&self) -> Result<EngineSettings> {
        Ok(EngineSettings {
            enabled: self.global.enabled,
            timing: TxTiming::new(self.global.tx_interval_secs, self.global.tx_hold_multiplier)?,
            capture: CaptureConfig {
                snaplen: self.capture.snaplen,
                promiscuous: self.capture.promiscuous,
                read_timeout: self.read_timeout(),
            },
            channel_capacity: self.global.channel_capacity,
        })
    }

    /// Configured ports with their per-port enable flag
    pub fn ports(&self) -> Result<Vec<(PortInfo, bool)>> {
        self.ports
            .iter()
            .map(|port| {
                let mac = port.mac.parse::<MacAddress>()?;
                Ok((
                    PortInfo::new(port.if_index, port.port_number, port.name.clone(), mac),
                    port.enabled,
                ))
            })
            .collect()
    }
}
