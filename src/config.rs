//! # Serial Line Configuration
//!
//! Settings for one serial channel: device path, baud rate, parity, the
//! first-byte response wait and whether RTS drives the RS-485 transceiver
//! direction. The inter-character silence threshold is derived from the
//! baud rate and attached to the link as [`LineTiming`]; nothing here is
//! process-global, so several channels can run side by side.
//!
//! ```rust
//! use modbus_rtu::config::{Parity, SerialConfig};
//!
//! let config = SerialConfig::from_json(r#"{ "device": "/dev/ttyS1", "baud_rate": 19200, "parity": "none" }"#)?;
//! assert_eq!(config.parity, Parity::None);
//! assert_eq!(config.response_timeout_ms, 1000);
//! # Ok::<(), modbus_rtu::ModbusError>(())
//! ```

use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::error::{ModbusError, ModbusResult};
use crate::transport::{self, LineTiming};

/// Baud rate used when none (0) or an unsupported one is configured
pub const DEFAULT_BAUD_RATE: u32 = 9600;

/// Default first-byte response wait
pub const DEFAULT_RESPONSE_TIMEOUT_MS: u64 = 1000;

/// Serial parity setting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Parity {
    None,
    Even,
    Odd,
}

impl FromStr for Parity {
    type Err = ModbusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" | "n" => Ok(Parity::None),
            "even" | "e" => Ok(Parity::Even),
            "odd" | "o" => Ok(Parity::Odd),
            other => Err(ModbusError::configuration(format!("Unknown parity: {}", other))),
        }
    }
}

impl fmt::Display for Parity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Parity::None => "none",
            Parity::Even => "even",
            Parity::Odd => "odd",
        };
        f.write_str(name)
    }
}

impl From<Parity> for tokio_serial::Parity {
    fn from(parity: Parity) -> Self {
        match parity {
            Parity::None => tokio_serial::Parity::None,
            Parity::Even => tokio_serial::Parity::Even,
            Parity::Odd => tokio_serial::Parity::Odd,
        }
    }
}

/// Serial channel configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    /// Device path, e.g. `/dev/ttyUSB0`
    pub device: String,
    /// Line speed; 0 selects 9600
    pub baud_rate: u32,
    pub parity: Parity,
    /// Wait for the first byte of a response
    pub response_timeout_ms: u64,
    /// Toggle RTS around every transmission
    pub rts_direction_control: bool,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            device: "/dev/ttyUSB0".to_string(),
            baud_rate: DEFAULT_BAUD_RATE,
            parity: Parity::Even,
            response_timeout_ms: DEFAULT_RESPONSE_TIMEOUT_MS,
            rts_direction_control: true,
        }
    }
}

impl SerialConfig {
    /// Create a configuration for `device` with default line settings
    pub fn new<S: Into<String>>(device: S, baud_rate: u32, parity: Parity) -> Self {
        Self {
            device: device.into(),
            baud_rate,
            parity,
            ..Self::default()
        }
    }

    /// Parse a configuration from JSON; missing fields take their defaults
    pub fn from_json(json: &str) -> ModbusResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration from a JSON file
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> ModbusResult<Self> {
        let path = path.as_ref();
        debug!("Loading serial configuration from {}", path.display());

        let text = std::fs::read_to_string(path).map_err(|e| {
            ModbusError::configuration(format!("Cannot read {}: {}", path.display(), e))
        })?;
        Self::from_json(&text)
    }

    /// Check the settings that cannot be fixed up silently
    pub fn validate(&self) -> ModbusResult<()> {
        if self.device.trim().is_empty() {
            return Err(ModbusError::configuration("Serial device path is empty"));
        }
        if self.response_timeout_ms == 0 {
            return Err(ModbusError::configuration("Response timeout must be greater than zero"));
        }
        Ok(())
    }

    /// Baud rate the port is actually opened with
    ///
    /// 0 and rates outside the supported table fall back to 9600.
    pub fn effective_baud_rate(&self) -> u32 {
        match self.baud_rate {
            0 => DEFAULT_BAUD_RATE,
            rate if transport::is_supported_baud_rate(rate) => rate,
            rate => {
                warn!("Unknown baud rate {} for {}, using {}", rate, self.device, DEFAULT_BAUD_RATE);
                DEFAULT_BAUD_RATE
            }
        }
    }

    /// First-byte response wait as a duration
    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }

    /// Timing derived once for the channel this configuration opens
    pub fn line_timing(&self) -> LineTiming {
        LineTiming::for_baud_rate(self.effective_baud_rate())
            .with_response_timeout(self.response_timeout())
    }
}
