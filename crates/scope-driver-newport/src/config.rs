use anyhow::Context;
use serde::Deserialize;
use std::time::Duration;

/// Port name used before one has been configured.
pub const UNDEFINED_PORT: &str = "Undefined";

/// Configuration for the ESP302 stage adapter.
///
/// Positions are in native controller units (millimeters); the conversion
/// factor maps them to user units (micrometers by default).
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StageConfig {
    /// Serial port path (e.g. "/dev/ttyUSB0", "COM3")
    #[serde(default = "default_port")]
    pub port: String,

    /// Controller bus address, 1-31 (default: 1)
    #[serde(default = "default_address")]
    pub address: u8,

    /// User units per native unit (default: 1000, mm to µm)
    #[serde(default = "default_conversion_factor")]
    pub conversion_factor: f64,

    /// Lower travel limit in mm (default: -50)
    #[serde(default = "default_lower_limit")]
    pub lower_limit_mm: f64,

    /// Upper travel limit in mm (default: 50)
    #[serde(default = "default_upper_limit")]
    pub upper_limit_mm: f64,

    /// Initial velocity in mm/s (default: 5)
    #[serde(default = "default_velocity")]
    pub velocity: f64,

    #[serde(default = "default_velocity_min")]
    pub velocity_min: f64,

    #[serde(default = "default_velocity_max")]
    pub velocity_max: f64,

    /// Serial baud rate (default: 19200)
    #[serde(default = "default_baud")]
    pub baud_rate: u32,

    /// Per-reply read timeout (default: 5000 ms)
    #[serde(default = "default_reply_timeout_ms")]
    pub reply_timeout_ms: u64,

    /// Sleep between busy polls (default: 5 ms)
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Deadline for homing and other waits on the ready flag (default: 60 s)
    #[serde(default = "default_ready_timeout_ms")]
    pub ready_timeout_ms: u64,
}

fn default_port() -> String {
    UNDEFINED_PORT.to_string()
}
fn default_address() -> u8 {
    1
}
fn default_conversion_factor() -> f64 {
    1000.0
}
fn default_lower_limit() -> f64 {
    -50.0
}
fn default_upper_limit() -> f64 {
    50.0
}
fn default_velocity() -> f64 {
    5.0
}
fn default_velocity_min() -> f64 {
    1e-6
}
fn default_velocity_max() -> f64 {
    1e11
}
fn default_baud() -> u32 {
    19_200
}
fn default_reply_timeout_ms() -> u64 {
    scope_core::limits::SERIAL_REPLY_TIMEOUT.as_millis() as u64
}
fn default_poll_interval_ms() -> u64 {
    scope_core::limits::BUSY_POLL_INTERVAL.as_millis() as u64
}
fn default_ready_timeout_ms() -> u64 {
    scope_core::limits::READY_TIMEOUT.as_millis() as u64
}

impl Default for StageConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            address: default_address(),
            conversion_factor: default_conversion_factor(),
            lower_limit_mm: default_lower_limit(),
            upper_limit_mm: default_upper_limit(),
            velocity: default_velocity(),
            velocity_min: default_velocity_min(),
            velocity_max: default_velocity_max(),
            baud_rate: default_baud(),
            reply_timeout_ms: default_reply_timeout_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            ready_timeout_ms: default_ready_timeout_ms(),
        }
    }
}

impl StageConfig {
    /// Parse and validate a `[stage]` table.
    pub fn from_toml(value: toml::Value) -> anyhow::Result<Self> {
        let config: StageConfig = value.try_into().context("invalid stage configuration")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if !(1..=31).contains(&self.address) {
            anyhow::bail!("ESP302 controller address must be 1-31, got {}", self.address);
        }
        if !(self.conversion_factor.is_finite() && self.conversion_factor > 0.0) {
            anyhow::bail!(
                "Conversion factor must be positive, got {}",
                self.conversion_factor
            );
        }
        if !(self.lower_limit_mm.is_finite() && self.upper_limit_mm.is_finite())
            || self.lower_limit_mm >= self.upper_limit_mm
        {
            anyhow::bail!(
                "Invalid travel limits [{}, {}] mm",
                self.lower_limit_mm,
                self.upper_limit_mm
            );
        }
        if !(self.velocity_min > 0.0 && self.velocity_min <= self.velocity_max) {
            anyhow::bail!(
                "Invalid velocity limits [{}, {}]",
                self.velocity_min,
                self.velocity_max
            );
        }
        if !(self.velocity_min..=self.velocity_max).contains(&self.velocity) {
            anyhow::bail!("Velocity {} outside velocity limits", self.velocity);
        }
        if self.reply_timeout_ms == 0 || self.ready_timeout_ms == 0 {
            anyhow::bail!("Timeouts must be non-zero");
        }
        Ok(())
    }

    pub fn reply_timeout(&self) -> Duration {
        Duration::from_millis(self.reply_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn ready_timeout(&self) -> Duration {
        Duration::from_millis(self.ready_timeout_ms)
    }

    pub fn has_port(&self) -> bool {
        !self.port.is_empty() && self.port != UNDEFINED_PORT
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_controller_factory_settings() {
        let config = StageConfig::default();
        assert_eq!(config.port, "Undefined");
        assert!(!config.has_port());
        assert_eq!(config.address, 1);
        assert_eq!(config.conversion_factor, 1000.0);
        assert_eq!((config.lower_limit_mm, config.upper_limit_mm), (-50.0, 50.0));
        assert_eq!(config.velocity, 5.0);
        assert_eq!(config.baud_rate, 19_200);
        assert_eq!(config.reply_timeout(), Duration::from_secs(5));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn parses_partial_table() {
        let value: toml::Value = toml::from_str(
            r#"
            port = "/dev/ttyUSB0"
            address = 2
            upper_limit_mm = 25.0
            "#,
        )
        .unwrap();
        let config = StageConfig::from_toml(value).unwrap();
        assert!(config.has_port());
        assert_eq!(config.address, 2);
        assert_eq!(config.upper_limit_mm, 25.0);
        assert_eq!(config.lower_limit_mm, -50.0);
    }

    #[test]
    fn rejects_bad_values() {
        let address = StageConfig {
            address: 32,
            ..Default::default()
        };
        assert!(address.validate().is_err());

        let limits = StageConfig {
            lower_limit_mm: 10.0,
            upper_limit_mm: -10.0,
            ..Default::default()
        };
        assert!(limits.validate().is_err());

        let factor = StageConfig {
            conversion_factor: 0.0,
            ..Default::default()
        };
        assert!(factor.validate().is_err());
    }
}
