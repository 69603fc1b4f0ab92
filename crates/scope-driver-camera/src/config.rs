use crate::faults::FaultConfig;
use anyhow::Context;
use scope_core::data::FrameGeometry;
use scope_core::limits::validate_frame_size;
use serde::Deserialize;

/// Configuration for the FastCamera adapter.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CameraConfig {
    /// Frame width in pixels (default: 2304)
    #[serde(default = "default_width")]
    pub width: u32,

    /// Frame height in pixels (default: 2304)
    #[serde(default = "default_height")]
    pub height: u32,

    /// Bytes per pixel within one channel, 1 or 2 (default: 2)
    #[serde(default = "default_bytes_per_pixel")]
    pub bytes_per_pixel: u32,

    /// Number of channel planes (default: 3)
    #[serde(default = "default_channels")]
    pub channels: u32,

    /// Components per pixel (default: 1)
    #[serde(default = "default_components")]
    pub components: u32,

    /// Initial exposure in milliseconds (default: 10)
    #[serde(default = "default_exposure_ms")]
    pub exposure_ms: f64,

    /// Sleep for the exposure time on every snap (default: true)
    #[serde(default = "default_simulate_exposure")]
    pub simulate_exposure: bool,

    #[serde(default)]
    pub faults: FaultConfig,
}

fn default_width() -> u32 {
    2304
}
fn default_height() -> u32 {
    2304
}
fn default_bytes_per_pixel() -> u32 {
    2
}
fn default_channels() -> u32 {
    3
}
fn default_components() -> u32 {
    1
}
fn default_exposure_ms() -> f64 {
    10.0
}
fn default_simulate_exposure() -> bool {
    true
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            width: default_width(),
            height: default_height(),
            bytes_per_pixel: default_bytes_per_pixel(),
            channels: default_channels(),
            components: default_components(),
            exposure_ms: default_exposure_ms(),
            simulate_exposure: default_simulate_exposure(),
            faults: FaultConfig::default(),
        }
    }
}

impl CameraConfig {
    /// Parse and validate a `[camera]` table.
    pub fn from_toml(value: toml::Value) -> anyhow::Result<Self> {
        let config: CameraConfig = value
            .try_into()
            .context("invalid camera configuration")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.width == 0 || self.height == 0 {
            anyhow::bail!("Camera resolution must be non-zero");
        }
        if self.channels == 0 {
            anyhow::bail!("Camera must have at least one channel");
        }
        if self.components == 0 {
            anyhow::bail!("Camera must have at least one component per pixel");
        }
        if !matches!(self.bytes_per_pixel, 1 | 2) {
            anyhow::bail!(
                "bytes_per_pixel must be 1 or 2, got {}",
                self.bytes_per_pixel
            );
        }
        if !(self.exposure_ms.is_finite() && self.exposure_ms > 0.0) {
            anyhow::bail!("Exposure must be positive, got {} ms", self.exposure_ms);
        }
        validate_frame_size(
            self.width,
            self.height,
            self.bytes_per_pixel as usize,
            self.channels as usize,
        )?;
        self.faults.validate()
    }

    pub fn geometry(&self) -> FrameGeometry {
        FrameGeometry {
            width: self.width,
            height: self.height,
            bytes_per_pixel: self.bytes_per_pixel,
            channels: self.channels,
            components: self.components,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_fast_camera() {
        let config = CameraConfig::default();
        assert_eq!((config.width, config.height), (2304, 2304));
        assert_eq!(config.bytes_per_pixel, 2);
        assert_eq!(config.channels, 3);
        assert_eq!(config.components, 1);
        assert_eq!(config.exposure_ms, 10.0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_table_fills_defaults() {
        let value: toml::Value = toml::from_str(
            r#"
            width = 640
            height = 480
            [faults]
            fail_after = 3
            "#,
        )
        .unwrap();
        let config = CameraConfig::from_toml(value).unwrap();
        assert_eq!(config.width, 640);
        assert_eq!(config.channels, 3);
        assert_eq!(config.faults.fail_after, Some(3));
    }

    #[test]
    fn rejects_bad_values() {
        let zero = CameraConfig {
            width: 0,
            ..Default::default()
        };
        assert!(zero.validate().is_err());

        let exposure = CameraConfig {
            exposure_ms: -1.0,
            ..Default::default()
        };
        assert!(exposure.validate().is_err());

        let depth = CameraConfig {
            bytes_per_pixel: 3,
            ..Default::default()
        };
        assert!(depth.validate().is_err());
    }
}
