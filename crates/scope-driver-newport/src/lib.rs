//! Newport motion controller adapters.
//!
//! This crate provides a single-axis driver for the Newport ESP302 motion
//! controller (RS-232 / USB serial) together with its ASCII command codec.
//!
//! # Usage
//!
//! Add to your `Cargo.toml`:
//!
//! ```toml
//! [dependencies]
//! scope-driver-newport = { path = "../scope-driver-newport" }
//! ```
//!
//! Then build the stage from a `[stage]` configuration table:
//!
//! ```rust,ignore
//! use scope_driver_newport::{Esp302Stage, StageConfig};
//!
//! let config = StageConfig::from_toml(table)?;
//! let mut stage = Esp302Stage::connect(config).await?;
//! stage.initialize().await?;
//! ```

pub mod config;
pub mod esp302;
pub mod protocol;

pub use config::{StageConfig, UNDEFINED_PORT};
pub use esp302::{Esp302Stage, DEVICE_DESCRIPTION, DEVICE_NAME, STEP_SIZE_UM};
pub use protocol::{Command, ErrorStatus, Mnemonic};
