//! Newport ESP302 single-axis stage driver.
//!
//! Reference: ESP302 Motion Controller User's Manual
//!
//! Protocol Overview:
//! - Format: ASCII command/response over RS-232 or USB serial
//! - Baud: 19200, 8N1, no flow control
//! - Commands: {Address}{Mnemonic}{Value}, terminated by CR LF
//! - Example: "1PA5.000000" (address 1, position absolute, 5 mm)
//!
//! Setters (`PA`, `PR`, `OR`, `VA`) are fire-and-forget: the controller does
//! not answer them, so a move returns as soon as the write is accepted.
//! Motion completion is observed through the busy bit of `TS`.
//!
//! # Usage
//!
//! ```rust,ignore
//! use scope_driver_newport::{Esp302Stage, StageConfig};
//!
//! let config = StageConfig { port: "/dev/ttyUSB0".into(), ..Default::default() };
//! let mut stage = Esp302Stage::connect(config).await?;
//! stage.initialize().await?;
//! stage.set_position_um(1_250.0).await?;
//! stage.wait_until_ready(std::time::Duration::from_secs(10)).await?;
//! ```

use crate::config::StageConfig;
use crate::protocol::{parse_busy, parse_error_status, parse_number, Command, ErrorStatus, Mnemonic};
use scope_core::error::{AppResult, DaqError};
use scope_core::property::{PropertyDescriptor, PropertySet, PropertyValue};
use scope_core::serial::{
    drain_serial_buffer, open_serial_async, read_line_timeout, wrap_shared, DynSerial, SharedPort,
};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::instrument;

pub const DEVICE_NAME: &str = "NewportESP302Stage";
pub const DEVICE_DESCRIPTION: &str = "Newport ESP302 Controller (1-axis)";

/// How long `initialize` listens for leftover bytes before homing.
const STALE_DRAIN_WINDOW: Duration = Duration::from_millis(20);

/// Size of one step in micrometers.
pub const STEP_SIZE_UM: f64 = 1.0;

pub const PROP_NAME: &str = "Name";
pub const PROP_DESCRIPTION: &str = "Description";
pub const PROP_PORT: &str = "Port";
pub const PROP_CONVERSION_FACTOR: &str = "Conversion Factor";
pub const PROP_MAX_POSITION: &str = "Max Position (mm)";
pub const PROP_MIN_POSITION: &str = "Min Position (mm)";
pub const PROP_ADDRESS: &str = "Controller Address";
pub const PROP_VELOCITY: &str = "Velocity";
pub const PROP_POSITION: &str = "Position";

/// Driver for one axis of a Newport ESP302 controller.
///
/// Every exchange holds the port lock from the write until its reply has
/// been read, so command/reply pairs from concurrent callers never
/// interleave. Positions are never cached: each read goes to the hardware.
pub struct Esp302Stage {
    config: StageConfig,
    port: Option<SharedPort>,
    properties: PropertySet,
    initialized: bool,
}

impl Esp302Stage {
    /// Create an unconnected stage. The port is opened by [`initialize`](Self::initialize).
    pub fn new(config: StageConfig) -> AppResult<Self> {
        config
            .validate()
            .map_err(|e| DaqError::Configuration(e.to_string()))?;
        let properties = Self::pre_init_properties(&config);
        Ok(Self {
            config,
            port: None,
            properties,
            initialized: false,
        })
    }

    /// Create a stage over an already-open byte stream.
    pub fn with_port(port: DynSerial, config: StageConfig) -> AppResult<Self> {
        let mut stage = Self::new(config)?;
        stage.port = Some(wrap_shared(port));
        Ok(stage)
    }

    /// Open the configured serial port at 8N1.
    pub async fn connect(config: StageConfig) -> AppResult<Self> {
        let mut stage = Self::new(config)?;
        stage.open_port().await?;
        Ok(stage)
    }

    async fn open_port(&mut self) -> AppResult<()> {
        if !self.config.has_port() {
            return Err(DaqError::Configuration(
                "no serial port configured for the ESP302".into(),
            ));
        }
        let port =
            open_serial_async(&self.config.port, self.config.baud_rate, DEVICE_NAME).await?;
        self.port = Some(wrap_shared(Box::new(port)));
        tracing::info!(port = %self.config.port, "ESP302 serial port opened");
        Ok(())
    }

    fn pre_init_properties(config: &StageConfig) -> PropertySet {
        let mut properties = PropertySet::new();
        properties.register(PropertyDescriptor::new(PROP_NAME, DEVICE_NAME).read_only());
        properties
            .register(PropertyDescriptor::new(PROP_DESCRIPTION, DEVICE_DESCRIPTION).read_only());
        properties.register(PropertyDescriptor::new(PROP_PORT, config.port.as_str()).pre_init());
        properties.register(
            PropertyDescriptor::new(PROP_CONVERSION_FACTOR, config.conversion_factor).pre_init(),
        );
        properties
            .register(PropertyDescriptor::new(PROP_MAX_POSITION, config.upper_limit_mm).pre_init());
        properties
            .register(PropertyDescriptor::new(PROP_MIN_POSITION, config.lower_limit_mm).pre_init());
        properties.register(
            PropertyDescriptor::new(PROP_ADDRESS, i64::from(config.address))
                .pre_init()
                .with_limits(1.0, 31.0),
        );
        properties.register(
            PropertyDescriptor::new(PROP_VELOCITY, config.velocity)
                .with_limits(config.velocity_min, config.velocity_max),
        );
        properties
    }

    pub fn name(&self) -> &'static str {
        DEVICE_NAME
    }

    pub fn config(&self) -> &StageConfig {
        &self.config
    }

    pub fn address(&self) -> u8 {
        self.config.address
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn properties(&self) -> &PropertySet {
        &self.properties
    }

    // -- lifecycle -----------------------------------------------------------

    /// Home the axis, read back its position and publish the live
    /// `Position` property.
    #[instrument(skip(self), fields(address = self.config.address), err)]
    pub async fn initialize(&mut self) -> AppResult<()> {
        if self.initialized {
            return Ok(());
        }
        if self.port.is_none() {
            self.open_port().await?;
        }

        let stale = {
            let mut port = self.shared_port()?.lock().await;
            drain_serial_buffer(&mut *port, STALE_DRAIN_WINDOW).await
        };
        if stale > 0 {
            tracing::debug!(bytes = stale, "Discarded stale serial input");
        }

        self.home().await?;
        let position = self.get_position_um().await?;

        let (lower, upper) = self.get_limits();
        self.properties
            .register(PropertyDescriptor::new(PROP_POSITION, position).with_limits(lower, upper));
        self.initialized = true;
        tracing::info!(position_um = position, lower, upper, "ESP302 initialized");
        Ok(())
    }

    pub async fn shutdown(&mut self) -> AppResult<()> {
        self.initialized = false;
        Ok(())
    }

    // -- pre-init settings ---------------------------------------------------

    pub fn set_port(&mut self, port: &str) -> AppResult<()> {
        if self.initialized {
            return Err(DaqError::PortChangeForbidden);
        }
        self.config.port = port.to_string();
        self.port = None;
        Ok(())
    }

    pub fn set_conversion_factor(&mut self, factor: f64) -> AppResult<()> {
        self.ensure_pre_init(PROP_CONVERSION_FACTOR)?;
        if !(factor.is_finite() && factor > 0.0) {
            return Err(DaqError::InvalidParameter(format!(
                "conversion factor must be positive, got {}",
                factor
            )));
        }
        self.config.conversion_factor = factor;
        Ok(())
    }

    /// Travel limits in native units (mm).
    pub fn set_limits(&mut self, lower_mm: f64, upper_mm: f64) -> AppResult<()> {
        // Name the limit being changed; the upper one when both or neither are.
        let lower_only =
            lower_mm != self.config.lower_limit_mm && upper_mm == self.config.upper_limit_mm;
        let changed = if lower_only {
            PROP_MIN_POSITION
        } else {
            PROP_MAX_POSITION
        };
        self.ensure_pre_init(changed)?;
        if !(lower_mm.is_finite() && upper_mm.is_finite()) || lower_mm >= upper_mm {
            return Err(DaqError::InvalidParameter(format!(
                "invalid limits [{}, {}] mm",
                lower_mm, upper_mm
            )));
        }
        self.config.lower_limit_mm = lower_mm;
        self.config.upper_limit_mm = upper_mm;
        Ok(())
    }

    pub fn set_controller_address(&mut self, address: u8) -> AppResult<()> {
        self.ensure_pre_init(PROP_ADDRESS)?;
        if !(1..=31).contains(&address) {
            return Err(DaqError::InvalidParameter(format!(
                "controller address must be 1-31, got {}",
                address
            )));
        }
        self.config.address = address;
        Ok(())
    }

    fn ensure_pre_init(&self, property: &str) -> AppResult<()> {
        if self.initialized {
            return Err(DaqError::PreInitOnly(property.to_string()));
        }
        Ok(())
    }

    /// Limits in user units: `[lower * factor, upper * factor]`.
    pub fn get_limits(&self) -> (f64, f64) {
        (
            self.config.lower_limit_mm * self.config.conversion_factor,
            self.config.upper_limit_mm * self.config.conversion_factor,
        )
    }

    // -- motion --------------------------------------------------------------

    /// Start an absolute move. Returns once the command is written.
    ///
    /// The limit check happens in native units, after conversion.
    #[instrument(skip(self), fields(address = self.config.address), err)]
    pub async fn set_position_um(&self, position_um: f64) -> AppResult<()> {
        if !position_um.is_finite() {
            return Err(DaqError::InvalidParameter(format!(
                "position must be finite, got {}",
                position_um
            )));
        }
        let native = position_um / self.config.conversion_factor;
        let (lower, upper) = (self.config.lower_limit_mm, self.config.upper_limit_mm);
        if native < lower || native > upper {
            return Err(DaqError::PositionBeyondLimits {
                requested: native,
                lower,
                upper,
            });
        }
        self.write_command(Command::set(Mnemonic::MoveAbsolute, native))
            .await
    }

    /// Current position in user units, read from the controller.
    #[instrument(skip(self), fields(address = self.config.address), err)]
    pub async fn get_position_um(&self) -> AppResult<f64> {
        let reply = self.query(Command::query(Mnemonic::MoveAbsolute)).await?;
        Ok(parse_number(&reply)? * self.config.conversion_factor)
    }

    /// Start a relative move.
    ///
    /// Unlike [`set_position_um`](Self::set_position_um) this does **not**
    /// check the travel limits; the controller's own limits are the only
    /// guard.
    #[instrument(skip(self), fields(address = self.config.address), err)]
    pub async fn set_relative_position_um(&self, delta_um: f64) -> AppResult<()> {
        if !delta_um.is_finite() {
            return Err(DaqError::InvalidParameter(format!(
                "relative move must be finite, got {}",
                delta_um
            )));
        }
        let native = delta_um / self.config.conversion_factor;
        self.write_command(Command::set(Mnemonic::MoveRelative, native))
            .await
    }

    pub async fn set_position_steps(&self, steps: i64) -> AppResult<()> {
        self.set_position_um(steps as f64 * STEP_SIZE_UM).await
    }

    /// Position in whole steps, truncated toward zero.
    pub async fn get_position_steps(&self) -> AppResult<i64> {
        let um = self.get_position_um().await?;
        Ok((um / STEP_SIZE_UM) as i64)
    }

    // -- status --------------------------------------------------------------

    pub async fn is_busy(&self) -> AppResult<bool> {
        let reply = self.query(Command::plain(Mnemonic::Status)).await?;
        parse_busy(&reply)
    }

    /// Poll the busy flag until it clears or `timeout` elapses.
    #[instrument(skip(self), fields(address = self.config.address), err)]
    pub async fn wait_until_ready(&self, timeout: Duration) -> AppResult<()> {
        let start = tokio::time::Instant::now();

        loop {
            if !self.is_busy().await? {
                return Ok(());
            }

            if start.elapsed() >= timeout {
                return Err(DaqError::Timeout(format!(
                    "ESP302 still busy after {:?}",
                    timeout
                )));
            }

            tokio::time::sleep(self.config.poll_interval()).await;
        }
    }

    /// Search for the origin and wait for the axis to settle.
    #[instrument(skip(self), fields(address = self.config.address), err)]
    pub async fn home(&self) -> AppResult<()> {
        self.write_command(Command::plain(Mnemonic::Home)).await?;
        self.wait_until_ready(self.config.ready_timeout()).await
    }

    /// Query the controller error code.
    ///
    /// A not-homed axis is homed once and queried again; a second not-homed
    /// reply is reported as a controller error.
    #[instrument(skip(self), fields(address = self.config.address), err)]
    pub async fn get_error(&self) -> AppResult<()> {
        let mut rehomed = false;

        loop {
            let reply = self.query(Command::plain(Mnemonic::Error)).await?;
            match parse_error_status(&reply, self.config.address)? {
                ErrorStatus::Clear => return Ok(()),
                ErrorStatus::NotHomed if !rehomed => {
                    tracing::warn!("ESP302 axis not homed, homing before retrying");
                    self.home().await?;
                    rehomed = true;
                }
                ErrorStatus::NotHomed => return Err(DaqError::ControllerError { code: 'H' }),
                ErrorStatus::Fault(code) => return Err(DaqError::ControllerError { code }),
            }
        }
    }

    // -- velocity ------------------------------------------------------------

    #[instrument(skip(self), fields(address = self.config.address), err)]
    pub async fn set_velocity(&self, velocity: f64) -> AppResult<()> {
        let (min, max) = (self.config.velocity_min, self.config.velocity_max);
        if !(min..=max).contains(&velocity) {
            return Err(DaqError::InvalidParameter(format!(
                "velocity {} outside [{}, {}]",
                velocity, min, max
            )));
        }
        self.write_command(Command::set(Mnemonic::Velocity, velocity))
            .await
    }

    #[instrument(skip(self), fields(address = self.config.address), err)]
    pub async fn get_velocity(&self) -> AppResult<f64> {
        let reply = self.query(Command::query(Mnemonic::Velocity)).await?;
        parse_number(&reply)
    }

    // -- properties ----------------------------------------------------------

    /// Host-side property write.
    pub async fn set_property(&mut self, name: &str, value: PropertyValue) -> AppResult<()> {
        if name == PROP_PORT {
            if self.initialized {
                return Err(DaqError::PortChangeForbidden);
            }
            return match value {
                PropertyValue::String(port) => self.set_port(&port),
                other => Err(DaqError::InvalidParameter(format!(
                    "port must be a string, got {}",
                    other
                ))),
            };
        }

        let descriptor = self
            .properties
            .get(name)
            .ok_or_else(|| DaqError::InvalidParameter(format!("unknown property '{}'", name)))?;
        descriptor.validate(&value, self.initialized)?;
        let number = as_f64(&value)?;

        match name {
            PROP_CONVERSION_FACTOR => self.set_conversion_factor(number),
            PROP_MAX_POSITION => self.set_limits(self.config.lower_limit_mm, number),
            PROP_MIN_POSITION => self.set_limits(number, self.config.upper_limit_mm),
            PROP_ADDRESS => self.set_controller_address(number as u8),
            PROP_VELOCITY => self.set_velocity(number).await,
            PROP_POSITION => self.set_position_um(number).await,
            _ => Err(DaqError::ParameterReadOnly),
        }
    }

    /// Host-side property read. `Position` and `Velocity` query the hardware.
    pub async fn get_property(&self, name: &str) -> AppResult<PropertyValue> {
        match name {
            PROP_POSITION if self.initialized => {
                Ok(PropertyValue::Float(self.get_position_um().await?))
            }
            PROP_VELOCITY if self.port.is_some() => {
                Ok(PropertyValue::Float(self.get_velocity().await?))
            }
            PROP_PORT => Ok(PropertyValue::String(self.config.port.clone())),
            PROP_CONVERSION_FACTOR => Ok(PropertyValue::Float(self.config.conversion_factor)),
            PROP_MAX_POSITION => Ok(PropertyValue::Float(self.config.upper_limit_mm)),
            PROP_MIN_POSITION => Ok(PropertyValue::Float(self.config.lower_limit_mm)),
            PROP_ADDRESS => Ok(PropertyValue::Integer(i64::from(self.config.address))),
            _ => self
                .properties
                .get(name)
                .map(|p| p.default.clone())
                .ok_or_else(|| DaqError::InvalidParameter(format!("unknown property '{}'", name))),
        }
    }

    // -- transport -----------------------------------------------------------

    fn shared_port(&self) -> AppResult<&SharedPort> {
        self.port.as_ref().ok_or(DaqError::NotInitialized)
    }

    /// Write one command line without waiting for a reply.
    async fn write_command(&self, command: Command) -> AppResult<()> {
        let line = command.encode(self.config.address);
        let mut port = self.shared_port()?.lock().await;
        tracing::debug!(command = %line.trim_end(), "ESP302 write");

        let writer = port.get_mut();
        writer.write_all(line.as_bytes()).await?;
        writer.flush().await?;
        Ok(())
    }

    /// Write one command line and read exactly one reply line.
    async fn query(&self, command: Command) -> AppResult<String> {
        let line = command.encode(self.config.address);
        let mut port = self.shared_port()?.lock().await;

        let writer = port.get_mut();
        writer.write_all(line.as_bytes()).await?;
        writer.flush().await?;

        let reply = read_line_timeout(&mut *port, self.config.reply_timeout()).await?;
        tracing::trace!(command = %line.trim_end(), reply = %reply, "ESP302 query");
        Ok(reply)
    }
}

fn as_f64(value: &PropertyValue) -> AppResult<f64> {
    match value {
        PropertyValue::Float(v) => Ok(*v),
        PropertyValue::Integer(v) => Ok(*v as f64),
        PropertyValue::String(s) => s
            .trim()
            .parse()
            .map_err(|_| DaqError::InvalidParameter(format!("'{}' is not a number", s))),
    }
}

impl std::fmt::Debug for Esp302Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Esp302Stage")
            .field("config", &self.config)
            .field("connected", &self.port.is_some())
            .field("initialized", &self.initialized)
            .finish()
    }
}
