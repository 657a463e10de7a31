// Licensed under the Apache-2.0 license

//! Common types and constants for the I2C engine.
//!
//! This module provides the bus configuration (speed, timing, transfer mode,
//! own slave address) and its builder.

use crate::i2c::transfer::{Address, Duration};

/// Default byte sent by the slave when the master reads past the configured
/// read buffer.
pub const DEFAULT_SENTINEL: u8 = 0xFF;

/// Default deadline for blocking transfers.
pub const DEFAULT_TIMEOUT: Duration = Duration::millis(1000);

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u32)]
pub enum I2cSpeed {
    Standard = 100_000,
    Fast = 400_000,
    FastPlus = 1_000_000,
}

impl I2cSpeed {
    /// Bus clock frequency for this speed grade.
    #[must_use]
    pub const fn frequency(self) -> fugit::HertzU32 {
        fugit::HertzU32::from_raw(self as u32)
    }
}

/// How the data phase of an asynchronous master transfer moves bytes.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum I2cXferMode {
    /// Data phase through the DMA service, final read byte by interrupt.
    DmaMode,
    /// One interrupt per byte.
    ByteMode,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct TimingConfig {
    pub manual_scl_high: u8,
    pub manual_scl_low: u8,
    pub manual_sda_hold: u8,
    pub clk_src: u32,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct I2cConfig {
    pub xfer_mode: I2cXferMode,
    /// Other masters share the bus: check bus-busy before Start.
    pub multi_master: bool,
    pub timing_config: TimingConfig,
    pub speed: I2cSpeed,
    /// Own address; `Some` makes the bus listen as a slave when idle.
    pub own_address: Option<Address>,
    /// Byte transmitted when the slave read buffer runs dry.
    pub sentinel: u8,
    /// Deadline applied when a transfer does not carry its own.
    pub timeout: Duration,
}

impl Default for I2cConfig {
    fn default() -> Self {
        I2cConfigBuilder::new().build()
    }
}

pub struct I2cConfigBuilder {
    xfer_mode: I2cXferMode,
    multi_master: bool,
    timing_config: Option<TimingConfig>,
    speed: I2cSpeed,
    own_address: Option<Address>,
    sentinel: u8,
    timeout: Duration,
}

impl Default for I2cConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl I2cConfigBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self {
            xfer_mode: I2cXferMode::ByteMode,
            multi_master: false,
            timing_config: None,
            speed: I2cSpeed::Standard,
            own_address: None,
            sentinel: DEFAULT_SENTINEL,
            timeout: DEFAULT_TIMEOUT,
        }
    }
    #[must_use]
    pub fn xfer_mode(mut self, mode: I2cXferMode) -> Self {
        self.xfer_mode = mode;
        self
    }
    #[must_use]
    pub fn multi_master(mut self, enabled: bool) -> Self {
        self.multi_master = enabled;
        self
    }
    #[must_use]
    pub fn speed(mut self, speed: I2cSpeed) -> Self {
        self.speed = speed;
        self
    }
    #[must_use]
    pub fn timing_config(mut self, config: TimingConfig) -> Self {
        self.timing_config = Some(config);
        self
    }
    #[must_use]
    pub fn own_address(mut self, address: Address) -> Self {
        self.own_address = Some(address);
        self
    }
    #[must_use]
    pub fn sentinel(mut self, byte: u8) -> Self {
        self.sentinel = byte;
        self
    }
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
    #[must_use]
    pub fn build(self) -> I2cConfig {
        I2cConfig {
            xfer_mode: self.xfer_mode,
            multi_master: self.multi_master,
            timing_config: self.timing_config.unwrap_or_default(),
            speed: self.speed,
            own_address: self.own_address,
            sentinel: self.sentinel,
            timeout: self.timeout,
        }
    }
}
