// Licensed under the Apache-2.0 license

//! I2C transaction engine.
//!
//! Portable master/slave state machines driving any controller that
//! implements [`traits::I2cBusController`], for bare-metal and `no_std`
//! environments. Blocking and interrupt/DMA-driven operation share the same
//! state machines; the embedded-hal adapter lives in [`i2c_controller`].

pub mod bus_core;
pub mod common;
pub mod dma;
pub mod engine;
pub mod error;
pub mod event;
pub mod i2c_controller;
pub mod master;
pub mod shared;
#[cfg(any(test, feature = "sim"))]
pub mod sim;
pub mod slave;
pub mod state;
pub mod system_setup;
pub mod traits;
pub mod transfer;

pub use common::{I2cConfig, I2cConfigBuilder, I2cSpeed, I2cXferMode, TimingConfig};
pub use engine::I2cEngine;
pub use error::{Error, ErrorFlags};
pub use event::{AddressResponse, Event, HardwareEvent, I2cEventHandler};
pub use i2c_controller::I2cController;
pub use state::{Mode, Role, StatusBits};
pub use transfer::{
    next_ack_policy, AckPolicy, Address, Chaining, Direction, Duration, Instant, TransferOptions,
    XferBuffer,
};
