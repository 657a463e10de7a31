// Licensed under the Apache-2.0 license

//! I2C System Setup Helper
//!
//! One-shot board wiring for a bus: peripheral clock, pin muxing and the
//! interrupt vector, performed through the [`PeripheralSetup`] and
//! [`InterruptRegistry`] collaborators so the engine itself never touches
//! system-level registers.

use crate::i2c::error::Error;
use crate::i2c::traits::{InterruptRegistry, PeripheralSetup};

/// Helper for bus-level system wiring.
pub struct I2cSystemSetup;

impl I2cSystemSetup {
    /// Enables the peripheral clock of `bus`, then routes its pins.
    ///
    /// # Errors
    ///
    /// The first collaborator failure, converted into [`Error`].
    pub fn initialize_i2c_system<S>(setup: &mut S, bus: u8) -> Result<(), Error>
    where
        S: PeripheralSetup,
        Error: From<S::Error>,
    {
        setup.enable_peripheral_clock(bus).map_err(Error::from)?;
        setup.configure_pins(bus).map_err(Error::from)?;
        Ok(())
    }

    /// Installs `handler` for `irq` and unmasks it.
    ///
    /// # Errors
    ///
    /// The first registry failure, converted into [`Error`].
    pub fn register_interrupt<R>(registry: &mut R, irq: u16, handler: fn()) -> Result<(), Error>
    where
        R: InterruptRegistry,
        Error: From<R::Error>,
    {
        registry.set_vector(irq, handler).map_err(Error::from)?;
        registry.enable_irq(irq).map_err(Error::from)?;
        Ok(())
    }

    /// Clock, pins, then the interrupt. The vector is only unmasked once the
    /// peripheral is clocked.
    ///
    /// # Errors
    ///
    /// Stops at the first failing step.
    pub fn initialize_bus<S, R>(
        setup: &mut S,
        registry: &mut R,
        bus: u8,
        irq: u16,
        handler: fn(),
    ) -> Result<(), Error>
    where
        S: PeripheralSetup,
        R: InterruptRegistry,
        Error: From<S::Error> + From<R::Error>,
    {
        Self::initialize_i2c_system(setup, bus)?;
        Self::register_interrupt(registry, irq, handler)
    }
}
