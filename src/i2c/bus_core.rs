// Licensed under the Apache-2.0 license

//! Per-bus core shared by the master and slave state machines.

use crate::common::Logger;
use crate::i2c::common::I2cConfig;
use crate::i2c::error::Error;
use crate::i2c::state::{ControllerState, Role};
use crate::i2c::traits::{I2cBusController, InterruptMask};

pub struct BusCore<B: I2cBusController, L: Logger> {
    pub bus: B,
    pub logger: L,
    pub config: I2cConfig,
    pub state: ControllerState,
    irq_mask: InterruptMask,
}

impl<B: I2cBusController, L: Logger> BusCore<B, L> {
    pub fn new(bus: B, config: I2cConfig, logger: L) -> Self {
        Self {
            bus,
            logger,
            config,
            state: ControllerState::default(),
            irq_mask: InterruptMask::NONE,
        }
    }

    /// Role to return to when a master transaction ends.
    #[must_use]
    pub fn resting_role(&self) -> Role {
        if self.config.own_address.is_some() {
            Role::SlaveListening
        } else {
            Role::Idle
        }
    }

    /// Ends the master transaction: back to the role it started from.
    pub fn resume(&mut self) {
        self.state.role = if self.state.previous_role.is_quiescent() {
            self.state.previous_role
        } else {
            self.resting_role()
        };
        self.state.held = None;
    }

    /// Back to the resting role with nothing in flight.
    pub fn reset_role(&mut self) {
        let role = self.resting_role();
        self.state.role = role;
        self.state.previous_role = role;
        self.state.held = None;
    }

    /// Records `error` and logs it.
    pub fn fail(&mut self, error: Error) -> Error {
        self.state.record(error);
        self.logger.error(error_text(error));
        error
    }

    #[must_use]
    pub fn irq_mask(&self) -> InterruptMask {
        self.irq_mask
    }

    /// Enables exactly `mask`.
    pub fn apply_mask(&mut self, mask: InterruptMask) {
        let off = self.irq_mask.difference(mask);
        let on = mask.difference(self.irq_mask);
        if !off.is_empty() {
            self.bus.disable_interrupt(off);
        }
        if !on.is_empty() {
            self.bus.enable_interrupt(on);
        }
        self.irq_mask = mask;
    }
}

/// Interrupt sources the given role listens to.
#[must_use]
pub fn role_mask(role: Role, dma_active: bool) -> InterruptMask {
    match role {
        Role::Idle => InterruptMask::NONE,
        Role::MasterTx | Role::MasterRx if dma_active => {
            InterruptMask::EVENT | InterruptMask::ERROR
        }
        Role::MasterTx
        | Role::MasterRx
        | Role::SlaveAddressed
        | Role::SlaveTx
        | Role::SlaveRx
        | Role::SlaveStopPending => InterruptMask::ALL,
        Role::SlaveListening
        | Role::MasterAddressing
        | Role::MasterRestartPending
        | Role::MasterStopPending => InterruptMask::EVENT | InterruptMask::ERROR,
    }
}

fn error_text(error: Error) -> &'static str {
    match error {
        Error::AddressNak => "address not acknowledged",
        Error::DataNak => "data not acknowledged",
        Error::ArbitrationLost => "arbitration lost",
        Error::BusError => "bus error",
        Error::Overflow => "slave write buffer overflow",
        Error::Underflow => "slave read buffer underflow",
        Error::Timeout => "transfer timed out",
        Error::Busy => "controller busy",
        Error::InvalidArgument => "invalid argument",
        Error::Aborted => "transfer aborted",
    }
}
