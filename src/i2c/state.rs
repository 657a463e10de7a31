// Licensed under the Apache-2.0 license

//! Controller role and status reporting.

use crate::i2c::error::ErrorFlags;
use crate::i2c::transfer::{Address, Direction};

/// Position of the bus controller in the master/slave state machines.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Role {
    #[default]
    Idle,
    MasterAddressing,
    MasterTx,
    MasterRx,
    /// Chained frame finished; the bus is still held.
    MasterRestartPending,
    MasterStopPending,
    SlaveListening,
    SlaveAddressed,
    SlaveTx,
    SlaveRx,
    SlaveStopPending,
}

impl Role {
    #[must_use]
    pub const fn mode(self) -> Mode {
        match self {
            Role::Idle | Role::SlaveListening => Mode::None,
            Role::MasterAddressing
            | Role::MasterTx
            | Role::MasterRx
            | Role::MasterRestartPending
            | Role::MasterStopPending => Mode::Master,
            Role::SlaveAddressed | Role::SlaveTx | Role::SlaveRx | Role::SlaveStopPending => {
                Mode::Slave
            }
        }
    }

    #[must_use]
    pub const fn is_master(self) -> bool {
        matches!(self.mode(), Mode::Master)
    }

    /// A remote master currently owns our slave side.
    #[must_use]
    pub const fn is_slave_active(self) -> bool {
        matches!(self.mode(), Mode::Slave)
    }

    /// No transaction in flight.
    #[must_use]
    pub const fn is_quiescent(self) -> bool {
        matches!(self, Role::Idle | Role::SlaveListening)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Mode {
    None,
    Master,
    Slave,
}

/// Frame that ended without Stop and still holds the bus.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct HeldFrame {
    pub address: Address,
    pub direction: Direction,
    /// The final written byte was not acknowledged.
    pub nacked: bool,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct ControllerState {
    pub role: Role,
    /// Role resumed when the current master transaction ends.
    pub previous_role: Role,
    pub held: Option<HeldFrame>,
    /// Accumulated since the current transaction or slave phase started.
    pub errors: ErrorFlags,
}

impl ControllerState {
    #[must_use]
    pub const fn mode(&self) -> Mode {
        self.role.mode()
    }

    pub fn record(&mut self, error: crate::i2c::error::Error) {
        self.errors.insert(error.flag());
    }
}

/// Snapshot returned by `get_status`. Status bits in the low byte, error
/// flags of the current or last transaction in the high byte.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct StatusBits(u16);

impl StatusBits {
    /// A transaction is in flight.
    pub const BUSY: Self = Self(1 << 0);
    pub const MASTER: Self = Self(1 << 1);
    pub const SLAVE: Self = Self(1 << 2);
    pub const LISTENING: Self = Self(1 << 3);
    /// Another master owns the bus.
    pub const BUS_BUSY: Self = Self(1 << 4);
    /// A chained frame holds the bus.
    pub const HELD: Self = Self(1 << 5);

    #[must_use]
    pub fn new(role: Role, errors: ErrorFlags, bus_busy: bool) -> Self {
        let mut bits = u16::from(errors.bits()) << 8;
        if !role.is_quiescent() {
            bits |= Self::BUSY.0;
        }
        match role.mode() {
            Mode::Master => bits |= Self::MASTER.0,
            Mode::Slave => bits |= Self::SLAVE.0,
            Mode::None => {}
        }
        if role == Role::SlaveListening {
            bits |= Self::LISTENING.0;
        }
        if role == Role::MasterRestartPending {
            bits |= Self::HELD.0;
        }
        if bus_busy {
            bits |= Self::BUS_BUSY.0;
        }
        Self(bits)
    }

    #[must_use]
    pub const fn bits(self) -> u16 {
        self.0
    }

    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    #[must_use]
    pub const fn errors(self) -> ErrorFlags {
        ErrorFlags::from_bits((self.0 >> 8) as u8)
    }

    #[must_use]
    pub fn mode(self) -> Mode {
        if self.contains(Self::MASTER) {
            Mode::Master
        } else if self.contains(Self::SLAVE) {
            Mode::Slave
        } else {
            Mode::None
        }
    }
}

impl core::ops::BitOr for StatusBits {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}
