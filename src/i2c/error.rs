// Licensed under the Apache-2.0 license

//! Error kinds reported by the transaction engine.

use embedded_hal::i2c::{ErrorKind, NoAcknowledgeSource};

/// I2C transaction error.
///
/// Every hardware anomaly seen by the state machine maps to exactly one of
/// these kinds. The hardware is returned to a known state before the error is
/// surfaced.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    /// The addressed device did not acknowledge its address.
    AddressNak,
    /// The device stopped acknowledging before the last byte of the frame.
    DataNak,
    /// Another master won arbitration.
    ArbitrationLost,
    /// Misplaced Start or Stop condition on the bus.
    BusError,
    /// Slave write buffer exhausted; excess bytes were discarded.
    Overflow,
    /// Slave read buffer exhausted; sentinel bytes were sent.
    Underflow,
    /// Deadline expired before the transaction completed.
    Timeout,
    /// A transaction is already in flight or the bus is held by someone else.
    Busy,
    /// Request rejected before touching the hardware.
    InvalidArgument,
    /// Transaction terminated by an explicit abort.
    Aborted,
}

impl Error {
    /// Bit recorded in [`ErrorFlags`] for this error.
    #[must_use]
    pub const fn flag(self) -> ErrorFlags {
        match self {
            Error::AddressNak => ErrorFlags::ADDRESS_NAK,
            Error::DataNak => ErrorFlags::DATA_NAK,
            Error::ArbitrationLost => ErrorFlags::ARBITRATION_LOST,
            Error::BusError => ErrorFlags::BUS_ERROR,
            Error::Overflow => ErrorFlags::OVERFLOW,
            Error::Underflow => ErrorFlags::UNDERFLOW,
            Error::Timeout => ErrorFlags::TIMEOUT,
            Error::Aborted => ErrorFlags::ABORTED,
            Error::Busy | Error::InvalidArgument => ErrorFlags::NONE,
        }
    }
}

impl embedded_hal::i2c::Error for Error {
    fn kind(&self) -> ErrorKind {
        match self {
            Error::AddressNak => ErrorKind::NoAcknowledge(NoAcknowledgeSource::Address),
            Error::DataNak => ErrorKind::NoAcknowledge(NoAcknowledgeSource::Data),
            Error::ArbitrationLost => ErrorKind::ArbitrationLoss,
            Error::BusError => ErrorKind::Bus,
            Error::Overflow => ErrorKind::Overrun,
            Error::Underflow
            | Error::Timeout
            | Error::Busy
            | Error::InvalidArgument
            | Error::Aborted => ErrorKind::Other,
        }
    }
}

/// Error bits accumulated during one transaction or slave phase.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ErrorFlags(u8);

impl ErrorFlags {
    pub const NONE: Self = Self(0);
    pub const ADDRESS_NAK: Self = Self(1 << 0);
    pub const DATA_NAK: Self = Self(1 << 1);
    pub const ARBITRATION_LOST: Self = Self(1 << 2);
    pub const BUS_ERROR: Self = Self(1 << 3);
    pub const OVERFLOW: Self = Self(1 << 4);
    pub const UNDERFLOW: Self = Self(1 << 5);
    pub const TIMEOUT: Self = Self(1 << 6);
    pub const ABORTED: Self = Self(1 << 7);

    #[must_use]
    pub const fn bits(self) -> u8 {
        self.0
    }

    #[must_use]
    pub const fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }

    pub fn clear(&mut self) {
        self.0 = 0;
    }
}

impl core::ops::BitOr for ErrorFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}
