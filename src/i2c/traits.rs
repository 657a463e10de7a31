// Licensed under the Apache-2.0 license

//! # I2C Hardware Abstraction Traits
//!
//! The transaction engine never touches registers. Everything silicon-specific
//! sits behind small traits, each with a single responsibility:
//!
//! ```text
//! I2cBusController (register facade, consumed by the engine)
//! TickSource       (monotonic time for deadlines)
//! DmaService       (channel allocation and transfers, glued in `i2c::dma`)
//! PeripheralSetup  (clocks and pins, used by `i2c::system_setup`)
//! InterruptRegistry (vector wiring, used by `i2c::system_setup`)
//!
//! I2cMaster        (blocking master role, exposed)
//! I2cSlave         (slave buffer role, exposed)
//! ```

use crate::i2c::common::{I2cSpeed, TimingConfig};
use crate::i2c::transfer::{Address, Direction, Instant};
use embedded_hal::i2c::{AddressMode, Operation, SevenBitAddress};

/// Hardware status flags observed by the state machine.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Flag {
    /// Start or ReStart generated (master).
    StartSent,
    /// Address acknowledged by the target (master).
    AddressSent,
    /// Transmit register empty.
    TxEmpty,
    /// Receive register holds a byte.
    RxNotEmpty,
    /// Byte or address was not acknowledged.
    Nack,
    ArbitrationLost,
    /// Misplaced Start/Stop.
    BusError,
    /// Stop (or ReStart while addressed as slave) seen on the bus.
    StopDetected,
    /// Own address matched (slave). Clock is stretched until answered.
    AddressMatched,
    /// The remote master requested a read.
    SlaveRead,
}

impl Flag {
    pub const ALL: [Flag; 10] = [
        Flag::StartSent,
        Flag::AddressSent,
        Flag::TxEmpty,
        Flag::RxNotEmpty,
        Flag::Nack,
        Flag::ArbitrationLost,
        Flag::BusError,
        Flag::StopDetected,
        Flag::AddressMatched,
        Flag::SlaveRead,
    ];

    /// Interrupt source raised by this flag.
    #[must_use]
    pub const fn source(self) -> InterruptMask {
        match self {
            Flag::StartSent | Flag::AddressSent | Flag::StopDetected | Flag::AddressMatched => {
                InterruptMask::EVENT
            }
            Flag::TxEmpty | Flag::RxNotEmpty => InterruptMask::BUFFER,
            Flag::Nack | Flag::ArbitrationLost | Flag::BusError => InterruptMask::ERROR,
            Flag::SlaveRead => InterruptMask::NONE,
        }
    }
}

/// Interrupt sources of a bus controller.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct InterruptMask(u8);

impl InterruptMask {
    pub const NONE: Self = Self(0);
    /// Start, address, Stop and address-match events.
    pub const EVENT: Self = Self(1 << 0);
    /// Transmit-empty and receive-not-empty.
    pub const BUFFER: Self = Self(1 << 1);
    /// NACK, arbitration loss and bus errors.
    pub const ERROR: Self = Self(1 << 2);
    pub const ALL: Self = Self(0b111);

    #[must_use]
    pub const fn bits(self) -> u8 {
        self.0
    }

    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    #[must_use]
    pub const fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    #[must_use]
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    #[must_use]
    pub const fn difference(self, other: Self) -> Self {
        Self(self.0 & !other.0)
    }

    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl core::ops::BitOr for InterruptMask {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        self.union(rhs)
    }
}

/// Register-level facade of one bus controller.
///
/// Implementations are thin: each method maps to one register access or one
/// bus primitive. Every operation must be idempotent when the hardware is
/// already in the requested state.
///
/// # Examples
///
/// ```rust,no_run
/// use i2c_ddk::i2c::common::{I2cSpeed, TimingConfig};
/// use i2c_ddk::i2c::traits::{I2cBusController, InterruptMask};
///
/// fn bring_up<B: I2cBusController>(bus: &mut B) -> u32 {
///     bus.disable();
///     let hz = bus.configure_timing(I2cSpeed::Fast, &TimingConfig::default());
///     bus.enable();
///     bus.enable_interrupt(InterruptMask::EVENT | InterruptMask::ERROR);
///     hz
/// }
/// ```
pub trait I2cBusController {
    fn enable(&mut self);
    fn disable(&mut self);

    /// Program clock dividers; returns the achieved SCL frequency in Hz.
    fn configure_timing(&mut self, speed: I2cSpeed, timing: &TimingConfig) -> u32;

    /// Own slave address; `None` disables address matching.
    fn set_own_address(&mut self, address: Option<Address>);

    fn flag(&self, flag: Flag) -> bool;
    fn clear_flag(&mut self, flag: Flag);

    fn enable_interrupt(&mut self, mask: InterruptMask);
    fn disable_interrupt(&mut self, mask: InterruptMask);

    fn write_fifo(&mut self, byte: u8);
    fn read_fifo(&mut self) -> u8;
    fn fifo_level(&self) -> usize;

    fn assert_start(&mut self);
    fn assert_restart(&mut self);
    fn assert_stop(&mut self);

    /// Release the stretched clock and answer the next received byte with ACK.
    ///
    /// As slave during the address phase this accepts the address.
    fn assert_ack(&mut self);

    /// Release the stretched clock and answer the next received byte with NACK.
    ///
    /// As slave during the address phase this refuses the address.
    fn assert_nack(&mut self);

    fn send_address(&mut self, address: Address, direction: Direction);

    /// Route data-register requests to the DMA controller.
    fn set_dma(&mut self, enabled: bool);

    /// Another master currently owns the bus.
    fn is_bus_busy(&self) -> bool;
}

/// Monotonic time source used for deadlines.
pub trait TickSource {
    fn now(&self) -> Instant;
}

impl<T: TickSource + ?Sized> TickSource for &T {
    fn now(&self) -> Instant {
        (**self).now()
    }
}

/// Which way a DMA channel moves bytes relative to the bus data register.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DmaDirection {
    MemoryToPeripheral,
    PeripheralToMemory,
}

/// One programmed DMA transfer. The peripheral side is the data register of
/// the bus the channel was acquired for.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct DmaRequest {
    pub direction: DmaDirection,
    /// Memory address of the first byte.
    pub memory: usize,
    pub len: usize,
}

/// DMA controller as seen by one bus.
pub trait DmaService {
    type Channel: Copy + PartialEq + core::fmt::Debug;

    fn acquire_channel(&mut self) -> Option<Self::Channel>;
    fn configure(&mut self, channel: Self::Channel, request: &DmaRequest);
    fn start(&mut self, channel: Self::Channel);
    fn stop(&mut self, channel: Self::Channel);
    /// Bytes not yet moved by the last started transfer.
    fn remaining(&self, channel: Self::Channel) -> usize;
    /// Called from the DMA interrupt when a transfer finishes or stops early.
    fn set_completion_callback(&mut self, channel: Self::Channel, callback: fn(Self::Channel));
}

/// Clock and pin bring-up for one bus instance.
pub trait PeripheralSetup {
    type Error;

    fn enable_peripheral_clock(&mut self, bus: u8) -> Result<(), Self::Error>;
    fn configure_pins(&mut self, bus: u8) -> Result<(), Self::Error>;
}

/// Interrupt controller wiring.
pub trait InterruptRegistry {
    type Error;

    fn set_vector(&mut self, irq: u16, handler: fn()) -> Result<(), Self::Error>;
    fn enable_irq(&mut self, irq: u16) -> Result<(), Self::Error>;
}

/// I2C master mode operations
///
/// The address type `A` must implement `AddressMode` to ensure compatibility
/// with embedded-hal. Implementations are provided for `SevenBitAddress` (u8)
/// and `TenBitAddress` (u16).
///
/// # Examples
///
/// ```rust,no_run
/// use i2c_ddk::i2c::traits::I2cMaster;
///
/// fn read_sensor<T: I2cMaster>(mut i2c: T) -> Result<u16, T::Error> {
///     let mut data = [0u8; 2];
///     i2c.read(0x48u8, &mut data)?;
///     Ok(u16::from_be_bytes(data))
/// }
/// ```
pub trait I2cMaster<A: AddressMode = SevenBitAddress> {
    type Error: embedded_hal::i2c::Error + core::fmt::Debug;

    /// Write data to a slave device at the given address
    ///
    /// # Errors
    ///
    /// Returns an error if the slave does not acknowledge, bus arbitration
    /// is lost, or the deadline expires.
    fn write(&mut self, addr: A, bytes: &[u8]) -> Result<(), Self::Error>;

    /// Read data from a slave device at the given address
    ///
    /// # Errors
    ///
    /// Same conditions as [`I2cMaster::write`].
    fn read(&mut self, addr: A, buffer: &mut [u8]) -> Result<(), Self::Error>;

    /// Write then read with a ReStart in between, without releasing the bus.
    ///
    /// # Errors
    ///
    /// Returns an error if either phase fails.
    fn write_read(&mut self, addr: A, bytes: &[u8], buffer: &mut [u8]) -> Result<(), Self::Error>;

    /// Execute a sequence of operations as one bus transaction.
    ///
    /// Adjacent operations of the same direction continue the data stream;
    /// a direction change issues a ReStart. A single Stop ends the sequence.
    ///
    /// # Errors
    ///
    /// The first failing operation aborts the sequence.
    fn transaction_slice(
        &mut self,
        addr: A,
        ops_slice: &mut [Operation<'_>],
    ) -> Result<(), Self::Error>;
}

/// I2C slave mode buffer management.
///
/// Buffers are borrowed for `'b` and serve exactly one bus phase; after the
/// phase ends they are disarmed.
pub trait I2cSlave<'b> {
    type Error;

    /// Bytes served when a remote master reads from us.
    fn configure_read_buffer(&mut self, data: &'b [u8]) -> Result<(), Self::Error>;

    /// Storage for bytes written to us by a remote master.
    fn configure_write_buffer(&mut self, buffer: &'b mut [u8]) -> Result<(), Self::Error>;

    /// Completed write buffer and the number of bytes received.
    fn take_write_buffer(&mut self) -> Option<(&'b mut [u8], usize)>;
}
