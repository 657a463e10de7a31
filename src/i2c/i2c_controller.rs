// Licensed under the Apache-2.0 license

//! embedded-hal front end.
//!
//! [`I2cController`] exposes any [`I2cMaster`] as an `embedded_hal::i2c::I2c`
//! bus. [`I2cEngine`] implements [`I2cMaster`] for seven- and ten-bit
//! addresses by running each operation as a blocking frame; a sequence of
//! operations becomes one bus transaction with chained frames.

use crate::common::{Logger, NoOpLogger};
use crate::i2c::engine::I2cEngine;
use crate::i2c::error::Error;
use crate::i2c::traits::{DmaService, I2cBusController, I2cMaster, TickSource};
use crate::i2c::transfer::{Address, Chaining, TransferOptions};
use embedded_hal::i2c::{Operation, SevenBitAddress, TenBitAddress};

/// Position of frame `index` in a transaction of `count` frames.
#[must_use]
pub const fn frame_chaining(index: usize, count: usize) -> Chaining {
    if count <= 1 {
        Chaining::Standalone
    } else if index == 0 {
        Chaining::First
    } else if index + 1 >= count {
        Chaining::Last
    } else {
        Chaining::Middle
    }
}

fn run_operations<B, T, D, L>(
    engine: &mut I2cEngine<'_, B, T, D, L>,
    address: Address,
    operations: &mut [Operation<'_>],
) -> Result<(), Error>
where
    B: I2cBusController,
    T: TickSource,
    D: DmaService,
    L: Logger,
{
    if !address.is_valid() {
        return Err(Error::InvalidArgument);
    }
    let count = operations.len();
    for index in 0..count {
        // adjacent reads form one stream; any other successor needs a NACK first
        let read_continues = matches!(operations.get(index + 1), Some(Operation::Read(_)));
        let Some(operation) = operations.get_mut(index) else {
            break;
        };
        let mut options = TransferOptions::chained(frame_chaining(index, count));
        options.read_continues = read_continues;
        match operation {
            Operation::Write(bytes) => engine.master_write(address, bytes, options)?,
            Operation::Read(buffer) => engine.master_read(address, buffer, options)?,
        };
    }
    Ok(())
}

impl<B, T, D, L> I2cMaster<SevenBitAddress> for I2cEngine<'_, B, T, D, L>
where
    B: I2cBusController,
    T: TickSource,
    D: DmaService,
    L: Logger,
{
    type Error = Error;

    fn write(&mut self, addr: SevenBitAddress, bytes: &[u8]) -> Result<(), Self::Error> {
        run_operations(self, Address::SevenBit(addr), &mut [Operation::Write(bytes)])
    }

    fn read(&mut self, addr: SevenBitAddress, buffer: &mut [u8]) -> Result<(), Self::Error> {
        run_operations(self, Address::SevenBit(addr), &mut [Operation::Read(buffer)])
    }

    fn write_read(
        &mut self,
        addr: SevenBitAddress,
        bytes: &[u8],
        buffer: &mut [u8],
    ) -> Result<(), Self::Error> {
        run_operations(
            self,
            Address::SevenBit(addr),
            &mut [Operation::Write(bytes), Operation::Read(buffer)],
        )
    }

    fn transaction_slice(
        &mut self,
        addr: SevenBitAddress,
        ops_slice: &mut [Operation<'_>],
    ) -> Result<(), Self::Error> {
        run_operations(self, Address::SevenBit(addr), ops_slice)
    }
}

impl<B, T, D, L> I2cMaster<TenBitAddress> for I2cEngine<'_, B, T, D, L>
where
    B: I2cBusController,
    T: TickSource,
    D: DmaService,
    L: Logger,
{
    type Error = Error;

    fn write(&mut self, addr: TenBitAddress, bytes: &[u8]) -> Result<(), Self::Error> {
        run_operations(self, Address::TenBit(addr), &mut [Operation::Write(bytes)])
    }

    fn read(&mut self, addr: TenBitAddress, buffer: &mut [u8]) -> Result<(), Self::Error> {
        run_operations(self, Address::TenBit(addr), &mut [Operation::Read(buffer)])
    }

    fn write_read(
        &mut self,
        addr: TenBitAddress,
        bytes: &[u8],
        buffer: &mut [u8],
    ) -> Result<(), Self::Error> {
        run_operations(
            self,
            Address::TenBit(addr),
            &mut [Operation::Write(bytes), Operation::Read(buffer)],
        )
    }

    fn transaction_slice(
        &mut self,
        addr: TenBitAddress,
        ops_slice: &mut [Operation<'_>],
    ) -> Result<(), Self::Error> {
        run_operations(self, Address::TenBit(addr), ops_slice)
    }
}

pub struct I2cController<H: I2cMaster, L: Logger = NoOpLogger> {
    pub hardware: H,
    pub logger: L,
}

impl<H: I2cMaster, L: Logger> I2cController<H, L> {
    pub fn new(hardware: H, logger: L) -> Self {
        Self { hardware, logger }
    }
}

impl<H: I2cMaster, L: Logger> embedded_hal::i2c::ErrorType for I2cController<H, L> {
    type Error = H::Error;
}

impl<H: I2cMaster, L: Logger> embedded_hal::i2c::I2c for I2cController<H, L> {
    fn read(&mut self, addr: SevenBitAddress, buffer: &mut [u8]) -> Result<(), Self::Error> {
        self.hardware.read(addr, buffer)
    }

    fn write(&mut self, addr: SevenBitAddress, bytes: &[u8]) -> Result<(), Self::Error> {
        self.hardware.write(addr, bytes)
    }

    fn write_read(
        &mut self,
        addr: SevenBitAddress,
        bytes: &[u8],
        buffer: &mut [u8],
    ) -> Result<(), Self::Error> {
        self.hardware.write_read(addr, bytes, buffer)
    }

    fn transaction(
        &mut self,
        addr: SevenBitAddress,
        operations: &mut [Operation<'_>],
    ) -> Result<(), Self::Error> {
        let result = self.hardware.transaction_slice(addr, operations);
        if result.is_err() {
            self.logger.error("i2c transaction failed");
        }
        result
    }
}

impl<H, L> embedded_hal::i2c::I2c<TenBitAddress> for I2cController<H, L>
where
    H: I2cMaster + I2cMaster<TenBitAddress, Error = <H as I2cMaster>::Error>,
    L: Logger,
{
    fn transaction(
        &mut self,
        addr: TenBitAddress,
        operations: &mut [Operation<'_>],
    ) -> Result<(), Self::Error> {
        let result =
            I2cMaster::<TenBitAddress>::transaction_slice(&mut self.hardware, addr, operations);
        if result.is_err() {
            self.logger.error("i2c transaction failed");
        }
        result
    }
}
