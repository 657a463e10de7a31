// Licensed under the Apache-2.0 license

//! Slave transaction state machine.
//!
//! ```text
//! Listening -> Addressed -> (Tx | Rx) -> Stop/ReStart -> Listening
//! ```
//!
//! Incoming bytes go to the armed write buffer; reads are served from the
//! armed read buffer, then from the sentinel byte. Each buffer serves one
//! phase and is disarmed when the phase ends.

use crate::common::Logger;
use crate::i2c::bus_core::BusCore;
use crate::i2c::error::Error;
use crate::i2c::event::{AddressResponse, Event, HardwareEvent, Notifier};
use crate::i2c::state::Role;
use crate::i2c::traits::{Flag, I2cBusController};
use crate::i2c::transfer::Direction;

/// Buffers lent to the slave side by the application.
#[derive(Debug, Default)]
pub struct SlaveBuffers<'b> {
    read: Option<&'b [u8]>,
    read_index: usize,
    write: Option<&'b mut [u8]>,
    write_count: usize,
    completed: Option<(&'b mut [u8], usize)>,
    /// Direction of the phase in progress.
    direction: Option<Direction>,
    empty_reported: bool,
    full_reported: bool,
    last_count: usize,
}

impl<'b> SlaveBuffers<'b> {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            read: None,
            read_index: 0,
            write: None,
            write_count: 0,
            completed: None,
            direction: None,
            empty_reported: false,
            full_reported: false,
            last_count: 0,
        }
    }

    /// Arms (or refills) the read buffer.
    pub fn set_read(&mut self, data: &'b [u8]) {
        self.read = Some(data);
        self.read_index = 0;
        self.empty_reported = false;
    }

    pub fn set_write(&mut self, buffer: &'b mut [u8]) {
        self.write = Some(buffer);
        self.write_count = 0;
        self.full_reported = false;
    }

    pub fn take_completed(&mut self) -> Option<(&'b mut [u8], usize)> {
        self.completed.take()
    }

    /// Bytes moved in the phase in progress.
    #[must_use]
    pub fn phase_count(&self) -> usize {
        match self.direction {
            Some(Direction::Write) => self.write_count,
            Some(Direction::Read) => self.read_index,
            None => 0,
        }
    }

    /// Bytes moved by the last completed phase.
    #[must_use]
    pub fn last_count(&self) -> usize {
        self.last_count
    }

    #[must_use]
    pub fn in_phase(&self) -> bool {
        self.direction.is_some()
    }

    fn write_room(&self) -> usize {
        self.write
            .as_ref()
            .map_or(0, |buffer| buffer.len().saturating_sub(self.write_count))
    }

    fn store(&mut self, byte: u8) -> bool {
        let Some(buffer) = self.write.as_mut() else {
            return false;
        };
        match buffer.get_mut(self.write_count) {
            Some(slot) => {
                *slot = byte;
                self.write_count += 1;
                true
            }
            None => false,
        }
    }

    fn next_read_byte(&mut self) -> Option<u8> {
        let byte = self.read?.get(self.read_index).copied()?;
        self.read_index += 1;
        Some(byte)
    }

    fn begin_phase(&mut self, direction: Direction) {
        self.direction = Some(direction);
        self.write_count = 0;
        self.read_index = 0;
        self.full_reported = false;
        self.empty_reported = false;
    }

    /// Disarms the buffer used by the phase and returns its count.
    fn complete_phase(&mut self) -> Option<(Direction, usize)> {
        let direction = self.direction.take()?;
        let count = match direction {
            Direction::Write => {
                let count = self.write_count;
                if let Some(buffer) = self.write.take() {
                    self.completed = Some((buffer, count));
                }
                self.write_count = 0;
                count
            }
            Direction::Read => {
                let count = self.read_index;
                self.read = None;
                self.read_index = 0;
                count
            }
        };
        self.last_count = count;
        Some((direction, count))
    }

    fn drop_phase(&mut self) {
        self.direction = None;
        self.write_count = 0;
        self.read_index = 0;
    }
}

/// Feeds one hardware event to the slave machine.
pub fn step<B: I2cBusController, L: Logger>(
    core: &mut BusCore<B, L>,
    buffers: &mut SlaveBuffers<'_>,
    notifier: &mut Notifier<'_>,
    event: HardwareEvent,
) {
    let role = core.state.role;
    match (role, event) {
        (_, HardwareEvent::AddressMatched { direction }) => {
            if role.is_slave_active() {
                // ReStart without a Stop flag
                finish_phase(core, buffers, notifier);
            }
            address_matched(core, buffers, notifier, direction);
        }
        (Role::SlaveAddressed | Role::SlaveRx, HardwareEvent::RxReady) => {
            receive(core, buffers, notifier);
        }
        (Role::SlaveAddressed | Role::SlaveTx, HardwareEvent::TxReady) => {
            transmit(core, buffers, notifier);
        }
        (Role::SlaveAddressed | Role::SlaveTx, HardwareEvent::Nack) => {
            core.state.role = Role::SlaveStopPending;
        }
        (_, HardwareEvent::StopDetected) if role.is_slave_active() => {
            finish_phase(core, buffers, notifier);
        }
        (_, HardwareEvent::ArbitrationLost) if role.is_slave_active() => {
            phase_error(core, buffers, notifier, Error::ArbitrationLost);
        }
        (_, HardwareEvent::BusError) if role.is_slave_active() => {
            phase_error(core, buffers, notifier, Error::BusError);
        }
        (Role::SlaveListening, HardwareEvent::RxReady) => {
            let _ = core.bus.read_fifo();
        }
        _ => {}
    }
}

fn address_matched<B: I2cBusController, L: Logger>(
    core: &mut BusCore<B, L>,
    buffers: &mut SlaveBuffers<'_>,
    notifier: &mut Notifier<'_>,
    direction: Direction,
) {
    match notifier.address_match(direction) {
        AddressResponse::Ack => {
            core.state.errors.clear();
            buffers.begin_phase(direction);
            core.bus.assert_ack();
            core.bus.clear_flag(Flag::AddressMatched);
            core.state.role = Role::SlaveAddressed;
            if direction == Direction::Write {
                arm_next(core, buffers);
            }
            core.logger.debug("own address matched");
            notifier.post(Event::AddressMatch(direction));
        }
        AddressResponse::Nack => {
            core.bus.assert_nack();
            core.bus.clear_flag(Flag::AddressMatched);
            core.state.role = Role::SlaveListening;
            core.logger.debug("own address refused");
        }
    }
}

/// ACK the next incoming byte while there is room, NACK once full.
fn arm_next<B: I2cBusController, L: Logger>(core: &mut BusCore<B, L>, buffers: &SlaveBuffers<'_>) {
    if buffers.write_room() > 0 {
        core.bus.assert_ack();
    } else {
        core.bus.assert_nack();
    }
}

fn receive<B: I2cBusController, L: Logger>(
    core: &mut BusCore<B, L>,
    buffers: &mut SlaveBuffers<'_>,
    notifier: &mut Notifier<'_>,
) {
    core.state.role = Role::SlaveRx;
    take_byte(core, buffers, notifier);
    arm_next(core, buffers);
}

/// Moves the received byte into the write buffer; the first byte that does
/// not fit reports the overflow.
fn take_byte<B: I2cBusController, L: Logger>(
    core: &mut BusCore<B, L>,
    buffers: &mut SlaveBuffers<'_>,
    notifier: &mut Notifier<'_>,
) {
    let byte = core.bus.read_fifo();
    if !buffers.store(byte) && !buffers.full_reported {
        buffers.full_reported = true;
        core.fail(Error::Overflow);
        notifier.post(Event::BufferFull);
    }
}

fn transmit<B: I2cBusController, L: Logger>(
    core: &mut BusCore<B, L>,
    buffers: &mut SlaveBuffers<'_>,
    notifier: &mut Notifier<'_>,
) {
    core.state.role = Role::SlaveTx;
    let byte = match buffers.next_read_byte() {
        Some(byte) => byte,
        None => {
            if !buffers.empty_reported {
                buffers.empty_reported = true;
                core.fail(Error::Underflow);
                notifier.post(Event::BufferEmpty);
            }
            core.config.sentinel
        }
    };
    core.bus.write_fifo(byte);
}

fn finish_phase<B: I2cBusController, L: Logger>(
    core: &mut BusCore<B, L>,
    buffers: &mut SlaveBuffers<'_>,
    notifier: &mut Notifier<'_>,
) {
    // a byte still in the data register belongs to the phase that ends
    if buffers.direction == Some(Direction::Write) && core.bus.flag(Flag::RxNotEmpty) {
        take_byte(core, buffers, notifier);
    }
    match buffers.complete_phase() {
        Some((Direction::Write, _)) => notifier.post(Event::SlaveWriteDone),
        Some((Direction::Read, _)) => notifier.post(Event::SlaveReadDone),
        None => {}
    }
    core.state.role = Role::SlaveListening;
}

fn phase_error<B: I2cBusController, L: Logger>(
    core: &mut BusCore<B, L>,
    buffers: &mut SlaveBuffers<'_>,
    notifier: &mut Notifier<'_>,
    error: Error,
) {
    core.fail(error);
    buffers.drop_phase();
    notifier.post(Event::Error(error));
    core.state.role = Role::SlaveListening;
}
