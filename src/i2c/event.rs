// Licensed under the Apache-2.0 license

//! Completion and error reporting.
//!
//! Hardware flags are folded into one [`HardwareEvent`] at a time by
//! [`capture`]; the state machines answer with application-level [`Event`]s
//! delivered through [`Notifier`].

use crate::i2c::error::Error;
use crate::i2c::traits::{Flag, I2cBusController, InterruptMask};
use crate::i2c::transfer::Direction;
use heapless::Deque;

/// Depth of the event queue drained by `poll_event`.
pub const EVENT_QUEUE_DEPTH: usize = 8;

/// Application-level notification.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Event {
    MasterWriteDone,
    MasterReadDone,
    /// A remote master finished writing to us.
    SlaveWriteDone,
    /// A remote master finished reading from us.
    SlaveReadDone,
    /// Own address matched; direction as seen from the remote master.
    AddressMatch(Direction),
    /// Slave read buffer exhausted; sentinel bytes are being sent.
    BufferEmpty,
    /// Slave write buffer full; further bytes are NACKed.
    BufferFull,
    Error(Error),
}

/// Input of the state machines, one per interrupt or DMA completion.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum HardwareEvent {
    StartSent,
    AddressAcked,
    Nack,
    TxReady,
    RxReady,
    StopDetected,
    AddressMatched { direction: Direction },
    ArbitrationLost,
    BusError,
    DmaComplete,
}

/// Folds the pending flags of the enabled `sources` into the most urgent
/// event.
///
/// Condition flags are cleared here. `TxEmpty` and `RxNotEmpty` clear through
/// the data register; `AddressMatched` is cleared by the slave machine once it
/// has answered the address.
pub fn capture<B: I2cBusController + ?Sized>(
    bus: &mut B,
    sources: InterruptMask,
) -> Option<HardwareEvent> {
    let errors = sources.contains(InterruptMask::ERROR);
    let events = sources.contains(InterruptMask::EVENT);
    let buffers = sources.contains(InterruptMask::BUFFER);

    if errors && bus.flag(Flag::BusError) {
        bus.clear_flag(Flag::BusError);
        return Some(HardwareEvent::BusError);
    }
    if errors && bus.flag(Flag::ArbitrationLost) {
        bus.clear_flag(Flag::ArbitrationLost);
        return Some(HardwareEvent::ArbitrationLost);
    }
    if events && bus.flag(Flag::StopDetected) {
        bus.clear_flag(Flag::StopDetected);
        return Some(HardwareEvent::StopDetected);
    }
    if events && bus.flag(Flag::AddressMatched) {
        let direction = if bus.flag(Flag::SlaveRead) {
            Direction::Read
        } else {
            Direction::Write
        };
        return Some(HardwareEvent::AddressMatched { direction });
    }
    if errors && bus.flag(Flag::Nack) {
        bus.clear_flag(Flag::Nack);
        return Some(HardwareEvent::Nack);
    }
    if events && bus.flag(Flag::StartSent) {
        bus.clear_flag(Flag::StartSent);
        return Some(HardwareEvent::StartSent);
    }
    if events && bus.flag(Flag::AddressSent) {
        bus.clear_flag(Flag::AddressSent);
        return Some(HardwareEvent::AddressAcked);
    }
    if buffers && bus.flag(Flag::RxNotEmpty) {
        return Some(HardwareEvent::RxReady);
    }
    if buffers && bus.flag(Flag::TxEmpty) {
        return Some(HardwareEvent::TxReady);
    }
    None
}

/// Answer to an address match.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AddressResponse {
    #[default]
    Ack,
    Nack,
}

/// Application callbacks, invoked from interrupt context.
pub trait I2cEventHandler {
    fn on_event(&mut self, event: Event);

    /// Decide whether to acknowledge our own address. Accepts by default.
    fn on_address_match(&mut self, _direction: Direction) -> AddressResponse {
        AddressResponse::Ack
    }
}

/// Delivers events to the registered handler and to the bounded queue.
pub struct Notifier<'b> {
    handler: Option<&'b mut (dyn I2cEventHandler + Send)>,
    queue: Deque<Event, EVENT_QUEUE_DEPTH>,
}

impl Default for Notifier<'_> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'b> Notifier<'b> {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            handler: None,
            queue: Deque::new(),
        }
    }

    pub fn set_handler(&mut self, handler: &'b mut (dyn I2cEventHandler + Send)) {
        self.handler = Some(handler);
    }

    pub fn clear_handler(&mut self) -> Option<&'b mut (dyn I2cEventHandler + Send)> {
        self.handler.take()
    }

    /// Queue is full: the oldest event is dropped.
    pub fn post(&mut self, event: Event) {
        if let Some(handler) = self.handler.as_mut() {
            handler.on_event(event);
        }
        if self.queue.is_full() {
            let _ = self.queue.pop_front();
        }
        let _ = self.queue.push_back(event);
    }

    pub fn address_match(&mut self, direction: Direction) -> AddressResponse {
        self.handler
            .as_mut()
            .map_or(AddressResponse::Ack, |handler| handler.on_address_match(direction))
    }

    pub fn poll(&mut self) -> Option<Event> {
        self.queue.pop_front()
    }

    #[must_use]
    pub fn pending(&self) -> usize {
        self.queue.len()
    }
}
