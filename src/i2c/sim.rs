// Licensed under the Apache-2.0 license

//! Software two-wire bus for host testing.
//!
//! A [`Wire`] connects two controller ports ([`Side::A`], [`Side::B`]) and an
//! optional passive [`MemoryDevice`]. Each port is driven through a
//! [`SimBus`], the [`I2cBusController`] of that side. Slave ports stretch the
//! clock until their engine answers, so two engines can talk to each other as
//! long as both are serviced (see [`pump`]). Every bus condition lands in a
//! trace for assertions.
//!
//! [`SimDma`] moves data phases to and from the memory device; for any other
//! target it moves nothing and the engine falls back to interrupts.

use core::cell::{Cell, RefCell};

use crate::common::Logger;
use crate::i2c::common::{I2cSpeed, TimingConfig};
use crate::i2c::engine::I2cEngine;
use crate::i2c::traits::{
    DmaDirection, DmaRequest, DmaService, Flag, I2cBusController, InterruptMask, TickSource,
};
use crate::i2c::transfer::{Address, Direction, Instant};
use heapless::Vec;

pub const TRACE_CAPACITY: usize = 512;
pub const MEMORY_CAPACITY: usize = 256;
/// Interrupt services after which [`pump`] gives up.
pub const PUMP_LIMIT: usize = 10_000;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Side {
    A,
    B,
}

impl Side {
    const fn index(self) -> usize {
        match self {
            Side::A => 0,
            Side::B => 1,
        }
    }

    const fn other(self) -> Side {
        match self {
            Side::A => Side::B,
            Side::B => Side::A,
        }
    }
}

/// What an observer on SDA/SCL would see.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BusCondition {
    Start,
    Restart,
    Stop,
    Address {
        address: Address,
        direction: Direction,
        acked: bool,
    },
    Data {
        byte: u8,
        acked: bool,
    },
}

/// Fault raised on the next Start of a port.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Fault {
    ArbitrationLost,
    BusError,
}

/// Passive target: a write replaces its memory, a read serves it from the
/// top, `0xFF` past the end.
#[derive(Debug, Clone)]
pub struct MemoryDevice {
    address: Address,
    memory: Vec<u8, MEMORY_CAPACITY>,
    read_index: usize,
    written: usize,
    nack_after: Option<usize>,
}

impl MemoryDevice {
    #[must_use]
    pub fn new(address: Address) -> Self {
        Self {
            address,
            memory: Vec::new(),
            read_index: 0,
            written: 0,
            nack_after: None,
        }
    }

    #[must_use]
    pub fn with_memory(address: Address, contents: &[u8]) -> Self {
        let mut device = Self::new(address);
        device.load(contents);
        device
    }

    /// NACK every data byte after the first `count` of a write transaction.
    #[must_use]
    pub fn nack_after(mut self, count: usize) -> Self {
        self.nack_after = Some(count);
        self
    }

    pub fn load(&mut self, contents: &[u8]) {
        self.memory.clear();
        for byte in contents.iter().take(MEMORY_CAPACITY) {
            let _ = self.memory.push(*byte);
        }
    }

    #[must_use]
    pub fn memory(&self) -> &[u8] {
        &self.memory
    }

    fn begin(&mut self, direction: Direction) {
        self.read_index = 0;
        self.written = 0;
        if direction == Direction::Write {
            self.memory.clear();
        }
    }

    fn write(&mut self, byte: u8) -> bool {
        if self.nack_after.is_some_and(|count| self.written >= count) {
            return false;
        }
        self.written += 1;
        self.memory.push(byte).is_ok()
    }

    fn read(&mut self) -> u8 {
        let byte = self.memory.get(self.read_index).copied().unwrap_or(0xFF);
        self.read_index += 1;
        byte
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Target {
    Device,
    Port(Side),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Phase {
    /// No data phase (bus free, or address refused).
    Idle,
    Addressing,
    Write,
    Read,
}

#[derive(Debug, Default)]
struct Port {
    enabled: bool,
    own_address: Option<Address>,
    flags: u16,
    irq_mask: InterruptMask,
    rx: Option<u8>,
    /// Slave answer for the next incoming byte; `None` stretches the clock.
    armed: Option<bool>,
    dma: bool,
    fault: Option<Fault>,
}

impl Port {
    fn has(&self, flag: Flag) -> bool {
        self.flags & bit(flag) != 0
    }

    fn set(&mut self, flag: Flag) {
        self.flags |= bit(flag);
    }

    fn clear(&mut self, flag: Flag) {
        self.flags &= !bit(flag);
    }
}

const fn bit(flag: Flag) -> u16 {
    1 << (flag as u16)
}

pub struct Wire {
    port_a: Port,
    port_b: Port,
    device: Option<MemoryDevice>,
    trace: Vec<BusCondition, TRACE_CAPACITY>,
    owner: Option<Side>,
    target: Option<Target>,
    phase: Phase,
    address_pending: Option<(Address, Direction)>,
    /// Master byte waiting for a stretching slave.
    pending_tx: Option<u8>,
    /// Master asked for a byte, with this answer.
    pending_rx: Option<bool>,
    /// Slave byte waiting for the master to clock it.
    slave_tx: Option<u8>,
    stalled: bool,
    dma_done: [Option<u8>; 2],
}

impl Default for Wire {
    fn default() -> Self {
        Self::new()
    }
}

impl Wire {
    #[must_use]
    pub fn new() -> Self {
        Self {
            port_a: Port::default(),
            port_b: Port::default(),
            device: None,
            trace: Vec::new(),
            owner: None,
            target: None,
            phase: Phase::Idle,
            address_pending: None,
            pending_tx: None,
            pending_rx: None,
            slave_tx: None,
            stalled: false,
            dma_done: [None, None],
        }
    }

    #[must_use]
    pub fn with_device(device: MemoryDevice) -> Self {
        let mut wire = Self::new();
        wire.device = Some(device);
        wire
    }

    pub fn attach(&mut self, device: MemoryDevice) {
        self.device = Some(device);
    }

    #[must_use]
    pub fn device(&self) -> Option<&MemoryDevice> {
        self.device.as_ref()
    }

    pub fn device_mut(&mut self) -> Option<&mut MemoryDevice> {
        self.device.as_mut()
    }

    #[must_use]
    pub fn trace(&self) -> &[BusCondition] {
        &self.trace
    }

    /// Occurrences of `condition` in the trace.
    #[must_use]
    pub fn count(&self, condition: BusCondition) -> usize {
        self.trace.iter().filter(|c| **c == condition).count()
    }

    pub fn clear_trace(&mut self) {
        self.trace.clear();
    }

    /// A stalled bus ignores Start; nothing ever happens.
    pub fn set_stalled(&mut self, stalled: bool) {
        self.stalled = stalled;
    }

    pub fn inject(&mut self, side: Side, fault: Fault) {
        self.port_mut(side).fault = Some(fault);
    }

    #[must_use]
    pub fn flag(&self, side: Side, flag: Flag) -> bool {
        self.port(side).has(flag)
    }

    #[must_use]
    pub fn irq_mask(&self, side: Side) -> InterruptMask {
        self.port(side).irq_mask
    }

    #[must_use]
    pub fn dma_enabled(&self, side: Side) -> bool {
        self.port(side).dma
    }

    /// An enabled interrupt source of `side` has a pending flag.
    #[must_use]
    pub fn interrupt_pending(&self, side: Side) -> bool {
        let port = self.port(side);
        Flag::ALL
            .iter()
            .any(|flag| port.has(*flag) && port.irq_mask.intersects(flag.source()))
    }

    pub fn take_dma_completion(&mut self, side: Side) -> Option<u8> {
        self.dma_done.get_mut(side.index()).and_then(Option::take)
    }

    fn port(&self, side: Side) -> &Port {
        match side {
            Side::A => &self.port_a,
            Side::B => &self.port_b,
        }
    }

    fn port_mut(&mut self, side: Side) -> &mut Port {
        match side {
            Side::A => &mut self.port_a,
            Side::B => &mut self.port_b,
        }
    }

    fn record(&mut self, condition: BusCondition) {
        let _ = self.trace.push(condition);
    }

    fn start(&mut self, side: Side, restart: bool) {
        if self.stalled || !self.port(side).enabled {
            return;
        }
        if let Some(fault) = self.port_mut(side).fault.take() {
            self.port_mut(side).set(match fault {
                Fault::ArbitrationLost => Flag::ArbitrationLost,
                Fault::BusError => Flag::BusError,
            });
            return;
        }
        if restart {
            if self.owner != Some(side) {
                return;
            }
            self.end_target_phase();
            self.record(BusCondition::Restart);
        } else {
            match self.owner {
                Some(owner) if owner == side => return,
                Some(_) => {
                    self.port_mut(side).set(Flag::ArbitrationLost);
                    return;
                }
                None => {}
            }
            self.owner = Some(side);
            self.record(BusCondition::Start);
        }
        self.phase = Phase::Addressing;
        let port = self.port_mut(side);
        port.clear(Flag::TxEmpty);
        port.clear(Flag::RxNotEmpty);
        port.rx = None;
        port.set(Flag::StartSent);
    }

    fn address(&mut self, side: Side, address: Address, direction: Direction) {
        if self.owner != Some(side) || self.phase != Phase::Addressing {
            return;
        }
        if self.device.as_ref().is_some_and(|d| d.address == address) {
            if let Some(device) = self.device.as_mut() {
                device.begin(direction);
            }
            self.target = Some(Target::Device);
            self.complete_address(side, address, direction, true);
            return;
        }

        let other = side.other();
        let slave = self.port(other);
        if slave.enabled && slave.own_address == Some(address) {
            self.target = Some(Target::Port(other));
            self.address_pending = Some((address, direction));
            let slave = self.port_mut(other);
            slave.armed = None;
            slave.set(Flag::AddressMatched);
            if direction == Direction::Read {
                slave.set(Flag::SlaveRead);
            } else {
                slave.clear(Flag::SlaveRead);
            }
            return;
        }
        self.complete_address(side, address, direction, false);
    }

    fn complete_address(
        &mut self,
        master: Side,
        address: Address,
        direction: Direction,
        acked: bool,
    ) {
        self.record(BusCondition::Address {
            address,
            direction,
            acked,
        });
        if !acked {
            self.target = None;
            self.phase = Phase::Idle;
            self.port_mut(master).set(Flag::Nack);
            return;
        }
        self.phase = match direction {
            Direction::Write => Phase::Write,
            Direction::Read => Phase::Read,
        };
        let port = self.port_mut(master);
        port.set(Flag::AddressSent);
        if direction == Direction::Write {
            port.set(Flag::TxEmpty);
        }
    }

    /// `assert_ack` / `assert_nack` of `side`.
    fn answer(&mut self, side: Side, ack: bool) {
        if self.owner == Some(side) {
            if self.phase == Phase::Read && self.pending_rx.is_none() {
                self.pending_rx = Some(ack);
                self.settle();
            }
            return;
        }
        if self.target != Some(Target::Port(side)) {
            return;
        }
        if let Some((address, direction)) = self.address_pending.take() {
            if let Some(master) = self.owner {
                self.complete_address(master, address, direction, ack);
            }
            return;
        }
        self.port_mut(side).armed = Some(ack);
        self.settle();
    }

    fn write(&mut self, side: Side, byte: u8) {
        if self.owner == Some(side) {
            if self.phase == Phase::Write {
                self.port_mut(side).clear(Flag::TxEmpty);
                self.pending_tx = Some(byte);
                self.settle();
            }
            return;
        }
        if self.target == Some(Target::Port(side)) && self.phase == Phase::Read {
            self.port_mut(side).clear(Flag::TxEmpty);
            self.slave_tx = Some(byte);
            self.settle();
        }
    }

    fn read(&mut self, side: Side) -> u8 {
        let port = self.port_mut(side);
        port.clear(Flag::RxNotEmpty);
        port.rx.take().unwrap_or(0)
    }

    fn stop(&mut self, side: Side) {
        if self.owner != Some(side) {
            return;
        }
        self.end_target_phase();
        self.record(BusCondition::Stop);
        self.owner = None;
        self.phase = Phase::Idle;
        let port = self.port_mut(side);
        port.clear(Flag::TxEmpty);
        port.set(Flag::StopDetected);
    }

    /// Stop or ReStart: the addressed target's phase ends.
    fn end_target_phase(&mut self) {
        let unanswered = self.address_pending.is_some();
        match self.target.take() {
            Some(Target::Port(slave)) => {
                let port = self.port_mut(slave);
                if unanswered {
                    port.clear(Flag::AddressMatched);
                    port.clear(Flag::SlaveRead);
                }
                port.armed = None;
                port.clear(Flag::TxEmpty);
                port.set(Flag::StopDetected);
            }
            Some(Target::Device) | None => {}
        }
        self.address_pending = None;
        self.pending_tx = None;
        self.pending_rx = None;
        self.slave_tx = None;
    }

    /// Moves whatever can move now that one side acted.
    fn settle(&mut self) {
        let Some(master) = self.owner else {
            return;
        };
        match (self.phase, self.target) {
            (Phase::Write, Some(Target::Device)) => {
                let Some(byte) = self.pending_tx.take() else {
                    return;
                };
                let acked = self.device.as_mut().is_some_and(|d| d.write(byte));
                self.deliver_to_slave(master, byte, acked);
            }
            (Phase::Write, Some(Target::Port(slave))) => {
                if self.pending_tx.is_none() {
                    return;
                }
                let Some(acked) = self.port_mut(slave).armed.take() else {
                    return;
                };
                let byte = self.pending_tx.take().unwrap_or_default();
                let port = self.port_mut(slave);
                port.rx = Some(byte);
                port.set(Flag::RxNotEmpty);
                self.deliver_to_slave(master, byte, acked);
            }
            (Phase::Read, Some(Target::Device)) => {
                let Some(acked) = self.pending_rx.take() else {
                    return;
                };
                let byte = self.device.as_mut().map_or(0xFF, MemoryDevice::read);
                self.deliver_to_master(master, byte, acked);
            }
            (Phase::Read, Some(Target::Port(slave))) => {
                let Some(acked) = self.pending_rx else {
                    return;
                };
                match self.slave_tx.take() {
                    Some(byte) => {
                        self.pending_rx = None;
                        if !acked {
                            self.port_mut(slave).set(Flag::Nack);
                        }
                        self.deliver_to_master(master, byte, acked);
                    }
                    None => self.port_mut(slave).set(Flag::TxEmpty),
                }
            }
            _ => {}
        }
    }

    fn deliver_to_slave(&mut self, master: Side, byte: u8, acked: bool) {
        self.record(BusCondition::Data { byte, acked });
        let port = self.port_mut(master);
        if acked {
            port.set(Flag::TxEmpty);
        } else {
            port.set(Flag::Nack);
        }
    }

    fn deliver_to_master(&mut self, master: Side, byte: u8, acked: bool) {
        self.record(BusCondition::Data { byte, acked });
        let port = self.port_mut(master);
        port.rx = Some(byte);
        port.set(Flag::RxNotEmpty);
    }

    fn dma_transmit(&mut self, side: Side, bytes: &[u8]) -> usize {
        if self.owner != Some(side)
            || self.phase != Phase::Write
            || self.target != Some(Target::Device)
        {
            return 0;
        }
        self.port_mut(side).clear(Flag::TxEmpty);
        for (index, byte) in bytes.iter().enumerate() {
            let acked = self.device.as_mut().is_some_and(|d| d.write(*byte));
            self.record(BusCondition::Data { byte: *byte, acked });
            if !acked {
                self.port_mut(side).set(Flag::Nack);
                return index + 1;
            }
        }
        self.port_mut(side).set(Flag::TxEmpty);
        bytes.len()
    }

    fn dma_receive(&mut self, side: Side, out: &mut [u8]) -> usize {
        if self.owner != Some(side)
            || self.phase != Phase::Read
            || self.target != Some(Target::Device)
        {
            return 0;
        }
        for slot in out.iter_mut() {
            let byte = self.device.as_mut().map_or(0xFF, MemoryDevice::read);
            self.record(BusCondition::Data { byte, acked: true });
            *slot = byte;
        }
        out.len()
    }
}

/// Controller facade of one side of a [`Wire`].
pub struct SimBus<'w> {
    wire: &'w RefCell<Wire>,
    side: Side,
}

impl<'w> SimBus<'w> {
    #[must_use]
    pub fn new(wire: &'w RefCell<Wire>, side: Side) -> Self {
        Self { wire, side }
    }
}

impl I2cBusController for SimBus<'_> {
    fn enable(&mut self) {
        self.wire.borrow_mut().port_mut(self.side).enabled = true;
    }

    fn disable(&mut self) {
        self.wire.borrow_mut().port_mut(self.side).enabled = false;
    }

    fn configure_timing(&mut self, speed: I2cSpeed, _timing: &TimingConfig) -> u32 {
        speed.frequency().raw()
    }

    fn set_own_address(&mut self, address: Option<Address>) {
        self.wire.borrow_mut().port_mut(self.side).own_address = address;
    }

    fn flag(&self, flag: Flag) -> bool {
        self.wire.borrow().port(self.side).has(flag)
    }

    fn clear_flag(&mut self, flag: Flag) {
        self.wire.borrow_mut().port_mut(self.side).clear(flag);
    }

    fn enable_interrupt(&mut self, mask: InterruptMask) {
        let mut wire = self.wire.borrow_mut();
        let port = wire.port_mut(self.side);
        port.irq_mask = port.irq_mask | mask;
    }

    fn disable_interrupt(&mut self, mask: InterruptMask) {
        let mut wire = self.wire.borrow_mut();
        let port = wire.port_mut(self.side);
        port.irq_mask = port.irq_mask.difference(mask);
    }

    fn write_fifo(&mut self, byte: u8) {
        self.wire.borrow_mut().write(self.side, byte);
    }

    fn read_fifo(&mut self) -> u8 {
        self.wire.borrow_mut().read(self.side)
    }

    fn fifo_level(&self) -> usize {
        usize::from(self.wire.borrow().port(self.side).rx.is_some())
    }

    fn assert_start(&mut self) {
        self.wire.borrow_mut().start(self.side, false);
    }

    fn assert_restart(&mut self) {
        self.wire.borrow_mut().start(self.side, true);
    }

    fn assert_stop(&mut self) {
        self.wire.borrow_mut().stop(self.side);
    }

    fn assert_ack(&mut self) {
        self.wire.borrow_mut().answer(self.side, true);
    }

    fn assert_nack(&mut self) {
        self.wire.borrow_mut().answer(self.side, false);
    }

    fn send_address(&mut self, address: Address, direction: Direction) {
        self.wire.borrow_mut().address(self.side, address, direction);
    }

    fn set_dma(&mut self, enabled: bool) {
        self.wire.borrow_mut().port_mut(self.side).dma = enabled;
    }

    fn is_bus_busy(&self) -> bool {
        self.wire
            .borrow()
            .owner
            .is_some_and(|owner| owner != self.side)
    }
}

/// DMA channel of one side. Transfers run to completion inside `start` and
/// are reported through [`Wire::take_dma_completion`] and the callback.
pub struct SimDma<'w> {
    wire: &'w RefCell<Wire>,
    side: Side,
    channel: u8,
    acquired: bool,
    request: Option<DmaRequest>,
    remaining: usize,
    callback: Option<fn(u8)>,
    started: usize,
}

impl<'w> SimDma<'w> {
    #[must_use]
    pub fn new(wire: &'w RefCell<Wire>, side: Side, channel: u8) -> Self {
        Self {
            wire,
            side,
            channel,
            acquired: false,
            request: None,
            remaining: 0,
            callback: None,
            started: 0,
        }
    }

    /// Transfers run so far.
    #[must_use]
    pub fn started(&self) -> usize {
        self.started
    }
}

impl DmaService for SimDma<'_> {
    type Channel = u8;

    fn acquire_channel(&mut self) -> Option<u8> {
        if self.acquired {
            return None;
        }
        self.acquired = true;
        Some(self.channel)
    }

    fn configure(&mut self, channel: u8, request: &DmaRequest) {
        if channel == self.channel {
            self.request = Some(*request);
            self.remaining = request.len;
        }
    }

    fn start(&mut self, channel: u8) {
        if channel != self.channel {
            return;
        }
        let Some(request) = self.request.take() else {
            return;
        };
        self.started += 1;
        let moved = match request.direction {
            DmaDirection::MemoryToPeripheral => {
                // SAFETY: the engine programs the address and length of a
                // buffer it borrows for the whole transfer and does not touch
                // until completion.
                let bytes = unsafe {
                    core::slice::from_raw_parts(request.memory as *const u8, request.len)
                };
                self.wire.borrow_mut().dma_transmit(self.side, bytes)
            }
            DmaDirection::PeripheralToMemory => {
                // SAFETY: as above; the buffer is exclusively borrowed by the
                // in-flight transfer.
                let out = unsafe {
                    core::slice::from_raw_parts_mut(request.memory as *mut u8, request.len)
                };
                self.wire.borrow_mut().dma_receive(self.side, out)
            }
        };
        self.remaining = request.len.saturating_sub(moved);
        if let Some(slot) = self.wire.borrow_mut().dma_done.get_mut(self.side.index()) {
            *slot = Some(channel);
        }
        if let Some(callback) = self.callback {
            callback(channel);
        }
    }

    fn stop(&mut self, _channel: u8) {}

    fn remaining(&self, _channel: u8) -> usize {
        self.remaining
    }

    fn set_completion_callback(&mut self, channel: u8, callback: fn(u8)) {
        if channel == self.channel {
            self.callback = Some(callback);
        }
    }
}

/// Tick source advancing by `step` microseconds on every read.
#[derive(Debug)]
pub struct SimClock {
    now: Cell<u64>,
    step: u64,
}

impl SimClock {
    #[must_use]
    pub const fn new(step: u64) -> Self {
        Self {
            now: Cell::new(0),
            step,
        }
    }

    pub fn advance(&self, ticks: u64) {
        self.now.set(self.now.get() + ticks);
    }
}

impl TickSource for SimClock {
    fn now(&self) -> Instant {
        let now = self.now.get();
        self.now.set(now + self.step);
        Instant::from_ticks(now)
    }
}

/// Engine wired to one side of a [`Wire`].
pub type SimEngine<'w, 'b, T, L> = I2cEngine<'b, SimBus<'w>, T, SimDma<'w>, L>;

/// Services one pending DMA completion or interrupt of `side`.
pub fn service<'w, T: TickSource, L: Logger>(
    wire: &'w RefCell<Wire>,
    side: Side,
    engine: &mut SimEngine<'w, '_, T, L>,
) -> bool {
    let completion = wire.borrow_mut().take_dma_completion(side);
    if let Some(channel) = completion {
        engine.on_dma_complete(channel);
        return true;
    }
    let pending = wire.borrow().interrupt_pending(side);
    if pending {
        engine.on_interrupt();
    }
    pending
}

/// Services both engines until neither has work left. Returns `false` if the
/// bus did not settle within [`PUMP_LIMIT`] services.
pub fn pump<'w, T1, T2, L1, L2>(
    wire: &'w RefCell<Wire>,
    a: &mut SimEngine<'w, '_, T1, L1>,
    b: &mut SimEngine<'w, '_, T2, L2>,
) -> bool
where
    T1: TickSource,
    T2: TickSource,
    L1: Logger,
    L2: Logger,
{
    for _ in 0..PUMP_LIMIT {
        let busy_a = service(wire, Side::A, a);
        let busy_b = service(wire, Side::B, b);
        if !busy_a && !busy_b {
            return true;
        }
    }
    false
}

/// [`pump`] for a single engine on `side`.
pub fn pump_one<'w, T: TickSource, L: Logger>(
    wire: &'w RefCell<Wire>,
    side: Side,
    engine: &mut SimEngine<'w, '_, T, L>,
) -> bool {
    for _ in 0..PUMP_LIMIT {
        if !service(wire, side, engine) {
            return true;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEV: Address = Address::SevenBit(0x50);

    #[test]
    fn test_device_write_and_read_back() {
        let wire = RefCell::new(Wire::with_device(MemoryDevice::new(DEV)));
        let mut bus = SimBus::new(&wire, Side::A);
        bus.enable();

        bus.assert_start();
        assert!(bus.flag(Flag::StartSent));
        bus.send_address(DEV, Direction::Write);
        assert!(bus.flag(Flag::AddressSent));
        assert!(bus.flag(Flag::TxEmpty));
        bus.write_fifo(0x5A);
        assert!(bus.flag(Flag::TxEmpty));
        bus.assert_stop();
        assert!(bus.flag(Flag::StopDetected));

        bus.assert_start();
        bus.send_address(DEV, Direction::Read);
        bus.assert_nack();
        assert!(bus.flag(Flag::RxNotEmpty));
        assert_eq!(bus.read_fifo(), 0x5A);
        bus.assert_stop();

        let wire = wire.borrow();
        assert_eq!(wire.count(BusCondition::Stop), 2);
        assert_eq!(wire.count(BusCondition::Data { byte: 0x5A, acked: false }), 1);
        assert_eq!(wire.device().map(MemoryDevice::memory), Some(&[0x5A][..]));
    }

    #[test]
    fn test_absent_target_nacks_address() {
        let wire = RefCell::new(Wire::new());
        let mut bus = SimBus::new(&wire, Side::A);
        bus.enable();
        bus.assert_start();
        bus.send_address(Address::SevenBit(0x11), Direction::Write);
        assert!(bus.flag(Flag::Nack));
        assert!(!bus.flag(Flag::AddressSent));
    }

    #[test]
    fn test_slave_port_stretches_until_armed() {
        let wire = RefCell::new(Wire::new());
        let mut master = SimBus::new(&wire, Side::A);
        let mut slave = SimBus::new(&wire, Side::B);
        master.enable();
        slave.enable();
        slave.set_own_address(Some(Address::SevenBit(0x42)));

        master.assert_start();
        master.send_address(Address::SevenBit(0x42), Direction::Write);
        assert!(slave.flag(Flag::AddressMatched));
        assert!(!master.flag(Flag::AddressSent));

        slave.assert_ack();
        assert!(master.flag(Flag::AddressSent));

        master.write_fifo(0x33);
        assert!(!master.flag(Flag::TxEmpty));
        slave.assert_ack();
        assert!(master.flag(Flag::TxEmpty));
        assert_eq!(slave.read_fifo(), 0x33);

        master.assert_stop();
        assert!(slave.flag(Flag::StopDetected));
        assert!(!wire.borrow().interrupt_pending(Side::B));
    }

    #[test]
    fn test_injected_fault_replaces_start() {
        let wire = RefCell::new(Wire::new());
        let mut bus = SimBus::new(&wire, Side::A);
        bus.enable();
        bus.enable_interrupt(InterruptMask::ERROR);
        wire.borrow_mut().inject(Side::A, Fault::ArbitrationLost);
        bus.assert_start();
        assert!(bus.flag(Flag::ArbitrationLost));
        assert!(!bus.flag(Flag::StartSent));
        assert!(wire.borrow().interrupt_pending(Side::A));
        assert!(wire.borrow().trace().is_empty());
    }

    #[test]
    fn test_clock_advances_per_read() {
        let clock = SimClock::new(2);
        assert_eq!(clock.now().ticks(), 0);
        assert_eq!(clock.now().ticks(), 2);
        clock.advance(10);
        assert_eq!(clock.now().ticks(), 14);
    }
}
