// Licensed under the Apache-2.0 license

//! Master transaction state machine.
//!
//! ```text
//! Idle -> Addressing -> (Tx | Rx) -> StopPending -> Idle
//!                           |
//!                           +-> RestartPending -> (continue | Addressing)
//! ```
//!
//! The functions here are called with the in-flight request for every
//! hardware event while a master role is active. They never block.

use crate::common::Logger;
use crate::i2c::bus_core::BusCore;
use crate::i2c::error::Error;
use crate::i2c::event::HardwareEvent;
use crate::i2c::state::{HeldFrame, Role};
use crate::i2c::traits::{Flag, I2cBusController};
use crate::i2c::transfer::{next_ack_policy, AckPolicy, Direction, TransferRequest};

/// Outcome of feeding one event to the master machine.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Progress {
    Pending,
    /// Address phase done; the data phase is to be programmed on DMA.
    DmaHandoff,
    /// Chained frame done, bus still held.
    FrameHeld,
    /// Stop seen; transaction done.
    Complete,
    Failed(Error),
}

/// Starts (or continues) a frame from a quiescent or held role.
pub fn begin<B: I2cBusController, L: Logger>(
    core: &mut BusCore<B, L>,
    xfer: &mut TransferRequest<'_>,
) -> Progress {
    core.state.errors.clear();

    if core.state.role == Role::MasterRestartPending {
        let held = core.state.held.take();
        let continues = held.is_some_and(|frame| {
            frame.address == xfer.address && frame.direction == xfer.direction() && !frame.nacked
        });
        if continues {
            core.logger.debug("continuing held frame");
            return enter_data_phase(core, xfer);
        }
        core.bus.clear_flag(Flag::Nack);
        core.bus.assert_restart();
        core.state.role = Role::MasterAddressing;
        return Progress::Pending;
    }

    core.bus.clear_flag(Flag::StopDetected);
    core.bus.clear_flag(Flag::Nack);
    core.state.previous_role = core.state.role;
    core.bus.assert_start();
    core.state.role = Role::MasterAddressing;
    Progress::Pending
}

/// Feeds one hardware event to the machine.
pub fn step<B: I2cBusController, L: Logger>(
    core: &mut BusCore<B, L>,
    xfer: &mut TransferRequest<'_>,
    event: HardwareEvent,
) -> Progress {
    match (core.state.role, event) {
        (_, HardwareEvent::BusError) => {
            core.bus.assert_stop();
            fail(core, Error::BusError)
        }
        // the winner owns the bus, no Stop
        (_, HardwareEvent::ArbitrationLost) => fail(core, Error::ArbitrationLost),
        (_, HardwareEvent::AddressMatched { .. }) => {
            core.bus.clear_flag(Flag::AddressMatched);
            Progress::Pending
        }
        (Role::MasterAddressing, HardwareEvent::StartSent) => {
            core.bus.send_address(xfer.address, xfer.direction());
            Progress::Pending
        }
        (Role::MasterAddressing, HardwareEvent::Nack) => {
            core.bus.assert_stop();
            fail(core, Error::AddressNak)
        }
        (Role::MasterAddressing, HardwareEvent::AddressAcked) => enter_data_phase(core, xfer),
        (Role::MasterTx, HardwareEvent::TxReady) => match xfer.next_tx_byte() {
            Some(byte) => {
                core.bus.write_fifo(byte);
                Progress::Pending
            }
            None => end_frame(core, xfer, false),
        },
        (Role::MasterTx, HardwareEvent::Nack) => written_nack(core, xfer),
        (Role::MasterRx, HardwareEvent::RxReady) => {
            let byte = core.bus.read_fifo();
            if !xfer.push_rx_byte(byte) {
                core.logger.debug("byte past end of read buffer dropped");
            }
            command_next(core, xfer)
        }
        (Role::MasterStopPending, HardwareEvent::StopDetected) => {
            core.resume();
            Progress::Complete
        }
        _ => Progress::Pending,
    }
}

/// Resumes the machine after a DMA data phase moved `moved` bytes.
pub fn dma_finished<B: I2cBusController, L: Logger>(
    core: &mut BusCore<B, L>,
    xfer: &mut TransferRequest<'_>,
    moved: usize,
) -> Progress {
    xfer.use_dma = false;
    xfer.credit(moved);
    match xfer.direction() {
        Direction::Write => {
            if core.bus.flag(Flag::Nack) {
                core.bus.clear_flag(Flag::Nack);
                written_nack(core, xfer)
            } else if xfer.remaining() == 0 {
                end_frame(core, xfer, false)
            } else {
                // rest goes byte by byte
                Progress::Pending
            }
        }
        Direction::Read => command_next(core, xfer),
    }
}

/// Terminates whatever the master is doing: NACK, Stop, back to the
/// resting role.
pub fn abort<B: I2cBusController, L: Logger>(core: &mut BusCore<B, L>) {
    core.bus.assert_nack();
    core.bus.assert_stop();
    core.resume();
}

fn enter_data_phase<B: I2cBusController, L: Logger>(
    core: &mut BusCore<B, L>,
    xfer: &mut TransferRequest<'_>,
) -> Progress {
    match xfer.direction() {
        Direction::Write => {
            core.state.role = Role::MasterTx;
            if xfer.use_dma {
                Progress::DmaHandoff
            } else {
                Progress::Pending
            }
        }
        Direction::Read => {
            core.state.role = Role::MasterRx;
            if xfer.use_dma {
                Progress::DmaHandoff
            } else {
                command_next(core, xfer)
            }
        }
    }
}

/// Clocks in the next byte with the answer the policy asks for, or ends the
/// frame when nothing remains.
fn command_next<B: I2cBusController, L: Logger>(
    core: &mut BusCore<B, L>,
    xfer: &mut TransferRequest<'_>,
) -> Progress {
    match next_ack_policy(xfer.remaining(), xfer.chaining, xfer.read_continues) {
        AckPolicy::Ack => {
            core.bus.assert_ack();
            Progress::Pending
        }
        AckPolicy::Nack => {
            core.bus.assert_nack();
            Progress::Pending
        }
        AckPolicy::Stop | AckPolicy::Hold => {
            // a NACKed read cannot be resumed without re-addressing
            let nacked = xfer.length() > 0 && xfer.nacks_final_byte();
            end_frame(core, xfer, nacked)
        }
    }
}

/// NACK while writing: fine on the final byte, `DataNak` before it.
fn written_nack<B: I2cBusController, L: Logger>(
    core: &mut BusCore<B, L>,
    xfer: &mut TransferRequest<'_>,
) -> Progress {
    if xfer.remaining() == 0 {
        core.logger.debug("final byte not acknowledged");
        return end_frame(core, xfer, true);
    }
    xfer.uncount_last();
    core.bus.assert_stop();
    fail(core, Error::DataNak)
}

fn end_frame<B: I2cBusController, L: Logger>(
    core: &mut BusCore<B, L>,
    xfer: &TransferRequest<'_>,
    nacked: bool,
) -> Progress {
    match next_ack_policy(0, xfer.chaining, xfer.read_continues) {
        AckPolicy::Hold => {
            core.state.held = Some(HeldFrame {
                address: xfer.address,
                direction: xfer.direction(),
                nacked,
            });
            core.state.role = Role::MasterRestartPending;
            Progress::FrameHeld
        }
        _ => {
            core.bus.assert_stop();
            core.state.role = Role::MasterStopPending;
            Progress::Pending
        }
    }
}

fn fail<B: I2cBusController, L: Logger>(core: &mut BusCore<B, L>, error: Error) -> Progress {
    core.fail(error);
    core.resume();
    Progress::Failed(error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::NoOpLogger;
    use crate::i2c::common::{I2cConfig, I2cSpeed, TimingConfig};
    use crate::i2c::error::ErrorFlags;
    use crate::i2c::traits::InterruptMask;
    use crate::i2c::transfer::{Address, Chaining, Duration, XferBuffer};
    use std::collections::HashSet;
    use std::vec::Vec;

    /// Records every bus primitive issued by the machine.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Op {
        Start,
        Restart,
        Stop,
        Ack,
        Nack,
        Address(Address, Direction),
        Write(u8),
        Read,
    }

    #[derive(Default)]
    struct ScriptedBus {
        ops: Vec<Op>,
        flags: HashSet<u8>,
        rx: u8,
    }

    impl I2cBusController for ScriptedBus {
        fn enable(&mut self) {}
        fn disable(&mut self) {}
        fn configure_timing(&mut self, speed: I2cSpeed, _timing: &TimingConfig) -> u32 {
            speed as u32
        }
        fn set_own_address(&mut self, _address: Option<Address>) {}
        fn flag(&self, flag: Flag) -> bool {
            self.flags.contains(&(flag as u8))
        }
        fn clear_flag(&mut self, flag: Flag) {
            self.flags.remove(&(flag as u8));
        }
        fn enable_interrupt(&mut self, _mask: InterruptMask) {}
        fn disable_interrupt(&mut self, _mask: InterruptMask) {}
        fn write_fifo(&mut self, byte: u8) {
            self.ops.push(Op::Write(byte));
        }
        fn read_fifo(&mut self) -> u8 {
            self.ops.push(Op::Read);
            self.rx = self.rx.wrapping_add(1);
            self.rx
        }
        fn fifo_level(&self) -> usize {
            0
        }
        fn assert_start(&mut self) {
            self.ops.push(Op::Start);
        }
        fn assert_restart(&mut self) {
            self.ops.push(Op::Restart);
        }
        fn assert_stop(&mut self) {
            self.ops.push(Op::Stop);
        }
        fn assert_ack(&mut self) {
            self.ops.push(Op::Ack);
        }
        fn assert_nack(&mut self) {
            self.ops.push(Op::Nack);
        }
        fn send_address(&mut self, address: Address, direction: Direction) {
            self.ops.push(Op::Address(address, direction));
        }
        fn set_dma(&mut self, _enabled: bool) {}
        fn is_bus_busy(&self) -> bool {
            false
        }
    }

    fn core() -> BusCore<ScriptedBus, NoOpLogger> {
        BusCore::new(ScriptedBus::default(), I2cConfig::default(), NoOpLogger)
    }

    fn request<'a>(buffer: XferBuffer<'a>, chaining: Chaining) -> TransferRequest<'a> {
        TransferRequest::new(
            Address::SevenBit(0x50),
            buffer,
            chaining,
            Duration::millis(5),
        )
    }

    /// Drives a read of `len` bytes to completion and returns the bus ops.
    fn run_read(len: usize, chaining: Chaining, read_continues: bool) -> (Vec<Op>, Progress) {
        let mut core = core();
        let mut buf = std::vec![0u8; len];
        let mut xfer = request(XferBuffer::Read(&mut buf), chaining);
        xfer.read_continues = read_continues;

        assert_eq!(begin(&mut core, &mut xfer), Progress::Pending);
        step(&mut core, &mut xfer, HardwareEvent::StartSent);
        let mut progress = step(&mut core, &mut xfer, HardwareEvent::AddressAcked);
        while progress == Progress::Pending && core.state.role == Role::MasterRx {
            progress = step(&mut core, &mut xfer, HardwareEvent::RxReady);
        }
        if core.state.role == Role::MasterStopPending {
            progress = step(&mut core, &mut xfer, HardwareEvent::StopDetected);
        }
        assert_eq!(xfer.bytes_done(), len);
        (core.bus.ops, progress)
    }

    #[test]
    fn test_standalone_read_nacks_only_final_byte() {
        for len in 0..=8usize {
            let (ops, progress) = run_read(len, Chaining::Standalone, false);
            assert_eq!(progress, Progress::Complete);

            let nacks: Vec<usize> = ops
                .iter()
                .enumerate()
                .filter(|(_, op)| **op == Op::Nack)
                .map(|(i, _)| i)
                .collect();
            let commands = ops.iter().filter(|op| matches!(op, Op::Ack | Op::Nack)).count();
            assert_eq!(commands, len);
            if len > 0 {
                assert_eq!(nacks.len(), 1, "len {len}");
                // NACK is the last command issued
                let last_command = ops.iter().rposition(|op| matches!(op, Op::Ack | Op::Nack));
                assert_eq!(last_command, nacks.first().copied());
            }
            assert_eq!(ops.iter().filter(|op| **op == Op::Stop).count(), 1);
            assert_eq!(ops.last(), Some(&Op::Stop));
        }
    }

    #[test]
    fn test_first_read_holds_bus() {
        let (ops, progress) = run_read(3, Chaining::First, true);
        assert_eq!(progress, Progress::FrameHeld);
        assert!(!ops.contains(&Op::Stop));
        assert!(!ops.contains(&Op::Nack));
    }

    #[test]
    fn test_held_read_nacks_final_byte_unless_continued() {
        for chaining in [Chaining::First, Chaining::Middle] {
            let (ops, progress) = run_read(3, chaining, false);
            assert_eq!(progress, Progress::FrameHeld);
            assert!(!ops.contains(&Op::Stop));
            let commands: Vec<Op> = ops
                .iter()
                .copied()
                .filter(|op| matches!(op, Op::Ack | Op::Nack))
                .collect();
            assert_eq!(commands, std::vec![Op::Ack, Op::Ack, Op::Nack]);
        }
    }

    /// First read held with its final byte NACKed, then the next frame.
    fn read_then(next: &mut TransferRequest<'_>) -> Vec<Op> {
        let mut core = core();
        let mut data = [0u8; 2];
        let mut xfer = request(XferBuffer::Read(&mut data), Chaining::First);
        begin(&mut core, &mut xfer);
        step(&mut core, &mut xfer, HardwareEvent::StartSent);
        step(&mut core, &mut xfer, HardwareEvent::AddressAcked);
        step(&mut core, &mut xfer, HardwareEvent::RxReady);
        assert_eq!(
            step(&mut core, &mut xfer, HardwareEvent::RxReady),
            Progress::FrameHeld
        );
        assert!(core.state.held.is_some_and(|frame| frame.nacked));

        begin(&mut core, next);
        assert_eq!(core.state.role, Role::MasterAddressing);
        step(&mut core, next, HardwareEvent::StartSent);
        step(&mut core, next, HardwareEvent::AddressAcked);
        while core.state.role != Role::MasterStopPending {
            let event = match next.direction() {
                Direction::Write => HardwareEvent::TxReady,
                Direction::Read => HardwareEvent::RxReady,
            };
            step(&mut core, next, event);
        }
        step(&mut core, next, HardwareEvent::StopDetected);
        core.bus.ops
    }

    fn command_before_restart(ops: &[Op]) -> Option<Op> {
        let restart = ops.iter().position(|op| *op == Op::Restart)?;
        ops.get(..restart)?
            .iter()
            .rev()
            .copied()
            .find(|op| matches!(op, Op::Ack | Op::Nack))
    }

    #[test]
    fn test_read_then_write_nacks_before_restart() {
        let bytes = [9u8];
        let mut next = request(XferBuffer::Write(&bytes), Chaining::Last);
        let ops = read_then(&mut next);

        assert_eq!(command_before_restart(&ops), Some(Op::Nack));
        assert_eq!(ops.iter().filter(|op| **op == Op::Restart).count(), 1);
        assert_eq!(ops.last(), Some(&Op::Stop));
    }

    #[test]
    fn test_read_then_read_elsewhere_nacks_before_restart() {
        let mut data = [0u8; 1];
        let mut next = TransferRequest::new(
            Address::SevenBit(0x51),
            XferBuffer::Read(&mut data),
            Chaining::Last,
            Duration::millis(5),
        );
        let ops = read_then(&mut next);

        assert_eq!(command_before_restart(&ops), Some(Op::Nack));
        assert!(ops.contains(&Op::Address(Address::SevenBit(0x51), Direction::Read)));
        assert_eq!(ops.last(), Some(&Op::Stop));
    }

    #[test]
    fn test_continued_read_skips_readdressing() {
        let mut core = core();
        let mut first = [0u8; 2];
        let mut xfer = request(XferBuffer::Read(&mut first), Chaining::First);
        xfer.read_continues = true;
        begin(&mut core, &mut xfer);
        step(&mut core, &mut xfer, HardwareEvent::StartSent);
        step(&mut core, &mut xfer, HardwareEvent::AddressAcked);
        step(&mut core, &mut xfer, HardwareEvent::RxReady);
        step(&mut core, &mut xfer, HardwareEvent::RxReady);
        assert_eq!(core.state.role, Role::MasterRestartPending);

        let mut second = [0u8; 1];
        let mut xfer = request(XferBuffer::Read(&mut second), Chaining::Last);
        begin(&mut core, &mut xfer);
        assert_eq!(core.state.role, Role::MasterRx);
        step(&mut core, &mut xfer, HardwareEvent::RxReady);
        step(&mut core, &mut xfer, HardwareEvent::StopDetected);

        assert!(!core.bus.ops.contains(&Op::Restart));
        assert_eq!(
            core.bus.ops,
            std::vec![
                Op::Start,
                Op::Address(Address::SevenBit(0x50), Direction::Read),
                Op::Ack,
                Op::Read,
                Op::Ack,
                Op::Read,
                Op::Nack,
                Op::Read,
                Op::Stop,
            ]
        );
    }

    #[test]
    fn test_write_then_continuation_without_readdressing() {
        let mut core = core();
        let first = [1u8, 2];
        let second = [3u8];

        let mut xfer = request(XferBuffer::Write(&first), Chaining::First);
        begin(&mut core, &mut xfer);
        step(&mut core, &mut xfer, HardwareEvent::StartSent);
        step(&mut core, &mut xfer, HardwareEvent::AddressAcked);
        step(&mut core, &mut xfer, HardwareEvent::TxReady);
        step(&mut core, &mut xfer, HardwareEvent::TxReady);
        assert_eq!(
            step(&mut core, &mut xfer, HardwareEvent::TxReady),
            Progress::FrameHeld
        );
        assert_eq!(core.state.role, Role::MasterRestartPending);

        let mut xfer = request(XferBuffer::Write(&second), Chaining::Last);
        assert_eq!(begin(&mut core, &mut xfer), Progress::Pending);
        assert_eq!(core.state.role, Role::MasterTx);
        step(&mut core, &mut xfer, HardwareEvent::TxReady);
        step(&mut core, &mut xfer, HardwareEvent::TxReady);
        assert_eq!(
            step(&mut core, &mut xfer, HardwareEvent::StopDetected),
            Progress::Complete
        );

        assert_eq!(
            core.bus.ops,
            std::vec![
                Op::Start,
                Op::Address(Address::SevenBit(0x50), Direction::Write),
                Op::Write(1),
                Op::Write(2),
                Op::Write(3),
                Op::Stop,
            ]
        );
        assert_eq!(core.state.role, Role::Idle);
    }

    #[test]
    fn test_direction_change_issues_restart() {
        let mut core = core();
        let cmd = [0x10u8];
        let mut data = [0u8; 1];

        let mut xfer = request(XferBuffer::Write(&cmd), Chaining::First);
        begin(&mut core, &mut xfer);
        step(&mut core, &mut xfer, HardwareEvent::StartSent);
        step(&mut core, &mut xfer, HardwareEvent::AddressAcked);
        step(&mut core, &mut xfer, HardwareEvent::TxReady);
        step(&mut core, &mut xfer, HardwareEvent::TxReady);

        let mut xfer = request(XferBuffer::Read(&mut data), Chaining::Last);
        begin(&mut core, &mut xfer);
        assert_eq!(core.state.role, Role::MasterAddressing);
        step(&mut core, &mut xfer, HardwareEvent::StartSent);
        step(&mut core, &mut xfer, HardwareEvent::AddressAcked);
        step(&mut core, &mut xfer, HardwareEvent::RxReady);
        step(&mut core, &mut xfer, HardwareEvent::StopDetected);

        let restarts = core.bus.ops.iter().filter(|op| **op == Op::Restart).count();
        let stops = core.bus.ops.iter().filter(|op| **op == Op::Stop).count();
        assert_eq!((restarts, stops), (1, 1));
    }

    #[test]
    fn test_address_nak() {
        let mut core = core();
        let bytes = [0u8; 2];
        let mut xfer = request(XferBuffer::Write(&bytes), Chaining::Standalone);
        begin(&mut core, &mut xfer);
        step(&mut core, &mut xfer, HardwareEvent::StartSent);
        assert_eq!(
            step(&mut core, &mut xfer, HardwareEvent::Nack),
            Progress::Failed(Error::AddressNak)
        );
        assert_eq!(core.state.role, Role::Idle);
        assert!(core.state.errors.contains(ErrorFlags::ADDRESS_NAK));
        assert_eq!(core.bus.ops.last(), Some(&Op::Stop));
    }

    #[test]
    fn test_data_nak_before_last_byte() {
        let mut core = core();
        let bytes = [1u8, 2, 3];
        let mut xfer = request(XferBuffer::Write(&bytes), Chaining::Standalone);
        begin(&mut core, &mut xfer);
        step(&mut core, &mut xfer, HardwareEvent::StartSent);
        step(&mut core, &mut xfer, HardwareEvent::AddressAcked);
        step(&mut core, &mut xfer, HardwareEvent::TxReady);
        step(&mut core, &mut xfer, HardwareEvent::TxReady);
        assert_eq!(
            step(&mut core, &mut xfer, HardwareEvent::Nack),
            Progress::Failed(Error::DataNak)
        );
        assert_eq!(xfer.bytes_done(), 1);
    }

    #[test]
    fn test_nack_on_last_byte_completes() {
        let mut core = core();
        let bytes = [1u8, 2];
        let mut xfer = request(XferBuffer::Write(&bytes), Chaining::Standalone);
        begin(&mut core, &mut xfer);
        step(&mut core, &mut xfer, HardwareEvent::StartSent);
        step(&mut core, &mut xfer, HardwareEvent::AddressAcked);
        step(&mut core, &mut xfer, HardwareEvent::TxReady);
        step(&mut core, &mut xfer, HardwareEvent::TxReady);
        assert_eq!(step(&mut core, &mut xfer, HardwareEvent::Nack), Progress::Pending);
        assert_eq!(core.state.role, Role::MasterStopPending);
        assert_eq!(
            step(&mut core, &mut xfer, HardwareEvent::StopDetected),
            Progress::Complete
        );
        assert_eq!(xfer.bytes_done(), 2);
    }

    #[test]
    fn test_arbitration_lost_resumes_listening_without_stop() {
        let mut core = BusCore::new(
            ScriptedBus::default(),
            I2cConfig {
                own_address: Some(Address::SevenBit(0x42)),
                ..I2cConfig::default()
            },
            NoOpLogger,
        );
        core.reset_role();
        let bytes = [1u8];
        let mut xfer = request(XferBuffer::Write(&bytes), Chaining::Standalone);
        begin(&mut core, &mut xfer);
        assert_eq!(
            step(&mut core, &mut xfer, HardwareEvent::ArbitrationLost),
            Progress::Failed(Error::ArbitrationLost)
        );
        assert_eq!(core.state.role, Role::SlaveListening);
        assert!(!core.bus.ops.contains(&Op::Stop));
    }

    #[test]
    fn test_dma_rx_leaves_final_byte_to_interrupt_path() {
        let mut core = core();
        let mut buf = [0u8; 4];
        let mut xfer = request(XferBuffer::Read(&mut buf), Chaining::Standalone);
        xfer.use_dma = true;
        begin(&mut core, &mut xfer);
        step(&mut core, &mut xfer, HardwareEvent::StartSent);
        assert_eq!(
            step(&mut core, &mut xfer, HardwareEvent::AddressAcked),
            Progress::DmaHandoff
        );
        assert_eq!(dma_finished(&mut core, &mut xfer, 3), Progress::Pending);
        assert_eq!(core.bus.ops.last(), Some(&Op::Nack));
        step(&mut core, &mut xfer, HardwareEvent::RxReady);
        assert_eq!(core.state.role, Role::MasterStopPending);
        assert_eq!(xfer.bytes_done(), 4);
    }
}
