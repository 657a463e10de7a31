// Licensed under the Apache-2.0 license

//! Transaction engine: the handle applications and interrupt handlers use.
//!
//! One engine drives one bus. Blocking calls poll the hardware flags against
//! the tick source with interrupts masked; asynchronous calls return at once
//! and progress from [`I2cEngine::on_interrupt`] and
//! [`I2cEngine::on_dma_complete`]. Both feed [`I2cEngine::advance`], the
//! single entry point into the master and slave state machines.

use crate::common::{Logger, NoOpLogger};
use crate::i2c::bus_core::{role_mask, BusCore};
use crate::i2c::common::{I2cConfig, I2cXferMode};
use crate::i2c::dma::{DmaLink, NoDma};
use crate::i2c::error::Error;
use crate::i2c::event::{capture, Event, HardwareEvent, I2cEventHandler, Notifier};
use crate::i2c::master::{self, Progress};
use crate::i2c::slave::{self, SlaveBuffers};
use crate::i2c::state::{Mode, Role, StatusBits};
use crate::i2c::traits::{
    DmaDirection, DmaService, Flag, I2cBusController, I2cSlave, InterruptMask, TickSource,
};
use crate::i2c::transfer::{
    Address, Chaining, Direction, Instant, TransferOptions, TransferRequest, XferBuffer,
};

pub struct I2cEngine<
    'b,
    B: I2cBusController,
    T: TickSource,
    D: DmaService = NoDma,
    L: Logger = NoOpLogger,
> {
    core: BusCore<B, L>,
    ticks: T,
    dma: DmaLink<D>,
    /// Asynchronous master transfer in flight.
    active: Option<TransferRequest<'b>>,
    deadline: Option<Instant>,
    /// Buffer of the last finished asynchronous transfer.
    finished: Option<XferBuffer<'b>>,
    outcome: Option<Result<usize, Error>>,
    last_count: usize,
    slave: SlaveBuffers<'b>,
    notifier: Notifier<'b>,
    /// A blocking call owns the flags.
    polling: bool,
}

impl<'b, B, T, L> I2cEngine<'b, B, T, NoDma, L>
where
    B: I2cBusController,
    T: TickSource,
    L: Logger,
{
    pub fn new(bus: B, ticks: T, config: I2cConfig, logger: L) -> Self {
        Self::with_dma(bus, ticks, NoDma, None, config, logger)
    }
}

impl<'b, B, T, D, L> I2cEngine<'b, B, T, D, L>
where
    B: I2cBusController,
    T: TickSource,
    D: DmaService,
    L: Logger,
{
    /// Engine moving master data phases through `dma` when the configuration
    /// selects [`I2cXferMode::DmaMode`]. `on_complete` is registered as the
    /// channel completion callback.
    pub fn with_dma(
        bus: B,
        ticks: T,
        dma: D,
        on_complete: Option<fn(D::Channel)>,
        config: I2cConfig,
        logger: L,
    ) -> Self {
        Self {
            core: BusCore::new(bus, config, logger),
            ticks,
            dma: DmaLink::new(dma, on_complete),
            active: None,
            deadline: None,
            finished: None,
            outcome: None,
            last_count: 0,
            slave: SlaveBuffers::new(),
            notifier: Notifier::new(),
            polling: false,
        }
    }

    /// Programs timing and the own address, enables the controller and
    /// starts listening when an own address is configured.
    ///
    /// Returns the achieved bus frequency in Hz.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for an own address outside its addressing mode,
    /// `Busy` while a transaction is in flight.
    pub fn init(&mut self) -> Result<u32, Error> {
        let config = self.core.config;
        if config.own_address.is_some_and(|address| !address.is_valid()) {
            return Err(Error::InvalidArgument);
        }
        if !self.core.state.role.is_quiescent() || self.active.is_some() {
            return Err(Error::Busy);
        }

        self.core.bus.disable();
        let hz = self
            .core
            .bus
            .configure_timing(config.speed, &config.timing_config);
        self.core.bus.set_own_address(config.own_address);
        self.core.bus.enable();

        self.core.reset_role();
        self.core.state.errors.clear();
        self.sync_interrupts();
        self.core.logger.debug("bus initialized");
        Ok(hz)
    }

    pub fn set_event_handler(&mut self, handler: &'b mut (dyn I2cEventHandler + Send)) {
        self.notifier.set_handler(handler);
    }

    /// Detaches the handler. Events keep going to the queue, and address
    /// matches are acknowledged.
    pub fn clear_event_handler(&mut self) -> Option<&'b mut (dyn I2cEventHandler + Send)> {
        self.notifier.clear_handler()
    }

    pub fn poll_event(&mut self) -> Option<Event> {
        self.notifier.poll()
    }

    /// Writes `bytes` and waits for the frame to end.
    ///
    /// Returns the number of bytes acknowledged.
    ///
    /// # Errors
    ///
    /// Any bus error, `Timeout` when the deadline passes (the transfer is
    /// aborted), `Busy` or `InvalidArgument` before touching the bus.
    pub fn master_write(
        &mut self,
        address: Address,
        bytes: &[u8],
        options: TransferOptions,
    ) -> Result<usize, Error> {
        let mut xfer = TransferRequest::with_options(
            address,
            XferBuffer::Write(bytes),
            options,
            self.core.config.timeout,
        );
        self.run_blocking(&mut xfer)
    }

    /// Fills `buffer` and waits for the frame to end.
    ///
    /// # Errors
    ///
    /// Same as [`I2cEngine::master_write`].
    pub fn master_read(
        &mut self,
        address: Address,
        buffer: &mut [u8],
        options: TransferOptions,
    ) -> Result<usize, Error> {
        let mut xfer = TransferRequest::with_options(
            address,
            XferBuffer::Read(buffer),
            options,
            self.core.config.timeout,
        );
        self.run_blocking(&mut xfer)
    }

    /// Starts a write and returns; completion is reported through the event
    /// handler, [`I2cEngine::poll_event`] and [`I2cEngine::poll_completion`].
    ///
    /// # Errors
    ///
    /// `Busy` while another transfer is in flight (which stays untouched),
    /// `InvalidArgument` for a bad address or chaining position.
    pub fn master_write_async(
        &mut self,
        address: Address,
        bytes: &'b [u8],
        options: TransferOptions,
    ) -> Result<(), Error> {
        self.start_async(TransferRequest::with_options(
            address,
            XferBuffer::Write(bytes),
            options,
            self.core.config.timeout,
        ))
    }

    /// Starts a read and returns. Reclaim the filled buffer with
    /// [`I2cEngine::take_buffer`] once complete.
    ///
    /// # Errors
    ///
    /// Same as [`I2cEngine::master_write_async`].
    pub fn master_read_async(
        &mut self,
        address: Address,
        buffer: &'b mut [u8],
        options: TransferOptions,
    ) -> Result<(), Error> {
        self.start_async(TransferRequest::with_options(
            address,
            XferBuffer::Read(buffer),
            options,
            self.core.config.timeout,
        ))
    }

    /// Outcome of the last asynchronous transfer: bytes transferred, or its
    /// error. Aborts the transfer with `Timeout` once its deadline passes.
    pub fn poll_completion(&mut self) -> nb::Result<usize, Error> {
        if let Some(outcome) = self.outcome.take() {
            return outcome.map_err(nb::Error::Other);
        }
        if self.active.is_none() {
            return Err(nb::Error::Other(Error::InvalidArgument));
        }
        if self.deadline.is_some_and(|deadline| self.ticks.now() >= deadline) {
            self.expire();
            return Err(nb::Error::Other(Error::Timeout));
        }
        Err(nb::Error::WouldBlock)
    }

    /// Buffer of the last finished asynchronous transfer.
    pub fn take_buffer(&mut self) -> Option<XferBuffer<'b>> {
        self.finished.take()
    }

    /// Serves `data` to the next remote master read. May be called during a
    /// read phase to refill.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for an empty buffer or when no own address is
    /// configured.
    pub fn slave_configure_read_buffer(&mut self, data: &'b [u8]) -> Result<(), Error> {
        if data.is_empty() || self.core.config.own_address.is_none() {
            return Err(Error::InvalidArgument);
        }
        self.slave.set_read(data);
        Ok(())
    }

    /// Stores the next remote master write into `buffer`.
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for an empty buffer or without own address, `Busy`
    /// during a write phase.
    pub fn slave_configure_write_buffer(&mut self, buffer: &'b mut [u8]) -> Result<(), Error> {
        if buffer.is_empty() || self.core.config.own_address.is_none() {
            return Err(Error::InvalidArgument);
        }
        if matches!(self.core.state.role, Role::SlaveAddressed | Role::SlaveRx) {
            return Err(Error::Busy);
        }
        self.slave.set_write(buffer);
        Ok(())
    }

    /// Write buffer of the last completed slave write phase, with its count.
    pub fn take_slave_write_buffer(&mut self) -> Option<(&'b mut [u8], usize)> {
        self.slave.take_completed()
    }

    /// Terminates the master transaction in flight.
    ///
    /// No-op when nothing is in flight.
    ///
    /// # Errors
    ///
    /// `Busy` while a remote master owns the slave side.
    pub fn abort(&mut self) -> Result<(), Error> {
        let role = self.core.state.role;
        if role.is_quiescent() {
            return Ok(());
        }
        if role.is_slave_active() {
            return Err(Error::Busy);
        }

        self.cancel_dma();
        master::abort(&mut self.core);
        self.core.fail(Error::Aborted);
        if let Some(mut xfer) = self.active.take() {
            xfer.discard_progress();
            self.finished = Some(xfer.into_buffer());
            self.outcome = Some(Err(Error::Aborted));
        }
        self.deadline = None;
        self.last_count = 0;
        self.notifier.post(Event::Error(Error::Aborted));
        self.sync_interrupts();
        Ok(())
    }

    #[must_use]
    pub fn get_status(&self) -> StatusBits {
        StatusBits::new(
            self.core.state.role,
            self.core.state.errors,
            self.core.bus.is_bus_busy(),
        )
    }

    /// Bytes moved by the transfer in flight, or by the last one.
    #[must_use]
    pub fn get_transferred_count(&self) -> usize {
        if let Some(xfer) = self.active.as_ref() {
            return xfer.bytes_done();
        }
        if self.slave.in_phase() {
            return self.slave.phase_count();
        }
        self.last_count
    }

    #[must_use]
    pub fn role(&self) -> Role {
        self.core.state.role
    }

    #[must_use]
    pub fn mode(&self) -> Mode {
        self.core.state.mode()
    }

    #[must_use]
    pub fn config(&self) -> &I2cConfig {
        &self.core.config
    }

    pub fn bus(&self) -> &B {
        &self.core.bus
    }

    pub fn dma_service(&self) -> &D {
        self.dma.service()
    }

    /// Interrupt service entry: handles the most urgent enabled condition.
    pub fn on_interrupt(&mut self) {
        let sources = self.core.irq_mask();
        if let Some(event) = capture(&mut self.core.bus, sources) {
            self.advance(event);
        }
    }

    /// DMA completion entry, called from the completion callback.
    pub fn on_dma_complete(&mut self, channel: D::Channel) {
        if self.dma.owns(channel) {
            self.advance(HardwareEvent::DmaComplete);
        }
    }

    /// Feeds one hardware event to the state machines.
    pub fn advance(&mut self, event: HardwareEvent) {
        let mut active = self.active.take();
        let progress = if event == HardwareEvent::DmaComplete {
            match (self.dma.finish_current(), active.as_mut()) {
                (Some(moved), Some(xfer)) => {
                    self.core.bus.set_dma(false);
                    master::dma_finished(&mut self.core, xfer, moved)
                }
                _ => Progress::Pending,
            }
        } else {
            self.dispatch(active.as_mut(), event)
        };
        self.active = active;
        self.settle(progress);
        self.sync_interrupts();
    }

    fn check_start(&self, address: Address, chaining: Chaining) -> Result<(), Error> {
        if !address.is_valid() {
            return Err(Error::InvalidArgument);
        }
        if self.active.is_some() {
            return Err(Error::Busy);
        }
        match self.core.state.role {
            Role::Idle | Role::SlaveListening => {
                if !chaining.opens_bus() {
                    return Err(Error::InvalidArgument);
                }
                if self.core.config.multi_master && self.core.bus.is_bus_busy() {
                    return Err(Error::Busy);
                }
                Ok(())
            }
            Role::MasterRestartPending if !chaining.opens_bus() => Ok(()),
            Role::MasterRestartPending => Err(Error::InvalidArgument),
            _ => Err(Error::Busy),
        }
    }

    fn run_blocking(&mut self, xfer: &mut TransferRequest<'_>) -> Result<usize, Error> {
        self.check_start(xfer.address, xfer.chaining)?;
        self.polling = true;
        self.core.apply_mask(InterruptMask::NONE);

        let deadline = self.ticks.now() + xfer.timeout;
        let mut progress = master::begin(&mut self.core, xfer);
        let result = loop {
            match progress {
                Progress::Complete | Progress::FrameHeld => break Ok(xfer.bytes_done()),
                Progress::Failed(error) => break Err(error),
                Progress::Pending | Progress::DmaHandoff => {}
            }
            if self.ticks.now() >= deadline {
                master::abort(&mut self.core);
                xfer.discard_progress();
                break Err(self.core.fail(Error::Timeout));
            }
            if let Some(event) = capture(&mut self.core.bus, InterruptMask::ALL) {
                progress = self.dispatch(Some(&mut *xfer), event);
            }
        };

        self.polling = false;
        self.last_count = xfer.bytes_done();
        self.sync_interrupts();
        result
    }

    fn start_async(&mut self, mut xfer: TransferRequest<'b>) -> Result<(), Error> {
        self.check_start(xfer.address, xfer.chaining)?;
        xfer.use_dma = self.core.config.xfer_mode == I2cXferMode::DmaMode
            && xfer.length() >= 2
            && self.dma.channel().is_some();

        self.outcome = None;
        self.finished = None;
        self.deadline = Some(self.ticks.now() + xfer.timeout);
        self.core.logger.debug(match xfer.direction() {
            Direction::Write => "master write started",
            Direction::Read => "master read started",
        });

        let progress = match master::begin(&mut self.core, &mut xfer) {
            Progress::DmaHandoff => self.start_dma(&mut xfer),
            progress => progress,
        };
        self.active = Some(xfer);
        self.settle(progress);
        self.sync_interrupts();
        Ok(())
    }

    /// Routes an event to the machine owning the current role.
    fn dispatch(
        &mut self,
        xfer: Option<&mut TransferRequest<'_>>,
        event: HardwareEvent,
    ) -> Progress {
        let role = self.core.state.role;
        if !role.is_master() {
            slave::step(&mut self.core, &mut self.slave, &mut self.notifier, event);
            if role.is_slave_active() && !self.core.state.role.is_slave_active() {
                self.last_count = self.slave.last_count();
            }
            return Progress::Pending;
        }

        let Some(xfer) = xfer else {
            return self.held_bus_event(event);
        };
        if event == HardwareEvent::Nack && self.dma.is_running() {
            // account for what DMA moved before judging the NACK
            let moved = self.dma.cancel().unwrap_or(0);
            self.core.bus.set_dma(false);
            xfer.use_dma = false;
            xfer.credit(moved);
        }
        match master::step(&mut self.core, xfer, event) {
            Progress::DmaHandoff => self.start_dma(xfer),
            progress => progress,
        }
    }

    /// Events while a chained frame holds the bus and nothing is in flight.
    fn held_bus_event(&mut self, event: HardwareEvent) -> Progress {
        let error = match event {
            HardwareEvent::BusError => {
                self.core.bus.assert_stop();
                Error::BusError
            }
            HardwareEvent::ArbitrationLost => Error::ArbitrationLost,
            HardwareEvent::AddressMatched { .. } => {
                self.core.bus.clear_flag(Flag::AddressMatched);
                return Progress::Pending;
            }
            _ => return Progress::Pending,
        };
        self.core.fail(error);
        self.core.resume();
        self.notifier.post(Event::Error(error));
        Progress::Pending
    }

    fn start_dma(&mut self, xfer: &mut TransferRequest<'_>) -> Progress {
        let remaining = xfer.remaining();
        let (direction, len) = match xfer.direction() {
            Direction::Write => (DmaDirection::MemoryToPeripheral, remaining),
            // final byte is NACKed from the interrupt path
            Direction::Read if xfer.nacks_final_byte() => {
                (DmaDirection::PeripheralToMemory, remaining.saturating_sub(1))
            }
            Direction::Read => (DmaDirection::PeripheralToMemory, remaining),
        };
        if len == 0 {
            return master::dma_finished(&mut self.core, xfer, 0);
        }

        self.core.bus.set_dma(true);
        let memory = xfer.cursor_address();
        if self.dma.begin(direction, memory, len) {
            self.core.logger.debug("data phase handed to dma");
            Progress::Pending
        } else {
            self.core.bus.set_dma(false);
            master::dma_finished(&mut self.core, xfer, 0)
        }
    }

    /// Reports the end of the asynchronous transfer, once.
    fn settle(&mut self, progress: Progress) {
        let result = match progress {
            Progress::Complete | Progress::FrameHeld => Ok(()),
            Progress::Failed(error) => Err(error),
            Progress::Pending | Progress::DmaHandoff => return,
        };
        self.cancel_dma();
        let Some(xfer) = self.active.take() else {
            return;
        };

        let count = xfer.bytes_done();
        let direction = xfer.direction();
        self.last_count = count;
        self.deadline = None;
        self.finished = Some(xfer.into_buffer());
        match result {
            Ok(()) => {
                self.outcome = Some(Ok(count));
                self.notifier.post(match direction {
                    Direction::Write => Event::MasterWriteDone,
                    Direction::Read => Event::MasterReadDone,
                });
            }
            Err(error) => {
                self.outcome = Some(Err(error));
                self.notifier.post(Event::Error(error));
            }
        }
    }

    /// Deadline of the asynchronous transfer passed.
    fn expire(&mut self) {
        self.cancel_dma();
        master::abort(&mut self.core);
        self.core.fail(Error::Timeout);
        if let Some(mut xfer) = self.active.take() {
            xfer.discard_progress();
            self.finished = Some(xfer.into_buffer());
        }
        self.deadline = None;
        self.last_count = 0;
        self.notifier.post(Event::Error(Error::Timeout));
        self.sync_interrupts();
    }

    fn cancel_dma(&mut self) {
        if self.dma.cancel().is_some() {
            self.core.bus.set_dma(false);
        }
    }

    fn sync_interrupts(&mut self) {
        if self.polling {
            return;
        }
        let mask = role_mask(self.core.state.role, self.dma.is_running());
        self.core.apply_mask(mask);
    }
}

impl<'b, B, T, D, L> I2cSlave<'b> for I2cEngine<'b, B, T, D, L>
where
    B: I2cBusController,
    T: TickSource,
    D: DmaService,
    L: Logger,
{
    type Error = Error;

    fn configure_read_buffer(&mut self, data: &'b [u8]) -> Result<(), Error> {
        self.slave_configure_read_buffer(data)
    }

    fn configure_write_buffer(&mut self, buffer: &'b mut [u8]) -> Result<(), Error> {
        self.slave_configure_write_buffer(buffer)
    }

    fn take_write_buffer(&mut self) -> Option<(&'b mut [u8], usize)> {
        self.take_slave_write_buffer()
    }
}
