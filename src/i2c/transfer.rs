// Licensed under the Apache-2.0 license

//! Transfer descriptors and the receive acknowledge policy.
//!
//! A [`TransferRequest`] is the in-flight unit of work: target address,
//! direction, borrowed buffer, chaining position and deadline. Only the state
//! machine advances `bytes_done`.

/// Monotonic time used for deadlines (1 MHz ticks).
pub type Instant = fugit::TimerInstantU64<1_000_000>;

/// Timeout duration (1 MHz ticks).
pub type Duration = fugit::MicrosDurationU64;

/// Target address on the bus.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Address {
    /// 7-bit address
    SevenBit(u8),
    /// 10-bit address
    TenBit(u16),
}

impl Address {
    /// Whether the address fits its addressing mode.
    #[must_use]
    pub const fn is_valid(self) -> bool {
        match self {
            Address::SevenBit(addr) => addr <= 0x7F,
            Address::TenBit(addr) => addr <= 0x3FF,
        }
    }
}

impl From<u8> for Address {
    fn from(addr: u8) -> Self {
        Address::SevenBit(addr)
    }
}

/// Direction of a transfer, seen from the bus master.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Direction {
    Write,
    Read,
}

/// Position of a frame inside a sequential (chained) transfer.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Chaining {
    /// Start, data, Stop.
    #[default]
    Standalone,
    /// Start, data; bus stays held for the next frame.
    First,
    /// Continues a held bus; bus stays held afterwards.
    Middle,
    /// Continues a held bus, then Stop.
    Last,
}

impl Chaining {
    /// A Stop condition ends this frame.
    #[must_use]
    pub const fn sends_stop(self) -> bool {
        matches!(self, Chaining::Standalone | Chaining::Last)
    }

    /// This frame needs a fresh Start (the bus is not held yet).
    #[must_use]
    pub const fn opens_bus(self) -> bool {
        matches!(self, Chaining::Standalone | Chaining::First)
    }
}

/// Per-call transfer options.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct TransferOptions {
    pub chaining: Chaining,
    /// Overrides the configured deadline.
    pub timeout: Option<Duration>,
    /// The next chained frame reads from the same address without ReStart,
    /// so the final byte of this read is acknowledged. Ignored for frames
    /// that send Stop.
    pub read_continues: bool,
}

impl TransferOptions {
    #[must_use]
    pub const fn chained(chaining: Chaining) -> Self {
        Self {
            chaining,
            timeout: None,
            read_continues: false,
        }
    }

    #[must_use]
    pub const fn continuing_read(mut self) -> Self {
        self.read_continues = true;
        self
    }

    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Buffer borrowed by a transfer for its whole lifetime.
#[derive(Debug)]
pub enum XferBuffer<'a> {
    Write(&'a [u8]),
    Read(&'a mut [u8]),
}

impl XferBuffer<'_> {
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            XferBuffer::Write(bytes) => bytes.len(),
            XferBuffer::Read(buffer) => buffer.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn direction(&self) -> Direction {
        match self {
            XferBuffer::Write(_) => Direction::Write,
            XferBuffer::Read(_) => Direction::Read,
        }
    }
}

/// In-flight transfer.
#[derive(Debug)]
pub struct TransferRequest<'a> {
    pub address: Address,
    pub chaining: Chaining,
    pub timeout: Duration,
    /// See [`TransferOptions::read_continues`].
    pub read_continues: bool,
    buffer: XferBuffer<'a>,
    bytes_done: usize,
    /// Data phase goes through DMA.
    pub(crate) use_dma: bool,
}

impl<'a> TransferRequest<'a> {
    #[must_use]
    pub fn new(
        address: Address,
        buffer: XferBuffer<'a>,
        chaining: Chaining,
        timeout: Duration,
    ) -> Self {
        Self {
            address,
            chaining,
            timeout,
            read_continues: false,
            buffer,
            bytes_done: 0,
            use_dma: false,
        }
    }

    /// Request built from per-call options, with the configured deadline as
    /// fallback.
    #[must_use]
    pub fn with_options(
        address: Address,
        buffer: XferBuffer<'a>,
        options: TransferOptions,
        default_timeout: Duration,
    ) -> Self {
        let mut xfer = Self::new(
            address,
            buffer,
            options.chaining,
            options.timeout.unwrap_or(default_timeout),
        );
        xfer.read_continues = options.read_continues;
        xfer
    }

    #[must_use]
    pub fn direction(&self) -> Direction {
        self.buffer.direction()
    }

    /// The final received byte is answered with NACK.
    #[must_use]
    pub fn nacks_final_byte(&self) -> bool {
        next_ack_policy(1, self.chaining, self.read_continues) == AckPolicy::Nack
    }

    #[must_use]
    pub fn length(&self) -> usize {
        self.buffer.len()
    }

    #[must_use]
    pub fn bytes_done(&self) -> usize {
        self.bytes_done
    }

    #[must_use]
    pub fn remaining(&self) -> usize {
        self.length().saturating_sub(self.bytes_done)
    }

    /// Next byte to transmit; advances `bytes_done`.
    pub(crate) fn next_tx_byte(&mut self) -> Option<u8> {
        match &self.buffer {
            XferBuffer::Write(bytes) => {
                let byte = bytes.get(self.bytes_done).copied()?;
                self.bytes_done += 1;
                Some(byte)
            }
            XferBuffer::Read(_) => None,
        }
    }

    /// Stores a received byte; advances `bytes_done`. Returns false once the
    /// buffer is full.
    pub(crate) fn push_rx_byte(&mut self, byte: u8) -> bool {
        match &mut self.buffer {
            XferBuffer::Read(buffer) => match buffer.get_mut(self.bytes_done) {
                Some(slot) => {
                    *slot = byte;
                    self.bytes_done += 1;
                    true
                }
                None => false,
            },
            XferBuffer::Write(_) => false,
        }
    }

    /// Adds bytes moved outside the interrupt path (DMA), clamped to length.
    pub(crate) fn credit(&mut self, count: usize) {
        self.bytes_done = self.bytes_done.saturating_add(count).min(self.length());
    }

    /// Removes the last byte from the count (it was not acknowledged).
    pub(crate) fn uncount_last(&mut self) {
        self.bytes_done = self.bytes_done.saturating_sub(1);
    }

    pub(crate) fn discard_progress(&mut self) {
        self.bytes_done = 0;
    }

    /// Memory address of the first unprocessed byte, for DMA programming.
    pub(crate) fn cursor_address(&mut self) -> usize {
        match &mut self.buffer {
            XferBuffer::Write(bytes) => bytes.as_ptr() as usize + self.bytes_done,
            XferBuffer::Read(buffer) => buffer.as_mut_ptr() as usize + self.bytes_done,
        }
    }

    #[must_use]
    pub fn into_buffer(self) -> XferBuffer<'a> {
        self.buffer
    }
}

/// What the master answers to the next received byte, or how the frame ends
/// once nothing remains.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AckPolicy {
    /// Receive the next byte and acknowledge it.
    Ack,
    /// Receive the next byte and NACK it: it is the last one the slave sends.
    Nack,
    /// Nothing left to receive: generate Stop.
    Stop,
    /// Nothing left to receive: keep the bus for the next chained frame.
    Hold,
}

/// Decides how the byte about to be received is answered.
///
/// `remaining` counts the bytes still to be received, including the one about
/// to be commanded. NACK must be armed before the final byte is clocked in,
/// otherwise the slave sees an ACK and keeps driving data into the following
/// Stop or ReStart. Only a held frame whose read continues in the next frame
/// (`read_continues`) ACKs its final byte.
#[must_use]
pub const fn next_ack_policy(
    remaining: usize,
    chaining: Chaining,
    read_continues: bool,
) -> AckPolicy {
    match remaining {
        0 if chaining.sends_stop() => AckPolicy::Stop,
        0 => AckPolicy::Hold,
        1 if chaining.sends_stop() || !read_continues => AckPolicy::Nack,
        _ => AckPolicy::Ack,
    }
}
