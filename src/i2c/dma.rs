// Licensed under the Apache-2.0 license

//! DMA glue between the master data phase and a [`DmaService`].
//!
//! The engine hands a data phase to DMA after the address phase; the service
//! reports back through its completion callback, which the application turns
//! into `I2cEngine::on_dma_complete`. For receive frames ending in Stop the
//! last byte stays on the interrupt path so that it can be NACKed.

use crate::i2c::traits::{DmaDirection, DmaRequest, DmaService};

/// Service for buses without DMA. Never hands out a channel.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoDma;

impl DmaService for NoDma {
    type Channel = ();

    fn acquire_channel(&mut self) -> Option<Self::Channel> {
        None
    }
    fn configure(&mut self, _channel: Self::Channel, _request: &DmaRequest) {}
    fn start(&mut self, _channel: Self::Channel) {}
    fn stop(&mut self, _channel: Self::Channel) {}
    fn remaining(&self, _channel: Self::Channel) -> usize {
        0
    }
    fn set_completion_callback(&mut self, _channel: Self::Channel, _callback: fn(Self::Channel)) {}
}

/// Owns the service, the channel bound to this bus and the transfer in
/// flight.
pub struct DmaLink<D: DmaService> {
    service: D,
    on_complete: Option<fn(D::Channel)>,
    channel: Option<D::Channel>,
    /// Length of the running transfer.
    running: Option<usize>,
}

impl<D: DmaService> DmaLink<D> {
    pub fn new(service: D, on_complete: Option<fn(D::Channel)>) -> Self {
        Self {
            service,
            on_complete,
            channel: None,
            running: None,
        }
    }

    /// Channel bound to this bus, acquired on first use.
    pub fn channel(&mut self) -> Option<D::Channel> {
        if self.channel.is_none() {
            let channel = self.service.acquire_channel()?;
            if let Some(callback) = self.on_complete {
                self.service.set_completion_callback(channel, callback);
            }
            self.channel = Some(channel);
        }
        self.channel
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Programs and starts a transfer of `len` bytes at `memory`.
    pub fn begin(&mut self, direction: DmaDirection, memory: usize, len: usize) -> bool {
        let Some(channel) = self.channel() else {
            return false;
        };
        let request = DmaRequest {
            direction,
            memory,
            len,
        };
        self.running = Some(len);
        self.service.configure(channel, &request);
        self.service.start(channel);
        true
    }

    /// Bytes moved by the transfer that just completed on `channel`.
    ///
    /// `None` when `channel` is not ours or nothing was running.
    pub fn finish(&mut self, channel: D::Channel) -> Option<usize> {
        if self.channel != Some(channel) {
            return None;
        }
        let len = self.running.take()?;
        let left = self.service.remaining(channel).min(len);
        Some(len - left)
    }

    /// [`DmaLink::finish`] on the channel bound to this bus.
    pub fn finish_current(&mut self) -> Option<usize> {
        let channel = self.channel?;
        self.finish(channel)
    }

    #[must_use]
    pub fn owns(&self, channel: D::Channel) -> bool {
        self.channel == Some(channel)
    }

    /// Stops a running transfer; returns the bytes it moved.
    pub fn cancel(&mut self) -> Option<usize> {
        let channel = self.channel?;
        let len = self.running.take()?;
        self.service.stop(channel);
        let left = self.service.remaining(channel).min(len);
        Some(len - left)
    }

    pub fn service(&self) -> &D {
        &self.service
    }

    pub fn service_mut(&mut self) -> &mut D {
        &mut self.service
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::vec::Vec;

    struct MockDma {
        free: Vec<u8>,
        programmed: HashMap<u8, DmaRequest>,
        started: Vec<u8>,
        stopped: Vec<u8>,
        left: usize,
        callbacks: usize,
    }

    impl MockDma {
        fn new(channels: &[u8]) -> Self {
            Self {
                free: channels.to_vec(),
                programmed: HashMap::new(),
                started: Vec::new(),
                stopped: Vec::new(),
                left: 0,
                callbacks: 0,
            }
        }
    }

    impl DmaService for MockDma {
        type Channel = u8;

        fn acquire_channel(&mut self) -> Option<u8> {
            self.free.pop()
        }
        fn configure(&mut self, channel: u8, request: &DmaRequest) {
            self.programmed.insert(channel, *request);
        }
        fn start(&mut self, channel: u8) {
            self.started.push(channel);
        }
        fn stop(&mut self, channel: u8) {
            self.stopped.push(channel);
        }
        fn remaining(&self, _channel: u8) -> usize {
            self.left
        }
        fn set_completion_callback(&mut self, _channel: u8, _callback: fn(u8)) {
            self.callbacks += 1;
        }
    }

    fn completion(_channel: u8) {}

    #[test]
    fn test_channel_acquired_once() {
        let mut link = DmaLink::new(MockDma::new(&[3]), Some(completion as fn(u8)));
        assert_eq!(link.channel(), Some(3));
        assert_eq!(link.channel(), Some(3));
        assert_eq!(link.service().callbacks, 1);
    }

    #[test]
    fn test_transfer_accounting() {
        let mut link = DmaLink::new(MockDma::new(&[1]), None);
        assert!(link.begin(DmaDirection::PeripheralToMemory, 0x2000_0000, 7));
        assert!(link.is_running());
        assert_eq!(
            link.service().programmed.get(&1),
            Some(&DmaRequest {
                direction: DmaDirection::PeripheralToMemory,
                memory: 0x2000_0000,
                len: 7,
            })
        );

        // completion on a foreign channel is ignored
        assert_eq!(link.finish(9), None);
        link.service_mut().left = 2;
        assert_eq!(link.finish(1), Some(5));
        assert!(!link.is_running());
        assert_eq!(link.finish(1), None);
    }

    #[test]
    fn test_cancel_stops_channel() {
        let mut link = DmaLink::new(MockDma::new(&[4]), None);
        assert_eq!(link.cancel(), None);
        link.begin(DmaDirection::MemoryToPeripheral, 0x100, 3);
        assert_eq!(link.cancel(), Some(3));
        assert_eq!(link.service().stopped, vec![4]);
    }

    #[test]
    fn test_no_dma_never_starts() {
        let mut link = DmaLink::new(NoDma, None);
        assert!(!link.begin(DmaDirection::MemoryToPeripheral, 0, 4));
        assert!(!link.is_running());
    }
}
