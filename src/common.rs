// Licensed under the Apache-2.0 license

//! Crate-wide logging hooks.
//!
//! Drivers take a `Logger` as a generic parameter so that bare-metal builds can
//! route diagnostics to a UART, to `defmt`, or nowhere at all without touching
//! the driver code. [`NoOpLogger`] is the default everywhere.

/// Minimal logging sink used by the drivers.
pub trait Logger {
    fn debug(&mut self, msg: &str);
    fn error(&mut self, msg: &str);
}

/// Logger that discards everything.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoOpLogger;

impl Logger for NoOpLogger {
    fn debug(&mut self, _msg: &str) {}
    fn error(&mut self, _msg: &str) {}
}

/// Logger writing one line per message to an `embedded_io::Write` sink
/// (typically a UART).
///
/// Write errors are dropped: a failing log sink must never disturb bus
/// handling.
pub struct IoLogger<W: embedded_io::Write> {
    writer: W,
}

impl<W: embedded_io::Write> IoLogger<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }

    fn line(&mut self, level: &str, msg: &str) {
        let _ = self.writer.write_all(level.as_bytes());
        let _ = self.writer.write_all(msg.as_bytes());
        let _ = self.writer.write_all(b"\r\n");
    }
}

impl<W: embedded_io::Write> Logger for IoLogger<W> {
    fn debug(&mut self, msg: &str) {
        self.line("[i2c] ", msg);
    }

    fn error(&mut self, msg: &str) {
        self.line("[i2c] error: ", msg);
    }
}

/// Logger forwarding to `defmt`.
#[cfg(feature = "defmt")]
#[derive(Clone, Copy, Debug, Default)]
pub struct DefmtLogger;

#[cfg(feature = "defmt")]
impl Logger for DefmtLogger {
    fn debug(&mut self, msg: &str) {
        defmt::debug!("{=str}", msg);
    }

    fn error(&mut self, msg: &str) {
        defmt::error!("{=str}", msg);
    }
}
