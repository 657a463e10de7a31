// Licensed under the Apache-2.0 license

//! Sharing one engine between thread mode and its interrupt handler.
//!
//! ```rust,ignore
//! static I2C1: SharedI2c<Engine> = SharedI2c::new();
//!
//! fn main() {
//!     I2C1.install(engine);
//!     I2C1.with(|i2c| i2c.master_write_async(addr, &DATA, TransferOptions::default()));
//! }
//!
//! #[interrupt]
//! fn I2C1_EV() {
//!     I2C1.with(|i2c| i2c.on_interrupt());
//! }
//! ```

use core::cell::RefCell;
use critical_section::Mutex;

pub struct SharedI2c<E> {
    inner: Mutex<RefCell<Option<E>>>,
}

impl<E> Default for SharedI2c<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> SharedI2c<E> {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            inner: Mutex::new(RefCell::new(None)),
        }
    }

    /// Stores `engine`, returning the one previously installed.
    pub fn install(&self, engine: E) -> Option<E> {
        critical_section::with(|cs| self.inner.borrow(cs).replace(Some(engine)))
    }

    /// Runs `f` on the engine inside a critical section.
    ///
    /// `None` when no engine is installed or it is already borrowed (a
    /// handler re-entering from within `f`).
    pub fn with<R>(&self, f: impl FnOnce(&mut E) -> R) -> Option<R> {
        critical_section::with(|cs| {
            let mut slot = self.inner.borrow(cs).try_borrow_mut().ok()?;
            slot.as_mut().map(f)
        })
    }

    pub fn take(&self) -> Option<E> {
        critical_section::with(|cs| self.inner.borrow(cs).take())
    }

    #[must_use]
    pub fn is_installed(&self) -> bool {
        critical_section::with(|cs| {
            self.inner
                .borrow(cs)
                .try_borrow()
                .map_or(true, |slot| slot.is_some())
        })
    }
}
