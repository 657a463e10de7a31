// Licensed under the Apache-2.0 license

//! Scenario runners over the software bus. Each prints its name and
//! `PASSED` to the given writer, typically a UART.

pub mod i2c_test;
