//! Word copy applet.
//!
//! A Thumb routine that copies `words` 32-bit words from `src` to `dst`
//! and returns to the monitor. Its parameters live in a literal pool at
//! the end of the code, so the host reconfigures it with single word
//! writes instead of reloading it.

use embedded_hal::blocking::delay::DelayMs;

use crate::monitor::Monitor;
use crate::{Error, SerialPort};

pub const CODE: &[u8] = &[
    0x09, 0x48, 0x0a, 0x49, 0x0a, 0x4a, 0x02, 0xe0, 0x08, 0xc9, 0x08, 0xc0, 0x01, 0x3a, 0x00,
    0x2a, 0xfa, 0xd1, 0x04, 0x48, 0x00, 0x28, 0x01, 0xd1, 0x01, 0x48, 0x85, 0x46, 0x70, 0x47,
    0xc0, 0x46, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
];

/// Entry point within the code
pub const START_OFFSET: u32 = 0x00;
/// Initial stack pointer, also the address handed to `G`
pub const STACK_OFFSET: u32 = 0x20;
/// Reset vector, holds the Thumb entry address
pub const RESET_OFFSET: u32 = 0x24;
/// Destination pointer
pub const DST_OFFSET: u32 = 0x28;
/// Source pointer
pub const SRC_OFFSET: u32 = 0x2c;
/// Word count
pub const WORDS_OFFSET: u32 = 0x30;

#[derive(Debug, PartialEq)]
pub struct WordCopyApplet {
    base: u32,
}

impl WordCopyApplet {
    /// Load the applet into target RAM at `base`
    pub fn load<P, D, E>(monitor: &mut Monitor<P, D, E>, base: u32) -> Result<Self, Error<E>>
    where
        P: SerialPort<E>,
        D: DelayMs<u32>,
        E: core::fmt::Debug,
    {
        debug!("Loading word copy applet at 0x{:08x}", base);

        monitor.write_block(base, CODE)?;

        Ok(Self { base })
    }

    pub fn base(&self) -> u32 {
        self.base
    }

    /// Size of the applet in target RAM
    pub fn size(&self) -> u32 {
        CODE.len() as u32
    }

    pub fn set_stack<P, D, E>(
        &self,
        monitor: &mut Monitor<P, D, E>,
        stack: u32,
    ) -> Result<(), Error<E>>
    where
        P: SerialPort<E>,
        D: DelayMs<u32>,
        E: core::fmt::Debug,
    {
        trace!("set_stack(0x{:08x})", stack);
        monitor.write_word(self.base + STACK_OFFSET, stack)
    }

    pub fn set_words<P, D, E>(
        &self,
        monitor: &mut Monitor<P, D, E>,
        words: u32,
    ) -> Result<(), Error<E>>
    where
        P: SerialPort<E>,
        D: DelayMs<u32>,
        E: core::fmt::Debug,
    {
        trace!("set_words(0x{:08x})", words);
        monitor.write_word(self.base + WORDS_OFFSET, words)
    }

    pub fn set_source<P, D, E>(
        &self,
        monitor: &mut Monitor<P, D, E>,
        addr: u32,
    ) -> Result<(), Error<E>>
    where
        P: SerialPort<E>,
        D: DelayMs<u32>,
        E: core::fmt::Debug,
    {
        trace!("set_source(0x{:08x})", addr);
        monitor.write_word(self.base + SRC_OFFSET, addr)
    }

    pub fn set_destination<P, D, E>(
        &self,
        monitor: &mut Monitor<P, D, E>,
        addr: u32,
    ) -> Result<(), Error<E>>
    where
        P: SerialPort<E>,
        D: DelayMs<u32>,
        E: core::fmt::Debug,
    {
        trace!("set_destination(0x{:08x})", addr);
        monitor.write_word(self.base + DST_OFFSET, addr)
    }

    /// Execute the applet with its current parameters.
    ///
    /// Does not wait for the copy to complete.
    pub fn run<P, D, E>(&self, monitor: &mut Monitor<P, D, E>) -> Result<(), Error<E>>
    where
        P: SerialPort<E>,
        D: DelayMs<u32>,
        E: core::fmt::Debug,
    {
        trace!("run()");

        // Bit 0 selects Thumb state for the monitor's `bx`
        monitor.write_word(self.base + RESET_OFFSET, self.base + START_OFFSET + 1)?;
        monitor.go(self.base + STACK_OFFSET)
    }
}
