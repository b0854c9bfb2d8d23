//! SAM-BA monitor primitives.

use embedded_hal::blocking::delay::DelayMs;

use crate::protocol::*;
use crate::transport::Transport;
use crate::{Error, Options, SerialPort};

pub struct Monitor<P, D, E> {
    transport: Transport<P, D, E>,
}

impl<P, D, E> Monitor<P, D, E>
where
    P: SerialPort<E>,
    D: DelayMs<u32>,
    E: core::fmt::Debug,
{
    pub fn new(port: P, delay: D, options: &Options) -> Self {
        Self {
            transport: Transport::new(port, delay, options),
        }
    }

    /// Enter binary mode, must precede any other command
    pub fn connect(&mut self) -> Result<(), Error<E>> {
        self.transport.handshake()
    }

    /// Read a 32-bit word from target memory
    pub fn read_word(&mut self, addr: u32) -> Result<u32, Error<E>> {
        self.transport
            .send(MonitorCommand::ReadWord(addr).encode().as_bytes())?;

        let mut data = [0u8; 4];
        self.transport.receive(&mut data)?;
        let value = u32::from_le_bytes(data);

        trace!("read_word(addr=0x{:08x})=0x{:08x}", addr, value);

        Ok(value)
    }

    /// Write a 32-bit word to target memory
    pub fn write_word(&mut self, addr: u32, value: u32) -> Result<(), Error<E>> {
        trace!("write_word(addr=0x{:08x}, 0x{:08x})", addr, value);

        self.transport
            .send(MonitorCommand::WriteWord(addr, value).encode().as_bytes())?;
        self.transport.flush()
    }

    /// Write a raw block of bytes to target memory
    pub fn write_block(&mut self, addr: u32, data: &[u8]) -> Result<(), Error<E>> {
        trace!("write_block(addr=0x{:08x}, count={})", addr, data.len());

        self.transport
            .send(MonitorCommand::SendFile(addr, data).encode().as_bytes())?;
        self.transport.flush()?;

        self.transport.send(data)?;
        self.transport.flush()
    }

    /// Branch to `addr`.
    ///
    /// The routine is expected to return to the monitor, but nothing on the
    /// wire confirms it. Callers poll target state instead.
    pub fn go(&mut self, addr: u32) -> Result<(), Error<E>> {
        trace!("go(addr=0x{:08x})", addr);

        self.transport
            .send(MonitorCommand::Go(addr).encode().as_bytes())?;
        self.transport.flush()
    }

    /// Read the chip identifier
    pub fn chip_id(&mut self) -> Result<u32, Error<E>> {
        let vector = self.read_word(RESET_VECTOR_ADDR)?;

        // An ARM7TDMI branch at the reset vector means a SAM7
        if vector & ARM7_BRANCH_MASK == ARM7_BRANCH_OPCODE {
            debug!("ARM7 reset vector 0x{:08x}, reading SAM7 chip id", vector);
            return self.read_word(SAM7_CHIPID_ADDR);
        }

        debug!("Cortex-M reset vector 0x{:08x}, reading SAM3 chip id", vector);

        match self.read_word(SAM3_CHIPID_ADDR)? {
            0 => self.read_word(SAM3_CHIPID_ALT_ADDR),
            id => Ok(id),
        }
    }

    /// Sleep for `ms` milliseconds
    pub fn delay_ms(&mut self, ms: u32) {
        self.transport.delay_ms(ms)
    }
}
