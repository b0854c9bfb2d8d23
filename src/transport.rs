//! Length-exact binary transport over a serial port.

use core::marker::PhantomData;

use embedded_hal::blocking::delay::DelayMs;

use crate::protocol::{MonitorCommand, BINARY_MODE_ACK_LEN};
use crate::{Error, Options, SerialPort};

pub struct Transport<P, D, E> {
    port: P,
    delay: D,
    response_timeout_ms: u32,
    poll_delay_ms: u32,
    _err: PhantomData<E>,
}

impl<P, D, E> Transport<P, D, E>
where
    P: SerialPort<E>,
    D: DelayMs<u32>,
    E: core::fmt::Debug,
{
    /// Create a transport over an opened port
    pub fn new(port: P, delay: D, options: &Options) -> Self {
        Self {
            port,
            delay,
            response_timeout_ms: options.response_timeout_ms,
            poll_delay_ms: options.poll_delay_ms,
            _err: PhantomData,
        }
    }

    /// Force the monitor into binary mode.
    ///
    /// The two byte acknowledgement is discarded, a monitor that is already
    /// in binary mode may not send it.
    pub fn handshake(&mut self) -> Result<(), Error<E>> {
        debug!("Switching monitor to binary mode");

        self.send(MonitorCommand::BinaryMode.encode().as_bytes())?;
        self.flush()?;

        let mut ack = [0u8; BINARY_MODE_ACK_LEN];
        match self.receive(&mut ack) {
            Ok(()) => Ok(()),
            Err(Error::ResponseTimeout { received, .. }) => {
                warn!("Binary mode ack missing ({} bytes received)", received);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Write bytes to the port
    pub fn send(&mut self, data: &[u8]) -> Result<(), Error<E>> {
        for b in data {
            block!(self.port.write(*b))?;
        }
        Ok(())
    }

    /// Fill `data` from the port, failing if the response timeout elapses
    /// before every byte has arrived
    pub fn receive(&mut self, data: &mut [u8]) -> Result<(), Error<E>> {
        let mut t: u32 = 0;
        let mut n = 0;

        while n < data.len() {
            match self.port.read() {
                Ok(v) => {
                    data[n] = v;
                    n += 1;
                    continue;
                }
                Err(nb::Error::WouldBlock) => (),
                Err(nb::Error::Other(e)) => return Err(e.into()),
            }

            if t >= self.response_timeout_ms {
                error!("Receive timeout ({} of {} bytes)", n, data.len());
                return Err(Error::ResponseTimeout {
                    expected: data.len(),
                    received: n,
                });
            }

            self.delay.delay_ms(self.poll_delay_ms);
            t = t.saturating_add(self.poll_delay_ms.max(1));
        }

        Ok(())
    }

    /// Wait for buffered writes to reach the port
    pub fn flush(&mut self) -> Result<(), Error<E>> {
        block!(self.port.flush())?;
        Ok(())
    }

    /// Sleep using the transport's delay provider
    pub fn delay_ms(&mut self, ms: u32) {
        self.delay.delay_ms(ms);
    }
}
