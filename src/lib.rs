//! Atmel SAM3 flash programmer over the SAM-BA ROM monitor.
//!
//! The monitor is driven in binary mode over a serial port. A small
//! word-copy applet is loaded into target RAM and re-triggered for every
//! page, copying from a RAM staging buffer into the flash latch before the
//! EEFC is told to erase and write the page.
//!
//! ```no_run
//! # #[cfg(feature = "linux")]
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! use sam_ba_loader::{Options, Programmer};
//!
//! let image = std::fs::read("firmware.bin")?;
//! let mut p = Programmer::linux("/dev/ttyACM0", 115200, Options::default())?;
//! p.program(&image[..], image.len() as u64, None)?;
//! # Ok(())
//! # }
//! # #[cfg(not(feature = "linux"))]
//! # fn main() {}
//! ```

#[macro_use]
extern crate log;

#[macro_use(block)]
extern crate nb;

extern crate embedded_hal;
use embedded_hal::serial::{Read, Write};

#[cfg(feature = "structopt")]
extern crate structopt;

#[cfg(feature = "linux")]
extern crate linux_embedded_hal;

#[cfg(feature = "linux")]
pub mod linux;

pub mod applet;
pub mod chip;
pub mod monitor;
pub mod programmer;
pub mod progress;
pub mod protocol;
pub mod transport;

pub use chip::{ChipProfile, CHIPS};
pub use programmer::{Programmer, Stage, StagingBuffers};
pub use progress::ProgressCallbacks;

/// Serial port usable as a monitor transport
pub trait SerialPort<E>: Write<u8, Error = E> + Read<u8, Error = E> {}

impl<T, E> SerialPort<E> for T where T: Write<u8, Error = E> + Read<u8, Error = E> {}

#[derive(Copy, Clone, PartialEq, Debug)]
pub enum State {
    /// Port attached, monitor not yet contacted
    Init,
    /// Binary mode entered and chip identified
    Connected,
    /// Image transfer in progress
    Programming,
    /// Image written and boot source updated
    Complete,
    /// Session aborted, programming must restart from page 0
    Failed,
}

#[derive(Clone, PartialEq, Debug, thiserror::Error)]
pub enum Error<SerialError> {
    #[error("serial error: {0:?}")]
    Serial(SerialError),

    #[error("response timeout (received {received} of {expected} bytes)")]
    ResponseTimeout { expected: usize, received: usize },

    #[error("serial error at {stage}: {error:?}")]
    Transfer { stage: Stage, error: SerialError },

    #[error("response timeout at {stage} (received {received} of {expected} bytes)")]
    TransferTimeout {
        stage: Stage,
        expected: usize,
        received: usize,
    },

    #[error("unknown chip id 0x{0:08x}")]
    UnknownChip(u32),

    #[error("image of {size} bytes exceeds flash capacity of {capacity} bytes")]
    ImageTooLarge { size: u64, capacity: u64 },

    #[error("page {page} is out of range ({pages} pages)")]
    PageOutOfRange { page: usize, pages: usize },

    #[error("flash lock error on plane {plane} at {stage}")]
    FlashLock { plane: usize, stage: Stage },

    #[error("flash command timeout on plane {plane} at {stage} after {tries} polls")]
    FlashCommandTimeout { plane: usize, stage: Stage, tries: u32 },

    #[error("error reading image: {0:?}")]
    Io(std::io::ErrorKind),
}

impl<SerialError> From<SerialError> for Error<SerialError> {
    fn from(e: SerialError) -> Self {
        Self::Serial(e)
    }
}

impl<SerialError> Error<SerialError> {
    /// Attach the session stage to a link failure
    pub fn at(self, stage: Stage) -> Self {
        match self {
            Error::Serial(error) => Error::Transfer { stage, error },
            Error::ResponseTimeout { expected, received } => Error::TransferTimeout {
                stage,
                expected,
                received,
            },
            e => e,
        }
    }
}

#[derive(Clone, PartialEq, Debug)]
#[cfg_attr(feature = "structopt", derive(structopt::StructOpt))]
pub struct Options {
    /// Timeout to wait for monitor responses
    #[cfg_attr(feature = "structopt", structopt(long, default_value = "100"))]
    pub response_timeout_ms: u32,

    /// Period to poll for monitor responses
    #[cfg_attr(feature = "structopt", structopt(long, default_value = "1"))]
    pub poll_delay_ms: u32,

    /// Number of flash status polls before giving up on a flash command
    #[cfg_attr(feature = "structopt", structopt(long, default_value = "500"))]
    pub fsr_retries: u32,

    /// Period between flash status polls
    #[cfg_attr(feature = "structopt", structopt(long, default_value = "100"))]
    pub fsr_poll_ms: u32,

    /// Time to wait for the boot bit to latch after it is written
    #[cfg_attr(feature = "structopt", structopt(long, default_value = "10000"))]
    pub settle_ms: u32,

    /// Do not switch the boot source to flash after programming
    #[cfg_attr(feature = "structopt", structopt(long))]
    pub no_boot_flash: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            response_timeout_ms: 100,
            poll_delay_ms: 1,
            fsr_retries: 500,
            fsr_poll_ms: 100,
            settle_ms: 10_000,
            no_boot_flash: false,
        }
    }
}
