//! Flash programming session.
//!
//! Each page is streamed into one of two RAM staging buffers, copied into
//! the flash latch by the word copy applet, then committed with an EEFC
//! erase-and-write-page command. The staging buffers alternate every page.

use std::fmt;
use std::io::{ErrorKind, Read};

use embedded_hal::blocking::delay::DelayMs;

use crate::applet::WordCopyApplet;
use crate::chip::ChipProfile;
use crate::monitor::Monitor;
use crate::progress::ProgressCallbacks;
use crate::protocol::*;
use crate::{Error, Options, SerialPort, State};

/// Point in a session at which a flash status check ran
#[derive(Copy, Clone, PartialEq, Debug)]
pub enum Stage {
    /// Before copying the given page into the flash latch
    Page(usize),
    /// Around the boot source update
    BootFlag,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Page(n) => write!(f, "page {}", n),
            Stage::BootFlag => write!(f, "boot flag update"),
        }
    }
}

/// Ping-pong page buffers in target RAM
#[derive(Clone, PartialEq, Debug)]
pub struct StagingBuffers {
    a: u32,
    b: u32,
    on_b: bool,
}

impl StagingBuffers {
    /// Two adjacent buffers of `page_size` bytes starting at `base`
    pub fn new(base: u32, page_size: usize) -> Self {
        Self {
            a: base,
            b: base + page_size as u32,
            on_b: false,
        }
    }

    /// Buffer to load the next page into
    pub fn current(&self) -> u32 {
        if self.on_b {
            self.b
        } else {
            self.a
        }
    }

    pub fn swap(&mut self) {
        self.on_b = !self.on_b;
    }
}

struct Session {
    applet: WordCopyApplet,
    buffers: StagingBuffers,
}

/// Number of pages needed to hold `size` bytes
pub fn page_count(size: u64, page_size: usize) -> u64 {
    (size + page_size as u64 - 1) / page_size as u64
}

pub struct Programmer<P, D, E> {
    state: State,
    options: Options,
    monitor: Monitor<P, D, E>,
    chip: Option<&'static ChipProfile>,
}

impl<P, D, E> Programmer<P, D, E>
where
    P: SerialPort<E>,
    D: DelayMs<u32>,
    E: core::fmt::Debug,
{
    /// Create a new programmer instance
    pub fn new(port: P, delay: D, options: Options) -> Self {
        let monitor = Monitor::new(port, delay, &options);
        Self {
            state: State::Init,
            options,
            monitor,
            chip: None,
        }
    }

    /// Fetch the programmer state
    pub fn state(&self) -> State {
        self.state
    }

    /// Profile of the connected chip, once detected
    pub fn chip(&self) -> Option<&'static ChipProfile> {
        self.chip
    }

    /// Enter binary mode and identify the chip
    pub fn init(&mut self) -> Result<&'static ChipProfile, Error<E>> {
        let r = self.detect();
        self.track(r)
    }

    /// Write `size` bytes of `image` to flash, starting at page 0, then
    /// switch the boot source to flash unless disabled in [`Options`].
    ///
    /// Any failure aborts the session, a retry must start over.
    pub fn program<R: Read>(
        &mut self,
        image: R,
        size: u64,
        progress: Option<&mut dyn ProgressCallbacks>,
    ) -> Result<(), Error<E>> {
        let r = self.write_image(image, size, progress);
        self.track(r)
    }

    /// Select the boot source: flash when `enable` is set, otherwise the ROM
    /// monitor
    pub fn set_boot_flash(&mut self, enable: bool) -> Result<(), Error<E>> {
        let r = self.write_boot_flag(enable);
        self.track(r)
    }

    fn track<T>(&mut self, r: Result<T, Error<E>>) -> Result<T, Error<E>> {
        if r.is_err() {
            self.state = State::Failed;
        }
        r
    }

    fn detect(&mut self) -> Result<&'static ChipProfile, Error<E>> {
        debug!("Connecting to monitor");
        self.monitor.connect()?;

        let id = self.monitor.chip_id()?;
        let chip = match ChipProfile::lookup(id) {
            Some(c) => c,
            None => {
                error!("Unknown chip id 0x{:08x}", id);
                return Err(Error::UnknownChip(id));
            }
        };

        info!("Found {} (chip id 0x{:08x})", chip.name, id);

        self.chip = Some(chip);
        self.state = State::Connected;

        Ok(chip)
    }

    fn connected(&mut self) -> Result<&'static ChipProfile, Error<E>> {
        match self.chip {
            Some(c) => Ok(c),
            None => self.detect(),
        }
    }

    fn write_image<R: Read>(
        &mut self,
        image: R,
        size: u64,
        mut progress: Option<&mut dyn ProgressCallbacks>,
    ) -> Result<(), Error<E>> {
        let chip = self.connected()?;

        if size > chip.capacity() {
            error!("Image too large: {} > {} bytes", size, chip.capacity());
            return Err(Error::ImageTooLarge {
                size,
                capacity: chip.capacity(),
            });
        }
        let pages = page_count(size, chip.page_size) as usize;

        if pages == 0 {
            warn!("Empty image, leaving flash and boot source untouched");
            self.state = State::Complete;
            return Ok(());
        }

        self.state = State::Programming;
        info!("Writing {} bytes ({} pages) to {}", size, pages, chip.name);

        let mut session = self.setup(chip)?;

        if let Some(p) = progress.as_mut() {
            p.init(chip.flash_base, pages);
        }

        let mut image = image.take(size);
        let mut data = vec![0u8; chip.page_size];
        let mut read = 0u64;

        for page in 0..pages {
            let n = read_page(&mut image, &mut data)?;
            read += n as u64;

            if n < data.len() && read < size {
                error!("Image ended after {} of {} bytes", read, size);
                return Err(Error::Io(ErrorKind::UnexpectedEof));
            }

            if n < data.len() {
                debug!("Padding page {} with {} bytes", page, data.len() - n);
                for b in &mut data[n..] {
                    *b = 0;
                }
            }

            self.write_page(chip, &mut session, page, &data)
                .map_err(|e| e.at(Stage::Page(page)))?;

            if let Some(p) = progress.as_mut() {
                p.update(page + 1);
            }
        }

        if !self.options.no_boot_flash {
            self.write_boot_flag(true)?;
        } else {
            let last = Stage::Page(pages - 1);
            self.wait_fsr(chip, last).map_err(|e| e.at(last))?;
        }

        if let Some(p) = progress.as_mut() {
            p.finish();
        }

        info!("Programming complete");
        self.state = State::Complete;

        Ok(())
    }

    fn setup(&mut self, chip: &ChipProfile) -> Result<Session, Error<E>> {
        let applet = WordCopyApplet::load(&mut self.monitor, chip.ram_user_base)?;
        applet.set_words(&mut self.monitor, (chip.page_size / 4) as u32)?;
        applet.set_stack(&mut self.monitor, chip.ram_stack_top)?;

        // SAM3 errata: FWS must be 6 while programming
        for plane in 0..chip.planes {
            self.write_register(chip, plane, EEFC_FMR, EEFC_FMR_ERRATA_FWS)?;
        }

        let buffers = StagingBuffers::new(applet.base() + applet.size(), chip.page_size);

        Ok(Session { applet, buffers })
    }

    fn write_page(
        &mut self,
        chip: &ChipProfile,
        session: &mut Session,
        page: usize,
        data: &[u8],
    ) -> Result<(), Error<E>> {
        if page >= chip.pages {
            return Err(Error::PageOutOfRange {
                page,
                pages: chip.pages,
            });
        }

        let buffer = session.buffers.current();
        let addr = chip.flash_base + (page * chip.page_size) as u32;

        debug!("Page {} -> 0x{:08x} via 0x{:08x}", page, addr, buffer);

        self.monitor.write_block(buffer, data)?;

        session.applet.set_destination(&mut self.monitor, addr)?;
        session.applet.set_source(&mut self.monitor, buffer)?;

        self.wait_fsr(chip, Stage::Page(page))?;
        session.applet.run(&mut self.monitor)?;

        let (plane, arg) = chip.plane_for_page(page);
        self.write_fcr(chip, plane, FlashCommand::EraseWritePage, arg as u32)?;

        session.buffers.swap();

        Ok(())
    }

    fn write_boot_flag(&mut self, enable: bool) -> Result<(), Error<E>> {
        let chip = self.connected()?;

        let cmd = if enable {
            FlashCommand::SetGpnvmBit
        } else {
            FlashCommand::ClearGpnvmBit
        };
        info!("Setting boot source to {}", if enable { "flash" } else { "ROM" });

        self.wait_fsr(chip, Stage::BootFlag)
            .and_then(|_| self.write_fcr(chip, 0, cmd, chip.boot_flag_value()))
            .and_then(|_| self.wait_fsr(chip, Stage::BootFlag))
            .map_err(|e| e.at(Stage::BootFlag))?;

        debug!("Waiting {} ms for boot flag to latch", self.options.settle_ms);
        self.monitor.delay_ms(self.options.settle_ms);

        Ok(())
    }

    /// Poll the status of every plane until all are ready
    fn wait_fsr(&mut self, chip: &ChipProfile, stage: Stage) -> Result<(), Error<E>> {
        let mut busy = None;

        for attempt in 0..self.options.fsr_retries {
            busy = None;

            for plane in 0..chip.planes {
                let fsr = self
                    .monitor
                    .read_word(chip.eefc_register(plane, EEFC_FSR))?;

                if fsr & EEFC_FSR_FLOCKE != 0 {
                    error!("Flash lock error on plane {} at {}", plane, stage);
                    return Err(Error::FlashLock { plane, stage });
                }

                if fsr & EEFC_FSR_FRDY == 0 && busy.is_none() {
                    busy = Some(plane);
                }
            }

            if busy.is_none() {
                return Ok(());
            }

            if attempt + 1 < self.options.fsr_retries {
                self.monitor.delay_ms(self.options.fsr_poll_ms);
            }
        }

        let plane = busy.unwrap_or(0);
        error!("Flash command timeout on plane {} at {}", plane, stage);

        Err(Error::FlashCommandTimeout {
            plane,
            stage,
            tries: self.options.fsr_retries,
        })
    }

    fn write_fcr(
        &mut self,
        chip: &ChipProfile,
        plane: usize,
        cmd: FlashCommand,
        arg: u32,
    ) -> Result<(), Error<E>> {
        debug!("FCR{} {:?} 0x{:x}", plane, cmd, arg);
        self.write_register(chip, plane, EEFC_FCR, cmd.word(arg))
    }

    fn write_register(
        &mut self,
        chip: &ChipProfile,
        plane: usize,
        offset: u32,
        value: u32,
    ) -> Result<(), Error<E>> {
        self.monitor
            .write_word(chip.eefc_register(plane, offset), value)
    }
}

/// Read up to one page from the image, returning the byte count
fn read_page<R: Read, E>(image: &mut R, data: &mut [u8]) -> Result<usize, Error<E>> {
    let mut n = 0;

    while n < data.len() {
        match image.read(&mut data[n..]) {
            Ok(0) => break,
            Ok(k) => n += k,
            Err(e) if e.kind() == ErrorKind::Interrupted => (),
            Err(e) => return Err(Error::Io(e.kind())),
        }
    }

    Ok(n)
}
