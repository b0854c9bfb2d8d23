//! Simulated SAM-BA monitor on a SAM3X8E.
//!
//! Parses the ASCII command stream, keeps RAM and flash contents, runs the
//! word copy applet on `G` and commits the flash latch on EWP.

#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, VecDeque};
use std::rc::Rc;

use embedded_hal::blocking::delay::DelayMs;
use embedded_hal::serial::{Read, Write};

use sam_ba_loader::applet;
use sam_ba_loader::{Options, Programmer};

pub const SAM3X8E: u32 = 0x285e_0a60;

pub const FLASH_BASE: u32 = 0x0008_0000;
pub const PAGE_SIZE: usize = 256;
pub const PAGES_PER_PLANE: usize = 1024;

pub const APPLET_BASE: u32 = 0x2000_1000;
pub const STACK_TOP: u32 = 0x2001_0000;
pub const BUFFER_A: u32 = APPLET_BASE + 0x34;
pub const BUFFER_B: u32 = BUFFER_A + PAGE_SIZE as u32;

pub const EEFC_BASE: u32 = 0x400e_0a00;

pub const EWP: u32 = 0x03;
pub const SGPB: u32 = 0x0b;
pub const CGPB: u32 = 0x0c;

#[derive(Debug, Clone, PartialEq)]
pub struct MockError;

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    BinaryMode,
    ReadWord(u32),
    WriteWord(u32, u32),
    WriteBlock(u32, Vec<u8>),
    Go(u32),
}

/// Scripted flash status for one plane
#[derive(Debug, Clone, PartialEq)]
pub enum Fsr {
    Ready,
    /// Busy for the first n reads of the session
    ReadyAfter(u32),
    Busy,
    /// Ready with the lock error bit set
    Lock,
}

pub struct Sim {
    pub events: Vec<Event>,
    pub ram: BTreeMap<u32, u8>,
    pub flash: BTreeMap<u32, u8>,
    latch: BTreeMap<u32, u8>,

    /// FCR writes as (plane, value)
    pub fcr: Vec<(usize, u32)>,
    pub fmr: [u32; 2],
    pub fsr: [Fsr; 2],
    pub fsr_reads: [u32; 2],

    pub reset_vector: u32,
    pub chip_id: u32,
    pub chip_id_alt: u32,
    pub sam7_chip_id: u32,

    /// Reply to `N#`
    pub ack: bool,
    /// Truncate word read replies to this many bytes
    pub short_reply: Option<usize>,
    pub disconnected: bool,
    /// Drop the link once this many blocks have been stored
    pub disconnect_after_blocks: Option<usize>,

    /// Applet runs that found a bad image or entry point
    pub bad_runs: u32,

    rx: Vec<u8>,
    block: Option<(u32, usize, Vec<u8>)>,
    tx: VecDeque<u8>,
}

impl Sim {
    pub fn new() -> Rc<RefCell<Sim>> {
        Rc::new(RefCell::new(Sim {
            events: vec![],
            ram: BTreeMap::new(),
            flash: BTreeMap::new(),
            latch: BTreeMap::new(),
            fcr: vec![],
            fmr: [0; 2],
            fsr: [Fsr::Ready, Fsr::Ready],
            fsr_reads: [0; 2],
            reset_vector: 0x2008_7fff,
            chip_id: SAM3X8E,
            chip_id_alt: 0,
            sam7_chip_id: 0,
            ack: true,
            short_reply: None,
            disconnected: false,
            disconnect_after_blocks: None,
            bad_runs: 0,
            rx: vec![],
            block: None,
            tx: VecDeque::new(),
        }))
    }

    fn feed(&mut self, b: u8) {
        if let Some((addr, len, mut data)) = self.block.take() {
            data.push(b);
            if data.len() == len {
                self.store_block(addr, data);
            } else {
                self.block = Some((addr, len, data));
            }
            return;
        }

        if b == b'#' {
            let cmd = String::from_utf8(std::mem::take(&mut self.rx)).unwrap();
            self.exec(&cmd);
        } else {
            self.rx.push(b);
        }
    }

    fn exec(&mut self, cmd: &str) {
        let (op, args) = cmd.split_at(1);
        assert!(
            !args.chars().any(|c| c.is_ascii_lowercase()),
            "hex must be uppercase: {}",
            cmd
        );
        let args: Vec<u32> = args
            .split(',')
            .filter(|a| !a.is_empty())
            .map(|a| u32::from_str_radix(a, 16).unwrap())
            .collect();

        match op {
            "N" => {
                self.events.push(Event::BinaryMode);
                if self.ack {
                    self.tx.extend(b"\n\r");
                }
            }
            "w" => {
                assert_eq!(args[1], 4);
                self.events.push(Event::ReadWord(args[0]));
                let value = self.read_word(args[0]).to_le_bytes();
                let n = self.short_reply.unwrap_or(4);
                self.tx.extend(&value[..n]);
            }
            "W" => {
                self.events.push(Event::WriteWord(args[0], args[1]));
                self.write_word(args[0], args[1]);
            }
            "S" => {
                let len = args[1] as usize;
                if len == 0 {
                    self.store_block(args[0], vec![]);
                } else {
                    self.block = Some((args[0], len, Vec::with_capacity(len)));
                }
            }
            "G" => {
                self.events.push(Event::Go(args[0]));
                self.go(args[0]);
            }
            _ => panic!("unexpected command {:?}", cmd),
        }
    }

    fn store_block(&mut self, addr: u32, data: Vec<u8>) {
        for (i, b) in data.iter().enumerate() {
            self.ram.insert(addr + i as u32, *b);
        }
        self.events.push(Event::WriteBlock(addr, data));

        let blocks = self
            .events
            .iter()
            .filter(|e| matches!(e, Event::WriteBlock(..)))
            .count();
        if self.disconnect_after_blocks == Some(blocks) {
            self.disconnected = true;
        }
    }

    fn eefc_plane(addr: u32) -> Option<(usize, u32)> {
        match addr.checked_sub(EEFC_BASE) {
            Some(o) if o < 0x10 => Some((0, o)),
            Some(o) if o >= 0x200 && o < 0x210 => Some((1, o - 0x200)),
            _ => None,
        }
    }

    fn read_word(&mut self, addr: u32) -> u32 {
        if let Some((plane, 0x08)) = Self::eefc_plane(addr) {
            self.fsr_reads[plane] += 1;
            return match self.fsr[plane] {
                Fsr::Ready => 0x1,
                Fsr::ReadyAfter(n) if self.fsr_reads[plane] > n => 0x1,
                Fsr::ReadyAfter(_) | Fsr::Busy => 0x0,
                Fsr::Lock => 0x5,
            };
        }

        match addr {
            0x0000_0000 => self.reset_vector,
            0x400e_0740 => self.chip_id,
            0x400e_0940 => self.chip_id_alt,
            0xffff_f240 => self.sam7_chip_id,
            _ => self.ram_word(addr),
        }
    }

    fn write_word(&mut self, addr: u32, value: u32) {
        match Self::eefc_plane(addr) {
            Some((plane, 0x00)) => self.fmr[plane] = value,
            Some((plane, 0x04)) => {
                assert_eq!(value >> 24, 0x5a, "bad EEFC key");
                self.fcr.push((plane, value));
                if value & 0xff == EWP {
                    let page = plane * PAGES_PER_PLANE + ((value >> 8) & 0xffff) as usize;
                    self.commit(page);
                }
            }
            Some(_) => panic!("unexpected EEFC write 0x{:08x}", addr),
            None => {
                for (i, b) in value.to_le_bytes().iter().enumerate() {
                    self.ram.insert(addr + i as u32, *b);
                }
            }
        }
    }

    fn go(&mut self, addr: u32) {
        let code: Vec<u8> = (0..applet::CODE.len() as u32)
            .map(|i| self.ram.get(&(APPLET_BASE + i)).copied().unwrap_or(0))
            .collect();

        if addr != APPLET_BASE + applet::STACK_OFFSET
            || code[..0x20] != applet::CODE[..0x20]
            || self.ram_word(APPLET_BASE + applet::RESET_OFFSET) != APPLET_BASE + 1
            || self.ram_word(APPLET_BASE + applet::STACK_OFFSET) != STACK_TOP
        {
            self.bad_runs += 1;
            return;
        }

        let words = self.ram_word(APPLET_BASE + applet::WORDS_OFFSET);
        let src = self.ram_word(APPLET_BASE + applet::SRC_OFFSET);
        let dst = self.ram_word(APPLET_BASE + applet::DST_OFFSET);

        for i in 0..words * 4 {
            let b = self.ram.get(&(src + i)).copied().unwrap_or(0);
            self.latch.insert(dst + i, b);
        }
    }

    fn commit(&mut self, page: usize) {
        let start = FLASH_BASE + (page * PAGE_SIZE) as u32;
        let end = start + PAGE_SIZE as u32;

        for addr in start..end {
            let b = self.latch.remove(&addr).unwrap_or(0xff);
            self.flash.insert(addr, b);
        }
    }

    pub fn ram_word(&self, addr: u32) -> u32 {
        let mut b = [0u8; 4];
        for (i, v) in b.iter_mut().enumerate() {
            *v = self.ram.get(&(addr + i as u32)).copied().unwrap_or(0);
        }
        u32::from_le_bytes(b)
    }

    pub fn flash_bytes(&self, addr: u32, len: usize) -> Vec<u8> {
        (addr..addr + len as u32)
            .map(|a| self.flash.get(&a).copied().unwrap_or(0xff))
            .collect()
    }

    /// Page writes as (plane, page argument)
    pub fn page_writes(&self) -> Vec<(usize, u32)> {
        self.fcr
            .iter()
            .filter(|(_, v)| v & 0xff == EWP)
            .map(|(p, v)| (*p, (v >> 8) & 0xffff))
            .collect()
    }

    /// Blocks written outside the applet
    pub fn page_blocks(&self) -> Vec<(u32, Vec<u8>)> {
        self.events
            .iter()
            .filter_map(|e| match e {
                Event::WriteBlock(a, d) if *a != APPLET_BASE => Some((*a, d.clone())),
                _ => None,
            })
            .collect()
    }

    pub fn runs(&self) -> usize {
        self.events
            .iter()
            .filter(|e| matches!(e, Event::Go(_)))
            .count()
    }

    /// Any command that modifies target state
    pub fn writes(&self) -> usize {
        self.events
            .iter()
            .filter(|e| matches!(e, Event::WriteWord(..) | Event::WriteBlock(..) | Event::Go(_)))
            .count()
    }
}

pub struct MockPort(pub Rc<RefCell<Sim>>);

impl Write<u8> for MockPort {
    type Error = MockError;

    fn write(&mut self, word: u8) -> nb::Result<(), MockError> {
        let mut sim = self.0.borrow_mut();
        if sim.disconnected {
            return Err(nb::Error::Other(MockError));
        }
        sim.feed(word);
        Ok(())
    }

    fn flush(&mut self) -> nb::Result<(), MockError> {
        Ok(())
    }
}

impl Read<u8> for MockPort {
    type Error = MockError;

    fn read(&mut self) -> nb::Result<u8, MockError> {
        let mut sim = self.0.borrow_mut();
        if sim.disconnected {
            return Err(nb::Error::Other(MockError));
        }
        sim.tx.pop_front().ok_or(nb::Error::WouldBlock)
    }
}

/// Delay that only accumulates the requested time
pub struct MockDelay(pub Rc<Cell<u64>>);

impl DelayMs<u32> for MockDelay {
    fn delay_ms(&mut self, ms: u32) {
        self.0.set(self.0.get() + ms as u64);
    }
}

pub type MockProgrammer = Programmer<MockPort, MockDelay, MockError>;

pub fn programmer(sim: &Rc<RefCell<Sim>>, options: Options) -> (MockProgrammer, Rc<Cell<u64>>) {
    let elapsed = Rc::new(Cell::new(0));
    let p = Programmer::new(
        MockPort(sim.clone()),
        MockDelay(elapsed.clone()),
        options,
    );
    (p, elapsed)
}

/// Deterministic test image
pub fn image(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 7 + i / 251) as u8).collect()
}
