//! SAM-BA monitor command grammar and EEFC flash controller constants.
//!
//! Commands are ASCII, with addresses and lengths as eight uppercase hex
//! digits, each terminated by `#`.

/// Command terminator
pub const TERMINATOR: char = '#';

/// Length of the reply to the binary mode switch (`\n\r`)
pub const BINARY_MODE_ACK_LEN: usize = 2;

/// Address of the ARM reset vector, used for core detection
pub const RESET_VECTOR_ADDR: u32 = 0x0000_0000;

/// ARM7TDMI `b` instruction pattern found at the reset vector of SAM7 parts
pub const ARM7_BRANCH_MASK: u32 = 0xff00_0000;
pub const ARM7_BRANCH_OPCODE: u32 = 0xea00_0000;

/// SAM7 chip ID register (DBGU_CIDR)
pub const SAM7_CHIPID_ADDR: u32 = 0xffff_f240;

/// SAM3 chip ID register (CHIPID_CIDR)
pub const SAM3_CHIPID_ADDR: u32 = 0x400e_0740;

/// SAM3 chip ID register on parts that relocate the CHIPID block
pub const SAM3_CHIPID_ALT_ADDR: u32 = 0x400e_0940;

#[derive(Debug, PartialEq, Clone)]
pub enum MonitorCommand<'a> {
    /// Switch the monitor into binary (non-interactive) mode
    BinaryMode,

    /// Read a 32-bit word, replies with 4 little-endian bytes
    ReadWord(u32),

    /// Write a 32-bit word, no reply
    WriteWord(u32, u32),

    /// Announce a raw block of bytes to be written at an address.
    /// The block itself follows the command on the wire.
    SendFile(u32, &'a [u8]),

    /// Branch to an address, no reply is awaited
    Go(u32),
}

impl<'a> MonitorCommand<'a> {
    /// Render the ASCII form of the command
    pub fn encode(&self) -> String {
        match self {
            MonitorCommand::BinaryMode => format!("N{}", TERMINATOR),
            MonitorCommand::ReadWord(addr) => format!("w{:08X},4{}", addr, TERMINATOR),
            MonitorCommand::WriteWord(addr, value) => {
                format!("W{:08X},{:08X}{}", addr, value, TERMINATOR)
            }
            MonitorCommand::SendFile(addr, data) => {
                format!("S{:08X},{:08X}{}", addr, data.len(), TERMINATOR)
            }
            MonitorCommand::Go(addr) => format!("G{:08X}{}", addr, TERMINATOR),
        }
    }
}

/// Key that must accompany every EEFC command
pub const EEFC_KEY: u32 = 0x5a;

/// Offset between the register blocks of the two flash planes
pub const EEFC_PLANE_STRIDE: u32 = 0x200;

/// Flash mode register
pub const EEFC_FMR: u32 = 0x00;
/// Flash command register
pub const EEFC_FCR: u32 = 0x04;
/// Flash status register
pub const EEFC_FSR: u32 = 0x08;
/// Flash result register
pub const EEFC_FRR: u32 = 0x0c;

/// FSR: controller ready
pub const EEFC_FSR_FRDY: u32 = 1 << 0;
/// FSR: command error
pub const EEFC_FSR_FCMDE: u32 = 1 << 1;
/// FSR: lock error
pub const EEFC_FSR_FLOCKE: u32 = 1 << 2;

/// Flash wait states required by the SAM3 errata
pub const EEFC_FMR_ERRATA_FWS: u32 = 6 << 8;

#[derive(Debug, PartialEq, Clone, Copy)]
pub enum FlashCommand {
    /// Get flash descriptor
    GetDescriptor = 0x0,
    /// Write page
    WritePage = 0x1,
    /// Write page and lock
    WritePageLock = 0x2,
    /// Erase page and write page
    EraseWritePage = 0x3,
    /// Erase page, write page and lock
    EraseWritePageLock = 0x4,
    /// Erase all
    EraseAll = 0x5,
    /// Set lock bit
    SetLockBit = 0x8,
    /// Clear lock bit
    ClearLockBit = 0x9,
    /// Get lock bit
    GetLockBit = 0xa,
    /// Set general purpose NVM bit
    SetGpnvmBit = 0xb,
    /// Clear general purpose NVM bit
    ClearGpnvmBit = 0xc,
    /// Get general purpose NVM bit
    GetGpnvmBit = 0xd,
}

impl FlashCommand {
    /// Build the FCR value that issues this command with an argument
    pub fn word(self, arg: u32) -> u32 {
        (EEFC_KEY << 24) | ((arg & 0xffff) << 8) | self as u32
    }
}
