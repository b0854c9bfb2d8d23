//! Supported chips and their flash parameters.
//!
//! Adding a part means adding a row to [`CHIPS`].

use crate::protocol::EEFC_PLANE_STRIDE;

#[derive(Clone, PartialEq, Debug)]
pub struct ChipProfile {
    /// Value of the chip ID register
    pub id: u32,
    pub name: &'static str,
    /// Address of page 0
    pub flash_base: u32,
    /// Total number of pages across all planes
    pub pages: usize,
    /// Page size in bytes
    pub page_size: usize,
    /// Number of independent flash planes (1 or 2)
    pub planes: usize,
    pub lock_regions: usize,
    /// Start of RAM usable for the applet and staging buffers
    pub ram_user_base: u32,
    /// Initial stack pointer for the applet
    pub ram_stack_top: u32,
    /// EEFC register block of plane 0
    pub eefc_base: u32,
    /// GPNVM bit 0 also controls brown-out detection
    pub can_brownout: bool,
}

const fn sam3x8(id: u32, name: &'static str) -> ChipProfile {
    ChipProfile {
        id,
        name,
        flash_base: 0x0008_0000,
        pages: 2048,
        page_size: 256,
        planes: 2,
        lock_regions: 32,
        ram_user_base: 0x2000_1000,
        ram_stack_top: 0x2001_0000,
        eefc_base: 0x400e_0a00,
        can_brownout: false,
    }
}

pub const CHIPS: &[ChipProfile] = &[
    sam3x8(0x286e_0a60, "ATSAM3X8H"),
    sam3x8(0x285e_0a60, "ATSAM3X8E"),
    sam3x8(0x284e_0a60, "ATSAM3X8C"),
];

impl ChipProfile {
    /// Find the profile for a chip ID
    pub fn lookup(id: u32) -> Option<&'static ChipProfile> {
        CHIPS.iter().find(|c| c.id == id)
    }

    /// Flash capacity in bytes
    pub fn capacity(&self) -> u64 {
        self.page_size as u64 * self.pages as u64
    }

    pub fn pages_per_plane(&self) -> usize {
        self.pages / self.planes
    }

    /// Plane holding a page and the page number relative to that plane
    pub fn plane_for_page(&self, page: usize) -> (usize, usize) {
        let per_plane = self.pages_per_plane();
        (page / per_plane, page % per_plane)
    }

    /// Address of an EEFC register on a plane
    pub fn eefc_register(&self, plane: usize, offset: u32) -> u32 {
        self.eefc_base + plane as u32 * EEFC_PLANE_STRIDE + offset
    }

    /// GPNVM argument for the boot-from-flash command
    pub fn boot_flag_value(&self) -> u32 {
        if self.can_brownout {
            3
        } else {
            1
        }
    }
}
