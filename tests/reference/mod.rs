//! Hand-encoded entries, written straight from the hardware manuals
//!
//! Nothing here uses the crate's own encoders so a bit slip on either side
//! shows up as a mismatch.

#![allow(dead_code)]

use ferrovisor_iopt::TableSnapshot;

/// Access requested for a leaf
#[derive(Debug, Clone, Copy)]
pub struct Access {
    pub read: bool,
    pub write: bool,
}

pub const RW: Access = Access {
    read: true,
    write: true,
};

pub const RO: Access = Access {
    read: true,
    write: false,
};

/// Follow `path` down the snapshot and return the table it ends in
pub fn table_at<'a>(root: &'a TableSnapshot, path: &[u32]) -> &'a TableSnapshot {
    path.iter().fold(root, |table, &index| {
        table
            .child(index)
            .unwrap_or_else(|| panic!("no table below index {index} at level {}", table.level))
    })
}

pub mod x86pae {
    use super::Access;

    pub fn leaf(oa: u64, level: u32, access: Access) -> u64 {
        // P, U, A, D
        let mut entry = 0x1 | 0x4 | 0x20 | 0x40 | oa;
        if access.write {
            entry |= 0x2;
        }
        if level > 0 {
            // PS
            entry |= 0x80;
        }
        entry
    }

    pub fn table(pa: u64) -> u64 {
        // P, RW, U, A
        0x1 | 0x2 | 0x4 | 0x20 | pa
    }
}

pub mod vtdss {
    use super::Access;

    pub fn leaf(oa: u64, level: u32, access: Access, snoop: bool) -> u64 {
        // R is always set, VT-d has no present bit
        let mut entry = 0x1 | oa;
        if access.write {
            entry |= 0x2;
        }
        if level > 0 {
            entry |= 0x80;
        }
        if snoop {
            entry |= 0x800;
        }
        entry
    }

    pub fn table(pa: u64) -> u64 {
        0x3 | pa
    }
}

pub mod amdv1 {
    use super::Access;

    const PR: u64 = 1;
    const FC: u64 = 1 << 60;
    const IR: u64 = 1 << 61;
    const IW: u64 = 1 << 62;

    /// Leaf of `2^lg2sz` bytes as found in every slot it covers
    pub fn leaf(oa: u64, level: u32, lg2sz: u32, access: Access) -> u64 {
        let isz = 12 + 9 * level;
        let mut entry = PR | FC | oa;
        if access.read {
            entry |= IR;
        }
        if access.write {
            entry |= IW;
        }
        if lg2sz > isz {
            // NextLevel 7, size as a run of ones below the OA
            entry |= 7 << 9;
            entry |= ((1u64 << (lg2sz - 13)) - 1) << 12;
        }
        entry
    }

    pub fn table(pa: u64, level: u32) -> u64 {
        PR | IR | IW | ((level as u64) << 9) | pa
    }
}

pub mod armv8 {
    use super::Access;

    const VALID: u64 = 1;
    const PAGE_OR_TABLE: u64 = 1 << 1;
    const AP_UNPRIV: u64 = 1 << 6;
    const AP_RDONLY: u64 = 1 << 7;
    /// Outer shareable
    const SH_OS: u64 = 2 << 8;
    const AF: u64 = 1 << 10;
    const NG: u64 = 1 << 11;
    const CONTIG: u64 = 1 << 52;

    /// Stage 1, 4K granule, unprivileged, normal non-cacheable
    pub fn leaf(oa: u64, level: u32, access: Access) -> u64 {
        let mut entry = VALID | oa | AP_UNPRIV | SH_OS | AF | NG;
        if level == 0 {
            entry |= PAGE_OR_TABLE;
        }
        if !access.write {
            entry |= AP_RDONLY;
        }
        entry
    }

    /// Slot `i` of a contiguous run starting at `oa`, 4K granule
    pub fn contig_leaf(oa: u64, level: u32, access: Access, i: u32) -> u64 {
        granule_contig_leaf(oa, 12 + 9 * level, level, access, i)
    }

    /// Slot `i` of a contiguous run of `2^isz` byte items starting at `oa`
    pub fn granule_contig_leaf(oa: u64, isz: u32, level: u32, access: Access, i: u32) -> u64 {
        leaf(oa + ((i as u64) << isz), level, access) | CONTIG
    }

    /// 64K granule OA field with OA bits [51:48] moved down to [15:12]
    pub fn lpa_oa(oa: u64) -> u64 {
        (oa & 0x0000_ffff_ffff_0000) | ((oa >> 48) << 12)
    }

    pub fn table(pa: u64) -> u64 {
        VALID | PAGE_OR_TABLE | pa
    }
}

pub mod armv7s {
    use super::Access;

    /// Small page, normal memory, unprivileged
    pub fn small_page(oa: u64, access: Access) -> u64 {
        // type 2, AP0, AP1, TEX 1, S, nG
        let mut entry = 0x2 | (1 << 4) | (1 << 5) | (1 << 6) | (1 << 10) | (1 << 11) | oa;
        if !access.write {
            // AP2
            entry |= 1 << 9;
        }
        entry
    }

    /// 1M section, normal memory, unprivileged
    pub fn section(oa: u64, access: Access) -> u64 {
        // type 2, AP0, AP1, TEX 1, S, nG
        let mut entry = 0x2 | (1 << 10) | (1 << 11) | (1 << 12) | (1 << 16) | (1 << 17) | oa;
        if !access.write {
            entry |= 1 << 15;
        }
        entry
    }

    pub fn table(pa: u64) -> u64 {
        0x1 | pa
    }
}

pub mod dart {
    use super::Access;

    /// Version 1, 4K pages
    pub fn leaf(oa: u64, access: Access) -> u64 {
        // VALID, SP_DIS, subpage end 0xfff
        let mut entry = 0x1 | 0x2 | (0xfff << 40) | oa;
        if !access.write {
            entry |= 1 << 7;
        }
        if !access.read {
            entry |= 1 << 8;
        }
        entry
    }

    pub fn table(pa: u64) -> u64 {
        0x1 | pa
    }

    /// Version 2, 16K pages; OA bits [41:14] sit at [37:10]
    pub fn v2_leaf(oa: u64, access: Access) -> u64 {
        // VALID, NO_CACHE, subpage end 0xfff
        let mut entry = 0x1 | 0x2 | (0xfff << 40) | (oa >> 4);
        if !access.write {
            entry |= 1 << 2;
        }
        if !access.read {
            entry |= 1 << 3;
        }
        entry
    }

    pub fn v2_table(pa: u64) -> u64 {
        0x1 | (pa >> 4)
    }
}
