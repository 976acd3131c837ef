//! Ferrovisor IOMMU page tables
//!
//! A format generic engine for the radix I/O page tables walked by IOMMU
//! hardware. One walker and one set of operations drive six layouts:
//!
//! - AMD IOMMU v1 host tables ([`arch::Amdv1`])
//! - ARMv7 short descriptors as used by SMMUs and the MediaTek IOMMU ([`arch::Armv7s`])
//! - ARMv8 VMSA long descriptors ([`arch::Armv8`])
//! - Apple DART v1 and v2 ([`arch::Dart`])
//! - Intel VT-d second stage ([`arch::Vtdss`])
//! - x86 PAE / long mode first stage ([`arch::X86Pae`])
//!
//! Tables live in a [`mm::NodeArena`] that plays the role of physical
//! memory: every node has a synthetic physical address that the entries
//! encode, exactly as the hardware would see it. Lookups are lockless;
//! nodes unlinked by unmap are freed only once no walker can still see
//! them.
//!
//! ```ignore
//! let table = PtIommu::<X86Pae>::new(&X86PaeConfig, &PtConfig::new(48, 52), PtHooks::default())?;
//! let mut mapped = 0;
//! table.map_range(0x10_0000, 0x8000_0000, 0x20_0000, IommuProt::READ | IommuProt::WRITE, &mut mapped)?;
//! assert_eq!(table.iova_to_phys(0x10_0000), Some(0x8000_0000));
//! ```

#![cfg_attr(not(test), no_std)]

extern crate alloc;

// Logging macros are used by every module below.
#[macro_use]
pub mod utils;

pub mod arch;
pub mod config;
pub mod iommu;
pub mod mm;
pub mod pt;

pub use arch::{HwInfo, PtFormat};
pub use config::{FmtFeatures, PtConfig, PtFeatures};
pub use iommu::{
    DirtyFlags, DirtyRecorder, IommuDriverOps, IommuOps, IommuProt, IovaBitmap, PtHooks, PtInfo, PtIommu,
    PtStats, TableSnapshot,
};
pub use mm::{DmaSync, IoVirtAddr, PhysAddr};

/// Page table errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// No table node could be allocated
    OutOfMemory,
    /// Address range is misaligned, wraps, or lies outside the table
    InvalidRange,
    /// Something is already mapped where a new translation was requested
    AddressInUse,
    /// Lost a race; the operation can be retried
    TryAgain,
    /// The format or this instance cannot do what was asked
    Unsupported,
    /// The tree does not look the way the operation requires
    InconsistentState,
    /// Configuration rejected
    InvalidArgument,
}

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let msg = match self {
            Error::OutOfMemory => "out of table memory",
            Error::InvalidRange => "invalid address range",
            Error::AddressInUse => "address already mapped",
            Error::TryAgain => "concurrent update, try again",
            Error::Unsupported => "operation not supported",
            Error::InconsistentState => "inconsistent table state",
            Error::InvalidArgument => "invalid argument",
        };
        f.write_str(msg)
    }
}

/// Page table result type
pub type Result<T> = core::result::Result<T, Error>;
