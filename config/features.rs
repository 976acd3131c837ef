//! Feature sets
//!
//! Universal features apply to every format. Format specific extension bits
//! live in a separate bitflags type per format and are joined in the
//! [`FmtFeatures`] tagged union, so two formats can never hand out the same
//! bit with different meanings.

use bitflags::bitflags;

use crate::arch::armv7s::Armv7sFeatures;
use crate::arch::armv8::Armv8Features;
use crate::arch::dart::DartFeatures;

bitflags! {
    /// Features understood by the generic walker
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct PtFeatures: u32 {
        /// The walker cannot see CPU caches; table memory is flushed explicitly
        const DMA_INCOHERENT = 1 << 0;
        /// A present leaf may be re-expressed with a different size without going
        /// through a non-present state
        const OA_SIZE_CHANGE = 1 << 1;
        /// A present leaf may be exchanged for a table with identical translation
        const OA_TABLE_XCHG = 1 << 2;
        /// The root spans the entire VA word of the format
        const FULL_VA = 1 << 3;
        /// The root level grows on demand
        const DYNAMIC_TOP = 1 << 4;
    }
}

/// Format specific extension features
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FmtFeatures {
    /// AMD IOMMU v1 has no extension bits
    Amdv1,
    /// ARMv7 short descriptor
    Armv7s(Armv7sFeatures),
    /// ARMv8 VMSA long descriptor
    Armv8(Armv8Features),
    /// Apple DART
    Dart(DartFeatures),
    /// Intel VT-d second stage has no extension bits
    Vtdss,
    /// x86 PAE has no extension bits
    X86Pae,
}

impl FmtFeatures {
    /// Name of the format the extension set belongs to
    pub fn format_name(&self) -> &'static str {
        match self {
            FmtFeatures::Amdv1 => "amdv1",
            FmtFeatures::Armv7s(_) => "armv7s",
            FmtFeatures::Armv8(_) => "armv8",
            FmtFeatures::Dart(_) => "dart",
            FmtFeatures::Vtdss => "vtdss",
            FmtFeatures::X86Pae => "x86pae",
        }
    }
}
