//! Utility functions and data structures
//!
//! Bit and log2 arithmetic shared by every page table format, the
//! logging helpers and the bitmap used for dirty tracking.

#[macro_use]
pub mod log;
pub mod bitmap;
pub mod bits;
pub mod log2;

pub use self::bitmap::Bitmap;

/// Round `addr` up to a power-of-two `align`
#[macro_export]
macro_rules! align_up {
    ($addr:expr, $align:expr) => {
        (($addr + $align - 1) & !($align - 1))
    };
}

/// Round `addr` down to a power-of-two `align`
#[macro_export]
macro_rules! align_down {
    ($addr:expr, $align:expr) => {
        ($addr & !($align - 1))
    };
}

/// Check whether `addr` is a multiple of the power-of-two `align`
#[macro_export]
macro_rules! is_aligned {
    ($addr:expr, $align:expr) => {
        $addr & ($align - 1) == 0
    };
}
