//! Generic protection requests

use bitflags::bitflags;

bitflags! {
    /// Access the device is granted through a mapping
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct IommuProt: u32 {
        /// Device may read
        const READ = 1 << 0;
        /// Device may write
        const WRITE = 1 << 1;
        /// Memory is cacheable and coherent with the CPU
        const CACHE = 1 << 2;
        /// Device may not fetch instructions
        const NOEXEC = 1 << 3;
        /// Target is device MMIO
        const MMIO = 1 << 4;
        /// Privileged access only
        const PRIV = 1 << 5;
    }
}
