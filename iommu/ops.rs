//! Format erased operations
//!
//! Drivers that pick the format at probe time hold a
//! `Box<dyn IommuOps>` instead of naming `PtIommu<F>`.

use alloc::boxed::Box;

use crate::arch::{HwInfo, PtFormat};
use crate::mm::{IoVirtAddr, PhysAddr};
use crate::Result;

use super::dirty::{DirtyFlags, DirtyRecorder};
use super::{IommuProt, PtInfo, PtIommu};

/// Operations every IOMMU page table offers
pub trait IommuOps: Send + Sync {
    /// Short name of the table format
    fn format_name(&self) -> &'static str;

    fn map_range(
        &self,
        iova: IoVirtAddr,
        paddr: PhysAddr,
        len: u64,
        prot: IommuProt,
        mapped: &mut u64,
    ) -> Result<()>;

    fn unmap_range(&self, iova: IoVirtAddr, len: u64) -> Result<u64>;

    fn iova_to_phys(&self, iova: IoVirtAddr) -> Option<PhysAddr>;

    fn cut_mapping(&self, iova: IoVirtAddr) -> Result<()>;

    fn read_and_clear_dirty(
        &self,
        iova: IoVirtAddr,
        len: u64,
        flags: DirtyFlags,
        dirty: &mut dyn DirtyRecorder,
    ) -> Result<()>;

    fn set_dirty(&self, iova: IoVirtAddr) -> Result<()>;

    fn get_info(&self) -> PtInfo;

    fn hw_info(&self) -> HwInfo;

    /// Release every table
    fn deinit(self: Box<Self>);
}

impl<F: PtFormat> IommuOps for PtIommu<F> {
    fn format_name(&self) -> &'static str {
        F::NAME
    }

    fn map_range(
        &self,
        iova: IoVirtAddr,
        paddr: PhysAddr,
        len: u64,
        prot: IommuProt,
        mapped: &mut u64,
    ) -> Result<()> {
        PtIommu::map_range(self, iova, paddr, len, prot, mapped)
    }

    fn unmap_range(&self, iova: IoVirtAddr, len: u64) -> Result<u64> {
        PtIommu::unmap_range(self, iova, len)
    }

    fn iova_to_phys(&self, iova: IoVirtAddr) -> Option<PhysAddr> {
        PtIommu::iova_to_phys(self, iova)
    }

    fn cut_mapping(&self, iova: IoVirtAddr) -> Result<()> {
        PtIommu::cut_mapping(self, iova)
    }

    fn read_and_clear_dirty(
        &self,
        iova: IoVirtAddr,
        len: u64,
        flags: DirtyFlags,
        dirty: &mut dyn DirtyRecorder,
    ) -> Result<()> {
        PtIommu::read_and_clear_dirty(self, iova, len, flags, dirty)
    }

    fn set_dirty(&self, iova: IoVirtAddr) -> Result<()> {
        PtIommu::set_dirty(self, iova)
    }

    fn get_info(&self) -> PtInfo {
        PtIommu::get_info(self)
    }

    fn hw_info(&self) -> HwInfo {
        PtIommu::hw_info(self)
    }

    fn deinit(self: Box<Self>) {
        PtIommu::deinit(*self)
    }
}
