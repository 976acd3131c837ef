//! Root growth
//!
//! A growable root starts small and gains one level at a time when a map
//! reaches past its span. New roots link the old root at index 0 and are
//! published under the driver's root lock together with the hardware root
//! update, so a lockless reader always sees a root PA with its own level.

use crate::arch::PtFormat;
use crate::config::PtFeatures;
use crate::mm::{IoVirtAddr, PhysAddr};
use crate::pt::range::{check_span, top_table_lg2sz};
use crate::pt::{PtCommon, PtRange};
use crate::{Error, Result};

use super::PtIommu;

impl<F: PtFormat> PtIommu<F> {
    /// Add one level above the current root
    ///
    /// Returns the new root level. Only tables created with
    /// [`PtFeatures::DYNAMIC_TOP`] can grow.
    pub fn increase_top(&self) -> Result<u32> {
        loop {
            match self.grow_top(self.common.top()) {
                Ok(level) => return Ok(level),
                Err(Error::TryAgain) => continue,
                Err(err) => return Err(err),
            }
        }
    }

    /// Range for a map of `iova..=last_va`, growing the root until it fits
    pub(super) fn map_range_top(&self, iova: IoVirtAddr, last_va: IoVirtAddr) -> Result<PtRange> {
        loop {
            let top = self.common.top();
            let range = PtRange::with_top(&self.fmt, &self.common, top, iova, last_va);
            match range.check(&self.fmt) {
                Ok(()) => return Ok(range),
                Err(err) if !self.common.has(PtFeatures::DYNAMIC_TOP) => return Err(err),
                Err(_) => {}
            }
            check_span(&self.fmt, iova, last_va, self.common.max_vasz_lg2())?;
            match self.grow_top(top) {
                Ok(_) | Err(Error::TryAgain) => continue,
                Err(err) => return Err(err),
            }
        }
    }

    /// Put one new root above the root described by `seen_top`
    ///
    /// Fails with `TryAgain` when another thread changed the root first; the
    /// table built here is thrown away and the caller starts over.
    fn grow_top(&self, seen_top: u64) -> Result<u32> {
        if !self.common.has(PtFeatures::DYNAMIC_TOP) {
            return Err(Error::Unsupported);
        }
        let Some(driver) = self.driver.as_ref() else {
            pt_warn_on!(true);
            return Err(Error::Unsupported);
        };
        let fmt = &self.fmt;
        let (lower_pa, lower_level) = PtCommon::unpack(seen_top);
        let level = lower_level + 1;
        if level > fmt.max_top_level() || fmt.item_lg2sz(level) >= self.common.max_vasz_lg2() {
            return Err(Error::InvalidRange);
        }

        let node = self
            .arena
            .alloc(top_table_lg2sz(fmt, &self.common, level), level)?;
        let ret = self.with_ctx(|cx| -> Result<PhysAddr> {
            let table = cx.table(cx.arena.pa_of(node))?;
            // A fresh table cannot lose the install.
            let installed = fmt.install_table(&table, level, 0, lower_pa, 0);
            pt_warn_on!(!installed);
            if self.common.has(PtFeatures::DMA_INCOHERENT) {
                cx.arena.start_incoherent(&table, false)?;
            }
            Ok(table.pa())
        });
        let top_pa = match ret {
            Ok(pa) => pa,
            Err(err) => {
                // SAFETY: the new root was never published.
                unsafe { self.arena.release(node) };
                return Err(err);
            }
        };

        {
            let lock = driver.top_lock().lock();
            if self.common.top() != seen_top {
                drop(lock);
                // SAFETY: as above, the swap never happened.
                unsafe { self.arena.release(node) };
                return Err(Error::TryAgain);
            }
            driver.change_top(top_pa, level);
            self.common.set_top(top_pa, level);
        }
        log::debug!("{}: root grew to level {} at {:#x}", F::NAME, level, top_pa);
        Ok(level)
    }
}

#[cfg(test)]
mod tests {
    use alloc::sync::Arc;
    use core::sync::atomic::{AtomicU32, Ordering};

    use crate::arch::amdv1::{Amdv1, Amdv1Config};
    use crate::config::{PtConfig, PtFeatures};
    use crate::iommu::{IommuDriverOps, IommuProt, PtHooks, PtIommu};
    use crate::mm::PhysAddr;
    use crate::Error;

    #[derive(Default)]
    struct Driver {
        lock: spin::Mutex<()>,
        changes: AtomicU32,
        level: AtomicU32,
    }

    impl IommuDriverOps for Driver {
        fn top_lock(&self) -> &spin::Mutex<()> {
            &self.lock
        }

        fn change_top(&self, _top_pa: PhysAddr, top_level: u32) {
            assert!(self.lock.is_locked());
            self.changes.fetch_add(1, Ordering::SeqCst);
            self.level.store(top_level, Ordering::SeqCst);
        }
    }

    fn table(vasz: u32) -> (PtIommu<Amdv1>, Arc<Driver>) {
        let driver = Arc::new(Driver::default());
        let cfg = PtConfig::new(vasz, 52).with_features(PtFeatures::DYNAMIC_TOP);
        let hooks = PtHooks::default().with_driver(driver.clone());
        let table = PtIommu::new(&Amdv1Config { starting_level: 1 }, &cfg, hooks).unwrap();
        (table, driver)
    }

    #[test]
    fn test_map_beyond_root_grows_it() {
        let (table, driver) = table(64);
        assert_eq!(table.top_level(), 1);
        let mut mapped = 0;
        table
            .map_range(0x1000, 0x1000, 0x1000, IommuProt::READ, &mut mapped)
            .unwrap();

        // 1 << 40 needs a level 3 root, one swap per new level.
        table
            .map_range(1 << 40, 0x2000, 0x1000, IommuProt::READ, &mut mapped)
            .unwrap();
        assert_eq!(table.top_level(), 3);
        assert_eq!(driver.changes.load(Ordering::SeqCst), 2);
        assert_eq!(driver.level.load(Ordering::SeqCst), 3);
        assert_eq!(table.iova_to_phys(0x1000), Some(0x1000));
        assert_eq!(table.iova_to_phys(1 << 40), Some(0x2000));
    }

    #[test]
    fn test_increase_top_adds_one_level() {
        let (table, driver) = table(64);
        let mut mapped = 0;
        table
            .map_range(0x20_0000, 0x40_0000, 0x20_0000, IommuProt::WRITE, &mut mapped)
            .unwrap();
        assert_eq!(table.increase_top(), Ok(2));
        assert_eq!(table.increase_top(), Ok(3));
        assert_eq!(table.hw_info().levels, 4);
        assert_eq!(driver.changes.load(Ordering::SeqCst), 2);
        assert_eq!(table.iova_to_phys(0x21_0000), Some(0x41_0000));
    }

    #[test]
    fn test_growth_stops_at_va_width() {
        let (table, _driver) = table(40);
        let mut mapped = 0;
        assert_eq!(
            table.map_range(1 << 40, 0, 0x1000, IommuProt::READ, &mut mapped),
            Err(Error::InvalidRange)
        );
        assert_eq!(table.increase_top(), Ok(2));
        assert_eq!(table.increase_top(), Ok(3));
        // Level 4 items would already span the whole 40 bits.
        assert_eq!(table.increase_top(), Err(Error::InvalidRange));
    }
}
