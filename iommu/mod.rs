//! IOMMU page table
//!
//! [`PtIommu`] owns one translation tree of a given format together with
//! its node arena. Every operation here is safe to call from several
//! threads at once provided the caller serializes overlapping mutations
//! with its own range lock; table pointers are installed with
//! compare-and-swap so disjoint mappers never contend.

use alloc::sync::Arc;

use crate::arch::{HwInfo, PtFormat, PtGeometry};
use crate::config::{PtConfig, PtFeatures};
use crate::mm::{DmaSync, FreeList, IoVirtAddr, NodeArena, PhysAddr};
use crate::pt::range::top_table_lg2sz;
use crate::pt::{PtCommon, PtCtx, PtRange, PtState, PtWord};
use crate::utils::log2;
use crate::{Error, Result};

mod collect;
pub mod cut;
pub mod dirty;
pub mod dump;
mod map;
pub mod ops;
pub mod prot;
mod query;
mod top;
mod unmap;

pub use dirty::{DirtyFlags, DirtyRecorder, IovaBitmap};
pub use dump::{PtStats, TableSnapshot};
pub use ops::IommuOps;
pub use prot::IommuProt;

/// Callbacks into the IOMMU driver that embeds the table
pub trait IommuDriverOps: Send + Sync {
    /// Lock serializing root changes against the driver's own root updates
    fn top_lock(&self) -> &spin::Mutex<()>;

    /// Point the hardware at a new root; called with [`IommuDriverOps::top_lock`] held
    fn change_top(&self, top_pa: PhysAddr, top_level: u32);

    /// Invalidate cached translations for `len` bytes at `iova`. Table
    /// nodes unlinked by an operation are only freed after this returns.
    fn flush_iotlb(&self, _iova: IoVirtAddr, _len: u64) {}
}

/// Collaborators handed to [`PtIommu::new`]
#[derive(Clone, Default)]
pub struct PtHooks {
    /// Required with [`PtFeatures::DYNAMIC_TOP`]
    pub driver: Option<Arc<dyn IommuDriverOps>>,
    /// Required with [`PtFeatures::DMA_INCOHERENT`]
    pub dma: Option<Arc<dyn DmaSync>>,
}

impl PtHooks {
    pub fn with_driver(mut self, driver: Arc<dyn IommuDriverOps>) -> Self {
        self.driver = Some(driver);
        self
    }

    pub fn with_dma(mut self, dma: Arc<dyn DmaSync>) -> Self {
        self.dma = Some(dma);
        self
    }
}

/// What the table can translate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PtInfo {
    /// Every page size a leaf can be installed with
    pub pgsize_bitmap: u64,
    /// First translatable IOVA
    pub aperture_start: IoVirtAddr,
    /// Last translatable IOVA, inclusive
    pub aperture_end: IoVirtAddr,
}

/// An IOMMU translation tree of format `F`
pub struct PtIommu<F: PtFormat> {
    fmt: F,
    common: PtCommon,
    arena: NodeArena<F::Word>,
    driver: Option<Arc<dyn IommuDriverOps>>,
    pgsize_bitmap: u64,
}

impl<F: PtFormat> PtIommu<F> {
    /// Create an empty table
    pub fn new(fmt_cfg: &F::Config, cfg: &PtConfig, hooks: PtHooks) -> Result<Self> {
        cfg.validate()?;
        let mut geo = PtGeometry {
            features: cfg.features,
            max_vasz_lg2: cfg.hw_max_vasz_lg2,
            max_oasz_lg2: cfg.hw_max_oasz_lg2,
            top_level: 0,
        };
        let fmt = F::init(fmt_cfg, &mut geo)?;
        if cfg.hw_max_vasz_lg2 > fmt.max_va_lg2() || cfg.hw_max_oasz_lg2 > fmt.max_oa_lg2() {
            log::warn!(
                "{}: {}-bit IOVA / {}-bit OA exceeds the format",
                F::NAME,
                cfg.hw_max_vasz_lg2,
                cfg.hw_max_oasz_lg2
            );
            return Err(Error::InvalidArgument);
        }
        init_geometry(&fmt, &mut geo)?;
        let common = PtCommon::new(&geo);

        if common.has(PtFeatures::DYNAMIC_TOP) && hooks.driver.is_none() {
            log::warn!("{}: a growable root needs driver callbacks", F::NAME);
            return Err(Error::InvalidArgument);
        }
        if common.has(PtFeatures::DMA_INCOHERENT) && hooks.dma.is_none() {
            log::warn!("{}: incoherent walker without cache maintenance", F::NAME);
            return Err(Error::InvalidArgument);
        }

        let arena = NodeArena::new(
            cfg.table_pa_base,
            max_table_lg2sz(&fmt, &common, geo.top_level),
            cfg.max_tables,
            hooks.dma,
        )?;
        let (_, window_end) = arena.pa_window();
        if log2::div(window_end, fmt.max_table_pa_lg2()) != 0 {
            log::warn!(
                "{}: table arena ends at {:#x}, beyond the {}-bit table pointer",
                F::NAME,
                window_end,
                fmt.max_table_pa_lg2()
            );
            return Err(Error::InvalidArgument);
        }

        let root = arena.alloc(top_table_lg2sz(&fmt, &common, geo.top_level), geo.top_level)?;
        if common.has(PtFeatures::DMA_INCOHERENT) {
            let guard = arena.pin();
            let table = arena.table(root, &guard).ok_or(Error::InconsistentState)?;
            arena.start_incoherent(&table, false)?;
        }
        common.set_top(arena.pa_of(root), geo.top_level);

        let pgsize_bitmap = compute_pgsize_bitmap(&fmt, &common, geo.top_level);
        log::info!(
            "{}: {}-bit IOVA, {}-bit OA, root level {} at {:#x}, page sizes {:#x}",
            F::NAME,
            common.max_vasz_lg2(),
            common.max_oasz_lg2(),
            geo.top_level,
            arena.pa_of(root),
            pgsize_bitmap
        );
        Ok(Self {
            fmt,
            common,
            arena,
            driver: hooks.driver,
            pgsize_bitmap,
        })
    }

    /// Format instance
    pub fn format(&self) -> &F {
        &self.fmt
    }

    /// Features in force after initialization
    pub fn features(&self) -> PtFeatures {
        self.common.features()
    }

    /// Page sizes and aperture
    pub fn get_info(&self) -> PtInfo {
        let prefix = self.fmt.full_va_prefix();
        let vasz = self.common.max_vasz_lg2();
        PtInfo {
            pgsize_bitmap: self.pgsize_bitmap,
            aperture_start: log2::set_rem(prefix, 0, vasz),
            aperture_end: log2::set_rem_max(prefix, vasz),
        }
    }

    /// Root in the form the hardware consumes
    pub fn hw_info(&self) -> HwInfo {
        let (pa, level) = PtCommon::unpack(self.common.top());
        self.fmt.hw_info(pa, level)
    }

    /// Current root level
    pub fn top_level(&self) -> u32 {
        PtCommon::unpack(self.common.top()).1
    }

    /// Node arena backing the table
    pub fn arena(&self) -> &NodeArena<F::Word> {
        &self.arena
    }

    /// Tear the table down, releasing every node
    pub fn deinit(self) {
        drop(self)
    }

    /// Run `f` inside a read side critical section
    fn with_ctx<R>(&self, f: impl FnOnce(PtCtx<'_, F>) -> R) -> R {
        let guard = self.arena.pin();
        let cx = PtCtx {
            fmt: &self.fmt,
            common: &self.common,
            arena: &self.arena,
            guard: &guard,
        };
        f(cx)
    }

    fn flush_iotlb(&self, iova: IoVirtAddr, len: u64) {
        if let Some(driver) = &self.driver {
            driver.flush_iotlb(iova, len);
        }
    }

    /// Free nodes unlinked while operating on `len` bytes at `iova`.
    /// Must not be called while pinned.
    fn retire_tables(&self, iova: IoVirtAddr, len: u64, free: FreeList) {
        if free.is_empty() {
            return;
        }
        pt_trace!("{}: retiring {} tables", F::NAME, free.len());
        self.flush_iotlb(iova, len);
        self.arena.retire(free);
    }
}

impl<F: PtFormat> Drop for PtIommu<F> {
    fn drop(&mut self) {
        // No guard can be pinned any more; let retired batches go first.
        self.arena.synchronize();
        let top = self.common.top();
        let mut free = FreeList::new();
        let ret = self.with_ctx(|cx| {
            let range = PtRange::from_top(cx.fmt, cx.common, top);
            let mut st = PtState::top(cx, range)?;
            free.push(cx.arena, st.table.node());
            collect::collect_tables(&mut st, &mut free, true)
        });
        pt_warn_on!(ret.is_err());
        let released = free.len();
        // SAFETY: `&mut self` excludes every other walker.
        unsafe { self.arena.release_list(&mut free) };
        let stats = self.arena.stats();
        pt_warn_on!(stats.live != 0);
        log::info!(
            "{}: table torn down, {} nodes released, peak {}",
            F::NAME,
            released,
            stats.peak
        );
    }
}

/// Settle the root span and the feature set
fn init_geometry<F: PtFormat>(fmt: &F, geo: &mut PtGeometry) -> Result<()> {
    let top = geo.top_level;
    if pt_warn_on!(top > fmt.max_top_level()) {
        return Err(Error::InvalidArgument);
    }
    let top_span = (fmt.num_items_lg2(top) + fmt.item_lg2sz(top)).min(geo.max_vasz_lg2);

    if top == fmt.max_top_level() || geo.max_vasz_lg2 == top_span {
        geo.features.remove(PtFeatures::DYNAMIC_TOP);
    }
    if !geo.features.contains(PtFeatures::DYNAMIC_TOP) {
        geo.max_vasz_lg2 = top_span;
    }
    if top_span == F::VA_BITS {
        geo.features.insert(PtFeatures::FULL_VA);
    }
    if !fmt.supported_features().contains(geo.features) {
        log::warn!(
            "{}: features {:?} not supported (have {:?})",
            F::NAME,
            geo.features - fmt.supported_features(),
            fmt.supported_features()
        );
        return Err(Error::Unsupported);
    }
    geo.max_oasz_lg2 = geo.max_oasz_lg2.min(fmt.max_oa_lg2());
    Ok(())
}

/// Largest table any level, root or interior, can need
fn max_table_lg2sz<F: PtFormat>(fmt: &F, common: &PtCommon, top_level: u32) -> u32 {
    (0..=fmt.max_top_level())
        .map(|level| {
            let interior = fmt.num_items_lg2(level) + <F::Word as PtWord>::SIZE_LG2;
            if level >= top_level {
                interior.max(top_table_lg2sz(fmt, common, level))
            } else {
                interior
            }
        })
        .max()
        .unwrap_or(<F::Word as PtWord>::SIZE_LG2)
}

fn compute_pgsize_bitmap<F: PtFormat>(fmt: &F, common: &PtCommon, top_level: u32) -> u64 {
    let mut bitmap = 0;
    if common.has(PtFeatures::DYNAMIC_TOP) {
        for level in 0..=fmt.max_top_level() {
            if fmt.item_lg2sz(level) >= common.max_vasz_lg2() {
                break;
            }
            bitmap |= fmt.possible_sizes(level);
        }
    } else {
        for level in 0..=top_level {
            bitmap |= fmt.possible_sizes(level);
        }
    }
    // Sizes beyond the output address width can never be used.
    log2::rem(bitmap, common.max_oasz_lg2())
}
