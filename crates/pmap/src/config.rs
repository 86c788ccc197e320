//! Tunables fixed at bootstrap.

use crate::arch::MAX_KERNEL_SEGMENTS;
use crate::tlb::MAX_TLB_BATCH;

/// Physical map configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PmapConfig {
    /// Kernel page table pages created at bootstrap.
    pub initial_kernel_segments: usize,
    /// Freed page table pages kept for reuse before returning them to the machine.
    pub ptp_pool_capacity: usize,
    /// Upper bound on reverse-map chunks, or `None` for no limit beyond memory.
    pub pv_chunk_limit: Option<usize>,
    /// Page invalidations batched per operation before falling back to a flush.
    pub tlb_batch: usize,
}

impl PmapConfig {
    pub const DEFAULT: Self = Self {
        initial_kernel_segments: 4,
        ptp_pool_capacity: 8,
        pv_chunk_limit: None,
        tlb_batch: 32,
    };

    /// # Panics
    ///
    /// Panics if `segments` exceeds the kernel's share of the page directory.
    pub const fn with_initial_kernel_segments(mut self, segments: usize) -> Self {
        assert!(
            segments <= MAX_KERNEL_SEGMENTS,
            "more kernel segments than directory slots"
        );
        self.initial_kernel_segments = segments;
        self
    }

    pub const fn with_ptp_pool_capacity(mut self, capacity: usize) -> Self {
        self.ptp_pool_capacity = capacity;
        self
    }

    pub const fn with_pv_chunk_limit(mut self, limit: Option<usize>) -> Self {
        self.pv_chunk_limit = limit;
        self
    }

    /// # Panics
    ///
    /// Panics if `batch` is zero or larger than [`MAX_TLB_BATCH`].
    pub const fn with_tlb_batch(mut self, batch: usize) -> Self {
        assert!(
            batch > 0 && batch <= MAX_TLB_BATCH,
            "TLB batch size out of range"
        );
        self.tlb_batch = batch;
        self
    }
}

impl Default for PmapConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}
