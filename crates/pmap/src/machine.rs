//! The boundary between the physical map and the machine it runs on.
//!
//! The physical map never touches hardware directly. Frame allocation, access to
//! translation tables, TLB maintenance and context switching all go through a
//! [`Machine`] supplied by the embedding kernel. The crate's tests use the
//! emulated machine in `arch::software`.

use core::fmt;
use core::ops::Range;

use crate::{FrameNumber, PageTable, PhysicalAddress, VirtualAddress};

/// Index of a CPU.
pub type CpuId = usize;

/// Maximum number of CPUs a [`CpuSet`] can describe.
pub const MAX_CPUS: usize = 64;

/// A set of CPUs.
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct CpuSet(u64);

impl CpuSet {
    /// The empty set.
    pub const fn empty() -> Self {
        Self(0)
    }

    /// The set of CPUs `0..count`.
    pub const fn all(count: usize) -> Self {
        assert!(count <= MAX_CPUS, "too many CPUs for a CpuSet");
        if count == MAX_CPUS {
            Self(u64::MAX)
        } else {
            Self((1 << count) - 1)
        }
    }

    /// The set containing only `cpu`.
    pub const fn single(cpu: CpuId) -> Self {
        assert!(cpu < MAX_CPUS, "CPU index out of range");
        Self(1 << cpu)
    }

    /// Creates a set from its bit representation.
    pub const fn from_bits(bits: u64) -> Self {
        Self(bits)
    }

    /// Returns the bit representation of the set.
    pub const fn bits(self) -> u64 {
        self.0
    }

    pub const fn contains(self, cpu: CpuId) -> bool {
        cpu < MAX_CPUS && self.0 & (1 << cpu) != 0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Iterates over the members of the set in ascending order.
    pub fn iter(self) -> impl Iterator<Item = CpuId> {
        (0..MAX_CPUS).filter(move |&cpu| self.contains(cpu))
    }
}

impl fmt::Debug for CpuSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

/// A hardware address-space tag.
///
/// Machines with tagged TLBs keep translations of several address spaces at once
/// and tell them apart by context. The kernel's global translations carry no tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContextId(u16);

impl ContextId {
    pub const fn new(id: u16) -> Self {
        Self(id)
    }

    pub const fn as_u16(self) -> u16 {
        self.0
    }
}

/// Services the physical map needs from the machine.
///
/// # Table access
///
/// Page directories and the kernel's page table pages live in permanently mapped
/// kernel memory, and the page table pages of the address space loaded on the
/// calling CPU are reachable through the recursive directory slot. Both are
/// served by [`Machine::mapped_table`]. Any other page table page is reached
/// through the single temporary window of [`Machine::map_window`]; the physical
/// map serializes window use, so an implementation only needs one slot.
pub trait Machine: Send + Sync {
    /// Number of CPUs. Must not exceed [`MAX_CPUS`].
    fn cpu_count(&self) -> usize;

    /// Index of the calling CPU.
    fn current_cpu(&self) -> CpuId;

    /// Number of hardware contexts, or 0 if the TLB is untagged.
    fn context_count(&self) -> usize;

    /// The frames whose mappings are tracked by the reverse map.
    fn managed_frames(&self) -> Range<FrameNumber>;

    /// Allocates a zeroed frame for page-table use.
    fn alloc_frame(&self) -> Option<PhysicalAddress>;

    /// Returns a frame obtained from [`Machine::alloc_frame`].
    fn free_frame(&self, frame: PhysicalAddress);

    /// Returns a table reachable through a permanent mapping.
    fn mapped_table(&self, frame: PhysicalAddress) -> &PageTable;

    /// Maps `frame` at the temporary window and returns it as a table.
    fn map_window(&self, frame: PhysicalAddress) -> &PageTable;

    /// Tears down the temporary window mapping.
    fn unmap_window(&self);

    /// Invalidates the translation of `va` tagged `context` on every CPU in `cpus`.
    fn invalidate_page(&self, cpus: CpuSet, context: Option<ContextId>, va: VirtualAddress);

    /// Drops every non-global translation tagged `context` on every CPU in `cpus`.
    fn flush_tlb(&self, cpus: CpuSet, context: Option<ContextId>);

    /// Loads `root` as the current page directory of the calling CPU.
    ///
    /// Without a context this discards the calling CPU's untagged non-global
    /// translations.
    fn load_context(&self, root: PhysicalAddress, context: Option<ContextId>);

    /// The page directory currently loaded on the calling CPU.
    fn current_root(&self) -> Option<PhysicalAddress>;
}
