//! Two-level i386 paging without PAE.
//!
//! - 32-bit physical and virtual addresses
//! - 4 KiB pages, 1024 entries per table
//! - One page directory entry maps a 4 MiB segment
//! - Kernel space starts at `KERNEL_BASE`; the last directory slot is reserved
//!   for the recursive self-mapping and never handed out

mod entry;
mod flags;
mod table;

pub use entry::PageEntry;
pub use flags::EntryFlags;
pub use table::PageTable;

/// Maximum number of bits in a physical address.
pub const MAX_PHYSICAL_BITS: usize = 32;

/// Maximum number of bits in a virtual address.
pub const MAX_VIRTUAL_BITS: usize = 32;

/// log2 of the page size.
pub const PAGE_SHIFT: usize = 12;

/// Page size in bytes.
pub const PAGE_SIZE: usize = 1 << PAGE_SHIFT;

/// log2 of the span of one page directory entry.
pub const SEGMENT_SHIFT: usize = 22;

/// Bytes mapped by one page table page.
pub const SEGMENT_SIZE: usize = 1 << SEGMENT_SHIFT;

/// Entries in a page directory or page table page.
pub const ENTRIES_PER_TABLE: usize = 1024;

/// First kernel virtual address.
pub const KERNEL_BASE: usize = 0xC000_0000;

/// Directory slot of `KERNEL_BASE`.
pub const KERNEL_SLOT: usize = KERNEL_BASE >> SEGMENT_SHIFT;

/// Directory slot holding the recursive mapping of the directory itself.
pub const RECURSIVE_SLOT: usize = ENTRIES_PER_TABLE - 1;

/// End of the range user address spaces may map.
pub const MAX_USER_ADDRESS: usize = KERNEL_BASE;

/// End of the range any address space may map.
pub const MAX_VIRTUAL_ADDRESS: usize = RECURSIVE_SLOT << SEGMENT_SHIFT;

/// Number of directory slots available to the kernel.
pub const MAX_KERNEL_SEGMENTS: usize = RECURSIVE_SLOT - KERNEL_SLOT;

/// Returns the page directory index of a virtual address.
#[inline]
pub const fn directory_index(address: usize) -> usize {
    (address >> SEGMENT_SHIFT) & (ENTRIES_PER_TABLE - 1)
}

/// Returns the page table index of a virtual address.
#[inline]
pub const fn table_index(address: usize) -> usize {
    (address >> PAGE_SHIFT) & (ENTRIES_PER_TABLE - 1)
}

/// Validates a physical address: it must fit in 32 bits.
#[inline]
pub const fn validate_physical(addr: usize) -> bool {
    (addr as u64) < (1u64 << MAX_PHYSICAL_BITS)
}

/// Validates a virtual address: it must fit in 32 bits.
#[inline]
pub const fn validate_virtual(addr: usize) -> bool {
    (addr as u64) < (1u64 << MAX_VIRTUAL_BITS)
}
