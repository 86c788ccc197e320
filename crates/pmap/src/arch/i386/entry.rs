//! Page table entry for i386.

use core::fmt;

use crate::{PhysicalAddress, Protection, arch::TranslationEntry};

use super::{PAGE_SIZE, flags::EntryFlags};

/// A single i386 page directory or page table entry.
///
/// The entry format:
/// - Bits 0-11: Flags (see [`EntryFlags`])
/// - Bits 12-31: Physical frame address
#[derive(Clone, Copy, PartialEq, Eq, Default)]
#[repr(transparent)]
pub struct PageEntry(u32);

impl PageEntry {
    /// Physical frame mask (bits 12-31).
    const FRAME_MASK: u32 = 0xFFFF_F000;

    /// The invalid entry.
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Creates a new entry pointing at `frame`.
    ///
    /// The frame address must be page-aligned.
    pub fn new(frame: PhysicalAddress, flags: EntryFlags) -> Self {
        debug_assert!(
            frame.is_aligned(PAGE_SIZE),
            "frame address must be page-aligned"
        );
        Self((frame.as_usize() as u32 & Self::FRAME_MASK) | flags.bits())
    }

    /// Creates a leaf entry mapping `frame` with the given access rights.
    pub fn mapping(frame: PhysicalAddress, prot: Protection, wired: bool, managed: bool) -> Self {
        let mut flags = EntryFlags::VALID;
        flags.set(EntryFlags::WRITABLE, prot.contains(Protection::WRITE));
        flags.set(EntryFlags::WIRED, wired);
        flags.set(EntryFlags::MANAGED, managed);
        Self::new(frame, flags)
    }

    /// Creates a page directory entry pointing at a page table page.
    ///
    /// Directory entries are always writable; the leaf entries decide access.
    pub fn table(frame: PhysicalAddress, user: bool) -> Self {
        let mut flags = EntryFlags::VALID
            | EntryFlags::WRITABLE
            | EntryFlags::REFERENCED
            | EntryFlags::MODIFIED;
        flags.set(EntryFlags::USER, user);
        Self::new(frame, flags)
    }

    /// Creates an entry from a raw value.
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    /// Returns the raw value of this entry.
    pub const fn as_raw(self) -> u32 {
        self.0
    }

    /// Returns the flags of this entry.
    pub fn flags(self) -> EntryFlags {
        EntryFlags::from_bits_truncate(self.0 & !Self::FRAME_MASK)
    }

    /// Returns a copy of the entry with `flags` set.
    pub fn with_flags(self, flags: EntryFlags) -> Self {
        Self(self.0 | flags.bits())
    }

    /// Returns a copy of the entry with `flags` cleared.
    pub fn without_flags(self, flags: EntryFlags) -> Self {
        Self(self.0 & !flags.bits())
    }

    pub fn is_writable(self) -> bool {
        self.flags().contains(EntryFlags::WRITABLE)
    }

    pub fn is_managed(self) -> bool {
        self.flags().contains(EntryFlags::MANAGED)
    }

    pub fn is_global(self) -> bool {
        self.flags().contains(EntryFlags::GLOBAL)
    }
}

impl TranslationEntry for PageEntry {
    fn is_valid(self) -> bool {
        self.flags().contains(EntryFlags::VALID)
    }

    fn frame(self) -> Option<PhysicalAddress> {
        if self.is_valid() {
            Some(PhysicalAddress::new((self.0 & Self::FRAME_MASK) as usize))
        } else {
            None
        }
    }

    fn is_wired(self) -> bool {
        self.flags().contains(EntryFlags::WIRED)
    }

    fn protection(self) -> Protection {
        if !self.is_valid() {
            return Protection::NONE;
        }
        let mut prot = Protection::READ_EXECUTE;
        prot.set(Protection::WRITE, self.is_writable());
        prot
    }

    fn set_permissions(self, prot: Protection) -> Self {
        let base = self.without_flags(EntryFlags::PERMISSIONS);
        if prot.contains(Protection::WRITE) {
            base.with_flags(EntryFlags::WRITABLE)
        } else {
            base
        }
    }

    fn accessed(self) -> bool {
        self.flags().contains(EntryFlags::REFERENCED)
    }

    fn modified(self) -> bool {
        self.flags().contains(EntryFlags::MODIFIED)
    }
}

impl fmt::Debug for PageEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PageEntry")
            .field("frame", &(self.0 & Self::FRAME_MASK))
            .field("flags", &self.flags())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Attributes;

    #[test]
    fn empty_entry_is_invalid() {
        let entry = PageEntry::empty();
        assert!(!entry.is_valid());
        assert_eq!(entry.frame(), None);
        assert_eq!(entry.protection(), Protection::NONE);
    }

    #[test]
    fn mapping_encodes_frame_and_bits() {
        let entry = PageEntry::mapping(
            PhysicalAddress::new(0x0012_3000),
            Protection::READ_WRITE,
            true,
            false,
        );
        assert!(entry.is_valid());
        assert!(entry.is_writable());
        assert!(entry.is_wired());
        assert!(!entry.is_managed());
        assert_eq!(entry.frame(), Some(PhysicalAddress::new(0x0012_3000)));
        assert_eq!(entry.as_raw(), 0x0012_3000 | 0x1 | 0x2 | 0x200);
    }

    #[test]
    fn set_permissions_preserves_everything_else() {
        let entry = PageEntry::mapping(
            PhysicalAddress::new(0x5000),
            Protection::READ_WRITE,
            true,
            true,
        )
        .with_flags(EntryFlags::REFERENCED | EntryFlags::MODIFIED);

        let read_only = entry.set_permissions(Protection::READ);
        assert!(!read_only.is_writable());
        assert!(read_only.is_wired());
        assert!(read_only.is_managed());
        assert_eq!(read_only.frame(), entry.frame());
        assert_eq!(read_only.attributes(), Attributes::all());

        assert_eq!(read_only.set_permissions(Protection::READ_WRITE), entry);
    }

    #[test]
    fn table_entry_is_writable() {
        let pde = PageEntry::table(PhysicalAddress::new(0x9000), true);
        assert!(pde.is_valid());
        assert!(pde.is_writable());
        assert!(pde.flags().contains(EntryFlags::USER));
    }
}
