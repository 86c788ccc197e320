//! Page table entry flags for i386.

use bitflags::bitflags;

use crate::Attributes;

bitflags! {
    /// Flag bits of an i386 page directory or page table entry.
    ///
    /// Bits 9-11 are ignored by the MMU; two of them carry the wired and managed
    /// markers kept by the physical map.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct EntryFlags: u32 {
        const VALID = 1 << 0;
        const WRITABLE = 1 << 1;
        const USER = 1 << 2;
        const WRITE_THROUGH = 1 << 3;
        const NO_CACHE = 1 << 4;
        const REFERENCED = 1 << 5;
        const MODIFIED = 1 << 6;
        const GLOBAL = 1 << 8;
        /// The mapping is wired and must survive collection and stealing.
        const WIRED = 1 << 9;
        /// The mapped frame holds a reverse-map record for this entry.
        const MANAGED = 1 << 10;
    }
}

impl EntryFlags {
    /// Bits describing access rights.
    pub const PERMISSIONS: Self = Self::WRITABLE;

    /// Converts page attributes to the matching hardware usage bits.
    pub fn from_attributes(attrs: Attributes) -> Self {
        let mut flags = Self::empty();
        flags.set(Self::REFERENCED, attrs.contains(Attributes::REFERENCED));
        flags.set(Self::MODIFIED, attrs.contains(Attributes::MODIFIED));
        flags
    }
}
