//! Machine-independent protection and page attribute flags.

use bitflags::bitflags;

bitflags! {
    /// Access rights requested for a mapping.
    ///
    /// The i386 tables cannot express execute-only or write-only pages: any valid
    /// entry is readable and executable, and `WRITE` selects the writable bit.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Protection: u8 {
        const READ = 1 << 0;
        const WRITE = 1 << 1;
        const EXECUTE = 1 << 2;
        const READ_WRITE = Self::READ.bits() | Self::WRITE.bits();
        const READ_EXECUTE = Self::READ.bits() | Self::EXECUTE.bits();
    }
}

impl Protection {
    /// No access at all. Protecting a range to `NONE` removes it.
    pub const NONE: Self = Self::empty();
}

bitflags! {
    /// Hardware-maintained usage bits of a physical page.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Attributes: u8 {
        /// The page was accessed through some mapping.
        const REFERENCED = 1 << 0;
        /// The page was written through some mapping.
        const MODIFIED = 1 << 1;
    }
}
