//! Address types for physical and virtual memory.
//!
//! Both wrappers are sized for the two-level i386 layout: every address fits in
//! 32 bits, and a virtual address splits into a directory index, a table index and
//! a page offset.

use core::fmt;
use core::ops::{Add, Sub};

use crate::{FrameNumber, arch};

/// Shared shape of the two address newtypes. Each type supplies its own checked
/// `new`; offsets added or subtracted go back through it.
macro_rules! address_type {
    ($name:ident, $doc:expr) => {
        #[doc = $doc]
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        #[repr(transparent)]
        pub struct $name(usize);

        impl $name {
            #[inline]
            pub const fn as_usize(self) -> usize {
                self.0
            }

            /// Whether the address is a multiple of `align`, a power of two.
            #[inline]
            pub const fn is_aligned(self, align: usize) -> bool {
                assert!(align.is_power_of_two(), "alignment must be a power of two");
                self.0 % align == 0
            }

            /// Byte offset within the page.
            #[inline]
            pub const fn page_offset(self) -> usize {
                self.0 % arch::PAGE_SIZE
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.debug_tuple(stringify!($name))
                    .field(&format_args!("{:#010x}", self.0))
                    .finish()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{:#x}", self.0)
            }
        }

        impl Add<usize> for $name {
            type Output = Self;

            #[inline]
            fn add(self, bytes: usize) -> Self {
                Self::new(self.0 + bytes)
            }
        }

        impl Sub<usize> for $name {
            type Output = Self;

            #[inline]
            fn sub(self, bytes: usize) -> Self {
                Self::new(self.0 - bytes)
            }
        }
    };
}

address_type!(
    PhysicalAddress,
    "A physical memory address.\n\n\
     Physical addresses are limited to the 32 bits a translation entry can hold."
);

impl PhysicalAddress {
    /// # Panics
    ///
    /// If `addr` does not fit in a translation entry.
    #[inline]
    pub const fn new(addr: usize) -> Self {
        assert!(
            arch::validate_physical(addr),
            "physical address exceeds maximum width"
        );
        Self(addr)
    }

    /// The frame containing this address.
    #[inline]
    pub fn frame_number(self) -> FrameNumber {
        FrameNumber::from(self)
    }
}

address_type!(
    VirtualAddress,
    "A virtual memory address.\n\n\
     Virtual addresses below [`arch::KERNEL_BASE`] belong to user address spaces; the\n\
     rest is shared by every address space and owned by the kernel."
);

impl VirtualAddress {
    /// # Panics
    ///
    /// If `addr` lies outside the 32-bit virtual address space.
    #[inline]
    pub const fn new(addr: usize) -> Self {
        assert!(
            arch::validate_virtual(addr),
            "virtual address exceeds maximum width"
        );
        Self(addr)
    }

    /// Page directory slot (segment) covering this address.
    #[inline]
    pub const fn directory_index(self) -> usize {
        arch::directory_index(self.0)
    }

    /// Slot within the segment's page table page.
    #[inline]
    pub const fn table_index(self) -> usize {
        arch::table_index(self.0)
    }

    #[inline]
    pub const fn is_kernel(self) -> bool {
        self.0 >= arch::KERNEL_BASE
    }

    /// First address of the next segment, saturating at the top of the address space.
    #[inline]
    pub const fn next_segment(self) -> Self {
        let next = (self.0 & !(arch::SEGMENT_SIZE - 1)) + arch::SEGMENT_SIZE;
        if next > arch::MAX_VIRTUAL_ADDRESS {
            Self(arch::MAX_VIRTUAL_ADDRESS)
        } else {
            Self(next)
        }
    }
}
