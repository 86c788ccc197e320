//! Architecture-specific translation structures.
//!
//! The physical map is written against the two-level i386 layout: a page
//! directory of 1024 entries, each pointing at a page table page of 1024 entries
//! covering one 4 MiB segment. Everything the core needs from an entry goes
//! through [`TranslationEntry`], so a second layout only has to provide its own
//! entry type and geometry constants.

mod i386;
pub use i386::*;

// The emulated machine is used by the crate's own tests, and by embedders that
// enable `software-emulation` to exercise their code without hardware.
#[cfg(any(test, feature = "software-emulation"))]
pub mod software;

use crate::{Attributes, PhysicalAddress, Protection};

/// Operations the core needs on a single translation entry.
pub trait TranslationEntry: Copy + Eq + Default {
    /// Returns true if the entry translates an address.
    fn is_valid(self) -> bool;

    /// Returns the frame the entry points at, if it is valid.
    fn frame(self) -> Option<PhysicalAddress>;

    /// Returns true if the entry carries the software wired bit.
    fn is_wired(self) -> bool;

    /// Returns the access rights the entry grants.
    fn protection(self) -> Protection;

    /// Returns a copy of the entry with its permission bits replaced by `prot`.
    ///
    /// The frame, software bits and hardware usage bits are preserved.
    fn set_permissions(self, prot: Protection) -> Self;

    /// Returns true if hardware recorded an access through this entry.
    fn accessed(self) -> bool;

    /// Returns true if hardware recorded a write through this entry.
    fn modified(self) -> bool;

    /// Returns the usage bits of this entry as page attributes.
    fn attributes(self) -> Attributes {
        let mut attrs = Attributes::empty();
        attrs.set(Attributes::REFERENCED, self.accessed());
        attrs.set(Attributes::MODIFIED, self.modified());
        attrs
    }
}
