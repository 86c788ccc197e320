//! Registry of live address spaces.
//!
//! Kernel growth walks it to propagate new kernel page table pages, and page
//! table stealing walks it round-robin to pick a donor.

use alloc::sync::Weak;
use alloc::vec::Vec;
use core::fmt;

use crate::space::SpaceInner;

/// Identity of an address space, stable for its lifetime.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PmapId(u32);

impl PmapId {
    pub(crate) const fn new(id: u32) -> Self {
        Self(id)
    }

    pub const fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Debug for PmapId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pmap#{}", self.0)
    }
}

pub(crate) struct Registry {
    spaces: Vec<(PmapId, Weak<SpaceInner>)>,
    cursor: usize,
    next_id: u32,
}

impl Registry {
    pub const fn new() -> Self {
        Self {
            spaces: Vec::new(),
            cursor: 0,
            next_id: 0,
        }
    }

    pub fn allocate_id(&mut self) -> PmapId {
        let id = PmapId(self.next_id);
        self.next_id = self
            .next_id
            .checked_add(1)
            .unwrap_or_else(|| panic!("pmap_create: address space ids exhausted"));
        id
    }

    pub fn register(&mut self, id: PmapId, space: Weak<SpaceInner>) {
        self.spaces.push((id, space));
    }

    pub fn unregister(&mut self, id: PmapId) {
        let Some(position) = self.spaces.iter().position(|(known, _)| *known == id) else {
            return;
        };
        self.spaces.remove(position);
        if position < self.cursor {
            self.cursor -= 1;
        }
        if self.cursor >= self.spaces.len() {
            self.cursor = 0;
        }
    }

    /// Every registered space, in registration order.
    ///
    /// Callers upgrade the handles after releasing the registry lock: dropping
    /// the last strong reference to a space unregisters it.
    pub fn snapshot(&self) -> Vec<Weak<SpaceInner>> {
        self.spaces.iter().map(|(_, space)| space.clone()).collect()
    }

    /// Every registered space, starting at the steal cursor.
    pub fn victims(&self) -> Vec<(PmapId, Weak<SpaceInner>)> {
        let (tail, head) = self.spaces.split_at(self.cursor.min(self.spaces.len()));
        head.iter().chain(tail).cloned().collect()
    }

    /// Moves the steal cursor past `id`, so the next steal starts after it.
    pub fn advance_past(&mut self, id: PmapId) {
        if let Some(position) = self.spaces.iter().position(|(known, _)| *known == id) {
            self.cursor = (position + 1) % self.spaces.len();
        }
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.spaces.len()
    }
}
