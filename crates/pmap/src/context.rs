//! Hardware context allocation for tagged TLBs.
//!
//! Contexts are handed out from a free queue; once it is empty the least
//! recently activated context whose owner is not loaded on any CPU is taken
//! back. Owners are held weakly, and a context whose owner is gone is reclaimed
//! the same way.

use alloc::collections::VecDeque;
use alloc::sync::{Arc, Weak};

use crate::ContextId;
use crate::registry::PmapId;
use crate::space::SpaceInner;

pub(crate) struct ContextTable {
    free: VecDeque<ContextId>,
    active: VecDeque<(ContextId, PmapId, Weak<SpaceInner>)>,
}

/// Outcome of [`ContextTable::allocate`].
pub(crate) struct Assignment {
    pub context: ContextId,
    /// Previous owner of a reclaimed context, if it is still alive.
    pub evicted: Option<Arc<SpaceInner>>,
}

impl ContextTable {
    pub fn new(count: usize) -> Self {
        let count = count.min(u16::MAX as usize + 1);
        Self {
            free: (0..count).map(|id| ContextId::new(id as u16)).collect(),
            active: VecDeque::new(),
        }
    }

    /// Assigns a context to `owner`, reclaiming the least recently used one if
    /// none is free. Returns `None` if every context belongs to a loaded space.
    ///
    /// The returned evicted owner must be dropped after the table lock is released.
    pub fn allocate(&mut self, pmap: PmapId, owner: Weak<SpaceInner>) -> Option<Assignment> {
        if let Some(context) = self.free.pop_front() {
            self.active.push_back((context, pmap, owner));
            return Some(Assignment {
                context,
                evicted: None,
            });
        }

        let position = self.active.iter().position(|(_, _, previous)| {
            previous
                .upgrade()
                .is_none_or(|space| space.active_cpus().is_empty())
        })?;
        let (context, _, previous) = self.active.remove(position)?;
        self.active.push_back((context, pmap, owner));
        Some(Assignment {
            context,
            evicted: previous.upgrade(),
        })
    }

    /// Marks `context` as most recently used.
    pub fn touch(&mut self, context: ContextId) {
        if let Some(position) = self.active.iter().position(|(known, _, _)| *known == context) {
            if let Some(entry) = self.active.remove(position) {
                self.active.push_back(entry);
            }
        }
    }

    /// Returns `context` to the free queue if `pmap` still owns it.
    pub fn free(&mut self, context: ContextId, pmap: PmapId) {
        if let Some(position) = self
            .active
            .iter()
            .position(|(known, owner, _)| *known == context && *owner == pmap)
        {
            self.active.remove(position);
            self.free.push_back(context);
        }
    }

    #[cfg(test)]
    pub fn free_count(&self) -> usize {
        self.free.len()
    }
}
