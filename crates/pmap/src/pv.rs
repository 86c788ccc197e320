//! The reverse map: for every managed frame, the list of (address space, va)
//! pairs mapping it, plus the frame's referenced/modified side-table.
//!
//! The first record of each list lives inline in the per-frame head, so a frame
//! mapped once needs no allocation. Further records come from the chunk
//! allocator and are linked newest-first behind the head.

use alloc::boxed::Box;
use alloc::sync::Weak;
use alloc::vec::Vec;
use core::ops::Range;
use core::sync::atomic::{AtomicU8, Ordering};

use crate::error::PmapError;
use crate::ptp::PtpHandle;
use crate::pv_chunk::{PvChunkAllocator, PvRef};
use crate::registry::PmapId;
use crate::space::SpaceInner;
use crate::{Attributes, FrameNumber, PhysicalAddress, VirtualAddress};

/// One mapping of a managed frame.
#[derive(Clone)]
pub(crate) struct PvEntry {
    pub pmap: PmapId,
    pub space: Weak<SpaceInner>,
    pub va: VirtualAddress,
    /// Page table page holding the entry; `None` for kernel mappings.
    pub ptp: Option<PtpHandle>,
}

impl PvEntry {
    fn is(&self, pmap: PmapId, va: VirtualAddress) -> bool {
        self.pmap == pmap && self.va == va
    }
}

/// The mappings of one frame.
#[derive(Default)]
pub(crate) struct PvList {
    head: Option<PvEntry>,
    chain: Option<PvRef>,
    len: usize,
}

impl PvList {
    pub fn len(&self) -> usize {
        self.len
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    /// Adds a mapping.
    ///
    /// Fails only when the list already has an inline record and no chained
    /// record can be allocated; the list is unchanged in that case.
    pub fn insert(
        &mut self,
        entry: PvEntry,
        chunks: &spin::Mutex<PvChunkAllocator>,
    ) -> Result<(), PmapError> {
        if self.head.is_none() {
            self.head = Some(entry);
        } else {
            let mut chunks = chunks.lock();
            let at = chunks.alloc().ok_or(PmapError::ResourceShortage)?;
            chunks.store(at, entry, self.chain);
            self.chain = Some(at);
        }
        self.len += 1;
        Ok(())
    }

    /// Removes the mapping of `va` in `pmap` and returns it.
    pub fn remove(
        &mut self,
        pmap: PmapId,
        va: VirtualAddress,
        chunks: &spin::Mutex<PvChunkAllocator>,
    ) -> Option<PvEntry> {
        if self.head.as_ref().is_some_and(|head| head.is(pmap, va)) {
            let removed = self.head.take();
            if let Some(first) = self.chain {
                let promoted = chunks.lock().release(first);
                self.head = Some(promoted.entry);
                self.chain = promoted.next;
            }
            self.len -= 1;
            return removed;
        }

        let mut chunks = chunks.lock();
        let mut previous: Option<PvRef> = None;
        let mut current = self.chain;
        while let Some(at) = current {
            let (found, next) = {
                let record = chunks.get(at);
                (record.entry.is(pmap, va), record.next)
            };
            if found {
                match previous {
                    None => self.chain = next,
                    Some(previous) => chunks.get_mut(previous).next = next,
                }
                self.len -= 1;
                return Some(chunks.release(at).entry);
            }
            previous = Some(at);
            current = next;
        }
        None
    }

    /// Returns a snapshot of every mapping, head first.
    pub fn entries(&self, chunks: &spin::Mutex<PvChunkAllocator>) -> Vec<PvEntry> {
        let mut entries = Vec::with_capacity(self.len);
        entries.extend(self.head.iter().cloned());
        if self.chain.is_some() {
            let chunks = chunks.lock();
            let mut current = self.chain;
            while let Some(at) = current {
                let record = chunks.get(at);
                entries.push(record.entry.clone());
                current = record.next;
            }
        }
        entries
    }

    /// Removes and returns every mapping, head first.
    pub fn drain(&mut self, chunks: &spin::Mutex<PvChunkAllocator>) -> Vec<PvEntry> {
        let mut entries = Vec::with_capacity(self.len);
        entries.extend(self.head.take());
        if self.chain.is_some() {
            let mut chunks = chunks.lock();
            while let Some(at) = self.chain {
                let record = chunks.release(at);
                entries.push(record.entry);
                self.chain = record.next;
            }
        }
        self.len = 0;
        entries
    }
}

/// Per-frame reverse-map state.
pub(crate) struct PvHead {
    list: spin::Mutex<PvList>,
    attrs: AtomicU8,
}

impl PvHead {
    fn new() -> Self {
        Self {
            list: spin::Mutex::new(PvList::default()),
            attrs: AtomicU8::new(0),
        }
    }

    /// Locks the list on its own. Paths that also touch address spaces go
    /// through `lock.rs` instead.
    pub fn lock(&self) -> spin::MutexGuard<'_, PvList> {
        self.list.lock()
    }

    pub fn attrs(&self) -> Attributes {
        Attributes::from_bits_truncate(self.attrs.load(Ordering::Acquire))
    }

    /// ORs bits observed in a translation entry into the side-table.
    pub fn merge_attrs(&self, attrs: Attributes) {
        if !attrs.is_empty() {
            self.attrs.fetch_or(attrs.bits(), Ordering::AcqRel);
        }
    }

    /// Applies `clear` then `set` to the side-table and returns the old value.
    pub fn update_attrs(&self, set: Attributes, clear: Attributes) -> Attributes {
        let previous = self
            .attrs
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |bits| {
                Some((bits & !clear.bits()) | set.bits())
            })
            .unwrap_or_else(|bits| bits);
        Attributes::from_bits_truncate(previous)
    }
}

/// Reverse-map heads for every managed frame.
pub(crate) struct PvTable {
    first: FrameNumber,
    heads: Box<[PvHead]>,
}

impl PvTable {
    pub fn new(frames: Range<FrameNumber>) -> Self {
        let count = frames.end.as_usize().saturating_sub(frames.start.as_usize());
        let heads: Vec<PvHead> = (0..count).map(|_| PvHead::new()).collect();
        Self {
            first: frames.start,
            heads: heads.into_boxed_slice(),
        }
    }

    /// Returns the head for `frame`, or `None` if the frame is not managed.
    pub fn head(&self, frame: PhysicalAddress) -> Option<&PvHead> {
        let number = frame.frame_number();
        if number < self.first {
            return None;
        }
        self.heads.get(number - self.first)
    }

    pub fn len(&self) -> usize {
        self.heads.len()
    }
}
