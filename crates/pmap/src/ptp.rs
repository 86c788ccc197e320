//! Page table page bookkeeping.
//!
//! Each user address space owns a [`PtpArena`] describing the page table pages
//! it has allocated. The arena is pure bookkeeping: the table contents live in
//! the frame itself and are reached through the machine.

use alloc::vec::Vec;

use crate::PhysicalAddress;
use crate::arch::{ENTRIES_PER_TABLE, KERNEL_SLOT};

/// Handle to a page table page within its address space's arena.
///
/// Handles are only meaningful together with the address space that issued them,
/// and are reused once the page is freed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct PtpHandle(u32);

/// Set of wired entries in one page table page.
#[derive(Clone, Default, PartialEq, Eq)]
pub(crate) struct WiredSet([u64; ENTRIES_PER_TABLE / 64]);

impl WiredSet {
    pub fn insert(&mut self, index: usize) {
        self.0[index / 64] |= 1 << (index % 64);
    }

    pub fn remove(&mut self, index: usize) {
        self.0[index / 64] &= !(1 << (index % 64));
    }

    #[cfg(test)]
    pub fn contains(&self, index: usize) -> bool {
        self.0[index / 64] & (1 << (index % 64)) != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0.iter().all(|word| *word == 0)
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.0.iter().map(|word| word.count_ones() as usize).sum()
    }
}

/// A page table page of a user address space.
pub(crate) struct PageTablePage {
    segment: usize,
    frame: PhysicalAddress,
    live: usize,
    wired: WiredSet,
}

impl PageTablePage {
    pub fn new(segment: usize, frame: PhysicalAddress) -> Self {
        Self {
            segment,
            frame,
            live: 0,
            wired: WiredSet::default(),
        }
    }

    /// Directory slot this page is installed in.
    pub fn segment(&self) -> usize {
        self.segment
    }

    pub fn frame(&self) -> PhysicalAddress {
        self.frame
    }

    /// Number of valid entries in the page.
    pub fn live(&self) -> usize {
        self.live
    }

    /// Records a new valid entry.
    pub fn add_entry(&mut self) {
        assert!(
            self.live < ENTRIES_PER_TABLE,
            "pmap_enter: live entry count overflow in segment {}",
            self.segment
        );
        self.live += 1;
    }

    /// Records the removal of the valid entry at `index`.
    pub fn remove_entry(&mut self, index: usize) {
        assert!(
            self.live > 0,
            "pmap_remove: live entry count underflow in segment {}",
            self.segment
        );
        self.live -= 1;
        self.wired.remove(index);
    }

    pub fn set_wired(&mut self, index: usize, wired: bool) {
        if wired {
            self.wired.insert(index);
        } else {
            self.wired.remove(index);
        }
    }

    /// A page can be stolen only if none of its entries are wired.
    pub fn is_stealable(&self) -> bool {
        self.wired.is_empty()
    }
}

/// The page table pages of one user address space.
pub(crate) struct PtpArena {
    slots: Vec<Option<PageTablePage>>,
    vacant: Vec<u32>,
    by_segment: Vec<Option<PtpHandle>>,
    hint: Option<PtpHandle>,
}

impl PtpArena {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            vacant: Vec::new(),
            by_segment: Vec::new(),
            hint: None,
        }
    }

    /// Finds the page installed for `segment`, checking the last page used first.
    pub fn lookup(&mut self, segment: usize) -> Option<PtpHandle> {
        if let Some(hint) = self.hint {
            if self.get(hint).segment == segment {
                return Some(hint);
            }
        }
        let handle = self.by_segment.get(segment).copied().flatten()?;
        self.hint = Some(handle);
        Some(handle)
    }

    /// Adds a page and returns its handle.
    ///
    /// # Panics
    ///
    /// Panics if the segment already has a page or is not a user segment.
    pub fn insert(&mut self, page: PageTablePage) -> PtpHandle {
        let segment = page.segment;
        assert!(
            segment < KERNEL_SLOT,
            "pmap_get_ptp: segment {segment} is not a user segment"
        );
        if self.by_segment.len() <= segment {
            self.by_segment.resize(segment + 1, None);
        }
        assert!(
            self.by_segment[segment].is_none(),
            "pmap_get_ptp: segment {segment} already has a page table page"
        );

        let handle = match self.vacant.pop() {
            Some(index) => {
                self.slots[index as usize] = Some(page);
                PtpHandle(index)
            }
            None => {
                self.slots.push(Some(page));
                PtpHandle((self.slots.len() - 1) as u32)
            }
        };
        self.by_segment[segment] = Some(handle);
        self.hint = Some(handle);
        handle
    }

    /// Removes a page from the arena.
    pub fn remove(&mut self, handle: PtpHandle) -> PageTablePage {
        let page = self.slots[handle.0 as usize]
            .take()
            .unwrap_or_else(|| panic!("pmap_free_ptp: stale handle {handle:?}"));
        self.by_segment[page.segment] = None;
        self.vacant.push(handle.0);
        if self.hint == Some(handle) {
            self.hint = None;
        }
        page
    }

    pub fn get(&self, handle: PtpHandle) -> &PageTablePage {
        self.slots[handle.0 as usize]
            .as_ref()
            .unwrap_or_else(|| panic!("pmap: stale page table page handle {handle:?}"))
    }

    pub fn get_mut(&mut self, handle: PtpHandle) -> &mut PageTablePage {
        self.slots[handle.0 as usize]
            .as_mut()
            .unwrap_or_else(|| panic!("pmap: stale page table page handle {handle:?}"))
    }

    /// Iterates over the pages in the arena.
    pub fn iter(&self) -> impl Iterator<Item = (PtpHandle, &PageTablePage)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| slot.as_ref().map(|page| (PtpHandle(index as u32), page)))
    }

    /// Returns a page with no wired entries, if any.
    pub fn find_stealable(&self) -> Option<PtpHandle> {
        self.iter()
            .find(|(_, page)| page.is_stealable())
            .map(|(handle, _)| handle)
    }

    /// Removes every page, in segment order.
    pub fn drain(&mut self) -> Vec<PageTablePage> {
        let mut pages: Vec<_> = self.slots.drain(..).flatten().collect();
        pages.sort_by_key(|page| page.segment);
        self.vacant.clear();
        self.by_segment.clear();
        self.hint = None;
        pages
    }

    pub fn len(&self) -> usize {
        self.slots.len() - self.vacant.len()
    }
}

/// Recently freed page table frames kept for reuse.
pub(crate) struct PtpPool {
    frames: Vec<PhysicalAddress>,
    capacity: usize,
}

impl PtpPool {
    pub fn new(capacity: usize) -> Self {
        Self {
            frames: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Takes a pooled frame. Pooled frames are always zeroed.
    pub fn take(&mut self) -> Option<PhysicalAddress> {
        self.frames.pop()
    }

    /// Pools a zeroed frame, or hands it back if the pool is full.
    pub fn give(&mut self, frame: PhysicalAddress) -> Option<PhysicalAddress> {
        if self.frames.len() < self.capacity {
            self.frames.push(frame);
            None
        } else {
            Some(frame)
        }
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    /// Empties the pool.
    pub fn drain(&mut self) -> impl Iterator<Item = PhysicalAddress> + '_ {
        self.frames.drain(..)
    }
}
