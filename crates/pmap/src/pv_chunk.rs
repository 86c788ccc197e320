//! Chunked storage for reverse-map records.
//!
//! Records are carved out of page-sized chunks. A chunk sits on one of two
//! queues while it has free slots: `partial` when some slots are in use, and
//! `unused` when none are. Full chunks are on neither queue. The allocator tries
//! to keep at least [`LOW_WATER`] free records around and gives whole unused
//! chunks back once more than [`HIGH_WATER`] records are free.

use alloc::collections::VecDeque;
use alloc::vec::Vec;
use core::mem::size_of;

use crate::arch::PAGE_SIZE;
use crate::pv::PvEntry;

/// Records per chunk: as many as fit in one page.
pub(crate) const RECORDS_PER_CHUNK: usize = PAGE_SIZE / size_of::<PvSlot>();

/// Free records the allocator tries to keep in reserve.
pub(crate) const LOW_WATER: usize = RECORDS_PER_CHUNK / 2;

/// Free records above which unused chunks are released.
pub(crate) const HIGH_WATER: usize = LOW_WATER + 2 * RECORDS_PER_CHUNK;

/// Location of a record: chunk index and slot within the chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PvRef {
    chunk: u32,
    slot: u16,
}

/// A reverse-map record linked into a per-frame list.
pub(crate) struct PvRecord {
    pub entry: PvEntry,
    pub next: Option<PvRef>,
}

enum PvSlot {
    Free { next: Option<u16> },
    Reserved,
    Used(PvRecord),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChunkQueue {
    Partial,
    Unused,
    Full,
}

struct PvChunk {
    slots: Vec<PvSlot>,
    free_head: Option<u16>,
    free: usize,
    queue: ChunkQueue,
}

/// Allocator for reverse-map records.
pub(crate) struct PvChunkAllocator {
    chunks: Vec<Option<PvChunk>>,
    vacant: Vec<u32>,
    partial: VecDeque<u32>,
    unused: VecDeque<u32>,
    free_records: usize,
    live_chunks: usize,
    limit: Option<usize>,
}

impl PvChunkAllocator {
    pub fn new(limit: Option<usize>) -> Self {
        Self {
            chunks: Vec::new(),
            vacant: Vec::new(),
            partial: VecDeque::new(),
            unused: VecDeque::new(),
            free_records: 0,
            live_chunks: 0,
            limit,
        }
    }

    /// Reserves a record slot. The slot holds nothing until [`Self::store`].
    ///
    /// Returns `None` when no chunk has room and no new chunk can be obtained.
    pub fn alloc(&mut self) -> Option<PvRef> {
        let chunk = match self.partial.front().or_else(|| self.unused.front()) {
            Some(&chunk) => chunk,
            None => {
                if !self.grow() {
                    log::error!(
                        "pmap_alloc_pv: out of reverse-map records ({} chunks)",
                        self.live_chunks
                    );
                    return None;
                }
                *self.unused.front()?
            }
        };

        let found = self.take_slot(chunk);

        // Top up the reserve while we still can; failure only matters when the
        // reserve is actually empty, which the next call reports.
        if self.free_records < LOW_WATER {
            self.grow();
        }
        Some(found)
    }

    /// Fills a reserved slot.
    pub fn store(&mut self, at: PvRef, entry: PvEntry, next: Option<PvRef>) {
        let slot = self.slot_mut(at);
        assert!(
            matches!(slot, PvSlot::Reserved),
            "pmap_enter_pv: record {at:?} was not reserved"
        );
        *slot = PvSlot::Used(PvRecord { entry, next });
    }

    pub fn get(&self, at: PvRef) -> &PvRecord {
        match self.chunk(at.chunk).slots.get(at.slot as usize) {
            Some(PvSlot::Used(record)) => record,
            _ => panic!("pmap: dangling reverse-map record {at:?}"),
        }
    }

    pub fn get_mut(&mut self, at: PvRef) -> &mut PvRecord {
        match self.slot_mut(at) {
            PvSlot::Used(record) => record,
            _ => panic!("pmap: dangling reverse-map record {at:?}"),
        }
    }

    /// Frees a used record and returns its contents.
    pub fn release(&mut self, at: PvRef) -> PvRecord {
        let slot = self.slot_mut(at);
        let record = match core::mem::replace(slot, PvSlot::Reserved) {
            PvSlot::Used(record) => record,
            _ => panic!("pmap_free_pv: record {at:?} is not in use"),
        };
        self.free_slot(at);
        record
    }

    /// Number of free records across all chunks.
    #[cfg(test)]
    pub fn free_records(&self) -> usize {
        self.free_records
    }

    /// Number of chunks currently held.
    #[cfg(test)]
    pub fn chunk_count(&self) -> usize {
        self.live_chunks
    }

    fn chunk(&self, index: u32) -> &PvChunk {
        self.chunks
            .get(index as usize)
            .and_then(Option::as_ref)
            .unwrap_or_else(|| panic!("pmap: reverse-map chunk {index} does not exist"))
    }

    fn chunk_mut(&mut self, index: u32) -> &mut PvChunk {
        self.chunks
            .get_mut(index as usize)
            .and_then(Option::as_mut)
            .unwrap_or_else(|| panic!("pmap: reverse-map chunk {index} does not exist"))
    }

    fn slot_mut(&mut self, at: PvRef) -> &mut PvSlot {
        self.chunk_mut(at.chunk)
            .slots
            .get_mut(at.slot as usize)
            .unwrap_or_else(|| panic!("pmap: reverse-map slot {at:?} out of range"))
    }

    fn take_slot(&mut self, index: u32) -> PvRef {
        let chunk = self.chunk_mut(index);
        let slot = chunk
            .free_head
            .unwrap_or_else(|| panic!("pmap_alloc_pv: queued chunk {index} has no free slot"));
        chunk.free_head = match chunk.slots[slot as usize] {
            PvSlot::Free { next } => next,
            _ => panic!("pmap_alloc_pv: free list of chunk {index} is corrupt"),
        };
        chunk.slots[slot as usize] = PvSlot::Reserved;
        chunk.free -= 1;
        self.free_records -= 1;
        self.requeue(index);
        PvRef { chunk: index, slot }
    }

    fn free_slot(&mut self, at: PvRef) {
        let chunk = self.chunk_mut(at.chunk);
        chunk.slots[at.slot as usize] = PvSlot::Free {
            next: chunk.free_head,
        };
        chunk.free_head = Some(at.slot);
        chunk.free += 1;
        self.free_records += 1;
        self.requeue(at.chunk);

        while self.free_records > HIGH_WATER {
            let Some(index) = self.unused.pop_front() else {
                break;
            };
            self.release_chunk(index);
        }
    }

    /// Moves a chunk to the queue matching its free count.
    fn requeue(&mut self, index: u32) {
        let chunk = self.chunk_mut(index);
        let wanted = match chunk.free {
            0 => ChunkQueue::Full,
            n if n == RECORDS_PER_CHUNK => ChunkQueue::Unused,
            _ => ChunkQueue::Partial,
        };
        let current = core::mem::replace(&mut chunk.queue, wanted);
        if current == wanted {
            return;
        }
        match current {
            ChunkQueue::Partial => remove_from(&mut self.partial, index),
            ChunkQueue::Unused => remove_from(&mut self.unused, index),
            ChunkQueue::Full => {}
        }
        match wanted {
            ChunkQueue::Partial => self.partial.push_back(index),
            ChunkQueue::Unused => self.unused.push_back(index),
            ChunkQueue::Full => {}
        }
    }

    /// Adds one empty chunk to the unused queue.
    fn grow(&mut self) -> bool {
        if self
            .limit
            .is_some_and(|limit| self.live_chunks >= limit)
        {
            return false;
        }

        let mut slots = Vec::new();
        if slots.try_reserve_exact(RECORDS_PER_CHUNK).is_err() {
            return false;
        }
        for slot in 0..RECORDS_PER_CHUNK {
            let next = slot + 1;
            slots.push(PvSlot::Free {
                next: (next < RECORDS_PER_CHUNK).then_some(next as u16),
            });
        }
        let chunk = PvChunk {
            slots,
            free_head: Some(0),
            free: RECORDS_PER_CHUNK,
            queue: ChunkQueue::Unused,
        };

        let index = match self.vacant.pop() {
            Some(index) => {
                self.chunks[index as usize] = Some(chunk);
                index
            }
            None => {
                self.chunks.push(Some(chunk));
                (self.chunks.len() - 1) as u32
            }
        };
        self.unused.push_back(index);
        self.free_records += RECORDS_PER_CHUNK;
        self.live_chunks += 1;
        log::debug!(
            "pmap: reverse-map chunk {index} added ({} chunks, {} free records)",
            self.live_chunks,
            self.free_records
        );
        true
    }

    fn release_chunk(&mut self, index: u32) {
        let chunk = self.chunks[index as usize]
            .take()
            .unwrap_or_else(|| panic!("pmap_free_pvpage: chunk {index} does not exist"));
        debug_assert_eq!(chunk.free, RECORDS_PER_CHUNK);
        self.vacant.push(index);
        self.free_records -= RECORDS_PER_CHUNK;
        self.live_chunks -= 1;
        log::debug!(
            "pmap: reverse-map chunk {index} released ({} chunks, {} free records)",
            self.live_chunks,
            self.free_records
        );
    }
}

fn remove_from(queue: &mut VecDeque<u32>, index: u32) {
    if let Some(position) = queue.iter().position(|&queued| queued == index) {
        queue.remove(position);
    }
}
