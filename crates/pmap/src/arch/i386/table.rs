//! Page table for i386.

use core::sync::atomic::{AtomicU32, Ordering};

use super::{ENTRIES_PER_TABLE, PageEntry, flags::EntryFlags};

/// A page directory or page table page.
///
/// Entries are atomics: the MMU sets the referenced and modified bits behind our
/// back, so every read-modify-write of a live entry has to be a single atomic
/// operation or those bits can be lost.
#[repr(C, align(4096))]
pub struct PageTable {
    entries: [AtomicU32; ENTRIES_PER_TABLE],
}

impl PageTable {
    /// Creates a table with every entry invalid.
    pub const fn new() -> Self {
        Self {
            entries: [const { AtomicU32::new(0) }; ENTRIES_PER_TABLE],
        }
    }

    /// Returns the entry at the given index.
    ///
    /// # Panics
    ///
    /// Panics if `index >= ENTRIES_PER_TABLE`.
    pub fn entry(&self, index: usize) -> PageEntry {
        assert!(index < ENTRIES_PER_TABLE, "page table index out of bounds");
        PageEntry::from_raw(self.entries[index].load(Ordering::Acquire))
    }

    /// Stores an entry at the given index.
    pub fn set_entry(&self, index: usize, entry: PageEntry) {
        assert!(index < ENTRIES_PER_TABLE, "page table index out of bounds");
        self.entries[index].store(entry.as_raw(), Ordering::Release);
    }

    /// Atomically replaces an entry and returns the previous value.
    pub fn swap_entry(&self, index: usize, entry: PageEntry) -> PageEntry {
        assert!(index < ENTRIES_PER_TABLE, "page table index out of bounds");
        PageEntry::from_raw(self.entries[index].swap(entry.as_raw(), Ordering::AcqRel))
    }

    /// Atomically clears flag bits of an entry and returns the previous value.
    pub fn clear_flags(&self, index: usize, flags: EntryFlags) -> PageEntry {
        assert!(index < ENTRIES_PER_TABLE, "page table index out of bounds");
        PageEntry::from_raw(self.entries[index].fetch_and(!flags.bits(), Ordering::AcqRel))
    }

    /// Atomically sets flag bits of an entry and returns the previous value.
    pub fn set_flags(&self, index: usize, flags: EntryFlags) -> PageEntry {
        assert!(index < ENTRIES_PER_TABLE, "page table index out of bounds");
        PageEntry::from_raw(self.entries[index].fetch_or(flags.bits(), Ordering::AcqRel))
    }

    /// Atomically rewrites an entry with `f` and returns the previous value.
    ///
    /// `f` may run more than once if the entry changes concurrently.
    pub fn update(&self, index: usize, mut f: impl FnMut(PageEntry) -> PageEntry) -> PageEntry {
        assert!(index < ENTRIES_PER_TABLE, "page table index out of bounds");
        let previous = self.entries[index]
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |raw| {
                Some(f(PageEntry::from_raw(raw)).as_raw())
            })
            .unwrap_or_else(|raw| raw);
        PageEntry::from_raw(previous)
    }

    /// Returns the raw word at the given index, for tables holding page data.
    pub fn load_word(&self, index: usize) -> u32 {
        self.entries[index].load(Ordering::Relaxed)
    }

    /// Stores a raw word at the given index.
    pub fn store_word(&self, index: usize, word: u32) {
        self.entries[index].store(word, Ordering::Relaxed);
    }

    /// Clears every entry.
    pub fn zero(&self) {
        for entry in &self.entries {
            entry.store(0, Ordering::Relaxed);
        }
        core::sync::atomic::fence(Ordering::Release);
    }

    /// Returns the number of entries.
    pub const fn len(&self) -> usize {
        ENTRIES_PER_TABLE
    }
}

impl Default for PageTable {
    fn default() -> Self {
        Self::new()
    }
}
