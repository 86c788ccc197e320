//! Software emulation of an i386 machine for testing.
//!
//! Physical memory is an array of page-sized frames starting at physical
//! address 0, all of them managed. Each emulated CPU has a loaded page
//! directory, an optional context and a TLB. [`EmulatedMachine::access`] plays
//! the MMU: it consults the TLB, walks the tables on a miss, sets the referenced
//! and modified bits, and caches the result, so tests can observe stale
//! translations when a shootdown is missing.

use std::boxed::Box;
use std::cell::Cell;
use std::collections::BTreeMap;
use std::vec::Vec;

use core::ops::Range;
use core::sync::atomic::{AtomicUsize, Ordering};

use spin::Mutex;

use crate::arch::{EntryFlags, PAGE_SHIFT, PageTable, TranslationEntry};
use crate::{ContextId, CpuId, CpuSet, FrameNumber, Machine, PhysicalAddress, VirtualAddress};

std::thread_local! {
    static CURRENT_CPU: Cell<CpuId> = const { Cell::new(0) };
}

const NO_WINDOW: usize = usize::MAX;

/// A cached translation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TlbEntry {
    pub frame: PhysicalAddress,
    pub writable: bool,
    pub dirty: bool,
    pub global: bool,
}

#[derive(Default)]
struct Cpu {
    root: Option<PhysicalAddress>,
    context: Option<ContextId>,
    tlb: BTreeMap<(Option<ContextId>, usize), TlbEntry>,
}

/// An emulated machine with page-table memory, CPUs and TLBs.
pub struct EmulatedMachine {
    memory: Box<[PageTable]>,
    free: Mutex<Vec<FrameNumber>>,
    cpus: Box<[Mutex<Cpu>]>,
    contexts: usize,
    window: AtomicUsize,
    window_maps: AtomicUsize,
    invalidations: AtomicUsize,
    flushes: AtomicUsize,
}

impl EmulatedMachine {
    /// Creates a uniprocessor machine with an untagged TLB.
    pub fn new(frames: usize) -> Self {
        Self::with_topology(frames, 1, 0)
    }

    /// Creates a machine with `cpus` CPUs and `contexts` hardware contexts.
    pub fn with_topology(frames: usize, cpus: usize, contexts: usize) -> Self {
        assert!(frames > 0, "emulated machine needs memory");
        assert!(
            cpus > 0 && cpus <= crate::MAX_CPUS,
            "unsupported emulated CPU count"
        );
        Self {
            memory: (0..frames).map(|_| PageTable::new()).collect(),
            free: Mutex::new((0..frames).map(FrameNumber::new).collect()),
            cpus: (0..cpus).map(|_| Mutex::new(Cpu::default())).collect(),
            contexts,
            window: AtomicUsize::new(NO_WINDOW),
            window_maps: AtomicUsize::new(0),
            invalidations: AtomicUsize::new(0),
            flushes: AtomicUsize::new(0),
        }
    }

    /// Selects the CPU the calling thread runs on.
    pub fn set_current_cpu(cpu: CpuId) {
        CURRENT_CPU.with(|current| current.set(cpu));
    }

    /// Number of frames not handed out.
    pub fn free_frames(&self) -> usize {
        self.free.lock().len()
    }

    /// Takes the frame at `pa` out of the allocator, for use as a data page.
    ///
    /// # Panics
    ///
    /// Panics if the frame is already allocated.
    pub fn reserve(&self, pa: PhysicalAddress) {
        let mut free = self.free.lock();
        let position = free
            .iter()
            .position(|frame| *frame == pa.frame_number())
            .unwrap_or_else(|| panic!("frame {pa} is not free"));
        free.remove(position);
    }

    pub fn window_in_use(&self) -> bool {
        self.window.load(Ordering::Acquire) != NO_WINDOW
    }

    /// Times the mapping window has been mapped.
    pub fn window_maps(&self) -> usize {
        self.window_maps.load(Ordering::Relaxed)
    }

    /// Page invalidations requested so far.
    pub fn invalidations(&self) -> usize {
        self.invalidations.load(Ordering::Relaxed)
    }

    /// Full TLB flushes requested so far.
    pub fn flushes(&self) -> usize {
        self.flushes.load(Ordering::Relaxed)
    }

    /// Context currently loaded on `cpu`.
    pub fn loaded_context(&self, cpu: CpuId) -> Option<ContextId> {
        self.cpus[cpu].lock().context
    }

    /// Performs a memory access on the calling CPU.
    ///
    /// Returns the physical address reached, or `None` on a fault.
    pub fn access(&self, va: VirtualAddress, write: bool) -> Option<PhysicalAddress> {
        let mut cpu = self.cpus[self.current_cpu()].lock();
        let page = va.as_usize() >> PAGE_SHIFT;
        let tag = if va.is_kernel() { None } else { cpu.context };

        if let Some(cached) = cpu.tlb.get(&(tag, page)).copied() {
            if write && !cached.writable {
                return None;
            }
            if !write || cached.dirty {
                return Some(cached.frame + va.page_offset());
            }
        }

        let root = cpu.root?;
        let pde = self.frame(root).entry(va.directory_index());
        let table = self.frame(pde.frame()?);
        let index = va.table_index();
        let pte = table.entry(index);
        if !pte.is_valid() || (write && !pte.is_writable()) {
            return None;
        }

        let mut usage = EntryFlags::REFERENCED;
        if write {
            usage |= EntryFlags::MODIFIED;
        }
        table.set_flags(index, usage);

        let frame = pte.frame()?;
        cpu.tlb.insert(
            (tag, page),
            TlbEntry {
                frame,
                writable: pte.is_writable(),
                dirty: write || pte.modified(),
                global: pte.is_global(),
            },
        );
        Some(frame + va.page_offset())
    }

    /// Returns the cached translation of `va` on `cpu`, if any.
    pub fn cached(&self, cpu: CpuId, va: VirtualAddress) -> Option<TlbEntry> {
        let state = self.cpus[cpu].lock();
        let page = va.as_usize() >> PAGE_SHIFT;
        let tag = if va.is_kernel() { None } else { state.context };
        state.tlb.get(&(tag, page)).copied()
    }

    fn frame(&self, pa: PhysicalAddress) -> &PageTable {
        self.memory
            .get(pa.frame_number().as_usize())
            .unwrap_or_else(|| panic!("frame {pa} is not backed by emulated memory"))
    }

    fn targets(&self, cpus: CpuSet) -> impl Iterator<Item = &Mutex<Cpu>> {
        cpus.iter().filter_map(|cpu| self.cpus.get(cpu))
    }
}

impl Machine for EmulatedMachine {
    fn cpu_count(&self) -> usize {
        self.cpus.len()
    }

    fn current_cpu(&self) -> CpuId {
        let cpu = CURRENT_CPU.with(Cell::get);
        assert!(cpu < self.cpus.len(), "current CPU {cpu} does not exist");
        cpu
    }

    fn context_count(&self) -> usize {
        self.contexts
    }

    fn managed_frames(&self) -> Range<FrameNumber> {
        FrameNumber::new(0)..FrameNumber::new(self.memory.len())
    }

    fn alloc_frame(&self) -> Option<PhysicalAddress> {
        let frame = self.free.lock().pop()?.start();
        self.frame(frame).zero();
        Some(frame)
    }

    fn free_frame(&self, frame: PhysicalAddress) {
        let number = frame.frame_number();
        assert!(
            number.as_usize() < self.memory.len(),
            "freeing frame {frame} outside emulated memory"
        );
        let mut free = self.free.lock();
        assert!(!free.contains(&number), "double free of frame {frame}");
        free.push(number);
    }

    fn mapped_table(&self, frame: PhysicalAddress) -> &PageTable {
        self.frame(frame)
    }

    fn map_window(&self, frame: PhysicalAddress) -> &PageTable {
        let previous = self.window.swap(frame.as_usize(), Ordering::AcqRel);
        assert_eq!(previous, NO_WINDOW, "mapping window already in use");
        self.window_maps.fetch_add(1, Ordering::Relaxed);
        self.frame(frame)
    }

    fn unmap_window(&self) {
        let previous = self.window.swap(NO_WINDOW, Ordering::AcqRel);
        assert_ne!(previous, NO_WINDOW, "mapping window not in use");
    }

    fn invalidate_page(&self, cpus: CpuSet, context: Option<ContextId>, va: VirtualAddress) {
        let page = va.as_usize() >> PAGE_SHIFT;
        for cpu in self.targets(cpus) {
            cpu.lock().tlb.remove(&(context, page));
        }
        self.invalidations.fetch_add(1, Ordering::Relaxed);
    }

    fn flush_tlb(&self, cpus: CpuSet, context: Option<ContextId>) {
        for cpu in self.targets(cpus) {
            cpu.lock()
                .tlb
                .retain(|(tag, _), entry| entry.global || *tag != context);
        }
        self.flushes.fetch_add(1, Ordering::Relaxed);
    }

    fn load_context(&self, root: PhysicalAddress, context: Option<ContextId>) {
        let mut cpu = self.cpus[self.current_cpu()].lock();
        cpu.root = Some(root);
        cpu.context = context;
        if context.is_none() {
            cpu.tlb.retain(|(tag, _), entry| entry.global || tag.is_some());
        }
    }

    fn current_root(&self) -> Option<PhysicalAddress> {
        self.cpus[self.current_cpu()].lock().root
    }
}
