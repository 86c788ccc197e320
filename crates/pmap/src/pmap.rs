//! The physical map: boot-time state shared by every address space, and the
//! operations that act on physical pages rather than on one address space.

use alloc::boxed::Box;
use alloc::sync::{Arc, Weak};
use alloc::vec::Vec;

use crate::arch::{
    ENTRIES_PER_TABLE, EntryFlags, KERNEL_BASE, KERNEL_SLOT, MAX_KERNEL_SEGMENTS, PAGE_SIZE,
    PageEntry, SEGMENT_SIZE, TranslationEntry,
};
use crate::context::{Assignment, ContextTable};
use crate::lock::{DirectionLock, lock_pmap, lock_pv_then_pmap};
use crate::ptp::PtpPool;
use crate::pv::{PvEntry, PvHead, PvTable};
use crate::pv_chunk::PvChunkAllocator;
use crate::registry::Registry;
use crate::space::{AddressSpace, Segment, SpaceInner, SpaceKind};
use crate::tlb::Shootdown;
use crate::window::MappingWindow;
use crate::{
    Attributes, ContextId, CpuSet, MAX_CPUS, Machine, PhysicalAddress, PmapConfig, PmapError,
    Protection, VirtualAddress,
};

/// State shared by the physical map and every address space.
pub(crate) struct Shared {
    machine: Arc<dyn Machine>,
    pub config: PmapConfig,
    pub direction: DirectionLock,
    pub pv: PvTable,
    pub chunks: spin::Mutex<PvChunkAllocator>,
    pool: spin::Mutex<PtpPool>,
    pub registry: spin::Mutex<Registry>,
    pub window: MappingWindow,
    pub contexts: Option<spin::Mutex<ContextTable>>,
    /// The user address space loaded on each CPU.
    loaded: Box<[spin::Mutex<Option<Arc<SpaceInner>>>]>,
}

impl Shared {
    pub fn machine(&self) -> &dyn Machine {
        &*self.machine
    }

    /// Takes a zeroed frame for a user page table page: pooled first, then fresh.
    pub fn alloc_table_frame(&self) -> Option<PhysicalAddress> {
        let pooled = self.pool.lock().take();
        pooled.or_else(|| self.machine.alloc_frame())
    }

    /// Returns an empty page table frame to the pool, or to the machine if
    /// the pool is full.
    pub fn release_table_frame(&self, frame: PhysicalAddress) {
        let overflow = self.pool.lock().give(frame);
        if let Some(frame) = overflow {
            self.machine.free_frame(frame);
        }
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        let machine = &self.machine;
        for frame in self.pool.get_mut().drain() {
            machine.free_frame(frame);
        }
    }
}

/// The machine-dependent physical map of one machine.
///
/// Owns the kernel address space, the reverse map of every managed frame, and
/// the pools that page table pages and reverse-map records come from.
pub struct PmapSystem {
    shared: Arc<Shared>,
    kernel: AddressSpace,
}

impl PmapSystem {
    /// Bootstraps the physical map: builds the kernel address space and its
    /// first `config.initial_kernel_segments` page table pages.
    ///
    /// # Panics
    ///
    /// Panics if the machine reports no CPUs or more than [`MAX_CPUS`].
    pub fn new(machine: Arc<dyn Machine>, config: PmapConfig) -> Result<Self, PmapError> {
        let cpus = machine.cpu_count();
        assert!(
            cpus > 0 && cpus <= MAX_CPUS,
            "pmap_bootstrap: unsupported CPU count {cpus}"
        );
        let contexts = match machine.context_count() {
            0 => None,
            count => Some(spin::Mutex::new(ContextTable::new(count))),
        };
        let managed = machine.managed_frames();
        let root = machine.alloc_frame().ok_or(PmapError::ResourceShortage)?;

        let shared = Arc::new(Shared {
            config,
            direction: DirectionLock::new(),
            pv: PvTable::new(managed),
            chunks: spin::Mutex::new(PvChunkAllocator::new(config.pv_chunk_limit)),
            pool: spin::Mutex::new(PtpPool::new(config.ptp_pool_capacity)),
            registry: spin::Mutex::new(Registry::new()),
            window: MappingWindow::new(),
            contexts,
            loaded: (0..cpus).map(|_| spin::Mutex::new(None)).collect(),
            machine,
        });
        let id = shared.registry.lock().allocate_id();
        let kernel = AddressSpace(Arc::new(SpaceInner::new(
            id,
            SpaceKind::Kernel,
            shared.clone(),
            root,
        )));
        let system = Self { shared, kernel };

        let wanted = config.initial_kernel_segments;
        let segments = system.grow_kernel_segments(wanted);
        if segments < wanted {
            log::error!("pmap_bootstrap: only {segments} of {wanted} kernel page table pages");
            return Err(PmapError::ResourceShortage);
        }

        log::info!(
            "pmap_bootstrap: {} managed frames, {cpus} CPUs, {} contexts, kernel space {:#x}..{}",
            system.shared.pv.len(),
            system.shared.machine().context_count(),
            KERNEL_BASE,
            system.kernel_limit()
        );
        Ok(system)
    }

    /// The kernel address space.
    pub fn kernel(&self) -> &AddressSpace {
        &self.kernel
    }

    /// Creates an empty user address space.
    ///
    /// The new page directory shares the kernel's page table pages, so kernel
    /// addresses resolve in every address space.
    pub fn create(&self) -> Result<AddressSpace, PmapError> {
        let shared = &self.shared;
        let kernel = &self.kernel.0;
        let root = shared.machine().alloc_frame().ok_or_else(|| {
            log::error!("pmap_create: no frame for a page directory");
            PmapError::ResourceShortage
        })?;

        // Holding the kernel lock keeps kernel growth from missing the new space.
        let kernel_state = lock_pmap(kernel);
        let kernel_root = kernel.root_table();
        let table = shared.machine().mapped_table(root);
        for slot in KERNEL_SLOT..KERNEL_SLOT + kernel_state.kernel_ptps.len() {
            table.set_entry(slot, kernel_root.entry(slot));
        }

        let mut registry = shared.registry.lock();
        let id = registry.allocate_id();
        let inner = Arc::new(SpaceInner::new(id, SpaceKind::User, shared.clone(), root));
        registry.register(id, Arc::downgrade(&inner));
        drop(registry);
        drop(kernel_state);

        log::debug!("pmap_create: {id:?} with page directory {root}");
        Ok(AddressSpace(inner))
    }

    /// End of the kernel address range currently backed by page table pages.
    pub fn kernel_limit(&self) -> VirtualAddress {
        Self::limit_of(lock_pmap(&self.kernel.0).kernel_ptps.len())
    }

    fn limit_of(segments: usize) -> VirtualAddress {
        VirtualAddress::new(KERNEL_BASE + segments * SEGMENT_SIZE)
    }

    /// Extends the kernel's page table pages to cover addresses below `max_va`
    /// and installs them in every address space. Returns the new kernel limit,
    /// which falls short of `max_va` if frames run out.
    pub fn grow_kernel(&self, max_va: VirtualAddress) -> VirtualAddress {
        let wanted = max_va
            .as_usize()
            .saturating_sub(KERNEL_BASE)
            .div_ceil(SEGMENT_SIZE);
        let before = self.kernel.ptp_count();
        let segments = self.grow_kernel_segments(wanted);
        let limit = Self::limit_of(segments);
        if segments > before {
            log::info!("pmap_growkernel: kernel space now ends at {limit}");
        }
        limit
    }

    /// Grows the kernel to `target` page table pages and returns how many it has.
    fn grow_kernel_segments(&self, target: usize) -> usize {
        let shared = &*self.shared;
        let kernel = &self.kernel.0;
        let target = target.min(MAX_KERNEL_SEGMENTS);

        let mut state = lock_pmap(kernel);
        let first_new = state.kernel_ptps.len();
        while state.kernel_ptps.len() < target {
            let Some(frame) = shared.machine().alloc_frame() else {
                log::error!(
                    "pmap_growkernel: out of frames at {} kernel page table pages",
                    state.kernel_ptps.len()
                );
                break;
            };
            let slot = KERNEL_SLOT + state.kernel_ptps.len();
            kernel.root_table().set_entry(slot, PageEntry::table(frame, false));
            state.kernel_ptps.push(frame);
        }
        let grown = state.kernel_ptps.len();

        let mut holds = Vec::new();
        if grown > first_new {
            let spaces = shared.registry.lock().snapshot();
            holds.extend(spaces.iter().filter_map(Weak::upgrade));
            let kernel_root = kernel.root_table();
            for space in &holds {
                let root = space.root_table();
                for slot in KERNEL_SLOT + first_new..KERNEL_SLOT + grown {
                    root.set_entry(slot, kernel_root.entry(slot));
                }
            }
        }
        drop(state);
        drop(holds);
        grown
    }

    /// Loads `space` on the calling CPU.
    ///
    /// On a tagged TLB a context is assigned on first use, taking back the
    /// least recently used context of an address space that is not loaded
    /// anywhere if none is free. Reloading the space that is already loaded
    /// does nothing.
    pub fn activate(&self, space: &AddressSpace) {
        let machine = self.shared.machine();
        let cpu = machine.current_cpu();
        let inner = &space.0;

        let mut slot = self.shared.loaded[cpu].lock();
        let loaded = slot
            .as_ref()
            .is_some_and(|current| Arc::ptr_eq(current, inner));
        if loaded && machine.current_root() == Some(inner.root()) {
            return;
        }

        let previous = slot.replace(inner.clone());
        if let Some(previous) = &previous {
            previous.mark_inactive(cpu);
        }
        inner.mark_active(cpu);
        let context = self.assign_context(inner);
        machine.load_context(inner.root(), context);
        drop(slot);
        drop(previous);
    }

    /// Unloads the calling CPU's address space and switches to the kernel's.
    pub fn deactivate(&self) {
        let machine = self.shared.machine();
        let cpu = machine.current_cpu();
        let previous = self.shared.loaded[cpu].lock().take();
        if let Some(previous) = &previous {
            previous.mark_inactive(cpu);
        }
        machine.load_context(self.kernel.root(), None);
        drop(previous);
    }

    fn assign_context(&self, inner: &Arc<SpaceInner>) -> Option<ContextId> {
        if inner.is_kernel() {
            return None;
        }
        let machine = self.shared.machine();
        let mut contexts = self.shared.contexts.as_ref()?.lock();
        if let Some(context) = inner.context() {
            contexts.touch(context);
            return Some(context);
        }

        let Some(Assignment { context, evicted }) =
            contexts.allocate(inner.id(), Arc::downgrade(inner))
        else {
            drop(contexts);
            log::warn!(
                "pmap_activate: every context is loaded, running {:?} untagged",
                inner.id()
            );
            return None;
        };
        if let Some(evicted) = &evicted {
            evicted.clear_context(context);
            log::debug!(
                "pmap_activate: context {} moves from {:?} to {:?}",
                context.as_u16(),
                evicted.id(),
                inner.id()
            );
        }
        machine.flush_tlb(CpuSet::all(machine.cpu_count()), Some(context));
        inner.set_context(context);
        drop(contexts);
        drop(evicted);
        Some(context)
    }

    /// Removes every mapping of the frame at `pa` from every address space.
    pub fn page_remove(&self, pa: PhysicalAddress) {
        let shared = &*self.shared;
        let order = lock_pv_then_pmap(shared);
        let Some(head) = order.head(pa) else {
            return;
        };
        let entries = order.lock(head).drain(&shared.chunks);

        let mut freed = Vec::new();
        let mut holds = Vec::with_capacity(entries.len());
        for entry in &entries {
            let Some(space) = entry.space.upgrade() else {
                continue;
            };
            space.with_mapping(&order, entry, |state, segment| {
                let index = entry.va.table_index();
                let old = segment.table.swap_entry(index, PageEntry::empty());
                assert_eq!(
                    old.frame(),
                    Some(pa),
                    "pmap_page_remove: {} in {:?} does not map {pa}",
                    entry.va,
                    entry.pmap
                );
                if old.is_wired() {
                    log::warn!(
                        "pmap_page_remove: removing wired mapping {} of {pa} in {:?}",
                        entry.va,
                        entry.pmap
                    );
                }
                space.forget_entry(state, segment.ptp, index, old);
                head.merge_attrs(old.attributes());

                let mut shootdown = Shootdown::new(shared.machine(), &space, 1);
                shootdown.page(entry.va);
                shootdown.flush();

                if let Some(handle) = segment.ptp {
                    if state.ptps.get(handle).live() == 0 {
                        freed.push(space.free_ptp(state, handle));
                    }
                }
            });
            holds.push(space);
        }
        drop(order);

        for frame in freed {
            shared.release_table_frame(frame);
        }
        drop(holds);
    }

    /// Visits every mapping of `pa` in head-to-map order until `visit`
    /// returns false.
    fn walk_mappings(
        &self,
        pa: PhysicalAddress,
        mut visit: impl FnMut(&PvHead, &SpaceInner, &PvEntry, &Segment<'_>) -> bool,
    ) {
        let shared = &*self.shared;
        let order = lock_pv_then_pmap(shared);
        let Some(head) = order.head(pa) else {
            return;
        };
        let entries = order.lock(head).entries(&shared.chunks);

        let mut holds = Vec::with_capacity(entries.len());
        for entry in &entries {
            let Some(space) = entry.space.upgrade() else {
                continue;
            };
            let more = space.with_mapping(&order, entry, |_, segment| {
                visit(head, &*space, entry, segment)
            });
            holds.push(space);
            if !more {
                break;
            }
        }
        drop(order);
        drop(holds);
    }

    /// Returns true if any bit of `mask` is set for the frame at `pa`, in its
    /// side-table or in any mapping of it.
    pub fn test_attrs(&self, pa: PhysicalAddress, mask: Attributes) -> bool {
        let Some(head) = self.shared.pv.head(pa) else {
            return false;
        };
        if head.attrs().intersects(mask) {
            return true;
        }
        self.walk_mappings(pa, |head, _, entry, segment| {
            let observed = segment.table.entry(entry.va.table_index()).attributes();
            head.merge_attrs(observed);
            !observed.intersects(mask)
        });
        head.attrs().intersects(mask)
    }

    /// Folds the bits of every mapping of `pa` into its side-table, clears
    /// `clear` in the mappings and the side-table, then sets `set` in the
    /// side-table. Returns true if any bit of `set | clear` was set beforehand.
    pub fn change_attrs(&self, pa: PhysicalAddress, set: Attributes, clear: Attributes) -> bool {
        let Some(head) = self.shared.pv.head(pa) else {
            return false;
        };
        let machine = self.shared.machine();
        let mut observed = Attributes::empty();
        self.walk_mappings(pa, |head, space, entry, segment| {
            let index = entry.va.table_index();
            let mut seen = segment.table.entry(index).attributes();
            if seen.intersects(clear) {
                let previous = segment
                    .table
                    .clear_flags(index, EntryFlags::from_attributes(clear));
                seen |= previous.attributes();
                let mut shootdown = Shootdown::new(machine, space, 1);
                shootdown.page(entry.va);
            }
            head.merge_attrs(seen);
            observed |= seen;
            true
        });
        let previous = head.update_attrs(set, clear);
        (observed | previous).intersects(set | clear)
    }

    pub fn is_referenced(&self, pa: PhysicalAddress) -> bool {
        self.test_attrs(pa, Attributes::REFERENCED)
    }

    pub fn is_modified(&self, pa: PhysicalAddress) -> bool {
        self.test_attrs(pa, Attributes::MODIFIED)
    }

    /// Clears the referenced bit of `pa`, returning whether it was set.
    pub fn clear_referenced(&self, pa: PhysicalAddress) -> bool {
        self.change_attrs(pa, Attributes::empty(), Attributes::REFERENCED)
    }

    /// Clears the modified bit of `pa`, returning whether it was set.
    pub fn clear_modified(&self, pa: PhysicalAddress) -> bool {
        self.change_attrs(pa, Attributes::empty(), Attributes::MODIFIED)
    }

    /// Lowers the access rights of every mapping of `pa`.
    ///
    /// Without read access every mapping is removed; without write access
    /// every mapping becomes read-only. Anything else leaves the mappings alone.
    pub fn page_protect(&self, pa: PhysicalAddress, prot: Protection) {
        if !prot.contains(Protection::READ) {
            self.page_remove(pa);
            return;
        }
        if prot.contains(Protection::WRITE) {
            return;
        }
        let machine = self.shared.machine();
        self.walk_mappings(pa, |head, space, entry, segment| {
            let index = entry.va.table_index();
            if segment.table.entry(index).is_writable() {
                let previous = segment.table.clear_flags(index, EntryFlags::WRITABLE);
                head.merge_attrs(previous.attributes());
                let mut shootdown = Shootdown::new(machine, space, 1);
                shootdown.page(entry.va);
            }
            true
        });
    }

    /// Number of address space mappings of the frame at `pa`.
    pub fn mapping_count(&self, pa: PhysicalAddress) -> usize {
        self.shared.pv.head(pa).map_or(0, |head| head.lock().len())
    }

    /// Maps `va` to `pa` in the kernel address space, wired and without a
    /// reverse-map record.
    ///
    /// # Panics
    ///
    /// Panics if the addresses are unaligned, `va` is beyond the kernel limit,
    /// or `va` already holds a managed mapping.
    pub fn kenter(&self, va: VirtualAddress, pa: PhysicalAddress, prot: Protection) {
        assert!(
            va.is_aligned(PAGE_SIZE) && pa.is_aligned(PAGE_SIZE) && va.is_kernel(),
            "pmap_kenter: bad mapping {va} -> {pa}"
        );
        let kernel = &self.kernel.0;
        let mut state = lock_pmap(kernel);
        let segment = kernel
            .open_segment(&mut state, va.directory_index())
            .unwrap_or_else(|| panic!("pmap_kenter: {va} is beyond the kernel limit"));
        let index = va.table_index();
        let new = PageEntry::mapping(pa, prot, true, false).with_flags(EntryFlags::GLOBAL);
        let old = segment.table.swap_entry(index, new);
        assert!(
            !old.is_managed(),
            "pmap_kenter: {va} already has a managed mapping"
        );

        if old.is_valid() {
            if !old.is_wired() {
                state.stats.wired += 1;
            }
            let mut shootdown = Shootdown::new(self.shared.machine(), kernel, 1);
            shootdown.page(va);
        } else {
            state.stats.resident += 1;
            state.stats.wired += 1;
        }
    }

    /// Removes kernel mappings made by [`PmapSystem::kenter`] in `[va, va + len)`.
    ///
    /// # Panics
    ///
    /// Panics if the range is unaligned or holds a managed mapping.
    pub fn kremove(&self, va: VirtualAddress, len: usize) {
        assert!(
            va.is_aligned(PAGE_SIZE) && len % PAGE_SIZE == 0 && va.is_kernel(),
            "pmap_kremove: bad range {va} + {len:#x}"
        );
        let kernel = &self.kernel.0;
        let mut state = lock_pmap(kernel);
        let mut shootdown =
            Shootdown::new(self.shared.machine(), kernel, self.shared.config.tlb_batch);
        for offset in (0..len).step_by(PAGE_SIZE) {
            let page = va + offset;
            let Some(segment) = kernel.open_segment(&mut state, page.directory_index()) else {
                continue;
            };
            let index = page.table_index();
            let entry = segment.table.entry(index);
            if !entry.is_valid() {
                continue;
            }
            assert!(
                !entry.is_managed(),
                "pmap_kremove: {page} is a managed mapping"
            );
            let old = segment.table.swap_entry(index, PageEntry::empty());
            drop(segment);
            kernel.forget_entry(&mut state, None, index, old);
            shootdown.page(page);
        }
        shootdown.flush();
    }

    /// Fills the frame at `pa` with zeroes.
    pub fn zero_page(&self, pa: PhysicalAddress) {
        self.shared.window.map(self.shared.machine(), pa).zero();
    }

    /// Copies the contents of the frame at `src` to the frame at `dst`.
    pub fn copy_page(&self, src: PhysicalAddress, dst: PhysicalAddress) {
        let machine = self.shared.machine();
        let mut words = alloc::vec![0u32; ENTRIES_PER_TABLE];
        {
            let source = self.shared.window.map(machine, src);
            for (index, word) in words.iter_mut().enumerate() {
                *word = source.load_word(index);
            }
        }
        let target = self.shared.window.map(machine, dst);
        for (index, word) in words.iter().enumerate() {
            target.store_word(index, *word);
        }
    }
}

impl Drop for PmapSystem {
    fn drop(&mut self) {
        for (cpu, slot) in self.shared.loaded.iter().enumerate() {
            let loaded = slot.lock().take();
            if let Some(space) = &loaded {
                space.mark_inactive(cpu);
            }
            drop(loaded);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::software::EmulatedMachine;
    use crate::arch::{MAX_USER_ADDRESS, MAX_VIRTUAL_ADDRESS};

    fn setup_with(machine: EmulatedMachine, config: PmapConfig) -> (Arc<EmulatedMachine>, PmapSystem) {
        EmulatedMachine::set_current_cpu(0);
        let machine = Arc::new(machine);
        let system = PmapSystem::new(machine.clone(), config).unwrap();
        (machine, system)
    }

    fn setup() -> (Arc<EmulatedMachine>, PmapSystem) {
        setup_with(EmulatedMachine::new(64), PmapConfig::DEFAULT)
    }

    fn va(address: usize) -> VirtualAddress {
        VirtualAddress::new(address)
    }

    fn pa(address: usize) -> PhysicalAddress {
        PhysicalAddress::new(address)
    }

    #[test]
    fn bootstrap_builds_kernel_space() {
        let (machine, system) = setup();
        assert_eq!(system.kernel().ptp_count(), 4);
        assert_eq!(system.kernel_limit(), va(KERNEL_BASE + 4 * SEGMENT_SIZE));
        assert_eq!(machine.free_frames(), 64 - 5);
    }

    #[test]
    fn bootstrap_fails_without_frames() {
        EmulatedMachine::set_current_cpu(0);
        let machine = Arc::new(EmulatedMachine::new(3));
        let result = PmapSystem::new(machine.clone(), PmapConfig::DEFAULT);
        assert_eq!(result.err(), Some(PmapError::ResourceShortage));
        assert_eq!(machine.free_frames(), 3);
    }

    #[test]
    fn enter_extract_remove() {
        let (_machine, system) = setup();
        let space = system.create().unwrap();

        space
            .enter(va(0x1000), pa(0x2000), Protection::READ_WRITE, false, false)
            .unwrap();
        assert_eq!(space.extract(va(0x1000)), Some(pa(0x2000)));
        assert_eq!(space.extract(va(0x1234)), Some(pa(0x2234)));
        assert_eq!(space.live_entries(va(0x1000)), Some(1));

        space
            .enter(va(0x1000), pa(0x2000), Protection::READ, false, false)
            .unwrap();
        assert_eq!(space.live_entries(va(0x1000)), Some(1));
        assert_eq!(space.stats().resident, 1);
        assert_eq!(system.mapping_count(pa(0x2000)), 1);

        space.remove(va(0x1000), va(0x2000));
        assert_eq!(space.extract(va(0x1000)), None);
        assert_eq!(space.stats(), Default::default());
        assert_eq!(space.ptp_count(), 0);
        assert_eq!(system.mapping_count(pa(0x2000)), 0);
    }

    #[test]
    fn replacing_the_frame_moves_the_reverse_map_record() {
        let (_machine, system) = setup();
        let space = system.create().unwrap();
        space
            .enter(va(0x1000), pa(0x2000), Protection::READ_WRITE, true, false)
            .unwrap();
        space
            .enter(va(0x1000), pa(0x3000), Protection::READ_WRITE, false, false)
            .unwrap();

        assert_eq!(space.extract(va(0x1000)), Some(pa(0x3000)));
        assert_eq!(system.mapping_count(pa(0x2000)), 0);
        assert_eq!(system.mapping_count(pa(0x3000)), 1);
        assert_eq!(space.live_entries(va(0x1000)), Some(1));
        assert_eq!(space.stats().resident, 1);
        assert_eq!(space.stats().wired, 0);
        space.remove(va(0x1000), va(0x2000));
    }

    #[test]
    fn page_remove_unmaps_every_address_space() {
        let (_machine, system) = setup();
        let a = system.create().unwrap();
        let b = system.create().unwrap();
        a.enter(va(0x4000), pa(0x5000), Protection::READ, false, false)
            .unwrap();
        b.enter(va(0x7000), pa(0x5000), Protection::READ_WRITE, false, false)
            .unwrap();
        assert_eq!(system.mapping_count(pa(0x5000)), 2);

        system.page_remove(pa(0x5000));
        assert_eq!(a.extract(va(0x4000)), None);
        assert_eq!(b.extract(va(0x7000)), None);
        assert_eq!(system.mapping_count(pa(0x5000)), 0);
        assert_eq!(a.stats().resident, 0);
        assert_eq!(a.ptp_count(), 0);
        assert_eq!(b.ptp_count(), 0);
    }

    #[test]
    fn remove_of_unmapped_range_changes_nothing() {
        let (_machine, system) = setup();
        let space = system.create().unwrap();
        space
            .enter(va(0x0080_0000), pa(0x3000), Protection::READ, false, false)
            .unwrap();
        space.remove(va(0), va(0x0040_0000));
        space.remove(va(0x0080_1000), va(0x0100_0000));
        assert_eq!(space.stats().resident, 1);
        assert_eq!(system.mapping_count(pa(0x3000)), 1);

        space.remove(va(0), va(MAX_USER_ADDRESS));
        assert_eq!(space.stats().resident, 0);
        assert_eq!(space.ptp_count(), 0);
    }

    #[test]
    fn protect_write_protects_and_invalidates() {
        let (machine, system) = setup();
        let space = system.create().unwrap();
        space
            .enter(va(0x1000), pa(0x2000), Protection::READ_WRITE, false, false)
            .unwrap();
        system.activate(&space);
        assert_eq!(machine.access(va(0x1000), true), Some(pa(0x2000)));

        space.protect(va(0x1000), va(0x3000), Protection::READ);
        assert_eq!(machine.access(va(0x1000), true), None);
        assert_eq!(machine.access(va(0x1000), false), Some(pa(0x2000)));
        assert!(system.is_modified(pa(0x2000)));
        assert_eq!(space.live_entries(va(0x1000)), Some(1));
        system.deactivate();
        space.remove(va(0x1000), va(0x2000));
    }

    #[test]
    fn protect_to_none_removes() {
        let (_machine, system) = setup();
        let space = system.create().unwrap();
        for page in 0..3 {
            space
                .enter(va(page * PAGE_SIZE), pa(0x3000), Protection::READ, false, false)
                .unwrap();
        }
        space.protect(va(0), va(3 * PAGE_SIZE), Protection::NONE);
        assert_eq!(space.stats().resident, 0);
        assert_eq!(space.ptp_count(), 0);
        assert_eq!(system.mapping_count(pa(0x3000)), 0);
    }

    #[test]
    fn shortage_without_blocking_then_steal() {
        let config = PmapConfig::DEFAULT
            .with_initial_kernel_segments(1)
            .with_ptp_pool_capacity(0);
        let (machine, system) = setup_with(EmulatedMachine::new(10), config);
        let a = system.create().unwrap();
        let b = system.create().unwrap();
        machine.reserve(pa(0x1000));
        for segment in 0..5 {
            a.enter(va(segment * SEGMENT_SIZE), pa(0x1000), Protection::READ, false, false)
                .unwrap();
        }
        assert_eq!(machine.free_frames(), 0);

        assert_eq!(
            b.enter(va(0x1000), pa(0x1000), Protection::READ, false, false),
            Err(PmapError::ResourceShortage)
        );
        assert_eq!(b.ptp_count(), 0);

        b.enter(va(0x1000), pa(0x1000), Protection::READ, false, true)
            .unwrap();
        assert_eq!(b.extract(va(0x1000)), Some(pa(0x1000)));
        assert_eq!(a.extract(va(0)), None);
        assert_eq!(a.ptp_count(), 4);
        assert_eq!(a.stats().resident, 4);
        assert_eq!(system.mapping_count(pa(0x1000)), 5);

        system.page_remove(pa(0x1000));
    }

    #[test]
    fn wired_page_table_pages_are_never_stolen() {
        let config = PmapConfig::DEFAULT
            .with_initial_kernel_segments(1)
            .with_ptp_pool_capacity(0);
        let (machine, system) = setup_with(EmulatedMachine::new(10), config);
        let a = system.create().unwrap();
        let b = system.create().unwrap();
        machine.reserve(pa(0x1000));
        for segment in 0..5 {
            a.enter(va(segment * SEGMENT_SIZE), pa(0x1000), Protection::READ, true, false)
                .unwrap();
        }

        assert_eq!(
            b.enter(va(0x1000), pa(0x1000), Protection::READ, false, true),
            Err(PmapError::ResourceShortage)
        );
        assert_eq!(a.ptp_count(), 5);
        assert_eq!(a.stats().wired, 5);

        system.page_remove(pa(0x1000));
    }

    #[test]
    fn reverse_map_shortage_releases_the_fresh_page_table_page() {
        let config = PmapConfig::DEFAULT.with_pv_chunk_limit(Some(0));
        let (_machine, system) = setup_with(EmulatedMachine::new(64), config);
        let a = system.create().unwrap();
        let b = system.create().unwrap();
        a.enter(va(0x1000), pa(0x2000), Protection::READ, false, false)
            .unwrap();

        assert_eq!(
            b.enter(va(0x1000), pa(0x2000), Protection::READ, false, true),
            Err(PmapError::ResourceShortage)
        );
        assert_eq!(b.ptp_count(), 0);
        assert_eq!(b.stats().resident, 0);
        assert_eq!(system.mapping_count(pa(0x2000)), 1);
        a.remove(va(0x1000), va(0x2000));
    }

    #[test]
    fn grow_kernel_reaches_existing_spaces() {
        let config = PmapConfig::DEFAULT.with_initial_kernel_segments(1);
        let (_machine, system) = setup_with(EmulatedMachine::new(64), config);
        let space = system.create().unwrap();

        let limit = system.grow_kernel(va(KERNEL_BASE + 2 * SEGMENT_SIZE + 1));
        assert_eq!(limit, va(KERNEL_BASE + 3 * SEGMENT_SIZE));
        assert_eq!(system.kernel().ptp_count(), 3);
        assert_eq!(system.grow_kernel(va(KERNEL_BASE)), limit);

        let kernel_va = va(KERNEL_BASE + 2 * SEGMENT_SIZE + 0x3000);
        system.kenter(kernel_va, pa(0x4000), Protection::READ_WRITE);
        assert_eq!(space.extract(kernel_va), Some(pa(0x4000)));
    }

    #[test]
    fn create_shares_kernel_mappings() {
        let (_machine, system) = setup();
        let kernel_va = va(KERNEL_BASE + 0x5000);
        system.kenter(kernel_va, pa(0x3000), Protection::READ);
        let space = system.create().unwrap();
        assert_eq!(space.extract(kernel_va), Some(pa(0x3000)));
        assert_eq!(space.ptp_count(), 0);
    }

    #[test]
    fn kenter_and_kremove() {
        let (_machine, system) = setup();
        let kernel = system.kernel();
        let kernel_va = va(KERNEL_BASE + 0x1000);
        system.kenter(kernel_va, pa(0x6000), Protection::READ_WRITE);
        assert_eq!(kernel.extract(kernel_va), Some(pa(0x6000)));
        assert_eq!(system.mapping_count(pa(0x6000)), 0);
        assert_eq!(kernel.stats().wired, 1);

        system.kremove(kernel_va, 2 * PAGE_SIZE);
        assert_eq!(kernel.extract(kernel_va), None);
        assert_eq!(kernel.stats(), Default::default());
    }

    #[test]
    fn managed_kernel_mappings_have_reverse_map_records() {
        let (_machine, system) = setup();
        let kernel_va = va(KERNEL_BASE + 0x2000);
        system
            .kernel()
            .enter(kernel_va, pa(0x7000), Protection::READ_WRITE, false, true)
            .unwrap();
        assert_eq!(system.mapping_count(pa(0x7000)), 1);
        system.page_remove(pa(0x7000));
        assert_eq!(system.kernel().extract(kernel_va), None);
    }

    #[test]
    #[should_panic(expected = "pmap_enter")]
    fn user_space_rejects_kernel_addresses() {
        let (_machine, system) = setup();
        let space = system.create().unwrap();
        let _ = space.enter(va(KERNEL_BASE), pa(0x1000), Protection::READ, false, false);
    }

    #[test]
    fn removal_reaches_every_cpu() {
        let (machine, system) = setup_with(EmulatedMachine::with_topology(64, 2, 0), PmapConfig::DEFAULT);
        let space = system.create().unwrap();
        space
            .enter(va(0x1000), pa(0x2000), Protection::READ, false, false)
            .unwrap();
        for cpu in 0..2 {
            EmulatedMachine::set_current_cpu(cpu);
            system.activate(&space);
            assert_eq!(machine.access(va(0x1000), false), Some(pa(0x2000)));
        }
        assert_eq!(space.active_cpus(), CpuSet::all(2));
        assert!(machine.cached(0, va(0x1000)).is_some());

        space.remove(va(0x1000), va(0x2000));
        assert!(machine.cached(0, va(0x1000)).is_none());
        assert!(machine.cached(1, va(0x1000)).is_none());
        assert_eq!(machine.access(va(0x1000), false), None);

        system.deactivate();
        EmulatedMachine::set_current_cpu(0);
        system.deactivate();
        assert!(space.active_cpus().is_empty());
    }

    #[test]
    fn overflowing_batch_flushes_the_tlb() {
        let config = PmapConfig::DEFAULT.with_tlb_batch(2);
        let (machine, system) = setup_with(EmulatedMachine::new(64), config);
        let space = system.create().unwrap();
        for page in 0..3 {
            space
                .enter(va(page * PAGE_SIZE), pa(0x2000), Protection::READ, false, false)
                .unwrap();
        }
        system.activate(&space);
        for page in 0..3 {
            machine.access(va(page * PAGE_SIZE), false);
        }

        space.remove(va(0), va(3 * PAGE_SIZE));
        assert_eq!(machine.invalidations(), 0);
        assert_eq!(machine.flushes(), 1);
        assert!(machine.cached(0, va(PAGE_SIZE)).is_none());
        system.deactivate();
    }

    #[test]
    fn contexts_are_taken_back_from_unloaded_spaces() {
        let (machine, system) = setup_with(EmulatedMachine::with_topology(64, 1, 2), PmapConfig::DEFAULT);
        let a = system.create().unwrap();
        let b = system.create().unwrap();
        let c = system.create().unwrap();
        a.enter(va(0x1000), pa(0x2000), Protection::READ, false, false)
            .unwrap();

        system.activate(&a);
        assert_eq!(a.context(), Some(ContextId::new(0)));
        machine.access(va(0x1000), false);
        assert!(machine.cached(0, va(0x1000)).is_some());

        system.activate(&b);
        assert_eq!(b.context(), Some(ContextId::new(1)));
        assert_eq!(a.context(), Some(ContextId::new(0)));

        system.activate(&c);
        assert_eq!(a.context(), None);
        assert_eq!(c.context(), Some(ContextId::new(0)));
        assert_eq!(machine.loaded_context(0), Some(ContextId::new(0)));
        // The entry a cached under the reused context is gone.
        assert!(machine.cached(0, va(0x1000)).is_none());

        system.deactivate();
        a.remove(va(0x1000), va(0x2000));
    }

    #[test]
    fn reactivating_the_loaded_space_is_lazy() {
        let (machine, system) = setup_with(EmulatedMachine::with_topology(64, 1, 4), PmapConfig::DEFAULT);
        let space = system.create().unwrap();
        system.activate(&space);
        let flushes = machine.flushes();
        system.activate(&space);
        assert_eq!(machine.flushes(), flushes);
        assert_eq!(machine.current_root(), Some(space.root()));
        system.deactivate();
        assert_eq!(machine.current_root(), Some(system.kernel().root()));
    }

    #[test]
    fn referenced_and_modified_tracking() {
        let (machine, system) = setup();
        let space = system.create().unwrap();
        let page = pa(0x2000);
        space
            .enter(va(0x1000), page, Protection::READ_WRITE, false, false)
            .unwrap();
        system.activate(&space);
        assert!(!system.is_referenced(page));

        machine.access(va(0x1000), false);
        assert!(system.is_referenced(page));
        assert!(!system.is_modified(page));

        machine.access(va(0x1000), true);
        assert!(system.is_modified(page));
        assert!(system.clear_modified(page));
        assert!(!system.is_modified(page));
        assert!(!system.clear_modified(page));

        // The cleared entry was invalidated, so the next write marks it again.
        machine.access(va(0x1000), true);
        assert!(system.is_modified(page));

        space.remove(va(0x1000), va(0x2000));
        assert!(system.is_modified(page));
        assert!(system.clear_referenced(page));
        assert!(!system.is_referenced(page));
        system.deactivate();
    }

    #[test]
    fn change_attrs_sets_the_side_table() {
        let (_machine, system) = setup();
        let page = pa(0x3000);
        assert!(!system.change_attrs(page, Attributes::REFERENCED, Attributes::empty()));
        assert!(system.is_referenced(page));
        assert!(system.change_attrs(page, Attributes::empty(), Attributes::REFERENCED));
        assert!(!system.is_referenced(page));
    }

    #[test]
    fn change_attrs_reports_hardware_bits() {
        let (machine, system) = setup();
        let space = system.create().unwrap();
        let page = pa(0x2000);
        space
            .enter(va(0x1000), page, Protection::READ_WRITE, false, false)
            .unwrap();
        system.activate(&space);
        machine.access(va(0x1000), false);

        assert!(system.change_attrs(page, Attributes::REFERENCED, Attributes::empty()));
        let head = system.shared.pv.head(page).unwrap();
        assert!(head.attrs().contains(Attributes::REFERENCED));

        machine.access(va(0x1000), true);
        assert!(system.change_attrs(page, Attributes::empty(), Attributes::REFERENCED));
        assert_eq!(head.attrs(), Attributes::MODIFIED);
        assert!(!system.is_referenced(page));

        space.remove(va(0x1000), va(0x2000));
        system.deactivate();
    }

    #[test]
    fn kernel_ranges_up_to_the_top_segment() {
        let (_machine, system) = setup();
        let kernel = system.kernel();
        let top = va(0xFFFF_F000);
        system.kenter(va(KERNEL_BASE), pa(0x4000), Protection::READ_WRITE);

        kernel.protect(va(KERNEL_BASE), top, Protection::READ);
        assert_eq!(kernel.extract(va(KERNEL_BASE)), Some(pa(0x4000)));
        kernel.remove(va(MAX_VIRTUAL_ADDRESS), top);
        assert_eq!(kernel.extract(va(KERNEL_BASE)), Some(pa(0x4000)));

        kernel.remove(va(KERNEL_BASE), top);
        assert_eq!(kernel.extract(va(KERNEL_BASE)), None);
        assert_eq!(kernel.stats(), Default::default());
    }

    #[test]
    fn page_protect_write_protects_every_mapping() {
        let (machine, system) = setup();
        let a = system.create().unwrap();
        let b = system.create().unwrap();
        let page = pa(0x5000);
        a.enter(va(0x1000), page, Protection::READ_WRITE, false, false)
            .unwrap();
        b.enter(va(0x8000), page, Protection::READ_WRITE, false, false)
            .unwrap();

        system.activate(&a);
        assert_eq!(machine.access(va(0x1000), true), Some(page));
        system.page_protect(page, Protection::READ_EXECUTE);
        assert_eq!(machine.access(va(0x1000), true), None);
        assert_eq!(b.extract(va(0x8000)), Some(page));
        assert!(system.is_modified(page));

        system.page_protect(page, Protection::NONE);
        assert_eq!(system.mapping_count(page), 0);
        assert_eq!(a.extract(va(0x1000)), None);
        system.deactivate();
    }

    #[test]
    fn unwire_clears_the_wired_count() {
        let (_machine, system) = setup();
        let space = system.create().unwrap();
        space
            .enter(va(0x1000), pa(0x2000), Protection::READ, true, false)
            .unwrap();
        assert_eq!(space.stats().wired, 1);
        space.unwire(va(0x1000));
        assert_eq!(space.stats().wired, 0);
        space.unwire(va(0x1000));
        assert_eq!(space.stats().wired, 0);
        space.remove(va(0x1000), va(0x2000));
    }

    #[test]
    #[should_panic(expected = "pmap_unwire")]
    fn unwire_of_unmapped_address_panics() {
        let (_machine, system) = setup();
        let space = system.create().unwrap();
        space.unwire(va(0x1000));
    }

    #[test]
    fn collect_keeps_wired_mappings() {
        let (_machine, system) = setup();
        let space = system.create().unwrap();
        space
            .enter(va(0x1000), pa(0x2000), Protection::READ, true, false)
            .unwrap();
        space
            .enter(va(0x2000), pa(0x3000), Protection::READ, false, false)
            .unwrap();
        space
            .enter(va(2 * SEGMENT_SIZE), pa(0x4000), Protection::READ, false, false)
            .unwrap();
        assert_eq!(space.ptp_count(), 2);

        space.collect();
        assert_eq!(space.extract(va(0x1000)), Some(pa(0x2000)));
        assert_eq!(space.extract(va(0x2000)), None);
        assert_eq!(space.ptp_count(), 1);
        assert_eq!(space.stats().resident, 1);
        space.remove(va(0x1000), va(0x2000));
    }

    #[test]
    fn released_spaces_return_their_frames() {
        let config = PmapConfig::DEFAULT.with_ptp_pool_capacity(0);
        let (machine, system) = setup_with(EmulatedMachine::new(64), config);
        let before = machine.free_frames();

        let space = system.create().unwrap();
        let other = space.reference();
        space
            .enter(va(0x1000), pa(0x2000), Protection::READ, false, false)
            .unwrap();
        space
            .enter(va(SEGMENT_SIZE), pa(0x3000), Protection::READ, false, false)
            .unwrap();
        space.remove(va(0), va(MAX_USER_ADDRESS));
        space.release();
        assert!(machine.free_frames() < before);
        other.release();
        assert_eq!(machine.free_frames(), before);

        drop(system);
        assert_eq!(machine.free_frames(), 64);
    }

    #[test]
    fn pooled_page_table_pages_are_reused() {
        let (machine, system) = setup();
        let space = system.create().unwrap();
        space
            .enter(va(0x1000), pa(0x2000), Protection::READ, false, false)
            .unwrap();
        space.remove(va(0x1000), va(0x2000));
        let free = machine.free_frames();
        space
            .enter(va(0x1000), pa(0x2000), Protection::READ, false, false)
            .unwrap();
        assert_eq!(machine.free_frames(), free);
        space.remove(va(0x1000), va(0x2000));
    }

    #[test]
    #[should_panic(expected = "pmap_destroy")]
    fn releasing_a_space_with_mappings_panics() {
        let (_machine, system) = setup();
        let space = system.create().unwrap();
        space
            .enter(va(0x1000), pa(0x2000), Protection::READ, false, false)
            .unwrap();
        space.release();
    }

    #[test]
    fn zero_and_copy_through_the_window() {
        let (machine, system) = setup();
        let (src, dst) = (pa(0x2000), pa(0x3000));
        machine.mapped_table(src).store_word(7, 0xdead_beef);
        system.copy_page(src, dst);
        assert_eq!(machine.mapped_table(dst).load_word(7), 0xdead_beef);
        system.zero_page(dst);
        assert_eq!(machine.mapped_table(dst).load_word(7), 0);
        assert!(!machine.window_in_use());
    }
}
