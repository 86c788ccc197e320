//! Address spaces and the per-space mapping operations.

use alloc::sync::Arc;
use alloc::vec::Vec;
use core::fmt;
use core::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use crate::arch::{
    ENTRIES_PER_TABLE, EntryFlags, KERNEL_SLOT, MAX_USER_ADDRESS, MAX_VIRTUAL_ADDRESS, PAGE_SIZE,
    PageEntry, PageTable, SEGMENT_SHIFT, TranslationEntry,
};
use crate::lock::{HeadToMap, MapToHead, ReadOrder, lock_pmap, lock_pmap_then_pv};
use crate::pmap::Shared;
use crate::ptp::{PageTablePage, PtpArena, PtpHandle};
use crate::pv::PvEntry;
use crate::registry::PmapId;
use crate::tlb::Shootdown;
use crate::window::TableRef;
use crate::{ContextId, CpuId, CpuSet, PhysicalAddress, PmapError, Protection, VirtualAddress};

const NO_CONTEXT: u32 = u32::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SpaceKind {
    Kernel,
    User,
}

/// Page counts of an address space.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PmapStats {
    /// Valid leaf entries.
    pub resident: usize,
    /// Valid leaf entries carrying the wired bit.
    pub wired: usize,
}

/// Mutable state of an address space, guarded by its lock.
pub(crate) struct SpaceState {
    pub ptps: PtpArena,
    pub stats: PmapStats,
    /// Kernel page table frames in directory order. Empty for user spaces.
    pub kernel_ptps: Vec<PhysicalAddress>,
}

/// A page table page opened for access.
pub(crate) struct Segment<'a> {
    pub table: TableRef<'a>,
    /// `None` for kernel page table pages, which are never freed.
    pub ptp: Option<PtpHandle>,
}

pub(crate) struct SpaceInner {
    id: PmapId,
    kind: SpaceKind,
    shared: Arc<Shared>,
    root: PhysicalAddress,
    pub(crate) state: spin::Mutex<SpaceState>,
    active: AtomicU64,
    context: AtomicU32,
}

impl SpaceInner {
    pub(crate) fn new(id: PmapId, kind: SpaceKind, shared: Arc<Shared>, root: PhysicalAddress) -> Self {
        Self {
            id,
            kind,
            shared,
            root,
            state: spin::Mutex::new(SpaceState {
                ptps: PtpArena::new(),
                stats: PmapStats::default(),
                kernel_ptps: Vec::new(),
            }),
            active: AtomicU64::new(0),
            context: AtomicU32::new(NO_CONTEXT),
        }
    }

    pub fn id(&self) -> PmapId {
        self.id
    }

    pub fn is_kernel(&self) -> bool {
        self.kind == SpaceKind::Kernel
    }

    pub fn root(&self) -> PhysicalAddress {
        self.root
    }

    pub fn shared(&self) -> &Shared {
        &self.shared
    }

    /// CPUs this space is loaded on.
    pub fn active_cpus(&self) -> CpuSet {
        CpuSet::from_bits(self.active.load(Ordering::Acquire))
    }

    pub fn mark_active(&self, cpu: CpuId) {
        self.active.fetch_or(CpuSet::single(cpu).bits(), Ordering::AcqRel);
    }

    pub fn mark_inactive(&self, cpu: CpuId) {
        self.active.fetch_and(!CpuSet::single(cpu).bits(), Ordering::AcqRel);
    }

    pub fn context(&self) -> Option<ContextId> {
        let raw = self.context.load(Ordering::Acquire);
        (raw != NO_CONTEXT).then(|| ContextId::new(raw as u16))
    }

    pub fn set_context(&self, context: ContextId) {
        self.context
            .store(u32::from(context.as_u16()), Ordering::Release);
    }

    /// Forgets `context` if this space still holds it.
    pub fn clear_context(&self, context: ContextId) {
        let _ = self.context.compare_exchange(
            u32::from(context.as_u16()),
            NO_CONTEXT,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    /// CPUs and tag a shootdown for this space has to reach.
    ///
    /// Kernel translations may be cached anywhere. A space with a context may
    /// have tagged translations on CPUs it is no longer loaded on. Otherwise
    /// only the CPUs it is loaded on can hold its translations.
    pub fn tlb_targets(&self) -> (CpuSet, Option<ContextId>) {
        let all = CpuSet::all(self.shared.machine().cpu_count());
        if self.is_kernel() {
            return (all, None);
        }
        match self.context() {
            Some(context) => (all, Some(context)),
            None => (self.active_cpus(), None),
        }
    }

    /// Whether this space's page table pages are mapped on the calling CPU.
    fn is_resident(&self) -> bool {
        self.is_kernel()
            || self
                .active_cpus()
                .contains(self.shared.machine().current_cpu())
    }

    pub fn root_table(&self) -> &PageTable {
        self.shared.machine().mapped_table(self.root)
    }

    fn open_table(&self, frame: PhysicalAddress) -> TableRef<'_> {
        TableRef::open(
            self.shared.machine(),
            &self.shared.window,
            frame,
            self.is_resident(),
        )
    }

    /// Opens the page table page covering directory slot `segment`, if any.
    pub(crate) fn open_segment(&self, state: &mut SpaceState, segment: usize) -> Option<Segment<'_>> {
        if self.is_kernel() {
            let frame = self.root_table().entry(segment).frame()?;
            return Some(Segment {
                table: self.open_table(frame),
                ptp: None,
            });
        }
        if segment >= KERNEL_SLOT {
            return None;
        }
        let handle = state.ptps.lookup(segment)?;
        let frame = state.ptps.get(handle).frame();
        Some(Segment {
            table: self.open_table(frame),
            ptp: Some(handle),
        })
    }

    /// Opens the page table page for `segment`, allocating one if needed.
    ///
    /// The flag is true if the page was allocated by this call.
    fn get_ptp(
        &self,
        state: &mut SpaceState,
        order: &ReadOrder<'_>,
        segment: usize,
        allow_block: bool,
    ) -> Result<(Segment<'_>, bool), PmapError> {
        if let Some(found) = self.open_segment(state, segment) {
            return Ok((found, false));
        }

        let frame = match self.shared.alloc_table_frame() {
            Some(frame) => frame,
            None if allow_block => self
                .steal_ptp(state, order)
                .ok_or(PmapError::ResourceShortage)?,
            None => return Err(PmapError::ResourceShortage),
        };
        self.root_table()
            .set_entry(segment, PageEntry::table(frame, true));
        let handle = state.ptps.insert(PageTablePage::new(segment, frame));
        log::debug!(
            "pmap_get_ptp: {:?} segment {segment} uses page table page {frame}",
            self.id
        );
        Ok((
            Segment {
                table: self.open_table(frame),
                ptp: Some(handle),
            },
            true,
        ))
    }

    /// Takes a page table page from some user address space, round-robin.
    fn steal_ptp(&self, state: &mut SpaceState, order: &ReadOrder<'_>) -> Option<PhysicalAddress> {
        let victims = self.shared.registry.lock().victims();
        for (id, candidate) in victims {
            self.shared.registry.lock().advance_past(id);
            let Some(donor) = candidate.upgrade() else {
                continue;
            };
            if donor.is_kernel() {
                continue;
            }

            let stolen = if donor.id == self.id {
                self.evict_ptp(state, order)
            } else {
                match order.try_lock_space(&donor) {
                    Some(mut donor_state) => donor.evict_ptp(&mut donor_state, order),
                    None => None,
                }
            };
            if let Some(frame) = stolen {
                log::debug!(
                    "pmap: {:?} stole page table page {frame} from {:?}",
                    self.id,
                    donor.id
                );
                return Some(frame);
            }
        }
        log::warn!("pmap: no page table page to steal for {:?}", self.id);
        None
    }

    /// Tears down every mapping of one unwired page table page and frees it.
    fn evict_ptp(&self, state: &mut SpaceState, order: &ReadOrder<'_>) -> Option<PhysicalAddress> {
        let handle = state.ptps.find_stealable()?;
        let (segment, frame) = {
            let page = state.ptps.get(handle);
            (page.segment(), page.frame())
        };

        {
            let victim = Segment {
                table: self.open_table(frame),
                ptp: Some(handle),
            };
            let mut shootdown = Shootdown::new(
                self.shared.machine(),
                self,
                self.shared.config.tlb_batch,
            );
            let base = VirtualAddress::new(segment << SEGMENT_SHIFT);
            for index in 0..ENTRIES_PER_TABLE {
                if state.ptps.get(handle).live() == 0 {
                    break;
                }
                self.remove_pte(state, order, &victim, base + index * PAGE_SIZE, false, &mut shootdown);
            }
            shootdown.flush();
        }

        let frame = self.free_ptp(state, handle);
        self.shared.window.map(self.shared.machine(), frame).zero();
        Some(frame)
    }

    /// Detaches an empty page table page from the directory.
    ///
    /// The caller returns the frame to the pool once the TLB has been flushed.
    pub(crate) fn free_ptp(&self, state: &mut SpaceState, handle: PtpHandle) -> PhysicalAddress {
        let page = state.ptps.remove(handle);
        assert_eq!(
            page.live(),
            0,
            "pmap_free_ptp: segment {} of {:?} still has live entries",
            page.segment(),
            self.id
        );
        self.root_table()
            .set_entry(page.segment(), PageEntry::empty());
        page.frame()
    }

    /// Clears the entry for `va` and undoes its bookkeeping.
    ///
    /// Returns false if the slot was empty, or wired while `skip_wired` is set.
    fn remove_pte(
        &self,
        state: &mut SpaceState,
        order: &ReadOrder<'_>,
        segment: &Segment<'_>,
        va: VirtualAddress,
        skip_wired: bool,
        shootdown: &mut Shootdown<'_>,
    ) -> bool {
        let index = va.table_index();
        let current = segment.table.entry(index);
        if !current.is_valid() || (skip_wired && current.is_wired()) {
            return false;
        }

        let old = segment.table.swap_entry(index, PageEntry::empty());
        self.forget_entry(state, segment.ptp, index, old);
        if old.is_managed() {
            let frame = old.frame().unwrap_or_else(|| {
                panic!("pmap_remove_pte: valid entry for {va} has no frame")
            });
            let head = order.head(frame).unwrap_or_else(|| {
                panic!("pmap_remove_pte: managed entry for {va} maps unmanaged frame {frame}")
            });
            head.merge_attrs(old.attributes());
            if order
                .lock(head)
                .remove(self.id, va, &self.shared.chunks)
                .is_none()
            {
                panic!(
                    "pmap_remove_pte: no reverse-map record for {va} -> {frame} in {:?}",
                    self.id
                );
            }
        }

        #[cfg(feature = "detailed-logging")]
        log::trace!("pmap_remove_pte: {:?} {va}", self.id);

        shootdown.page(va);
        true
    }

    /// Updates counters after the valid entry at `index` was cleared.
    pub(crate) fn forget_entry(
        &self,
        state: &mut SpaceState,
        ptp: Option<PtpHandle>,
        index: usize,
        old: PageEntry,
    ) {
        state.stats.resident -= 1;
        if old.is_wired() {
            state.stats.wired -= 1;
        }
        if let Some(handle) = ptp {
            state.ptps.get_mut(handle).remove_entry(index);
        }
    }

    /// Caps a range end at the last address this space can map.
    fn clamp_end(&self, end: VirtualAddress) -> VirtualAddress {
        let limit = if self.is_kernel() {
            MAX_VIRTUAL_ADDRESS
        } else {
            MAX_USER_ADDRESS
        };
        end.min(VirtualAddress::new(limit))
    }

    /// Removes every mapping in `[start, end)`, keeping wired ones if asked.
    pub(crate) fn remove_range(&self, start: VirtualAddress, end: VirtualAddress, skip_wired: bool) {
        let end = self.clamp_end(end);
        let mut freed = Vec::new();
        {
            let mut guard = lock_pmap_then_pv(&self.shared, self);
            let MapToHead { state, order, .. } = &mut guard;
            let mut shootdown = Shootdown::new(
                self.shared.machine(),
                self,
                self.shared.config.tlb_batch,
            );

            let mut va = start;
            while va < end {
                let block_end = va.next_segment().min(end);
                if let Some(segment) = self.open_segment(state, va.directory_index()) {
                    let mut page = va;
                    while page < block_end {
                        if segment
                            .ptp
                            .is_some_and(|handle| state.ptps.get(handle).live() == 0)
                        {
                            break;
                        }
                        self.remove_pte(state, order, &segment, page, skip_wired, &mut shootdown);
                        page = page + PAGE_SIZE;
                    }

                    let ptp = segment.ptp;
                    drop(segment);
                    if let Some(handle) = ptp {
                        if state.ptps.get(handle).live() == 0 {
                            freed.push(self.free_ptp(state, handle));
                        }
                    }
                }
                va = block_end;
            }
            shootdown.flush();
        }

        for frame in freed {
            self.shared.release_table_frame(frame);
        }
    }

    /// Runs `f` on the translation named by a reverse-map record, with this
    /// space locked.
    pub(crate) fn with_mapping<R>(
        &self,
        order: &HeadToMap<'_>,
        entry: &PvEntry,
        f: impl FnOnce(&mut SpaceState, &Segment<'_>) -> R,
    ) -> R {
        let mut state = order.lock_space(self);
        let segment = self
            .open_segment(&mut state, entry.va.directory_index())
            .unwrap_or_else(|| {
                panic!(
                    "pmap: reverse-map record for {} in {:?} has no page table page",
                    entry.va, self.id
                )
            });
        assert_eq!(
            segment.ptp, entry.ptp,
            "pmap: reverse-map record for {} in {:?} names the wrong page table page",
            entry.va, self.id
        );
        f(&mut *state, &segment)
    }
}

impl Drop for SpaceInner {
    fn drop(&mut self) {
        debug_assert!(
            self.is_kernel() || self.active.load(Ordering::Acquire) == 0,
            "pmap_destroy: {:?} is still loaded",
            self.id
        );
        let shared = &self.shared;
        shared.registry.lock().unregister(self.id);

        let raw = self.context.load(Ordering::Acquire);
        if raw != NO_CONTEXT {
            let context = ContextId::new(raw as u16);
            // Contended means the table is being walked on this very path;
            // the dead owner is reclaimed there instead.
            if let Some(mut contexts) = shared.contexts.as_ref().and_then(|c| c.try_lock()) {
                contexts.free(context, self.id);
            }
            shared
                .machine()
                .flush_tlb(CpuSet::all(shared.machine().cpu_count()), Some(context));
        }

        let state = self.state.get_mut();
        for page in state.ptps.drain() {
            assert_eq!(
                page.live(),
                0,
                "pmap_destroy: {:?} still maps pages in segment {}",
                self.id,
                page.segment()
            );
            shared.release_table_frame(page.frame());
        }
        for frame in state.kernel_ptps.drain(..) {
            shared.machine().free_frame(frame);
        }
        shared.machine().free_frame(self.root);
        log::debug!("pmap_destroy: {:?} released", self.id);
    }
}

/// A handle to an address space.
///
/// Handles are reference counted: [`AddressSpace::reference`] adds a holder and
/// [`AddressSpace::release`] (or dropping the handle) removes one. When the last
/// holder goes away the space's page table pages and page directory are freed;
/// every mapping must have been removed by then.
#[derive(Clone)]
pub struct AddressSpace(pub(crate) Arc<SpaceInner>);

impl AddressSpace {
    /// Adds a holder.
    pub fn reference(&self) -> Self {
        self.clone()
    }

    /// Drops this holder.
    pub fn release(self) {
        drop(self);
    }

    pub fn id(&self) -> PmapId {
        self.0.id
    }

    pub fn is_kernel(&self) -> bool {
        self.0.is_kernel()
    }

    /// Physical address of the page directory.
    pub fn root(&self) -> PhysicalAddress {
        self.0.root
    }

    /// The hardware context currently assigned, if any.
    pub fn context(&self) -> Option<ContextId> {
        self.0.context()
    }

    /// CPUs this space is loaded on.
    pub fn active_cpus(&self) -> CpuSet {
        self.0.active_cpus()
    }

    pub fn stats(&self) -> PmapStats {
        lock_pmap(&self.0).stats
    }

    /// Number of page table pages owned by this space.
    pub fn ptp_count(&self) -> usize {
        let state = lock_pmap(&self.0);
        if self.is_kernel() {
            state.kernel_ptps.len()
        } else {
            state.ptps.len()
        }
    }

    /// Valid entries in the user page table page covering `va`, if there is one.
    pub fn live_entries(&self, va: VirtualAddress) -> Option<usize> {
        let mut state = lock_pmap(&self.0);
        let handle = state.ptps.lookup(va.directory_index())?;
        Some(state.ptps.get(handle).live())
    }

    /// Maps `va` to the frame at `pa`.
    ///
    /// Replacing a mapping of another frame removes the old one first; entering
    /// the same frame again only updates protection and wiring. Without
    /// `allow_block` the call fails instead of stealing a page table page from
    /// another address space.
    ///
    /// # Panics
    ///
    /// Panics if either address is unaligned or `va` lies outside this space.
    pub fn enter(
        &self,
        va: VirtualAddress,
        pa: PhysicalAddress,
        prot: Protection,
        wired: bool,
        allow_block: bool,
    ) -> Result<(), PmapError> {
        let space = &*self.0;
        let shared = space.shared();
        assert!(
            va.is_aligned(PAGE_SIZE) && pa.is_aligned(PAGE_SIZE),
            "pmap_enter: unaligned mapping {va} -> {pa}"
        );
        if space.is_kernel() {
            assert!(
                va.is_kernel() && va.as_usize() < MAX_VIRTUAL_ADDRESS,
                "pmap_enter: {va} is outside kernel space"
            );
        } else {
            assert!(
                va.as_usize() < MAX_USER_ADDRESS,
                "pmap_enter: kernel address {va} entered in user space {:?}",
                space.id
            );
        }

        let mut guard = lock_pmap_then_pv(shared, space);
        let MapToHead { state, order, .. } = &mut guard;

        let (segment, fresh) = if space.is_kernel() {
            let segment = space
                .open_segment(state, va.directory_index())
                .unwrap_or_else(|| panic!("pmap_enter: no kernel page table page for {va}"));
            (segment, false)
        } else {
            space
                .get_ptp(state, order, va.directory_index(), allow_block)
                .inspect_err(|_| {
                    log::error!(
                        "pmap_enter: no page table page for {va} in {:?}",
                        space.id
                    )
                })?
        };

        let index = va.table_index();
        let old = segment.table.entry(index);
        let same_frame = old.frame() == Some(pa);
        let head = order.head(pa);

        if let Some(head) = head.filter(|_| !same_frame) {
            let entry = PvEntry {
                pmap: space.id,
                space: Arc::downgrade(&self.0),
                va,
                ptp: segment.ptp,
            };
            if let Err(err) = order.lock(head).insert(entry, &shared.chunks) {
                log::error!("pmap_enter: no reverse-map record for {va} -> {pa}");
                if let Some(handle) = segment.ptp.filter(|_| fresh) {
                    shared.release_table_frame(space.free_ptp(state, handle));
                }
                return Err(err);
            }
        }

        if old.is_valid() {
            if old.is_managed() && !same_frame {
                let old_frame = old
                    .frame()
                    .unwrap_or_else(|| panic!("pmap_enter: valid entry for {va} has no frame"));
                let old_head = order.head(old_frame).unwrap_or_else(|| {
                    panic!("pmap_enter: managed entry for {va} maps unmanaged frame {old_frame}")
                });
                if order
                    .lock(old_head)
                    .remove(space.id, va, &shared.chunks)
                    .is_none()
                {
                    panic!("pmap_enter: no reverse-map record for replaced mapping {va} -> {old_frame}");
                }
            }
            match (old.is_wired(), wired) {
                (false, true) => state.stats.wired += 1,
                (true, false) => state.stats.wired -= 1,
                _ => {}
            }
        } else {
            state.stats.resident += 1;
            if wired {
                state.stats.wired += 1;
            }
            if let Some(handle) = segment.ptp {
                state.ptps.get_mut(handle).add_entry();
            }
        }

        let scope = if space.is_kernel() {
            EntryFlags::GLOBAL
        } else {
            EntryFlags::USER
        };
        let new = PageEntry::mapping(pa, prot, wired, head.is_some()).with_flags(scope);
        let previous = segment.table.swap_entry(index, new);
        if let Some(handle) = segment.ptp {
            state.ptps.get_mut(handle).set_wired(index, wired);
        }
        if previous.is_managed() {
            if let Some(previous_head) = previous.frame().and_then(|frame| order.head(frame)) {
                previous_head.merge_attrs(previous.attributes());
            }
        }
        drop(segment);

        if previous.is_valid() {
            let mut shootdown = Shootdown::new(shared.machine(), space, 1);
            shootdown.page(va);
            shootdown.flush();
        }

        #[cfg(feature = "detailed-logging")]
        log::trace!("pmap_enter: {:?} {va} -> {pa} {prot:?} wired={wired}", space.id);

        Ok(())
    }

    /// Removes every mapping in `[start, end)`. Unmapped addresses are skipped.
    ///
    /// # Panics
    ///
    /// Panics if the bounds are unaligned or reversed.
    pub fn remove(&self, start: VirtualAddress, end: VirtualAddress) {
        assert!(
            start.is_aligned(PAGE_SIZE) && end.is_aligned(PAGE_SIZE) && start <= end,
            "pmap_remove: bad range {start}..{end}"
        );
        self.0.remove_range(start, end, false);
    }

    /// Changes the access rights of every mapping in `[start, end)`.
    ///
    /// Protecting to an access set without read removes the range.
    pub fn protect(&self, start: VirtualAddress, end: VirtualAddress, prot: Protection) {
        assert!(
            start.is_aligned(PAGE_SIZE) && end.is_aligned(PAGE_SIZE) && start <= end,
            "pmap_protect: bad range {start}..{end}"
        );
        if !prot.contains(Protection::READ) {
            self.0.remove_range(start, end, false);
            return;
        }

        let space = &*self.0;
        let shared = space.shared();
        let end = space.clamp_end(end);
        let mut guard = lock_pmap_then_pv(shared, space);
        let MapToHead { state, order, .. } = &mut guard;
        let mut shootdown = Shootdown::new(shared.machine(), space, shared.config.tlb_batch);

        let mut va = start;
        while va < end {
            let block_end = va.next_segment().min(end);
            if let Some(segment) = space.open_segment(state, va.directory_index()) {
                let mut page = va;
                while page < block_end {
                    let index = page.table_index();
                    let current = segment.table.entry(index);
                    if current.is_valid() && current.set_permissions(prot) != current {
                        let previous = segment
                            .table
                            .update(index, |entry| entry.set_permissions(prot));
                        if previous.is_managed() {
                            if let Some(head) = previous.frame().and_then(|frame| order.head(frame)) {
                                head.merge_attrs(previous.attributes());
                            }
                        }
                        shootdown.page(page);

                        #[cfg(feature = "detailed-logging")]
                        log::trace!("pmap_protect: {:?} {page} {prot:?}", space.id);
                    }
                    page = page + PAGE_SIZE;
                }
            }
            va = block_end;
        }
        shootdown.flush();
    }

    /// Returns the physical address `va` translates to, if it is mapped.
    pub fn extract(&self, va: VirtualAddress) -> Option<PhysicalAddress> {
        let space = &*self.0;
        let _state = lock_pmap(space);
        let pde = space.root_table().entry(va.directory_index());
        let table = space.open_table(pde.frame()?);
        let entry = table.entry(va.table_index());
        entry.frame().map(|frame| frame + va.page_offset())
    }

    /// Clears the wired bit of the mapping at `va`.
    ///
    /// # Panics
    ///
    /// Panics if `va` is not mapped.
    pub fn unwire(&self, va: VirtualAddress) {
        let space = &*self.0;
        let mut state = lock_pmap(space);
        let segment = space
            .open_segment(&mut state, va.directory_index())
            .unwrap_or_else(|| panic!("pmap_unwire: no page table page for {va}"));
        let index = va.table_index();
        let entry = segment.table.entry(index);
        assert!(entry.is_valid(), "pmap_unwire: {va} is not mapped");

        if entry.is_wired() {
            segment.table.clear_flags(index, EntryFlags::WIRED);
            state.stats.wired -= 1;
            if let Some(handle) = segment.ptp {
                state.ptps.get_mut(handle).set_wired(index, false);
            }
        } else {
            log::debug!("pmap_unwire: wiring for {va} in {:?} did not change", space.id);
        }
    }

    /// Removes every unwired user mapping, freeing the page table pages left empty.
    pub fn collect(&self) {
        if self.is_kernel() {
            return;
        }
        self.0.remove_range(
            VirtualAddress::new(0),
            VirtualAddress::new(MAX_USER_ADDRESS),
            true,
        );
    }
}

impl fmt::Debug for AddressSpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AddressSpace")
            .field("id", &self.0.id)
            .field("kind", &self.0.kind)
            .field("root", &self.0.root)
            .field("context", &self.0.context())
            .finish()
    }
}
