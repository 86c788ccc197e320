//! Lock ordering between address spaces and the reverse map.
//!
//! Operations walk the two structures in opposite directions: `enter`, `remove`
//! and `protect` start from an address space and update reverse-map lists, while
//! `page_remove` and the attribute operations start from a frame's list and
//! update address spaces. A process-wide direction lock keeps the two from
//! deadlocking: map-to-head walks hold it shared, head-to-map walks hold it
//! exclusively. The guard types here are the only way to get both kinds of lock
//! at once.
//!
//! Within one mode the order is fixed:
//!
//! - map-to-head: direction (shared), address space, mapping window,
//!   reverse-map list, chunk allocator. A second address space may only be
//!   try-locked, and never while the window is held.
//! - head-to-map: direction (exclusive), reverse-map list, address space,
//!   mapping window. Lists are snapshotted or drained and unlocked before the
//!   address spaces they name are locked.
//!
//! The page table pool, the frame allocator and the registry are leaves.

use spin::{MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::pmap::Shared;
use crate::pv::{PvHead, PvList, PvTable};
use crate::space::{SpaceInner, SpaceState};
use crate::PhysicalAddress;

pub(crate) struct DirectionLock(RwLock<()>);

impl DirectionLock {
    pub const fn new() -> Self {
        Self(RwLock::new(()))
    }
}

/// Locks held while walking from one address space to reverse-map lists.
pub(crate) struct MapToHead<'a> {
    pub state: MutexGuard<'a, SpaceState>,
    pub order: ReadOrder<'a>,
    _direction: RwLockReadGuard<'a, ()>,
}

/// Reverse-map access available under the shared direction lock.
pub(crate) struct ReadOrder<'a> {
    pv: &'a PvTable,
}

impl<'a> ReadOrder<'a> {
    pub fn head(&self, frame: PhysicalAddress) -> Option<&'a PvHead> {
        self.pv.head(frame)
    }

    pub fn lock(&self, head: &'a PvHead) -> MutexGuard<'a, PvList> {
        head.lock()
    }

    /// Tries to lock a second address space, as a page table donor.
    pub fn try_lock_space<'s>(&self, space: &'s SpaceInner) -> Option<MutexGuard<'s, SpaceState>> {
        space.state.try_lock()
    }
}

/// Locks held while walking from reverse-map lists to address spaces.
pub(crate) struct HeadToMap<'a> {
    pv: &'a PvTable,
    _direction: RwLockWriteGuard<'a, ()>,
}

impl<'a> HeadToMap<'a> {
    pub fn head(&self, frame: PhysicalAddress) -> Option<&'a PvHead> {
        self.pv.head(frame)
    }

    pub fn lock(&self, head: &'a PvHead) -> MutexGuard<'a, PvList> {
        head.lock()
    }

    /// Locks an address space found through a reverse-map record.
    pub fn lock_space<'s>(&self, space: &'s SpaceInner) -> MutexGuard<'s, SpaceState> {
        space.state.lock()
    }
}

/// Locks `space` for an operation that may also update reverse-map lists.
pub(crate) fn lock_pmap_then_pv<'a>(shared: &'a Shared, space: &'a SpaceInner) -> MapToHead<'a> {
    let direction = shared.direction.0.read();
    MapToHead {
        state: space.state.lock(),
        order: ReadOrder { pv: &shared.pv },
        _direction: direction,
    }
}

/// Takes exclusive head-to-map access to the reverse map.
pub(crate) fn lock_pv_then_pmap(shared: &Shared) -> HeadToMap<'_> {
    HeadToMap {
        pv: &shared.pv,
        _direction: shared.direction.0.write(),
    }
}

/// Locks `space` for an operation that never touches reverse-map lists.
pub(crate) fn lock_pmap(space: &SpaceInner) -> MutexGuard<'_, SpaceState> {
    space.state.lock()
}
