//! Batched TLB shootdown.

use crate::space::SpaceInner;
use crate::{Machine, VirtualAddress};

/// Largest invalidation batch an operation can accumulate.
pub const MAX_TLB_BATCH: usize = 64;

/// Page invalidations collected by one operation.
///
/// Targets are resolved when the batch is flushed, so CPUs that load the
/// address space while the operation runs are covered too. A user address space
/// whose batch overflows gets a full flush instead; the kernel's batch is
/// flushed early and keeps collecting, since dropping every global translation
/// is far more expensive.
pub(crate) struct Shootdown<'a> {
    machine: &'a dyn Machine,
    space: &'a SpaceInner,
    pending: [VirtualAddress; MAX_TLB_BATCH],
    len: usize,
    capacity: usize,
    overflowed: bool,
}

impl<'a> Shootdown<'a> {
    pub fn new(machine: &'a dyn Machine, space: &'a SpaceInner, capacity: usize) -> Self {
        Self {
            machine,
            space,
            pending: [VirtualAddress::new(0); MAX_TLB_BATCH],
            len: 0,
            capacity: capacity.clamp(1, MAX_TLB_BATCH),
            overflowed: false,
        }
    }

    /// Queues an invalidation of `va`.
    pub fn page(&mut self, va: VirtualAddress) {
        if self.overflowed {
            return;
        }
        if self.len == self.capacity {
            if self.space.is_kernel() {
                self.flush_pending();
            } else {
                self.overflowed = true;
                return;
            }
        }
        self.pending[self.len] = va;
        self.len += 1;
    }

    /// Performs the queued invalidations now.
    pub fn flush(mut self) {
        self.flush_pending();
    }

    fn flush_pending(&mut self) {
        if self.len == 0 && !self.overflowed {
            return;
        }
        let (cpus, context) = self.space.tlb_targets();
        if !cpus.is_empty() {
            if self.overflowed {
                self.machine.flush_tlb(cpus, context);
            } else {
                for va in &self.pending[..self.len] {
                    self.machine.invalidate_page(cpus, context, *va);
                }
            }
        }
        self.len = 0;
        self.overflowed = false;
    }
}

impl Drop for Shootdown<'_> {
    fn drop(&mut self) {
        self.flush_pending();
    }
}
