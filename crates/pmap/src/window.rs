//! Access to page table pages of address spaces that are not loaded.

use core::ops::Deref;

use spin::{Mutex, MutexGuard};

use crate::{Machine, PageTable, PhysicalAddress};

/// The single temporary mapping slot for foreign page table pages.
pub(crate) struct MappingWindow {
    lock: Mutex<()>,
}

impl MappingWindow {
    pub const fn new() -> Self {
        Self {
            lock: Mutex::new(()),
        }
    }

    /// Maps `frame` at the window until the guard is dropped.
    pub fn map<'a>(&'a self, machine: &'a dyn Machine, frame: PhysicalAddress) -> WindowGuard<'a> {
        let lock = self.lock.lock();
        let table = machine.map_window(frame);
        WindowGuard {
            machine,
            table,
            _lock: lock,
        }
    }
}

/// A page table mapped at the window.
pub(crate) struct WindowGuard<'a> {
    machine: &'a dyn Machine,
    table: &'a PageTable,
    _lock: MutexGuard<'a, ()>,
}

impl Deref for WindowGuard<'_> {
    type Target = PageTable;

    fn deref(&self) -> &PageTable {
        self.table
    }
}

impl Drop for WindowGuard<'_> {
    fn drop(&mut self) {
        self.machine.unmap_window();
    }
}

/// A page table page, through whichever mapping reaches it.
pub(crate) enum TableRef<'a> {
    Mapped(&'a PageTable),
    Window(WindowGuard<'a>),
}

impl TableRef<'_> {
    /// Opens a page table page. `resident` says whether it belongs to the kernel
    /// or to the address space loaded on the calling CPU.
    pub fn open<'a>(
        machine: &'a dyn Machine,
        window: &'a MappingWindow,
        frame: PhysicalAddress,
        resident: bool,
    ) -> TableRef<'a> {
        if resident {
            TableRef::Mapped(machine.mapped_table(frame))
        } else {
            TableRef::Window(window.map(machine, frame))
        }
    }
}

impl Deref for TableRef<'_> {
    type Target = PageTable;

    fn deref(&self) -> &PageTable {
        match self {
            TableRef::Mapped(table) => table,
            TableRef::Window(guard) => guard,
        }
    }
}
