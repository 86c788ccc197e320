#![cfg_attr(not(any(test, feature = "software-emulation")), no_std)]

//! # Physical map
//!
//! The machine-dependent half of a virtual memory system for two-level i386
//! page tables. It provides:
//!
//! - Address spaces with page directories, on-demand page table pages and
//!   resident/wired accounting.
//! - A reverse map from every managed frame to the mappings of it, with a
//!   side-table of referenced/modified bits.
//! - Page table page stealing, hardware context assignment and batched TLB
//!   shootdown across CPUs.
//! - Software emulation of the machine for testing in non-kernel environments.
//!
//! The hardware is reached through the [`Machine`] trait.

extern crate alloc;

mod address;
pub mod arch;
mod config;
mod context;
mod error;
mod lock;
mod machine;
mod numbers;
mod pmap;
mod protection;
mod ptp;
mod pv;
mod pv_chunk;
mod registry;
mod space;
mod tlb;
mod window;

#[cfg(test)]
mod tests_prop;
#[cfg(test)]
mod tests_stress;

pub use address::{PhysicalAddress, VirtualAddress};
pub use config::PmapConfig;
pub use error::PmapError;
pub use machine::{ContextId, CpuId, CpuSet, MAX_CPUS, Machine};
pub use numbers::FrameNumber;
pub use pmap::PmapSystem;
pub use protection::{Attributes, Protection};
pub use registry::PmapId;
pub use space::{AddressSpace, PmapStats};
pub use tlb::MAX_TLB_BATCH;

pub use arch::{PAGE_SIZE, PageTable};
