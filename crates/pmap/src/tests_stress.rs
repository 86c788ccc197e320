#![cfg(test)]
//! Concurrent operations in both locking directions, on several emulated CPUs.
//!
//! The test passes if every thread finishes and the final state is consistent.

use std::sync::Arc;
use std::thread;
use std::vec::Vec;

use crate::arch::SEGMENT_SIZE;
use crate::arch::software::EmulatedMachine;
use crate::{
    AddressSpace, Attributes, PAGE_SIZE, PhysicalAddress, PmapConfig, PmapSystem, Protection,
    VirtualAddress,
};

const CPUS: usize = 4;
const ROUNDS: usize = 400;
const FRAMES: usize = 8;
const PAGES: usize = 16;

/// Deterministic schedule source, one seed per thread.
struct XorShift(u64);

impl XorShift {
    fn next(&mut self) -> u64 {
        let mut x = self.0;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.0 = x;
        x
    }

    fn below(&mut self, bound: usize) -> usize {
        (self.next() % bound as u64) as usize
    }
}

fn va_of(page: usize) -> VirtualAddress {
    VirtualAddress::new((page % 2) * SEGMENT_SIZE + (page + 1) * PAGE_SIZE)
}

fn pa_of(frame: usize) -> PhysicalAddress {
    PhysicalAddress::new((frame + 1) * PAGE_SIZE)
}

/// Maps, unmaps and reprotects pages of `space` from the CPU it is loaded on.
fn mapper(system: &PmapSystem, space: &AddressSpace, cpu: usize, seed: u64) {
    EmulatedMachine::set_current_cpu(cpu);
    system.activate(space);
    let mut rng = XorShift(seed);
    for _ in 0..ROUNDS {
        let page = rng.below(PAGES);
        match rng.below(4) {
            0 | 1 => {
                let prot = if rng.below(2) == 0 {
                    Protection::READ
                } else {
                    Protection::READ_WRITE
                };
                space
                    .enter(va_of(page), pa_of(rng.below(FRAMES)), prot, false, true)
                    .unwrap();
            }
            2 => space.remove(va_of(page), va_of(page) + PAGE_SIZE),
            _ => space.protect(
                VirtualAddress::new(0),
                VirtualAddress::new(2 * SEGMENT_SIZE),
                Protection::READ,
            ),
        }
    }
    system.deactivate();
}

/// Walks reverse-map lists: the opposite locking direction from `mapper`.
fn pager(system: &PmapSystem, cpu: usize, seed: u64) {
    EmulatedMachine::set_current_cpu(cpu);
    let mut rng = XorShift(seed);
    for _ in 0..ROUNDS {
        let frame = pa_of(rng.below(FRAMES));
        match rng.below(4) {
            0 => system.page_remove(frame),
            1 => {
                system.test_attrs(frame, Attributes::all());
            }
            2 => {
                system.change_attrs(frame, Attributes::empty(), Attributes::all());
            }
            _ => system.page_protect(frame, Protection::READ),
        }
    }
}

/// Creates and tears down short-lived address spaces, and grows the kernel.
fn churner(system: &PmapSystem, cpu: usize, seed: u64) {
    EmulatedMachine::set_current_cpu(cpu);
    let mut rng = XorShift(seed);
    for round in 0..ROUNDS / 8 {
        let space = system.create().unwrap();
        let page = rng.below(PAGES);
        space
            .enter(va_of(page), pa_of(rng.below(FRAMES)), Protection::READ, false, true)
            .unwrap();
        space.remove(va_of(page), va_of(page) + PAGE_SIZE);
        space.release();
        if round % 10 == 0 {
            system.grow_kernel(system.kernel_limit() + SEGMENT_SIZE);
        }
    }
}

#[test]
fn both_locking_directions_make_progress() {
    EmulatedMachine::set_current_cpu(0);
    let machine = Arc::new(EmulatedMachine::with_topology(256, CPUS, 0));
    let system = Arc::new(PmapSystem::new(machine.clone(), PmapConfig::DEFAULT).unwrap());
    let spaces: Vec<_> = (0..2).map(|_| system.create().unwrap()).collect();

    let mut handles = Vec::new();
    for (cpu, space) in spaces.iter().enumerate() {
        let system = system.clone();
        let space = space.clone();
        handles.push(thread::spawn(move || {
            mapper(&system, &space, cpu, 0x9E37_79B9_7F4A_7C15 ^ cpu as u64)
        }));
    }
    {
        let system = system.clone();
        handles.push(thread::spawn(move || pager(&system, 2, 0xD1B5_4A32_D192_ED03)));
    }
    {
        let system = system.clone();
        handles.push(thread::spawn(move || churner(&system, 3, 0x2545_F491_4F6C_DD1D)));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    for frame in 0..FRAMES {
        system.page_remove(pa_of(frame));
        assert_eq!(system.mapping_count(pa_of(frame)), 0);
    }
    for space in &spaces {
        assert_eq!(space.stats(), Default::default());
        assert_eq!(space.ptp_count(), 0);
        assert!(space.active_cpus().is_empty());
    }
    assert!(!machine.window_in_use());
}
