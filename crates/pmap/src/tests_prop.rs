#![cfg(test)]
//! Property tests: random operation sequences checked against a model of the
//! mappings each address space should hold.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::vec::Vec;

use proptest::prelude::*;

use crate::arch::SEGMENT_SIZE;
use crate::arch::software::EmulatedMachine;
use crate::{
    AddressSpace, PAGE_SIZE, PhysicalAddress, PmapConfig, PmapSystem, Protection, VirtualAddress,
};

const SPACES: usize = 2;
const PAGES: usize = 6;
const PAGES_PER_SEGMENT: usize = 3;
const FRAMES: usize = 4;

/// Pages are spread over two segments so page table pages come and go.
fn va_of(page: usize) -> VirtualAddress {
    VirtualAddress::new(
        (page / PAGES_PER_SEGMENT) * SEGMENT_SIZE + (page % PAGES_PER_SEGMENT + 1) * PAGE_SIZE,
    )
}

fn pa_of(frame: usize) -> PhysicalAddress {
    PhysicalAddress::new((frame + 1) * PAGE_SIZE)
}

#[derive(Debug, Clone)]
enum Op {
    Enter {
        space: usize,
        page: usize,
        frame: usize,
        write: bool,
        wired: bool,
    },
    Remove {
        space: usize,
        first: usize,
        last: usize,
    },
    Protect {
        space: usize,
        first: usize,
        last: usize,
        prot: Protection,
    },
    PageRemove {
        frame: usize,
    },
}

fn arb_protection() -> impl Strategy<Value = Protection> {
    prop_oneof![
        Just(Protection::NONE),
        Just(Protection::READ),
        Just(Protection::READ_WRITE),
    ]
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => (0..SPACES, 0..PAGES, 0..FRAMES, any::<bool>(), any::<bool>()).prop_map(
            |(space, page, frame, write, wired)| Op::Enter { space, page, frame, write, wired }
        ),
        1 => (0..SPACES, 0..PAGES, 0..PAGES).prop_map(|(space, a, b)| Op::Remove {
            space,
            first: a.min(b),
            last: a.max(b),
        }),
        1 => (0..SPACES, 0..PAGES, 0..PAGES, arb_protection()).prop_map(|(space, a, b, prot)| {
            Op::Protect { space, first: a.min(b), last: a.max(b), prot }
        }),
        1 => (0..FRAMES).prop_map(|frame| Op::PageRemove { frame }),
    ]
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Mapping {
    frame: usize,
    write: bool,
    wired: bool,
}

/// A physical map with `SPACES` address spaces, the first one loaded on CPU 0.
struct Harness {
    machine: Arc<EmulatedMachine>,
    system: PmapSystem,
    spaces: Vec<AddressSpace>,
    model: BTreeMap<(usize, usize), Mapping>,
}

impl Harness {
    fn new() -> Self {
        EmulatedMachine::set_current_cpu(0);
        let machine = Arc::new(EmulatedMachine::new(64));
        let system = PmapSystem::new(machine.clone(), PmapConfig::DEFAULT).unwrap();
        let spaces: Vec<_> = (0..SPACES).map(|_| system.create().unwrap()).collect();
        system.activate(&spaces[0]);
        Self {
            machine,
            system,
            spaces,
            model: BTreeMap::new(),
        }
    }

    fn apply(&mut self, op: &Op) {
        match *op {
            Op::Enter {
                space,
                page,
                frame,
                write,
                wired,
            } => {
                let prot = if write {
                    Protection::READ_WRITE
                } else {
                    Protection::READ
                };
                self.spaces[space]
                    .enter(va_of(page), pa_of(frame), prot, wired, false)
                    .unwrap();
                self.model
                    .insert((space, page), Mapping { frame, write, wired });
            }
            Op::Remove { space, first, last } => {
                self.spaces[space].remove(va_of(first), va_of(last) + PAGE_SIZE);
                self.model
                    .retain(|&(s, page), _| s != space || page < first || page > last);
            }
            Op::Protect {
                space,
                first,
                last,
                prot,
            } => {
                self.spaces[space].protect(va_of(first), va_of(last) + PAGE_SIZE, prot);
                if prot.contains(Protection::READ) {
                    for (_, mapping) in self
                        .model
                        .range_mut((space, first)..=(space, last))
                    {
                        mapping.write = prot.contains(Protection::WRITE);
                    }
                } else {
                    self.model
                        .retain(|&(s, page), _| s != space || page < first || page > last);
                }
            }
            Op::PageRemove { frame } => {
                self.system.page_remove(pa_of(frame));
                self.model.retain(|_, mapping| mapping.frame != frame);
            }
        }
    }

    fn check(&self) -> Result<(), TestCaseError> {
        for (index, space) in self.spaces.iter().enumerate() {
            let mut resident = 0;
            let mut wired = 0;
            for page in 0..PAGES {
                let expected = self.model.get(&(index, page));
                prop_assert_eq!(
                    space.extract(va_of(page)),
                    expected.map(|mapping| pa_of(mapping.frame))
                );
                if let Some(mapping) = expected {
                    resident += 1;
                    wired += usize::from(mapping.wired);
                }
                if index == 0 {
                    // Space 0 is loaded, so this also catches stale TLB entries.
                    prop_assert_eq!(
                        self.machine.access(va_of(page), false),
                        expected.map(|mapping| pa_of(mapping.frame))
                    );
                    prop_assert_eq!(
                        self.machine.access(va_of(page), true).is_some(),
                        expected.is_some_and(|mapping| mapping.write)
                    );
                }
            }
            prop_assert_eq!(space.stats().resident, resident);
            prop_assert_eq!(space.stats().wired, wired);

            for segment in 0..PAGES / PAGES_PER_SEGMENT {
                let live = self
                    .model
                    .range((index, segment * PAGES_PER_SEGMENT)..(index, (segment + 1) * PAGES_PER_SEGMENT))
                    .count();
                let expected = (live > 0).then_some(live);
                prop_assert_eq!(space.live_entries(va_of(segment * PAGES_PER_SEGMENT)), expected);
            }
        }

        for frame in 0..FRAMES {
            let count = self
                .model
                .values()
                .filter(|mapping| mapping.frame == frame)
                .count();
            prop_assert_eq!(self.system.mapping_count(pa_of(frame)), count);
        }
        Ok(())
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        for frame in 0..FRAMES {
            self.system.page_remove(pa_of(frame));
        }
        self.system.deactivate();
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn operations_match_model(ops in proptest::collection::vec(arb_op(), 1..40)) {
        let mut harness = Harness::new();
        for op in &ops {
            harness.apply(op);
            harness.check()?;
        }
    }

    #[test]
    fn removing_twice_changes_nothing(
        ops in proptest::collection::vec(arb_op(), 0..20),
        space in 0..SPACES,
        first in 0..PAGES,
    ) {
        let mut harness = Harness::new();
        for op in &ops {
            harness.apply(op);
        }
        let remove = Op::Remove { space, first, last: PAGES - 1 };
        harness.apply(&remove);
        let stats = harness.spaces[space].stats();
        let counts: Vec<_> = (0..FRAMES).map(|frame| harness.system.mapping_count(pa_of(frame))).collect();

        harness.apply(&remove);
        prop_assert_eq!(harness.spaces[space].stats(), stats);
        let again: Vec<_> = (0..FRAMES).map(|frame| harness.system.mapping_count(pa_of(frame))).collect();
        prop_assert_eq!(again, counts);
        harness.check()?;
    }

    #[test]
    fn reentering_the_same_frame_keeps_counts(
        page in 0..PAGES,
        frame in 0..FRAMES,
        first in arb_protection(),
        second in arb_protection(),
    ) {
        let harness = Harness::new();
        let space = &harness.spaces[1];
        let first = first | Protection::READ;
        let second = second | Protection::READ;
        space.enter(va_of(page), pa_of(frame), first, false, false).unwrap();
        let stats = space.stats();
        let live = space.live_entries(va_of(page));

        space.enter(va_of(page), pa_of(frame), second, false, false).unwrap();
        prop_assert_eq!(space.stats(), stats);
        prop_assert_eq!(space.live_entries(va_of(page)), live);
        prop_assert_eq!(harness.system.mapping_count(pa_of(frame)), 1);
        prop_assert_eq!(space.extract(va_of(page)), Some(pa_of(frame)));
    }
}
