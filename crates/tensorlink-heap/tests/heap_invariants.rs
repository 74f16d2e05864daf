//! Property tests for the device-heap invariants: conservation, alignment,
//! and allocation disjointness over arbitrary alloc/free interleavings.

use proptest::prelude::*;
use std::collections::HashMap;
use tensorlink_heap::{DeviceHeap, HeapRegion};

const ALIGNMENT: u64 = 32;
const REGION_START: u64 = 0x1000;
const REGION_SIZE: u64 = 64 * 1024;

#[derive(Debug, Clone)]
enum Op {
    /// Allocate this many bytes (skipped when it cannot fit).
    Alloc(u64),
    /// Free the nth oldest live allocation (modulo the live count).
    Free(usize),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        (1u64..4096).prop_map(Op::Alloc),
        (0usize..64).prop_map(Op::Free),
    ]
}

fn align_up(v: u64) -> u64 {
    (v + ALIGNMENT - 1) & !(ALIGNMENT - 1)
}

proptest! {
    #[test]
    fn alloc_free_sequences_preserve_heap_invariants(
        ops in proptest::collection::vec(op_strategy(), 1..200)
    ) {
        let mut heap = DeviceHeap::new(ALIGNMENT);
        heap.define_regions(&[HeapRegion { start: REGION_START, size: REGION_SIZE }]);

        // addr -> requested size (the heap may charge more for unsplit slack).
        let mut live: HashMap<u64, u64> = HashMap::new();
        let mut order: Vec<u64> = Vec::new();

        for op in ops {
            match op {
                Op::Alloc(size) => {
                    // The heap treats exhaustion as fatal; only issue
                    // requests that are guaranteed to fit somewhere.
                    let rounded = align_up(size);
                    if heap.largest_free_block() < rounded {
                        continue;
                    }
                    let addr = heap.alloc(size);

                    // Alignment of the returned address.
                    prop_assert_eq!(addr % ALIGNMENT, 0);
                    // Within the registered region.
                    prop_assert!(addr >= REGION_START);
                    prop_assert!(addr + rounded <= REGION_START + REGION_SIZE);
                    // Disjoint from every live allocation.
                    for (&other, &other_size) in &live {
                        let other_end = other + align_up(other_size);
                        prop_assert!(addr + rounded <= other || addr >= other_end);
                    }

                    live.insert(addr, size);
                    order.push(addr);
                }
                Op::Free(n) => {
                    if order.is_empty() {
                        continue;
                    }
                    let addr = order.remove(n % order.len());
                    live.remove(&addr);
                    heap.free(addr);
                }
            }

            // Conservation: free + allocated covers the whole heap. Unsplit
            // slack is charged to the allocation, so account through the
            // heap's own free counter against total.
            prop_assert!(heap.free_bytes() <= heap.total_bytes());
            let allocated = heap.total_bytes() - heap.free_bytes();
            let requested: u64 = live.values().map(|&s| align_up(s)).sum();
            // Allocated bytes may exceed the rounded requests by absorbed
            // slack, but never by a full minimum block per allocation.
            prop_assert!(allocated >= requested);
            prop_assert!(allocated <= requested + (live.len() as u64) * 128);

            // Every free block is aligned and in-bounds.
            for (start, size) in heap.free_block_ranges() {
                prop_assert_eq!(start % ALIGNMENT, 0);
                prop_assert_eq!(size % ALIGNMENT, 0);
                prop_assert!(start >= REGION_START);
                prop_assert!(start + size <= REGION_START + REGION_SIZE);
            }
        }

        // Draining every allocation restores the single pristine block.
        for addr in order {
            heap.free(addr);
        }
        prop_assert_eq!(heap.free_bytes(), heap.total_bytes());
        prop_assert_eq!(heap.free_block_ranges(), vec![(REGION_START, REGION_SIZE)]);
    }
}
