//! Host-side mirror of the accelerator's device heap.
//!
//! The accelerator owns a flat, physically-addressed memory arena; the host
//! must carve buffers out of that arena *without* round-tripping to the
//! device, so it keeps this allocator as a local mirror of the device's
//! memory map. Both sides must agree on what is free at all times, which is
//! why the allocation policy here is deliberately simple and deterministic:
//! first-fit over an address-ordered block list, tail-split on allocation,
//! forward coalescing on release.
//!
//! Blocks are stored in an arena of descriptors linked by index (slot 0 is a
//! permanent zero-size sentinel anchoring the list head); released descriptor
//! slots are recycled, so no per-node allocation is ever freed piecemeal.
//!
//! Exhaustion and misuse are sizing/programming errors in this environment,
//! not runtime conditions to degrade from: those paths panic. The one soft
//! failure is [`DeviceHeap::free`] on an unknown address, which logs and
//! returns.

use tracing::{error, info};

/// Blocks are never split below this size; the slack is absorbed into the
/// allocation instead.
pub const MINIMUM_BLOCK_SIZE: u64 = 128;

/// One contiguous device-address range handed to [`DeviceHeap::define_regions`].
///
/// A zero-size region terminates a region table, matching the sentinel style
/// the device firmware uses for its own copy of the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapRegion {
    /// Device-side start address of the region.
    pub start: u64,
    /// Region size in bytes.
    pub size: u64,
}

/// Aggregate heap counters, cheap to copy out for reporting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeapStats {
    pub total_bytes: u64,
    pub free_bytes: u64,
    pub min_ever_free_bytes: u64,
    pub alloc_count: u64,
    pub free_count: u64,
}

#[derive(Debug, Clone, Copy)]
struct Block {
    start: u64,
    size: u64,
    allocated: bool,
    next: Option<usize>,
}

/// First-fit device-heap allocator over one or more registered regions.
#[derive(Debug)]
pub struct DeviceHeap {
    /// Descriptor arena; slot 0 is the sentinel list head.
    blocks: Vec<Block>,
    /// Recycled descriptor slots.
    free_slots: Vec<usize>,
    initialized: bool,
    alignment: u64,
    total_bytes: u64,
    free_bytes: u64,
    min_ever_free_bytes: u64,
    alloc_count: u64,
    free_count: u64,
}

impl DeviceHeap {
    /// Creates an empty heap. `alignment` must be a power of two; every
    /// returned address and every block size is kept a multiple of it.
    ///
    /// # Panics
    ///
    /// Panics if `alignment` is zero or not a power of two.
    pub fn new(alignment: u64) -> Self {
        assert!(
            alignment.is_power_of_two(),
            "heap alignment must be a power of two, got {alignment}"
        );
        DeviceHeap {
            blocks: vec![Block {
                start: 0,
                size: 0,
                allocated: true,
                next: None,
            }],
            free_slots: Vec::new(),
            initialized: false,
            alignment,
            total_bytes: 0,
            free_bytes: 0,
            min_ever_free_bytes: 0,
            alloc_count: 0,
            free_count: 0,
        }
    }

    /// Registers the device memory regions this heap manages. One region
    /// becomes one initial free block, after the start is aligned up and the
    /// usable size truncated down to the alignment.
    ///
    /// Regions must be supplied in strictly increasing, non-overlapping
    /// address order. A zero-size region terminates the table early. Must be
    /// called exactly once, before any allocation.
    ///
    /// # Panics
    ///
    /// Panics on re-initialization, on out-of-order or overlapping regions,
    /// or if no usable bytes were registered at all.
    pub fn define_regions(&mut self, regions: &[HeapRegion]) {
        assert!(!self.initialized, "device heap regions already defined");

        let mask = self.alignment - 1;
        let mut tail = 0usize; // sentinel
        let mut total: u64 = 0;

        for region in regions {
            if region.size == 0 {
                break;
            }

            let aligned_start = (region.start + mask) & !mask;
            let trim = aligned_start - region.start;
            assert!(
                trim < region.size,
                "heap region at 0x{:x} vanishes after alignment", region.start
            );
            let usable = (region.size - trim) & !mask;
            if usable == 0 {
                continue;
            }

            let prev_end = self.blocks[tail].start + self.blocks[tail].size;
            assert!(
                tail == 0 || aligned_start >= prev_end,
                "heap regions must be given in increasing address order \
                 (0x{aligned_start:x} overlaps block ending at 0x{prev_end:x})"
            );

            let slot = self.new_slot(Block {
                start: aligned_start,
                size: usable,
                allocated: false,
                next: None,
            });
            self.blocks[tail].next = Some(slot);
            tail = slot;
            total += usable;
        }

        assert!(total > 0, "no usable heap regions were defined");

        self.total_bytes = total;
        self.free_bytes = total;
        self.min_ever_free_bytes = total;
        self.initialized = true;
    }

    /// Allocates `size` bytes of device memory and returns its device
    /// address. The request is rounded up to the alignment; the allocation is
    /// carved from the *tail* of the first free block (in address order)
    /// large enough to hold it. Blocks with less than [`MINIMUM_BLOCK_SIZE`]
    /// of slack are handed out whole.
    ///
    /// # Panics
    ///
    /// Panics if the heap is uninitialized, `size` is zero, or no free block
    /// can satisfy the rounded request.
    pub fn alloc(&mut self, size: u64) -> u64 {
        assert!(self.initialized, "device heap used before define_regions");
        assert!(size > 0, "zero-size device heap allocation");

        let mask = self.alignment - 1;
        let mut real = size;
        if real & mask != 0 {
            real += self.alignment - (real & mask);
        }

        assert!(
            real <= self.free_bytes,
            "device heap exhausted: need 0x{real:x}, free 0x{:x}",
            self.free_bytes
        );

        let mut prev = 0usize;
        let mut cur = self.blocks[0].next;
        while let Some(i) = cur {
            if !self.blocks[i].allocated && self.blocks[i].size >= real {
                break;
            }
            prev = i;
            cur = self.blocks[i].next;
        }
        let Some(found) = cur else {
            panic!("no free device heap block fits 0x{size:x} bytes");
        };

        let addr;
        if self.blocks[found].size - real >= MINIMUM_BLOCK_SIZE {
            // Tail split: the high end of the block becomes the allocation,
            // the head stays free and keeps the block's list position.
            addr = self.blocks[found].start + self.blocks[found].size - real;
            let head = Block {
                start: self.blocks[found].start,
                size: self.blocks[found].size - real,
                allocated: false,
                next: Some(found),
            };
            self.blocks[found].start = addr;
            self.blocks[found].size = real;
            self.blocks[found].allocated = true;
            let head_slot = self.new_slot(head);
            self.blocks[prev].next = Some(head_slot);
        } else {
            addr = self.blocks[found].start;
            real = self.blocks[found].size;
            self.blocks[found].allocated = true;
        }

        self.free_bytes -= real;
        if self.free_bytes < self.min_ever_free_bytes {
            self.min_ever_free_bytes = self.free_bytes;
        }
        self.alloc_count += 1;

        addr
    }

    /// Releases the allocation starting at `addr` and coalesces it with free
    /// neighbors. The merge sweep starts at the freed block when its
    /// predecessor is still allocated, otherwise at the predecessor, and
    /// walks forward merging while consecutive blocks are free.
    ///
    /// A null address or an address that is not the start of a live
    /// allocation is logged and ignored.
    ///
    /// # Panics
    ///
    /// Panics if the heap is uninitialized.
    pub fn free(&mut self, addr: u64) {
        if addr == 0 {
            error!("attempted to free a null device address");
            return;
        }
        assert!(self.initialized, "device heap used before define_regions");

        let mut prev = 0usize;
        let mut cur = self.blocks[0].next;
        while let Some(i) = cur {
            if self.blocks[i].start == addr && self.blocks[i].allocated {
                self.blocks[i].allocated = false;
                self.free_count += 1;
                self.free_bytes += self.blocks[i].size;

                if self.blocks[prev].allocated {
                    self.collapse_from(i);
                } else {
                    self.collapse_from(prev);
                }
                return;
            }
            prev = i;
            cur = self.blocks[i].next;
        }

        error!("unable to free 0x{addr:x}: not a live device allocation");
    }

    /// Merges the run of consecutive free blocks starting at `idx`. Blocks
    /// from different registered regions are list-adjacent but not
    /// address-adjacent and must never merge.
    fn collapse_from(&mut self, idx: usize) {
        while let Some(next) = self.blocks[idx].next {
            if self.blocks[idx].allocated || self.blocks[next].allocated {
                break;
            }
            if self.blocks[idx].start + self.blocks[idx].size != self.blocks[next].start {
                break;
            }
            self.blocks[idx].size += self.blocks[next].size;
            self.blocks[idx].next = self.blocks[next].next;
            self.free_slots.push(next);
        }
    }

    fn new_slot(&mut self, block: Block) -> usize {
        if let Some(slot) = self.free_slots.pop() {
            self.blocks[slot] = block;
            slot
        } else {
            self.blocks.push(block);
            self.blocks.len() - 1
        }
    }

    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    /// Sum of all free blocks, not the largest single allocation possible.
    pub fn free_bytes(&self) -> u64 {
        self.free_bytes
    }

    /// Low-water mark of [`Self::free_bytes`] since initialization (or the
    /// last [`Self::reset_min_ever_free`]).
    pub fn min_ever_free_bytes(&self) -> u64 {
        self.min_ever_free_bytes
    }

    pub fn reset_min_ever_free(&mut self) {
        self.min_ever_free_bytes = self.free_bytes;
    }

    /// Largest free block size, by full list traversal.
    pub fn largest_free_block(&self) -> u64 {
        self.walk_free().max().unwrap_or(0)
    }

    /// Smallest free block size, by full list traversal. `u64::MAX` when no
    /// block is free.
    pub fn smallest_free_block(&self) -> u64 {
        self.walk_free().min().unwrap_or(u64::MAX)
    }

    pub fn free_block_count(&self) -> usize {
        self.walk_free().count()
    }

    pub fn stats(&self) -> HeapStats {
        HeapStats {
            total_bytes: self.total_bytes,
            free_bytes: self.free_bytes,
            min_ever_free_bytes: self.min_ever_free_bytes,
            alloc_count: self.alloc_count,
            free_count: self.free_count,
        }
    }

    /// Logs a one-shot summary of the heap state.
    pub fn report(&self) {
        info!(
            total_bytes = self.total_bytes,
            free_bytes = self.free_bytes,
            min_ever_free_bytes = self.min_ever_free_bytes,
            largest_free_block = self.largest_free_block(),
            free_blocks = self.free_block_count(),
            allocs = self.alloc_count,
            frees = self.free_count,
            "device heap report"
        );
    }

    /// Drops every non-sentinel block descriptor and marks the heap
    /// uninitialized. The registered address ranges themselves were never
    /// owned, only mirrored, so there is nothing else to release.
    pub fn reset_state(&mut self) {
        self.blocks.truncate(1);
        self.blocks[0].next = None;
        self.free_slots.clear();
        self.total_bytes = 0;
        self.free_bytes = 0;
        self.min_ever_free_bytes = 0;
        self.alloc_count = 0;
        self.free_count = 0;
        self.initialized = false;
    }

    fn walk_free(&self) -> impl Iterator<Item = u64> + '_ {
        let mut cur = self.blocks[0].next;
        std::iter::from_fn(move || {
            while let Some(i) = cur {
                cur = self.blocks[i].next;
                if !self.blocks[i].allocated {
                    return Some(self.blocks[i].size);
                }
            }
            None
        })
    }

    /// Free blocks as `(start, size)` pairs in address order. Test support.
    #[doc(hidden)]
    pub fn free_block_ranges(&self) -> Vec<(u64, u64)> {
        let mut out = Vec::new();
        let mut cur = self.blocks[0].next;
        while let Some(i) = cur {
            if !self.blocks[i].allocated {
                out.push((self.blocks[i].start, self.blocks[i].size));
            }
            cur = self.blocks[i].next;
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn heap_with(regions: &[HeapRegion]) -> DeviceHeap {
        let mut h = DeviceHeap::new(32);
        h.define_regions(regions);
        h
    }

    fn one_region(start: u64, size: u64) -> DeviceHeap {
        heap_with(&[HeapRegion { start, size }])
    }

    #[test]
    fn region_intake_aligns_start_and_truncates_size() {
        let h = heap_with(&[HeapRegion { start: 0x1005, size: 0x1000 }]);
        // Start rounds up to 0x1020 (27 bytes lost), then the remaining
        // 0xfe5 bytes truncate to 0xfe0.
        assert_eq!(h.free_block_ranges(), vec![(0x1020, 0xfe0)]);
        assert_eq!(h.total_bytes(), 0xfe0);
        assert_eq!(h.free_bytes(), 0xfe0);
    }

    #[test]
    fn zero_size_region_terminates_the_table() {
        let h = heap_with(&[
            HeapRegion { start: 0x1000, size: 0x100 },
            HeapRegion { start: 0, size: 0 },
            HeapRegion { start: 0x8000, size: 0x100 },
        ]);
        assert_eq!(h.total_bytes(), 0x100);
    }

    #[test]
    #[should_panic(expected = "increasing address order")]
    fn out_of_order_regions_are_fatal() {
        heap_with(&[
            HeapRegion { start: 0x8000, size: 0x100 },
            HeapRegion { start: 0x1000, size: 0x100 },
        ]);
    }

    #[test]
    #[should_panic(expected = "before define_regions")]
    fn alloc_before_init_is_fatal() {
        DeviceHeap::new(32).alloc(64);
    }

    #[test]
    #[should_panic(expected = "zero-size")]
    fn zero_size_alloc_is_fatal() {
        one_region(0, 4096).alloc(0);
    }

    #[test]
    fn alloc_carves_from_the_tail() {
        let mut h = one_region(0, 4096);
        let a = h.alloc(100); // rounds to 128
        assert_eq!(a, 4096 - 128);
        assert_eq!(h.free_bytes(), 4096 - 128);
        assert_eq!(h.free_block_ranges(), vec![(0, 4096 - 128)]);
    }

    #[test]
    #[should_panic(expected = "device heap exhausted")]
    fn exhaustion_is_fatal() {
        // 4096-byte heap at alignment 32: 100 bytes rounds to 128, leaving
        // 3968 free; 4000 is already 32-aligned and cannot fit.
        let mut h = one_region(0, 4096);
        let a = h.alloc(100);
        assert_eq!(a, 3968);
        assert_eq!(h.free_bytes(), 3968);
        h.alloc(4000);
    }

    #[test]
    fn small_slack_is_absorbed_not_split() {
        let mut h = one_region(0, 256);
        // 160 rounds to 160; slack 96 < MINIMUM_BLOCK_SIZE, so the whole
        // block is handed out.
        let a = h.alloc(160);
        assert_eq!(a, 0);
        assert_eq!(h.free_bytes(), 0);
        assert_eq!(h.free_block_count(), 0);
    }

    #[test]
    fn first_fit_skips_small_blocks_and_ignores_better_fits_later() {
        // Build free blocks of sizes [64, 384, 128] in address order. The
        // 64-byte block is its own region; the others are carved from R2:
        //   [4096,4480) free | [4480,4576) held | [4576,4704) free |
        //   [4704,5120) held
        let mut h = heap_with(&[
            HeapRegion { start: 0, size: 64 },
            HeapRegion { start: 4096, size: 1024 },
        ]);
        let _p1 = h.alloc(416); // [4704,5120)
        let f3 = h.alloc(128); // [4576,4704)
        let _p2 = h.alloc(96); // [4480,4576)
        let f2 = h.alloc(384); // [4096,4480) whole block, exact fit
        assert_eq!((f3, f2), (4576, 4096));
        h.free(f2);
        h.free(f3);
        assert_eq!(
            h.free_block_ranges(),
            vec![(0, 64), (4096, 384), (4576, 128)]
        );

        // 80 rounds to 96: the 64-byte block is too small, the 384-byte
        // block is the first fit, and the later 128-byte block (a tighter
        // fit) must not be chosen.
        let c = h.alloc(80);
        assert_eq!(c, 4480 - 96);
        assert_eq!(
            h.free_block_ranges(),
            vec![(0, 64), (4096, 384 - 96), (4576, 128)]
        );
    }

    #[test]
    fn freed_block_is_reused_before_untouched_regions() {
        // R1 is fully consumed except for A; R2 stays free throughout.
        let mut h = heap_with(&[
            HeapRegion { start: 0, size: 768 },
            HeapRegion { start: 65536, size: 256 },
        ]);
        let a = h.alloc(64); // tail of R1: [704,768)
        assert_eq!(a, 704);
        let b = h.alloc(704); // rest of R1, no split
        assert_eq!(b, 0);
        h.free(a);

        // First fit in address order lands on A's freed block, not on R2.
        let c = h.alloc(32);
        assert_eq!(c, 704);
        assert_eq!(h.free_block_ranges(), vec![(65536, 256)]);
    }

    #[test]
    fn coalescing_restores_the_pre_split_block() {
        let mut h = one_region(0, 2048);
        let a = h.alloc(256);
        let b = h.alloc(256);
        assert_eq!((a, b), (1792, 1536));

        // Free in allocation order.
        h.free(a);
        h.free(b);
        assert_eq!(h.free_block_ranges(), vec![(0, 2048)]);

        let a = h.alloc(256);
        let b = h.alloc(256);
        // Free in reverse order.
        h.free(b);
        h.free(a);
        assert_eq!(h.free_block_ranges(), vec![(0, 2048)]);
        assert_eq!(h.free_bytes(), 2048);
    }

    #[test]
    fn middle_free_merges_both_neighbors() {
        let mut h = one_region(0, 2048);
        let a = h.alloc(256); // [1792,2048)
        let b = h.alloc(256); // [1536,1792)
        let c = h.alloc(256); // [1280,1536)
        h.free(a);
        h.free(c);
        // b's neighbors are both free; releasing it must leave one block.
        h.free(b);
        assert_eq!(h.free_block_ranges(), vec![(0, 2048)]);
    }

    #[test]
    fn bad_free_is_soft() {
        let mut h = one_region(0, 4096);
        let a = h.alloc(64);
        h.free(0); // null: logged, ignored
        h.free(a + 8); // not a block start: logged, ignored
        h.free(a);
        h.free(a); // double free: no longer a live allocation
        assert_eq!(h.free_bytes(), 4096);
        assert_eq!(h.stats().free_count, 1);
    }

    #[test]
    fn stats_track_lifetime_counts_and_low_water_mark() {
        let mut h = one_region(0, 4096);
        let a = h.alloc(1024);
        let b = h.alloc(512);
        h.free(a);
        let s = h.stats();
        assert_eq!(s.alloc_count, 2);
        assert_eq!(s.free_count, 1);
        assert_eq!(s.free_bytes, 4096 - 512);
        assert_eq!(s.min_ever_free_bytes, 4096 - 1024 - 512);
        h.reset_min_ever_free();
        assert_eq!(h.min_ever_free_bytes(), 4096 - 512);
        h.free(b);
    }

    #[test]
    fn reset_state_allows_redefinition() {
        let mut h = one_region(0, 4096);
        let _ = h.alloc(64);
        h.reset_state();
        assert_eq!(h.total_bytes(), 0);
        h.define_regions(&[HeapRegion { start: 0x2000, size: 0x800 }]);
        assert_eq!(h.total_bytes(), 0x800);
        let a = h.alloc(32);
        assert_eq!(a, 0x2800 - 32);
    }
}
