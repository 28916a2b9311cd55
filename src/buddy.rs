// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Port of mempool.c's mmempool_* family: a power-of-two buddy allocator over
// one byte region. Chunk headers (boundary tags) live inside the region;
// the `free_area` control vector and the pool handle itself live on the
// ordinary Rust heap, mirroring the original's separate `malloc` for
// `mmempool_t`/`free_area` versus the single `malloc`'d `mmem` region.
//
//   region: [ chunk | chunk | chunk | ... | chunk(C_LAST) ]
//   chunk:  [ psize | csize | (free only) list-link overlaying payload ]

use std::fmt;
use std::mem::size_of;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU32, Ordering};

use crate::diag::{pr_debug, pr_info};
use crate::list::ListNode;
use crate::region::Region;
use crate::spin_lock::SpinLock;

/// Bytes of boundary-tag header preceding every chunk's payload.
const OVERHEAD: usize = 2 * size_of::<usize>();
const C_INUSE: usize = 1;
const C_LAST: usize = 2;
const SIZE_MASK: usize = !3usize;

/// Boundary tag at the start of every chunk. When the chunk is free, an
/// intrusive `ListNode` overlays the bytes immediately following this
/// header (the same bytes that become the caller's payload once the chunk
/// is allocated).
#[repr(C)]
struct ChunkHeader {
    psize: usize,
    csize: usize,
}

unsafe fn chunk_size(c: *mut ChunkHeader) -> usize {
    (*c).csize & SIZE_MASK
}

unsafe fn chunk_psize(c: *mut ChunkHeader) -> usize {
    (*c).psize & SIZE_MASK
}

unsafe fn chunk_inuse(c: *mut ChunkHeader) -> bool {
    (*c).csize & C_INUSE != 0
}

unsafe fn chunk_psize_inuse(c: *mut ChunkHeader) -> bool {
    (*c).psize & C_INUSE != 0
}

unsafe fn chunk_is_last(c: *mut ChunkHeader) -> bool {
    (*c).csize & C_LAST != 0
}

unsafe fn next_chunk(c: *mut ChunkHeader) -> *mut ChunkHeader {
    (c as *mut u8).add(chunk_size(c)).cast()
}

unsafe fn prev_chunk(c: *mut ChunkHeader) -> *mut ChunkHeader {
    (c as *mut u8).sub(chunk_psize(c)).cast()
}

unsafe fn chunk_to_mem(c: *mut ChunkHeader) -> *mut u8 {
    (c as *mut u8).add(OVERHEAD)
}

unsafe fn mem_to_chunk(p: *mut u8) -> *mut ChunkHeader {
    p.sub(OVERHEAD).cast()
}

unsafe fn chunk_list_node(c: *mut ChunkHeader) -> *mut ListNode {
    chunk_to_mem(c).cast()
}

/// Map a byte size to the KiB-log2 order that covers it.
///
/// Returns `-1` for `bytes == 0` or for a single byte — both are smaller
/// than the smallest representable order (1 KiB) — kept as a signed `i32`
/// throughout so callers never accidentally treat it as a huge `u32`.
fn byte_to_order(bytes: usize) -> i32 {
    if bytes == 0 {
        return -1;
    }
    let h = (usize::BITS - 1 - bytes.leading_zeros()) as i32;
    let low_mask = (1usize << h) - 1;
    let mut order = h;
    if bytes & low_mask != 0 {
        order += 1;
    }
    if order == 0 {
        -1
    } else if order <= 10 {
        0
    } else {
        order - 10
    }
}

/// Per-order free list: a head node plus the declared count of chunks on it.
/// `head`'s address must never move once placed in `BuddyPool::free_area`
/// (chunk list nodes hold raw pointers to it) — the backing `Vec` is sized
/// once at creation and never reallocated afterward.
struct FreeArea {
    head: ListNode,
    nr_free: AtomicU32,
}

/// Invariant violation observed by [`BuddyPool::dump`]. Non-fatal: callers
/// decide whether to treat it as fatal, unlike the original C, which
/// aborts the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DumpError {
    /// A free-area's declared `nr_free` disagrees with the structural walk.
    FreeCountMismatch { order: i32, declared: u32, observed: u32 },
    /// The structural walk never found a chunk carrying `C_LAST`.
    NoLastChunk,
    /// `CHUNK_SIZE(c) != CHUNK_PSIZE(NEXT(c))` for some non-last chunk.
    SizeMismatch { chunk_offset: usize },
    /// The `C_INUSE` mirror bit disagrees between a chunk and its neighbour.
    InuseMirrorMismatch { chunk_offset: usize },
    /// The last chunk in the region reports zero size.
    LastChunkZeroSized,
}

impl fmt::Display for DumpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DumpError::FreeCountMismatch { order, declared, observed } => write!(
                f,
                "order {order} free-list count mismatch: declared {declared}, observed {observed}"
            ),
            DumpError::NoLastChunk => write!(f, "structural walk found no C_LAST chunk"),
            DumpError::SizeMismatch { chunk_offset } => {
                write!(f, "chunk at offset {chunk_offset}: csize disagrees with next chunk's psize")
            }
            DumpError::InuseMirrorMismatch { chunk_offset } => write!(
                f,
                "chunk at offset {chunk_offset}: C_INUSE mirror disagrees with next chunk's psize"
            ),
            DumpError::LastChunkZeroSized => write!(f, "last chunk has zero size"),
        }
    }
}

impl std::error::Error for DumpError {}

/// A power-of-two size-class allocator carved from one contiguous byte
/// region, with boundary-tag split/coalesce.
pub struct BuddyPool {
    region: Region,
    order_min: u32,
    order_max: u32,
    free_area: Vec<FreeArea>,
    lock: SpinLock,
}

// Safety: all mutation of chunk headers and free-area bookkeeping happens
// under `lock`; the region and free-area vector are never resized after
// creation.
unsafe impl Send for BuddyPool {}
unsafe impl Sync for BuddyPool {}

impl BuddyPool {
    /// Create a pool that allocates its own `region_size`-byte region from
    /// the host allocator.
    pub fn create(region_size: usize, order_min: u32, order_max: u32) -> Option<Self> {
        let region = Region::owned(region_size);
        Self::from_region(region, region_size, order_min, order_max)
    }

    /// Create a pool over a caller-supplied buffer. The pool never frees it.
    ///
    /// # Safety
    /// `buf` must be valid and exclusively writable for `buf.len()` bytes
    /// for the lifetime of the returned pool.
    pub unsafe fn create_in(buf: &mut [u8], order_min: u32, order_max: u32) -> Option<Self> {
        let region = Region::borrowed(buf.as_mut_ptr(), buf.len());
        Self::from_region(region, buf.len(), order_min, order_max)
    }

    fn from_region(region: Region, region_size: usize, order_min: u32, order_max: u32) -> Option<Self> {
        if region_size == 0 || order_min > order_max {
            return None;
        }

        let num_orders = (order_max - order_min + 1) as usize;
        let mut free_area = Vec::with_capacity(num_orders);
        for _ in 0..num_orders {
            free_area.push(FreeArea {
                head: ListNode {
                    prev: std::ptr::null_mut(),
                    next: std::ptr::null_mut(),
                },
                nr_free: AtomicU32::new(0),
            });
        }
        for area in free_area.iter_mut() {
            let head_ptr = &mut area.head as *mut ListNode;
            unsafe { ListNode::init(head_ptr) };
        }

        let pool = BuddyPool {
            region,
            order_min,
            order_max,
            free_area,
            lock: SpinLock::new(),
        };

        pool.populate_initial_chunks(region_size);
        pr_debug!(
            "buddy create: order_min={} order_max={} region_size={}",
            order_min,
            order_max,
            region_size
        );
        Some(pool)
    }

    /// Greedily tile the region from `order_max` down to `order_min`,
    /// exactly as the distilled spec's §3.3 describes.
    fn populate_initial_chunks(&self, region_size: usize) {
        let mut offset = 0usize;
        let mut last_size = 0usize;
        let mut last_chunk: Option<*mut ChunkHeader> = None;

        for order in (self.order_min..=self.order_max).rev() {
            let bytes = 1usize << (order + 10);
            let nr_free = if order == self.order_max {
                region_size >> (order + 10)
            } else {
                (region_size >> (order + 10)) & 1
            };
            let idx = (order - self.order_min) as usize;

            for _ in 0..nr_free {
                let c = unsafe { self.region.as_mut_ptr().add(offset).cast::<ChunkHeader>() };
                unsafe {
                    (*c).psize = last_size;
                    (*c).csize = bytes;
                    let node = chunk_list_node(c);
                    ListNode::add_tail(self.area_head_ptr(idx), node);
                }
                self.free_area[idx].nr_free.fetch_add(1, Ordering::Relaxed);
                last_size = bytes;
                offset += bytes;
                last_chunk = Some(c);
            }
        }

        if let Some(c) = last_chunk {
            unsafe { (*c).csize |= C_LAST };
        }
    }

    fn area_head_ptr(&self, idx: usize) -> *mut ListNode {
        &self.free_area[idx].head as *const ListNode as *mut ListNode
    }

    /// Total free bytes across every order, summed under the lock.
    pub fn remaining_bytes(&self) -> usize {
        self.lock.lock();
        let mut total = 0usize;
        for (i, area) in self.free_area.iter().enumerate() {
            let order = self.order_min as usize + i;
            total += (area.nr_free.load(Ordering::Relaxed) as usize) << (order + 10);
        }
        self.lock.unlock();
        total
    }

    /// Allocate at least `size` bytes (plus the boundary-tag overhead),
    /// returning a pointer to the usable payload.
    pub fn alloc(&self, size: usize) -> Option<NonNull<u8>> {
        let size = size.checked_add(OVERHEAD)?;
        let k = byte_to_order(size);
        if k < 0 || (k as u32) < self.order_min || (k as u32) > self.order_max {
            return None;
        }
        let target_order = k as u32;

        self.lock.lock();
        let mut found: Option<(u32, *mut ChunkHeader)> = None;
        for order in target_order..=self.order_max {
            let idx = (order - self.order_min) as usize;
            let head = self.area_head_ptr(idx);
            unsafe {
                if !ListNode::is_empty(head) {
                    let node = ListNode::first(head);
                    ListNode::del(node);
                    found = Some((order, node.cast()));
                    break;
                }
            }
        }

        let Some((found_order, c)) = found else {
            self.lock.unlock();
            return None;
        };
        self.free_area[(found_order - self.order_min) as usize]
            .nr_free
            .fetch_sub(1, Ordering::Relaxed);

        self.expand(c, target_order, found_order);
        self.lock.unlock();

        pr_debug!(
            "buddy alloc: size={} order={} found_order={}",
            size,
            target_order,
            found_order
        );
        unsafe { NonNull::new(chunk_to_mem(c)) }
    }

    /// Split chunk `c` (currently of `found_order`) down to `target_order`,
    /// marking the final, smaller chunk `C_INUSE` and pushing each freed
    /// half onto the next-lower free list. `C_LAST` propagates to whichever
    /// half is physically last at each step, matching the original exactly
    /// rather than being recomputed from offsets.
    fn expand(&self, c: *mut ChunkHeader, target_order: u32, found_order: u32) {
        unsafe {
            let mut is_last = chunk_is_last(c);
            (*c).csize |= C_INUSE;
            if is_last {
                (*c).csize |= C_LAST;
            } else {
                (*next_chunk(c)).psize |= C_INUSE;
            }

            let mut order = found_order;
            while order > target_order {
                order -= 1;
                let half = 1usize << (order + 10);

                (*c).csize = half | C_INUSE;

                let buddy = next_chunk(c);
                (*buddy).psize = chunk_size(c) | C_INUSE;
                (*buddy).csize = half;
                if is_last {
                    (*buddy).csize |= C_LAST;
                    is_last = false;
                } else {
                    (*next_chunk(buddy)).psize = chunk_size(buddy);
                }

                let idx = (order - self.order_min) as usize;
                let node = chunk_list_node(buddy);
                ListNode::add_tail(self.area_head_ptr(idx), node);
                self.free_area[idx].nr_free.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Free a previously allocated pointer. A pointer whose chunk is not
    /// currently `C_INUSE` is a double free or invalid pointer — silently
    /// ignored, matching the original.
    ///
    /// # Safety
    /// `ptr` must have been returned by a prior `alloc()` call on this same
    /// pool and not already passed to `free()` unless re-allocated since.
    pub unsafe fn free(&self, ptr: NonNull<u8>) {
        let c = mem_to_chunk(ptr.as_ptr());
        if !chunk_inuse(c) {
            pr_info!("buddy free: chunk not in use, ignoring");
            return;
        }

        self.lock.lock();
        self.combine_chunk(c);
        self.lock.unlock();
    }

    /// Coalesce `cur` with free neighbours, then resplit the merged region
    /// back into canonical power-of-two-KiB chunks and publish it free.
    fn combine_chunk(&self, mut cur: *mut ChunkHeader) {
        unsafe {
            // Backward: absorb free predecessors.
            loop {
                if (*cur).psize == 0 {
                    break; // first chunk in region, no predecessor
                }
                if chunk_psize_inuse(cur) {
                    break; // predecessor is in use
                }
                let prev = prev_chunk(cur);
                let prev_order = byte_to_order(chunk_size(prev));
                if prev_order == self.order_max as i32 {
                    break; // merging would exceed order_max
                }
                let idx = (prev_order - self.order_min as i32) as usize;
                ListNode::del(chunk_list_node(prev));
                self.free_area[idx].nr_free.fetch_sub(1, Ordering::Relaxed);

                let is_last = chunk_is_last(cur);
                let merged_size = chunk_size(prev) + chunk_size(cur);
                (*prev).csize = merged_size | C_INUSE | if is_last { C_LAST } else { 0 };
                cur = prev;
            }

            if chunk_is_last(cur) {
                self.finish_free(cur);
                return;
            }
            (*next_chunk(cur)).psize = (*cur).csize;

            // Forward: absorb free successors.
            loop {
                let next = next_chunk(cur);
                if chunk_inuse(next) {
                    break;
                }
                let next_order = byte_to_order(chunk_size(next));
                if next_order == self.order_max as i32 {
                    break;
                }
                let idx = (next_order - self.order_min as i32) as usize;
                ListNode::del(chunk_list_node(next));
                self.free_area[idx].nr_free.fetch_sub(1, Ordering::Relaxed);

                let next_is_last = chunk_is_last(next);
                let merged_size = chunk_size(cur) + chunk_size(next);
                (*cur).csize = merged_size | C_INUSE;
                if next_is_last {
                    (*cur).csize |= C_LAST;
                    break;
                }
                (*next_chunk(cur)).psize = (*cur).csize;
            }

            self.finish_free(cur);
        }
    }

    /// Resplit a merged chunk into canonical power-of-two-KiB pieces and
    /// publish each as free. A chunk coalesced across the last-chunk seam
    /// can land on a size that isn't itself a single canonical order (e.g.
    /// 40 KiB needs a 32 KiB piece plus an 8 KiB piece) — walk every order
    /// from `order_max` down to `order_min`, peeling off same-order pieces
    /// from the front, exactly as the original's `split()` does.
    unsafe fn finish_free(&self, mut cur: *mut ChunkHeader) {
        for order in (self.order_min..=self.order_max).rev() {
            let size = 1usize << (order + 10);
            let idx = (order - self.order_min) as usize;

            while chunk_size(cur) >= size {
                if chunk_size(cur) == size {
                    (*cur).csize &= !C_INUSE;
                    ListNode::add_tail(self.area_head_ptr(idx), chunk_list_node(cur));
                    self.free_area[idx].nr_free.fetch_add(1, Ordering::Relaxed);
                    if !chunk_is_last(cur) {
                        (*next_chunk(cur)).psize = (*cur).csize;
                    }
                    return;
                }

                let is_last = chunk_is_last(cur);
                let piece = cur;
                let remaining = chunk_size(piece) - size;
                cur = next_chunk_at(piece, size);
                (*cur).csize = remaining | C_INUSE | if is_last { C_LAST } else { 0 };
                (*piece).csize = size; // free, canonical at this order
                ListNode::add_tail(self.area_head_ptr(idx), chunk_list_node(piece));
                self.free_area[idx].nr_free.fetch_add(1, Ordering::Relaxed);
                (*cur).psize = size;
            }
        }
    }

    /// Consistency audit: walks chunks from `region_base` to the `C_LAST`
    /// chunk, checking every invariant in the distilled spec's §3.2 and
    /// §4.3.5. Returns the first violation found rather than aborting.
    pub fn dump(&self) -> Result<(), DumpError> {
        self.lock.lock();
        let result = self.dump_locked();
        self.lock.unlock();
        result
    }

    fn dump_locked(&self) -> Result<(), DumpError> {
        let num_orders = self.free_area.len();
        let mut observed = vec![0u32; num_orders];

        let region_base = self.region.as_mut_ptr();
        let max_chunks = self.region.len() / (1usize << (self.order_min + 10)) + 1;

        let mut c = region_base.cast::<ChunkHeader>();
        let mut steps = 0usize;
        loop {
            steps += 1;
            if steps > max_chunks {
                return Err(DumpError::NoLastChunk);
            }

            unsafe {
                let size = chunk_size(c);
                if chunk_is_last(c) {
                    if size == 0 {
                        return Err(DumpError::LastChunkZeroSized);
                    }
                    if !chunk_inuse(c) {
                        let order = byte_to_order(size);
                        if order >= 0 {
                            observed[(order - self.order_min as i32) as usize] += 1;
                        }
                    }
                    break;
                }

                let next = next_chunk(c);
                let offset = (c as usize) - (region_base as usize);
                if size != chunk_psize(next) {
                    return Err(DumpError::SizeMismatch { chunk_offset: offset });
                }
                if chunk_inuse(c) != chunk_psize_inuse(next) {
                    return Err(DumpError::InuseMirrorMismatch { chunk_offset: offset });
                }
                if !chunk_inuse(c) {
                    let order = byte_to_order(size);
                    if order >= 0 {
                        observed[(order - self.order_min as i32) as usize] += 1;
                    }
                }
                c = next;
            }
        }

        for (i, area) in self.free_area.iter().enumerate() {
            let declared = area.nr_free.load(Ordering::Relaxed);
            if declared != observed[i] {
                return Err(DumpError::FreeCountMismatch {
                    order: self.order_min as i32 + i as i32,
                    declared,
                    observed: observed[i],
                });
            }
        }

        Ok(())
    }
}

/// Pointer `offset` bytes after `c`, bypassing `chunk_size` (used mid-split,
/// before the jump size has been written into `c.csize` yet).
unsafe fn next_chunk_at(c: *mut ChunkHeader, offset: usize) -> *mut ChunkHeader {
    (c as *mut u8).add(offset).cast()
}
