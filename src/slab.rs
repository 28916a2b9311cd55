// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Port of mempool.c's smempool_* family: a fixed-size object pool over one
// byte region, with an index-linked free list. Layout (mirrors the original
// casting `mem_ptr` directly to `smempool_t*`, and this crate's
// header-overlaid-on-a-raw-buffer idiom used for shared chunk storage):
//
//   [ SlabHeader ]
//   [ freelist: u32 ] x elem_count
//   [ padding ]
//   [ elements: elem_stride bytes ] x elem_count   (tail-aligned to region end)

use std::mem::size_of;
use std::ptr::NonNull;
use std::sync::atomic::AtomicU32;

use crate::diag::{pr_debug, pr_wrn};
use crate::region::Region;
use crate::spin_lock::{lock_word, unlock_word};

const DEFAULT_ALIGN: usize = 16;

/// Header overlaid at the start of a slab pool's region. Mirrors the
/// original `smempool_t` fields that are control state rather than the
/// element array itself.
#[repr(C)]
struct SlabHeader {
    lock: AtomicU32,
    align: u32,
    elem_stride: u32,
    elem_count: u32,
    free_head: u32,
    inuse: u32,
}

/// A fixed-size object pool carved from one contiguous byte region.
///
/// `alloc`/`free` are O(1) and never touch the host allocator; only
/// `create` (when no external buffer is supplied) and `Drop` (releasing an
/// owned region) do.
pub struct SlabPool {
    region: Region,
}

// Safety: all mutable access to the region goes through the embedded header
// lock; `Region` is itself `Send + Sync`.
unsafe impl Send for SlabPool {}
unsafe impl Sync for SlabPool {}

fn round_up(size: usize, align: usize) -> usize {
    (size + align - 1) & !(align - 1)
}

impl SlabPool {
    /// Create a pool that allocates its own `region_size`-byte region from
    /// the host allocator.
    pub fn create(region_size: usize, elem_requested: usize, align: usize) -> Option<Self> {
        let region = Region::owned(region_size);
        Self::from_region(region, region_size, elem_requested, align)
    }

    /// Create a pool over a caller-supplied buffer. The pool never frees it.
    ///
    /// # Safety
    /// `buf` must be valid and exclusively writable for `buf.len()` bytes
    /// for the lifetime of the returned pool.
    pub unsafe fn create_in(buf: &mut [u8], elem_requested: usize, align: usize) -> Option<Self> {
        let region = Region::borrowed(buf.as_mut_ptr(), buf.len());
        Self::from_region(region, buf.len(), elem_requested, align)
    }

    fn from_region(
        region: Region,
        region_size: usize,
        elem_requested: usize,
        align: usize,
    ) -> Option<Self> {
        if region_size == 0 {
            return None;
        }
        let align = if align == 0 { DEFAULT_ALIGN } else { align };
        if !align.is_power_of_two() {
            return None;
        }

        let elem_stride = if elem_requested == 0 {
            align
        } else {
            round_up(elem_requested, align)
        };

        let header_size = size_of::<SlabHeader>();
        if region_size < header_size {
            return None;
        }
        let denom = size_of::<u32>() + elem_stride;
        let elem_count = ((region_size - header_size) / denom) as u32;

        let pool = SlabPool { region };

        unsafe {
            let header = pool.header_mut();
            header.lock = AtomicU32::new(0);
            header.align = align as u32;
            header.elem_stride = elem_stride as u32;
            header.elem_count = elem_count;
            header.free_head = 0;
            header.inuse = 0;

            let freelist = pool.freelist_ptr();
            for i in 0..elem_count {
                freelist.add(i as usize).write(i + 1);
            }
        }

        pr_debug!(
            "slab create: elem_stride={} elem_count={}",
            elem_stride,
            elem_count
        );
        Some(pool)
    }

    unsafe fn header_mut(&self) -> &mut SlabHeader {
        &mut *(self.region.as_mut_ptr() as *mut SlabHeader)
    }

    unsafe fn freelist_ptr(&self) -> *mut u32 {
        self.region
            .as_mut_ptr()
            .add(size_of::<SlabHeader>())
            .cast::<u32>()
    }

    unsafe fn elements_base(&self, elem_count: u32, elem_stride: u32) -> *mut u8 {
        let tail_bytes = elem_count as usize * elem_stride as usize;
        self.region.as_mut_ptr().add(self.region.len() - tail_bytes)
    }

    /// Number of elements the pool can hold.
    pub fn capacity(&self) -> u32 {
        unsafe { self.header_mut().elem_count }
    }

    /// Number of elements currently allocated.
    pub fn inuse(&self) -> u32 {
        let header = unsafe { self.header_mut() };
        lock_word(&header.lock);
        let n = header.inuse;
        unlock_word(&header.lock);
        n
    }

    /// Allocate one element, or `None` if the pool is exhausted.
    pub fn alloc(&self) -> Option<NonNull<u8>> {
        unsafe {
            let header = self.header_mut();
            lock_word(&header.lock);
            if header.inuse == header.elem_count {
                unlock_word(&header.lock);
                return None;
            }

            let idx = header.free_head;
            let freelist = self.freelist_ptr();
            let next = freelist.add(idx as usize).read();
            freelist.add(idx as usize).write(0);
            header.free_head = next;
            header.inuse += 1;
            let elem_stride = header.elem_stride;
            let elem_count = header.elem_count;
            unlock_word(&header.lock);

            let base = self.elements_base(elem_count, elem_stride);
            let ptr = base.add(idx as usize * elem_stride as usize);
            pr_debug!("slab alloc: idx={} inuse={}", idx, self.inuse());
            NonNull::new(ptr)
        }
    }

    /// Return a previously allocated element to the pool. A double free or a
    /// pointer to an already-free slot is silently ignored, matching the
    /// original `smempool_free`.
    ///
    /// # Safety
    /// `ptr` must have been returned by a prior `alloc()` call on this same
    /// pool and not already passed to `free()` unless re-allocated since.
    pub unsafe fn free(&self, ptr: NonNull<u8>) {
        let header = self.header_mut();
        let elem_stride = header.elem_stride as usize;
        let elem_count = header.elem_count;
        let base = self.elements_base(elem_count, header.elem_stride);
        let offset = ptr.as_ptr().offset_from(base);
        debug_assert!(offset >= 0, "slab free: pointer precedes element array");
        let idx = (offset as usize / elem_stride) as u32;

        lock_word(&header.lock);
        let freelist = self.freelist_ptr();
        if freelist.add(idx as usize).read() != 0 {
            // Slot already free: double free or invalid pointer. Decline to
            // corrupt state, matching the original's silent return.
            unlock_word(&header.lock);
            pr_wrn!("slab free: idx={} already free, ignoring", idx);
            return;
        }
        freelist.add(idx as usize).write(header.free_head);
        header.free_head = idx;
        header.inuse -= 1;
        unlock_word(&header.lock);
        pr_debug!("slab free: idx={} inuse={}", idx, header.inuse);
    }
}
