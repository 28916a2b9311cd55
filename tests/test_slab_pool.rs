// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Port of the distilled spec's testable-properties scenarios for SMEM.

use mempool::SlabPool;

// Port of scenario 1: slab exhaustion.
#[test]
fn exhaustion_then_one_free_unblocks_one_alloc() {
    let pool = SlabPool::create(16 * 1024, 1024, 32).expect("create");
    let n = pool.capacity();

    let mut ptrs = Vec::with_capacity(n as usize + 1);
    for _ in 0..n {
        ptrs.push(pool.alloc().expect("alloc under capacity"));
    }
    assert!(pool.alloc().is_none(), "(N+1)th alloc must return None");

    unsafe { pool.free(ptrs.pop().unwrap()) };
    assert!(pool.alloc().is_some(), "next alloc after one free must succeed");
}

// Port of the round-trip law: N allocs, any permutation of frees, then N
// more allocs all succeed.
#[test]
fn round_trip_in_reverse_permutation_refills_pool() {
    let pool = SlabPool::create(32 * 1024, 256, 16).expect("create");
    let n = pool.capacity();

    let mut ptrs: Vec<_> = (0..n).map(|_| pool.alloc().unwrap()).collect();
    while let Some(p) = ptrs.pop() {
        unsafe { pool.free(p) };
    }
    assert_eq!(pool.inuse(), 0);

    for _ in 0..n {
        assert!(pool.alloc().is_some());
    }
    assert!(pool.alloc().is_none());
}

// Port of scenario 6: double free only decrements inuse once.
#[test]
fn double_free_decrements_inuse_once() {
    let pool = SlabPool::create(4 * 1024, 32, 8).expect("create");
    let p = pool.alloc().expect("alloc");
    assert_eq!(pool.inuse(), 1);
    unsafe {
        pool.free(p);
        pool.free(p);
    }
    assert_eq!(pool.inuse(), 0);
}

#[test]
fn freed_pointers_stay_within_the_element_array() {
    let pool = SlabPool::create(8 * 1024, 48, 8).expect("create");
    let n = pool.capacity();
    let ptrs: Vec<_> = (0..n).map(|_| pool.alloc().unwrap()).collect();
    for w in ptrs.windows(2) {
        let stride = (w[1].as_ptr() as usize) - (w[0].as_ptr() as usize);
        assert_eq!(stride % 8, 0, "every element must stay stride-aligned");
    }
}
