// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Port of the distilled spec's testable-properties scenarios for MMEM.

use mempool::BuddyPool;

const MIB: usize = 1 << 20;
const KIB: usize = 1 << 10;

// Port of scenario 2: buddy basic split.
#[test]
fn basic_split_produces_expected_remainder() {
    let pool = BuddyPool::create(MIB, 0, 10).expect("create");
    let p = pool.alloc(300 * KIB - 16).expect("alloc 300KiB-16");
    assert!(!p.as_ptr().is_null());
    assert_eq!(pool.remaining_bytes(), 524288);
    pool.dump().expect("dump after split");
}

// Port of scenario 3: buddy coalesce.
#[test]
fn coalesce_returns_region_to_one_full_chunk() {
    let pool = BuddyPool::create(MIB, 0, 10).expect("create");
    let a = pool.alloc(300 * KIB - 16).expect("alloc a"); // order 9, 512KiB
    let b = pool.alloc(127 * KIB - 16).expect("alloc b"); // order 7, 128KiB
    assert_eq!(pool.remaining_bytes(), 524288 - 131072);
    pool.dump().expect("dump mid-scenario");

    unsafe {
        pool.free(a);
        pool.free(b);
    }
    assert_eq!(pool.remaining_bytes(), MIB);
    pool.dump().expect("dump after coalesce");
}

// Same scenario, freed in the opposite order — coalesce must not depend on
// free order.
#[test]
fn coalesce_is_order_independent() {
    let pool = BuddyPool::create(MIB, 0, 10).expect("create");
    let a = pool.alloc(300 * KIB - 16).expect("alloc a");
    let b = pool.alloc(127 * KIB - 16).expect("alloc b");

    unsafe {
        pool.free(b);
        pool.free(a);
    }
    assert_eq!(pool.remaining_bytes(), MIB);
    pool.dump().expect("dump after coalesce");
}

// Port of scenario 4: last-chunk preservation through full exhaustion.
#[test]
fn last_chunk_preserved_through_exhaustion_and_release() {
    let pool = BuddyPool::create(MIB, 0, 10).expect("create");
    let mut ptrs = Vec::new();
    while let Some(p) = pool.alloc(1024 - 16) {
        ptrs.push(p);
        pool.dump().expect("dump mid-exhaustion");
    }
    assert!(pool.alloc(1).is_none(), "region should be fully exhausted");

    for p in ptrs {
        unsafe { pool.free(p) };
        pool.dump().expect("dump mid-release");
    }
    assert_eq!(pool.remaining_bytes(), MIB);
}

// Port of scenario 5: randomised stress with a dump() after every op.
#[test]
fn randomised_stress_round_trips_to_initial_remaining() {
    let pool = BuddyPool::create(4 * MIB, 0, 12).expect("create");
    let initial = pool.remaining_bytes();

    let mut slots: Vec<Option<std::ptr::NonNull<u8>>> = vec![None; 20];
    let mut state: u64 = 0xC0FFEE_1234_5678;
    let mut rand = move || {
        state ^= state << 13;
        state ^= state >> 7;
        state ^= state << 17;
        state
    };

    for _ in 0..3000 {
        let slot = (rand() % 20) as usize;
        if slots[slot].is_none() {
            let size = (rand() % (300 * KIB as u64)) as usize;
            slots[slot] = pool.alloc(size);
        } else {
            unsafe { pool.free(slots[slot].take().unwrap()) };
        }
        pool.dump().expect("dump must succeed after every operation");
    }

    for slot in slots.iter_mut() {
        if let Some(p) = slot.take() {
            unsafe { pool.free(p) };
        }
    }
    pool.dump().expect("dump after final release");
    assert_eq!(pool.remaining_bytes(), initial);
}

#[test]
fn alloc_below_order_min_or_above_order_max_is_rejected() {
    let pool = BuddyPool::create(MIB, 2, 10).expect("create"); // 4KiB..1MiB
    assert!(pool.alloc(1).is_none());
    assert!(pool.alloc(2 * MIB).is_none());
}

#[test]
fn remaining_bytes_accounts_for_every_free_order() {
    let pool = BuddyPool::create(MIB, 0, 10).expect("create");
    assert_eq!(pool.remaining_bytes(), MIB);
    let p = pool.alloc(4 * KIB - 16).expect("alloc");
    assert!(pool.remaining_bytes() < MIB);
    unsafe { pool.free(p) };
    assert_eq!(pool.remaining_bytes(), MIB);
}
