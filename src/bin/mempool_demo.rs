// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Rust port of mempool.c's demo `main()`: drive a SlabPool and a BuddyPool
// through a smoke test / stress test from the command line.
//
// Usage:
//   mempool_demo -s | --smem            run the slab pool smoke test
//   mempool_demo -m | --mmem            run the buddy pool stress test
//   mempool_demo -d LEVEL               set debug verbosity (0-3) before running
//   mempool_demo -h | --help            print this text
//   mempool_demo -v | --version         print the crate version

use mempool::{set_debug_level, BuddyPool, DebugLevel, SlabPool};

const VERSION: &str = env!("CARGO_PKG_VERSION");

fn usage() {
    eprintln!("usage: mempool_demo [-d LEVEL] -s | -m");
    eprintln!();
    eprintln!("  -s, --smem        exercise the slab pool (alloc N, shuffled free, drop)");
    eprintln!("  -m, --mmem        exercise the buddy pool (randomised alloc/free + dump)");
    eprintln!("  -d, --debug LEVEL debug verbosity: 0=verbose 1=warning 2=info 3=debug");
    eprintln!("  -h, --help        print this message");
    eprintln!("  -v, --version     print the crate version");
}

/// A small xorshift64 generator — good enough to vary alloc/free order
/// without pulling in a dependency the rest of the crate doesn't use.
struct Rng(u64);

impl Rng {
    fn new(seed: u64) -> Self {
        Rng(seed | 1)
    }

    fn next_u64(&mut self) -> u64 {
        let mut x = self.0;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.0 = x;
        x
    }

    fn below(&mut self, bound: usize) -> usize {
        (self.next_u64() % bound as u64) as usize
    }
}

fn run_smem() {
    const REGION: usize = 256 * 1024;
    const ELEM: usize = 128;

    let pool = SlabPool::create(REGION, ELEM, 16).expect("create slab pool");
    let n = pool.capacity();
    println!("smem: region={REGION} elem_size={ELEM} capacity={n}");

    let mut ptrs = Vec::with_capacity(n as usize);
    for _ in 0..n {
        ptrs.push(pool.alloc().expect("alloc under capacity"));
    }
    assert!(pool.alloc().is_none(), "pool should report exhaustion");
    println!("smem: allocated {} elements, pool exhausted as expected", ptrs.len());

    let mut rng = Rng::new(0xC0FFEE);
    let mut order: Vec<usize> = (0..ptrs.len()).collect();
    for i in (1..order.len()).rev() {
        let j = rng.below(i + 1);
        order.swap(i, j);
    }

    for &i in &order {
        unsafe { pool.free(ptrs[i]) };
    }
    println!("smem: freed all elements in shuffled order, inuse={}", pool.inuse());
}

fn run_mmem() {
    const REGION: usize = 4 * 1024 * 1024;
    const ORDER_MIN: u32 = 0;
    const ORDER_MAX: u32 = 12;
    const ROUNDS: u32 = 20_000;
    const SLOTS: usize = 64;

    let pool = BuddyPool::create(REGION, ORDER_MIN, ORDER_MAX).expect("create buddy pool");
    println!("mmem: region={REGION} order_min={ORDER_MIN} order_max={ORDER_MAX}");

    let mut rng = Rng::new(0xDEAD_BEEF);
    let mut slots: Vec<Option<std::ptr::NonNull<u8>>> = vec![None; SLOTS];

    for round in 0..ROUNDS {
        let slot = rng.below(SLOTS);
        match slots[slot] {
            Some(p) => {
                unsafe { pool.free(p) };
                slots[slot] = None;
            }
            None => {
                let size = rng.below(300 * 1024) + 1;
                slots[slot] = pool.alloc(size);
            }
        }

        if round % 1000 == 0 {
            if let Err(e) = pool.dump() {
                eprintln!("mmem: invariant violation at round {round}: {e}");
                std::process::exit(1);
            }
        }
    }

    for slot in slots.iter_mut() {
        if let Some(p) = slot.take() {
            unsafe { pool.free(p) };
        }
    }

    match pool.dump() {
        Ok(()) => println!("mmem: {ROUNDS} rounds complete, final dump clean, remaining={}", pool.remaining_bytes()),
        Err(e) => {
            eprintln!("mmem: invariant violation after final release: {e}");
            std::process::exit(1);
        }
    }
}

fn main() {
    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.is_empty() {
        usage();
        std::process::exit(1);
    }

    let mut mode = None;
    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "-s" | "--smem" => mode = Some("smem"),
            "-m" | "--mmem" => mode = Some("mmem"),
            "-h" | "--help" => {
                usage();
                return;
            }
            "-v" | "--version" => {
                println!("mempool_demo {VERSION}");
                return;
            }
            "-d" | "--debug" => {
                i += 1;
                let level = args.get(i).unwrap_or_else(|| {
                    eprintln!("-d/--debug requires a LEVEL argument");
                    std::process::exit(1);
                });
                let level: i32 = level.parse().unwrap_or_else(|_| {
                    eprintln!("-d/--debug LEVEL must be an integer");
                    std::process::exit(1);
                });
                let level = match level {
                    0 => DebugLevel::Verbose,
                    1 => DebugLevel::Warning,
                    2 => DebugLevel::Info,
                    3 => DebugLevel::Debug,
                    _ => {
                        eprintln!("-d/--debug LEVEL must be 0-3");
                        std::process::exit(1);
                    }
                };
                set_debug_level(level);
            }
            other => {
                eprintln!("unrecognized argument: {other}");
                usage();
                std::process::exit(1);
            }
        }
        i += 1;
    }

    match mode {
        Some("smem") => run_smem(),
        Some("mmem") => run_mmem(),
        _ => {
            usage();
            std::process::exit(1);
        }
    }
}
