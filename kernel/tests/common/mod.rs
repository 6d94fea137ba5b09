#![allow(dead_code)]

use std::sync::{Arc, Mutex, MutexGuard};

use vmkern::services::DiskGeometry;
use vmkern::sim::Machine;

/// The subsystem is a process-wide singleton, so scenarios must not
/// overlap even when the test runner uses threads.
static VM: Mutex<()> = Mutex::new(());

pub fn exclusive() -> MutexGuard<'static, ()> {
    VM.lock().unwrap_or_else(|e| e.into_inner())
}

pub const PAGE_SIZE: usize = 256;

/// Machine whose swap disk holds exactly `swap_pages` page slots
/// (one slot per track keeps the geometry arithmetic visible in tests).
pub fn machine(swap_pages: usize) -> Arc<Machine> {
    Machine::new(
        PAGE_SIZE,
        DiskGeometry {
            sector_size: 64,
            sectors_per_track: 4,
            tracks: swap_pages,
        },
    )
}

/// Small deterministic PRNG for the random-op scenarios.
pub struct XorShift(pub u64);

impl XorShift {
    pub fn next(&mut self) -> u64 {
        let mut x = self.0;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.0 = x;
        x
    }
}
