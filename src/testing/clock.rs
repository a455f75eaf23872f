//! A deterministic virtual clock: no wall-clock reads, no thread sleeps.
//! Time only ever advances when the fixture's `step()` says so, and
//! randomness is drawn from a seeded RNG so a scenario replays bit-for-bit
//! (spec §4.10, §6.1).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::io::Clock;

pub struct VirtualClock {
    now: AtomicU64,
    rng: Mutex<StdRng>,
}

impl VirtualClock {
    pub fn new(seed: u64) -> Self {
        Self { now: AtomicU64::new(0), rng: Mutex::new(StdRng::seed_from_u64(seed)) }
    }

    pub fn advance(&self, delta_ms: u64) {
        self.now.fetch_add(delta_ms, Ordering::SeqCst);
    }

    pub fn now(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

impl Clock for VirtualClock {
    fn now_millis(&self) -> u64 {
        self.now()
    }

    fn rand_range(&self, low: u64, high: u64) -> u64 {
        if low >= high {
            return low;
        }
        self.rng.lock().expect("rng mutex poisoned").gen_range(low..high)
    }
}
