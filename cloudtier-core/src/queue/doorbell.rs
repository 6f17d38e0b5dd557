use std::time::Duration;

use parking_lot::{Condvar, Mutex};

/// Wake-up source for consumers waiting on one or more empty queues.
///
/// Every ring bumps a generation counter. A waiter samples the generation
/// before polling its queues and only sleeps if nothing rang since, so a push
/// that lands between the poll and the wait is never missed.
#[derive(Debug, Default)]
pub struct Doorbell {
    generation: Mutex<u64>,
    cond: Condvar,
}

impl Doorbell {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ring(&self) {
        let mut generation = self.generation.lock();
        *generation = generation.wrapping_add(1);
        self.cond.notify_all();
    }

    pub fn generation(&self) -> u64 {
        *self.generation.lock()
    }

    /// Waits until the generation moves past `seen` or `timeout` elapses.
    /// Returns `true` when woken by a ring.
    pub fn wait_since(&self, seen: u64, timeout: Duration) -> bool {
        let mut generation = self.generation.lock();
        if *generation != seen {
            return true;
        }
        let _ = self.cond.wait_for(&mut generation, timeout);
        *generation != seen
    }
}
