use core::sync::atomic::{AtomicU64, Ordering};

/// The clock interrupt's tick counter.
///
/// Only relative order matters to its readers: the buffer cache stamps
/// buffers with it to find the least recently used one.
pub struct Ticks {
    ticks: AtomicU64,
}

impl Ticks {
    pub const fn new() -> Self {
        Ticks {
            ticks: AtomicU64::new(0),
        }
    }

    /// Called on each timer interrupt.
    pub fn tick(&self) -> u64 {
        self.ticks.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn now(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }
}

impl Default for Ticks {
    fn default() -> Self {
        Self::new()
    }
}
