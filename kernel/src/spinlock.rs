// Mutual exclusion spin locks.

use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicU32, Ordering};

use spin::{Mutex, MutexGuard};

use crate::proc::mypid;

/// A lock for short critical sections over metadata.
/// Waiters busy-wait, so a holder must never sleep or do disk I/O.
pub struct Spinlock<T> {
    locked: Mutex<T>,

    // For debugging:
    name: &'static str, // Name of lock.
    pid: AtomicU32,     // The thread holding the lock.
}

pub struct SpinlockGuard<'a, T> {
    lk: &'a Spinlock<T>,
    guard: MutexGuard<'a, T>,
}

impl<T> Spinlock<T> {
    pub const fn init_lock(name: &'static str, data: T) -> Self {
        Spinlock {
            locked: Mutex::new(data),
            name,
            pid: AtomicU32::new(0),
        }
    }

    /// Acquire the lock.
    /// Loops (spins) until the lock is acquired.
    /// Acquiring a lock this thread already holds would spin forever; panic instead.
    pub fn acquire(&self) -> SpinlockGuard<'_, T> {
        if self.holding() {
            panic!("acquire {}", self.name);
        }

        let guard = self.locked.lock();

        // Record info about lock acquisition for holding() and debugging.
        self.pid.store(mypid(), Ordering::Relaxed);
        SpinlockGuard { lk: self, guard }
    }

    /// Check whether this thread is holding the lock.
    pub fn holding(&self) -> bool {
        self.locked.is_locked() && self.pid.load(Ordering::Relaxed) == mypid()
    }
}

impl<T> Deref for SpinlockGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T> DerefMut for SpinlockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}

// Release the lock. The holder is cleared before the inner guard
// drops, so no other thread can observe its own pid as a stale holder.
impl<T> Drop for SpinlockGuard<'_, T> {
    fn drop(&mut self) {
        self.lk.pid.store(0, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn guards_serialize_updates() {
        let lk = Spinlock::init_lock("counter", 0u64);
        thread::scope(|s| {
            for _ in 0..4 {
                s.spawn(|| {
                    for _ in 0..1000 {
                        *lk.acquire() += 1;
                    }
                });
            }
        });
        assert_eq!(*lk.acquire(), 4000);
    }

    #[test]
    fn holding_is_per_thread() {
        let lk = Spinlock::init_lock("held", ());
        assert!(!lk.holding());
        let g = lk.acquire();
        assert!(lk.holding());
        thread::scope(|s| {
            s.spawn(|| assert!(!lk.holding()));
        });
        drop(g);
        assert!(!lk.holding());
    }

    #[test]
    #[should_panic(expected = "acquire twice")]
    fn reacquire_panics() {
        let lk = Spinlock::init_lock("twice", ());
        let _g = lk.acquire();
        let _again = lk.acquire();
    }
}
