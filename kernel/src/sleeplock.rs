// Sleeping locks

use parking_lot::{Condvar, Mutex};

use crate::proc::mypid;

struct Holder {
    locked: bool, // Is the lock held?
    pid: u32,     // Thread holding lock
}

/// Long-term lock for threads.
/// A waiter sleeps instead of spinning, so the holder may do disk I/O.
pub struct Sleeplock {
    lk: Mutex<Holder>, // protects the holder fields
    chan: Condvar,     // sleepers wait here for release_sleep

    // For debugging:
    name: &'static str, // Name of lock.
}

impl Sleeplock {
    pub fn init_lock(name: &'static str) -> Self {
        Sleeplock {
            lk: Mutex::new(Holder { locked: false, pid: 0 }),
            chan: Condvar::new(),
            name,
        }
    }

    pub fn acquire_sleep(&self) {
        let mut lk = self.lk.lock();
        if lk.locked && lk.pid == mypid() {
            panic!("acquire_sleep {}", self.name);
        }

        while lk.locked {
            self.chan.wait(&mut lk);
        }
        lk.locked = true;
        lk.pid = mypid();
    }

    pub fn release_sleep(&self) {
        let mut lk = self.lk.lock();
        if !(lk.locked && lk.pid == mypid()) {
            panic!("release_sleep {}", self.name);
        }
        lk.locked = false;
        lk.pid = 0;
        self.chan.notify_all();
    }

    pub fn holding_sleep(&self) -> bool {
        let lk = self.lk.lock();
        lk.locked && lk.pid == mypid()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    #[test]
    fn one_holder_at_a_time() {
        let lk = Sleeplock::init_lock("test");
        let inside = AtomicUsize::new(0);
        thread::scope(|s| {
            for _ in 0..4 {
                s.spawn(|| {
                    for _ in 0..20 {
                        lk.acquire_sleep();
                        assert_eq!(inside.fetch_add(1, Ordering::SeqCst), 0);
                        thread::sleep(Duration::from_micros(50));
                        inside.fetch_sub(1, Ordering::SeqCst);
                        lk.release_sleep();
                    }
                });
            }
        });
        assert!(!lk.holding_sleep());
    }

    #[test]
    fn holding_only_for_holder() {
        let lk = Sleeplock::init_lock("test");
        lk.acquire_sleep();
        assert!(lk.holding_sleep());
        thread::scope(|s| {
            s.spawn(|| assert!(!lk.holding_sleep()));
        });
        lk.release_sleep();
        assert!(!lk.holding_sleep());
    }

    #[test]
    fn release_by_other_thread_panics() {
        let lk = Sleeplock::init_lock("buffer");
        lk.acquire_sleep();
        let r = thread::scope(|s| s.spawn(|| lk.release_sleep()).join());
        assert!(r.is_err());
        assert!(lk.holding_sleep());
        lk.release_sleep();
    }

    #[test]
    #[should_panic(expected = "release_sleep buffer")]
    fn release_unlocked_panics() {
        Sleeplock::init_lock("buffer").release_sleep();
    }
}
