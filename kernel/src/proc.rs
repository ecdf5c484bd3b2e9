use core::sync::atomic::{AtomicU32, Ordering};

// pid 0 means "nobody" in the lock holder fields.
static NEXT_PID: AtomicU32 = AtomicU32::new(1);

thread_local! {
    static PID: u32 = allocpid();
}

fn allocpid() -> u32 {
    NEXT_PID.fetch_add(1, Ordering::Relaxed)
}

/// Id of the kernel thread running on this cpu.
/// Assigned on first use and never reused.
pub fn mypid() -> u32 {
    PID.with(|pid| *pid)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn pid_is_stable_and_distinct() {
        let me = mypid();
        assert_ne!(me, 0);
        assert_eq!(me, mypid());
        let other = thread::spawn(mypid).join().unwrap();
        assert_ne!(other, 0);
        assert_ne!(me, other);
    }
}
