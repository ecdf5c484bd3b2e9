use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use crate::memlayout::BSIZE;
use crate::spinlock::Spinlock;
use crate::virtio::BlockDevice;

/// A disk kept in memory. Blocks never written read back as zeroes.
///
/// Counts the transfers it performs, and can be slowed down so that
/// concurrent callers overlap inside `rw`.
pub struct RamDisk {
    blocks: Spinlock<HashMap<(u32, u32), Box<[u8; BSIZE]>>>,
    latency: Option<Duration>,
    reads: AtomicUsize,
    writes: AtomicUsize,
}

impl RamDisk {
    pub fn new() -> Self {
        RamDisk {
            blocks: Spinlock::init_lock("ramdisk", HashMap::new()),
            latency: None,
            reads: AtomicUsize::new(0),
            writes: AtomicUsize::new(0),
        }
    }

    /// Every transfer sleeps for `latency` before touching the blocks.
    pub fn with_latency(latency: Duration) -> Self {
        RamDisk {
            latency: Some(latency),
            ..Self::new()
        }
    }

    /// Number of block reads performed so far.
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    /// Number of block writes performed so far.
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Contents of a block as the disk holds it, bypassing the counters.
    pub fn block(&self, dev: u32, blockno: u32) -> [u8; BSIZE] {
        match self.blocks.acquire().get(&(dev, blockno)) {
            Some(b) => **b,
            None => [0; BSIZE],
        }
    }

    /// Overwrite a block directly, bypassing the counters.
    pub fn set_block(&self, dev: u32, blockno: u32, data: &[u8; BSIZE]) {
        self.blocks
            .acquire()
            .insert((dev, blockno), Box::new(*data));
    }
}

impl Default for RamDisk {
    fn default() -> Self {
        Self::new()
    }
}

impl BlockDevice for RamDisk {
    fn rw(&self, dev: u32, blockno: u32, data: &mut [u8; BSIZE], write: bool) {
        if let Some(latency) = self.latency {
            thread::sleep(latency);
        }

        let mut blocks = self.blocks.acquire();
        if write {
            self.writes.fetch_add(1, Ordering::SeqCst);
            blocks.insert((dev, blockno), Box::new(*data));
        } else {
            self.reads.fetch_add(1, Ordering::SeqCst);
            match blocks.get(&(dev, blockno)) {
                Some(b) => data.copy_from_slice(&b[..]),
                None => data.fill(0),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unwritten_blocks_read_as_zero() {
        let disk = RamDisk::new();
        let mut data = [7u8; BSIZE];
        disk.rw(1, 3, &mut data, false);
        assert!(data.iter().all(|&b| b == 0));
        assert_eq!(disk.reads(), 1);
        assert_eq!(disk.writes(), 0);
    }

    #[test]
    fn write_then_read() {
        let disk = RamDisk::new();
        let mut data = [0u8; BSIZE];
        data[0] = 0xab;
        data[BSIZE - 1] = 0xcd;
        disk.rw(1, 9, &mut data, true);

        let mut back = [0u8; BSIZE];
        disk.rw(1, 9, &mut back, false);
        assert_eq!(back, data);
        // same block number on another device is a different block
        assert_eq!(disk.block(2, 9), [0u8; BSIZE]);
        assert_eq!((disk.reads(), disk.writes()), (1, 1));
    }
}
