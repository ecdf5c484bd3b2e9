// Buffer cache.
//
// The buffer cache is a set of Buf slots holding cached copies of disk
// block contents. Caching disk blocks in memory reduces the number of
// disk reads and also provides a synchronization point for disk blocks
// used by multiple threads.
//
// Interface:
// * To get a buffer for a particular disk block, call bread.
// * After changing buffer data, call bwrite to write it to disk.
// * When done with the buffer, call brelse (or drop the guard).
// * Do not use the buffer after calling brelse.
// * Only one thread at a time can use a buffer,
//     so do not keep them longer than necessary.
//
// The slots are spread over NBUCK hash buckets by block number, each a
// ring with its own spin lock, so lookups of blocks in different buckets
// never contend. A buffer's place in its ring says nothing about how
// recently it was used; the usetick stamp does.
//
// Lock order: bcache.lock, then the bucket being filled, then at most one
// other bucket (the one a victim is taken from). No spin lock is held
// while sleeping on a buffer's lock or doing disk I/O.

use core::ptr;
use core::sync::atomic::Ordering;
use std::sync::Arc;

use crate::buf::{Buf, BufGuard, BufId};
use crate::param::{NBUCK, NBUF};
use crate::spinlock::{Spinlock, SpinlockGuard};
use crate::trap::Ticks;
use crate::virtio::BlockDevice;

/// Head of one hash bucket's ring. The ring itself is threaded through
/// the prev/next indices of its member slots.
struct Bucket {
    head: Option<usize>,
}

impl Bucket {
    const fn new() -> Self {
        Bucket { head: None }
    }

    // Link slot i in at the head of the ring.
    fn push(&mut self, bufs: &[Buf], i: usize) {
        match self.head {
            None => {
                bufs[i].next.store(i, Ordering::Relaxed);
                bufs[i].prev.store(i, Ordering::Relaxed);
            }
            Some(h) => {
                let tail = bufs[h].prev.load(Ordering::Relaxed);
                bufs[i].next.store(h, Ordering::Relaxed);
                bufs[i].prev.store(tail, Ordering::Relaxed);
                bufs[tail].next.store(i, Ordering::Relaxed);
                bufs[h].prev.store(i, Ordering::Relaxed);
            }
        }
        self.head = Some(i);
    }

    // Unlink slot i, which must be in this ring.
    fn remove(&mut self, bufs: &[Buf], i: usize) {
        let next = bufs[i].next.load(Ordering::Relaxed);
        let prev = bufs[i].prev.load(Ordering::Relaxed);
        if next == i {
            self.head = None;
        } else {
            bufs[prev].next.store(next, Ordering::Relaxed);
            bufs[next].prev.store(prev, Ordering::Relaxed);
            if self.head == Some(i) {
                self.head = Some(next);
            }
        }
        bufs[i].next.store(i, Ordering::Relaxed);
        bufs[i].prev.store(i, Ordering::Relaxed);
    }

    fn iter<'a>(&self, bufs: &'a [Buf]) -> Ring<'a> {
        Ring {
            bufs,
            head: self.head,
            cur: self.head,
        }
    }
}

struct Ring<'a> {
    bufs: &'a [Buf],
    head: Option<usize>,
    cur: Option<usize>,
}

impl Iterator for Ring<'_> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        let i = self.cur?;
        let next = self.bufs[i].next.load(Ordering::Relaxed);
        self.cur = if Some(next) == self.head {
            None
        } else {
            Some(next)
        };
        Some(i)
    }
}

pub struct Bcache<D: BlockDevice> {
    // Serializes the search for a victim across buckets. Guards nothing else.
    lock: Spinlock<()>,
    bucket: [Spinlock<Bucket>; NBUCK],
    buf: Box<[Buf]>,
    disk: D,
    ticks: Arc<Ticks>,
}

impl<D: BlockDevice> Bcache<D> {
    /// A cache of NBUF buffers over `disk`.
    pub fn new(disk: D, ticks: Arc<Ticks>) -> Self {
        Self::with_capacity(NBUF, disk, ticks)
    }

    /// A cache of `nbuf` buffers over `disk`, all starting out in bucket 0.
    pub fn with_capacity(nbuf: usize, disk: D, ticks: Arc<Ticks>) -> Self {
        let bcache = Bcache {
            lock: Spinlock::init_lock("bcache", ()),
            bucket: core::array::from_fn(|_| Spinlock::init_lock("bcache.bucket", Bucket::new())),
            buf: (0..nbuf).map(Buf::new).collect(),
            disk,
            ticks,
        };

        {
            let mut bucket = bcache.bucket[0].acquire();
            for i in 0..nbuf {
                bucket.push(&bcache.buf, i);
            }
        }
        log::debug!("binit: {} buffers in {} buckets", nbuf, NBUCK);

        bcache
    }

    pub fn disk(&self) -> &D {
        &self.disk
    }

    /// Number of buffers in the cache.
    pub fn nbuf(&self) -> usize {
        self.buf.len()
    }

    pub(crate) fn buf(&self, id: BufId) -> &Buf {
        &self.buf[id.0]
    }

    // Find dev/blockno in a locked bucket and take a reference to it.
    fn lookup(&self, bucket: &SpinlockGuard<'_, Bucket>, dev: u32, blockno: u32) -> Option<usize> {
        let i = bucket
            .iter(&self.buf)
            .find(|&i| self.buf[i].dev() == dev && self.buf[i].blockno() == blockno)?;

        let b = &self.buf[i];
        if b.refcnt() == 0 {
            // Nobody held it, so its contents may be stale.
            b.valid.store(false, Ordering::Relaxed);
        }
        b.refcnt.fetch_add(1, Ordering::Relaxed);
        b.usetick.store(self.ticks.now(), Ordering::Relaxed);
        Some(i)
    }

    // Least recently used unreferenced buffer of a locked bucket.
    fn lru(&self, bucket: &SpinlockGuard<'_, Bucket>) -> Option<usize> {
        let mut victim: Option<usize> = None;
        for i in bucket.iter(&self.buf) {
            let b = &self.buf[i];
            if b.refcnt() != 0 {
                continue;
            }
            match victim {
                Some(v) if self.buf[v].usetick() <= b.usetick() => {}
                _ => victim = Some(i),
            }
        }
        victim
    }

    fn check_home(&self, i: usize, id: usize) {
        if self.buf[i].blockno() as usize % NBUCK != id {
            panic!("bget: victim in wrong bucket");
        }
    }

    // Sleep until the buffer is ours. The caller has taken a reference to
    // it and released every spin lock.
    fn lock_buf(&self, i: usize) -> BufGuard<'_, D> {
        self.buf[i].lock.acquire_sleep();
        BufGuard::new(self, BufId(i))
    }

    /// Look through buffer cache for block on device dev.
    /// If not found, recycle a buffer, without reading the disk.
    /// In either case, return locked buffer.
    pub fn bget(&self, dev: u32, blockno: u32) -> BufGuard<'_, D> {
        let id = blockno as usize % NBUCK;

        // Is the block already cached?
        {
            let bucket = self.bucket[id].acquire();
            if let Some(i) = self.lookup(&bucket, dev, blockno) {
                drop(bucket);
                return self.lock_buf(i);
            }
        }

        // Not cached. Another thread may cache the same block while the
        // bucket is unlocked, so look again once the eviction lock is held.
        let evict = self.lock.acquire();
        let mut bucket = self.bucket[id].acquire();
        if let Some(i) = self.lookup(&bucket, dev, blockno) {
            drop(bucket);
            drop(evict);
            return self.lock_buf(i);
        }

        // Recycle the least recently used unused buffer of the first bucket
        // that has one, starting from this bucket.
        for k in 0..NBUCK {
            let vid = (id + k) % NBUCK;
            let victim = if vid == id {
                let v = self.lru(&bucket);
                if let Some(i) = v {
                    self.check_home(i, vid);
                }
                v
            } else {
                let mut other = self.bucket[vid].acquire();
                let v = self.lru(&other);
                if let Some(i) = v {
                    self.check_home(i, vid);
                    other.remove(&self.buf, i);
                    bucket.push(&self.buf, i);
                }
                v
            };

            if let Some(i) = victim {
                let b = &self.buf[i];
                let (olddev, oldblockno) = (b.dev(), b.blockno());
                b.dev.store(dev, Ordering::Relaxed);
                b.blockno.store(blockno, Ordering::Relaxed);
                b.valid.store(false, Ordering::Relaxed);
                b.refcnt.store(1, Ordering::Relaxed);
                b.usetick.store(self.ticks.now(), Ordering::Relaxed);
                drop(bucket);
                drop(evict);

                log::trace!(
                    "bget: buf {} {}/{} -> {}/{} (bucket {} -> {})",
                    i, olddev, oldblockno, dev, blockno, vid, id
                );
                return self.lock_buf(i);
            }
        }

        panic!("bget: no buffers");
    }

    /// Return a locked buf with the contents of the indicated block.
    pub fn bread(&self, dev: u32, blockno: u32) -> BufGuard<'_, D> {
        let mut b = self.bget(dev, blockno);
        if !b.valid() {
            self.disk.rw(dev, blockno, b.data_mut(), false);
            b.buf().valid.store(true, Ordering::Relaxed);
        }
        b
    }

    /// Write b's contents to disk. Must be locked.
    pub fn bwrite(&self, b: &mut BufGuard<'_, D>) {
        let buf = b.buf();
        if !ptr::eq(b.bcache, self) || !buf.lock.holding_sleep() {
            panic!("bwrite");
        }
        self.disk.rw(buf.dev(), buf.blockno(), b.data_mut(), true);
    }

    /// Release a locked buffer.
    /// Its place in the bucket is unchanged; the usetick stamp records the use.
    pub fn brelse(&self, b: BufGuard<'_, D>) {
        if !ptr::eq(b.bcache, self) {
            panic!("brelse");
        }
        drop(b);
    }

    // The body of brelse, run when a BufGuard drops.
    pub(crate) fn relse(&self, id: BufId) {
        let b = &self.buf[id.0];
        if !b.lock.holding_sleep() {
            panic!("brelse");
        }

        {
            let _bucket = self.bucket[b.blockno() as usize % NBUCK].acquire();
            if b.refcnt() == 0 {
                panic!("brelse: refcnt");
            }
            b.refcnt.fetch_sub(1, Ordering::Relaxed);
            b.usetick.store(self.ticks.now(), Ordering::Relaxed);
        }
        b.lock.release_sleep();
    }

    /// Keep a locked buffer in the cache after it is released.
    pub fn bpin(&self, b: &BufGuard<'_, D>) {
        let buf = b.buf();
        if !ptr::eq(b.bcache, self) || !buf.lock.holding_sleep() {
            panic!("bpin");
        }
        // Held, so the buffer cannot move to another bucket.
        let _bucket = self.bucket[buf.blockno() as usize % NBUCK].acquire();
        buf.refcnt.fetch_add(1, Ordering::Relaxed);
    }

    /// Drop a pin taken by bpin. The caller need not hold the buffer.
    pub fn bunpin(&self, id: BufId) {
        let b = &self.buf[id.0];
        let home = b.blockno() as usize % NBUCK;
        let _bucket = self.bucket[home].acquire();
        // An unreferenced buffer may have moved before the lock was taken.
        if b.blockno() as usize % NBUCK != home || b.refcnt() == 0 {
            panic!("bunpin");
        }
        b.refcnt.fetch_sub(1, Ordering::Relaxed);
    }
}
