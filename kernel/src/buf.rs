use core::cell::UnsafeCell;
use core::marker::PhantomData;
use core::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};

use crate::bio::Bcache;
use crate::memlayout::BSIZE;
use crate::sleeplock::Sleeplock;
use crate::virtio::BlockDevice;

/// One slot of the buffer cache.
///
/// Everything except `data` is metadata, changed only while holding the
/// lock of the bucket the slot currently lives in. `data` belongs to
/// whoever holds `lock`.
pub(crate) struct Buf {
    pub(crate) valid: AtomicBool, // has data been read from disk?
    pub(crate) dev: AtomicU32,
    pub(crate) blockno: AtomicU32,
    pub(crate) refcnt: AtomicU32,
    pub(crate) usetick: AtomicU64, // tick of last bget/brelse, for LRU
    pub(crate) prev: AtomicUsize,  // bucket ring, as slot indices
    pub(crate) next: AtomicUsize,
    pub(crate) lock: Sleeplock,
    data: UnsafeCell<[u8; BSIZE]>,
}

// data is only reached through a BufGuard, which exists only while its
// thread holds the sleep lock.
unsafe impl Sync for Buf {}

impl Buf {
    pub(crate) fn new(slot: usize) -> Self {
        Buf {
            valid: AtomicBool::new(false),
            dev: AtomicU32::new(0),
            blockno: AtomicU32::new(0),
            refcnt: AtomicU32::new(0),
            usetick: AtomicU64::new(0),
            prev: AtomicUsize::new(slot),
            next: AtomicUsize::new(slot),
            lock: Sleeplock::init_lock("buffer"),
            data: UnsafeCell::new([0; BSIZE]),
        }
    }

    pub(crate) fn dev(&self) -> u32 {
        self.dev.load(Ordering::Relaxed)
    }

    pub(crate) fn blockno(&self) -> u32 {
        self.blockno.load(Ordering::Relaxed)
    }

    pub(crate) fn refcnt(&self) -> u32 {
        self.refcnt.load(Ordering::Relaxed)
    }

    pub(crate) fn usetick(&self) -> u64 {
        self.usetick.load(Ordering::Relaxed)
    }

    pub(crate) fn is_valid(&self) -> bool {
        self.valid.load(Ordering::Relaxed)
    }
}

/// Names a cache slot without holding its lock, for bunpin.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BufId(pub(crate) usize);

impl BufId {
    pub fn index(&self) -> usize {
        self.0
    }
}

/// A locked buffer, as returned by bget/bread.
///
/// Only one thread at a time holds the guard for a given block, so do not
/// keep it longer than necessary. Dropping it is brelse.
pub struct BufGuard<'a, D: BlockDevice> {
    pub(crate) bcache: &'a Bcache<D>,
    id: BufId,
    // the sleep lock is released by the thread that acquired it.
    _not_send: PhantomData<*const ()>,
}

impl<'a, D: BlockDevice> BufGuard<'a, D> {
    pub(crate) fn new(bcache: &'a Bcache<D>, id: BufId) -> Self {
        BufGuard {
            bcache,
            id,
            _not_send: PhantomData,
        }
    }

    pub(crate) fn buf(&self) -> &'a Buf {
        self.bcache.buf(self.id)
    }

    pub fn id(&self) -> BufId {
        self.id
    }

    pub fn dev(&self) -> u32 {
        self.buf().dev()
    }

    pub fn blockno(&self) -> u32 {
        self.buf().blockno()
    }

    /// Does data reflect the block on disk (or a newer version of it)?
    pub fn valid(&self) -> bool {
        self.buf().is_valid()
    }

    pub fn data(&self) -> &[u8; BSIZE] {
        unsafe { &*self.buf().data.get() }
    }

    pub fn data_mut(&mut self) -> &mut [u8; BSIZE] {
        unsafe { &mut *self.buf().data.get() }
    }
}

impl<D: BlockDevice> Drop for BufGuard<'_, D> {
    fn drop(&mut self) {
        self.bcache.relse(self.id);
    }
}
