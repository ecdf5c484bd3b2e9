// Physical memory allocator, for user processes,
// kernel stacks, page-table pages,
// and pipe buffers. Allocates whole 4096-byte pages.
//
// Each page carries a reference count so that copy-on-write mappings can
// share it: kfree only puts a page back on the free list when the last
// reference goes away. The free list and the reference counts have
// separate locks, and no path other than check() holds both.

use core::cell::UnsafeCell;

use crate::error::{MmError, MmResult};
use crate::memlayout::{pg_round_up, PGSIZE};
use crate::spinlock::Spinlock;

/// Address of a page inside the allocator's range.
pub type PhysAddr = usize;

struct Page(UnsafeCell<[u8; PGSIZE]>);

// A page's bytes belong to whoever holds a reference to it. The allocator
// only writes them while nobody does.
unsafe impl Sync for Page {}

impl Page {
    fn new() -> Self {
        Page(UnsafeCell::new([0; PGSIZE]))
    }
}

// The free list, linked through page indices.
struct Run {
    freelist: Option<usize>,
    next: Box<[Option<usize>]>,
    nfree: usize,
}

pub struct Kmem {
    lock: Spinlock<Run>,
    ref_lock: Spinlock<Box<[u32]>>,
    base: PhysAddr,
    end: PhysAddr,
    mem: Box<[Page]>,
}

impl Kmem {
    /// Manage the whole pages in [pa_start, pa_end), all of them free.
    pub fn new(pa_start: PhysAddr, pa_end: PhysAddr) -> MmResult<Self> {
        if pa_end < pa_start {
            return Err(MmError::InvalidRange);
        }
        let base = pg_round_up(pa_start).ok_or(MmError::InvalidRange)?;
        if base >= pa_end || pa_end - base < PGSIZE {
            return Err(MmError::EmptyRange);
        }
        let npages = (pa_end - base) / PGSIZE;

        let kmem = Kmem {
            lock: Spinlock::init_lock("kmem", Run {
                freelist: None,
                next: vec![None; npages].into_boxed_slice(),
                nfree: 0,
            }),
            ref_lock: Spinlock::init_lock("refcount", vec![0; npages].into_boxed_slice()),
            base,
            end: base + npages * PGSIZE,
            mem: (0..npages).map(|_| Page::new()).collect(),
        };
        kmem.freerange();
        log::debug!("kinit: {} pages from {:#x} to {:#x}", npages, kmem.base, kmem.end);

        Ok(kmem)
    }

    // Seed the free list through kfree, so every page starts out with a
    // reference count of 0 and on the list.
    fn freerange(&self) {
        let mut pa = self.base;
        while pa + PGSIZE <= self.end {
            self.ref_lock.acquire()[self.memindex(pa, "freerange")] = 1;
            self.kfree(pa);
            pa += PGSIZE;
        }
    }

    fn memindex(&self, pa: PhysAddr, who: &str) -> usize {
        if pa % PGSIZE != 0 || pa < self.base || pa >= self.end {
            panic!("{}", who);
        }
        (pa - self.base) / PGSIZE
    }

    #[cfg(feature = "junk")]
    fn fill(&self, i: usize, c: u8) {
        unsafe { (*self.mem[i].0.get()).fill(c) }
    }

    #[cfg(not(feature = "junk"))]
    fn fill(&self, _i: usize, _c: u8) {}

    /// Drop a reference to the page of physical memory pointed at by pa,
    /// which normally should have been returned by a call to kalloc().
    /// The page goes back on the free list with the last reference.
    pub fn kfree(&self, pa: PhysAddr) {
        let i = self.memindex(pa, "kfree");

        {
            let mut ref_count = self.ref_lock.acquire();
            if ref_count[i] == 0 {
                panic!("kfree: negative refcount");
            }
            ref_count[i] -= 1;
            if ref_count[i] != 0 {
                return;
            }
        }

        // Fill with junk to catch dangling refs.
        self.fill(i, 1);

        let mut kmem = self.lock.acquire();
        kmem.next[i] = kmem.freelist;
        kmem.freelist = Some(i);
        kmem.nfree += 1;
    }

    /// Allocate one 4096-byte page of physical memory.
    /// Returns None if the memory cannot be allocated.
    pub fn kalloc(&self) -> Option<PhysAddr> {
        let r = {
            let mut kmem = self.lock.acquire();
            let r = kmem.freelist;
            if let Some(i) = r {
                kmem.freelist = kmem.next[i].take();
                kmem.nfree -= 1;
            }
            r
        };

        let Some(i) = r else {
            log::warn!("kalloc: out of memory");
            return None;
        };

        {
            let mut ref_count = self.ref_lock.acquire();
            if ref_count[i] != 0 {
                panic!("kalloc: refcount");
            }
            ref_count[i] = 1;
        }

        self.fill(i, 5); // fill with junk
        Some(self.base + i * PGSIZE)
    }

    /// Take another reference to an allocated page.
    pub fn addref(&self, pa: PhysAddr) {
        let i = self.memindex(pa, "addref");
        let mut ref_count = self.ref_lock.acquire();
        if ref_count[i] == 0 {
            panic!("addref: free page");
        }
        ref_count[i] += 1;
    }

    pub fn refcnt(&self, pa: PhysAddr) -> u32 {
        let i = self.memindex(pa, "refcnt");
        self.ref_lock.acquire()[i]
    }

    /// Pages on the free list.
    pub fn nfree(&self) -> usize {
        self.lock.acquire().nfree
    }

    /// Pages under management, free or not.
    pub fn npages(&self) -> usize {
        self.mem.len()
    }

    /// The managed range, [start, end).
    pub fn range(&self) -> (PhysAddr, PhysAddr) {
        (self.base, self.end)
    }

    /// Where the bytes of page pa live. Writing through the pointer is only
    /// sound for a holder of a reference to the page.
    pub fn page(&self, pa: PhysAddr) -> *mut u8 {
        let i = self.memindex(pa, "page");
        self.mem[i].0.get() as *mut u8
    }

    /// Check that exactly the pages with no references are on the free
    /// list. Only meaningful while no kalloc/kfree is in flight.
    pub fn check(&self) {
        let kmem = self.lock.acquire();
        let ref_count = self.ref_lock.acquire();

        let mut n = 0;
        let mut r = kmem.freelist;
        while let Some(i) = r {
            if ref_count[i] != 0 {
                panic!("check refcount");
            }
            n += 1;
            if n > ref_count.len() {
                panic!("check: freelist loops");
            }
            r = kmem.next[i];
        }

        if n != kmem.nfree || ref_count.iter().filter(|&&c| c == 0).count() != n {
            panic!("check nfree");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memlayout::KERNBASE;
    use std::collections::HashSet;
    use std::thread;

    fn kmem(npages: usize) -> Kmem {
        Kmem::new(KERNBASE, KERNBASE + npages * PGSIZE).unwrap()
    }

    #[test]
    fn init_frees_every_page() {
        let kmem = kmem(8);
        assert_eq!(kmem.npages(), 8);
        assert_eq!(kmem.nfree(), 8);
        assert_eq!(kmem.range(), (KERNBASE, KERNBASE + 8 * PGSIZE));
        let mut pa = KERNBASE;
        while pa < KERNBASE + 8 * PGSIZE {
            assert_eq!(kmem.refcnt(pa), 0);
            pa += PGSIZE;
        }
        kmem.check();
    }

    #[test]
    fn range_rounds_to_whole_pages() {
        let kmem = Kmem::new(KERNBASE + 1, KERNBASE + 3 * PGSIZE + 17).unwrap();
        assert_eq!(kmem.range(), (KERNBASE + PGSIZE, KERNBASE + 3 * PGSIZE));
        assert_eq!(kmem.npages(), 2);
    }

    #[test]
    fn bad_ranges() {
        assert_eq!(Kmem::new(KERNBASE, KERNBASE - 1).err(), Some(MmError::InvalidRange));
        assert_eq!(Kmem::new(KERNBASE, KERNBASE).err(), Some(MmError::EmptyRange));
        assert_eq!(Kmem::new(KERNBASE + 1, KERNBASE + PGSIZE + 5).err(), Some(MmError::EmptyRange));
        // rounding the start up would wrap
        assert_eq!(Kmem::new(usize::MAX - 10, usize::MAX).err(), Some(MmError::InvalidRange));
    }

    #[test]
    fn exhaust_then_reuse() {
        let kmem = kmem(4);
        let pages: Vec<_> = (0..4).map(|_| kmem.kalloc().unwrap()).collect();
        assert_eq!(pages.iter().collect::<HashSet<_>>().len(), 4);
        for &pa in &pages {
            assert_eq!(pa % PGSIZE, 0);
            assert_eq!(kmem.refcnt(pa), 1);
        }
        assert_eq!(kmem.kalloc(), None);
        assert_eq!(kmem.nfree(), 0);

        kmem.kfree(pages[2]);
        assert_eq!(kmem.refcnt(pages[2]), 0);
        assert_eq!(kmem.kalloc(), Some(pages[2]));
        assert_eq!(kmem.refcnt(pages[2]), 1);
        kmem.check();
    }

    #[test]
    fn shared_page_freed_by_last_reference() {
        let kmem = kmem(4);
        let pa = kmem.kalloc().unwrap();
        kmem.addref(pa);
        assert_eq!(kmem.refcnt(pa), 2);

        kmem.kfree(pa);
        assert_eq!(kmem.refcnt(pa), 1);
        assert_eq!(kmem.nfree(), 3);

        kmem.kfree(pa);
        assert_eq!(kmem.refcnt(pa), 0);
        assert_eq!(kmem.nfree(), 4);
        kmem.check();
    }

    #[cfg(feature = "junk")]
    #[test]
    fn junk_fills() {
        let kmem = kmem(2);
        let pa = kmem.kalloc().unwrap();
        let page = unsafe { core::slice::from_raw_parts(kmem.page(pa), PGSIZE) };
        assert!(page.iter().all(|&b| b == 5));

        unsafe { *kmem.page(pa) = 0x77 };
        kmem.addref(pa);
        kmem.kfree(pa);
        // still referenced, left alone
        assert_eq!(unsafe { *kmem.page(pa) }, 0x77);

        kmem.kfree(pa);
        let page = unsafe { core::slice::from_raw_parts(kmem.page(pa), PGSIZE) };
        assert!(page.iter().all(|&b| b == 1));
    }

    #[test]
    #[should_panic(expected = "kfree: negative refcount")]
    fn double_free() {
        let kmem = kmem(2);
        let pa = kmem.kalloc().unwrap();
        kmem.kfree(pa);
        kmem.kfree(pa);
    }

    #[test]
    #[should_panic(expected = "kfree")]
    fn free_unaligned() {
        let kmem = kmem(2);
        let pa = kmem.kalloc().unwrap();
        kmem.kfree(pa + 8);
    }

    #[test]
    #[should_panic(expected = "kfree")]
    fn free_outside_range() {
        let kmem = kmem(2);
        kmem.kfree(KERNBASE + 2 * PGSIZE);
    }

    #[test]
    #[should_panic(expected = "addref: free page")]
    fn addref_free_page() {
        let kmem = kmem(2);
        kmem.addref(KERNBASE);
    }

    #[test]
    fn concurrent_alloc_free() {
        let kmem = kmem(16);
        thread::scope(|s| {
            for _ in 0..8 {
                s.spawn(|| {
                    let mut held = Vec::new();
                    for round in 0..500 {
                        if let Some(pa) = kmem.kalloc() {
                            assert_eq!(kmem.refcnt(pa), 1);
                            if round % 3 == 0 {
                                kmem.addref(pa);
                                kmem.kfree(pa);
                            }
                            held.push(pa);
                        }
                        if held.len() > 2 || round % 5 == 0 {
                            for pa in held.drain(..) {
                                kmem.kfree(pa);
                            }
                        }
                    }
                    for pa in held {
                        kmem.kfree(pa);
                    }
                });
            }
        });
        assert_eq!(kmem.nfree(), 16);
        kmem.check();
    }

    #[test]
    fn concurrent_sharing_of_one_page() {
        let kmem = kmem(2);
        let pa = kmem.kalloc().unwrap();
        thread::scope(|s| {
            for _ in 0..8 {
                s.spawn(|| {
                    for _ in 0..1000 {
                        kmem.addref(pa);
                        kmem.kfree(pa);
                    }
                });
            }
        });
        assert_eq!(kmem.refcnt(pa), 1);
        assert_eq!(kmem.nfree(), 1);
        kmem.kfree(pa);
        kmem.check();
    }
}
