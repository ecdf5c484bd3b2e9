// Block and page resource managers of the xv6 kernel.
//
// Two leaves that higher kernel layers build on:
// * bio    - the buffer cache, sharded into hash buckets.
// * kalloc - the physical page allocator, with per-page reference counts
//            for copy-on-write sharing.
//
// Neither knows about the other. Both are plain owned values: boot code
// creates them once and hands out references.

pub mod param;
pub mod memlayout;
pub mod error;
pub mod proc;
pub mod spinlock;
pub mod sleeplock;
pub mod trap;
pub mod printf;
pub mod virtio;
pub mod buf;
pub mod bio;
pub mod kalloc;

pub use bio::Bcache;
pub use buf::{BufGuard, BufId};
pub use error::MmError;
pub use kalloc::{Kmem, PhysAddr};
pub use trap::Ticks;
pub use virtio::{BlockDevice, RamDisk};
