//
// The raw disk interface under the buffer cache.
//

mod ram_disk;

pub use ram_disk::RamDisk;

use crate::memlayout::BSIZE;

/// A device that moves whole blocks between memory and disk.
///
/// `rw` may block the calling thread until the transfer completes; the
/// buffer cache only calls it while holding the buffer's sleep lock and
/// no spin lock. Transfers are assumed reliable.
pub trait BlockDevice: Send + Sync {
    /// Read block `blockno` of device `dev` into `data`, or write `data`
    /// to it if `write` is set.
    fn rw(&self, dev: u32, blockno: u32, data: &mut [u8; BSIZE], write: bool);
}

impl<D: BlockDevice + ?Sized> BlockDevice for &D {
    fn rw(&self, dev: u32, blockno: u32, data: &mut [u8; BSIZE], write: bool) {
        (**self).rw(dev, blockno, data, write)
    }
}
