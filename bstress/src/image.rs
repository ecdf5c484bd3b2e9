use std::fs::File;
use std::io;
use std::os::unix::fs::FileExt;
use std::path::Path;

use xv6_core::memlayout::BSIZE;
use xv6_core::BlockDevice;

/// A disk image file: block n at byte offset n * BSIZE, one device.
pub struct ImageDisk {
    file: File,
    nblocks: u32,
}

impl ImageDisk {
    /// Create (or truncate) an image of nblocks zeroed blocks.
    pub fn create<P: AsRef<Path>>(path: P, nblocks: u32) -> io::Result<Self> {
        let file = File::options()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        file.set_len(nblocks as u64 * BSIZE as u64)?;
        Ok(ImageDisk { file, nblocks })
    }

    pub fn nblocks(&self) -> u32 {
        self.nblocks
    }
}

impl BlockDevice for ImageDisk {
    fn rw(&self, _dev: u32, blockno: u32, data: &mut [u8; BSIZE], write: bool) {
        if blockno >= self.nblocks {
            panic!("disk_rw: block {} past end of image", blockno);
        }
        let off = blockno as u64 * BSIZE as u64;
        let r = if write {
            self.file.write_all_at(data, off)
        } else {
            self.file.read_exact_at(data, off)
        };
        if let Err(e) = r {
            panic!("disk_rw: block {}: {}", blockno, e);
        }
    }
}
