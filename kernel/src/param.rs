pub const NBUF: usize = 30; // size of disk block cache
pub const NBUCK: usize = 13; // number of hash buckets in the block cache
pub const ROOTDEV: u32 = 1; // device number of file system root disk
