use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use clap::{ArgAction, Parser};
use log::LevelFilter;
use xv6_core::memlayout::{KERNBASE, PGSIZE};
use xv6_core::param::{NBUF, ROOTDEV};
use xv6_core::{printf, Bcache, BlockDevice, BufId, Kmem, RamDisk, Ticks};

use crate::image::ImageDisk;

mod image;

const FSSIZE: u32 = 2000; // size of the disk image in blocks

// Each thread holds at most one locked buffer and one pinned buffer.
const BUFS_PER_THREAD: usize = 2;

/// Boot the buffer cache and the page allocator, then hammer both from
/// many threads and check that no update was lost.
#[derive(Parser, Debug)]
struct Args {
    /// Disk image to create and run against, instead of a disk in memory
    #[arg(short, long)]
    image: Option<String>,

    /// Size of the disk image in blocks
    #[arg(long, default_value_t = FSSIZE)]
    size: u32,

    /// Number of kernel threads
    #[arg(short, long, default_value_t = 8)]
    threads: usize,

    /// Operations per thread
    #[arg(short, long, default_value_t = 1000)]
    rounds: usize,

    /// Number of distinct blocks to touch
    #[arg(short, long, default_value_t = 200)]
    blocks: u32,

    /// Buffers in the cache
    #[arg(long, default_value_t = NBUF)]
    nbuf: usize,

    /// Physical pages under the allocator
    #[arg(short, long, default_value_t = 64)]
    pages: usize,

    /// Log more (-v debug, -vv trace)
    #[arg(short, action = ArgAction::Count)]
    verbose: u8,
}

#[derive(Default)]
struct Stats {
    pins: AtomicUsize,
    pages: AtomicUsize,
    oom: AtomicUsize,
}

fn invalid(msg: String) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidInput, msg)
}

fn main() -> io::Result<()> {
    let args: Args = Args::parse();

    let level = match args.verbose {
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    printf::init(level).map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;

    if args.threads == 0 || args.blocks == 0 {
        return Err(invalid("need at least one thread and one block".into()));
    }
    if args.nbuf <= args.threads * BUFS_PER_THREAD {
        return Err(invalid(format!(
            "{} buffers cannot serve {} threads, need more than {}",
            args.nbuf,
            args.threads,
            args.threads * BUFS_PER_THREAD
        )));
    }
    if args.image.is_some() && args.blocks > args.size {
        return Err(invalid(format!("{} blocks do not fit an image of {}", args.blocks, args.size)));
    }

    let kmem = Kmem::new(KERNBASE, KERNBASE + args.pages * PGSIZE)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
    let ticks = Arc::new(Ticks::new());

    match &args.image {
        Some(path) => {
            let disk = ImageDisk::create(path, args.size)?;
            log::info!("image {}: {} blocks", path, disk.nblocks());
            run(&args, &Bcache::with_capacity(args.nbuf, disk, ticks.clone()), &kmem, &ticks)
        }
        None => run(
            &args,
            &Bcache::with_capacity(args.nbuf, RamDisk::new(), ticks.clone()),
            &kmem,
            &ticks,
        ),
    }
}

fn counter(data: &[u8]) -> u64 {
    let mut n = [0u8; 8];
    n.copy_from_slice(&data[..8]);
    u64::from_le_bytes(n)
}

fn run<D: BlockDevice>(args: &Args, bcache: &Bcache<D>, kmem: &Kmem, ticks: &Ticks) -> io::Result<()> {
    log::info!(
        "{} threads x {} rounds, {} blocks, {} buffers, {} pages",
        args.threads, args.rounds, args.blocks, bcache.nbuf(), kmem.npages()
    );

    let stats = Stats::default();
    let done = AtomicBool::new(false);
    let start = Instant::now();

    thread::scope(|s| {
        // the timer interrupt
        s.spawn(|| {
            while !done.load(Ordering::Relaxed) {
                ticks.tick();
                thread::sleep(Duration::from_millis(1));
            }
        });

        let workers: Vec<_> = (0..args.threads)
            .map(|t| {
                let stats = &stats;
                s.spawn(move || worker(t, args, bcache, kmem, stats))
            })
            .collect();
        for w in workers {
            if w.join().is_err() {
                log::error!("worker panicked");
            }
        }
        done.store(true, Ordering::Relaxed);
    });

    let elapsed = start.elapsed();

    let total: u64 = (0..args.blocks)
        .map(|blockno| counter(bcache.bread(ROOTDEV, blockno).data()))
        .sum();
    let expected = (args.threads * args.rounds) as u64;
    if total != expected {
        return Err(io::Error::new(
            io::ErrorKind::Other,
            format!("lost updates: blocks count {} of {}", total, expected),
        ));
    }

    kmem.check();
    if kmem.nfree() != kmem.npages() {
        return Err(io::Error::new(
            io::ErrorKind::Other,
            format!("leaked pages: {} of {} free", kmem.nfree(), kmem.npages()),
        ));
    }

    println!(
        "ok: {} block updates, {} pins, {} shared pages, {} kalloc failures, {} ticks in {:?}",
        total,
        stats.pins.load(Ordering::Relaxed),
        stats.pages.load(Ordering::Relaxed),
        stats.oom.load(Ordering::Relaxed),
        ticks.now(),
        elapsed
    );
    Ok(())
}

fn worker<D: BlockDevice>(t: usize, args: &Args, bcache: &Bcache<D>, kmem: &Kmem, stats: &Stats) {
    let mut seed = (t as u32).wrapping_mul(2654435761) | 1;
    let mut pinned: Option<BufId> = None;

    for round in 0..args.rounds {
        seed = seed.wrapping_mul(1103515245).wrapping_add(12345);
        let blockno = (seed >> 8) % args.blocks;

        let mut b = bcache.bread(ROOTDEV, blockno);
        let n = counter(b.data());
        b.data_mut()[..8].copy_from_slice(&(n + 1).to_le_bytes());
        bcache.bwrite(&mut b);
        if round % 16 == 0 {
            if let Some(id) = pinned.take() {
                bcache.bunpin(id);
            }
            bcache.bpin(&b);
            pinned = Some(b.id());
            stats.pins.fetch_add(1, Ordering::Relaxed);
        }
        bcache.brelse(b);

        // a page shared by two owners, as after a copy-on-write fork
        match kmem.kalloc() {
            Some(pa) => {
                let page = kmem.page(pa);
                unsafe { page.write_bytes(t as u8, PGSIZE) };
                kmem.addref(pa);
                kmem.kfree(pa);
                if unsafe { *page } != t as u8 {
                    panic!("page {:#x} changed under its owner", pa);
                }
                kmem.kfree(pa);
                stats.pages.fetch_add(1, Ordering::Relaxed);
            }
            None => {
                stats.oom.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    if let Some(id) = pinned {
        bcache.bunpin(id);
    }
}
