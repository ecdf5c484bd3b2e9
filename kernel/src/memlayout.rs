// Physical memory layout, as seen by the page allocator.
//
// The kernel expects RAM for use by the kernel and user pages
// from physical address KERNBASE upward. On a hosted build the
// allocator owns a host allocation standing in for that range, and
// physical addresses are offsets into it.

pub const PGSIZE: usize = 4096; // bytes per page

pub const BSIZE: usize = 1024; // block size

pub const KERNBASE: usize = 0x8000_0000;

/// None if the rounded address does not fit a usize.
#[inline]
pub const fn pg_round_up(sz: usize) -> Option<usize> {
    match sz.checked_add(PGSIZE - 1) {
        Some(a) => Some(pg_round_down(a)),
        None => None,
    }
}

#[inline]
pub const fn pg_round_down(a: usize) -> usize {
    a & !(PGSIZE - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rounding() {
        assert_eq!(pg_round_up(KERNBASE), Some(KERNBASE));
        assert_eq!(pg_round_up(KERNBASE + 1), Some(KERNBASE + PGSIZE));
        assert_eq!(pg_round_down(KERNBASE + PGSIZE - 1), KERNBASE);
        assert_eq!(pg_round_up(usize::MAX - 1), None);
    }
}
