//! Errors a caller can recover from.
//!
//! Broken invariants (double free, releasing a lock not held, an
//! exhausted buffer cache) are not errors: they panic.

use core::fmt;

/// Errors setting up the page allocator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MmError {
    /// The end of the range lies below its start.
    InvalidRange,
    /// The range does not hold a single whole page.
    EmptyRange,
}

impl MmError {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidRange => "kinit: range ends before it starts",
            Self::EmptyRange => "kinit: no whole page in range",
        }
    }
}

impl fmt::Display for MmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::error::Error for MmError {}

pub type MmResult<T> = Result<T, MmError>;
