//! Modified-time clock.
//!
//! Every modification anywhere in the process draws a fresh value from one
//! shared counter, so times taken in different pipelines stay comparable.

use std::sync::atomic::{AtomicU64, Ordering};

static CLOCK: AtomicU64 = AtomicU64::new(1);

/// A point on the modified-time clock. `Stamp::ZERO` predates everything.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Stamp(u64);

impl Stamp {
    pub const ZERO: Stamp = Stamp(0);

    /// Draw the next value. Strictly greater than every earlier draw.
    pub fn next() -> Self {
        Stamp(CLOCK.fetch_add(1, Ordering::Relaxed))
    }

    pub fn value(self) -> u64 {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stamps_increase() {
        let a = Stamp::next();
        let b = Stamp::next();
        assert!(b > a);
        assert!(a > Stamp::ZERO);
    }
}
