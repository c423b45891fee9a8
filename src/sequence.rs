use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonic counter scoped to one connection.
///
/// [`Sequence::next_value`] increments then returns, so the first value is 1. Values are
/// never reused, even when concurrent callers race.
#[derive(Debug, Default)]
pub struct Sequence(AtomicU64);

impl Sequence {
    #[must_use]
    pub const fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    pub fn next_value(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// The last value handed out, or 0 if none was.
    #[must_use]
    pub fn current(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}
