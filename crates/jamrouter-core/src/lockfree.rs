//! Lock-free primitives shared between the router's realtime threads.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};

/// Cache-line aligned atomic bool.
#[derive(Debug, Default)]
#[repr(align(64))]
pub struct AtomicFlag {
    value: AtomicBool,
}

impl AtomicFlag {
    pub fn new(value: bool) -> Self {
        Self {
            value: AtomicBool::new(value),
        }
    }

    #[inline]
    pub fn get(&self) -> bool {
        self.value.load(Ordering::Acquire)
    }

    #[inline]
    pub fn set(&self, value: bool) {
        self.value.store(value, Ordering::Release);
    }

    #[inline]
    pub fn swap(&self, value: bool) -> bool {
        self.value.swap(value, Ordering::AcqRel)
    }
}

/// Cache-line aligned nanosecond timestamp, `None` while unset.
#[derive(Debug)]
#[repr(align(64))]
pub struct AtomicDeadline {
    value: AtomicI64,
}

impl AtomicDeadline {
    const UNSET: i64 = i64::MIN;

    pub fn new() -> Self {
        Self {
            value: AtomicI64::new(Self::UNSET),
        }
    }

    #[inline]
    pub fn get(&self) -> Option<i64> {
        match self.value.load(Ordering::Acquire) {
            Self::UNSET => None,
            t => Some(t),
        }
    }

    #[inline]
    pub fn set(&self, nanos: i64) {
        self.value.store(nanos, Ordering::Release);
    }

    /// Clears the deadline, returning the previous value.
    #[inline]
    pub fn take(&self) -> Option<i64> {
        match self.value.swap(Self::UNSET, Ordering::AcqRel) {
            Self::UNSET => None,
            t => Some(t),
        }
    }
}

impl Default for AtomicDeadline {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_atomic_flag() {
        let flag = AtomicFlag::default();
        assert!(!flag.get());
        assert!(!flag.swap(true));
        assert!(flag.get());
    }

    #[test]
    fn test_deadline_take_clears() {
        let d = AtomicDeadline::new();
        assert_eq!(d.get(), None);
        d.set(42);
        assert_eq!(d.take(), Some(42));
        assert_eq!(d.get(), None);
    }
}
