// src/foreground.rs
//! Foreground/background state supplied by the host application

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

/// Tells the monitor whether the host is in the foreground, which selects
/// the sampling cadence.
pub trait ForegroundStateProvider: Send + Sync {
    fn is_foreground(&self) -> bool;
}

/// Shared flag the host flips as it moves between foreground and background.
#[derive(Debug, Clone)]
pub struct ForegroundFlag(Arc<AtomicBool>);

impl ForegroundFlag {
    pub fn new(foreground: bool) -> Self {
        Self(Arc::new(AtomicBool::new(foreground)))
    }

    pub fn set(&self, foreground: bool) {
        self.0.store(foreground, Ordering::Relaxed);
    }
}

impl Default for ForegroundFlag {
    fn default() -> Self {
        Self::new(true)
    }
}

impl ForegroundStateProvider for ForegroundFlag {
    fn is_foreground(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Host that is always in the foreground, e.g. a CLI.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysForeground;

impl ForegroundStateProvider for AlwaysForeground {
    fn is_foreground(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flag_is_shared_between_clones() {
        let flag = ForegroundFlag::default();
        let observer = flag.clone();
        assert!(observer.is_foreground());

        flag.set(false);
        assert!(!observer.is_foreground());
    }
}
