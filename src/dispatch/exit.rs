//! Cooperative cancellation token.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Granularity of [`ExitFlag::sleep`].
const SLICE: Duration = Duration::from_millis(20);

/// Shared "should exit" flag checked by every worker at the top of its loop.
///
/// Clones observe the same flag. Setting it never interrupts a metric read in
/// flight; the worker notices on its next check.
#[derive(Debug, Clone, Default)]
pub struct ExitFlag {
    flag: Arc<AtomicBool>,
}

impl ExitFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_set(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Sleeps for `duration`, waking early once the flag is set.
    ///
    /// Returns `true` if the flag is set on return.
    pub fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        loop {
            if self.is_set() {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            std::thread::sleep(SLICE.min(deadline - now));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_state() {
        let a = ExitFlag::new();
        let b = a.clone();
        assert!(!b.is_set());
        a.set();
        assert!(b.is_set());
    }

    #[test]
    fn test_sleep_runs_full_duration_when_unset() {
        let flag = ExitFlag::new();
        let started = Instant::now();
        assert!(!flag.sleep(Duration::from_millis(50)));
        assert!(started.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn test_sleep_wakes_early() {
        let flag = ExitFlag::new();
        let setter = flag.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(30));
            setter.set();
        });

        let started = Instant::now();
        assert!(flag.sleep(Duration::from_secs(10)));
        assert!(started.elapsed() < Duration::from_secs(2));
        handle.join().unwrap();
    }
}
