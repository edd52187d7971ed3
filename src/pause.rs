//! Settling delays between interface state transitions.
//!
//! The workflow waits a fixed time after each link command and after the
//! network restart. Going through [`Pause`] lets tests skip those waits.

use std::time::Duration;

/// Trait for waiting between two steps.
#[cfg_attr(test, mockall::automock)]
pub trait Pause: Send + Sync {
    /// Block the current thread for `duration`.
    fn pause(&self, duration: Duration);
}

/// Real pause backed by [`std::thread::sleep`].
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadPause;

impl Pause for ThreadPause {
    fn pause(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Pause returning immediately.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoPause;

impl Pause for NoPause {
    fn pause(&self, _duration: Duration) {}
}

#[cfg(test)]
mod should {
    use super::*;
    use std::time::Instant;

    #[test]
    fn not_wait_with_no_pause() {
        let start = Instant::now();
        NoPause.pause(Duration::from_secs(100));
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn wait_with_thread_pause() {
        let start = Instant::now();
        ThreadPause.pause(Duration::from_millis(20));
        assert!(start.elapsed() >= Duration::from_millis(20));
    }
}
