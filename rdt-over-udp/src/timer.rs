//! Retransmission and quiescence timing.
//!
//! Stop-and-wait needs two durations:
//! - [`TimerConfig::timeout`]: how long the sender waits for an ACK before
//!   retransmitting.  Fixed; there is no RTT estimation and no back-off.
//! - [`TimerConfig::twait`]: how long teardown must observe silence before
//!   releasing the socket (the TIME-WAIT analogue), a multiple of `timeout`.
//!
//! Waiting itself is done by [`within`], a deadline-bound wrapper over a
//! single readiness future; nothing here sleeps and polls.

use std::future::Future;
use std::time::Duration;

/// Default retransmission timeout.
pub const TIMEOUT: Duration = Duration::from_millis(50);

/// `twait` as a multiple of `timeout`.
pub const TWAIT_FACTOR: u32 = 10;

/// Adjustable timeout parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerConfig {
    /// Retransmission timeout.
    pub timeout: Duration,
    /// Quiescence window observed by `close`.
    pub twait: Duration,
}

impl TimerConfig {
    /// Derive `twait` from `timeout`.
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            twait: timeout * TWAIT_FACTOR,
        }
    }

    pub fn with_twait(mut self, twait: Duration) -> Self {
        self.twait = twait;
        self
    }
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self::new(TIMEOUT)
    }
}

/// Run `fut` for at most `limit`.  `None` means the deadline passed first.
///
/// The future is dropped on expiry, so it must be cancel-safe.
pub async fn within<F: Future>(limit: Duration, fut: F) -> Option<F::Output> {
    tokio::time::timeout(limit, fut).await.ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_protocol_constants() {
        let t = TimerConfig::default();
        assert_eq!(t.timeout, Duration::from_millis(50));
        assert_eq!(t.twait, Duration::from_millis(500));
    }

    #[test]
    fn twait_follows_timeout_unless_overridden() {
        let t = TimerConfig::new(Duration::from_millis(20));
        assert_eq!(t.twait, Duration::from_millis(200));
        let t = t.with_twait(Duration::from_millis(75));
        assert_eq!(t.timeout, Duration::from_millis(20));
        assert_eq!(t.twait, Duration::from_millis(75));
    }

    #[tokio::test]
    async fn within_returns_ready_output() {
        assert_eq!(within(Duration::from_secs(1), async { 7 }).await, Some(7));
    }

    #[tokio::test(start_paused = true)]
    async fn within_expires_on_pending_future() {
        let never = std::future::pending::<()>();
        assert_eq!(within(Duration::from_millis(50), never).await, None);
    }
}
