//! Time Source
//!
//! The `game/` layer never reads the clock itself: every operation that needs
//! "now" takes it as an argument. The network layer reads it from a [`Clock`].

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::time::Instant;

/// Source of wall-clock instants.
pub trait Clock: Send + Sync + 'static {
    /// Current instant.
    fn now(&self) -> DateTime<Utc>;
}

/// Shared clock handle.
pub type SharedClock = Arc<dyn Clock>;

/// Wall clock anchored to tokio's monotonic clock.
///
/// The wall time is sampled once at construction; afterwards instants advance
/// with `tokio::time::Instant`, so a paused test runtime controls them too and
/// a wall-clock step never reorders submissions.
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    wall_anchor: DateTime<Utc>,
    mono_anchor: Instant,
}

impl MonotonicClock {
    /// Anchor at the current wall time.
    pub fn new() -> Self {
        Self::anchored_at(Utc::now())
    }

    /// Anchor at an explicit wall time.
    pub fn anchored_at(wall_anchor: DateTime<Utc>) -> Self {
        Self {
            wall_anchor,
            mono_anchor: Instant::now(),
        }
    }

    /// Wrap into a shared handle.
    pub fn shared() -> SharedClock {
        Arc::new(Self::new())
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> DateTime<Utc> {
        let elapsed = Instant::now().saturating_duration_since(self.mono_anchor);
        match chrono::Duration::from_std(elapsed) {
            Ok(delta) => self.wall_anchor + delta,
            Err(_) => Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_follows_paused_runtime() {
        let anchor = DateTime::from_timestamp_millis(1_700_000_000_000).unwrap();
        let clock = MonotonicClock::anchored_at(anchor);
        assert_eq!(clock.now(), anchor);

        tokio::time::advance(Duration::from_millis(2_100)).await;
        assert_eq!((clock.now() - anchor).num_milliseconds(), 2_100);
    }
}
