use chrono::{DateTime, Utc};
use tokio::time::Instant;

use crate::Clock;

/// Wall-clock time derived from the tokio monotonic clock.
///
/// The wall time is read once at anchoring; afterwards time only moves with
/// the runtime's clock, so system clock jumps do not leak into elapsed time
/// and paused-time tests stay deterministic.
#[derive(Debug, Clone, Copy)]
pub struct SessionClock {
    wall: DateTime<Utc>,
    origin: Instant,
}

impl SessionClock {
    #[must_use]
    pub fn anchored(clock: &Clock) -> Self {
        Self {
            wall: clock.now(),
            origin: Instant::now(),
        }
    }

    #[must_use]
    pub fn now(&self) -> DateTime<Utc> {
        let elapsed = Instant::now().saturating_duration_since(self.origin);
        self.wall
            + chrono::Duration::from_std(elapsed).unwrap_or_else(|_| chrono::Duration::zero())
    }

    /// Converts a wall-clock deadline into a delay from now, zero if already past.
    #[must_use]
    pub fn until(&self, deadline: DateTime<Utc>) -> std::time::Duration {
        (deadline - self.now()).to_std().unwrap_or_default()
    }
}
