//! Quota interpretation and cancellable waits

use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use crate::types::QuotaInfo;

/// Sleep once fewer than this many calls remain
pub const DEFAULT_QUOTA_FLOOR: i64 = 250;

/// Extra wait past the advertised reset time
pub const DEFAULT_RESET_BUFFER: Duration = Duration::from_secs(10);

/// When a worker must pause for its credential's quota to reset
#[derive(Clone, Copy, Debug)]
pub struct RateLimitPolicy {
    pub floor: i64,
    pub buffer: Duration,
}

impl Default for RateLimitPolicy {
    fn default() -> Self {
        Self {
            floor: DEFAULT_QUOTA_FLOOR,
            buffer: DEFAULT_RESET_BUFFER,
        }
    }
}

impl RateLimitPolicy {
    /// Wait required after a response carrying `quota`, or `None` above the floor
    pub fn sleep_for(&self, quota: &QuotaInfo, now: DateTime<Utc>) -> Option<Duration> {
        if quota.remaining >= self.floor {
            return None;
        }
        Some(self.until_reset(quota, now))
    }

    /// Time from `now` until `reset_at + buffer`, clamped at zero.
    ///
    /// Rounded up to whole seconds: reset times are second-granular and a
    /// wait that ends a few microseconds early would still see the old window.
    pub fn until_reset(&self, quota: &QuotaInfo, now: DateTime<Utc>) -> Duration {
        let buffer_ms = i64::try_from(self.buffer.as_millis()).unwrap_or(i64::MAX);
        let wait_ms = (quota.reset_at - now)
            .num_milliseconds()
            .saturating_add(buffer_ms);
        if wait_ms <= 0 {
            return Duration::ZERO;
        }
        let secs = (wait_ms as u64).div_ceil(1000);
        Duration::from_secs(secs)
    }
}

/// Sleep for `duration` unless `cancel` fires first.
///
/// Returns `true` when the full duration elapsed.
pub async fn sleep_cancellable(duration: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}
