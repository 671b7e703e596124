//! Clock abstraction.
//!
//! All timestamps are Unix milliseconds. Services take an `Arc<dyn Clock>` so
//! expiry, rotation and latency logic can be driven deterministically.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicI64, Ordering};

/// Milliseconds in one second.
pub const MILLIS_PER_SECOND: i64 = 1_000;

/// Milliseconds in one day.
pub const MILLIS_PER_DAY: i64 = 86_400_000;

/// A source of the current time.
pub trait Clock: Send + Sync + 'static {
    /// Current time in Unix milliseconds.
    fn now_millis(&self) -> i64;
}

/// Wall-clock time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        now_millis()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    /// Create a clock frozen at `start` (Unix ms).
    pub fn new(start: i64) -> Self {
        Self {
            now: AtomicI64::new(start),
        }
    }

    /// Set the current time.
    pub fn set(&self, millis: i64) {
        self.now.store(millis, Ordering::SeqCst);
    }

    /// Move the clock forward by `millis`.
    pub fn advance(&self, millis: i64) {
        self.now.fetch_add(millis, Ordering::SeqCst);
    }

    /// Move the clock forward by whole seconds.
    pub fn advance_secs(&self, secs: i64) {
        self.advance(secs * MILLIS_PER_SECOND);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// Get current time in milliseconds.
pub fn now_millis() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Weight of the newest sample in the clock-skew moving average.
pub const SKEW_EMA_ALPHA: f64 = 0.3;

/// Absolute skew at which the clock is reported as drifting.
pub const SKEW_WARN_MS: i64 = 30_000;

/// Absolute skew at which the clock is reported as failing.
pub const SKEW_FAIL_MS: i64 = 90_000;

/// Exponential moving average of observed peer clock skew.
///
/// A sample is `peer_timestamp - local_now`: positive when the peer runs
/// ahead, negative when it lags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClockSkew {
    pub skew_ms: i64,
    pub samples: u64,
    pub updated_at: Option<i64>,
}

/// Health of the observed skew.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SkewStatus {
    Ok,
    Warn,
    Fail,
}

impl ClockSkew {
    /// Fold one sample into the average. The first sample is taken as is.
    pub fn observe(self, sample_ms: i64, now: i64) -> Self {
        let skew_ms = if self.samples == 0 {
            sample_ms
        } else {
            let blended =
                self.skew_ms as f64 * (1.0 - SKEW_EMA_ALPHA) + sample_ms as f64 * SKEW_EMA_ALPHA;
            blended.round() as i64
        };
        Self {
            skew_ms,
            samples: self.samples.saturating_add(1),
            updated_at: Some(now),
        }
    }

    pub fn status(&self) -> SkewStatus {
        let abs = self.skew_ms.unsigned_abs();
        if abs >= SKEW_FAIL_MS as u64 {
            SkewStatus::Fail
        } else if abs >= SKEW_WARN_MS as u64 {
            SkewStatus::Warn
        } else {
            SkewStatus::Ok
        }
    }
}
