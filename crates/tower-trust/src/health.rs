//! Health and SLO snapshot.
//!
//! Also owns the clock-skew tracker: every verified peer timestamp feeds an
//! exponential moving average that is persisted in the store and surfaced in
//! the snapshot.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use tower_trust_core::{
    Clock, ClockSkew, ReceiptStatus, RotationStatus, SkewStatus, TowerReceipt,
};
use tower_trust_store::{HealthStore, NonceStats};

use crate::error::Result;

/// Persisted moving average of peer clock skew.
pub struct ClockSkewTracker<S> {
    store: Arc<S>,
    clock: Arc<dyn Clock>,
    /// Serializes load, fold and save.
    lock: Mutex<()>,
}

impl<S: HealthStore> ClockSkewTracker<S> {
    pub fn new(store: Arc<S>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            lock: Mutex::new(()),
        }
    }

    /// Fold a peer timestamp into the average.
    pub async fn observe_timestamp(&self, peer_timestamp: i64) -> Result<ClockSkew> {
        let now = self.clock.now_millis();
        self.observe(peer_timestamp.saturating_sub(now)).await
    }

    /// Fold one skew sample into the average and persist it.
    pub async fn observe(&self, sample_ms: i64) -> Result<ClockSkew> {
        let _guard = self.lock.lock().await;

        let now = self.clock.now_millis();
        let skew = self
            .store
            .clock_skew()
            .await?
            .unwrap_or_default()
            .observe(sample_ms, now);
        self.store.save_clock_skew(&skew).await?;

        match skew.status() {
            SkewStatus::Ok => debug!(sample_ms, skew_ms = skew.skew_ms, "clock skew sampled"),
            status => warn!(
                sample_ms,
                skew_ms = skew.skew_ms,
                status = ?status,
                "peer clock skew high"
            ),
        }
        Ok(skew)
    }

    /// The current average. Zero before any sample.
    pub async fn current(&self) -> Result<ClockSkew> {
        Ok(self.store.clock_skew().await?.unwrap_or_default())
    }
}

/// Point-in-time operational view of a Tower.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthSnapshot {
    pub generated_at: i64,
    pub ack_latency: LatencySummary,
    pub receipts: ReceiptCounts,
    pub nonces: NonceStats,
    /// Rotation status of the active key, if there is one.
    pub key_rotation: Option<RotationStatus>,
    pub clock_skew: SkewSummary,
    pub panic_mode: PanicMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SkewSummary {
    pub skew_ms: i64,
    pub samples: u64,
    pub updated_at: Option<i64>,
    pub status: SkewStatus,
}

impl From<ClockSkew> for SkewSummary {
    fn from(skew: ClockSkew) -> Self {
        Self {
            skew_ms: skew.skew_ms,
            samples: skew.samples,
            updated_at: skew.updated_at,
            status: skew.status(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LatencySummary {
    pub p50_ms: i64,
    pub p95_ms: i64,
    pub samples: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiptCounts {
    pub window: usize,
    pub received: usize,
    pub verified: usize,
    pub rejected: usize,
    pub error_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PanicMode {
    pub active: bool,
    pub triggers: Vec<String>,
}

/// Nearest-rank percentile of an ascending slice. Zero when empty.
pub fn percentile(sorted: &[i64], p: f64) -> i64 {
    if sorted.is_empty() {
        return 0;
    }
    let rank = ((p / 100.0) * sorted.len() as f64).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}

/// Build a snapshot from the recent receipt window and current key state.
pub fn snapshot(
    recent: &[TowerReceipt],
    nonces: NonceStats,
    key_rotation: Option<RotationStatus>,
    clock_skew: ClockSkew,
    panic_error_rate: f64,
    now: i64,
) -> HealthSnapshot {
    let mut latencies: Vec<i64> = recent
        .iter()
        .filter(|r| r.status == ReceiptStatus::Verified)
        .filter_map(TowerReceipt::ack_latency_ms)
        .collect();
    latencies.sort_unstable();

    let count = |status: ReceiptStatus| recent.iter().filter(|r| r.status == status).count();
    let rejected = count(ReceiptStatus::Rejected);
    let error_rate = if recent.is_empty() {
        0.0
    } else {
        rejected as f64 / recent.len() as f64
    };

    let mut triggers = Vec::new();
    if error_rate > panic_error_rate {
        triggers.push("error_rate".to_string());
    }
    if let Some(rotation) = &key_rotation {
        if rotation.urgency.is_alarming() {
            triggers.push(format!("key_rotation:{}", rotation.kid));
        }
    }
    let clock_skew = SkewSummary::from(clock_skew);
    if clock_skew.status == SkewStatus::Fail {
        triggers.push("clock_skew".to_string());
    }

    HealthSnapshot {
        generated_at: now,
        ack_latency: LatencySummary {
            p50_ms: percentile(&latencies, 50.0),
            p95_ms: percentile(&latencies, 95.0),
            samples: latencies.len(),
        },
        receipts: ReceiptCounts {
            window: recent.len(),
            received: count(ReceiptStatus::Received),
            verified: count(ReceiptStatus::Verified),
            rejected,
            error_rate,
        },
        nonces,
        key_rotation,
        clock_skew,
        panic_mode: PanicMode {
            active: !triggers.is_empty(),
            triggers,
        },
    }
}
