//! Replay protection.
//!
//! [`NonceGuard`] gives at-most-once acceptance of a value within its TTL.
//! Uniqueness is decided by the store in a single atomic statement; the guard
//! never reads before it writes.
//!
//! Every nonce lives in a context (see [`contexts`]). The same value recorded
//! in two contexts is two distinct nonces.
//!
//! Expiry is absence: an expired nonce is not reported by [`NonceGuard::seen`]
//! and may be recorded again even before a prune removes it.
//!
//! Opportunistic pruning is gated on the prune time persisted by the store,
//! so a restarted process picks up where the previous one left off.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use tower_trust_core::Clock;
use tower_trust_store::{NonceStats, NonceStore};

use crate::config::{duration_ms, TowerConfig};
use crate::error::Result;

/// Well-known nonce contexts.
pub mod contexts {
    /// Signed events admitted from federation peers.
    pub const FEDERATION_SYNC: &str = "federation_sync";
    /// Governance acknowledgements.
    pub const GOVERNANCE_ACK: &str = "governance_ack";
}

/// Replay guard over a [`NonceStore`].
pub struct NonceGuard<S> {
    store: Arc<S>,
    clock: Arc<dyn Clock>,
    default_ttl: Duration,
    prune_interval: Duration,
}

impl<S: NonceStore> NonceGuard<S> {
    pub fn new(store: Arc<S>, clock: Arc<dyn Clock>, config: &TowerConfig) -> Self {
        Self {
            store,
            clock,
            default_ttl: config.nonce_ttl,
            prune_interval: config.prune_interval,
        }
    }

    /// Whether `nonce` is currently recorded and unexpired in `context`.
    pub async fn seen(&self, context: &str, nonce: &str) -> Result<bool> {
        Ok(self
            .store
            .nonce_active(context, nonce, self.clock.now_millis())
            .await?)
    }

    /// Record `nonce` in `context` with the default TTL.
    ///
    /// Returns `false` if it is already recorded and unexpired there.
    pub async fn record(&self, context: &str, nonce: &str) -> Result<bool> {
        self.record_with_ttl(context, nonce, self.default_ttl).await
    }

    /// Record `nonce` in `context` for `ttl`.
    pub async fn record_with_ttl(
        &self,
        context: &str,
        nonce: &str,
        ttl: Duration,
    ) -> Result<bool> {
        let now = self.clock.now_millis();
        self.maybe_prune(now).await?;

        let expires_at = now.saturating_add(duration_ms(ttl));
        let accepted = self.store.insert_nonce(context, nonce, expires_at, now).await?;
        if !accepted {
            warn!(context = %context, nonce = %nonce, "replay rejected");
        }
        Ok(accepted)
    }

    /// Delete every expired nonce. Returns how many were removed.
    pub async fn prune(&self) -> Result<u64> {
        let now = self.clock.now_millis();
        let removed = self.store.prune_nonces(now).await?;
        debug!(removed, "nonces pruned");
        Ok(removed)
    }

    pub async fn stats(&self) -> Result<NonceStats> {
        Ok(self.store.nonce_stats(self.clock.now_millis()).await?)
    }

    async fn maybe_prune(&self, now: i64) -> Result<()> {
        let due = match self.store.last_prune_at().await? {
            Some(last) => now - last >= duration_ms(self.prune_interval),
            None => true,
        };
        if due {
            self.prune().await?;
        }
        Ok(())
    }
}
