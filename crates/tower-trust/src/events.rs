//! Event signing and admission.
//!
//! [`EventSigner`] produces signed, chainable events with the registry's
//! active key. [`EventGate`] is the consuming side: it verifies an event and
//! records its signature as a nonce so the same event is admitted once.
//!
//! Each verified timestamp is also sampled into the clock-skew average. An
//! event signed just before a rotation still verifies against the retired key
//! while it is younger than the maximum event age.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};

use tower_trust_core::{
    Clock, EventVerifier, EventVerifyError, SignedEvent, SigningKey, VerifyOptions,
};
use tower_trust_store::{HealthStore, KeyStore, NonceStore};

use crate::error::{Result, TowerError};
use crate::health::ClockSkewTracker;
use crate::nonce::{contexts, NonceGuard};
use crate::registry::KeyRegistry;

/// Signs events as this node.
pub struct EventSigner<S> {
    registry: Arc<KeyRegistry<S>>,
    clock: Arc<dyn Clock>,
    node_id: String,
}

impl<S: KeyStore> EventSigner<S> {
    pub fn new(
        registry: Arc<KeyRegistry<S>>,
        clock: Arc<dyn Clock>,
        node_id: impl Into<String>,
    ) -> Self {
        Self {
            registry,
            clock,
            node_id: node_id.into(),
        }
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// Sign an event stamped with the current time.
    pub async fn sign(
        &self,
        event_type: &str,
        payload: Value,
        prev_signature: Option<String>,
    ) -> Result<SignedEvent> {
        let key = self.registry.get_active_key().await?;
        let event = SignedEvent::sign(
            event_type,
            payload,
            prev_signature,
            self.node_id.clone(),
            self.clock.now_millis(),
            &key,
        )?;
        debug!(event_type = %event.event_type, kid = %key.kid, "event signed");
        Ok(event)
    }

    /// Sign an event linked to `prev`.
    pub async fn sign_chain_next(
        &self,
        event_type: &str,
        payload: Value,
        prev: &SignedEvent,
    ) -> Result<SignedEvent> {
        self.sign(event_type, payload, Some(prev.signature.clone()))
            .await
    }
}

/// Verifies incoming events and admits each at most once.
pub struct EventGate<S> {
    registry: Arc<KeyRegistry<S>>,
    nonces: Arc<NonceGuard<S>>,
    skew: Arc<ClockSkewTracker<S>>,
    clock: Arc<dyn Clock>,
    options: VerifyOptions,
}

impl<S: KeyStore + NonceStore + HealthStore> EventGate<S> {
    pub fn new(
        registry: Arc<KeyRegistry<S>>,
        nonces: Arc<NonceGuard<S>>,
        skew: Arc<ClockSkewTracker<S>>,
        clock: Arc<dyn Clock>,
        options: VerifyOptions,
    ) -> Self {
        Self {
            registry,
            nonces,
            skew,
            clock,
            options,
        }
    }

    pub fn options(&self) -> &VerifyOptions {
        &self.options
    }

    /// Verify one event against the active key.
    ///
    /// On a signature mismatch the most recently rotated key is tried too, if
    /// it was retired within the maximum event age.
    pub async fn verify(&self, event: &SignedEvent) -> Result<()> {
        self.skew.observe_timestamp(event.timestamp).await?;

        let key = self.registry.get_active_key().await?;
        let now = self.clock.now_millis();
        let result = match self.check(event, &key, now) {
            Err(EventVerifyError::SignatureMismatch) => {
                let since = now.saturating_sub(self.options.max_age_ms);
                match self.registry.recently_rotated(since).await? {
                    Some(previous) => {
                        let result = self.check(event, &previous, now);
                        if result.is_ok() {
                            debug!(
                                kid = %previous.kid,
                                node_id = %event.node_id,
                                "event verified with rotated key"
                            );
                        }
                        result
                    }
                    None => Err(EventVerifyError::SignatureMismatch),
                }
            }
            other => other,
        };
        result.map_err(|e| self.reject(event, e))
    }

    /// Verify one event against an explicit shared key.
    pub fn verify_with(&self, event: &SignedEvent, key: &SigningKey) -> Result<()> {
        self.check(event, key, self.clock.now_millis())
            .map_err(|e| self.reject(event, e))
    }

    fn check(
        &self,
        event: &SignedEvent,
        key: &SigningKey,
        now: i64,
    ) -> std::result::Result<(), EventVerifyError> {
        EventVerifier::new(key, self.options.clone()).verify(event, now)
    }

    fn reject(&self, event: &SignedEvent, e: EventVerifyError) -> TowerError {
        warn!(
            node_id = %event.node_id,
            event_type = %event.event_type,
            drift_ms = ?e.drift_ms(),
            reason = %e,
            "event rejected"
        );
        TowerError::from(e)
    }

    /// The current clock-skew average.
    pub fn skew(&self) -> &ClockSkewTracker<S> {
        &self.skew
    }

    /// Verify a chain of events against the active key.
    pub async fn verify_chain(&self, events: &[SignedEvent]) -> Result<()> {
        let key = self.registry.get_active_key().await?;
        EventVerifier::new(&key, self.options.clone())
            .verify_chain(events, self.clock.now_millis())
            .map_err(|e| {
                warn!(index = e.index(), reason = %e, "event chain rejected");
                TowerError::from(e)
            })
    }

    /// Verify, then admit the event once within its maximum age.
    pub async fn accept(&self, event: &SignedEvent) -> Result<()> {
        self.verify(event).await?;

        let ttl = std::time::Duration::from_millis(self.options.max_age_ms.max(0) as u64);
        if !self
            .nonces
            .record_with_ttl(contexts::FEDERATION_SYNC, &event.signature, ttl)
            .await?
        {
            return Err(TowerError::Replay {
                nonce: event.signature.clone(),
            });
        }
        Ok(())
    }
}
