//! Signed, hash-chained events.
//!
//! An event's signature is a keyed hash over the canonical JSON of
//! `{nodeId, payload, prevSignature, timestamp, type}`. An absent
//! `prevSignature` canonicalizes to `null`. A chain is valid when every
//! event verifies on its own and each `prevSignature` equals the signature
//! of the event before it in timestamp order.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::crypto::KeyedSignature;
use crate::error::CoreError;
use crate::key::SigningKey;
use crate::signing;
use crate::time::MILLIS_PER_SECOND;

/// Default maximum event age.
pub const DEFAULT_MAX_AGE_MS: i64 = 300 * MILLIS_PER_SECOND;

/// Default tolerated clock skew for events from the future.
pub const DEFAULT_FUTURE_SKEW_MS: i64 = 60 * MILLIS_PER_SECOND;

/// A signed event as exchanged between nodes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    pub timestamp: i64,
    pub payload: Value,
    pub signature: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prev_signature: Option<String>,
    pub node_id: String,
}

/// The fields covered by an event signature.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct EventBody<'a> {
    node_id: &'a str,
    payload: &'a Value,
    prev_signature: Option<&'a str>,
    timestamp: i64,
    #[serde(rename = "type")]
    event_type: &'a str,
}

impl SignedEvent {
    /// Build and sign an event.
    pub fn sign(
        event_type: impl Into<String>,
        payload: Value,
        prev_signature: Option<String>,
        node_id: impl Into<String>,
        timestamp: i64,
        key: &SigningKey,
    ) -> Result<Self, CoreError> {
        let mut event = Self {
            event_type: event_type.into(),
            timestamp,
            payload,
            signature: String::new(),
            prev_signature,
            node_id: node_id.into(),
        };
        event.signature = signing::sign(&event.body(), key)?.to_hex();
        Ok(event)
    }

    fn body(&self) -> EventBody<'_> {
        EventBody {
            node_id: &self.node_id,
            payload: &self.payload,
            prev_signature: self.prev_signature.as_deref(),
            timestamp: self.timestamp,
            event_type: &self.event_type,
        }
    }

    /// Whether the signature matches the event body under `key`.
    pub fn signature_matches(&self, key: &SigningKey) -> bool {
        signing::verify(&self.body(), &self.signature, key)
    }

    /// Parsed signature bytes, if well formed.
    pub fn signature_bytes(&self) -> Option<KeyedSignature> {
        KeyedSignature::from_hex(&self.signature).ok()
    }
}

/// Why a single event failed verification.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EventVerifyError {
    #[error("node_not_allowed")]
    NodeNotAllowed { node_id: String },

    #[error("timestamp_expired")]
    TimestampExpired { drift_ms: i64 },

    #[error("timestamp_future")]
    TimestampFuture { drift_ms: i64 },

    #[error("signature_mismatch")]
    SignatureMismatch,
}

impl EventVerifyError {
    /// Clock drift carried by the time-based failures.
    pub fn drift_ms(&self) -> Option<i64> {
        match self {
            EventVerifyError::TimestampExpired { drift_ms }
            | EventVerifyError::TimestampFuture { drift_ms } => Some(*drift_ms),
            _ => None,
        }
    }
}

/// Why a chain of events failed verification.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChainError {
    #[error("chain_break_at_{index}: {source}")]
    ChainBreak {
        index: usize,
        source: EventVerifyError,
    },

    #[error("lineage_break_at_{index}: prev_signature mismatch")]
    LineageBreak { index: usize },
}

impl ChainError {
    /// Index of the failing event after timestamp ordering.
    pub fn index(&self) -> usize {
        match self {
            ChainError::ChainBreak { index, .. } | ChainError::LineageBreak { index } => *index,
        }
    }
}

/// Verification options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifyOptions {
    pub max_age_ms: i64,
    pub future_skew_ms: i64,
    /// When set, only these node ids are accepted.
    pub allowed_nodes: Option<Vec<String>>,
}

impl Default for VerifyOptions {
    fn default() -> Self {
        Self {
            max_age_ms: DEFAULT_MAX_AGE_MS,
            future_skew_ms: DEFAULT_FUTURE_SKEW_MS,
            allowed_nodes: None,
        }
    }
}

/// Verifies events against one shared key.
pub struct EventVerifier<'a> {
    key: &'a SigningKey,
    options: VerifyOptions,
}

impl<'a> EventVerifier<'a> {
    pub fn new(key: &'a SigningKey, options: VerifyOptions) -> Self {
        Self { key, options }
    }

    pub fn options(&self) -> &VerifyOptions {
        &self.options
    }

    /// Verify one event at time `now`.
    ///
    /// Checks run in order: node allowlist, age, future skew, signature.
    pub fn verify(&self, event: &SignedEvent, now: i64) -> Result<(), EventVerifyError> {
        if let Some(allowed) = &self.options.allowed_nodes {
            if !allowed.iter().any(|n| n == &event.node_id) {
                return Err(EventVerifyError::NodeNotAllowed {
                    node_id: event.node_id.clone(),
                });
            }
        }

        let age = now - event.timestamp;
        if age > self.options.max_age_ms {
            return Err(EventVerifyError::TimestampExpired { drift_ms: age });
        }

        if event.timestamp > now + self.options.future_skew_ms {
            return Err(EventVerifyError::TimestampFuture { drift_ms: -age });
        }

        if !event.signature_matches(self.key) {
            return Err(EventVerifyError::SignatureMismatch);
        }

        Ok(())
    }

    /// Verify a chain of events.
    ///
    /// Events are stably sorted by timestamp first. An empty chain is valid.
    /// Each link is checked before the event's own signature, so a tampered
    /// `prevSignature` reports as a lineage break at its own index.
    pub fn verify_chain(&self, events: &[SignedEvent], now: i64) -> Result<(), ChainError> {
        let mut sorted: Vec<&SignedEvent> = events.iter().collect();
        sorted.sort_by_key(|e| e.timestamp);

        for (index, event) in sorted.iter().enumerate() {
            if index > 0 {
                let prev = sorted[index - 1];
                if event.prev_signature.as_deref() != Some(prev.signature.as_str()) {
                    return Err(ChainError::LineageBreak { index });
                }
            }
            self.verify(event, now)
                .map_err(|source| ChainError::ChainBreak { index, source })?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const NOW: i64 = 1_700_000_000_000;

    fn key() -> SigningKey {
        SigningKey::generate("shared", 90, 0)
    }

    fn chain(key: &SigningKey, n: usize) -> Vec<SignedEvent> {
        let mut out: Vec<SignedEvent> = Vec::new();
        for i in 0..n {
            let prev = out.last().map(|e| e.signature.clone());
            let ts = NOW + i as i64;
            let e = SignedEvent::sign("proof.signed", json!({"i": i}), prev, "atlas", ts, key);
            out.push(e.unwrap());
        }
        out
    }

    #[test]
    fn test_fresh_event_verifies() {
        let key = key();
        let e = SignedEvent::sign("t", json!({"a": 1}), None, "atlas", NOW, &key).unwrap();
        let verifier = EventVerifier::new(&key, VerifyOptions::default());
        assert_eq!(verifier.verify(&e, NOW + 1_000), Ok(()));
    }

    #[test]
    fn test_wire_format_camel_case() {
        let key = key();
        let e = SignedEvent::sign("t", json!({}), Some("ab".into()), "atlas", NOW, &key).unwrap();
        let v = serde_json::to_value(&e).unwrap();
        assert_eq!(v["type"], "t");
        assert_eq!(v["nodeId"], "atlas");
        assert_eq!(v["prevSignature"], "ab");
    }

    #[test]
    fn test_node_not_allowed_checked_first() {
        let key = key();
        let e = SignedEvent::sign("t", json!({}), None, "rogue", NOW - 10_000_000, &key).unwrap();
        let verifier = EventVerifier::new(
            &key,
            VerifyOptions {
                allowed_nodes: Some(vec!["atlas".into()]),
                ..Default::default()
            },
        );
        assert!(matches!(
            verifier.verify(&e, NOW),
            Err(EventVerifyError::NodeNotAllowed { .. })
        ));
    }

    #[test]
    fn test_expired_and_future() {
        let key = key();
        let verifier = EventVerifier::new(&key, VerifyOptions::default());

        let old = SignedEvent::sign("t", json!({}), None, "atlas", NOW - 301_000, &key).unwrap();
        let err = verifier.verify(&old, NOW).unwrap_err();
        assert_eq!(err, EventVerifyError::TimestampExpired { drift_ms: 301_000 });

        let future = SignedEvent::sign("t", json!({}), None, "atlas", NOW + 61_000, &key).unwrap();
        let err = verifier.verify(&future, NOW).unwrap_err();
        assert_eq!(err.drift_ms(), Some(61_000));

        let within_skew = SignedEvent::sign("t", json!({}), None, "atlas", NOW + 59_000, &key).unwrap();
        assert!(verifier.verify(&within_skew, NOW).is_ok());
    }

    #[test]
    fn test_tampered_payload_mismatch() {
        let key = key();
        let mut e = SignedEvent::sign("t", json!({"amount": 1}), None, "atlas", NOW, &key).unwrap();
        e.payload = json!({"amount": 100});
        let verifier = EventVerifier::new(&key, VerifyOptions::default());
        assert_eq!(verifier.verify(&e, NOW), Err(EventVerifyError::SignatureMismatch));
    }

    #[test]
    fn test_wrong_key_mismatch() {
        let e = SignedEvent::sign("t", json!({}), None, "atlas", NOW, &key()).unwrap();
        let other = key();
        let verifier = EventVerifier::new(&other, VerifyOptions::default());
        assert_eq!(verifier.verify(&e, NOW), Err(EventVerifyError::SignatureMismatch));
    }

    #[test]
    fn test_chain_valid_regardless_of_input_order() {
        let key = key();
        let mut events = chain(&key, 3);
        events.reverse();
        let verifier = EventVerifier::new(&key, VerifyOptions::default());
        assert_eq!(verifier.verify_chain(&events, NOW + 10), Ok(()));
    }

    #[test]
    fn test_empty_chain_valid() {
        let key = key();
        let verifier = EventVerifier::new(&key, VerifyOptions::default());
        assert_eq!(verifier.verify_chain(&[], NOW), Ok(()));
    }

    #[test]
    fn test_corrupted_middle_link_is_lineage_break_at_1() {
        let key = key();
        let mut events = chain(&key, 3);
        events[1].prev_signature = Some("00".repeat(32));
        let verifier = EventVerifier::new(&key, VerifyOptions::default());
        let err = verifier.verify_chain(&events, NOW + 10).unwrap_err();
        assert_eq!(err, ChainError::LineageBreak { index: 1 });
        assert_eq!(err.to_string(), "lineage_break_at_1: prev_signature mismatch");
    }

    #[test]
    fn test_chain_break_reports_reason() {
        let key = key();
        let mut events = chain(&key, 3);
        events[0].payload = json!({"i": 99});
        let verifier = EventVerifier::new(&key, VerifyOptions::default());
        let err = verifier.verify_chain(&events, NOW + 10).unwrap_err();
        assert_eq!(err.index(), 0);
        assert_eq!(err.to_string(), "chain_break_at_0: signature_mismatch");
    }
}
