//! Ledger events and their cryptographic seal.
//!
//! A ledger event records one governed action. Before it may be committed it
//! must be bound to passing governance gates, executed, and sealed. The seal
//! carries:
//!
//! - `digest`: Blake3 over the canonical event with `seal` excluded, taken in
//!   its sealed state (status `sealed`, no `committedAt`)
//! - `gateBinding`: Blake3 over the canonical gate list
//! - `signature`: keyed hash over `{digest, gateBinding, previousEventHash}`
//!
//! Committed events are chained by [`LedgerEvent::chain_hash`]. A committed
//! event is never edited; corrections are new compensating events.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

use crate::canonical::{canonical_hash, canonical_json_without};
use crate::crypto::{Blake3Hash, KeyedSignature};
use crate::error::CoreError;
use crate::key::SigningKey;
use crate::signing;

/// Schema version stamped on new events.
pub const LEDGER_EVENT_VERSION: &str = "1.0.0";

/// Lifecycle of a ledger event through the commit pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerEventStatus {
    Pending,
    Validated,
    Executed,
    Sealed,
    Committed,
    Rejected,
}

/// Outcome of a governance gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GateStatus {
    Pending,
    Pass,
    Fail,
    Waived,
}

/// An approval checkpoint bound to an event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GovernanceGate {
    pub gate_id: String,
    pub gate_name: String,
    pub status: GateStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub passed_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub waiver_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub waiver_approved_by: Option<String>,
}

impl GovernanceGate {
    pub fn passed(gate_id: impl Into<String>, gate_name: impl Into<String>, at: i64) -> Self {
        Self {
            gate_id: gate_id.into(),
            gate_name: gate_name.into(),
            status: GateStatus::Pass,
            passed_at: Some(at),
            waiver_reason: None,
            waiver_approved_by: None,
        }
    }

    pub fn waived(
        gate_id: impl Into<String>,
        gate_name: impl Into<String>,
        reason: impl Into<String>,
        approved_by: impl Into<String>,
    ) -> Self {
        Self {
            gate_id: gate_id.into(),
            gate_name: gate_name.into(),
            status: GateStatus::Waived,
            passed_at: None,
            waiver_reason: Some(reason.into()),
            waiver_approved_by: Some(approved_by.into()),
        }
    }

    /// A waiver with both a reason and an approver.
    pub fn is_documented_waiver(&self) -> bool {
        self.status == GateStatus::Waived
            && self.waiver_reason.as_deref().is_some_and(|r| !r.is_empty())
            && self.waiver_approved_by.as_deref().is_some_and(|a| !a.is_empty())
    }
}

/// What happened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventPayload {
    pub action: String,
    pub resource_type: String,
    pub resource_id: String,
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

/// One recorded change to a field before commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriftRecord {
    pub field_path: String,
    pub previous_value: Value,
    pub new_value: Value,
    pub changed_at: i64,
    pub changed_by: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub change_reason: Option<String>,
}

/// Cryptographic seal over an executed event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerSeal {
    pub algorithm: String,
    pub digest: Blake3Hash,
    pub gate_binding: Blake3Hash,
    pub signature: KeyedSignature,
    pub signed_by: String,
    pub signed_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_event_hash: Option<Blake3Hash>,
}

/// The message covered by a seal signature.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SealPayload<'a> {
    digest: &'a Blake3Hash,
    gate_binding: &'a Blake3Hash,
    previous_event_hash: Option<&'a Blake3Hash>,
}

/// A governed, sealable ledger event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerEvent {
    pub event_id: String,
    pub event_type: String,
    pub event_version: String,
    pub created_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validated_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub executed_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sealed_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub committed_at: Option<i64>,
    pub status: LedgerEventStatus,
    pub actor_id: String,
    pub tenant_id: String,
    pub payload: EventPayload,
    pub governance_gates: Vec<GovernanceGate>,
    #[serde(default)]
    pub drift_history: Vec<DriftRecord>,
    pub idempotency_key: String,
    pub correlation_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compensating_for: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seal: Option<LedgerSeal>,
}

impl LedgerEvent {
    /// Start a new pending event. Idempotency key defaults to the event id.
    pub fn new(
        event_type: impl Into<String>,
        actor_id: impl Into<String>,
        tenant_id: impl Into<String>,
        payload: EventPayload,
        correlation_id: impl Into<String>,
        now: i64,
    ) -> Self {
        let event_id = generate_event_id(now);
        Self {
            idempotency_key: event_id.clone(),
            event_id,
            event_type: event_type.into(),
            event_version: LEDGER_EVENT_VERSION.to_string(),
            created_at: now,
            validated_at: None,
            executed_at: None,
            sealed_at: None,
            committed_at: None,
            status: LedgerEventStatus::Pending,
            actor_id: actor_id.into(),
            tenant_id: tenant_id.into(),
            payload,
            governance_gates: Vec::new(),
            drift_history: Vec::new(),
            correlation_id: correlation_id.into(),
            compensating_for: None,
            seal: None,
        }
    }

    pub fn with_gate(mut self, gate: GovernanceGate) -> Self {
        self.governance_gates.push(gate);
        self
    }

    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = key.into();
        self
    }

    pub fn is_committed(&self) -> bool {
        self.status == LedgerEventStatus::Committed
    }

    /// Required identity, actor, tenant, payload and idempotency fields.
    pub fn atomicity_errors(&self) -> Vec<String> {
        let checks = [
            (self.event_id.is_empty(), "missing eventId"),
            (self.event_type.is_empty(), "missing eventType"),
            (self.created_at <= 0, "missing createdAt"),
            (self.actor_id.is_empty(), "missing actorId"),
            (self.tenant_id.is_empty(), "missing tenantId"),
            (self.payload.action.is_empty(), "missing payload.action"),
            (self.payload.resource_type.is_empty(), "missing payload.resourceType"),
            (self.payload.resource_id.is_empty(), "missing payload.resourceId"),
            (self.idempotency_key.is_empty(), "missing idempotencyKey"),
            (self.correlation_id.is_empty(), "missing correlationId"),
        ];
        checks
            .iter()
            .filter(|(failed, _)| *failed)
            .map(|(_, msg)| msg.to_string())
            .collect()
    }

    /// Governance binding problems.
    ///
    /// With `skip_governance`, a single documented waiver replaces the gate
    /// checks.
    pub fn governance_errors(&self, skip_governance: bool) -> Vec<String> {
        if skip_governance {
            if self.governance_gates.iter().any(GovernanceGate::is_documented_waiver) {
                return Vec::new();
            }
            return vec!["governance skip requires documented waiver".to_string()];
        }

        if self.governance_gates.is_empty() {
            return vec!["no governance gates bound to event".to_string()];
        }

        let mut errors = Vec::new();
        for gate in &self.governance_gates {
            if gate.gate_id.is_empty() {
                errors.push("gate missing gateId".to_string());
            }
            match gate.status {
                GateStatus::Pending => errors.push(format!("gate {} is unbound", gate.gate_id)),
                GateStatus::Fail => errors.push(format!("gate {} failed", gate.gate_id)),
                GateStatus::Waived if !gate.is_documented_waiver() => {
                    errors.push(format!("gate {} waived without documentation", gate.gate_id))
                }
                _ => {}
            }
        }
        errors
    }

    /// Append a drift annotation. Committed events refuse.
    pub fn record_drift(
        &mut self,
        field_path: impl Into<String>,
        previous_value: Value,
        new_value: Value,
        changed_by: impl Into<String>,
        change_reason: Option<String>,
        now: i64,
    ) -> Result<(), CoreError> {
        if self.is_committed() {
            return Err(CoreError::ImmutableEvent(self.event_id.clone()));
        }
        self.drift_history.push(DriftRecord {
            field_path: field_path.into(),
            previous_value,
            new_value,
            changed_at: now,
            changed_by: changed_by.into(),
            change_reason,
        });
        Ok(())
    }

    /// Hash binding the event to its gate decisions.
    pub fn gate_binding(&self) -> Result<Blake3Hash, CoreError> {
        canonical_hash(&self.governance_gates)
    }

    /// Digest of the event in its sealed state, excluding the seal itself.
    pub fn seal_digest(&self) -> Result<Blake3Hash, CoreError> {
        let mut sealed_form = self.clone();
        sealed_form.status = LedgerEventStatus::Sealed;
        sealed_form.committed_at = None;
        let canonical = canonical_json_without(&sealed_form, "seal")?;
        Ok(Blake3Hash::hash(canonical.as_bytes()))
    }

    /// Seal an executed event with `key`, linking it to `previous_event_hash`.
    pub fn seal_with(
        mut self,
        key: &SigningKey,
        previous_event_hash: Option<Blake3Hash>,
        now: i64,
    ) -> Result<Self, CoreError> {
        self.status = LedgerEventStatus::Sealed;
        self.sealed_at = Some(now);
        self.seal = None;

        let digest = self.seal_digest()?;
        let gate_binding = self.gate_binding()?;
        let signature = signing::sign(
            &SealPayload {
                digest: &digest,
                gate_binding: &gate_binding,
                previous_event_hash: previous_event_hash.as_ref(),
            },
            key,
        )?;

        self.seal = Some(LedgerSeal {
            algorithm: key.algorithm.clone(),
            digest,
            gate_binding,
            signature,
            signed_by: key.kid.clone(),
            signed_at: now,
            previous_event_hash,
        });
        Ok(self)
    }

    /// Re-derive the seal and check it against `key`.
    pub fn verify_seal(&self, key: &SigningKey) -> Result<(), SealFault> {
        let seal = self.seal.as_ref().ok_or(SealFault::Missing)?;
        if seal.signed_by != key.kid {
            return Err(SealFault::WrongSigner);
        }
        if self.seal_digest().map_err(|_| SealFault::Digest)? != seal.digest {
            return Err(SealFault::Digest);
        }
        if self.gate_binding().map_err(|_| SealFault::GateBinding)? != seal.gate_binding {
            return Err(SealFault::GateBinding);
        }
        let payload = SealPayload {
            digest: &seal.digest,
            gate_binding: &seal.gate_binding,
            previous_event_hash: seal.previous_event_hash.as_ref(),
        };
        if !signing::verify(&payload, &seal.signature.to_hex(), key) {
            return Err(SealFault::Signature);
        }
        Ok(())
    }

    /// Hash of the whole committed event, used as the next event's link.
    pub fn chain_hash(&self) -> Result<Blake3Hash, CoreError> {
        canonical_hash(self)
    }

    /// Build a pending compensating event for a committed one.
    ///
    /// Gates are cleared and must be re-approved before commit.
    pub fn compensate(
        &self,
        reason: impl Into<String>,
        actor_id: impl Into<String>,
        now: i64,
    ) -> Self {
        let mut metadata = self.payload.metadata.clone();
        metadata.insert("rollbackReason".into(), Value::String(reason.into()));
        metadata.insert("originalEventId".into(), Value::String(self.event_id.clone()));
        if let Some(at) = self.committed_at {
            metadata.insert("originalCommittedAt".into(), Value::from(at));
        }

        let event_id = format!("{}_rollback", self.event_id);
        Self {
            idempotency_key: event_id.clone(),
            event_id,
            event_type: format!("{}.rollback", self.event_type),
            event_version: self.event_version.clone(),
            created_at: now,
            validated_at: None,
            executed_at: None,
            sealed_at: None,
            committed_at: None,
            status: LedgerEventStatus::Pending,
            actor_id: actor_id.into(),
            tenant_id: self.tenant_id.clone(),
            payload: EventPayload {
                action: "rollback".into(),
                resource_type: self.payload.resource_type.clone(),
                resource_id: self.payload.resource_id.clone(),
                data: self.payload.data.clone(),
                metadata,
            },
            governance_gates: Vec::new(),
            drift_history: Vec::new(),
            correlation_id: self.correlation_id.clone(),
            compensating_for: Some(self.event_id.clone()),
            seal: None,
        }
    }
}

/// Which part of a seal failed to re-derive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SealFault {
    Missing,
    WrongSigner,
    Digest,
    GateBinding,
    Signature,
}

impl fmt::Display for SealFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SealFault::Missing => "missing seal",
            SealFault::WrongSigner => "seal signer does not match key",
            SealFault::Digest => "digest mismatch",
            SealFault::GateBinding => "gate binding mismatch",
            SealFault::Signature => "seal signature mismatch",
        };
        f.write_str(s)
    }
}

/// Generate an event id: `evt_{unix_ms}_{8 hex}`.
pub fn generate_event_id(now: i64) -> String {
    use rand::RngCore;
    let mut suffix = [0u8; 4];
    rand::thread_rng().fill_bytes(&mut suffix);
    format!("evt_{}_{}", now, hex::encode(suffix))
}
