//! Ledger commit pipeline.
//!
//! Every event goes through four hard gates:
//!
//! 1. **validate** - required fields, tenant, governance gates, not already
//!    committed
//! 2. **execute** - the caller's side effect via [`LedgerExecutor`]
//! 3. **seal** - digest, gate binding and signature linked to the chain head
//! 4. **commit** - one atomic append that re-checks the chain head
//!
//! A failure at any stage returns a [`CommitError`] naming the stage and
//! nothing is written. Committed events are immutable; corrections are
//! compensating events that go through the same pipeline.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{error, info, warn};

use tower_trust_core::{Blake3Hash, Clock, IntegrityError, LedgerEvent, LedgerEventStatus};
use tower_trust_store::{AppendResult, KeyStore, LedgerStore, StoreError};

use crate::error::{Result, TowerError};
use crate::registry::KeyRegistry;

/// Pipeline stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CommitStage {
    Validate,
    Execute,
    Seal,
    Commit,
}

impl fmt::Display for CommitStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CommitStage::Validate => "validate",
            CommitStage::Execute => "execute",
            CommitStage::Seal => "seal",
            CommitStage::Commit => "commit",
        };
        f.write_str(s)
    }
}

/// A commit aborted at `stage`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("ledger commit failed at {stage}: {reason}")]
pub struct CommitError {
    pub stage: CommitStage,
    pub reason: String,
}

impl CommitError {
    pub fn new(stage: CommitStage, reason: impl Into<String>) -> Self {
        Self {
            stage,
            reason: reason.into(),
        }
    }

    fn storage(stage: CommitStage, e: StoreError) -> Self {
        error!(stage = %stage, error = %e, "ledger storage failure");
        Self::new(stage, "storage unavailable")
    }
}

/// Applies an event's side effect.
///
/// The returned value is recorded on the event as
/// `payload.metadata.executionResult` before it is sealed.
#[async_trait]
pub trait LedgerExecutor: Send + Sync {
    async fn execute(&self, event: &LedgerEvent) -> std::result::Result<Value, String>;
}

/// Executor with no side effect.
pub struct NoopExecutor;

#[async_trait]
impl LedgerExecutor for NoopExecutor {
    async fn execute(&self, _event: &LedgerEvent) -> std::result::Result<Value, String> {
        Ok(Value::Null)
    }
}

/// Per-commit switches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommitOptions {
    /// Accept a documented waiver in place of passing gates.
    pub skip_governance: bool,
    /// Stop after validation.
    pub dry_run: bool,
}

/// Result of [`LedgerCommitter::commit`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitOutcome {
    /// Validation passed; nothing executed or written.
    DryRun(LedgerEvent),
    Committed {
        seq: u64,
        hash: Blake3Hash,
        event: LedgerEvent,
    },
}

/// Result of [`LedgerCommitter::verify_ledger`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LedgerReport {
    pub events: usize,
    pub head: Option<Blake3Hash>,
}

/// Runs the commit pipeline against one tenant's ledger.
pub struct LedgerCommitter<S> {
    store: Arc<S>,
    registry: Arc<KeyRegistry<S>>,
    clock: Arc<dyn Clock>,
    executor: Arc<dyn LedgerExecutor>,
    tenant_id: String,
}

impl<S: KeyStore + LedgerStore> LedgerCommitter<S> {
    pub fn new(
        store: Arc<S>,
        registry: Arc<KeyRegistry<S>>,
        clock: Arc<dyn Clock>,
        executor: Arc<dyn LedgerExecutor>,
        tenant_id: impl Into<String>,
    ) -> Self {
        Self {
            store,
            registry,
            clock,
            executor,
            tenant_id: tenant_id.into(),
        }
    }

    pub fn tenant_id(&self) -> &str {
        &self.tenant_id
    }

    /// Run `event` through validate, execute, seal and commit.
    pub async fn commit(
        &self,
        event: LedgerEvent,
        options: CommitOptions,
    ) -> std::result::Result<CommitOutcome, CommitError> {
        let event_id = event.event_id.clone();
        let result = self.run_pipeline(event, options).await;
        if let Err(e) = &result {
            warn!(event_id = %event_id, stage = %e.stage, reason = %e.reason, "ledger commit aborted");
        }
        result
    }

    async fn run_pipeline(
        &self,
        mut event: LedgerEvent,
        options: CommitOptions,
    ) -> std::result::Result<CommitOutcome, CommitError> {
        // validate
        self.validate(&event, options).await?;
        event.status = LedgerEventStatus::Validated;
        event.validated_at = Some(self.clock.now_millis());
        if options.dry_run {
            return Ok(CommitOutcome::DryRun(event));
        }

        // execute
        let result = self
            .executor
            .execute(&event)
            .await
            .map_err(|reason| CommitError::new(CommitStage::Execute, reason))?;
        event
            .payload
            .metadata
            .insert("executionResult".to_string(), result);
        event.status = LedgerEventStatus::Executed;
        event.executed_at = Some(self.clock.now_millis());

        // seal
        let previous = self
            .store
            .ledger_head()
            .await
            .map_err(|e| CommitError::storage(CommitStage::Seal, e))?
            .map(|(_, hash)| hash);
        let key = self
            .registry
            .get_active_key()
            .await
            .map_err(|e| CommitError::new(CommitStage::Seal, e.public_message()))?;
        let mut event = event
            .seal_with(&key, previous, self.clock.now_millis())
            .map_err(|e| CommitError::new(CommitStage::Seal, e.to_string()))?;

        // commit
        event.status = LedgerEventStatus::Committed;
        event.committed_at = Some(self.clock.now_millis());
        let hash = event
            .chain_hash()
            .map_err(|e| CommitError::new(CommitStage::Commit, e.to_string()))?;

        let appended = self
            .store
            .append_event(&event, &hash, previous)
            .await
            .map_err(|e| CommitError::storage(CommitStage::Commit, e))?;

        match appended {
            AppendResult::Appended { seq } => {
                info!(
                    event_id = %event.event_id,
                    event_type = %event.event_type,
                    seq,
                    hash = %hash,
                    signed_by = %key.kid,
                    "ledger event committed"
                );
                Ok(CommitOutcome::Committed { seq, hash, event })
            }
            AppendResult::HeadMoved { .. } => Err(CommitError::new(
                CommitStage::Commit,
                "ledger head moved during commit",
            )),
            AppendResult::DuplicateEventId => Err(CommitError::new(
                CommitStage::Commit,
                "event id already committed",
            )),
            AppendResult::DuplicateIdempotencyKey => Err(CommitError::new(
                CommitStage::Commit,
                "idempotency key already committed",
            )),
        }
    }

    async fn validate(
        &self,
        event: &LedgerEvent,
        options: CommitOptions,
    ) -> std::result::Result<(), CommitError> {
        let fail = |reason: String| -> std::result::Result<(), CommitError> {
            Err(CommitError::new(CommitStage::Validate, reason))
        };

        if event.status != LedgerEventStatus::Pending {
            return fail(format!("event status is {:?}, expected pending", event.status));
        }

        let mut problems = event.atomicity_errors();
        if !event.tenant_id.is_empty() && event.tenant_id != self.tenant_id {
            problems.push(format!(
                "tenant {} does not match ledger tenant",
                event.tenant_id
            ));
        }
        problems.extend(event.governance_errors(options.skip_governance));
        if !problems.is_empty() {
            return fail(problems.join("; "));
        }

        let storage = |e| CommitError::storage(CommitStage::Validate, e);
        if self.store.has_event_id(&event.event_id).await.map_err(storage)? {
            return fail("event id already committed".to_string());
        }
        if self
            .store
            .has_idempotency_key(&event.idempotency_key)
            .await
            .map_err(storage)?
        {
            return fail("idempotency key already committed".to_string());
        }
        Ok(())
    }

    /// Build a pending compensating event for a committed one.
    pub async fn compensate(
        &self,
        original_event_id: &str,
        reason: &str,
        actor_id: &str,
    ) -> Result<LedgerEvent> {
        let original = self
            .store
            .get_event(original_event_id)
            .await?
            .ok_or_else(|| TowerError::not_found("ledger_event", original_event_id))?;
        Ok(original.compensate(reason, actor_id, self.clock.now_millis()))
    }

    /// Annotate an uncommitted event with a field change.
    pub fn record_drift(
        &self,
        event: &mut LedgerEvent,
        field_path: &str,
        previous_value: Value,
        new_value: Value,
        changed_by: &str,
        change_reason: Option<String>,
    ) -> Result<()> {
        event.record_drift(
            field_path,
            previous_value,
            new_value,
            changed_by,
            change_reason,
            self.clock.now_millis(),
        )?;
        Ok(())
    }

    /// Re-derive every seal and chain link of the committed ledger.
    pub async fn verify_ledger(&self) -> Result<LedgerReport> {
        let entries = self.store.list_events().await?;
        let mut previous: Option<Blake3Hash> = None;

        for entry in &entries {
            let event = &entry.event;
            let mismatch = |detail: String| {
                TowerError::Integrity(IntegrityError::SealMismatch {
                    event_id: event.event_id.clone(),
                    detail,
                })
            };

            if event.chain_hash()? != entry.hash {
                return Err(mismatch("stored chain hash differs".to_string()));
            }
            let seal = event
                .seal
                .as_ref()
                .ok_or_else(|| mismatch("missing seal".to_string()))?;
            if seal.previous_event_hash != previous {
                return Err(mismatch("previous event hash does not link".to_string()));
            }
            let key = self.registry.key(&seal.signed_by).await?;
            event
                .verify_seal(&key)
                .map_err(|fault| mismatch(fault.to_string()))?;

            previous = Some(entry.hash);
        }

        Ok(LedgerReport {
            events: entries.len(),
            head: previous,
        })
    }
}
