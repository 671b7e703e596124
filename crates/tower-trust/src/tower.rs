//! The Tower: one store, one clock, every trust service wired together.

use std::sync::Arc;

use tower_trust_core::{
    AckResponse, Clock, DigestRequest, DigestVerification, SystemClock, UploadRequest,
    UploadResponse,
};
use tower_trust_store::TowerStore;

use crate::commit::{LedgerCommitter, LedgerExecutor, NoopExecutor};
use crate::config::TowerConfig;
use crate::error::{Result, TowerError};
use crate::events::{EventGate, EventSigner};
use crate::health::{self, ClockSkewTracker, HealthSnapshot};
use crate::maintenance::MaintenanceTask;
use crate::nonce::NonceGuard;
use crate::protocol::ReceiptProtocol;
use crate::registry::KeyRegistry;

/// A Tower instance.
///
/// Services share the store and clock, so state written by one (a rotated
/// key, a recorded nonce) is visible to the others immediately.
pub struct Tower<S> {
    store: Arc<S>,
    clock: Arc<dyn Clock>,
    config: TowerConfig,
    registry: Arc<KeyRegistry<S>>,
    nonces: Arc<NonceGuard<S>>,
    protocol: ReceiptProtocol<S>,
    events: EventGate<S>,
    signer: EventSigner<S>,
    ledger: LedgerCommitter<S>,
}

impl<S: TowerStore + 'static> Tower<S> {
    /// Create a Tower on the system clock with a no-op ledger executor.
    pub fn new(store: S, config: TowerConfig) -> Self {
        Self::with_clock(store, config, Arc::new(SystemClock))
    }

    pub fn with_clock(store: S, config: TowerConfig, clock: Arc<dyn Clock>) -> Self {
        Self::with_executor(store, config, clock, Arc::new(NoopExecutor))
    }

    /// Create a Tower whose ledger commits run through `executor`.
    pub fn with_executor(
        store: S,
        config: TowerConfig,
        clock: Arc<dyn Clock>,
        executor: Arc<dyn LedgerExecutor>,
    ) -> Self {
        let store = Arc::new(store);
        let registry = Arc::new(KeyRegistry::new(store.clone(), clock.clone(), &config));
        let nonces = Arc::new(NonceGuard::new(store.clone(), clock.clone(), &config));
        let skew = Arc::new(ClockSkewTracker::new(store.clone(), clock.clone()));

        Self {
            protocol: ReceiptProtocol::new(store.clone(), registry.clone(), clock.clone()),
            events: EventGate::new(
                registry.clone(),
                nonces.clone(),
                skew,
                clock.clone(),
                config.verify_options(),
            ),
            signer: EventSigner::new(registry.clone(), clock.clone(), config.node_id.clone()),
            ledger: LedgerCommitter::new(
                store.clone(),
                registry.clone(),
                clock.clone(),
                executor,
                config.tenant_id.clone(),
            ),
            store,
            clock,
            config,
            registry,
            nonces,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    pub fn config(&self) -> &TowerConfig {
        &self.config
    }

    pub fn keys(&self) -> &KeyRegistry<S> {
        &self.registry
    }

    pub fn nonces(&self) -> &NonceGuard<S> {
        &self.nonces
    }

    pub fn receipts(&self) -> &ReceiptProtocol<S> {
        &self.protocol
    }

    pub fn events(&self) -> &EventGate<S> {
        &self.events
    }

    pub fn signer(&self) -> &EventSigner<S> {
        &self.signer
    }

    pub fn ledger(&self) -> &LedgerCommitter<S> {
        &self.ledger
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Protocol shortcuts
    // ─────────────────────────────────────────────────────────────────────────

    pub async fn upload(&self, request: &UploadRequest) -> Result<UploadResponse> {
        self.protocol.upload(request).await
    }

    pub async fn acknowledge(&self, receipt_id: &str) -> Result<AckResponse> {
        self.protocol.acknowledge(receipt_id).await
    }

    pub async fn verify_digest(&self, request: &DigestRequest) -> Result<DigestVerification> {
        self.protocol.verify_digest(request).await
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Operations
    // ─────────────────────────────────────────────────────────────────────────

    /// Build a health snapshot over the most recent receipts.
    pub async fn health(&self) -> Result<HealthSnapshot> {
        let recent = self.protocol.list_receipts(self.config.health_window).await?;
        let nonces = self.nonces.stats().await?;
        let key_rotation = match self.registry.should_rotate().await {
            Ok(status) => Some(status),
            Err(TowerError::NotFound { .. }) => None,
            Err(e) => return Err(e),
        };
        let clock_skew = self.events.skew().current().await?;

        Ok(health::snapshot(
            &recent,
            nonces,
            key_rotation,
            clock_skew,
            self.config.panic_error_rate,
            self.clock.now_millis(),
        ))
    }

    /// A maintenance task sharing this Tower's registry and replay guard.
    pub fn maintenance(&self) -> MaintenanceTask<S> {
        MaintenanceTask::new(
            self.registry.clone(),
            self.nonces.clone(),
            self.config.maintenance_interval,
            self.config.auto_rotate,
        )
    }
}
