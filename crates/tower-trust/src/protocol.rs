//! Receipt upload / acknowledge protocol.
//!
//! ```text
//! pending ──upload──▶ received ──acknowledge──▶ verified
//!                        │
//!                        └──reject──▶ rejected
//! ```
//!
//! An upload whose recomputed root disagrees with the claimed root creates
//! no receipt at all. Acknowledging a verified receipt returns the stored
//! result unchanged. Status writes are compare-and-swap in the store.

use std::sync::Arc;

use tracing::{info, warn};

use tower_trust_core::canonical::to_value;
use tower_trust_core::{
    AckResponse, Blake3Hash, Clock, DigestRequest, DigestVerification, IntegrityError, ReceiptId,
    ReceiptStatus, TowerReceipt, UploadRequest, UploadResponse,
};
use tower_trust_store::{
    InsertResult, KeyStore, ReceiptStore, ReceiptTransition, TransitionResult,
};

use crate::error::{Result, TowerError};
use crate::registry::KeyRegistry;

/// Manifest intake and receipt lifecycle.
pub struct ReceiptProtocol<S> {
    store: Arc<S>,
    registry: Arc<KeyRegistry<S>>,
    clock: Arc<dyn Clock>,
}

impl<S: KeyStore + ReceiptStore> ReceiptProtocol<S> {
    pub fn new(store: Arc<S>, registry: Arc<KeyRegistry<S>>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            registry,
            clock,
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Upload
    // ─────────────────────────────────────────────────────────────────────────

    /// Verify a manifest, co-sign it and persist a `received` receipt.
    pub async fn upload(&self, request: &UploadRequest) -> Result<UploadResponse> {
        let manifest = request.validate().map_err(|e| {
            warn!(reason = e.reason(), "manifest rejected");
            e
        })?;

        let echo_root = manifest.echo_root()?;
        if echo_root != manifest.merkle_root {
            warn!(
                expected = %manifest.merkle_root,
                computed = %echo_root,
                kid = %manifest.kid,
                "manifest root mismatch"
            );
            return Err(IntegrityError::RootMismatch {
                expected: manifest.merkle_root.to_hex(),
                computed: echo_root.to_hex(),
            }
            .into());
        }

        let manifest_hash = manifest.digest()?;
        let co_signature = self
            .registry
            .co_sign(&manifest.unsigned(), &manifest.signature)
            .await?;

        let now = self.clock.now_millis();
        let receipt = TowerReceipt::received(
            ReceiptId::generate(now),
            &manifest,
            echo_root,
            manifest_hash,
            co_signature,
            now,
        )?;

        match self.store.insert_receipt(&receipt).await? {
            InsertResult::Inserted => {}
            InsertResult::AlreadyExists => {
                return Err(TowerError::Conflict(format!(
                    "receipt id {} already exists",
                    receipt.receipt_id
                )));
            }
        }

        info!(
            receipt_id = %receipt.receipt_id,
            manifest_hash = %receipt.manifest_hash,
            files = manifest.files.len(),
            tower_kid = %receipt.signatures.tower_kid,
            "manifest received"
        );
        Ok(receipt.upload_response())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Acknowledge
    // ─────────────────────────────────────────────────────────────────────────

    /// Look up a receipt and verify it if it is still `received`.
    ///
    /// A receipt that is already verified is returned as stored.
    pub async fn acknowledge(&self, receipt_id: &str) -> Result<AckResponse> {
        let id = ReceiptId::parse(receipt_id)?;
        let receipt = self.load(&id).await?;

        if receipt.status != ReceiptStatus::Received {
            return Ok(receipt.ack_response());
        }

        let transition = ReceiptTransition {
            expected: ReceiptStatus::Received,
            next: ReceiptStatus::Verified,
            verified_at: Some(self.clock.now_millis()),
            errors: None,
        };

        match self.store.transition_receipt(&id, transition).await? {
            TransitionResult::Applied(updated) => {
                info!(
                    receipt_id = %id,
                    ack_latency_ms = ?updated.ack_latency_ms(),
                    "receipt verified"
                );
                Ok(updated.ack_response())
            }
            // Another writer moved it first; report what it wrote.
            TransitionResult::Conflict { current } => Ok(current.ack_response()),
            TransitionResult::NotFound => Err(TowerError::not_found("receipt", id.as_str())),
        }
    }

    /// Explicit-write form of [`acknowledge`](Self::acknowledge).
    pub async fn confirm_receipt(&self, receipt_id: &str) -> Result<AckResponse> {
        self.acknowledge(receipt_id).await
    }

    /// Pure read.
    pub async fn fetch_receipt(&self, receipt_id: &str) -> Result<TowerReceipt> {
        let id = ReceiptId::parse(receipt_id)?;
        self.load(&id).await
    }

    /// Move a `received` receipt to `rejected`.
    pub async fn reject_receipt(
        &self,
        receipt_id: &str,
        errors: Vec<String>,
    ) -> Result<AckResponse> {
        let id = ReceiptId::parse(receipt_id)?;
        let receipt = self.load(&id).await?;

        if !receipt.status.can_transition(ReceiptStatus::Rejected) {
            return Err(TowerError::Conflict(format!(
                "receipt {} is {}, cannot reject",
                id, receipt.status
            )));
        }

        let transition = ReceiptTransition {
            expected: receipt.status,
            next: ReceiptStatus::Rejected,
            verified_at: None,
            errors: Some(errors),
        };

        match self.store.transition_receipt(&id, transition).await? {
            TransitionResult::Applied(updated) => {
                warn!(receipt_id = %id, errors = ?updated.errors, "receipt rejected");
                Ok(updated.ack_response())
            }
            TransitionResult::Conflict { current } => Err(TowerError::Conflict(format!(
                "receipt {} moved to {} concurrently",
                id, current.status
            ))),
            TransitionResult::NotFound => Err(TowerError::not_found("receipt", id.as_str())),
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Queries
    // ─────────────────────────────────────────────────────────────────────────

    /// Most recent receipts first.
    pub async fn list_receipts(&self, limit: usize) -> Result<Vec<TowerReceipt>> {
        Ok(self.store.list_receipts(limit).await?)
    }

    /// Every receipt for a manifest hash, oldest first.
    pub async fn find_by_manifest_hash(&self, hash: &Blake3Hash) -> Result<Vec<TowerReceipt>> {
        Ok(self.store.find_by_manifest_hash(hash).await?)
    }

    async fn load(&self, id: &ReceiptId) -> Result<TowerReceipt> {
        self.store
            .get_receipt(id)
            .await?
            .ok_or_else(|| TowerError::not_found("receipt", id.as_str()))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Daily digest
    // ─────────────────────────────────────────────────────────────────────────

    /// Validate a daily digest, hash it without its signature and sign it.
    pub async fn verify_digest(&self, request: &DigestRequest) -> Result<DigestVerification> {
        let digest = request.validate().map_err(|e| {
            warn!(reason = e.reason(), "digest rejected");
            e
        })?;

        let mut unsigned = to_value(&digest)?;
        if let Some(obj) = unsigned.as_object_mut() {
            obj.remove("signature");
        }
        let digest_hash = tower_trust_core::canonical_hash(&unsigned)?;
        let (tower_signature, tower_kid) = self.registry.sign(&unsigned).await?;

        info!(
            date = %digest.date,
            digest_hash = %digest_hash,
            tower_kid = %tower_kid,
            "daily digest verified"
        );

        Ok(DigestVerification {
            verified: true,
            digest_hash,
            tower_signature,
            tower_kid,
            verified_at: self.clock.now_millis(),
            digest: digest.summary(),
        })
    }
}
