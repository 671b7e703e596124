//! Tower receipts: the durable record of an accepted manifest upload.

use serde::{Deserialize, Serialize};

use crate::crypto::{Blake3Hash, KeyedSignature};
use crate::error::IntegrityError;
use crate::manifest::{Manifest, UnsignedManifest};
use crate::signing::CoSignature;
use crate::types::{ReceiptId, ReceiptStatus};

/// Factory and Tower signatures over the unsigned manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiptSignatures {
    pub factory_signature: String,
    pub tower_signature: KeyedSignature,
    pub tower_kid: String,
}

/// A receipt for one manifest upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TowerReceipt {
    pub receipt_id: ReceiptId,
    pub manifest_hash: Blake3Hash,
    /// Root recomputed by the Tower at receipt creation.
    pub echo_root: Blake3Hash,
    pub uploaded_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verified_at: Option<i64>,
    pub status: ReceiptStatus,
    pub manifest: UnsignedManifest,
    pub signatures: ReceiptSignatures,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<String>>,
}

impl TowerReceipt {
    /// Build a `received` receipt for a manifest whose root already matched.
    ///
    /// Fails if `echo_root` disagrees with the manifest's claimed root.
    pub fn received(
        receipt_id: ReceiptId,
        manifest: &Manifest,
        echo_root: Blake3Hash,
        manifest_hash: Blake3Hash,
        co_signature: CoSignature,
        uploaded_at: i64,
    ) -> Result<Self, IntegrityError> {
        if echo_root != manifest.merkle_root {
            return Err(IntegrityError::RootMismatch {
                expected: manifest.merkle_root.to_hex(),
                computed: echo_root.to_hex(),
            });
        }

        Ok(Self {
            receipt_id,
            manifest_hash,
            echo_root,
            uploaded_at,
            verified_at: None,
            status: ReceiptStatus::Received,
            manifest: manifest.unsigned(),
            signatures: ReceiptSignatures {
                factory_signature: co_signature.external_signature,
                tower_signature: co_signature.tower_signature,
                tower_kid: co_signature.tower_kid,
            },
            errors: None,
        })
    }

    /// Acknowledgement latency, if verified.
    pub fn ack_latency_ms(&self) -> Option<i64> {
        self.verified_at.map(|v| v - self.uploaded_at)
    }

    pub fn upload_response(&self) -> UploadResponse {
        UploadResponse {
            receipt_id: self.receipt_id.clone(),
            echo_root: self.echo_root,
            status: self.status,
            uploaded_at: self.uploaded_at,
        }
    }

    pub fn ack_response(&self) -> AckResponse {
        AckResponse {
            receipt_id: self.receipt_id.clone(),
            status: self.status,
            echo_root: self.echo_root,
            uploaded_at: self.uploaded_at,
            verified_at: self.verified_at,
            manifest_hash: self.manifest_hash,
            errors: self.errors.clone(),
        }
    }
}

/// Successful upload result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    pub receipt_id: ReceiptId,
    pub echo_root: Blake3Hash,
    pub status: ReceiptStatus,
    pub uploaded_at: i64,
}

/// Acknowledgement / fetch result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AckResponse {
    pub receipt_id: ReceiptId,
    pub status: ReceiptStatus,
    pub echo_root: Blake3Hash,
    pub uploaded_at: i64,
    pub verified_at: Option<i64>,
    pub manifest_hash: Blake3Hash,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<String>>,
}
