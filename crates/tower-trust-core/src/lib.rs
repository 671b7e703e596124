//! # Tower Trust Core
//!
//! Pure primitives for the Tower trust layer: Merkle roots, keyed-hash
//! signing, signed event chains, manifests, receipts and ledger seals.
//!
//! This crate contains no I/O, no storage, no networking. Time enters only
//! through explicit `now` arguments or the [`Clock`] trait.
//!
//! ## Key Types
//!
//! - [`Blake3Hash`] - 32-byte content hash, hex on every external surface
//! - [`SigningKey`] - keyed-hash key with its rotation schedule
//! - [`SignedEvent`] - timestamped, chainable, signed event
//! - [`Manifest`] - validated factory manifest
//! - [`TowerReceipt`] - record of an accepted upload
//! - [`LedgerEvent`] - governed event sealed before commit
//!
//! ## Canonicalization
//!
//! Everything that is hashed or signed goes through canonical JSON. See
//! [`canonical`] module.

pub mod canonical;
pub mod crypto;
pub mod digest;
pub mod error;
pub mod event;
pub mod key;
pub mod ledger;
pub mod manifest;
pub mod merkle;
pub mod receipt;
pub mod signing;
pub mod time;
pub mod types;

pub use canonical::{canonical_hash, canonical_json, canonical_json_without};
pub use crypto::{Blake3Hash, KeyedSignature, SecretKey};
pub use digest::{DailyDigest, DigestRequest, DigestSummary, DigestVerification, RawDigest};
pub use error::{CoreError, IntegrityError, ValidationError};
pub use event::{ChainError, EventVerifier, EventVerifyError, SignedEvent, VerifyOptions};
pub use key::{
    KeyMetadata, KeyScope, KeyStatus, KeyUsage, RotationPolicy, RotationStatus, SigningKey, Urgency,
};
pub use ledger::{
    DriftRecord, EventPayload, GateStatus, GovernanceGate, LedgerEvent, LedgerEventStatus,
    LedgerSeal, SealFault,
};
pub use manifest::{FileEntry, Manifest, RawManifest, UnsignedManifest, UploadRequest};
pub use merkle::{build_proof, compute_root, verify_proof, ProofStep, Side, MERKLE_ALGORITHM};
pub use receipt::{AckResponse, ReceiptSignatures, TowerReceipt, UploadResponse};
pub use signing::CoSignature;
pub use time::{Clock, ClockSkew, ManualClock, SkewStatus, SystemClock};
pub use types::{ReceiptId, ReceiptStatus};
