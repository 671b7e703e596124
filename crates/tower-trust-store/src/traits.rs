//! Storage contracts for Tower trust.
//!
//! Each durable table sits behind its own trait so the services never depend
//! on a particular engine. Every atomicity guarantee the services rely on is
//! stated here and must be enforced by the implementation itself, not by a
//! read-then-write in the caller.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::Serialize;
use tower_trust_core::{
    Blake3Hash, ClockSkew, KeyStatus, LedgerEvent, ReceiptId, ReceiptStatus, SigningKey,
    TowerReceipt,
};

use crate::error::Result;

/// Result of an insert-if-absent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertResult {
    /// The row was new.
    Inserted,
    /// A row with this key already exists. Nothing was written.
    AlreadyExists,
}

/// Result of a compare-and-swap status update on a receipt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionResult {
    /// The status moved; the updated receipt is returned.
    Applied(TowerReceipt),
    /// The stored status was not the expected one. Nothing was written.
    Conflict { current: TowerReceipt },
    /// No receipt with this id.
    NotFound,
}

/// Requested receipt status change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiptTransition {
    pub expected: ReceiptStatus,
    pub next: ReceiptStatus,
    pub verified_at: Option<i64>,
    pub errors: Option<Vec<String>>,
}

/// Nonce table statistics at a point in time.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NonceStats {
    /// Total rows, including expired ones awaiting prune.
    pub size: u64,
    pub active: u64,
    pub expired: u64,
    /// Unexpired rows per context.
    pub by_context: BTreeMap<String, u64>,
    pub last_prune_at: Option<i64>,
}

/// Result of appending to the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppendResult {
    /// Appended at this sequence number (1-based).
    Appended { seq: u64 },
    /// The chain head is no longer the one the caller sealed against.
    HeadMoved { current: Option<Blake3Hash> },
    /// The event id is already committed.
    DuplicateEventId,
    /// The idempotency key is already committed.
    DuplicateIdempotencyKey,
}

/// A committed ledger event with its position and chain hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerEntry {
    pub seq: u64,
    pub hash: Blake3Hash,
    pub event: LedgerEvent,
}

/// Durable signing-key registry.
///
/// At most one key is `active`. Implementations enforce that at the storage
/// layer.
#[async_trait]
pub trait KeyStore: Send + Sync {
    /// Install `key` as the active key.
    ///
    /// Any currently active key moves to `rotated` with `rotated_at = now`
    /// in the same transaction. Returns the retired kid, if any.
    async fn install_key(&self, key: &SigningKey, now: i64) -> Result<Option<String>>;

    /// Look up a key by kid.
    async fn get_key(&self, kid: &str) -> Result<Option<SigningKey>>;

    /// The single active key, if any.
    async fn active_key(&self) -> Result<Option<SigningKey>>;

    /// All keys, oldest first.
    async fn list_keys(&self) -> Result<Vec<SigningKey>>;

    /// Set a key's status. Returns `false` if the kid is unknown.
    async fn set_key_status(&self, kid: &str, status: KeyStatus, at: i64) -> Result<bool>;
}

/// Durable receipt table keyed by receipt id.
#[async_trait]
pub trait ReceiptStore: Send + Sync {
    // ─────────────────────────────────────────────────────────────────────────
    // Writes
    // ─────────────────────────────────────────────────────────────────────────

    /// Insert a receipt if no receipt with its id exists.
    async fn insert_receipt(&self, receipt: &TowerReceipt) -> Result<InsertResult>;

    /// Compare-and-swap the receipt status.
    ///
    /// Applies only if the stored status equals `transition.expected`.
    async fn transition_receipt(
        &self,
        id: &ReceiptId,
        transition: ReceiptTransition,
    ) -> Result<TransitionResult>;

    // ─────────────────────────────────────────────────────────────────────────
    // Reads
    // ─────────────────────────────────────────────────────────────────────────

    async fn get_receipt(&self, id: &ReceiptId) -> Result<Option<TowerReceipt>>;

    /// Most recent receipts first, by upload time.
    async fn list_receipts(&self, limit: usize) -> Result<Vec<TowerReceipt>>;

    /// Every receipt recorded for a manifest hash, oldest first.
    async fn find_by_manifest_hash(&self, hash: &Blake3Hash) -> Result<Vec<TowerReceipt>>;
}

/// Durable replay-protection store.
///
/// Nonces are unique per `(context, value)`: the same value may be recorded
/// once in each context. Expiry is absence: a nonce whose `expires_at` is
/// before `now` is neither reported nor blocks a new insert, even before it
/// is pruned.
#[async_trait]
pub trait NonceStore: Send + Sync {
    /// Atomically insert `(context, value)` unless an unexpired row exists.
    ///
    /// An expired row is replaced. Returns `true` if the nonce was recorded.
    async fn insert_nonce(
        &self,
        context: &str,
        value: &str,
        expires_at: i64,
        now: i64,
    ) -> Result<bool>;

    /// Whether an unexpired row for `(context, value)` exists.
    async fn nonce_active(&self, context: &str, value: &str, now: i64) -> Result<bool>;

    /// Delete rows with `expires_at < now` and persist `now` as the last
    /// prune time. Returns the number of rows deleted.
    async fn prune_nonces(&self, now: i64) -> Result<u64>;

    async fn nonce_stats(&self, now: i64) -> Result<NonceStats>;

    /// When the last prune ran, if ever.
    async fn last_prune_at(&self) -> Result<Option<i64>>;
}

/// Durable health measurements that must survive a restart.
#[async_trait]
pub trait HealthStore: Send + Sync {
    /// The last persisted clock-skew average, if any sample was recorded.
    async fn clock_skew(&self) -> Result<Option<ClockSkew>>;

    async fn save_clock_skew(&self, skew: &ClockSkew) -> Result<()>;
}

/// Append-only ledger of committed events.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Append a committed event in one transaction.
    ///
    /// Refuses if the current head hash differs from `expected_head`, or if
    /// the event id or idempotency key is already present.
    async fn append_event(
        &self,
        event: &LedgerEvent,
        hash: &Blake3Hash,
        expected_head: Option<Blake3Hash>,
    ) -> Result<AppendResult>;

    /// Sequence number and chain hash of the last committed event.
    async fn ledger_head(&self) -> Result<Option<(u64, Blake3Hash)>>;

    async fn get_event(&self, event_id: &str) -> Result<Option<LedgerEvent>>;

    async fn has_event_id(&self, event_id: &str) -> Result<bool>;

    async fn has_idempotency_key(&self, key: &str) -> Result<bool>;

    /// All committed events in sequence order.
    async fn list_events(&self) -> Result<Vec<LedgerEntry>>;
}

/// Everything the Tower services need from one backend.
pub trait TowerStore: KeyStore + ReceiptStore + NonceStore + HealthStore + LedgerStore {}

impl<T: KeyStore + ReceiptStore + NonceStore + HealthStore + LedgerStore + ?Sized> TowerStore
    for T
{
}
