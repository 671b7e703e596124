//! In-memory implementation of the store traits.
//!
//! This is primarily for testing. It has the same semantics as SQLite
//! but keeps everything in memory with no persistence.

use std::collections::{BTreeMap, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;

use tower_trust_core::{
    Blake3Hash, ClockSkew, KeyStatus, LedgerEvent, ReceiptId, SigningKey, TowerReceipt,
};

use crate::error::{Result, StoreError};
use crate::traits::{
    AppendResult, HealthStore, InsertResult, KeyStore, LedgerEntry, LedgerStore, NonceStats,
    NonceStore, ReceiptStore, ReceiptTransition, TransitionResult,
};

/// In-memory store implementation.
///
/// All data is lost when the store is dropped. Thread-safe via RwLock.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<MemoryStoreInner>,
}

#[derive(Default)]
struct MemoryStoreInner {
    /// Keys in install order.
    keys: Vec<SigningKey>,

    receipts: HashMap<ReceiptId, TowerReceipt>,

    /// (context, value) -> expires_at.
    nonces: HashMap<(String, String), i64>,

    last_prune_at: Option<i64>,

    clock_skew: Option<ClockSkew>,

    /// Committed events keyed by seq.
    ledger: BTreeMap<u64, LedgerEntry>,
}

impl MemoryStore {
    /// Create a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, MemoryStoreInner>> {
        self.inner
            .read()
            .map_err(|e| StoreError::Poisoned(e.to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, MemoryStoreInner>> {
        self.inner
            .write()
            .map_err(|e| StoreError::Poisoned(e.to_string()))
    }
}

#[async_trait]
impl KeyStore for MemoryStore {
    async fn install_key(&self, key: &SigningKey, now: i64) -> Result<Option<String>> {
        let mut inner = self.write()?;

        if inner.keys.iter().any(|k| k.kid == key.kid) {
            return Err(StoreError::InvalidData(format!("duplicate kid {}", key.kid)));
        }

        let mut retired = None;
        for existing in inner.keys.iter_mut() {
            if existing.status == KeyStatus::Active {
                existing.status = KeyStatus::Rotated;
                existing.rotated_at = Some(now);
                retired = Some(existing.kid.clone());
            }
        }

        inner.keys.push(key.clone());
        Ok(retired)
    }

    async fn get_key(&self, kid: &str) -> Result<Option<SigningKey>> {
        let inner = self.read()?;
        Ok(inner.keys.iter().find(|k| k.kid == kid).cloned())
    }

    async fn active_key(&self) -> Result<Option<SigningKey>> {
        let inner = self.read()?;
        Ok(inner
            .keys
            .iter()
            .find(|k| k.status == KeyStatus::Active)
            .cloned())
    }

    async fn list_keys(&self) -> Result<Vec<SigningKey>> {
        let inner = self.read()?;
        let mut keys = inner.keys.clone();
        keys.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.kid.cmp(&b.kid)));
        Ok(keys)
    }

    async fn set_key_status(&self, kid: &str, status: KeyStatus, at: i64) -> Result<bool> {
        let mut inner = self.write()?;
        match inner.keys.iter_mut().find(|k| k.kid == kid) {
            Some(key) => {
                key.status = status;
                if status == KeyStatus::Rotated {
                    key.rotated_at = Some(at);
                }
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[async_trait]
impl ReceiptStore for MemoryStore {
    async fn insert_receipt(&self, receipt: &TowerReceipt) -> Result<InsertResult> {
        let mut inner = self.write()?;
        if inner.receipts.contains_key(&receipt.receipt_id) {
            return Ok(InsertResult::AlreadyExists);
        }
        inner
            .receipts
            .insert(receipt.receipt_id.clone(), receipt.clone());
        Ok(InsertResult::Inserted)
    }

    async fn transition_receipt(
        &self,
        id: &ReceiptId,
        transition: ReceiptTransition,
    ) -> Result<TransitionResult> {
        let mut inner = self.write()?;
        let Some(receipt) = inner.receipts.get_mut(id) else {
            return Ok(TransitionResult::NotFound);
        };

        if receipt.status != transition.expected {
            return Ok(TransitionResult::Conflict {
                current: receipt.clone(),
            });
        }

        receipt.status = transition.next;
        if transition.verified_at.is_some() {
            receipt.verified_at = transition.verified_at;
        }
        if transition.errors.is_some() {
            receipt.errors = transition.errors;
        }
        Ok(TransitionResult::Applied(receipt.clone()))
    }

    async fn get_receipt(&self, id: &ReceiptId) -> Result<Option<TowerReceipt>> {
        let inner = self.read()?;
        Ok(inner.receipts.get(id).cloned())
    }

    async fn list_receipts(&self, limit: usize) -> Result<Vec<TowerReceipt>> {
        let inner = self.read()?;
        let mut receipts: Vec<TowerReceipt> = inner.receipts.values().cloned().collect();
        receipts.sort_by(|a, b| {
            b.uploaded_at
                .cmp(&a.uploaded_at)
                .then_with(|| b.receipt_id.cmp(&a.receipt_id))
        });
        receipts.truncate(limit);
        Ok(receipts)
    }

    async fn find_by_manifest_hash(&self, hash: &Blake3Hash) -> Result<Vec<TowerReceipt>> {
        let inner = self.read()?;
        let mut receipts: Vec<TowerReceipt> = inner
            .receipts
            .values()
            .filter(|r| &r.manifest_hash == hash)
            .cloned()
            .collect();
        receipts.sort_by(|a, b| {
            a.uploaded_at
                .cmp(&b.uploaded_at)
                .then_with(|| a.receipt_id.cmp(&b.receipt_id))
        });
        Ok(receipts)
    }
}

#[async_trait]
impl NonceStore for MemoryStore {
    async fn insert_nonce(
        &self,
        context: &str,
        value: &str,
        expires_at: i64,
        now: i64,
    ) -> Result<bool> {
        let mut inner = self.write()?;
        let key = (context.to_string(), value.to_string());
        match inner.nonces.get(&key) {
            Some(&existing) if existing >= now => Ok(false),
            _ => {
                inner.nonces.insert(key, expires_at);
                Ok(true)
            }
        }
    }

    async fn nonce_active(&self, context: &str, value: &str, now: i64) -> Result<bool> {
        let inner = self.read()?;
        let key = (context.to_string(), value.to_string());
        Ok(inner.nonces.get(&key).is_some_and(|&exp| exp >= now))
    }

    async fn prune_nonces(&self, now: i64) -> Result<u64> {
        let mut inner = self.write()?;
        let before = inner.nonces.len();
        inner.nonces.retain(|_, exp| *exp >= now);
        inner.last_prune_at = Some(now);
        Ok((before - inner.nonces.len()) as u64)
    }

    async fn nonce_stats(&self, now: i64) -> Result<NonceStats> {
        let inner = self.read()?;
        let mut by_context = BTreeMap::new();
        for ((context, _), _) in inner.nonces.iter().filter(|(_, exp)| **exp >= now) {
            *by_context.entry(context.clone()).or_insert(0u64) += 1;
        }
        let size = inner.nonces.len() as u64;
        let active = by_context.values().sum::<u64>();
        Ok(NonceStats {
            size,
            active,
            expired: size - active,
            by_context,
            last_prune_at: inner.last_prune_at,
        })
    }

    async fn last_prune_at(&self) -> Result<Option<i64>> {
        Ok(self.read()?.last_prune_at)
    }
}

#[async_trait]
impl HealthStore for MemoryStore {
    async fn clock_skew(&self) -> Result<Option<ClockSkew>> {
        Ok(self.read()?.clock_skew)
    }

    async fn save_clock_skew(&self, skew: &ClockSkew) -> Result<()> {
        self.write()?.clock_skew = Some(*skew);
        Ok(())
    }
}

#[async_trait]
impl LedgerStore for MemoryStore {
    async fn append_event(
        &self,
        event: &LedgerEvent,
        hash: &Blake3Hash,
        expected_head: Option<Blake3Hash>,
    ) -> Result<AppendResult> {
        if event.committed_at.is_none() {
            return Err(StoreError::InvalidData(format!(
                "ledger event {} has no committed_at",
                event.event_id
            )));
        }

        let mut inner = self.write()?;

        let head = inner.ledger.values().next_back().map(|e| (e.seq, e.hash));
        let head_hash = head.map(|(_, h)| h);
        if head_hash != expected_head {
            return Ok(AppendResult::HeadMoved { current: head_hash });
        }

        if inner.ledger.values().any(|e| e.event.event_id == event.event_id) {
            return Ok(AppendResult::DuplicateEventId);
        }
        if inner
            .ledger
            .values()
            .any(|e| e.event.idempotency_key == event.idempotency_key)
        {
            return Ok(AppendResult::DuplicateIdempotencyKey);
        }

        let seq = head.map_or(1, |(s, _)| s + 1);
        inner.ledger.insert(
            seq,
            LedgerEntry {
                seq,
                hash: *hash,
                event: event.clone(),
            },
        );
        Ok(AppendResult::Appended { seq })
    }

    async fn ledger_head(&self) -> Result<Option<(u64, Blake3Hash)>> {
        let inner = self.read()?;
        Ok(inner.ledger.values().next_back().map(|e| (e.seq, e.hash)))
    }

    async fn get_event(&self, event_id: &str) -> Result<Option<LedgerEvent>> {
        let inner = self.read()?;
        Ok(inner
            .ledger
            .values()
            .find(|e| e.event.event_id == event_id)
            .map(|e| e.event.clone()))
    }

    async fn has_event_id(&self, event_id: &str) -> Result<bool> {
        let inner = self.read()?;
        Ok(inner.ledger.values().any(|e| e.event.event_id == event_id))
    }

    async fn has_idempotency_key(&self, key: &str) -> Result<bool> {
        let inner = self.read()?;
        Ok(inner.ledger.values().any(|e| e.event.idempotency_key == key))
    }

    async fn list_events(&self) -> Result<Vec<LedgerEntry>> {
        let inner = self.read()?;
        Ok(inner.ledger.values().cloned().collect())
    }
}
