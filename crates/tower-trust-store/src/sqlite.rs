//! SQLite implementation of the store traits.
//!
//! This is the primary storage backend for Tower trust. It uses rusqlite with
//! bundled SQLite, wrapped in async via `tokio::task::spawn_blocking`. Every
//! atomicity guarantee is expressed in SQL: a partial unique index for the
//! active key, `ON CONFLICT` upserts for nonces, and guarded `UPDATE`s for
//! receipt status.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};

use tower_trust_core::{
    Blake3Hash, ClockSkew, KeyScope, KeyStatus, KeyUsage, LedgerEvent, ReceiptId, SecretKey,
    SigningKey, TowerReceipt,
};

use crate::error::{decode_body, encode_body, Result, StoreError};
use crate::migration;
use crate::traits::{
    AppendResult, HealthStore, InsertResult, KeyStore, LedgerEntry, LedgerStore, NonceStats,
    NonceStore, ReceiptStore, ReceiptTransition, TransitionResult,
};

const LAST_PRUNE_KEY: &str = "nonce_last_prune_at";
const SKEW_MS_KEY: &str = "clock_skew_ms";
const SKEW_SAMPLES_KEY: &str = "clock_skew_samples";
const SKEW_UPDATED_KEY: &str = "clock_skew_updated_at";

const KEY_COLUMNS: &str =
    "kid, algorithm, material, created_at, rotates_at, rotated_at, status, scope, usage";

/// SQLite-based store implementation.
///
/// Thread-safe via internal Mutex. All operations use spawn_blocking
/// to avoid blocking the async runtime.
pub struct SqliteStore {
    /// The SQLite connection, protected by a mutex.
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open a SQLite database at the given path.
    ///
    /// Creates the file and runs migrations if it doesn't exist.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let mut conn = Connection::open(path)?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory SQLite database.
    ///
    /// Useful for testing.
    pub fn open_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory()?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `f` against the connection on the blocking pool.
    async fn run<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();

        tokio::task::spawn_blocking(move || {
            let mut conn = conn
                .lock()
                .map_err(|e| StoreError::Poisoned(e.to_string()))?;
            f(&mut conn)
        })
        .await
        .map_err(|e| {
            StoreError::Database(rusqlite::Error::SqliteFailure(
                rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_ERROR),
                Some(format!("spawn_blocking failed: {}", e)),
            ))
        })?
    }
}

/// Raw `signing_keys` row before validation.
struct KeyRow {
    kid: String,
    algorithm: String,
    material: Vec<u8>,
    created_at: i64,
    rotates_at: i64,
    rotated_at: Option<i64>,
    status: String,
    scope: String,
    usage: String,
}

impl KeyRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            kid: row.get("kid")?,
            algorithm: row.get("algorithm")?,
            material: row.get("material")?,
            created_at: row.get("created_at")?,
            rotates_at: row.get("rotates_at")?,
            rotated_at: row.get("rotated_at")?,
            status: row.get("status")?,
            scope: row.get("scope")?,
            usage: row.get("usage")?,
        })
    }

    fn into_key(self) -> Result<SigningKey> {
        let material: [u8; 32] = self.material.try_into().map_err(|b: Vec<u8>| {
            StoreError::InvalidData(format!("key material is {} bytes", b.len()))
        })?;
        let status = self.status.parse::<KeyStatus>().map_err(StoreError::InvalidData)?;
        let scope = self.scope.parse::<KeyScope>().map_err(StoreError::InvalidData)?;
        let usage = self.usage.parse::<KeyUsage>().map_err(StoreError::InvalidData)?;
        Ok(SigningKey {
            kid: self.kid,
            algorithm: self.algorithm,
            material: SecretKey::from_bytes(material),
            created_at: self.created_at,
            rotates_at: self.rotates_at,
            rotated_at: self.rotated_at,
            status,
            scope,
            usage,
        })
    }
}

fn blob_to_hash(bytes: Vec<u8>) -> Result<Blake3Hash> {
    let arr: [u8; 32] = bytes
        .try_into()
        .map_err(|b: Vec<u8>| StoreError::InvalidData(format!("hash is {} bytes", b.len())))?;
    Ok(Blake3Hash::from_bytes(arr))
}

fn query_keys(conn: &Connection, sql: &str, args: &[&dyn rusqlite::ToSql]) -> Result<Vec<SigningKey>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(args, KeyRow::from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    rows.into_iter().map(KeyRow::into_key).collect()
}

fn query_receipts(
    conn: &Connection,
    sql: &str,
    args: &[&dyn rusqlite::ToSql],
) -> Result<Vec<TowerReceipt>> {
    let mut stmt = conn.prepare(sql)?;
    let bodies = stmt
        .query_map(args, |row| row.get::<_, Vec<u8>>(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    bodies.iter().map(|b| decode_body(b)).collect()
}

fn read_receipt(conn: &Connection, id: &str) -> Result<Option<TowerReceipt>> {
    let body: Option<Vec<u8>> = conn
        .query_row(
            "SELECT body FROM receipts WHERE receipt_id = ?1",
            params![id],
            |row| row.get(0),
        )
        .optional()?;
    body.map(|b| decode_body(&b)).transpose()
}

#[async_trait]
impl KeyStore for SqliteStore {
    async fn install_key(&self, key: &SigningKey, now: i64) -> Result<Option<String>> {
        let key = key.clone();

        self.run(move |conn| {
            let tx = conn.transaction()?;

            let retired: Option<String> = tx
                .query_row(
                    "SELECT kid FROM signing_keys WHERE status = 'active'",
                    [],
                    |row| row.get(0),
                )
                .optional()?;

            if let Some(old) = &retired {
                tx.execute(
                    "UPDATE signing_keys SET status = 'rotated', rotated_at = ?2
                     WHERE kid = ?1 AND status = 'active'",
                    params![old, now],
                )?;
            }

            tx.execute(
                "INSERT INTO signing_keys (kid, algorithm, material, created_at, rotates_at, rotated_at, status, scope, usage)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    key.kid,
                    key.algorithm,
                    key.material.expose().as_slice(),
                    key.created_at,
                    key.rotates_at,
                    key.rotated_at,
                    key.status.as_str(),
                    key.scope.as_str(),
                    key.usage.as_str(),
                ],
            )?;

            tx.commit()?;
            Ok(retired)
        })
        .await
    }

    async fn get_key(&self, kid: &str) -> Result<Option<SigningKey>> {
        let kid = kid.to_string();
        self.run(move |conn| {
            let sql = format!("SELECT {} FROM signing_keys WHERE kid = ?1", KEY_COLUMNS);
            Ok(query_keys(conn, &sql, &[&kid])?.into_iter().next())
        })
        .await
    }

    async fn active_key(&self) -> Result<Option<SigningKey>> {
        self.run(|conn| {
            let sql = format!("SELECT {} FROM signing_keys WHERE status = 'active'", KEY_COLUMNS);
            Ok(query_keys(conn, &sql, &[])?.into_iter().next())
        })
        .await
    }

    async fn list_keys(&self) -> Result<Vec<SigningKey>> {
        self.run(|conn| {
            let sql = format!(
                "SELECT {} FROM signing_keys ORDER BY created_at ASC, kid ASC",
                KEY_COLUMNS
            );
            query_keys(conn, &sql, &[])
        })
        .await
    }

    async fn set_key_status(&self, kid: &str, status: KeyStatus, at: i64) -> Result<bool> {
        let kid = kid.to_string();
        self.run(move |conn| {
            let changed = conn.execute(
                "UPDATE signing_keys
                 SET status = ?2,
                     rotated_at = CASE WHEN ?2 = 'rotated' THEN ?3 ELSE rotated_at END
                 WHERE kid = ?1",
                params![kid, status.as_str(), at],
            )?;
            Ok(changed > 0)
        })
        .await
    }
}

#[async_trait]
impl ReceiptStore for SqliteStore {
    async fn insert_receipt(&self, receipt: &TowerReceipt) -> Result<InsertResult> {
        let body = encode_body(receipt)?;
        let receipt = receipt.clone();

        self.run(move |conn| {
            let changed = conn.execute(
                "INSERT INTO receipts (receipt_id, manifest_hash, status, uploaded_at, verified_at, body)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(receipt_id) DO NOTHING",
                params![
                    receipt.receipt_id.as_str(),
                    receipt.manifest_hash.as_bytes().as_slice(),
                    receipt.status.as_str(),
                    receipt.uploaded_at,
                    receipt.verified_at,
                    body,
                ],
            )?;
            Ok(if changed == 1 {
                InsertResult::Inserted
            } else {
                InsertResult::AlreadyExists
            })
        })
        .await
    }

    async fn transition_receipt(
        &self,
        id: &ReceiptId,
        transition: ReceiptTransition,
    ) -> Result<TransitionResult> {
        let id = id.as_str().to_string();

        self.run(move |conn| {
            let tx = conn.transaction()?;

            let Some(mut receipt) = read_receipt(&tx, &id)? else {
                return Ok(TransitionResult::NotFound);
            };
            if receipt.status != transition.expected {
                return Ok(TransitionResult::Conflict { current: receipt });
            }

            receipt.status = transition.next;
            if transition.verified_at.is_some() {
                receipt.verified_at = transition.verified_at;
            }
            if transition.errors.is_some() {
                receipt.errors = transition.errors;
            }
            let body = encode_body(&receipt)?;

            let changed = tx.execute(
                "UPDATE receipts SET status = ?2, verified_at = ?3, body = ?4
                 WHERE receipt_id = ?1 AND status = ?5",
                params![
                    id,
                    receipt.status.as_str(),
                    receipt.verified_at,
                    body,
                    transition.expected.as_str(),
                ],
            )?;

            if changed == 0 {
                let current = read_receipt(&tx, &id)?;
                return Ok(match current {
                    Some(current) => TransitionResult::Conflict { current },
                    None => TransitionResult::NotFound,
                });
            }

            tx.commit()?;
            Ok(TransitionResult::Applied(receipt))
        })
        .await
    }

    async fn get_receipt(&self, id: &ReceiptId) -> Result<Option<TowerReceipt>> {
        let id = id.as_str().to_string();
        self.run(move |conn| read_receipt(conn, &id)).await
    }

    async fn list_receipts(&self, limit: usize) -> Result<Vec<TowerReceipt>> {
        let limit = limit as i64;
        self.run(move |conn| {
            query_receipts(
                conn,
                "SELECT body FROM receipts ORDER BY uploaded_at DESC, receipt_id DESC LIMIT ?1",
                &[&limit],
            )
        })
        .await
    }

    async fn find_by_manifest_hash(&self, hash: &Blake3Hash) -> Result<Vec<TowerReceipt>> {
        let hash = hash.as_bytes().to_vec();
        self.run(move |conn| {
            query_receipts(
                conn,
                "SELECT body FROM receipts WHERE manifest_hash = ?1
                 ORDER BY uploaded_at ASC, receipt_id ASC",
                &[&hash],
            )
        })
        .await
    }
}

#[async_trait]
impl NonceStore for SqliteStore {
    async fn insert_nonce(
        &self,
        context: &str,
        value: &str,
        expires_at: i64,
        now: i64,
    ) -> Result<bool> {
        let context = context.to_string();
        let value = value.to_string();
        self.run(move |conn| {
            // Single statement: the unique key decides, an expired row is replaced.
            let changed = conn.execute(
                "INSERT INTO nonces (context, value, expires_at, recorded_at) VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(context, value) DO UPDATE
                     SET expires_at = excluded.expires_at, recorded_at = excluded.recorded_at
                     WHERE nonces.expires_at < ?4",
                params![context, value, expires_at, now],
            )?;
            Ok(changed == 1)
        })
        .await
    }

    async fn nonce_active(&self, context: &str, value: &str, now: i64) -> Result<bool> {
        let context = context.to_string();
        let value = value.to_string();
        self.run(move |conn| {
            let found: Option<i64> = conn
                .query_row(
                    "SELECT 1 FROM nonces WHERE context = ?1 AND value = ?2 AND expires_at >= ?3",
                    params![context, value, now],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(found.is_some())
        })
        .await
    }

    async fn prune_nonces(&self, now: i64) -> Result<u64> {
        self.run(move |conn| {
            let tx = conn.transaction()?;
            let deleted = tx.execute("DELETE FROM nonces WHERE expires_at < ?1", params![now])?;
            put_maintenance(&tx, LAST_PRUNE_KEY, now)?;
            tx.commit()?;
            Ok(deleted as u64)
        })
        .await
    }

    async fn nonce_stats(&self, now: i64) -> Result<NonceStats> {
        self.run(move |conn| {
            let size: i64 = conn.query_row("SELECT COUNT(*) FROM nonces", [], |row| row.get(0))?;

            let mut stmt = conn.prepare(
                "SELECT context, COUNT(*) FROM nonces WHERE expires_at >= ?1
                 GROUP BY context ORDER BY context",
            )?;
            let by_context = stmt
                .query_map(params![now], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as u64))
                })?
                .collect::<std::result::Result<BTreeMap<_, _>, _>>()?;
            let active: u64 = by_context.values().sum();

            Ok(NonceStats {
                size: size as u64,
                active,
                expired: (size as u64).saturating_sub(active),
                by_context,
                last_prune_at: get_maintenance(conn, LAST_PRUNE_KEY)?,
            })
        })
        .await
    }

    async fn last_prune_at(&self) -> Result<Option<i64>> {
        self.run(|conn| get_maintenance(conn, LAST_PRUNE_KEY)).await
    }
}

fn get_maintenance(conn: &Connection, name: &str) -> Result<Option<i64>> {
    conn.query_row(
        "SELECT value FROM maintenance WHERE name = ?1",
        params![name],
        |row| row.get(0),
    )
    .optional()
    .map_err(StoreError::from)
}

fn put_maintenance(conn: &Connection, name: &str, value: i64) -> Result<()> {
    conn.execute(
        "INSERT INTO maintenance (name, value) VALUES (?1, ?2)
         ON CONFLICT(name) DO UPDATE SET value = excluded.value",
        params![name, value],
    )?;
    Ok(())
}

#[async_trait]
impl HealthStore for SqliteStore {
    async fn clock_skew(&self) -> Result<Option<ClockSkew>> {
        self.run(|conn| {
            let Some(samples) = get_maintenance(conn, SKEW_SAMPLES_KEY)? else {
                return Ok(None);
            };
            Ok(Some(ClockSkew {
                skew_ms: get_maintenance(conn, SKEW_MS_KEY)?.unwrap_or(0),
                samples: samples.max(0) as u64,
                updated_at: get_maintenance(conn, SKEW_UPDATED_KEY)?,
            }))
        })
        .await
    }

    async fn save_clock_skew(&self, skew: &ClockSkew) -> Result<()> {
        let skew = *skew;
        self.run(move |conn| {
            let tx = conn.transaction()?;
            put_maintenance(&tx, SKEW_MS_KEY, skew.skew_ms)?;
            let samples = i64::try_from(skew.samples).unwrap_or(i64::MAX);
            put_maintenance(&tx, SKEW_SAMPLES_KEY, samples)?;
            if let Some(at) = skew.updated_at {
                put_maintenance(&tx, SKEW_UPDATED_KEY, at)?;
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }
}

#[async_trait]
impl LedgerStore for SqliteStore {
    async fn append_event(
        &self,
        event: &LedgerEvent,
        hash: &Blake3Hash,
        expected_head: Option<Blake3Hash>,
    ) -> Result<AppendResult> {
        let committed_at = event.committed_at.ok_or_else(|| {
            StoreError::InvalidData(format!("ledger event {} has no committed_at", event.event_id))
        })?;
        let body = encode_body(event)?;
        let event_id = event.event_id.clone();
        let idempotency_key = event.idempotency_key.clone();
        let hash = *hash;

        self.run(move |conn| {
            let tx = conn.transaction()?;

            let head: Option<(i64, Vec<u8>)> = tx
                .query_row(
                    "SELECT seq, hash FROM ledger_events ORDER BY seq DESC LIMIT 1",
                    [],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;
            let (head_seq, head_hash) = match head {
                Some((seq, bytes)) => (seq, Some(blob_to_hash(bytes)?)),
                None => (0, None),
            };

            if head_hash != expected_head {
                return Ok(AppendResult::HeadMoved { current: head_hash });
            }

            let id_taken: Option<i64> = tx
                .query_row(
                    "SELECT 1 FROM ledger_events WHERE event_id = ?1",
                    params![event_id],
                    |row| row.get(0),
                )
                .optional()?;
            if id_taken.is_some() {
                return Ok(AppendResult::DuplicateEventId);
            }

            let key_taken: Option<i64> = tx
                .query_row(
                    "SELECT 1 FROM ledger_events WHERE idempotency_key = ?1",
                    params![idempotency_key],
                    |row| row.get(0),
                )
                .optional()?;
            if key_taken.is_some() {
                return Ok(AppendResult::DuplicateIdempotencyKey);
            }

            let seq = head_seq + 1;
            tx.execute(
                "INSERT INTO ledger_events (seq, event_id, idempotency_key, hash, committed_at, body)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    seq,
                    event_id,
                    idempotency_key,
                    hash.as_bytes().as_slice(),
                    committed_at,
                    body,
                ],
            )?;
            tx.commit()?;

            Ok(AppendResult::Appended { seq: seq as u64 })
        })
        .await
    }

    async fn ledger_head(&self) -> Result<Option<(u64, Blake3Hash)>> {
        self.run(|conn| {
            let head: Option<(i64, Vec<u8>)> = conn
                .query_row(
                    "SELECT seq, hash FROM ledger_events ORDER BY seq DESC LIMIT 1",
                    [],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;
            head.map(|(seq, bytes)| Ok((seq as u64, blob_to_hash(bytes)?)))
                .transpose()
        })
        .await
    }

    async fn get_event(&self, event_id: &str) -> Result<Option<LedgerEvent>> {
        let event_id = event_id.to_string();
        self.run(move |conn| {
            let body: Option<Vec<u8>> = conn
                .query_row(
                    "SELECT body FROM ledger_events WHERE event_id = ?1",
                    params![event_id],
                    |row| row.get(0),
                )
                .optional()?;
            body.map(|b| decode_body(&b)).transpose()
        })
        .await
    }

    async fn has_event_id(&self, event_id: &str) -> Result<bool> {
        let event_id = event_id.to_string();
        self.run(move |conn| {
            let found: Option<i64> = conn
                .query_row(
                    "SELECT 1 FROM ledger_events WHERE event_id = ?1",
                    params![event_id],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(found.is_some())
        })
        .await
    }

    async fn has_idempotency_key(&self, key: &str) -> Result<bool> {
        let key = key.to_string();
        self.run(move |conn| {
            let found: Option<i64> = conn
                .query_row(
                    "SELECT 1 FROM ledger_events WHERE idempotency_key = ?1",
                    params![key],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(found.is_some())
        })
        .await
    }

    async fn list_events(&self) -> Result<Vec<LedgerEntry>> {
        self.run(|conn| {
            let mut stmt =
                conn.prepare("SELECT seq, hash, body FROM ledger_events ORDER BY seq ASC")?;
            let rows = stmt
                .query_map([], |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, Vec<u8>>(1)?,
                        row.get::<_, Vec<u8>>(2)?,
                    ))
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            rows.into_iter()
                .map(|(seq, hash, body)| {
                    Ok(LedgerEntry {
                        seq: seq as u64,
                        hash: blob_to_hash(hash)?,
                        event: decode_body(&body)?,
                    })
                })
                .collect()
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{committed_event, receipt};
    use tower_trust_core::ReceiptStatus;

    #[tokio::test]
    async fn test_install_key_retires_previous() {
        let store = SqliteStore::open_memory().unwrap();
        let k1 = SigningKey::generate("k1", 90, 1);
        let k2 = SigningKey::generate("k2", 90, 2);

        assert_eq!(store.install_key(&k1, 1).await.unwrap(), None);
        assert_eq!(store.install_key(&k2, 2).await.unwrap(), Some("k1".into()));

        let active = store.active_key().await.unwrap().unwrap();
        assert_eq!(active.kid, "k2");
        assert_eq!(active.material, k2.material);

        let old = store.get_key("k1").await.unwrap().unwrap();
        assert_eq!(old.status, KeyStatus::Rotated);
        assert_eq!(old.rotated_at, Some(2));
        assert_eq!(old.rotates_at, k1.rotates_at);
    }

    #[tokio::test]
    async fn test_set_key_status_unknown_kid() {
        let store = SqliteStore::open_memory().unwrap();
        assert!(!store.set_key_status("nope", KeyStatus::Revoked, 1).await.unwrap());
    }

    #[tokio::test]
    async fn test_receipt_insert_if_absent() {
        let store = SqliteStore::open_memory().unwrap();
        let r = receipt("rcpt_1_a", 1);
        assert_eq!(store.insert_receipt(&r).await.unwrap(), InsertResult::Inserted);
        assert_eq!(store.insert_receipt(&r).await.unwrap(), InsertResult::AlreadyExists);
        assert_eq!(store.get_receipt(&r.receipt_id).await.unwrap(), Some(r));
    }

    #[tokio::test]
    async fn test_receipt_cas_transition() {
        let store = SqliteStore::open_memory().unwrap();
        let r = receipt("rcpt_1_a", 1);
        store.insert_receipt(&r).await.unwrap();

        let verify = ReceiptTransition {
            expected: ReceiptStatus::Received,
            next: ReceiptStatus::Verified,
            verified_at: Some(10),
            errors: None,
        };
        match store.transition_receipt(&r.receipt_id, verify.clone()).await.unwrap() {
            TransitionResult::Applied(updated) => {
                assert_eq!(updated.status, ReceiptStatus::Verified);
                assert_eq!(updated.verified_at, Some(10));
            }
            other => panic!("unexpected {:?}", other),
        }

        match store.transition_receipt(&r.receipt_id, verify).await.unwrap() {
            TransitionResult::Conflict { current } => {
                assert_eq!(current.status, ReceiptStatus::Verified)
            }
            other => panic!("unexpected {:?}", other),
        }

        let missing = ReceiptId::from("rcpt_0_missing".to_string());
        let t = ReceiptTransition {
            expected: ReceiptStatus::Received,
            next: ReceiptStatus::Rejected,
            verified_at: None,
            errors: None,
        };
        assert_eq!(
            store.transition_receipt(&missing, t).await.unwrap(),
            TransitionResult::NotFound
        );
    }

    #[tokio::test]
    async fn test_list_receipts_newest_first() {
        let store = SqliteStore::open_memory().unwrap();
        for (id, at) in [("rcpt_1_a", 1), ("rcpt_3_c", 3), ("rcpt_2_b", 2)] {
            store.insert_receipt(&receipt(id, at)).await.unwrap();
        }
        let listed = store.list_receipts(2).await.unwrap();
        let ids: Vec<&str> = listed.iter().map(|r| r.receipt_id.as_str()).collect();
        assert_eq!(ids, vec!["rcpt_3_c", "rcpt_2_b"]);
    }

    #[tokio::test]
    async fn test_nonce_upsert_semantics() {
        let store = SqliteStore::open_memory().unwrap();
        assert!(store.insert_nonce("sync", "abc", 100, 0).await.unwrap());
        assert!(!store.insert_nonce("sync", "abc", 200, 50).await.unwrap());
        assert!(store.nonce_active("sync", "abc", 100).await.unwrap());
        assert!(!store.nonce_active("sync", "abc", 101).await.unwrap());

        // Expired but unpruned rows do not block.
        assert!(store.insert_nonce("sync", "abc", 300, 150).await.unwrap());
        assert!(store.nonce_active("sync", "abc", 250).await.unwrap());
    }

    #[tokio::test]
    async fn test_nonce_unique_per_context() {
        let store = SqliteStore::open_memory().unwrap();
        assert!(store.insert_nonce("federation_sync", "n", 100, 0).await.unwrap());
        assert!(store.insert_nonce("governance_ack", "n", 100, 0).await.unwrap());
        assert!(!store.insert_nonce("federation_sync", "n", 100, 1).await.unwrap());
        assert!(store.nonce_active("governance_ack", "n", 50).await.unwrap());
        assert!(!store.nonce_active("other", "n", 50).await.unwrap());

        store.insert_nonce("governance_ack", "old", 5, 0).await.unwrap();
        let stats = store.nonce_stats(50).await.unwrap();
        assert_eq!((stats.size, stats.active, stats.expired), (3, 2, 1));
        assert_eq!(stats.by_context.get("federation_sync"), Some(&1));
        assert_eq!(stats.by_context.get("governance_ack"), Some(&1));
    }

    #[tokio::test]
    async fn test_prune_records_time() {
        let store = SqliteStore::open_memory().unwrap();
        store.insert_nonce("sync", "a", 10, 0).await.unwrap();
        store.insert_nonce("sync", "b", 1_000, 0).await.unwrap();
        assert_eq!(store.last_prune_at().await.unwrap(), None);

        let stats = store.nonce_stats(500).await.unwrap();
        assert_eq!((stats.size, stats.active, stats.expired), (2, 1, 1));

        assert_eq!(store.prune_nonces(500).await.unwrap(), 1);
        let stats = store.nonce_stats(500).await.unwrap();
        assert_eq!(stats.size, 1);
        assert_eq!(stats.last_prune_at, Some(500));
    }

    #[tokio::test]
    async fn test_ledger_append_checks_head_and_duplicates() {
        let store = SqliteStore::open_memory().unwrap();
        let e1 = committed_event(1);
        let h1 = e1.chain_hash().unwrap();

        assert_eq!(
            store.append_event(&e1, &h1, None).await.unwrap(),
            AppendResult::Appended { seq: 1 }
        );
        assert_eq!(
            store.append_event(&e1, &h1, Some(h1)).await.unwrap(),
            AppendResult::DuplicateEventId
        );

        let e2 = committed_event(2);
        let h2 = e2.chain_hash().unwrap();
        assert_eq!(
            store.append_event(&e2, &h2, None).await.unwrap(),
            AppendResult::HeadMoved { current: Some(h1) }
        );

        let mut same_key = committed_event(3);
        same_key.idempotency_key = e1.idempotency_key.clone();
        let hk = same_key.chain_hash().unwrap();
        assert_eq!(
            store.append_event(&same_key, &hk, Some(h1)).await.unwrap(),
            AppendResult::DuplicateIdempotencyKey
        );

        assert_eq!(
            store.append_event(&e2, &h2, Some(h1)).await.unwrap(),
            AppendResult::Appended { seq: 2 }
        );
        assert_eq!(store.ledger_head().await.unwrap(), Some((2, h2)));

        let entries = store.list_events().await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].event, e1);
        assert_eq!(entries[1].event.chain_hash().unwrap(), h2);
    }

    #[tokio::test]
    async fn test_state_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tower.db");

        {
            let store = SqliteStore::open(&path).unwrap();
            store.install_key(&SigningKey::generate("k1", 90, 1), 1).await.unwrap();
            store.insert_receipt(&receipt("rcpt_1_a", 1)).await.unwrap();
            store.insert_nonce("sync", "n", 1_000, 0).await.unwrap();
            store.prune_nonces(5).await.unwrap();
            let skew = ClockSkew::default().observe(40_000, 3);
            store.save_clock_skew(&skew).await.unwrap();
        }

        let store = SqliteStore::open(&path).unwrap();
        assert_eq!(store.active_key().await.unwrap().unwrap().kid, "k1");
        assert!(store
            .get_receipt(&ReceiptId::from("rcpt_1_a".to_string()))
            .await
            .unwrap()
            .is_some());
        assert!(!store.insert_nonce("sync", "n", 2_000, 10).await.unwrap());
        assert_eq!(store.last_prune_at().await.unwrap(), Some(5));

        let skew = store.clock_skew().await.unwrap().unwrap();
        assert_eq!((skew.skew_ms, skew.samples, skew.updated_at), (40_000, 1, Some(3)));
    }

    #[tokio::test]
    async fn test_key_scope_and_usage_persist() {
        let store = SqliteStore::open_memory().unwrap();
        let key = SigningKey::generate("fed", 90, 1)
            .with_scope(KeyScope::Federation)
            .with_usage(KeyUsage::Verification);
        store.install_key(&key, 1).await.unwrap();

        let stored = store.get_key("fed").await.unwrap().unwrap();
        assert_eq!(stored.scope, KeyScope::Federation);
        assert_eq!(stored.usage, KeyUsage::Verification);
    }

    #[tokio::test]
    async fn test_poisoned_connection_is_reported() {
        let store = SqliteStore::open_memory().unwrap();
        let conn = store.conn.clone();
        let _ = std::thread::spawn(move || {
            let _guard = conn.lock().unwrap();
            panic!("writer died holding the connection");
        })
        .join();

        let err = store.active_key().await.unwrap_err();
        assert!(matches!(err, StoreError::Poisoned(_)));
    }
}
