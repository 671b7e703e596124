//! # Tower Trust Store
//!
//! Durable state for the Tower trust layer: signing keys, receipts, replay
//! nonces and the committed ledger. Each concern sits behind its own async
//! trait; [`TowerStore`] bundles them for the services.
//!
//! ## Key Types
//!
//! - [`KeyStore`], [`ReceiptStore`], [`NonceStore`], [`HealthStore`], [`LedgerStore`] - storage contracts
//! - [`SqliteStore`] - SQLite-based persistent storage
//! - [`MemoryStore`] - In-memory storage for tests
//!
//! ## Usage
//!
//! ```rust,no_run
//! use tower_trust_store::{KeyStore, SqliteStore};
//!
//! async fn example() {
//!     let store = SqliteStore::open("tower.db").unwrap();
//!     let active = store.active_key().await.unwrap();
//!     println!("active key: {:?}", active.map(|k| k.kid));
//! }
//! ```
//!
//! ## Design Notes
//!
//! - **Single active key**: enforced by a partial unique index
//! - **Insert-if-absent nonces**: one upsert statement decides the winner, per context
//! - **Compare-and-swap receipts**: status updates are guarded by the expected status
//! - **Append-only ledger**: appends check the head hash inside the transaction

pub mod error;
pub mod memory;
pub mod migration;
pub mod sqlite;
pub mod traits;

#[cfg(test)]
mod test_support;

pub use error::{Result, StoreError};
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use traits::{
    AppendResult, HealthStore, InsertResult, KeyStore, LedgerEntry, LedgerStore, NonceStats,
    NonceStore, ReceiptStore, ReceiptTransition, TowerStore, TransitionResult,
};
