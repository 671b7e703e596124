//! # Tower Trust
//!
//! Trust services for a Tower node: signing keys, replay protection, the
//! receipt protocol and the governed ledger.
//!
//! ## Overview
//!
//! - **Keys**: one active keyed-BLAKE3 signing key at a time, rotated on a
//!   schedule and retained for verification after rotation
//! - **Replay**: every nonce or event signature is admitted once within its TTL
//! - **Receipts**: uploaded manifests are checked against their Merkle root,
//!   co-signed and acknowledged through a `received -> verified` lifecycle
//! - **Events**: signed events with freshness, allowlist and lineage checks;
//!   verified timestamps feed a persisted clock-skew average
//! - **Ledger**: governed events committed through validate, execute, seal
//!   and commit, each sealed against its predecessor
//!
//! ## Usage
//!
//! ```rust,no_run
//! use tower_trust::{Tower, TowerConfig};
//! use tower_trust::store::SqliteStore;
//!
//! async fn example() {
//!     let store = SqliteStore::open("tower.db").unwrap();
//!     let tower = Tower::new(store, TowerConfig::from_env());
//!
//!     tower.keys().generate_key(90).await.unwrap();
//!
//!     let maintenance = tower.maintenance().spawn();
//!     let health = tower.health().await.unwrap();
//!     println!("panic mode: {}", health.panic_mode.active);
//!     maintenance.stop().await;
//! }
//! ```
//!
//! ## Re-exports
//!
//! - `tower_trust::core` - hashing, canonical JSON, manifests, receipts, ledger events
//! - `tower_trust::store` - storage traits, SQLite and in-memory backends

pub mod commit;
pub mod config;
pub mod error;
pub mod events;
pub mod health;
pub mod maintenance;
pub mod nonce;
pub mod protocol;
pub mod registry;
pub mod tower;

pub use tower_trust_core as core;
pub use tower_trust_store as store;

pub use commit::{
    CommitError, CommitOptions, CommitOutcome, CommitStage, LedgerCommitter, LedgerExecutor,
    LedgerReport, NoopExecutor,
};
pub use config::TowerConfig;
pub use error::{Result, TowerError};
pub use events::{EventGate, EventSigner};
pub use health::{
    ClockSkewTracker, HealthSnapshot, LatencySummary, PanicMode, ReceiptCounts, SkewSummary,
};
pub use maintenance::{MaintenanceHandle, MaintenanceReport, MaintenanceTask};
pub use nonce::{contexts, NonceGuard};
pub use protocol::ReceiptProtocol;
pub use registry::{KeyRegistry, KeyReport};
pub use tower::Tower;
