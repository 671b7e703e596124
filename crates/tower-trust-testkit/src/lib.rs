//! # Tower Trust Testkit
//!
//! Testing utilities for the Tower trust services.
//!
//! ## Overview
//!
//! This crate provides:
//!
//! - **Fixtures**: Towers on a manual clock, manifest and digest bodies,
//!   ledger events and canned ledger executors
//! - **Generators**: Proptest strategies for hashes, manifests, nonces and payloads
//!
//! ## Test Fixtures
//!
//! ```rust,no_run
//! use tower_trust_testkit::fixtures::{sample_manifest, TowerFixture, FIXED_NOW};
//!
//! async fn example() {
//!     let fixture = TowerFixture::new().await;
//!     let upload = fixture.tower.upload(&sample_manifest().build()).await.unwrap();
//!     fixture.clock.advance(250);
//!     let ack = fixture.tower.acknowledge(upload.receipt_id.as_str()).await.unwrap();
//!     assert_eq!(ack.verified_at, Some(FIXED_NOW + 250));
//! }
//! ```
//!
//! ## Property Testing
//!
//! ```rust,ignore
//! use proptest::prelude::*;
//! use tower_trust_testkit::generators::manifest;
//!
//! proptest! {
//!     #[test]
//!     fn generated_manifests_validate(builder in manifest(8)) {
//!         prop_assert!(builder.build().validate().is_ok());
//!     }
//! }
//! ```

pub mod fixtures;
pub mod generators;

pub use fixtures::{
    digest_request, ledger_event, sample_manifest, FailingExecutor, ManifestBuilder,
    StaticExecutor, TowerFixture, FIXED_NOW,
};
