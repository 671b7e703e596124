//! End-to-end behaviour of a Tower over the in-memory store.

use std::time::Duration;

use serde_json::json;
use tower_trust::core::{
    compute_root, Blake3Hash, ChainError, Clock, DigestRequest, ReceiptId, ReceiptStatus,
    SignedEvent, SkewStatus, Urgency,
};
use tower_trust::{contexts, TowerConfig, TowerError};
use tower_trust_testkit::{digest_request, sample_manifest, ManifestBuilder, TowerFixture, FIXED_NOW};

// ─────────────────────────────────────────────────────────────────────────────
// Receipt state machine
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_upload_then_acknowledge() {
    let f = TowerFixture::new().await;
    let h1 = Blake3Hash::hash(b"first file");
    let h2 = Blake3Hash::hash(b"second file");
    let (lo, hi) = if h1 < h2 { (h1, h2) } else { (h2, h1) };

    let request = ManifestBuilder::new()
        .file_hash("a.bin", h1)
        .file_hash("b.bin", h2)
        .root(Blake3Hash::combine(&lo, &hi))
        .build();

    let upload = f.tower.upload(&request).await.unwrap();
    assert_eq!(upload.status, ReceiptStatus::Received);
    assert_eq!(upload.uploaded_at, FIXED_NOW);
    assert_eq!(upload.echo_root, Blake3Hash::combine(&lo, &hi));

    f.clock.advance(1_250);
    let ack = f.tower.acknowledge(upload.receipt_id.as_str()).await.unwrap();
    assert_eq!(ack.status, ReceiptStatus::Verified);
    assert_eq!(ack.verified_at, Some(FIXED_NOW + 1_250));

    f.clock.advance(10_000);
    let again = f.tower.acknowledge(upload.receipt_id.as_str()).await.unwrap();
    assert_eq!(again.verified_at, ack.verified_at);
    assert_eq!(again, ack);
}

#[tokio::test]
async fn test_root_mismatch_persists_nothing() {
    let f = TowerFixture::new().await;
    let request = sample_manifest().root(Blake3Hash::hash(b"unrelated")).build();

    let err = f.tower.upload(&request).await.unwrap_err();
    assert_eq!(err.status_code(), 400);
    assert_eq!(err.error_code(), "root_mismatch");

    assert!(f.tower.receipts().list_receipts(10).await.unwrap().is_empty());

    let fresh = ReceiptId::generate(f.clock.now_millis());
    let err = f.tower.acknowledge(fresh.as_str()).await.unwrap_err();
    assert_eq!(err.status_code(), 404);
}

#[tokio::test]
async fn test_validation_order_and_reasons() {
    let f = TowerFixture::new().await;

    let no_files = ManifestBuilder::new().root(Blake3Hash::hash(b"r")).build();
    let err = f.tower.upload(&no_files).await.unwrap_err();
    assert_eq!((err.error_code(), err.reason()), ("invalid_manifest", Some("missing_files")));

    let mut body = sample_manifest().to_json();
    body["manifest"]["merkleRoot"] = json!("not hex");
    let err = f
        .tower
        .upload(&serde_json::from_value(body).unwrap())
        .await
        .unwrap_err();
    assert_eq!(err.reason(), Some("missing_root"));

    let err = f
        .tower
        .upload(&sample_manifest().signature("").build())
        .await
        .unwrap_err();
    assert_eq!(err.reason(), Some("missing_signature"));
    assert_eq!(err.to_string(), "invalid_manifest(missing_signature)");
}

#[tokio::test]
async fn test_reupload_creates_new_receipt() {
    let f = TowerFixture::new().await;
    let request = sample_manifest().build();

    let first = f.tower.upload(&request).await.unwrap();
    f.clock.advance(1);
    let second = f.tower.upload(&request).await.unwrap();
    assert_ne!(first.receipt_id, second.receipt_id);

    let stored = f.tower.receipts().fetch_receipt(first.receipt_id.as_str()).await.unwrap();
    let same = f
        .tower
        .receipts()
        .find_by_manifest_hash(&stored.manifest_hash)
        .await
        .unwrap();
    assert_eq!(same.len(), 2);
    assert_eq!(same[0].receipt_id, first.receipt_id);
}

#[tokio::test]
async fn test_fetch_is_pure_and_reject_is_terminal() {
    let f = TowerFixture::new().await;
    let upload = f.tower.upload(&sample_manifest().build()).await.unwrap();
    let id = upload.receipt_id.as_str();

    let fetched = f.tower.receipts().fetch_receipt(id).await.unwrap();
    assert_eq!(fetched.status, ReceiptStatus::Received);

    let rejected = f
        .tower
        .receipts()
        .reject_receipt(id, vec!["factory signature unknown".into()])
        .await
        .unwrap();
    assert_eq!(rejected.status, ReceiptStatus::Rejected);

    let ack = f.tower.acknowledge(id).await.unwrap();
    assert_eq!(ack.status, ReceiptStatus::Rejected);
    assert_eq!(ack.verified_at, None);

    let err = f.tower.receipts().reject_receipt(id, vec![]).await.unwrap_err();
    assert!(matches!(err, TowerError::Conflict(_)));
}

#[tokio::test]
async fn test_concurrent_acknowledge_agrees() {
    let f = TowerFixture::new().await;
    let upload = f.tower.upload(&sample_manifest().build()).await.unwrap();
    f.clock.advance(40);

    let id = upload.receipt_id.as_str();
    let (a, b) = tokio::join!(f.tower.acknowledge(id), f.tower.acknowledge(id));
    assert_eq!(a.unwrap().verified_at, b.unwrap().verified_at);
}

// ─────────────────────────────────────────────────────────────────────────────
// Keys
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_rotation_due() {
    let f = TowerFixture::new().await;
    let fresh = f.tower.keys().should_rotate().await.unwrap();
    assert!(!fresh.due);
    assert_eq!(fresh.days_until_rotation, 90);
    assert_eq!(fresh.urgency, Urgency::Ok);

    f.tower.keys().generate_key(0).await.unwrap();
    let immediate = f.tower.keys().should_rotate().await.unwrap();
    assert!(immediate.due);
    assert_eq!(immediate.urgency, Urgency::Overdue);
}

#[tokio::test]
async fn test_rotated_key_still_verifies_receipts() {
    let f = TowerFixture::new().await;
    let upload = f.tower.upload(&sample_manifest().build()).await.unwrap();
    let receipt = f
        .tower
        .receipts()
        .fetch_receipt(upload.receipt_id.as_str())
        .await
        .unwrap();

    f.tower.keys().rotate().await.unwrap();
    let old_kid = &receipt.signatures.tower_kid;
    assert_ne!(&f.tower.keys().get_active_key().await.unwrap().kid, old_kid);

    let signature = receipt.signatures.tower_signature.to_hex();
    assert!(f
        .tower
        .keys()
        .verify_with_kid(&receipt.manifest, &signature, old_kid)
        .await
        .unwrap());
    assert_eq!(f.tower.keys().list_keys().await.unwrap().len(), 2);

    f.tower.keys().revoke(old_kid).await.unwrap();
    assert!(!f
        .tower
        .keys()
        .verify_with_kid(&receipt.manifest, &signature, old_kid)
        .await
        .unwrap());
}

// ─────────────────────────────────────────────────────────────────────────────
// Replay and events
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_replay_rejected_until_expiry() {
    let f = TowerFixture::new().await;
    let nonces = f.tower.nonces();
    let ttl = Duration::from_secs(60);

    assert!(nonces.record_with_ttl(contexts::FEDERATION_SYNC, "abc", ttl).await.unwrap());
    assert!(!nonces.record_with_ttl(contexts::FEDERATION_SYNC, "abc", ttl).await.unwrap());

    f.clock.advance_secs(61);
    nonces.prune().await.unwrap();
    assert!(nonces.record_with_ttl(contexts::FEDERATION_SYNC, "abc", ttl).await.unwrap());
}

#[tokio::test]
async fn test_same_nonce_in_two_contexts() {
    let f = TowerFixture::new().await;
    let nonces = f.tower.nonces();
    let ttl = Duration::from_secs(60);

    assert!(nonces.record_with_ttl(contexts::FEDERATION_SYNC, "n-7", ttl).await.unwrap());
    assert!(nonces.record_with_ttl(contexts::GOVERNANCE_ACK, "n-7", ttl).await.unwrap());
    assert!(!nonces.record_with_ttl(contexts::GOVERNANCE_ACK, "n-7", ttl).await.unwrap());

    let stats = nonces.stats().await.unwrap();
    assert_eq!(stats.by_context.get(contexts::FEDERATION_SYNC), Some(&1));
    assert_eq!(stats.by_context.get(contexts::GOVERNANCE_ACK), Some(&1));
}

#[tokio::test]
async fn test_event_chain_lineage_break_at_one() {
    let f = TowerFixture::new().await;
    let signer = f.tower.signer();

    let e0 = signer.sign("proof.signed", json!({"step": 0}), None).await.unwrap();
    f.clock.advance(5);
    let e1 = signer.sign_chain_next("proof.signed", json!({"step": 1}), &e0).await.unwrap();
    f.clock.advance(5);
    let e2 = signer.sign_chain_next("proof.signed", json!({"step": 2}), &e1).await.unwrap();

    f.tower
        .events()
        .verify_chain(&[e0.clone(), e1.clone(), e2.clone()])
        .await
        .unwrap();

    let mut corrupted = e1;
    corrupted.prev_signature = Some(e2.signature.clone());
    let err = f.tower.events().verify_chain(&[e0, corrupted, e2]).await.unwrap_err();
    match err {
        TowerError::Chain(ChainError::LineageBreak { index }) => assert_eq!(index, 1),
        other => panic!("unexpected {:?}", other),
    }
}

#[tokio::test]
async fn test_event_accepted_once() {
    let f = TowerFixture::new().await;
    let event = f.tower.signer().sign("t", json!({}), None).await.unwrap();
    f.tower.events().accept(&event).await.unwrap();
    let err = f.tower.events().accept(&event).await.unwrap_err();
    assert_eq!(err.error_code(), "replay");
}

#[tokio::test]
async fn test_event_from_before_rotation_accepted() {
    let f = TowerFixture::new().await;
    let event = f.tower.signer().sign("t", json!({"batch": 3}), None).await.unwrap();

    f.clock.advance_secs(30);
    f.tower.keys().rotate().await.unwrap();
    f.tower.events().accept(&event).await.unwrap();

    f.clock.advance_secs(300);
    let late = f.tower.signer().sign("t", json!({"batch": 4}), None).await.unwrap();
    f.tower.events().accept(&late).await.unwrap();
}

// ─────────────────────────────────────────────────────────────────────────────
// Digest and health
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_digest_signed_with_active_key() {
    let f = TowerFixture::new().await;
    let root = compute_root(&[Blake3Hash::hash(b"d")]).unwrap().to_hex();
    let out = f
        .tower
        .verify_digest(&digest_request("2024-02-29", &root))
        .await
        .unwrap();
    assert!(out.verified);
    assert_eq!(
        out.tower_kid,
        f.tower.keys().get_active_key().await.unwrap().kid
    );

    let err = f
        .tower
        .verify_digest(&digest_request("2023-02-29", &root))
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "invalid_digest(date_format)");
}

#[tokio::test]
async fn test_digest_record_count_must_be_integer() {
    let f = TowerFixture::new().await;
    let root = compute_root(&[Blake3Hash::hash(b"d")]).unwrap().to_hex();

    for bad in [json!("1234"), json!(-3), json!(2.5)] {
        let request: DigestRequest = serde_json::from_value(json!({
            "digest": {"date": "2024-03-01", "merkleRoot": root, "recordCount": bad}
        }))
        .unwrap();
        let err = f.tower.verify_digest(&request).await.unwrap_err();
        assert_eq!(err.status_code(), 400);
        assert_eq!(err.to_string(), "invalid_digest(record_count)");
    }
}

#[tokio::test]
async fn test_health_reflects_window() {
    let config = TowerConfig::default().with_panic_error_rate(0.25);
    let f = TowerFixture::with_config(config).await;

    for latency in [100, 200, 300] {
        let up = f.tower.upload(&sample_manifest().build()).await.unwrap();
        f.clock.advance(latency);
        f.tower.acknowledge(up.receipt_id.as_str()).await.unwrap();
    }
    let bad = f.tower.upload(&sample_manifest().build()).await.unwrap();
    f.tower
        .receipts()
        .reject_receipt(bad.receipt_id.as_str(), vec!["bad".into()])
        .await
        .unwrap();

    let health = f.tower.health().await.unwrap();
    assert_eq!(health.receipts.window, 4);
    assert_eq!(health.receipts.verified, 3);
    assert_eq!(health.receipts.rejected, 1);
    assert_eq!(health.ack_latency.p50_ms, 200);
    assert_eq!(health.ack_latency.p95_ms, 300);
    assert!(!health.panic_mode.active);

    let second = f.tower.upload(&sample_manifest().build()).await.unwrap();
    f.tower
        .receipts()
        .reject_receipt(second.receipt_id.as_str(), vec!["bad".into()])
        .await
        .unwrap();
    let health = f.tower.health().await.unwrap();
    assert!(health.panic_mode.active);
    assert_eq!(health.panic_mode.triggers, vec!["error_rate".to_string()]);
}

#[tokio::test]
async fn test_health_reports_peer_clock_skew() {
    let f = TowerFixture::new().await;
    let key = f.tower.keys().get_active_key().await.unwrap();
    let from_peer = |ahead_ms: i64, n: u32| {
        SignedEvent::sign(
            "t",
            json!({"n": n}),
            None,
            "tower-local",
            FIXED_NOW + ahead_ms,
            &key,
        )
        .unwrap()
    };

    let health = f.tower.health().await.unwrap();
    assert_eq!(health.clock_skew.samples, 0);
    assert_eq!(health.clock_skew.status, SkewStatus::Ok);

    f.tower.events().verify(&from_peer(50_000, 1)).await.unwrap();
    let health = f.tower.health().await.unwrap();
    assert_eq!(health.clock_skew.skew_ms, 50_000);
    assert_eq!(health.clock_skew.status, SkewStatus::Warn);
    assert!(!health.panic_mode.active);

    let _ = f.tower.events().verify(&from_peer(-600_000, 2)).await;
    let health = f.tower.health().await.unwrap();
    assert_eq!(health.clock_skew.skew_ms, -145_000);
    assert_eq!(health.clock_skew.status, SkewStatus::Fail);
    assert_eq!(health.panic_mode.triggers, vec!["clock_skew".to_string()]);
}

#[tokio::test]
async fn test_health_without_keys() {
    let f = TowerFixture::without_key(
        tower_trust::store::MemoryStore::new(),
        TowerConfig::default(),
        std::sync::Arc::new(tower_trust::NoopExecutor),
    );
    let health = f.tower.health().await.unwrap();
    assert_eq!(health.key_rotation, None);
    assert_eq!(health.generated_at, FIXED_NOW);
}
