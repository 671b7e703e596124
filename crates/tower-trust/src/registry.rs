//! Signing-key registry.
//!
//! Issues keys, tracks their rotation schedule and revocation, and resolves
//! the active key for signing. Keys are never deleted: a rotated key keeps
//! verifying historical signatures, a revoked key never verifies again.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{info, warn};

use tower_trust_core::signing::{self, CoSignature};
use tower_trust_core::key::check_rotation_days;
use tower_trust_core::{
    Clock, KeyMetadata, KeyScope, KeyStatus, KeyUsage, KeyedSignature, RotationPolicy,
    RotationStatus, SecretKey, SigningKey,
};
use tower_trust_store::KeyStore;

use crate::config::TowerConfig;
use crate::error::{Result, TowerError};

/// Key registry backed by a [`KeyStore`].
pub struct KeyRegistry<S> {
    store: Arc<S>,
    clock: Arc<dyn Clock>,
    rotation_days: i64,
    policy: RotationPolicy,
    /// Degraded-mode key derived from the configured secret.
    fallback: Option<SigningKey>,
    /// Serializes key issuance within this process.
    write_lock: Mutex<()>,
}

impl<S: KeyStore> KeyRegistry<S> {
    pub fn new(store: Arc<S>, clock: Arc<dyn Clock>, config: &TowerConfig) -> Self {
        let now = clock.now_millis();
        let fallback = config.fallback_secret.as_deref().map(|secret| {
            SigningKey::from_material(
                config.fallback_key_id.clone(),
                SecretKey::derive_from_secret(secret),
                tower_trust_core::key::DEFAULT_ROTATION_DAYS,
                now,
            )
        });

        Self {
            store,
            clock,
            rotation_days: config.rotation_days,
            policy: config.rotation_policy,
            fallback,
            write_lock: Mutex::new(()),
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Lifecycle
    // ─────────────────────────────────────────────────────────────────────────

    /// Install a fresh active key, retiring the current one.
    ///
    /// `rotation_days` must lie in `0..=MAX_ROTATION_DAYS`.
    pub async fn generate_key(&self, rotation_days: i64) -> Result<SigningKey> {
        let rotation_days = check_rotation_days(rotation_days)?;
        let _guard = self.write_lock.lock().await;

        let now = self.clock.now_millis();
        let key = SigningKey::generate(SigningKey::new_kid(now), rotation_days, now);
        let retired = self.store.install_key(&key, now).await?;

        info!(
            kid = %key.kid,
            scope = key.scope.as_str(),
            rotates_at = key.rotates_at,
            retired = ?retired,
            "signing key installed"
        );
        Ok(key)
    }

    /// Replace the active key with a new one on the configured horizon.
    pub async fn rotate(&self) -> Result<SigningKey> {
        let previous = self.store.active_key().await?.map(|k| k.kid);
        let key = self.generate_key(self.rotation_days).await?;
        info!(old_kid = ?previous, new_kid = %key.kid, "signing key rotated");
        Ok(key)
    }

    /// Revoke a key. It stops verifying immediately.
    pub async fn revoke(&self, kid: &str) -> Result<()> {
        let _guard = self.write_lock.lock().await;

        let now = self.clock.now_millis();
        if !self.store.set_key_status(kid, KeyStatus::Revoked, now).await? {
            return Err(TowerError::not_found("key", kid));
        }
        warn!(kid = %kid, "signing key revoked");
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Lookup
    // ─────────────────────────────────────────────────────────────────────────

    /// The key to sign with.
    ///
    /// Falls back to the env-derived key only while the registry is empty.
    pub async fn get_active_key(&self) -> Result<SigningKey> {
        if let Some(key) = self.store.active_key().await? {
            return Ok(key);
        }

        if let Some(fallback) = &self.fallback {
            if self.store.list_keys().await?.is_empty() {
                warn!(kid = %fallback.kid, "key registry empty, signing with environment key");
                return Ok(fallback.clone());
            }
        }

        Err(TowerError::not_found("active_key", "active"))
    }

    /// Any key by kid, including rotated and revoked ones.
    pub async fn key(&self, kid: &str) -> Result<SigningKey> {
        if let Some(key) = self.store.get_key(kid).await? {
            return Ok(key);
        }
        match &self.fallback {
            Some(fallback) if fallback.kid == kid => Ok(fallback.clone()),
            _ => Err(TowerError::not_found("key", kid)),
        }
    }

    /// The most recently rotated key, if it was retired at or after `since`.
    ///
    /// Revoked keys never qualify.
    pub async fn recently_rotated(&self, since: i64) -> Result<Option<SigningKey>> {
        let keys = self.store.list_keys().await?;
        Ok(keys
            .into_iter()
            .filter(|k| k.status == KeyStatus::Rotated)
            .filter(|k| k.rotated_at.map_or(false, |at| at >= since))
            .max_by_key(|k| k.rotated_at))
    }

    /// Metadata for every stored key, oldest first.
    pub async fn list_keys(&self) -> Result<Vec<KeyMetadata>> {
        let keys = self.store.list_keys().await?;
        Ok(keys.iter().map(SigningKey::metadata).collect())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Rotation schedule
    // ─────────────────────────────────────────────────────────────────────────

    /// Rotation status of the active key.
    pub async fn should_rotate(&self) -> Result<RotationStatus> {
        let key = self.get_active_key().await?;
        let status = key.rotation_status(self.clock.now_millis(), &self.policy);
        if status.urgency.is_alarming() {
            warn!(
                kid = %status.kid,
                days = status.days_until_rotation,
                urgency = ?status.urgency,
                "signing key rotation pressing"
            );
        }
        Ok(status)
    }

    /// Rotation status for every stored key.
    pub async fn rotation_report(&self) -> Result<Vec<KeyReport>> {
        let now = self.clock.now_millis();
        let keys = self.store.list_keys().await?;
        Ok(keys
            .iter()
            .map(|k| KeyReport {
                status: k.status,
                scope: k.scope,
                usage: k.usage,
                rotation: k.rotation_status(now, &self.policy),
            })
            .collect())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Signing
    // ─────────────────────────────────────────────────────────────────────────

    /// Sign with the active key. Returns the signature and its kid.
    pub async fn sign<T: Serialize + ?Sized + Sync>(
        &self,
        payload: &T,
    ) -> Result<(KeyedSignature, String)> {
        let key = self.get_active_key().await?;
        let signature = signing::sign(payload, &key)?;
        Ok((signature, key.kid))
    }

    /// Co-sign next to an external signature with the active key.
    pub async fn co_sign<T: Serialize + ?Sized + Sync>(
        &self,
        payload: &T,
        external_signature: &str,
    ) -> Result<CoSignature> {
        let key = self.get_active_key().await?;
        Ok(signing::co_sign(
            payload,
            external_signature,
            &key,
            self.clock.now_millis(),
        )?)
    }

    /// Verify a signature made by the key `kid`.
    pub async fn verify_with_kid<T: Serialize + ?Sized + Sync>(
        &self,
        payload: &T,
        signature: &str,
        kid: &str,
    ) -> Result<bool> {
        let key = self.key(kid).await?;
        Ok(signing::verify(payload, signature, &key))
    }
}

/// One row of [`KeyRegistry::rotation_report`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyReport {
    pub status: KeyStatus,
    pub scope: KeyScope,
    pub usage: KeyUsage,
    #[serde(flatten)]
    pub rotation: RotationStatus,
}
