//! Periodic maintenance: nonce pruning and rotation checks.
//!
//! Each tick reads everything it needs from the store, so the task can be
//! started from a cold process without losing track of prior work.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

use tower_trust_core::RotationStatus;
use tower_trust_store::{KeyStore, NonceStore};

use crate::error::{Result, TowerError};
use crate::nonce::NonceGuard;
use crate::registry::KeyRegistry;

/// What one maintenance tick did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaintenanceReport {
    pub pruned: u64,
    /// Rotation status of the active key before any auto-rotation.
    pub rotation: Option<RotationStatus>,
    /// Kid of the key installed by auto-rotation.
    pub rotated_to: Option<String>,
}

/// A maintenance job over one store.
pub struct MaintenanceTask<S> {
    registry: Arc<KeyRegistry<S>>,
    nonces: Arc<NonceGuard<S>>,
    interval: Duration,
    auto_rotate: bool,
}

impl<S: KeyStore + NonceStore + 'static> MaintenanceTask<S> {
    pub fn new(
        registry: Arc<KeyRegistry<S>>,
        nonces: Arc<NonceGuard<S>>,
        interval: Duration,
        auto_rotate: bool,
    ) -> Self {
        Self {
            registry,
            nonces,
            interval,
            auto_rotate,
        }
    }

    /// Run a single tick.
    pub async fn run_once(&self) -> Result<MaintenanceReport> {
        let pruned = self.nonces.prune().await?;

        let rotation = match self.registry.should_rotate().await {
            Ok(status) => Some(status),
            Err(TowerError::NotFound { .. }) => None,
            Err(e) => return Err(e),
        };

        let mut rotated_to = None;
        if self.auto_rotate && rotation.as_ref().is_some_and(|r| r.due) {
            let key = self.registry.rotate().await?;
            info!(kid = %key.kid, "signing key auto-rotated");
            rotated_to = Some(key.kid);
        }

        debug!(pruned, rotation = ?rotation.as_ref().map(|r| r.urgency), "maintenance tick");
        Ok(MaintenanceReport {
            pruned,
            rotation,
            rotated_to,
        })
    }

    /// Start ticking on the runtime until [`MaintenanceHandle::stop`].
    pub fn spawn(self) -> MaintenanceHandle {
        let (stop_tx, mut stop_rx) = watch::channel(false);

        let join = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = self.run_once().await {
                            error!(error = %e, "maintenance tick failed");
                        }
                    }
                    changed = stop_rx.changed() => {
                        if changed.is_err() || *stop_rx.borrow() {
                            break;
                        }
                    }
                }
            }
            debug!("maintenance stopped");
        });

        MaintenanceHandle { stop_tx, join }
    }
}

/// Handle to a spawned [`MaintenanceTask`].
pub struct MaintenanceHandle {
    stop_tx: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl MaintenanceHandle {
    /// Signal the task to stop and wait for it to exit.
    pub async fn stop(self) {
        let _ = self.stop_tx.send(true);
        if let Err(e) = self.join.await {
            error!(error = %e, "maintenance task ended abnormally");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tower_trust_core::{Clock, ManualClock};
    use tower_trust_store::{MemoryStore, NonceStore};

    use crate::config::TowerConfig;

    const NOW: i64 = 1_700_000_000_000;

    fn task(
        config: &TowerConfig,
    ) -> (MaintenanceTask<MemoryStore>, Arc<MemoryStore>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(NOW));
        let store = Arc::new(MemoryStore::new());
        let registry = Arc::new(KeyRegistry::new(store.clone(), clock.clone(), config));
        let nonces = Arc::new(NonceGuard::new(store.clone(), clock.clone(), config));
        let t = MaintenanceTask::new(
            registry,
            nonces,
            config.maintenance_interval,
            config.auto_rotate,
        );
        (t, store, clock)
    }

    #[tokio::test]
    async fn test_run_once_from_cold_start() {
        let (t, store, clock) = task(&TowerConfig::default());
        store
            .insert_nonce(crate::nonce::contexts::FEDERATION_SYNC, "old", NOW + 1_000, NOW)
            .await
            .unwrap();
        clock.advance_secs(5);

        let report = t.run_once().await.unwrap();
        assert_eq!(report.pruned, 1);
        assert_eq!(report.rotation, None);
        assert_eq!(store.last_prune_at().await.unwrap(), Some(clock.now_millis()));

        let again = t.run_once().await.unwrap();
        assert_eq!(again.pruned, 0);
    }

    #[tokio::test]
    async fn test_auto_rotate_when_due() {
        let config = TowerConfig::default().with_auto_rotate(true);
        let (t, _, _) = task(&config);
        let old = t.registry.generate_key(0).await.unwrap();

        let report = t.run_once().await.unwrap();
        assert!(report.rotation.as_ref().unwrap().due);
        let new_kid = report.rotated_to.unwrap();
        assert_ne!(new_kid, old.kid);
        assert_eq!(t.registry.get_active_key().await.unwrap().kid, new_kid);
    }

    #[tokio::test]
    async fn test_no_auto_rotate_by_default() {
        let (t, _, _) = task(&TowerConfig::default());
        t.registry.generate_key(0).await.unwrap();
        let report = t.run_once().await.unwrap();
        assert!(report.rotation.unwrap().due);
        assert_eq!(report.rotated_to, None);
    }

    #[tokio::test]
    async fn test_spawn_and_stop() {
        let config = TowerConfig::default().with_maintenance_interval(Duration::from_millis(10));
        let (t, store, _) = task(&config);
        let handle = t.spawn();

        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.stop().await;
        assert!(store.last_prune_at().await.unwrap().is_some());
    }
}
