//! Periodic housekeeping registered at startup.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use pulse_core::records::{ModelRecord, ModelStatus};
use pulse_core::{DashboardEvent, Priority};
use pulse_runtime::CleanupPolicy;
use rand::Rng;
use tracing::{debug, info, warn};

use crate::server::AppState;
use crate::store::DashboardStore;
use crate::training::artifact_path;
use crate::websocket::broadcast::BroadcastBus;

/// Period of the stale connection sweep.
const STALE_SWEEP_INTERVAL: Duration = Duration::from_secs(60);
/// Largest accuracy move per drift tick.
const DRIFT_STEP: f64 = 0.005;
const DRIFT_FLOOR: f64 = 0.5;
const DRIFT_CEILING: f64 = 0.99;

/// Register every housekeeping task on the state's scheduler. Does not
/// start them.
pub fn register_all(state: &AppState) {
    let config = &state.config;
    let scheduler = &state.scheduler;

    let sampler = Arc::clone(&state.sampler);
    scheduler.register_async("system_metrics", config.metrics_interval, Duration::ZERO, move || {
        let sampler = Arc::clone(&sampler);
        async move {
            let _ = sampler.tick();
            anyhow::Ok(())
        }
    });

    let cache = Arc::clone(&state.cache);
    scheduler.register_blocking(
        "cache_cleanup",
        config.cache_cleanup_interval,
        config.cache_cleanup_interval,
        move || {
            let removed = cache.cleanup_expired();
            if removed > 0 {
                debug!(removed, "purged expired cache entries");
            }
            Ok(())
        },
    );

    let registry = Arc::clone(&state.registry);
    scheduler.register_async(
        "stale_connections",
        STALE_SWEEP_INTERVAL,
        STALE_SWEEP_INTERVAL,
        move || {
            let registry = Arc::clone(&registry);
            async move {
                let _ = registry.sweep_stale().await;
                anyhow::Ok(())
            }
        },
    );

    let store = Arc::clone(&state.store);
    let bus = Arc::clone(&state.bus);
    scheduler.register_blocking(
        "accuracy_drift",
        config.accuracy_drift_interval,
        config.accuracy_drift_interval,
        move || {
            let _ = drift_accuracies(&store, &bus, &mut rand::rng());
            Ok(())
        },
    );

    if config.cleanup_enabled {
        let policy = CleanupPolicy::new(
            "uploads",
            config.uploads_dir.clone(),
            config.upload_max_age,
            &config.upload_extensions,
        );
        scheduler.register_blocking(
            "upload_cleanup",
            config.upload_cleanup_interval,
            config.upload_cleanup_initial_delay,
            move || {
                let report = policy.sweep()?;
                if !report.removed.is_empty() {
                    info!(
                        removed = report.removed.len(),
                        bytes_freed = report.bytes_freed,
                        "removed old uploads"
                    );
                }
                Ok(())
            },
        );

        let store = Arc::clone(&state.store);
        let models_dir = config.models_dir.clone();
        let max_inactive = config.model_max_inactive;
        scheduler.register_blocking(
            "model_cleanup",
            config.upload_cleanup_interval,
            config.upload_cleanup_initial_delay,
            move || {
                let removed = remove_inactive_models(&store, &models_dir, max_inactive, Utc::now());
                if !removed.is_empty() {
                    info!(removed = removed.len(), "removed inactive models");
                }
                Ok(())
            },
        );
    }
}

/// Whether `model` is eligible for removal at `now`. Deployed models never are.
fn is_inactive(model: &ModelRecord, max_inactive: Duration, now: DateTime<Utc>) -> bool {
    model.status != ModelStatus::Deployed
        && (now - model.last_activity())
            .to_std()
            .is_ok_and(|idle| idle > max_inactive)
}

/// Drop undeployed models idle for longer than `max_inactive` and delete
/// their artifacts. Returns the removed records.
pub fn remove_inactive_models(
    store: &DashboardStore,
    models_dir: &Path,
    max_inactive: Duration,
    now: DateTime<Utc>,
) -> Vec<ModelRecord> {
    let removed = store.remove_models_where(|m| is_inactive(m, max_inactive, now));
    for model in &removed {
        let artifact = artifact_path(models_dir, &model.id);
        match std::fs::remove_file(&artifact) {
            Ok(()) => debug!(model_id = %model.id, "removed inactive model artifact"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %artifact.display(), error = %e, "failed to remove model artifact"),
        }
    }
    removed
}

/// Nudge the score of every active or deployed model and broadcast the new
/// values at low priority. Returns how many models moved.
pub fn drift_accuracies(store: &DashboardStore, bus: &BroadcastBus, rng: &mut impl Rng) -> usize {
    let live = |status: ModelStatus| matches!(status, ModelStatus::Active | ModelStatus::Deployed);
    let drifted: Vec<_> = store
        .update_all_models(|model| {
            if live(model.status) {
                let step = rng.random_range(-DRIFT_STEP..=DRIFT_STEP);
                model.accuracy = (model.accuracy + step).clamp(DRIFT_FLOOR, DRIFT_CEILING);
            }
        })
        .into_iter()
        .filter(|model| live(model.status))
        .collect();
    for model in &drifted {
        let _ = bus.broadcast_event(
            &DashboardEvent::ModelMetrics {
                model_id: model.id.clone(),
                accuracy: model.accuracy,
                predictions_made: model.predictions_made,
            },
            Priority::Low,
        );
    }
    drifted.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::test_state;
    use crate::websocket::registry::{ConnectionRegistry, RegistryConfig};
    use crate::websocket::transport::{ChannelTransport, Outbound};
    use chrono::Utc;
    use pulse_core::ModelId;
    use pulse_core::records::ModelRecord;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn model(accuracy: f64) -> ModelRecord {
        ModelRecord {
            id: ModelId::new(),
            name: "baseline".into(),
            model_type: "automatic".into(),
            accuracy,
            status: ModelStatus::Active,
            created_at: Utc::now(),
            deployed_at: None,
            predictions_made: 3,
            feature_names: vec!["x".into()],
            target_column: "y".into(),
            predicted_label: "1".into(),
            training_rows: 10,
            last_used: None,
        }
    }

    #[tokio::test]
    async fn drift_stays_within_bounds() {
        let store = DashboardStore::default();
        let registry = Arc::new(ConnectionRegistry::new(RegistryConfig::default()));
        let bus = BroadcastBus::new(Arc::clone(&registry));
        let (t, mut rx) = ChannelTransport::new(64);
        let _ = registry.connect(Arc::new(t), None).await.unwrap();

        let high = model(0.99);
        let low = model(0.5);
        let (high_id, low_id) = (high.id.clone(), low.id.clone());
        store.insert_model(high);
        store.insert_model(low);

        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..50 {
            assert_eq!(drift_accuracies(&store, &bus, &mut rng), 2);
            for id in [&high_id, &low_id] {
                let acc = store.model(id).unwrap().accuracy;
                assert!((DRIFT_FLOOR..=DRIFT_CEILING).contains(&acc), "accuracy {acc} out of range");
            }
        }

        let Ok(Outbound::Text(frame)) = rx.try_recv() else {
            panic!("expected a model_metrics frame");
        };
        let v: serde_json::Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(v["type"], "model_metrics");
        assert_eq!(v["predictions_made"], 3);
    }

    #[test]
    fn drift_moves_at_most_one_step() {
        let store = DashboardStore::default();
        let bus = BroadcastBus::new(Arc::new(ConnectionRegistry::new(RegistryConfig::default())));
        let m = model(0.8);
        let id = m.id.clone();
        store.insert_model(m);
        let mut rng = StdRng::seed_from_u64(1);
        let _ = drift_accuracies(&store, &bus, &mut rng);
        let acc = store.model(&id).unwrap().accuracy;
        assert!((acc - 0.8).abs() <= DRIFT_STEP + 1e-12);
    }

    #[test]
    fn inactive_models_are_removed_with_their_artifacts() {
        let tmp = tempfile::tempdir().unwrap();
        let store = DashboardStore::default();
        let now = Utc::now();
        let fortnight = Duration::from_secs(14 * 86_400);

        let mut stale = model(0.8);
        stale.created_at = now - chrono::Duration::days(20);
        let mut recently_used = model(0.8);
        recently_used.created_at = now - chrono::Duration::days(20);
        recently_used.last_used = Some(now - chrono::Duration::days(2));
        let mut deployed = model(0.8);
        deployed.created_at = now - chrono::Duration::days(60);
        deployed.status = ModelStatus::Deployed;
        let fresh = model(0.8);

        let stale_id = stale.id.clone();
        std::fs::write(artifact_path(tmp.path(), &stale_id), "{}").unwrap();
        for m in [stale, recently_used, deployed, fresh] {
            store.insert_model(m);
        }

        let removed = remove_inactive_models(&store, tmp.path(), fortnight, now);
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].id, stale_id);
        assert_eq!(store.model_count(), 3);
        assert!(store.model(&stale_id).is_none());
        assert!(!artifact_path(tmp.path(), &stale_id).exists());
    }

    #[tokio::test]
    async fn registers_every_task() {
        let state = test_state();
        register_all(&state);
        let status = state.scheduler.status();
        let ids: Vec<&str> = status.keys().map(String::as_str).collect();
        assert_eq!(
            ids,
            vec![
                "accuracy_drift",
                "cache_cleanup",
                "model_cleanup",
                "stale_connections",
                "system_metrics",
                "upload_cleanup"
            ]
        );
        assert_eq!(status["system_metrics"].kind, "async");
        assert_eq!(status["upload_cleanup"].kind, "blocking");
        assert_eq!(status["model_cleanup"].kind, "blocking");
        assert!((status["stale_connections"].interval_secs - 60.0).abs() < 1e-9);
    }
}
