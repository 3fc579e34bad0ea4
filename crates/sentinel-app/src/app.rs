//! Application wiring and lifecycle.
//!
//! Boot order: registry store, write queue (journal replay), queue
//! worker, reconciliation against the broker, then readiness. The three
//! manager loops run under the watchdog; the facade server and the
//! shutdown listener run alongside.

use crate::broker::{HttpExitAdjuster, HttpPositionSource, OfflinePositionSource};
use crate::config::{AppConfig, OperatingMode};
use crate::error::{AppError, AppResult};
use crate::reconcile;
use sentinel_defense::DefenseTracker;
use sentinel_facade::{server, AppState};
use sentinel_gates::GateEvaluator;
use sentinel_manager::{
    AlertFlag, DefensiveManager, DryRunExitAdjuster, ExitAdjuster, NoAnalytics, PositionSource,
    ProfitProtectionManager, TicketLockSet, TrailingManager, Watchdog,
};
use sentinel_queue::WriteQueue;
use sentinel_registry::Registry;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};

/// The assembled service.
pub struct Application {
    config: AppConfig,
}

impl Application {
    #[must_use]
    pub fn new(config: AppConfig) -> Self {
        Self { config }
    }

    /// Run until Ctrl+C.
    pub async fn run(self) -> AppResult<()> {
        let config = self.config;
        info!(mode = ?config.mode, "Starting sentinel");

        std::fs::create_dir_all(&config.storage.data_dir)?;
        let registry = Arc::new(Registry::open(config.storage.store_path())?);

        let queue = WriteQueue::open(
            Arc::clone(&registry),
            config.storage.journal_path(),
            (&config.queue).into(),
        )?;
        let worker = queue.spawn_worker();

        let source = build_source(&config)?;
        let adjuster = build_adjuster(&config)?;

        let summary = reconcile::reconcile(&registry, &queue, source.as_ref()).await?;
        if summary.source_unavailable {
            warn!("Starting without a broker view; managers will skip until it returns");
        }

        let (ready_tx, ready_rx) = watch::channel(false);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let alert = Arc::new(AlertFlag::new());
        let locks = TicketLockSet::new();
        let tracker = Arc::new(DefenseTracker::new(config.defense.clone()));

        let trailing = TrailingManager::new(
            Arc::clone(&registry),
            queue.clone(),
            Arc::new(GateEvaluator::new(config.gates.clone())),
            Arc::clone(&source),
            Arc::clone(&adjuster),
            Arc::new(NoAnalytics),
            locks.clone(),
            config.trailing.clone(),
        );
        let profit = ProfitProtectionManager::new(
            Arc::clone(&registry),
            queue.clone(),
            Arc::clone(&source),
            Arc::clone(&adjuster),
            locks.clone(),
            config.profit_protection.clone(),
        );
        let defensive = DefensiveManager::new(
            Arc::clone(&registry),
            queue.clone(),
            tracker,
            Arc::clone(&source),
            Arc::clone(&adjuster),
            locks,
            config.defensive_manager.clone(),
        );

        let mut watchdog = Watchdog::new(config.watchdog.clone(), Arc::clone(&alert));
        {
            let rx = shutdown_rx.clone();
            watchdog.supervise("trailing", move || {
                tokio::spawn(trailing.clone().run(rx.clone()))
            });
        }
        {
            let rx = shutdown_rx.clone();
            watchdog.supervise("profit_protection", move || {
                tokio::spawn(profit.clone().run(rx.clone()))
            });
        }
        {
            let rx = shutdown_rx.clone();
            watchdog.supervise("defensive", move || {
                tokio::spawn(defensive.clone().run(rx.clone()))
            });
        }
        tokio::spawn(watchdog.run(shutdown_rx.clone()));

        if config.facade.enabled {
            let state = AppState::new(
                Arc::clone(&registry),
                queue.clone(),
                ready_rx,
                Arc::clone(&alert),
            );
            let port = config.facade.port;
            tokio::spawn(async move {
                if let Err(e) = server::serve(state, port).await {
                    warn!(error = %e, "Facade server exited");
                }
            });
        }

        // Readiness only after replay and reconciliation are done.
        let _ = ready_tx.send(true);
        info!("Sentinel ready");

        tokio::signal::ctrl_c().await?;
        info!("Shutdown signal received");

        let _ = shutdown_tx.send(true);
        queue.shutdown();
        if let Err(e) = worker.await {
            warn!(error = %e, "Queue worker join failed");
        }
        info!("Sentinel stopped");
        Ok(())
    }
}

fn build_source(config: &AppConfig) -> AppResult<Arc<dyn PositionSource>> {
    if config.broker.base_url.is_empty() {
        warn!("No broker bridge configured, position reads disabled");
        return Ok(Arc::new(OfflinePositionSource));
    }
    let source = HttpPositionSource::new(&config.broker.base_url)
        .map_err(|e| AppError::Config(e.to_string()))?;
    Ok(Arc::new(source))
}

fn build_adjuster(config: &AppConfig) -> AppResult<Arc<dyn ExitAdjuster>> {
    match config.mode {
        OperatingMode::Observation => {
            info!("Observation mode: exit modifications are logged only");
            Ok(Arc::new(DryRunExitAdjuster))
        }
        OperatingMode::Live => {
            if config.broker.base_url.is_empty() {
                return Err(AppError::Config(
                    "live mode requires broker.base_url".to_string(),
                ));
            }
            let adjuster = HttpExitAdjuster::new(&config.broker.base_url)
                .map_err(|e| AppError::Config(e.to_string()))?;
            Ok(Arc::new(adjuster))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_live_mode_requires_bridge_url() {
        let config = AppConfig {
            mode: OperatingMode::Live,
            ..AppConfig::default()
        };
        assert!(matches!(build_adjuster(&config), Err(AppError::Config(_))));
    }

    #[test]
    fn test_observation_mode_never_needs_bridge() {
        let config = AppConfig::default();
        assert!(build_adjuster(&config).is_ok());
        assert!(build_source(&config).is_ok());
    }
}
