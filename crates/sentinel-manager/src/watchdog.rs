//! Watchdog supervisor for the manager loops.
//!
//! Restarts a manager task that died while the system is meant to be
//! running, within a bounded restart budget per time window. Exhausting
//! the budget stops that manager and raises a persistent alert flag; the
//! process itself keeps running.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchdogConfig {
    /// Liveness check interval in seconds.
    #[serde(default = "default_check_interval_secs")]
    pub check_interval_secs: u64,
    /// Restarts allowed per manager within the window.
    #[serde(default = "default_restart_budget")]
    pub restart_budget: usize,
    /// Restart budget window in seconds.
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
}

fn default_check_interval_secs() -> u64 {
    30
}

fn default_restart_budget() -> usize {
    5
}

fn default_window_secs() -> u64 {
    600
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            check_interval_secs: default_check_interval_secs(),
            restart_budget: default_restart_budget(),
            window_secs: default_window_secs(),
        }
    }
}

/// Latched alert raised when a manager exhausts its restart budget.
///
/// Once raised it stays raised until the operator restarts the process;
/// health endpoints surface it.
#[derive(Debug, Default)]
pub struct AlertFlag {
    raised: AtomicBool,
    reasons: parking_lot::Mutex<Vec<String>>,
}

impl AlertFlag {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&self, reason: impl Into<String>) {
        let reason = reason.into();
        error!(reason = %reason, "Persistent alert raised");
        self.raised.store(true, Ordering::SeqCst);
        self.reasons.lock().push(reason);
    }

    #[must_use]
    pub fn is_raised(&self) -> bool {
        self.raised.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn reasons(&self) -> Vec<String> {
        self.reasons.lock().clone()
    }
}

type SpawnFn = Box<dyn Fn() -> JoinHandle<()> + Send>;

struct Supervised {
    name: &'static str,
    spawn: SpawnFn,
    handle: JoinHandle<()>,
    restarts: VecDeque<Instant>,
    stopped: bool,
}

/// Supervises the manager tasks.
pub struct Watchdog {
    entries: Vec<Supervised>,
    alert: Arc<AlertFlag>,
    config: WatchdogConfig,
}

impl Watchdog {
    #[must_use]
    pub fn new(config: WatchdogConfig, alert: Arc<AlertFlag>) -> Self {
        Self {
            entries: Vec::new(),
            alert,
            config,
        }
    }

    /// Spawn a manager task and keep it supervised.
    pub fn supervise(
        &mut self,
        name: &'static str,
        spawn: impl Fn() -> JoinHandle<()> + Send + 'static,
    ) {
        let handle = spawn();
        info!(manager = name, "Manager supervised");
        self.entries.push(Supervised {
            name,
            spawn: Box::new(spawn),
            handle,
            restarts: VecDeque::new(),
            stopped: false,
        });
    }

    /// Periodic liveness loop until shutdown.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker =
            tokio::time::interval(Duration::from_secs(self.config.check_interval_secs));
        info!(
            check_interval_secs = self.config.check_interval_secs,
            restart_budget = self.config.restart_budget,
            window_secs = self.config.window_secs,
            "Watchdog started"
        );
        loop {
            tokio::select! {
                _ = ticker.tick() => self.check(*shutdown.borrow()),
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Watchdog stopped");
                        return;
                    }
                }
            }
        }
    }

    /// One liveness pass. A manager that exits during shutdown is not a
    /// failure; a tick that races the shutdown signal must not respawn it.
    fn check(&mut self, shutting_down: bool) {
        if shutting_down {
            return;
        }
        let window = Duration::from_secs(self.config.window_secs);
        let now = Instant::now();

        for entry in &mut self.entries {
            if entry.stopped || !entry.handle.is_finished() {
                continue;
            }

            while let Some(&oldest) = entry.restarts.front() {
                if now.duration_since(oldest) > window {
                    entry.restarts.pop_front();
                } else {
                    break;
                }
            }

            if entry.restarts.len() >= self.config.restart_budget {
                entry.stopped = true;
                self.alert.raise(format!(
                    "manager '{}' exceeded restart budget ({} per {:?})",
                    entry.name, self.config.restart_budget, window
                ));
                continue;
            }

            entry.restarts.push_back(now);
            warn!(
                manager = entry.name,
                restarts_in_window = entry.restarts.len(),
                "Manager task dead, restarting"
            );
            entry.handle = (entry.spawn)();
        }
    }
}
