//! Per-ticket defense tracking with input staleness.

use crate::transitions::{step_toward, target_for_score};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use sentinel_core::{DefensiveState, Ticket};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Defense scoring configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefenseConfig {
    /// Score at or above which WARNING_L1 is targeted.
    #[serde(default = "default_l1_threshold")]
    pub l1_threshold: f64,
    /// Score at or above which WARNING_L2 is targeted.
    #[serde(default = "default_l2_threshold")]
    pub l2_threshold: f64,
    /// Score at or above which HEDGED is targeted.
    #[serde(default = "default_hedge_threshold")]
    pub hedge_threshold: f64,
    /// Seconds without a score reading before the input counts as stale.
    #[serde(default = "default_stale_after_secs")]
    pub stale_after_secs: u64,
}

fn default_l1_threshold() -> f64 {
    0.4
}

fn default_l2_threshold() -> f64 {
    0.65
}

fn default_hedge_threshold() -> f64 {
    0.85
}

fn default_stale_after_secs() -> u64 {
    90
}

impl Default for DefenseConfig {
    fn default() -> Self {
        Self {
            l1_threshold: default_l1_threshold(),
            l2_threshold: default_l2_threshold(),
            hedge_threshold: default_hedge_threshold(),
            stale_after_secs: default_stale_after_secs(),
        }
    }
}

/// Outcome of one defense evaluation for a ticket.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Assessment {
    /// Next state to persist, `None` when the current state holds.
    pub proposed: Option<DefensiveState>,
    /// The scoring input is stale; the current state is being held.
    pub stale: bool,
}

#[derive(Debug, Clone, Copy)]
struct ScoreReading {
    score: f64,
    at: DateTime<Utc>,
}

/// Tracks the risk-score feed per ticket and proposes state transitions.
///
/// The tracker owns no persisted state: the registry record is
/// authoritative for `defensive_state`, and the defensive manager submits
/// every proposed transition through the write queue.
pub struct DefenseTracker {
    config: DefenseConfig,
    readings: DashMap<Ticket, ScoreReading>,
}

impl DefenseTracker {
    #[must_use]
    pub fn new(config: DefenseConfig) -> Self {
        Self {
            config,
            readings: DashMap::new(),
        }
    }

    /// Record a fresh score reading for a ticket.
    pub fn record_score(&self, ticket: Ticket, score: f64, at: DateTime<Utc>) {
        if !score.is_finite() {
            warn!(ticket = %ticket, score, "Ignoring non-finite risk score");
            return;
        }
        self.readings.insert(ticket, ScoreReading { score, at });
    }

    /// Evaluate one ticket against its latest reading.
    ///
    /// A missing or stale reading holds the current state: resetting to
    /// HEALTHY on silence would silently drop an active defensive
    /// override.
    #[must_use]
    pub fn assess(
        &self,
        ticket: Ticket,
        current: DefensiveState,
        now: DateTime<Utc>,
    ) -> Assessment {
        let reading = match self.readings.get(&ticket) {
            Some(r) => *r,
            None => {
                return Assessment {
                    proposed: None,
                    stale: true,
                }
            }
        };

        let age = now.signed_duration_since(reading.at);
        if age > chrono::Duration::seconds(self.config.stale_after_secs as i64) {
            warn!(
                ticket = %ticket,
                state = %current,
                age_secs = age.num_seconds(),
                "Risk score stale, holding defensive state"
            );
            return Assessment {
                proposed: None,
                stale: true,
            };
        }

        let target = target_for_score(
            reading.score,
            self.config.l1_threshold,
            self.config.l2_threshold,
            self.config.hedge_threshold,
        );
        let proposed = step_toward(current, target);
        if let Some(next) = proposed {
            debug!(
                ticket = %ticket,
                score = reading.score,
                from = %current,
                to = %next,
                target = %target,
                "Defensive transition proposed"
            );
        }
        Assessment {
            proposed,
            stale: false,
        }
    }

    /// Drop tracking for a closed ticket.
    pub fn forget(&self, ticket: Ticket) {
        self.readings.remove(&ticket);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker() -> DefenseTracker {
        DefenseTracker::new(DefenseConfig::default())
    }

    #[test]
    fn test_missing_reading_holds_state_with_stale_flag() {
        let t = tracker();
        let a = t.assess(Ticket::new(1), DefensiveState::WarningL2, Utc::now());
        assert_eq!(a.proposed, None);
        assert!(a.stale);
    }

    #[test]
    fn test_stale_reading_never_resets_to_healthy() {
        let t = tracker();
        let now = Utc::now();
        // Low score, but far older than the staleness window.
        t.record_score(Ticket::new(1), 0.0, now - chrono::Duration::seconds(300));

        let a = t.assess(Ticket::new(1), DefensiveState::Hedged, now);
        assert_eq!(a.proposed, None);
        assert!(a.stale);
    }

    #[test]
    fn test_escalation_steps_through_ladder() {
        let t = tracker();
        let now = Utc::now();
        t.record_score(Ticket::new(1), 0.9, now);

        let a = t.assess(Ticket::new(1), DefensiveState::Healthy, now);
        assert_eq!(a.proposed, Some(DefensiveState::WarningL1));
        assert!(!a.stale);

        let a = t.assess(Ticket::new(1), DefensiveState::WarningL1, now);
        assert_eq!(a.proposed, Some(DefensiveState::WarningL2));

        let a = t.assess(Ticket::new(1), DefensiveState::WarningL2, now);
        assert_eq!(a.proposed, Some(DefensiveState::Hedged));
    }

    #[test]
    fn test_recovery_path_from_hedged() {
        let t = tracker();
        let now = Utc::now();
        t.record_score(Ticket::new(1), 0.1, now);

        let a = t.assess(Ticket::new(1), DefensiveState::Hedged, now);
        assert_eq!(a.proposed, Some(DefensiveState::Recovering));

        let a = t.assess(Ticket::new(1), DefensiveState::Recovering, now);
        assert_eq!(a.proposed, Some(DefensiveState::Healthy));
    }

    #[test]
    fn test_steady_state_proposes_nothing() {
        let t = tracker();
        let now = Utc::now();
        t.record_score(Ticket::new(1), 0.5, now);
        let a = t.assess(Ticket::new(1), DefensiveState::WarningL1, now);
        assert_eq!(a.proposed, None);
        assert!(!a.stale);
    }

    #[test]
    fn test_non_finite_score_ignored() {
        let t = tracker();
        let now = Utc::now();
        t.record_score(Ticket::new(1), f64::NAN, now);
        let a = t.assess(Ticket::new(1), DefensiveState::Healthy, now);
        assert!(a.stale);
    }
}
