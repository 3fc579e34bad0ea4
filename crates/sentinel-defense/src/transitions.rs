//! Legal transitions of the defensive cycle.

use sentinel_core::DefensiveState;

use DefensiveState::{Healthy, Hedged, Recovering, WarningL1, WarningL2};

/// Whether `from -> to` is a legal edge of the cycle.
///
/// Escalation climbs one level at a time; de-escalation steps back one
/// level at a time. A hedged position must pass through RECOVERING before
/// it can be HEALTHY again, so the unwind is always observable.
#[must_use]
pub fn can_transition(from: DefensiveState, to: DefensiveState) -> bool {
    if from == to {
        return true;
    }
    matches!(
        (from, to),
        // Escalation.
        (Healthy, WarningL1)
            | (WarningL1, WarningL2)
            | (WarningL2, Hedged)
            // Unwind.
            | (Hedged, Recovering)
            | (Recovering, Healthy)
            // De-escalation.
            | (WarningL1, Healthy)
            | (WarningL2, WarningL1)
            // Deterioration during recovery re-enters the warning ladder.
            | (Recovering, WarningL1)
    )
}

/// State the risk score maps to, ignoring transition legality.
#[must_use]
pub fn target_for_score(
    score: f64,
    l1_threshold: f64,
    l2_threshold: f64,
    hedge_threshold: f64,
) -> DefensiveState {
    if score >= hedge_threshold {
        Hedged
    } else if score >= l2_threshold {
        WarningL2
    } else if score >= l1_threshold {
        WarningL1
    } else {
        Healthy
    }
}

/// Single legal step from `current` toward `target`, or `None` when
/// already there or no legal edge moves closer.
///
/// One step per evaluation cycle keeps every intermediate state visible
/// in the registry and in the logs.
#[must_use]
pub fn step_toward(current: DefensiveState, target: DefensiveState) -> Option<DefensiveState> {
    if current == target {
        return None;
    }

    let next = match (current, target) {
        // Escalation ladder.
        (Healthy, _) => WarningL1,
        (WarningL1, WarningL2 | Hedged) => WarningL2,
        (WarningL2, Hedged) => Hedged,

        // De-escalation ladder.
        (WarningL1, Healthy) => Healthy,
        (WarningL2, WarningL1 | Healthy) => WarningL1,
        // Leaving HEDGED always goes through RECOVERING.
        (Hedged, _) => Recovering,
        (Recovering, Healthy) => Healthy,
        // Renewed stress during recovery.
        (Recovering, WarningL1 | WarningL2 | Hedged) => WarningL1,

        // current == target, handled above.
        _ => return None,
    };

    debug_assert!(can_transition(current, next));
    Some(next)
}
