//! Managed trade record: ownership, exit flags and defensive state.

use crate::decimal::Price;
use crate::error::CoreError;
use crate::types::{Direction, Position, Ticket};
use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Subsystem that currently owns a ticket's exit parameters.
///
/// Exactly one owner at a time per ticket. Ownership transitions flow
/// exclusively through the write queue; managers never mutate this field
/// in place.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Owner {
    /// No manager holds the ticket.
    #[default]
    None,
    /// Primary trailing-stop manager.
    PrimaryTrailing,
    /// Defensive risk manager.
    Defensive,
    /// Profit-protection (breakeven) manager.
    ProfitProtection,
}

impl fmt::Display for Owner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Owner::None => write!(f, "none"),
            Owner::PrimaryTrailing => write!(f, "primary_trailing"),
            Owner::Defensive => write!(f, "defensive"),
            Owner::ProfitProtection => write!(f, "profit_protection"),
        }
    }
}

/// Per-ticket defensive risk state.
///
/// Cycles HEALTHY → WARNING_L1 → WARNING_L2 → HEDGED → RECOVERING → HEALTHY.
/// While in `WarningL2` or `Hedged` the defensive manager may forcibly take
/// ownership from any other manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DefensiveState {
    #[default]
    Healthy,
    WarningL1,
    WarningL2,
    Hedged,
    Recovering,
}

impl DefensiveState {
    /// Whether this state grants the defensive ownership override.
    #[must_use]
    pub fn grants_override(&self) -> bool {
        matches!(self, DefensiveState::WarningL2 | DefensiveState::Hedged)
    }
}

impl fmt::Display for DefensiveState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DefensiveState::Healthy => write!(f, "healthy"),
            DefensiveState::WarningL1 => write!(f, "warning_l1"),
            DefensiveState::WarningL2 => write!(f, "warning_l2"),
            DefensiveState::Hedged => write!(f, "hedged"),
            DefensiveState::Recovering => write!(f, "recovering"),
        }
    }
}

/// Registry record tracked for each open position.
///
/// The registry store is the single source of truth for these fields;
/// all mutations are serialized through the write queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManagedTrade {
    /// Unique key.
    pub ticket: Ticket,
    /// Symbol, cached from the broker position.
    pub symbol: String,
    /// Long or short.
    pub direction: Direction,
    /// Entry price, cached from the broker position.
    pub entry_price: Price,
    /// Price distance between entry and the stop-loss at registration.
    /// Zero when the position was registered without a stop-loss.
    pub initial_risk: Decimal,
    /// Current owner.
    pub owner: Owner,
    /// Monotonic false→true: stop-loss has been moved to entry.
    pub breakeven_triggered: bool,
    /// Trailing stop is actively managed.
    pub trailing_active: bool,
    /// Trailing distance multiplier chosen by the gate evaluator.
    pub trailing_multiplier: f64,
    /// Highest risk multiple reached while the position is open.
    /// Monotonically non-decreasing (profit side only).
    pub risk_multiple_achieved: f64,
    /// A partial profit close has been executed for this trade.
    pub partial_profit_taken: bool,
    /// Current defensive state.
    pub defensive_state: DefensiveState,
    /// Timestamp of the last exit modification, for cooldown enforcement.
    pub last_modification: Option<DateTime<Utc>>,
    /// When the trade was first registered.
    pub registered_at: DateTime<Utc>,
    /// When any field was last updated.
    pub last_updated: DateTime<Utc>,
}

impl ManagedTrade {
    /// Create a fresh record from a broker position.
    #[must_use]
    pub fn from_position(position: &Position, now: DateTime<Utc>) -> Self {
        let initial_risk = position
            .stop_loss
            .map(|sl| position.entry_price.distance_to(sl))
            .unwrap_or(Decimal::ZERO);

        Self {
            ticket: position.ticket,
            symbol: position.symbol.clone(),
            direction: position.direction,
            entry_price: position.entry_price,
            initial_risk,
            owner: Owner::None,
            breakeven_triggered: false,
            trailing_active: false,
            trailing_multiplier: 1.5,
            risk_multiple_achieved: 0.0,
            partial_profit_taken: false,
            defensive_state: DefensiveState::Healthy,
            last_modification: None,
            registered_at: now,
            last_updated: now,
        }
    }

    /// Reject records whose identity fields cannot be coordinated.
    ///
    /// The write queue runs this before accepting a registration or
    /// replacement.
    pub fn validate(&self) -> crate::error::Result<()> {
        if self.symbol.trim().is_empty() {
            return Err(CoreError::InvalidSymbol(format!(
                "ticket {} has an empty symbol",
                self.ticket
            )));
        }
        if !self.entry_price.is_positive() {
            return Err(CoreError::InvalidPrice(format!(
                "entry price must be positive, got {}",
                self.entry_price
            )));
        }
        Ok(())
    }

    /// Current risk multiple (R) at the given market price.
    ///
    /// Returns `None` when the initial risk distance is unknown (no
    /// stop-loss at registration), in which case R-based gates fall back
    /// to the persisted `risk_multiple_achieved`.
    #[must_use]
    pub fn risk_multiple_at(&self, current_price: Price) -> Option<f64> {
        if self.initial_risk.is_zero() {
            return None;
        }
        let profit = self
            .direction
            .profit_distance(self.entry_price, current_price);
        (profit / self.initial_risk).to_f64()
    }

    /// Whether the modification cooldown has elapsed.
    #[must_use]
    pub fn cooldown_elapsed(&self, now: DateTime<Utc>, cooldown_secs: u64) -> bool {
        match self.last_modification {
            None => true,
            Some(last) => {
                let elapsed = now.signed_duration_since(last);
                elapsed >= chrono::Duration::seconds(cooldown_secs as i64)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decimal::Volume;
    use rust_decimal_macros::dec;

    fn sample_position() -> Position {
        Position {
            ticket: Ticket::new(1001),
            symbol: "EURUSD".to_string(),
            direction: Direction::Long,
            entry_price: Price::new(dec!(100)),
            volume: Volume::new(dec!(1)),
            stop_loss: Some(Price::new(dec!(95))),
            take_profit: None,
            current_price: Price::new(dec!(100)),
        }
    }

    #[test]
    fn test_from_position_captures_initial_risk() {
        let now = Utc::now();
        let trade = ManagedTrade::from_position(&sample_position(), now);
        assert_eq!(trade.initial_risk, dec!(5));
        assert_eq!(trade.owner, Owner::None);
        assert!(!trade.breakeven_triggered);
        assert_eq!(trade.defensive_state, DefensiveState::Healthy);
    }

    #[test]
    fn test_risk_multiple_long() {
        let now = Utc::now();
        let trade = ManagedTrade::from_position(&sample_position(), now);
        // Entry 100, SL 95 -> risk distance 5. Price 101 -> 0.2R.
        let r = trade.risk_multiple_at(Price::new(dec!(101))).unwrap();
        assert!((r - 0.2).abs() < 1e-9);
        // Losing side is negative.
        let r = trade.risk_multiple_at(Price::new(dec!(99))).unwrap();
        assert!(r < 0.0);
    }

    #[test]
    fn test_risk_multiple_unknown_without_stop() {
        let mut position = sample_position();
        position.stop_loss = None;
        let trade = ManagedTrade::from_position(&position, Utc::now());
        assert!(trade.risk_multiple_at(Price::new(dec!(110))).is_none());
    }

    #[test]
    fn test_validate_rejects_bad_identity() {
        let now = Utc::now();
        let mut trade = ManagedTrade::from_position(&sample_position(), now);
        assert!(trade.validate().is_ok());

        trade.symbol = " ".to_string();
        assert!(matches!(
            trade.validate(),
            Err(CoreError::InvalidSymbol(_))
        ));

        trade.symbol = "EURUSD".to_string();
        trade.entry_price = Price::ZERO;
        assert!(matches!(trade.validate(), Err(CoreError::InvalidPrice(_))));
    }

    #[test]
    fn test_override_states() {
        assert!(!DefensiveState::Healthy.grants_override());
        assert!(!DefensiveState::WarningL1.grants_override());
        assert!(DefensiveState::WarningL2.grants_override());
        assert!(DefensiveState::Hedged.grants_override());
        assert!(!DefensiveState::Recovering.grants_override());
    }

    #[test]
    fn test_cooldown() {
        let now = Utc::now();
        let mut trade = ManagedTrade::from_position(&sample_position(), now);
        assert!(trade.cooldown_elapsed(now, 15));

        trade.last_modification = Some(now);
        assert!(!trade.cooldown_elapsed(now + chrono::Duration::seconds(5), 15));
        assert!(trade.cooldown_elapsed(now + chrono::Duration::seconds(15), 15));
    }
}
