//! Position-side types: tickets, direction, broker position view.

use crate::decimal::{Price, Volume};
use crate::error::CoreError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Unique identifier of one open broker position.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct Ticket(pub u64);

impl Ticket {
    #[inline]
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    #[inline]
    pub fn inner(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for Ticket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Ticket {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse()
            .map(Self)
            .map_err(|_| CoreError::InvalidTicket(s.to_string()))
    }
}

impl From<u64> for Ticket {
    fn from(v: u64) -> Self {
        Self(v)
    }
}

/// Position direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Long,
    Short,
}

impl Direction {
    /// Signed profit distance from entry to the given price.
    ///
    /// Positive when the position is in profit, negative in loss.
    #[must_use]
    pub fn profit_distance(&self, entry: Price, current: Price) -> rust_decimal::Decimal {
        match self {
            Direction::Long => current.inner() - entry.inner(),
            Direction::Short => entry.inner() - current.inner(),
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Long => write!(f, "long"),
            Direction::Short => write!(f, "short"),
        }
    }
}

/// Read-only view of a broker position.
///
/// Owned by the external broker layer; the registry never mutates it.
/// Price/volume/SL-TP fields are authoritative on the broker side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    /// Unique position ticket.
    pub ticket: Ticket,
    /// Symbol (e.g., "EURUSD").
    pub symbol: String,
    /// Long or short.
    pub direction: Direction,
    /// Average entry price.
    pub entry_price: Price,
    /// Current volume.
    pub volume: Volume,
    /// Current stop-loss, if set.
    pub stop_loss: Option<Price>,
    /// Current take-profit, if set.
    pub take_profit: Option<Price>,
    /// Current market price.
    pub current_price: Price,
}

impl Position {
    /// Signed profit distance at the current market price.
    #[must_use]
    pub fn profit_distance(&self) -> rust_decimal::Decimal {
        self.direction
            .profit_distance(self.entry_price, self.current_price)
    }

    /// Reject positions whose identity fields cannot be coordinated.
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
        if !self.volume.is_positive() {
            return Err(CoreError::InvalidVolume(format!(
                "volume must be positive, got {}",
                self.volume
            )));
        }
        Ok(())
    }
}

/// Target exit parameters for a broker modification request.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ExitTarget {
    /// New stop-loss, `None` leaves the current value untouched.
    pub stop_loss: Option<Price>,
    /// New take-profit, `None` leaves the current value untouched.
    pub take_profit: Option<Price>,
}

impl ExitTarget {
    /// Target that only moves the stop-loss.
    #[must_use]
    pub fn stop_only(stop_loss: Price) -> Self {
        Self {
            stop_loss: Some(stop_loss),
            take_profit: None,
        }
    }
}
