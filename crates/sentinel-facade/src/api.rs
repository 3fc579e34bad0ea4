//! Wire types shared by the facade server and client.

use sentinel_core::{Direction, ManagedTrade, Owner, Position, Price, Ticket, Volume};
use sentinel_registry::OwnershipView;
use serde::{Deserialize, Serialize};

/// Registration payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub ticket: Ticket,
    pub symbol: String,
    pub direction: Direction,
    pub entry_price: Price,
    pub volume: Volume,
    #[serde(default)]
    pub stop_loss: Option<Price>,
    #[serde(default)]
    pub take_profit: Option<Price>,
}

impl RegisterRequest {
    /// Broker position view of the request; current price starts at the
    /// entry price until the position source reports otherwise.
    #[must_use]
    pub fn into_position(self) -> Position {
        Position {
            ticket: self.ticket,
            symbol: self.symbol,
            direction: self.direction,
            entry_price: self.entry_price,
            volume: self.volume,
            stop_loss: self.stop_loss,
            take_profit: self.take_profit,
            current_price: self.entry_price,
        }
    }
}

/// Registration outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterResponse {
    pub trade: ManagedTrade,
    pub already_registered: bool,
}

/// Ownership answer served to out-of-process callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OwnershipResponse {
    pub ticket: Ticket,
    pub owner: Owner,
    pub breakeven_triggered: bool,
    pub defensive_state: sentinel_core::DefensiveState,
}

impl From<OwnershipView> for OwnershipResponse {
    fn from(view: OwnershipView) -> Self {
        Self {
            ticket: view.ticket,
            owner: view.owner,
            breakeven_triggered: view.breakeven_triggered,
            defensive_state: view.defensive_state,
        }
    }
}

/// Health snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub ready: bool,
    pub alert: bool,
    #[serde(default)]
    pub alert_reasons: Vec<String>,
}

/// Structured error body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiError {
    pub code: String,
    pub message: String,
}

impl ApiError {
    #[must_use]
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}
