//! Broker bridge implementations of the manager seams.
//!
//! `HttpPositionSource`/`HttpExitAdjuster` talk to an external broker
//! bridge over HTTP. `OfflinePositionSource` stands in when no bridge is
//! configured: it fails every read so managers skip their tickets
//! instead of treating the book as empty.

use reqwest::Client;
use sentinel_core::{ExitTarget, Position, Ticket};
use sentinel_manager::{AdjusterError, BoxFuture, ExitAdjuster, PositionSource};
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

/// Default timeout for bridge requests.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Position reads over the broker bridge HTTP API.
#[derive(Debug, Clone)]
pub struct HttpPositionSource {
    client: Client,
    base_url: String,
}

impl HttpPositionSource {
    pub fn new(base_url: &str) -> Result<Self, AdjusterError> {
        let client = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .map_err(|e| AdjusterError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

impl PositionSource for HttpPositionSource {
    fn positions(&self) -> BoxFuture<'_, Result<Vec<Position>, AdjusterError>> {
        Box::pin(async move {
            let url = format!("{}/positions", self.base_url);
            let response = self
                .client
                .get(&url)
                .send()
                .await
                .map_err(|e| AdjusterError::Transport(e.to_string()))?;
            if !response.status().is_success() {
                return Err(AdjusterError::Transport(format!(
                    "Position list failed: HTTP {}",
                    response.status()
                )));
            }
            response
                .json()
                .await
                .map_err(|e| AdjusterError::Transport(e.to_string()))
        })
    }

    fn position(&self, ticket: Ticket) -> BoxFuture<'_, Result<Option<Position>, AdjusterError>> {
        Box::pin(async move {
            let url = format!("{}/positions/{}", self.base_url, ticket);
            let response = self
                .client
                .get(&url)
                .send()
                .await
                .map_err(|e| AdjusterError::Transport(e.to_string()))?;
            if response.status() == reqwest::StatusCode::NOT_FOUND {
                return Ok(None);
            }
            if !response.status().is_success() {
                return Err(AdjusterError::Transport(format!(
                    "Position lookup failed: HTTP {}",
                    response.status()
                )));
            }
            response
                .json()
                .await
                .map(Some)
                .map_err(|e| AdjusterError::Transport(e.to_string()))
        })
    }
}

#[derive(Debug, Serialize)]
struct ModifyRequest {
    stop_loss: Option<sentinel_core::Price>,
    take_profit: Option<sentinel_core::Price>,
}

/// Exit modifications over the broker bridge HTTP API.
#[derive(Debug, Clone)]
pub struct HttpExitAdjuster {
    client: Client,
    base_url: String,
}

impl HttpExitAdjuster {
    pub fn new(base_url: &str) -> Result<Self, AdjusterError> {
        let client = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .map_err(|e| AdjusterError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

impl ExitAdjuster for HttpExitAdjuster {
    fn modify_exit(
        &self,
        ticket: Ticket,
        target: ExitTarget,
    ) -> BoxFuture<'_, Result<(), AdjusterError>> {
        Box::pin(async move {
            let url = format!("{}/positions/{}/modify", self.base_url, ticket);
            let body = ModifyRequest {
                stop_loss: target.stop_loss,
                take_profit: target.take_profit,
            };
            let response = self
                .client
                .post(&url)
                .json(&body)
                .send()
                .await
                .map_err(|e| AdjusterError::Transport(e.to_string()))?;
            match response.status() {
                s if s.is_success() => {
                    debug!(ticket = %ticket, "Exit modification accepted by bridge");
                    Ok(())
                }
                reqwest::StatusCode::NOT_FOUND => Err(AdjusterError::UnknownTicket(ticket)),
                s => {
                    let message = response.text().await.unwrap_or_default();
                    Err(AdjusterError::Rejected(format!("HTTP {s}: {message}")))
                }
            }
        })
    }
}

/// Position source for deployments without a broker bridge.
///
/// Every read fails with a transport error. Managers treat a failed read
/// as "position state unknown" and skip the ticket, so no trade is ever
/// removed or modified on the basis of a missing bridge.
#[derive(Debug, Clone, Copy, Default)]
pub struct OfflinePositionSource;

impl PositionSource for OfflinePositionSource {
    fn positions(&self) -> BoxFuture<'_, Result<Vec<Position>, AdjusterError>> {
        Box::pin(async {
            Err(AdjusterError::Transport(
                "No broker bridge configured".to_string(),
            ))
        })
    }

    fn position(&self, _ticket: Ticket) -> BoxFuture<'_, Result<Option<Position>, AdjusterError>> {
        Box::pin(async {
            Err(AdjusterError::Transport(
                "No broker bridge configured".to_string(),
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_offline_source_fails_reads() {
        let source = OfflinePositionSource;
        assert!(source.positions().await.is_err());
        assert!(source.position(Ticket::new(1)).await.is_err());
    }

    #[tokio::test]
    async fn test_unreachable_bridge_is_transport_error() {
        // Nothing listens on this port.
        let source = HttpPositionSource::new("http://127.0.0.1:1").unwrap();
        match source.positions().await {
            Err(AdjusterError::Transport(_)) => {}
            other => panic!("expected transport error, got {other:?}"),
        }
    }
}
