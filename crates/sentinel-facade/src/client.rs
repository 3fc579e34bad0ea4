//! HTTP client for out-of-process registry callers.

use crate::api::{OwnershipResponse, RegisterRequest, RegisterResponse};
use crate::error::{FacadeError, FacadeResult};
use dashmap::DashMap;
use reqwest::Client;
use sentinel_core::{ManagedTrade, Ticket};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Default timeout for API requests.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryClientConfig {
    /// Base URL of the facade server (e.g., "http://127.0.0.1:8090").
    pub base_url: String,
    /// Seconds an ownership answer is served from cache.
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
    /// Seconds a cached answer may still be used as a stale fallback
    /// when the server is unreachable.
    #[serde(default = "default_stale_limit_secs")]
    pub stale_limit_secs: u64,
}

fn default_cache_ttl_secs() -> u64 {
    5
}

fn default_stale_limit_secs() -> u64 {
    30
}

/// Ownership answer with its freshness.
///
/// `Unavailable` is the conservative default past the stale limit:
/// callers must assume they may not rely on any previous answer, in
/// particular not on an absent defensive override.
#[derive(Debug, Clone, PartialEq)]
pub enum OwnershipAnswer {
    Fresh(OwnershipResponse),
    Stale(OwnershipResponse),
    Unavailable,
}

impl OwnershipAnswer {
    /// The view, fresh or stale.
    #[must_use]
    pub fn view(&self) -> Option<&OwnershipResponse> {
        match self {
            OwnershipAnswer::Fresh(v) | OwnershipAnswer::Stale(v) => Some(v),
            OwnershipAnswer::Unavailable => None,
        }
    }
}

struct CachedOwnership {
    response: OwnershipResponse,
    fetched_at: Instant,
}

/// Client for the remote registry facade.
pub struct RegistryClient {
    client: Client,
    config: RegistryClientConfig,
    ownership_cache: DashMap<Ticket, CachedOwnership>,
}

impl RegistryClient {
    pub fn new(config: RegistryClientConfig) -> FacadeResult<Self> {
        let client = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .map_err(|e| FacadeError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            config,
            ownership_cache: DashMap::new(),
        })
    }

    /// Register a position; idempotent on the server side.
    pub async fn register(&self, request: &RegisterRequest) -> FacadeResult<RegisterResponse> {
        let url = format!("{}/trade/register", self.config.base_url);
        let response = self
            .client
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(|e| FacadeError::Transport(e.to_string()))?;
        Self::decode(response).await
    }

    /// Fetch one managed trade, `Ok(None)` on 404.
    pub async fn trade(&self, ticket: Ticket) -> FacadeResult<Option<ManagedTrade>> {
        let url = format!("{}/trade/{}", self.config.base_url, ticket);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| FacadeError::Transport(e.to_string()))?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        Self::decode(response).await.map(Some)
    }

    /// Ownership query with a short cache and a bounded stale fallback.
    ///
    /// Answers younger than the cache TTL are served locally. On a fetch
    /// failure, a cached answer younger than the stale limit is returned
    /// as `Stale`; beyond that the answer is `Unavailable`.
    pub async fn ownership(&self, ticket: Ticket) -> OwnershipAnswer {
        if let Some(cached) = self.ownership_cache.get(&ticket) {
            if cached.fetched_at.elapsed() < Duration::from_secs(self.config.cache_ttl_secs) {
                return OwnershipAnswer::Fresh(cached.response.clone());
            }
        }

        match self.fetch_ownership(ticket).await {
            Ok(response) => {
                self.ownership_cache.insert(
                    ticket,
                    CachedOwnership {
                        response: response.clone(),
                        fetched_at: Instant::now(),
                    },
                );
                OwnershipAnswer::Fresh(response)
            }
            Err(e) => {
                warn!(ticket = %ticket, error = %e, "Ownership fetch failed");
                match self.ownership_cache.get(&ticket) {
                    Some(cached)
                        if cached.fetched_at.elapsed()
                            < Duration::from_secs(self.config.stale_limit_secs) =>
                    {
                        debug!(ticket = %ticket, "Serving stale ownership answer");
                        OwnershipAnswer::Stale(cached.response.clone())
                    }
                    _ => OwnershipAnswer::Unavailable,
                }
            }
        }
    }

    async fn fetch_ownership(&self, ticket: Ticket) -> FacadeResult<OwnershipResponse> {
        let url = format!("{}/ownership/{}", self.config.base_url, ticket);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| FacadeError::Transport(e.to_string()))?;
        Self::decode(response).await
    }

    async fn decode<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> FacadeResult<T> {
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(FacadeError::Api {
                status: status.as_u16(),
                message,
            });
        }
        response
            .json()
            .await
            .map_err(|e| FacadeError::Decode(e.to_string()))
    }
}
