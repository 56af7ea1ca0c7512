//! Meteora DLMM pool watcher.
//!
//! Polls the public DLMM pools listing and emits the pools that were
//! not in the previous listing. Lasting deduplication is the store's
//! job; remembering one listing only keeps repeated polls from flooding
//! the shared channel.
//!
//! API: https://dlmm.datapi.meteora.ag
//! Endpoint: GET /pools
//! Auth: none

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashSet;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use super::{emit, Source};
use crate::config::MeteoraConfig;
use crate::engine::cancel::CancelToken;
use crate::types::{Event, SourceError};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

pub const DEFAULT_BASE_URL: &str = "https://dlmm.datapi.meteora.ag";
const POOLS_PATH: &str = "/pools";
const CHAIN: &str = "solana";
const DEX: &str = "meteora-dlmm";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

// ---------------------------------------------------------------------------
// API response types (Meteora JSON → Rust)
// ---------------------------------------------------------------------------

/// The listing is served either bare or wrapped in `{ "data": [...] }`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum PoolsResponse {
    Wrapped { data: Vec<DlmmPool> },
    Bare(Vec<DlmmPool>),
}

/// We only deserialize the fields we need.
#[derive(Debug, Deserialize)]
struct DlmmPool {
    #[serde(default)]
    address: String,
    #[serde(default, alias = "token_x_mint")]
    mint_x: String,
    #[serde(default, alias = "token_y_mint")]
    mint_y: String,
}

/// Decode a pools listing into unstamped events.
/// Entries without an address are skipped.
pub fn parse_pools(body: &str) -> Result<Vec<Event>, SourceError> {
    let pools = match serde_json::from_str::<PoolsResponse>(body)? {
        PoolsResponse::Wrapped { data } => data,
        PoolsResponse::Bare(pools) => pools,
    };

    Ok(pools
        .into_iter()
        .filter(|p| !p.address.is_empty())
        .map(|p| Event::new(CHAIN, DEX, p.address, p.mint_x, p.mint_y))
        .collect())
}

// ---------------------------------------------------------------------------
// Source
// ---------------------------------------------------------------------------

pub struct MeteoraDlmmSource {
    http: Client,
    base_url: String,
    poll_interval: Duration,
    max_consecutive_failures: u32,
}

impl MeteoraDlmmSource {
    pub fn new(base_url: &str, poll_interval: Duration, max_consecutive_failures: u32) -> Result<Self> {
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent("POOLSCAN/0.1.0 (pool-discovery-scanner)")
            .build()
            .context("Failed to build HTTP client for Meteora")?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            poll_interval,
            max_consecutive_failures: max_consecutive_failures.max(1),
        })
    }

    pub fn from_config(config: &MeteoraConfig) -> Result<Self> {
        Self::new(
            &config.base_url,
            Duration::from_secs(config.poll_interval_secs),
            config.max_consecutive_failures,
        )
    }

    async fn fetch_pools(&self) -> Result<Vec<Event>, SourceError> {
        let url = format!("{}{POOLS_PATH}", self.base_url);
        debug!(url = %url, "Fetching Meteora DLMM pools");

        let resp = self.http.get(&url).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(SourceError::Upstream {
                status: status.as_u16(),
                body,
            });
        }

        let body = resp.text().await?;
        parse_pools(&body)
    }
}

#[async_trait]
impl Source for MeteoraDlmmSource {
    fn name(&self) -> &str {
        DEX
    }

    async fn run(&self, cancel: CancelToken, sink: mpsc::Sender<Event>) -> Result<(), SourceError> {
        info!(
            base_url = %self.base_url,
            poll_secs = self.poll_interval.as_secs(),
            "Meteora DLMM watcher started"
        );

        let mut ticker = interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut previous: HashSet<String> = HashSet::new();
        let mut failures = 0u32;

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(()),
                _ = ticker.tick() => {}
            }

            let fetched = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(()),
                fetched = self.fetch_pools() => fetched,
            };

            let events = match fetched {
                Ok(events) => {
                    failures = 0;
                    events
                }
                Err(e) => {
                    failures += 1;
                    if failures >= self.max_consecutive_failures {
                        error!(error = %e, failures, "Meteora DLMM watcher giving up");
                        return Err(e);
                    }
                    warn!(error = %e, failures, "Meteora DLMM poll failed, retrying next tick");
                    continue;
                }
            };

            let mut current = HashSet::with_capacity(events.len());
            let mut fresh = 0usize;
            for event in events {
                if !current.insert(event.pool_address.clone()) || previous.contains(&event.pool_address) {
                    continue;
                }
                match emit(&sink, &cancel, event).await {
                    Ok(()) => fresh += 1,
                    Err(e) if e.is_cancellation() => return Ok(()),
                    Err(e) => return Err(e),
                }
            }
            debug!(new = fresh, listed = current.len(), "Meteora DLMM poll complete");
            previous = current;
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
