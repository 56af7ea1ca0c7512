//! Synthetic pool feed.
//!
//! Generates plausible-looking pool discoveries on a fixed interval so
//! the pipeline and dashboard can be exercised without any upstream.
//! Periodically repeats the previous pool to exercise deduplication.

use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info};
use uuid::Uuid;

use super::{emit, Source};
use crate::config::SyntheticConfig;
use crate::engine::cancel::CancelToken;
use crate::types::{Event, SourceError};

/// Wrapped SOL mint, used as the quote side of every generated pool.
pub const WSOL_MINT: &str = "So11111111111111111111111111111111111111112";

pub struct SyntheticSource {
    name: String,
    chain: String,
    dex: String,
    interval: Duration,
    repeat_every: u64,
    limit: Option<u64>,
}

impl SyntheticSource {
    pub fn new(chain: &str, dex: &str, interval: Duration) -> Self {
        Self {
            name: format!("synthetic:{chain}/{dex}"),
            chain: chain.to_string(),
            dex: dex.to_string(),
            interval,
            repeat_every: 0,
            limit: None,
        }
    }

    pub fn from_config(config: &SyntheticConfig) -> Self {
        Self::new(&config.chain, &config.dex, Duration::from_millis(config.interval_ms))
            .with_repeat_every(config.repeat_every)
            .with_limit(config.limit)
    }

    /// Re-emit the previous pool on every `n`th tick (0 disables).
    pub fn with_repeat_every(mut self, n: u64) -> Self {
        self.repeat_every = n;
        self
    }

    /// Stop cleanly after `limit` emissions.
    pub fn with_limit(mut self, limit: Option<u64>) -> Self {
        self.limit = limit;
        self
    }

    fn generate(&self) -> Event {
        Event::new(
            &self.chain,
            &self.dex,
            fake_address(),
            fake_address(),
            WSOL_MINT,
        )
        .with_signature(Uuid::new_v4().simple().to_string())
    }
}

/// A unique 44-character stand-in for a base58 account address.
fn fake_address() -> String {
    let id = Uuid::new_v4().simple().to_string();
    format!("{id}{}", &id[..12])
}

#[async_trait]
impl Source for SyntheticSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, cancel: CancelToken, sink: mpsc::Sender<Event>) -> Result<(), SourceError> {
        info!(source = %self.name, interval_ms = self.interval.as_millis() as u64, "Synthetic feed started");

        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut previous: Option<Event> = None;
        let mut emitted = 0u64;

        loop {
            if self.limit.is_some_and(|limit| emitted >= limit) {
                debug!(source = %self.name, emitted, "Synthetic feed reached its limit");
                return Ok(());
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(()),
                _ = ticker.tick() => {}
            }

            let tick = emitted + 1;
            let event = match &previous {
                Some(prev) if self.repeat_every > 0 && tick % self.repeat_every == 0 => prev.clone(),
                _ => self.generate(),
            };
            previous = Some(event.clone());

            match emit(&sink, &cancel, event).await {
                Ok(()) => emitted += 1,
                Err(e) if e.is_cancellation() => return Ok(()),
                Err(e) => return Err(e),
            }
        }
    }
}
