//! Event sources.
//!
//! Defines the `Source` trait and provides implementations for:
//! - Synthetic — demo generator standing in for a live feed
//! - Meteora DLMM — polling watcher over the public pools API

pub mod meteora;
pub mod synthetic;

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::info;

use crate::config::SourceConfig;
use crate::engine::cancel::CancelToken;
use crate::types::{Event, SourceError};

/// An independent producer of pool discovery events.
///
/// `run` pushes events into `sink` until `cancel` fires or the source
/// hits an error it cannot recover from. Returning because of
/// cancellation is not a failure: either return `Ok(())` or an error
/// for which [`SourceError::is_cancellation`] holds.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Source: Send + Sync {
    /// Human-readable name for logging and error reports.
    fn name(&self) -> &str;

    /// Produce events until cancelled or failed.
    async fn run(&self, cancel: CancelToken, sink: mpsc::Sender<Event>) -> Result<(), SourceError>;
}

/// Push one event, waiting for room in the sink but never past
/// cancellation.
pub async fn emit(
    sink: &mpsc::Sender<Event>,
    cancel: &CancelToken,
    event: Event,
) -> Result<(), SourceError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(SourceError::Cancelled),
        sent = sink.send(event) => sent.map_err(|_| SourceError::SinkClosed),
    }
}

/// Wait for `period`, returning early with `Cancelled` if `cancel` fires.
pub async fn pause(cancel: &CancelToken, period: Duration) -> Result<(), SourceError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(SourceError::Cancelled),
        _ = tokio::time::sleep(period) => Ok(()),
    }
}

/// Instantiate every enabled source from configuration.
pub fn build_sources(configs: &[SourceConfig]) -> Result<Vec<Arc<dyn Source>>> {
    let mut sources: Vec<Arc<dyn Source>> = Vec::new();
    for config in configs.iter().filter(|c| c.enabled()) {
        let source: Arc<dyn Source> = match config {
            SourceConfig::Synthetic(c) => Arc::new(synthetic::SyntheticSource::from_config(c)),
            SourceConfig::MeteoraDlmm(c) => Arc::new(meteora::MeteoraDlmmSource::from_config(c)?),
        };
        info!(source = source.name(), "Source configured");
        sources.push(source);
    }
    Ok(sources)
}
