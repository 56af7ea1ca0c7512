//! Fan-in aggregator.
//!
//! Runs every configured source concurrently against one bounded
//! channel, stamps events that arrive without a timestamp, and commits
//! them to the store. The first genuine source failure ends the run and
//! is returned to the caller; cancellation ends it cleanly.

use chrono::Utc;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use super::cancel::CancelToken;
use super::store::Store;
use crate::sources::Source;
use crate::types::{Event, ScanError};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Capacity of the channel shared by all sources.
pub const DEFAULT_EVENT_BUFFER: usize = 128;

/// How long a stopping run waits for its sources before aborting them.
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

// ---------------------------------------------------------------------------
// Aggregator
// ---------------------------------------------------------------------------

/// Supervises a fixed set of sources and feeds their output into a store.
pub struct Aggregator {
    store: Store,
    sources: Vec<Arc<dyn Source>>,
    event_buffer: usize,
    shutdown_grace: Duration,
    log_discoveries: bool,
}

impl Aggregator {
    pub fn new(store: Store, sources: Vec<Arc<dyn Source>>) -> Self {
        Self {
            store,
            sources,
            event_buffer: DEFAULT_EVENT_BUFFER,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
            log_discoveries: true,
        }
    }

    pub fn with_event_buffer(mut self, capacity: usize) -> Self {
        self.event_buffer = capacity.max(1);
        self
    }

    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    /// Toggle the per-discovery log line. Has no effect on what is stored.
    pub fn with_discovery_log(mut self, enabled: bool) -> Self {
        self.log_discoveries = enabled;
        self
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Run until `cancel` fires, every source finishes, or a source fails.
    ///
    /// Cancellation and clean completion return `Ok(())`. A source
    /// failure returns that failure, after the remaining sources have
    /// been told to stop and given `shutdown_grace` to do so.
    pub async fn run(&self, cancel: &CancelToken) -> Result<(), ScanError> {
        let (event_tx, mut event_rx) = mpsc::channel::<Event>(self.event_buffer);
        let (error_tx, mut error_rx) = mpsc::channel::<ScanError>(self.sources.len().max(1));

        // Sources see a run-scoped token so a failing run can stop its
        // siblings without touching the caller's token.
        let run_token = cancel.child();
        let _stop_sources = run_token.drop_guard();

        let mut tasks = JoinSet::new();
        for source in &self.sources {
            let source = Arc::clone(source);
            let token = run_token.clone();
            let sink = event_tx.clone();
            let errors = error_tx.clone();
            tasks.spawn(async move {
                let name = source.name().to_string();
                let ran = AssertUnwindSafe(source.run(token.clone(), sink))
                    .catch_unwind()
                    .await;
                let failure = match ran {
                    Ok(Ok(())) => {
                        debug!(source = %name, "Source finished");
                        return;
                    }
                    Ok(Err(e)) if token.is_cancelled() || e.is_cancellation() => {
                        debug!(source = %name, error = %e, "Source stopped on cancellation");
                        return;
                    }
                    Ok(Err(e)) => ScanError::Source {
                        source_name: name,
                        error: e,
                    },
                    Err(_) => ScanError::SourcePanicked { source_name: name },
                };
                let _ = errors.send(failure).await;
            });
        }
        drop(event_tx);

        let names: Vec<String> = self.sources.iter().map(|s| s.name().to_string()).collect();
        info!(sources = ?names, "Aggregator started");

        let mut supervisor = tokio::spawn(supervise(tasks, error_tx));

        let outcome = loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!("Aggregator cancelled");
                    break Ok(());
                }
                reported = error_rx.recv() => match reported {
                    Some(e) => {
                        error!(source = e.source_name(), error = %e, "Source failed, stopping aggregator");
                        break Err(e);
                    }
                    None => {
                        // Every source has returned; commit only what is
                        // already buffered. A sender leaked into a detached
                        // task must not keep the run alive.
                        while let Ok(event) = event_rx.try_recv() {
                            self.ingest(event);
                        }
                        info!("All sources finished");
                        break Ok(());
                    }
                },
                Some(event) = event_rx.recv() => {
                    self.ingest(event);
                }
            }
        };

        run_token.cancel();
        drop(event_rx);
        if tokio::time::timeout(self.shutdown_grace, &mut supervisor).await.is_err() {
            warn!(
                grace_ms = self.shutdown_grace.as_millis() as u64,
                "Sources did not stop within grace period, aborting"
            );
            supervisor.abort();
        }

        outcome
    }

    /// Stamp and commit one event, logging it if it was new.
    fn ingest(&self, mut event: Event) {
        event.stamp_if_missing(Utc::now());

        if !self.store.add(event.clone()) {
            return;
        }
        if self.log_discoveries {
            info!(
                chain = %event.chain,
                dex = %event.dex,
                pool = %event.pool_address,
                base = %event.base_mint,
                quote = %event.quote_mint,
                "New pool"
            );
        }
    }
}

/// Join every source task. Returning drops the last error sender, which
/// tells the main loop no more errors are coming. Aborting this task
/// aborts every source still in the set.
async fn supervise(mut tasks: JoinSet<()>, errors: mpsc::Sender<ScanError>) {
    while let Some(joined) = tasks.join_next().await {
        if let Err(e) = joined {
            debug!(error = %e, "Source task ended abnormally");
        }
    }
    drop(errors);
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
