//! Scripted source for integration testing.
//!
//! Provides a deterministic `Source` implementation that emits a fixed
//! list of events and then ends in a chosen way. Everything stays in memory with no
//! external dependencies.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

use poolscan::engine::CancelToken;
use poolscan::sources::{emit, Source};
use poolscan::types::{Event, SourceError};

/// What the source does after emitting its script.
#[derive(Debug, Clone)]
pub enum Ending {
    /// Block until cancelled, then return cleanly.
    WaitForCancel,
    /// Return this failure message.
    Fail(String),
    /// Return `Ok(())` straight away.
    Finish,
}

pub struct ScriptedSource {
    name: String,
    events: Vec<Event>,
    ending: Ending,
    observed_cancel: Arc<AtomicBool>,
}

impl ScriptedSource {
    pub fn new(name: &str, events: Vec<Event>, ending: Ending) -> Self {
        Self {
            name: name.to_string(),
            events,
            ending,
            observed_cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// A source that emits nothing and runs until cancelled.
    pub fn idle(name: &str) -> Self {
        Self::new(name, Vec::new(), Ending::WaitForCancel)
    }

    /// Flag set once the source has seen cancellation.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.observed_cancel)
    }

    pub fn into_arc(self) -> Arc<dyn Source> {
        Arc::new(self)
    }
}

#[async_trait]
impl Source for ScriptedSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, cancel: CancelToken, sink: mpsc::Sender<Event>) -> Result<(), SourceError> {
        for event in &self.events {
            emit(&sink, &cancel, event.clone()).await?;
        }
        match &self.ending {
            Ending::WaitForCancel => {
                cancel.cancelled().await;
                self.observed_cancel.store(true, Ordering::SeqCst);
                Ok(())
            }
            Ending::Fail(message) => Err(SourceError::Failed(message.clone())),
            Ending::Finish => Ok(()),
        }
    }
}

/// Shorthand for an unstamped event on solana/raydium.
pub fn pool(address: &str) -> Event {
    Event::new("solana", "raydium", address, "B", "Q")
}
