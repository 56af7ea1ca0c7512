//! Shared types for the POOLSCAN pipeline.
//!
//! `Event` is the unit that flows from sources through the aggregator
//! into the store. Errors raised along the way live here too so that
//! sources, engine and dashboard can depend on them without cycles.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// Event
// ---------------------------------------------------------------------------

/// One observed pool/listing on one chain and DEX.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// Chain identifier, e.g. "solana".
    pub chain: String,
    /// DEX identifier, e.g. "raydium".
    pub dex: String,
    pub pool_address: String,
    pub base_mint: String,
    pub quote_mint: String,
    /// Creating transaction, when the upstream feed exposes one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    /// When the pool was first observed. Assigned at ingestion if absent.
    #[serde(default)]
    pub seen_at: Option<DateTime<Utc>>,
}

impl Event {
    /// Build an unstamped event with no signature.
    pub fn new(
        chain: impl Into<String>,
        dex: impl Into<String>,
        pool_address: impl Into<String>,
        base_mint: impl Into<String>,
        quote_mint: impl Into<String>,
    ) -> Self {
        Self {
            chain: chain.into(),
            dex: dex.into(),
            pool_address: pool_address.into(),
            base_mint: base_mint.into(),
            quote_mint: quote_mint.into(),
            signature: None,
            seen_at: None,
        }
    }

    /// Attach the creating transaction signature. Empty strings are ignored.
    pub fn with_signature(mut self, signature: impl Into<String>) -> Self {
        let signature = signature.into();
        self.signature = (!signature.is_empty()).then_some(signature);
        self
    }

    /// Attach an upstream observation time.
    pub fn with_seen_at(mut self, seen_at: DateTime<Utc>) -> Self {
        self.seen_at = Some(seen_at);
        self
    }

    /// The deduplication identity of this event.
    pub fn key(&self) -> PoolKey {
        PoolKey {
            chain: self.chain.clone(),
            dex: self.dex.clone(),
            pool_address: self.pool_address.clone(),
        }
    }

    /// Set `seen_at` to `now` unless a timestamp is already present.
    /// Returns true if the timestamp was assigned by this call.
    pub fn stamp_if_missing(&mut self, now: DateTime<Utc>) -> bool {
        if self.seen_at.is_some() {
            return false;
        }
        self.seen_at = Some(now);
        true
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}/{}] pool {} ({} / {})",
            self.chain, self.dex, self.pool_address, self.base_mint, self.quote_mint,
        )
    }
}

/// Identity key of an event: (chain, DEX, pool address).
///
/// Compared field by field, so values containing any separator
/// character can never collide with one another.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PoolKey {
    pub chain: String,
    pub dex: String,
    pub pool_address: String,
}

impl fmt::Display for PoolKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.chain, self.dex, self.pool_address)
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Failure reported by a single source.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("HTTP transport error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Upstream returned {status}: {body}")]
    Upstream { status: u16, body: String },

    #[error("Failed to decode upstream payload: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Source failed: {0}")]
    Failed(String),

    #[error("Event sink closed")]
    SinkClosed,

    #[error("Cancelled")]
    Cancelled,
}

impl SourceError {
    /// Whether this error is a consequence of shutdown rather than a fault.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, SourceError::Cancelled | SourceError::SinkClosed)
    }
}

/// Failure of an aggregation run.
#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    #[error("Source '{source_name}' failed: {error}")]
    Source {
        source_name: String,
        #[source]
        error: SourceError,
    },

    #[error("Source '{source_name}' panicked")]
    SourcePanicked { source_name: String },
}

impl ScanError {
    /// Name of the source that brought the run down.
    pub fn source_name(&self) -> &str {
        match self {
            ScanError::Source { source_name, .. } => source_name,
            ScanError::SourcePanicked { source_name } => source_name,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
