//! Dashboard API route handlers.
//!
//! JSON snapshot endpoints plus a Server-Sent Events stream of newly
//! discovered pools. State is shared via `Arc<DashboardState>`.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::sse::{Event as SseEvent, KeepAlive, Sse},
    Json,
};
use chrono::{DateTime, Utc};
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

use crate::engine::{CancelToken, Store};
use crate::types::Event;

/// Rows returned by `/api/events` when no `limit` is given.
pub const DEFAULT_LIST_LIMIT: i64 = 100;

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

/// Shared state accessible by all route handlers.
pub struct DashboardState {
    pub store: Store,
    pub started_at: DateTime<Utc>,
    /// Ends every open live stream when fired.
    pub shutdown: CancelToken,
}

impl DashboardState {
    pub fn new(store: Store, shutdown: CancelToken) -> Self {
        Self {
            store,
            started_at: Utc::now(),
            shutdown,
        }
    }
}

pub type AppState = Arc<DashboardState>;

// ---------------------------------------------------------------------------
// Request / response types
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    pub limit: Option<i64>,
}

impl ListQuery {
    /// Store limit: zero (meaning "all") for non-positive requests.
    fn store_limit(&self) -> usize {
        let requested = self.limit.unwrap_or(DEFAULT_LIST_LIMIT);
        usize::try_from(requested).unwrap_or(0)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StatsResponse {
    pub events: usize,
    pub subscribers: usize,
    pub uptime_secs: i64,
}

// ---------------------------------------------------------------------------
// Route handlers
// ---------------------------------------------------------------------------

/// GET /api/events?limit=N
pub async fn list_events(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Json<Vec<Event>> {
    Json(state.store.list(query.store_limit()))
}

/// GET /api/events/stream
pub async fn stream_events(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<SseEvent, axum::Error>>> {
    // Dropping the subscription (client gone, or shutdown) unsubscribes it.
    let (subscription, _) = state.store.subscribe();
    debug!(subscribers = state.store.subscriber_count(), "Live stream client connected");

    let shutdown = state.shutdown.clone();
    let stream = subscription
        .map(|event| SseEvent::default().event("pool").json_data(&event))
        .take_until(async move { shutdown.cancelled().await });
    Sse::new(stream).keep_alive(KeepAlive::default())
}

/// GET /api/stats
pub async fn get_stats(State(state): State<AppState>) -> Json<StatsResponse> {
    Json(StatsResponse {
        events: state.store.len(),
        subscribers: state.store.subscriber_count(),
        uptime_secs: (Utc::now() - state.started_at).num_seconds(),
    })
}

/// GET /health
pub async fn health() -> StatusCode {
    StatusCode::OK
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
