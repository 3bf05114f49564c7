//! Server-Sent Events for job progress

use axum::{
    extract::{Query, State},
    response::sse::{Event, Sse},
};
use futures::stream::Stream;
use serde::Deserialize;
use std::convert::Infallible;
use uuid::Uuid;

use crate::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct EventsQuery {
    /// Only stream events for this job
    pub job_id: Option<Uuid>,
}

/// GET /events
///
/// Streams JobCreated, JobStatusChanged, TrackStarted, DownloadProgress,
/// TrackCompleted, TrackFailed and JobLog events.
pub async fn event_stream(
    State(state): State<AppState>,
    Query(query): Query<EventsQuery>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    lossless_common::sse::event_bus_sse_stream(&state.event_bus, query.job_id)
}
