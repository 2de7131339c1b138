//! Handlers for task generator logs.
//!
//! `?follow=true` switches the log endpoint to a `text/event-stream` that
//! emits one `line` event per log line and a final `end` event.

use std::convert::Infallible;

use axum::extract::{Path, Query, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures::StreamExt;
use serde::Deserialize;
use serde_json::json;
use talkvid_worker::{LogEvent, LogOutput};

use crate::error::AppResult;
use crate::response::DataResponse;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct LogQuery {
    #[serde(default)]
    pub follow: bool,
}

#[derive(Debug, Deserialize)]
pub struct TailQuery {
    pub lines: Option<usize>,
}

/// GET /api/v1/tasks/{id}/logs?follow=
pub async fn get_logs(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
    Query(params): Query<LogQuery>,
) -> AppResult<Response> {
    let events = match state.supervisor.stream_logs(&task_id, params.follow).await? {
        LogOutput::Snapshot(snapshot) => {
            return Ok(Json(DataResponse { data: snapshot }).into_response())
        }
        LogOutput::Follow(events) => events,
    };
    tracing::debug!(task_id = %task_id, "Log follow stream opened");

    let sse_stream = events.map(move |event| {
        let event = match event {
            LogEvent::Line(line) => Event::default()
                .event("line")
                .data(json!({ "line": line }).to_string()),
            LogEvent::End => Event::default()
                .event("end")
                .data(json!({ "task_id": task_id }).to_string()),
        };
        Ok::<Event, Infallible>(event)
    });

    Ok(Sse::new(sse_stream)
        .keep_alive(KeepAlive::default())
        .into_response())
}

/// GET /api/v1/tasks/{id}/logs/tail?lines=
pub async fn tail_logs(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
    Query(params): Query<TailQuery>,
) -> AppResult<impl IntoResponse> {
    let tail = state.supervisor.log_tail(&task_id, params.lines).await?;
    Ok(Json(DataResponse { data: tail }))
}
