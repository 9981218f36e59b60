//! Document reads, refresh requests and the refresh status stream.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    middleware,
    response::{
        IntoResponse, Response,
        sse::{Event, KeepAlive, Sse},
    },
    routing::{get, post},
};
use futures::{Stream, StreamExt};
use serde::Serialize;

use crate::application::documents::{DocumentService, DocumentView, RefreshDocumentCommand};
use crate::application::refresh::{RefreshChannelRegistry, status_stream};
use crate::cache::CacheStore;
use crate::domain::documents::TriggeredBy;

use super::error::ApiError;
use super::middleware::{log_responses, set_request_context};

#[derive(Clone)]
pub struct HttpState {
    pub documents: DocumentService,
    pub cache: CacheStore,
    pub channels: Arc<RefreshChannelRegistry>,
}

pub fn build_router(state: HttpState) -> Router {
    Router::new()
        .route("/documents/{id}", get(document_detail))
        .route("/documents/{id}/refresh", post(request_refresh))
        .route("/documents/{id}/refresh-status", get(refresh_status))
        .route("/_health", get(health))
        .with_state(state)
        .layer(middleware::from_fn(log_responses))
        .layer(middleware::from_fn(set_request_context))
}

async fn document_detail(
    State(state): State<HttpState>,
    Path(id): Path<String>,
) -> Result<Json<DocumentView>, ApiError> {
    let view = state.documents.document(&id).await?;
    Ok(Json(view))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RefreshAccepted {
    job_id: String,
}

async fn request_refresh(
    State(state): State<HttpState>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let job_id = state.documents.request_refresh(RefreshDocumentCommand {
        document: id,
        triggered_by: TriggeredBy::User,
    })?;
    Ok((StatusCode::ACCEPTED, Json(RefreshAccepted { job_id })).into_response())
}

async fn refresh_status(
    State(state): State<HttpState>,
    Path(id): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, axum::Error>>>, ApiError> {
    let document = state.documents.catalog().resolve(&id)?.id.clone();
    let events = status_stream(state.cache, state.channels, document)
        .map(|event| Event::default().json_data(event));
    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

async fn health() -> StatusCode {
    StatusCode::NO_CONTENT
}
