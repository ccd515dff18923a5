//! JSON + SSE handlers.

pub mod envelope;

use answerpipe_core::{
    Error, GenerationEvent, HistoryRecord, HistoryStore, NewHistoryRecord, UserRecord, UserStore,
};
use answerpipe_local::aggregate::Aggregator;
use answerpipe_local::pipeline::{salvage, Pipeline, Prepared};
use axum::extract::rejection::JsonRejection;
use axum::extract::{Query, State};
use axum::http::{Method, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use envelope::{ApiError, ErrorCode};
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Pipeline,
    pub users: Arc<dyn UserStore>,
    pub history: Arc<dyn HistoryStore>,
    /// Only its presence is checked; signature verification is out of scope.
    pub webhook_secret: Option<String>,
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/api/query", post(query))
        .route("/api/stream", get(stream_get).post(stream_post))
        .route("/webhook", post(webhook))
        .route("/api/sync-user", post(sync_user))
        .route("/api/pushData", post(push_data))
        .route("/api/get-stored-responses", post(get_stored_responses))
        .route("/api/delete-response", delete(delete_response))
        .layer(cors)
        .with_state(state)
}

fn message(status: StatusCode, msg: &str) -> Response {
    (status, Json(serde_json::json!({ "message": msg }))).into_response()
}

async fn health() -> &'static str {
    "ok"
}

#[derive(Debug, Default, Deserialize)]
pub struct QueryBody {
    #[serde(default)]
    pub query: String,
}

async fn query(
    State(state): State<AppState>,
    payload: Result<Json<QueryBody>, JsonRejection>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let Json(body) = payload?;
    let t0 = std::time::Instant::now();
    let answer = state.pipeline.answer(&body.query).await?;
    tracing::info!(
        target: "answerpipe::http",
        route = "/api/query",
        entity = answer.classification.entity.as_str(),
        findings = answer.report.findings.len(),
        elapsed_ms = t0.elapsed().as_millis() as u64,
        "answered"
    );
    Ok(Json(serde_json::json!({
        "success": true,
        "response": answer.text,
    })))
}

async fn stream_get(
    State(state): State<AppState>,
    Query(params): Query<QueryBody>,
) -> Result<Response, ApiError> {
    open_sse(state, &params.query)
}

async fn stream_post(
    State(state): State<AppState>,
    payload: Result<Json<QueryBody>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(body) = payload?;
    open_sse(state, &body.query)
}

fn frame(v: serde_json::Value) -> Event {
    Event::default()
        .json_data(v)
        .unwrap_or_else(|_| Event::default().data("{}"))
}

fn error_frame(e: &Error) -> Event {
    let code = ErrorCode::from(e);
    frame(serde_json::json!({ "error": e.to_string(), "code": code.as_str() }))
}

/// Validates the query up front so an empty one is a plain 400, then streams.
///
/// Frames: `{tool_call}` while the agent runs, then either `{chunk}` + `{done: true}` or (on
/// failure) an optional salvaged `{chunk}` followed by `{error}`. Dropping the response body
/// drops the upstream event stream with it.
fn open_sse(state: AppState, raw: &str) -> Result<Response, ApiError> {
    let prepared = state.pipeline.prepare(raw, true)?;
    let body = sse_frames(state.pipeline.clone(), prepared)
        .map(Ok::<Event, std::convert::Infallible>);
    Ok(Sse::new(body)
        .keep_alive(KeepAlive::new().interval(Duration::from_secs(15)))
        .into_response())
}

pub fn sse_frames(
    pipeline: Pipeline,
    prepared: Prepared,
) -> impl futures_util::Stream<Item = Event> + Send + 'static {
    async_stream::stream! {
        let t0 = std::time::Instant::now();
        let mut events = match pipeline.open_stream(&prepared).await {
            Ok(events) => events,
            Err(e) => {
                tracing::warn!(
                    target: "answerpipe::http",
                    error = %e,
                    "agent stream failed to open"
                );
                yield error_frame(&e);
                return;
            }
        };

        let mut agg = Aggregator::new();
        let mut failure = None;
        while let Some(item) = events.next().await {
            match agg.feed(item) {
                ControlFlow::Continue(GenerationEvent::ToolCall(tc)) => {
                    yield frame(serde_json::json!({ "tool_call": tc }));
                }
                ControlFlow::Continue(_) => {}
                ControlFlow::Break(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }
        // Release the upstream connection before the reformat call.
        drop(events);
        let aggregated = agg.finish(failure);

        if let Some(e) = &aggregated.error {
            let partial = salvage(&aggregated.document);
            if !partial.is_empty() {
                yield frame(serde_json::json!({ "chunk": partial }));
            }
            yield error_frame(e);
            return;
        }

        match pipeline.finish(&prepared, &aggregated).await {
            Ok(answer) => {
                tracing::info!(
                    target: "answerpipe::http",
                    route = "/api/stream",
                    entity = answer.classification.entity.as_str(),
                    events = aggregated.events,
                    tool_calls = aggregated.tool_calls,
                    elapsed_ms = t0.elapsed().as_millis() as u64,
                    "answered"
                );
                yield frame(serde_json::json!({ "chunk": answer.text }));
                yield frame(serde_json::json!({ "done": true }));
            }
            Err(e) => {
                yield error_frame(&e);
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct WebhookEvent {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    data: Option<WebhookUser>,
}

#[derive(Debug, Default, Deserialize)]
struct WebhookUser {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    email_addresses: Option<Vec<WebhookEmail>>,
    #[serde(default)]
    first_name: Option<String>,
    #[serde(default)]
    last_name: Option<String>,
    #[serde(default)]
    image_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WebhookEmail {
    #[serde(default)]
    email_address: Option<String>,
}

impl WebhookUser {
    fn into_record(self, external_id: String) -> UserRecord {
        let name = match (self.first_name, self.last_name) {
            (Some(f), Some(l)) if !f.is_empty() && !l.is_empty() => Some(format!("{f} {l}")),
            _ => None,
        };
        UserRecord {
            external_id,
            email: self
                .email_addresses
                .into_iter()
                .flatten()
                .next()
                .and_then(|e| e.email_address),
            name,
            image_url: self.image_url,
        }
    }
}

async fn webhook(
    State(state): State<AppState>,
    payload: Result<Json<WebhookEvent>, JsonRejection>,
) -> Result<Response, ApiError> {
    if state.webhook_secret.is_none() {
        return Err(ApiError::new(
            ErrorCode::NotConfigured,
            "Webhook secret not configured",
        ));
    }
    let Json(ev) = payload?;
    if !matches!(
        ev.kind.as_str(),
        "user.created" | "user.updated" | "user.deleted"
    ) {
        return Ok(message(StatusCode::OK, "Event type not handled"));
    }
    let user = ev.data.unwrap_or_default();
    let external_id = user
        .id
        .clone()
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| ApiError::invalid("No user id provided"))?;

    if ev.kind == "user.deleted" {
        state.users.delete_user(&external_id).await?;
        tracing::info!(target: "answerpipe::http", event = %ev.kind, "user removed");
        return Ok(message(StatusCode::OK, "User deleted"));
    }
    state
        .users
        .upsert_user(&user.into_record(external_id))
        .await?;
    tracing::info!(target: "answerpipe::http", event = %ev.kind, "user upserted");
    Ok(message(StatusCode::OK, "User processed"))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SyncUserBody {
    #[serde(default)]
    clerk_id: Option<String>,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    image_url: Option<String>,
}

async fn sync_user(
    State(state): State<AppState>,
    payload: Result<Json<SyncUserBody>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(body) = payload?;
    let external_id = body
        .clerk_id
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| ApiError::invalid("No Clerk ID provided"))?;
    state
        .users
        .upsert_user(&UserRecord {
            external_id,
            email: body.email,
            name: body.name,
            image_url: body.image_url,
        })
        .await?;
    Ok(message(StatusCode::OK, "User synced successfully"))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PushDataBody {
    #[serde(default)]
    user_id: Option<String>,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    search_query: Option<String>,
}

async fn push_data(
    State(state): State<AppState>,
    payload: Result<Json<PushDataBody>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(body) = payload?;
    let (Some(user_id), Some(content)) = (body.user_id, body.content) else {
        return Err(ApiError::invalid("Missing required fields"));
    };
    let rec = state
        .history
        .push(NewHistoryRecord {
            user_id,
            content,
            search_query: body.search_query,
        })
        .await
        .map_err(|e| match e {
            Error::NotFound(_) => ApiError::new(ErrorCode::NotFound, "User not found"),
            other => ApiError::from(other),
        })?;
    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({
            "message": "Search data stored successfully",
            "documentId": rec.id,
        })),
    )
        .into_response())
}

/// Wire shape of a saved answer (the web client keys rows by `_id`).
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredResponse {
    #[serde(rename = "_id")]
    pub id: String,
    pub user_id: String,
    pub username: String,
    pub email: String,
    pub content: String,
    pub search_query: Option<String>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl From<HistoryRecord> for StoredResponse {
    fn from(r: HistoryRecord) -> Self {
        Self {
            id: r.id,
            user_id: r.user_id,
            username: r.username,
            email: r.email,
            content: r.content,
            search_query: r.search_query,
            timestamp: r.created_at,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UserIdBody {
    #[serde(default)]
    user_id: Option<String>,
}

async fn get_stored_responses(
    State(state): State<AppState>,
    payload: Result<Json<UserIdBody>, JsonRejection>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let Json(body) = payload?;
    let user_id = body
        .user_id
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| ApiError::invalid("User ID is required"))?;
    let responses: Vec<StoredResponse> = state
        .history
        .list_for_user(&user_id)
        .await?
        .into_iter()
        .map(StoredResponse::from)
        .collect();
    Ok(Json(serde_json::json!({ "responses": responses })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResponseIdBody {
    #[serde(default)]
    response_id: Option<String>,
}

async fn delete_response(
    State(state): State<AppState>,
    payload: Result<Json<ResponseIdBody>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(body) = payload?;
    let id = body
        .response_id
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| ApiError::invalid("Response ID is required"))?;
    if !state.history.delete(&id).await? {
        return Err(ApiError::new(ErrorCode::NotFound, "Response not found"));
    }
    Ok(message(StatusCode::OK, "Response deleted successfully"))
}
