// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! HTTP API and notification stream

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::classifier::{ModelStatus, Prediction, TrainingSummary};
use crate::db::{FileRecord, FileState, InventoryStats};
use crate::events::Notification;
use crate::jobs::{JobDispatcher, JobHandle, JobInfo};
use crate::relocate::RelocationItem;
use crate::{DropsortError, Pipeline};

/// Shared application state
pub struct AppState {
    pub dispatcher: JobDispatcher,
}

impl AppState {
    pub fn new(pipeline: Arc<Pipeline>) -> Self {
        Self {
            dispatcher: JobDispatcher::new(pipeline),
        }
    }

    fn pipeline(&self) -> &Pipeline {
        self.dispatcher.pipeline()
    }
}

/// Create the web application router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/sync", post(api_sync))
        .route("/api/relocate", post(api_relocate))
        .route("/api/relocate/pending", post(api_relocate_pending))
        .route("/api/train", post(api_train))
        .route("/api/classify", post(api_classify))
        .route("/api/model", get(api_model_status))
        .route("/api/jobs", get(api_list_jobs))
        .route("/api/jobs/:id", get(api_get_job).delete(api_cancel_job))
        .route("/api/files", get(api_list_files))
        .route("/api/files/:id/hold", post(api_hold_file))
        .route("/api/stats", get(api_stats))
        .route("/ws", get(ws_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Error body returned by every handler
#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

struct ApiError(DropsortError);

impl From<DropsortError> for ApiError {
    fn from(e: DropsortError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            DropsortError::NotFound(_) => StatusCode::NOT_FOUND,
            DropsortError::InvalidCategory(_) | DropsortError::TrainingDataInvalid(_) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            DropsortError::ModelUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            DropsortError::DestinationExists(_)
            | DropsortError::InvalidTransition(_)
            | DropsortError::Cancelled => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            warn!("Request failed: {}", self.0);
        }
        (status, Json(ErrorBody { error: self.0.to_string() })).into_response()
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

// === Jobs ===

async fn api_sync(State(state): State<Arc<AppState>>) -> ApiResult<(StatusCode, Json<JobHandle>)> {
    let handle = state.dispatcher.request_synchronize()?;
    Ok((StatusCode::ACCEPTED, Json(handle)))
}

#[derive(Debug, Deserialize)]
struct RelocateRequest {
    items: Vec<RelocationItem>,
}

async fn api_relocate(
    State(state): State<Arc<AppState>>,
    Json(request): Json<RelocateRequest>,
) -> ApiResult<(StatusCode, Json<JobHandle>)> {
    let handle = state.dispatcher.request_relocate(request.items)?;
    Ok((StatusCode::ACCEPTED, Json(handle)))
}

async fn api_relocate_pending(
    State(state): State<Arc<AppState>>,
) -> ApiResult<(StatusCode, Json<JobHandle>)> {
    let items = state.pipeline().relocation_candidates()?;
    debug!("Relocating {} pending records", items.len());
    let handle = state.dispatcher.request_relocate(items)?;
    Ok((StatusCode::ACCEPTED, Json(handle)))
}

async fn api_list_jobs(State(state): State<Arc<AppState>>) -> ApiResult<Json<Vec<JobInfo>>> {
    Ok(Json(state.dispatcher.jobs()?))
}

async fn api_get_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<JobInfo>> {
    state
        .dispatcher
        .status(id)?
        .map(Json)
        .ok_or_else(|| DropsortError::NotFound(format!("job {}", id)).into())
}

async fn api_cancel_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    if state.dispatcher.cancel(id)? {
        return Ok(StatusCode::ACCEPTED);
    }
    match state.dispatcher.status(id)? {
        Some(_) => Ok(StatusCode::CONFLICT),
        None => Err(DropsortError::NotFound(format!("job {}", id)).into()),
    }
}

// === Classifier ===

async fn api_train(
    State(state): State<Arc<AppState>>,
) -> ApiResult<Json<TrainingSummary>> {
    let pipeline = state.dispatcher.pipeline().clone();
    let summary = tokio::task::spawn_blocking(move || pipeline.train())
        .await
        .map_err(|e| DropsortError::Config(format!("training task failed: {}", e)))??;
    Ok(Json(summary))
}

#[derive(Debug, Deserialize)]
struct ClassifyRequest {
    names: Vec<String>,
}

#[derive(Debug, Serialize)]
struct ClassifiedName {
    name: String,
    #[serde(flatten)]
    prediction: Prediction,
}

async fn api_classify(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ClassifyRequest>,
) -> ApiResult<Json<Vec<ClassifiedName>>> {
    let pipeline = state.dispatcher.pipeline().clone();
    let results = tokio::task::spawn_blocking(move || pipeline.classify(&request.names))
        .await
        .map_err(|e| DropsortError::Config(format!("classification task failed: {}", e)))??;
    Ok(Json(
        results
            .into_iter()
            .map(|(name, prediction)| ClassifiedName { name, prediction })
            .collect(),
    ))
}

async fn api_model_status(State(state): State<Arc<AppState>>) -> ApiResult<Json<ModelStatus>> {
    Ok(Json(state.pipeline().model_status()?))
}

// === Inventory ===

#[derive(Debug, Deserialize)]
struct FilesQuery {
    state: Option<String>,
    limit: Option<usize>,
}

async fn api_list_files(
    State(state): State<Arc<AppState>>,
    Query(query): Query<FilesQuery>,
) -> Response {
    if let Some(name) = query.state.as_deref() {
        if !FileState::NAMES.contains(&name) {
            let body = ErrorBody {
                error: format!("unknown state '{}', expected one of {}", name, FileState::NAMES.join(", ")),
            };
            return (StatusCode::BAD_REQUEST, Json(body)).into_response();
        }
    }
    let limit = query.limit.unwrap_or(100);
    match state.pipeline().db().list_files(query.state.as_deref(), limit) {
        Ok(files) => Json::<Vec<FileRecord>>(files).into_response(),
        Err(e) => ApiError(e).into_response(),
    }
}

#[derive(Debug, Deserialize)]
struct HoldRequest {
    hold: bool,
}

async fn api_hold_file(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(request): Json<HoldRequest>,
) -> ApiResult<Json<FileRecord>> {
    Ok(Json(state.pipeline().db().set_not_to_move(&id, request.hold)?))
}

async fn api_stats(State(state): State<Arc<AppState>>) -> ApiResult<Json<InventoryStats>> {
    Ok(Json(state.pipeline().db().get_stats()?))
}

// === Notifications ===

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let receiver = state.pipeline().hub().subscribe();
    ws.on_upgrade(move |socket| stream_notifications(socket, receiver))
}

/// Forward every hub notification to the socket as JSON text
async fn stream_notifications(socket: WebSocket, mut receiver: broadcast::Receiver<Notification>) {
    let (mut sender, mut incoming) = socket.split();
    debug!("Notification subscriber connected");

    loop {
        tokio::select! {
            event = receiver.recv() => match event {
                Ok(notification) => {
                    let text = match serde_json::to_string(&notification) {
                        Ok(t) => t,
                        Err(e) => {
                            warn!("Failed to encode notification: {}", e);
                            continue;
                        }
                    };
                    if sender.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("WebSocket subscriber lagged, skipped {} events", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            message = incoming.next() => match message {
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                Some(Ok(_)) => {}
            },
        }
    }

    debug!("Notification subscriber disconnected");
}

/// Start the web server on the configured address
pub async fn start_server(pipeline: Arc<Pipeline>) -> crate::Result<()> {
    let addr = format!("{}:{}", pipeline.config().web.host, pipeline.config().web.port);
    let state = Arc::new(AppState::new(pipeline));

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("API available at http://{}", addr);

    let router = create_router(state);
    axum::serve(listener, router)
        .await
        .map_err(|e| DropsortError::Config(format!("Server error: {}", e)))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::db::Database;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn test_state(root: &std::path::Path) -> Arc<AppState> {
        let config = AppConfig::rooted_at(root);
        std::fs::create_dir_all(root.join("inbox")).unwrap();
        let pipeline = Pipeline::new(config, Database::in_memory().unwrap()).unwrap();
        Arc::new(AppState::new(Arc::new(pipeline)))
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_stats_on_empty_inventory() {
        let dir = tempfile::tempdir().unwrap();
        let app = create_router(test_state(dir.path()));

        let response = app
            .oneshot(Request::get("/api/stats").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["file_count"], 0);
    }

    #[tokio::test]
    async fn test_unknown_state_filter_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let app = create_router(test_state(dir.path()));

        let response = app
            .oneshot(Request::get("/api/files?state=bogus").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_classify_without_corpus_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let app = create_router(test_state(dir.path()));

        let request = Request::post("/api/classify")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"names":["invoice_2024.pdf"]}"#))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_hold_unknown_record_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let app = create_router(test_state(dir.path()));

        let request = Request::post("/api/files/nope/hold")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"hold":true}"#))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_hold_relocated_record_conflicts() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path());
        let mut record = FileRecord::discovered("invoice_2024.pdf", "/inbox", 10, chrono::Utc::now());
        record.categorize("Invoices").unwrap();
        record.relocate("Invoices").unwrap();
        state.pipeline().db().insert_files(&[record.clone()]).unwrap();
        let app = create_router(state);

        let request = Request::post(format!("/api/files/{}/hold", record.id).as_str())
            .header("content-type", "application/json")
            .body(Body::from(r#"{"hold":true}"#))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
        let error = body_json(response).await["error"].as_str().unwrap().to_string();
        assert!(error.starts_with("Invalid state transition"));
    }

    #[tokio::test]
    async fn test_sync_returns_job_handle() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path());
        let app = create_router(state.clone());

        let response = app
            .oneshot(Request::post("/api/sync").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);

        let json = body_json(response).await;
        assert_eq!(json["kind"], "synchronize");
        let id: Uuid = json["id"].as_str().unwrap().parse().unwrap();
        let info = state.dispatcher.wait(id).await.unwrap().unwrap();
        assert!(info.status.is_finished());
    }

    #[tokio::test]
    async fn test_unknown_job_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let app = create_router(test_state(dir.path()));

        let uri = format!("/api/jobs/{}", Uuid::new_v4());
        let response = app
            .oneshot(Request::get(uri.as_str()).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
