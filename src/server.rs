//! HTTP handlers
//!
//! # Endpoints
//!
//! - `GET /health` - Liveness and model status
//! - `GET /api/fechas` - Dates with sessions
//! - `GET /api/datos/:fecha` - Sessions for one date
//! - `POST /api/actualizar-sesion` - Attach patient data to a session
//! - `POST /api/predict` - Score a session supplied in the body
//! - `GET /api/predict/:fecha/:session_id` - Score a stored session

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

use crate::config::ServiceConfig;
use crate::error::ServiceError;
use crate::predictor::CognitivePredictor;
use crate::types::{
    session_id_matches, DateListing, PredictRequest, Prediction, SessionListing, SessionRecord,
};
use crate::upstream::SessionSource;
use crate::validation::validate_update_request;
use crate::{SERVICE_NAME, SERVICE_VERSION};

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    source: Arc<dyn SessionSource>,
    predictor: Option<Arc<CognitivePredictor>>,
    started_at: Instant,
}

impl AppState {
    pub fn new(source: Arc<dyn SessionSource>, predictor: Option<CognitivePredictor>) -> Self {
        Self {
            source,
            predictor: predictor.map(Arc::new),
            started_at: Instant::now(),
        }
    }

    fn predictor(&self) -> Result<Arc<CognitivePredictor>, ServiceError> {
        self.predictor
            .clone()
            .ok_or_else(|| ServiceError::ModelUnavailable("no model artifact loaded".into()))
    }
}

/// Build the application router
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/fechas", get(list_dates))
        .route("/api/datos/:fecha", get(list_sessions))
        .route("/api/actualizar-sesion", post(update_session))
        .route("/api/predict", post(predict_session))
        .route("/api/predict/:fecha/:session_id", get(predict_stored_session))
        .with_state(state)
}

/// Bind to the configured address and serve until Ctrl-C
pub async fn serve(config: &ServiceConfig, state: AppState) -> Result<(), ServiceError> {
    let addr = config
        .bind_addr()
        .map_err(|e| ServiceError::internal(e.to_string()))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| ServiceError::internal(format!("failed to bind {}: {}", addr, e)))?;

    info!("NeuroFlex backend listening on http://{}", addr);
    info!("Upstream API: {}", config.upstream_base_url);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| ServiceError::internal(format!("server error: {}", e)))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}

/// Run a blocking upstream call on the blocking pool
async fn run_blocking<T, F>(f: F) -> Result<T, ServiceError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, ServiceError> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ServiceError::internal(format!("worker task failed: {}", e)))?
}

async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "service": SERVICE_NAME,
        "version": SERVICE_VERSION,
        "model_loaded": state.predictor.is_some(),
        "uptime_seconds": state.started_at.elapsed().as_secs(),
    }))
}

async fn list_dates(State(state): State<AppState>) -> Result<Json<DateListing>, ServiceError> {
    let source = Arc::clone(&state.source);
    match run_blocking(move || source.fetch_dates()).await {
        Ok(listing) => {
            info!(dates = listing.fechas.len(), "dates listed");
            Ok(Json(listing))
        }
        Err(e) => {
            error!("Failed to list dates: {}", e);
            Err(e)
        }
    }
}

async fn list_sessions(
    State(state): State<AppState>,
    Path(fecha): Path<String>,
) -> Result<Json<SessionListing>, ServiceError> {
    let source = Arc::clone(&state.source);
    let date = fecha.clone();
    match run_blocking(move || source.fetch_sessions(&date)).await {
        Ok(listing) => {
            info!(fecha = %fecha, sessions = listing.sessions.len(), "sessions listed");
            Ok(Json(listing))
        }
        Err(e) => {
            error!("Failed to list sessions for {}: {}", fecha, e);
            Err(e)
        }
    }
}

async fn update_session(
    State(state): State<AppState>,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<Json<Value>, ServiceError> {
    let Json(body) = body.map_err(|e| ServiceError::InvalidBody(e.body_text()))?;

    if let Err(e) = validate_update_request(&body) {
        warn!("Rejected session update: {}", e);
        return Err(e);
    }

    let session_id = match &body["session_id"] {
        Value::String(id) => id.clone(),
        other => other.to_string(),
    };

    let source = Arc::clone(&state.source);
    match run_blocking(move || source.update_session(&body)).await {
        Ok(reply) => {
            info!(session_id = %session_id, "session updated");
            Ok(Json(reply))
        }
        Err(e) => {
            error!("Failed to update session {}: {}", session_id, e);
            Err(e)
        }
    }
}

async fn predict_session(
    State(state): State<AppState>,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<Json<Value>, ServiceError> {
    let Json(body) = body.map_err(|e| ServiceError::InvalidBody(e.body_text()))?;
    let request: PredictRequest =
        serde_json::from_value(body).map_err(|e| ServiceError::InvalidBody(e.to_string()))?;

    let predictor = state.predictor()?;
    let prediction = predictor.predict(&request.data, request.patient_data.as_ref())?;
    Ok(prediction_response(prediction))
}

async fn predict_stored_session(
    State(state): State<AppState>,
    Path((fecha, session_id)): Path<(String, String)>,
) -> Result<Json<Value>, ServiceError> {
    let predictor = state.predictor()?;

    let source = Arc::clone(&state.source);
    let date = fecha.clone();
    let listing = run_blocking(move || source.fetch_sessions(&date)).await?;

    let raw = listing
        .sessions
        .into_iter()
        .find(|s| session_id_matches(&s["session_id"], &session_id))
        .ok_or_else(|| ServiceError::SessionNotFound {
            date: fecha.clone(),
            session_id: session_id.clone(),
        })?;
    let session: SessionRecord =
        serde_json::from_value(raw).map_err(|e| ServiceError::UpstreamPayload(e.to_string()))?;

    let patient = session.patient_value();
    let prediction = predictor.predict(&session.data, patient.as_ref())?;
    info!(fecha = %fecha, session_id = %session_id, label = %prediction.label, "stored session scored");
    Ok(prediction_response(prediction))
}

fn prediction_response(prediction: Prediction) -> Json<Value> {
    Json(json!({
        "prediction": prediction,
        "success": true,
    }))
}
