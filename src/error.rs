//! Error types for NeuroFlex
//!
//! Every handler failure ends up as a [`ServiceError`], which knows its HTTP
//! status and renders the `{"error": ..., "success": false}` body the front
//! end expects.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

use crate::features::FeatureError;
use crate::model::ModelError;

/// Errors surfaced by the request handlers
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Missing required fields: {}", .0.join(", "))]
    MissingFields(Vec<String>),

    #[error("Missing patient fields: {}", .0.join(", "))]
    MissingPatientFields(Vec<String>),

    #[error("Invalid patient field '{field}': {reason}")]
    InvalidPatientField { field: String, reason: String },

    #[error("Invalid request body: {0}")]
    InvalidBody(String),

    #[error("Failed to connect to upstream API: {0}")]
    UpstreamUnavailable(String),

    #[error("Upstream API did not return data successfully")]
    UpstreamUnsuccessful,

    #[error("Unexpected error: invalid upstream payload: {0}")]
    UpstreamPayload(String),

    #[error("Session {session_id} not found for date {date}")]
    SessionNotFound { date: String, session_id: String },

    #[error("Model unavailable: {0}")]
    ModelUnavailable(String),

    #[error("Invalid session features: {0}")]
    Features(#[from] FeatureError),

    #[error("Unexpected error: {0}")]
    Model(#[from] ModelError),

    #[error("Unexpected error: {0}")]
    Internal(String),
}

impl ServiceError {
    pub fn invalid_patient_field(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidPatientField {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// HTTP status used when this error is returned from a handler
    pub fn status(&self) -> StatusCode {
        match self {
            ServiceError::MissingFields(_)
            | ServiceError::MissingPatientFields(_)
            | ServiceError::InvalidPatientField { .. }
            | ServiceError::InvalidBody(_)
            | ServiceError::Features(_) => StatusCode::BAD_REQUEST,
            ServiceError::SessionNotFound { .. } => StatusCode::NOT_FOUND,
            ServiceError::ModelUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ServiceError::UpstreamUnavailable(_)
            | ServiceError::UpstreamUnsuccessful
            | ServiceError::UpstreamPayload(_)
            | ServiceError::Model(_)
            | ServiceError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Short machine-readable code, used by the CLI error output
    pub fn code(&self) -> &'static str {
        match self {
            ServiceError::MissingFields(_) => "MISSING_FIELDS",
            ServiceError::MissingPatientFields(_) => "MISSING_PATIENT_FIELDS",
            ServiceError::InvalidPatientField { .. } => "INVALID_PATIENT_FIELD",
            ServiceError::InvalidBody(_) => "INVALID_BODY",
            ServiceError::UpstreamUnavailable(_) => "UPSTREAM_UNAVAILABLE",
            ServiceError::UpstreamUnsuccessful => "UPSTREAM_UNSUCCESSFUL",
            ServiceError::UpstreamPayload(_) => "UPSTREAM_PAYLOAD",
            ServiceError::SessionNotFound { .. } => "SESSION_NOT_FOUND",
            ServiceError::ModelUnavailable(_) => "MODEL_UNAVAILABLE",
            ServiceError::Features(_) => "INVALID_FEATURES",
            ServiceError::Model(_) => "MODEL_ERROR",
            ServiceError::Internal(_) => "INTERNAL",
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = Json(json!({
            "error": self.to_string(),
            "success": false,
        }));
        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_missing_fields_message() {
        let err = ServiceError::MissingFields(vec!["date".into(), "session_id".into()]);
        assert_eq!(err.to_string(), "Missing required fields: date, session_id");
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_upstream_errors_are_server_errors() {
        assert_eq!(
            ServiceError::UpstreamUnavailable("timeout".into()).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            ServiceError::UpstreamUnsuccessful.to_string(),
            "Upstream API did not return data successfully"
        );
    }

    #[test]
    fn test_status_mapping() {
        let not_found = ServiceError::SessionNotFound {
            date: "2024-01-15".into(),
            session_id: "abc".into(),
        };
        assert_eq!(not_found.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            ServiceError::ModelUnavailable("no artifact".into()).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            ServiceError::Features(FeatureError::NoTelemetry).status(),
            StatusCode::BAD_REQUEST
        );
    }
}
