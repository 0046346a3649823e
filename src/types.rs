//! Wire types shared by the upstream client and the HTTP handlers
//!
//! Field names follow the JSON the front end and the upstream API already
//! speak, which is why some of them are Spanish.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// `GET /data/dates` response from the upstream API
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct UpstreamDates {
    pub success: bool,
    pub dates: Vec<String>,
    pub total_dates: u64,
}

/// `GET /data/{date}` response from the upstream API
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct UpstreamSessions {
    pub success: bool,
    pub date: Option<String>,
    pub sessions: Vec<Value>,
    pub total_sessions: u64,
}

/// Dates listing returned by `/api/fechas`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DateListing {
    pub fechas: Vec<String>,
    pub total: u64,
    pub success: bool,
}

/// Sessions listing returned by `/api/datos/{fecha}`
///
/// Sessions are relayed exactly as upstream sent them; a session is only
/// parsed into a [`SessionRecord`] when it is scored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionListing {
    pub fecha: String,
    pub sessions: Vec<Value>,
    pub total_sessions: u64,
    pub success: bool,
}

/// One assessment session as stored upstream
///
/// `data` stays loosely typed: the telemetry keys vary between scene
/// versions and are only interpreted by the feature assembler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    #[serde(default)]
    pub session_id: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<Value>,
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub patient_info: Option<PatientInfo>,
    /// Upstream fields we do not interpret, passed through untouched
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl SessionRecord {
    /// Patient metadata as raw JSON, for the feature assembler
    pub fn patient_value(&self) -> Option<Value> {
        self.patient_info
            .as_ref()
            .and_then(|p| serde_json::to_value(p).ok())
    }
}

/// Patient metadata attached to a session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatientInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub age: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rut: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dominant_hand: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
    /// Patient fields we do not interpret, passed through untouched
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Compare a raw `session_id` against a path segment
pub fn session_id_matches(raw: &Value, id: &str) -> bool {
    match raw {
        Value::String(s) => s == id,
        Value::Number(n) => n.to_string() == id,
        _ => false,
    }
}

/// Body of `POST /api/predict`
#[derive(Debug, Clone, Deserialize)]
pub struct PredictRequest {
    pub data: Value,
    #[serde(default, alias = "patient_info")]
    pub patient_data: Option<Value>,
}

/// Scored cognitive-state label for one session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Prediction {
    pub prediction_id: String,
    pub label: String,
    pub confidence: f64,
    pub probabilities: BTreeMap<String, f64>,
    pub features: BTreeMap<String, f64>,
    pub missing_features: Vec<String>,
    pub model_version: u32,
    pub scored_at: DateTime<Utc>,
}
