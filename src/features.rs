//! Feature assembly
//!
//! This module maps loosely-structured session JSON plus patient metadata into
//! the fixed-order numeric vector the classifier was trained on:
//! - Task telemetry (precision, hits, active and tutorial time)
//! - Response times for the scene prompts
//! - Patient age and dominant hand
//!
//! Upstream values arrive as numbers, numeric strings, booleans or not at all.
//! Anything that cannot be read as a finite number is filled with
//! [`MISSING_FILL_VALUE`] and reported in [`FeatureVector::missing`].

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use thiserror::Error;

/// Value used for features that could not be read
pub const MISSING_FILL_VALUE: f64 = 0.0;

/// Canonical feature order
pub const FEATURE_NAMES: [&str; 13] = [
    "Precision",
    "TiempoActivoTarea",
    "CantAciertasTotales",
    "ObjetosInteractuadosCorrectamente",
    "TiempoTutorial",
    "TipoEscena",
    "TiempoRespuestaPararse",
    "TiempoRespuestaPregunta1",
    "TiempoRespuestaPregunta2",
    "TiempoRespuestaPregunta3",
    "TiempoCapturarNumero",
    "age",
    "dominant_hand",
];

/// Number of features in the canonical vector
pub const FEATURE_COUNT: usize = FEATURE_NAMES.len();

/// Where a feature is read from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeatureSource {
    Session,
    Patient,
}

/// How a raw value becomes a number
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Numeric,
    /// Ordinal index into a vocabulary supplied by the model artifact
    Categorical,
    Hand,
}

/// Definition of one slot in the feature vector
#[derive(Debug, Clone, Copy)]
pub struct FeatureSpec {
    pub name: &'static str,
    pub source: FeatureSource,
    pub encoding: Encoding,
}

const fn session(name: &'static str, encoding: Encoding) -> FeatureSpec {
    FeatureSpec {
        name,
        source: FeatureSource::Session,
        encoding,
    }
}

const fn patient(name: &'static str, encoding: Encoding) -> FeatureSpec {
    FeatureSpec {
        name,
        source: FeatureSource::Patient,
        encoding,
    }
}

/// Feature definitions, in [`FEATURE_NAMES`] order
pub const FEATURE_SPECS: [FeatureSpec; FEATURE_COUNT] = [
    session("Precision", Encoding::Numeric),
    session("TiempoActivoTarea", Encoding::Numeric),
    session("CantAciertasTotales", Encoding::Numeric),
    session("ObjetosInteractuadosCorrectamente", Encoding::Numeric),
    session("TiempoTutorial", Encoding::Numeric),
    session("TipoEscena", Encoding::Categorical),
    session("TiempoRespuestaPararse", Encoding::Numeric),
    session("TiempoRespuestaPregunta1", Encoding::Numeric),
    session("TiempoRespuestaPregunta2", Encoding::Numeric),
    session("TiempoRespuestaPregunta3", Encoding::Numeric),
    session("TiempoCapturarNumero", Encoding::Numeric),
    patient("age", Encoding::Numeric),
    patient("dominant_hand", Encoding::Hand),
];

/// Feature assembly errors
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FeatureError {
    #[error("session data must be a JSON object, got {0}")]
    NotAnObject(&'static str),

    #[error("session data string is not valid JSON: {0}")]
    EmbeddedJson(String),

    #[error("session data contains none of the expected telemetry fields")]
    NoTelemetry,
}

/// Assembled feature vector in canonical order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    pub values: Vec<f64>,
    /// Names of features that were filled with [`MISSING_FILL_VALUE`]
    pub missing: Vec<String>,
}

impl FeatureVector {
    /// Feature values keyed by name
    pub fn named(&self) -> BTreeMap<String, f64> {
        FEATURE_NAMES
            .iter()
            .zip(self.values.iter())
            .map(|(name, value)| (name.to_string(), *value))
            .collect()
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        FEATURE_NAMES
            .iter()
            .position(|n| *n == name)
            .and_then(|i| self.values.get(i).copied())
    }
}

/// Builds feature vectors from session JSON
#[derive(Debug, Clone, Default)]
pub struct FeatureAssembler {
    /// Lower-cased vocabularies for categorical features
    vocabularies: BTreeMap<String, Vec<String>>,
}

impl FeatureAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an assembler with categorical vocabularies from a model artifact
    pub fn with_vocabularies(vocabularies: &BTreeMap<String, Vec<String>>) -> Self {
        let vocabularies = vocabularies
            .iter()
            .map(|(feature, values)| {
                let lowered = values.iter().map(|v| v.trim().to_lowercase()).collect();
                (feature.clone(), lowered)
            })
            .collect();
        Self { vocabularies }
    }

    /// Assemble the canonical feature vector
    ///
    /// `session_data` is the session's `data` object (or a string holding
    /// one). `patient` is the patient metadata object, if any.
    pub fn assemble(
        &self,
        session_data: &Value,
        patient: Option<&Value>,
    ) -> Result<FeatureVector, FeatureError> {
        let embedded;
        let data = match session_data {
            Value::Object(map) => map,
            Value::String(raw) => {
                embedded = parse_embedded_object(raw)?;
                &embedded
            }
            other => return Err(FeatureError::NotAnObject(json_type_name(other))),
        };

        let empty = Map::new();
        let patient = patient.and_then(Value::as_object).unwrap_or(&empty);

        let mut values = Vec::with_capacity(FEATURE_COUNT);
        let mut missing = Vec::new();
        let mut session_hits = 0;

        for spec in FEATURE_SPECS.iter() {
            let raw = match spec.source {
                FeatureSource::Session => data.get(spec.name),
                FeatureSource::Patient => patient.get(spec.name),
            };

            let value = raw.and_then(|v| self.encode(spec, v));
            match value {
                Some(v) => {
                    if spec.source == FeatureSource::Session {
                        session_hits += 1;
                    }
                    values.push(v);
                }
                None => {
                    missing.push(spec.name.to_string());
                    values.push(MISSING_FILL_VALUE);
                }
            }
        }

        if session_hits == 0 {
            return Err(FeatureError::NoTelemetry);
        }

        Ok(FeatureVector { values, missing })
    }

    fn encode(&self, spec: &FeatureSpec, value: &Value) -> Option<f64> {
        match spec.encoding {
            Encoding::Numeric => coerce_number(value),
            Encoding::Categorical => coerce_number(value).or_else(|| {
                let key = value.as_str()?.trim().to_lowercase();
                self.vocabularies
                    .get(spec.name)?
                    .iter()
                    .position(|v| *v == key)
                    .map(|i| i as f64)
            }),
            Encoding::Hand => coerce_number(value).or_else(|| encode_hand(value.as_str()?)),
        }
    }
}

fn parse_embedded_object(raw: &str) -> Result<Map<String, Value>, FeatureError> {
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(FeatureError::NotAnObject(json_type_name(&other))),
        Err(e) => Err(FeatureError::EmbeddedJson(e.to_string())),
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Read a loosely-typed JSON value as a finite number
///
/// Strings may carry a trailing `%`, thousands separators (`1.234,5` or
/// `1,234.5`) or a decimal comma.
pub fn coerce_number(value: &Value) -> Option<f64> {
    let number = match value {
        Value::Number(n) => n.as_f64(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        Value::String(s) => parse_numeric_str(s),
        _ => None,
    }?;
    number.is_finite().then_some(number)
}

fn parse_numeric_str(raw: &str) -> Option<f64> {
    let trimmed = raw.trim().trim_end_matches('%').trim();
    if trimmed.is_empty() {
        return None;
    }

    let normalized = match (trimmed.rfind(','), trimmed.rfind('.')) {
        // Comma after the last dot: dots group thousands, comma is decimal
        (Some(comma), Some(dot)) if comma > dot => trimmed.replace('.', "").replace(',', "."),
        // Dot after the last comma: commas group thousands
        (Some(_), Some(_)) => trimmed.replace(',', ""),
        // Several commas and no dot: thousands grouping, otherwise decimal comma
        (Some(_), None) if trimmed.matches(',').count() > 1 => trimmed.replace(',', ""),
        (Some(_), None) => trimmed.replace(',', "."),
        (None, Some(_)) if trimmed.matches('.').count() > 1 => trimmed.replace('.', ""),
        _ => trimmed.to_string(),
    };

    normalized.parse::<f64>().ok()
}

/// Encode dominant hand: right = 0, left = 1, ambidextrous = 2
fn encode_hand(raw: &str) -> Option<f64> {
    let key = raw.trim().to_lowercase();
    match key.as_str() {
        "right" | "derecha" | "diestro" | "diestra" | "r" | "d" => Some(0.0),
        "left" | "izquierda" | "zurdo" | "zurda" | "l" | "i" => Some(1.0),
        "ambidextrous" | "ambidiestro" | "ambidiestra" | "a" => Some(2.0),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn sample_session_data() -> Value {
        json!({
            "Precision": 85.5,
            "TiempoActivoTarea": 312.4,
            "CantAciertasTotales": 18,
            "ObjetosInteractuadosCorrectamente": "15",
            "TiempoTutorial": 45.0,
            "TipoEscena": "Cocina",
            "TiempoRespuestaPararse": 3.2,
            "TiempoRespuestaPregunta1": 5.1,
            "TiempoRespuestaPregunta2": 4.7,
            "TiempoRespuestaPregunta3": 6.3,
            "TiempoCapturarNumero": 2.9
        })
    }

    fn sample_patient() -> Value {
        json!({
            "name": "Ana Pérez",
            "age": 72,
            "rut": "12.345.678-5",
            "dominant_hand": "Derecha"
        })
    }

    fn assembler_with_scenes() -> FeatureAssembler {
        let mut vocab = BTreeMap::new();
        vocab.insert(
            "TipoEscena".to_string(),
            vec!["Sala".to_string(), "Cocina".to_string()],
        );
        FeatureAssembler::with_vocabularies(&vocab)
    }

    #[test]
    fn test_full_vector_in_canonical_order() {
        let fv = assembler_with_scenes()
            .assemble(&sample_session_data(), Some(&sample_patient()))
            .unwrap();

        assert_eq!(fv.values.len(), FEATURE_COUNT);
        assert!(fv.missing.is_empty());
        assert_eq!(
            fv.values,
            vec![85.5, 312.4, 18.0, 15.0, 45.0, 1.0, 3.2, 5.1, 4.7, 6.3, 2.9, 72.0, 0.0]
        );
    }

    #[test]
    fn test_missing_values_are_filled_and_reported() {
        let data = json!({"Precision": "90%", "TiempoTutorial": null});
        let fv = FeatureAssembler::new().assemble(&data, None).unwrap();

        assert_eq!(fv.get("Precision"), Some(90.0));
        assert_eq!(fv.get("TiempoTutorial"), Some(MISSING_FILL_VALUE));
        assert!(fv.missing.contains(&"TiempoTutorial".to_string()));
        assert!(fv.missing.contains(&"age".to_string()));
        assert_eq!(fv.missing.len(), FEATURE_COUNT - 1);
    }

    #[test]
    fn test_unknown_category_is_missing() {
        let mut data = sample_session_data();
        data["TipoEscena"] = json!("Jardín");
        let fv = assembler_with_scenes()
            .assemble(&data, Some(&sample_patient()))
            .unwrap();
        assert_eq!(fv.missing, vec!["TipoEscena".to_string()]);
    }

    #[test]
    fn test_numeric_category_passes_through() {
        let mut data = sample_session_data();
        data["TipoEscena"] = json!(3);
        let fv = FeatureAssembler::new().assemble(&data, None).unwrap();
        assert_eq!(fv.get("TipoEscena"), Some(3.0));
    }

    #[test]
    fn test_session_data_as_embedded_string() {
        let data = Value::String(sample_session_data().to_string());
        let fv = assembler_with_scenes()
            .assemble(&data, Some(&sample_patient()))
            .unwrap();
        assert_eq!(fv.get("CantAciertasTotales"), Some(18.0));
    }

    #[test]
    fn test_rejects_non_object_data() {
        assert_eq!(
            FeatureAssembler::new().assemble(&json!([1, 2]), None),
            Err(FeatureError::NotAnObject("array"))
        );
        assert!(matches!(
            FeatureAssembler::new().assemble(&json!("{not json"), None),
            Err(FeatureError::EmbeddedJson(_))
        ));
    }

    #[test]
    fn test_no_telemetry() {
        let data = json!({"Unrelated": 1});
        assert_eq!(
            FeatureAssembler::new().assemble(&data, Some(&sample_patient())),
            Err(FeatureError::NoTelemetry)
        );
    }

    #[test]
    fn test_coerce_number_formats() {
        assert_eq!(coerce_number(&json!("3,5")), Some(3.5));
        assert_eq!(coerce_number(&json!("1.234,5")), Some(1234.5));
        assert_eq!(coerce_number(&json!("1,234.5")), Some(1234.5));
        assert_eq!(coerce_number(&json!("1,234,567")), Some(1234567.0));
        assert_eq!(coerce_number(&json!("1.234.567")), Some(1234567.0));
        assert_eq!(coerce_number(&json!(" 42 % ")), Some(42.0));
        assert_eq!(coerce_number(&json!(true)), Some(1.0));
        assert_eq!(coerce_number(&json!("NaN")), None);
        assert_eq!(coerce_number(&json!("abc")), None);
        assert_eq!(coerce_number(&json!({})), None);
    }

    #[test]
    fn test_hand_encoding() {
        assert_eq!(encode_hand("Izquierda"), Some(1.0));
        assert_eq!(encode_hand(" right "), Some(0.0));
        assert_eq!(encode_hand("Ambidiestro"), Some(2.0));
        assert_eq!(encode_hand("both"), None);
    }

    #[test]
    fn test_named_features() {
        let fv = FeatureAssembler::new()
            .assemble(&sample_session_data(), Some(&sample_patient()))
            .unwrap();
        let named = fv.named();
        assert_eq!(named.len(), FEATURE_COUNT);
        assert_eq!(named["age"], 72.0);
    }
}
