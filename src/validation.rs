//! Request validation for session updates
//!
//! Required fields use JSON truthiness: absent, `null`, `false`, `0`, `""`,
//! `[]` and `{}` all count as missing.

use serde_json::Value;

use crate::error::ServiceError;

/// Top-level fields required by `POST /api/actualizar-sesion`
pub const REQUIRED_FIELDS: [&str; 3] = ["date", "session_id", "patient_data"];

/// Fields required inside `patient_data`
pub const REQUIRED_PATIENT_FIELDS: [&str; 4] = ["name", "age", "rut", "dominant_hand"];

/// Accepted patient age range (years)
pub const AGE_RANGE: std::ops::RangeInclusive<u64> = 1..=120;

/// Whether a JSON value counts as present
pub fn is_truthy(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Array(a)) => !a.is_empty(),
        Some(Value::Object(o)) => !o.is_empty(),
    }
}

fn missing_fields(object: &Value, required: &[&str]) -> Vec<String> {
    required
        .iter()
        .filter(|field| !is_truthy(object.get(**field)))
        .map(|field| field.to_string())
        .collect()
}

/// Validate a session update body before it is forwarded upstream
pub fn validate_update_request(body: &Value) -> Result<(), ServiceError> {
    if !body.is_object() {
        return Err(ServiceError::InvalidBody(
            "expected a JSON object".to_string(),
        ));
    }

    let missing = missing_fields(body, &REQUIRED_FIELDS);
    if !missing.is_empty() {
        return Err(ServiceError::MissingFields(missing));
    }

    let patient = &body["patient_data"];
    if !patient.is_object() {
        return Err(ServiceError::InvalidBody(
            "patient_data must be an object".to_string(),
        ));
    }

    let missing = missing_fields(patient, &REQUIRED_PATIENT_FIELDS);
    if !missing.is_empty() {
        return Err(ServiceError::MissingPatientFields(missing));
    }

    validate_age(&patient["age"])?;

    let rut = patient["rut"].as_str().unwrap_or_default();
    if !validate_rut(rut) {
        return Err(ServiceError::invalid_patient_field(
            "rut",
            "invalid format or check digit",
        ));
    }

    Ok(())
}

fn validate_age(age: &Value) -> Result<(), ServiceError> {
    let parsed = match age {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0 && *f >= 0.0).map(|f| f as u64)),
        Value::String(s) => s.trim().parse::<u64>().ok(),
        _ => None,
    };

    match parsed {
        Some(years) if AGE_RANGE.contains(&years) => Ok(()),
        Some(years) => Err(ServiceError::invalid_patient_field(
            "age",
            format!("{} is outside {}..={}", years, AGE_RANGE.start(), AGE_RANGE.end()),
        )),
        None => Err(ServiceError::invalid_patient_field(
            "age",
            "must be a whole number",
        )),
    }
}

/// Strip dots, dashes and whitespace from a RUT
fn clean_rut(rut: &str) -> String {
    rut.chars()
        .filter(|c| !matches!(c, '.' | '-') && !c.is_whitespace())
        .collect()
}

/// Compute the modulus-11 check digit for a RUT body
pub fn rut_check_digit(body: &str) -> Option<char> {
    let mut sum = 0u32;
    let mut multiplier = 2;
    for c in body.chars().rev() {
        sum += c.to_digit(10)? * multiplier;
        multiplier = if multiplier == 7 { 2 } else { multiplier + 1 };
    }

    Some(match 11 - (sum % 11) {
        11 => '0',
        10 => 'K',
        n => char::from_digit(n, 10)?,
    })
}

/// Validate a Chilean RUT (format and check digit)
pub fn validate_rut(rut: &str) -> bool {
    let cleaned = clean_rut(rut).to_uppercase();
    if !cleaned.is_ascii() || !(8..=9).contains(&cleaned.len()) {
        return false;
    }

    let (body, dv) = cleaned.split_at(cleaned.len() - 1);
    if !body.chars().all(|c| c.is_ascii_digit()) {
        return false;
    }

    match (rut_check_digit(body), dv.chars().next()) {
        (Some(expected), Some(actual)) => expected == actual,
        _ => false,
    }
}

/// Render a RUT as `12.345.678-5`
pub fn format_rut(raw: &str) -> String {
    let cleaned = clean_rut(raw).to_uppercase();
    let mut digits: Vec<char> = cleaned.chars().collect();
    let dv = match digits.pop() {
        Some(dv) if !digits.is_empty() => dv,
        _ => return cleaned,
    };

    let mut grouped = String::new();
    for (i, c) in digits.iter().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push('.');
        }
        grouped.push(*c);
    }
    format!("{}-{}", grouped, dv)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn valid_body() -> Value {
        json!({
            "date": "2024-01-15",
            "session_id": "abc-123",
            "patient_data": {
                "name": "Ana Pérez",
                "age": 72,
                "rut": "12.345.678-5",
                "dominant_hand": "Derecha"
            }
        })
    }

    #[test]
    fn test_truthiness() {
        assert!(!is_truthy(None));
        assert!(!is_truthy(Some(&json!(null))));
        assert!(!is_truthy(Some(&json!(0))));
        assert!(!is_truthy(Some(&json!(""))));
        assert!(!is_truthy(Some(&json!({}))));
        assert!(!is_truthy(Some(&json!([]))));
        assert!(!is_truthy(Some(&json!(false))));
        assert!(is_truthy(Some(&json!(0.5))));
        assert!(is_truthy(Some(&json!("x"))));
    }

    #[test]
    fn test_valid_request() {
        assert!(validate_update_request(&valid_body()).is_ok());
    }

    #[test]
    fn test_missing_top_level_fields_are_listed_in_order() {
        let err = validate_update_request(&json!({"session_id": ""})).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Missing required fields: date, session_id, patient_data"
        );
    }

    #[test]
    fn test_missing_patient_fields() {
        let mut body = valid_body();
        body["patient_data"]["age"] = json!(0);
        body["patient_data"]
            .as_object_mut()
            .unwrap()
            .remove("dominant_hand");

        match validate_update_request(&body) {
            Err(ServiceError::MissingPatientFields(fields)) => {
                assert_eq!(fields, vec!["age".to_string(), "dominant_hand".to_string()]);
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_non_object_body() {
        assert!(matches!(
            validate_update_request(&json!([1, 2])),
            Err(ServiceError::InvalidBody(_))
        ));
    }

    #[test]
    fn test_age_bounds() {
        let mut body = valid_body();
        body["patient_data"]["age"] = json!("200");
        assert!(matches!(
            validate_update_request(&body),
            Err(ServiceError::InvalidPatientField { ref field, .. }) if field == "age"
        ));

        body["patient_data"]["age"] = json!("81");
        assert!(validate_update_request(&body).is_ok());

        body["patient_data"]["age"] = json!(65.5);
        assert!(validate_update_request(&body).is_err());
    }

    #[test]
    fn test_rut_check_digit() {
        assert_eq!(rut_check_digit("12345678"), Some('5'));
        assert_eq!(rut_check_digit("11111111"), Some('1'));
        // 6.000.003: sum 18, 18 % 11 = 7, 11 - 7 = 4
        assert_eq!(rut_check_digit("6000003"), Some('4'));
    }

    #[test]
    fn test_validate_rut() {
        assert!(validate_rut("12.345.678-5"));
        assert!(validate_rut("123456785"));
        assert!(!validate_rut("12.345.678-9"));
        assert!(!validate_rut("1234-5"));
        assert!(!validate_rut("12a45678-5"));
    }

    #[test]
    fn test_validate_rut_with_k() {
        // 10.000.013: digits from the right 3,1,0,0,0,0,0,1 with 2..7
        // sum = 6 + 3 + 0 + 0 + 0 + 0 + 0 + 3 = 12, 11 - 1 = 10 -> K
        assert_eq!(rut_check_digit("10000013"), Some('K'));
        assert!(validate_rut("10.000.013-k"));
    }

    #[test]
    fn test_invalid_rut_rejected() {
        let mut body = valid_body();
        body["patient_data"]["rut"] = json!("12.345.678-0");
        assert!(matches!(
            validate_update_request(&body),
            Err(ServiceError::InvalidPatientField { ref field, .. }) if field == "rut"
        ));
    }

    #[test]
    fn test_format_rut() {
        assert_eq!(format_rut("123456785"), "12.345.678-5");
        assert_eq!(format_rut("1234567-k"), "1.234.567-K");
        assert_eq!(format_rut("5"), "5");
        assert_eq!(format_rut("1234567é"), "1.234.567-É");
    }

    #[test]
    fn test_non_ascii_rut_is_rejected_not_panicking() {
        assert!(!validate_rut("1234567é"));
        assert!(!validate_rut("123456É5"));

        let mut body = valid_body();
        body["patient_data"]["rut"] = json!("1234567é");
        assert!(matches!(
            validate_update_request(&body),
            Err(ServiceError::InvalidPatientField { ref field, .. }) if field == "rut"
        ));
    }
}
