//! Payload sanitization
//!
//! Strips credentials from captured request headers and bounds the size of
//! serialized payloads before they reach the database.

use serde::Serialize;
use serde_json::{Map, Value};

/// Header keys containing any of these (case-insensitive) are dropped
const SENSITIVE_HEADER_KEYS: [&str; 5] =
    ["authorization", "x-api-key", "cookie", "token", "api-key"];

/// Suffix appended to payloads cut at the size limit
pub const TRUNCATION_MARKER: &str = "... (truncated due to size limit)";

/// Check whether a header name may carry credentials
pub fn is_sensitive_header(key: &str) -> bool {
    let lower = key.to_lowercase();
    SENSITIVE_HEADER_KEYS.iter().any(|s| lower.contains(s))
}

/// Remove sensitive headers entirely
///
/// A value that is not a JSON object is replaced with an empty object.
pub fn sanitize_headers(headers: &Value) -> Value {
    match headers {
        Value::Object(map) => Value::Object(
            map.iter()
                .filter(|(key, _)| !is_sensitive_header(key))
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect::<Map<String, Value>>(),
        ),
        _ => Value::Object(Map::new()),
    }
}

/// Sanitize `request.headers` in place, if the request carries headers
pub fn sanitize_request_headers(request: &mut Value) {
    if let Some(headers) = request.get_mut("headers") {
        if !headers.is_null() {
            *headers = sanitize_headers(headers);
        }
    }
}

/// Serialize `value`, truncating output longer than `max_size` bytes
///
/// Truncated output ends with [`TRUNCATION_MARKER`] and is generally not
/// valid JSON any more.
pub fn safe_json_stringify<T: Serialize + ?Sized>(value: &T, max_size: usize) -> String {
    match serde_json::to_string(value) {
        Ok(s) if s.len() > max_size => {
            let mut cut = max_size;
            while !s.is_char_boundary(cut) {
                cut -= 1;
            }
            format!("{}{}", &s[..cut], TRUNCATION_MARKER)
        }
        Ok(s) => s,
        Err(e) => serde_json::json!({
            "error": "Failed to stringify object",
            "message": e.to_string(),
        })
        .to_string(),
    }
}

/// Serialize a payload field, storing `{}` for an absent payload
pub fn stringify_payload(value: &Value, max_size: usize) -> String {
    if value.is_null() {
        "{}".to_string()
    } else {
        safe_json_stringify(value, max_size)
    }
}
