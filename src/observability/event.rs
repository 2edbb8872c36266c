//! Telemetry event model
//!
//! One [`TelemetryEvent`] describes a single request that went through the
//! proxy: routing metadata, timings, token usage and the four payloads seen
//! along the way (client request, upstream request, upstream response, client
//! response).

use chrono::{DateTime, SecondsFormat, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};

/// Request timings in milliseconds
///
/// Numbers are kept as sent (integer or fractional) and keys beyond `ttft`
/// and `total` are carried through to storage unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Latency {
    /// Time to first token
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttft: Option<Number>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total: Option<Number>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Latency {
    pub fn total_ms(&self) -> Option<f64> {
        self.total.as_ref().and_then(Number::as_f64)
    }
}

/// Token usage reported by the provider
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tokens {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<Number>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion: Option<Number>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// One proxied request, as submitted by the producer and as read back
///
/// `id` and `timestamp` may be omitted on submit; both are filled in when the
/// event is flushed, so events read from the store always carry them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryEvent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub connection_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub latency: Latency,
    #[serde(default)]
    pub tokens: Tokens,
    #[serde(default)]
    pub request: Value,
    #[serde(default)]
    pub provider_request: Value,
    #[serde(default)]
    pub provider_response: Value,
    #[serde(default)]
    pub response: Value,
}

impl TelemetryEvent {
    /// Fill a missing id and timestamp
    pub(crate) fn ensure_identity(&mut self, now: DateTime<Utc>) {
        if self.id.as_deref().map_or(true, str::is_empty) {
            self.id = Some(generate_detail_id(self.model.as_deref(), now));
        }
        if self.timestamp.is_none() {
            self.timestamp = Some(now);
        }
    }
}

const ID_SUFFIX_ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
const ID_SUFFIX_LEN: usize = 6;

/// Generate a unique id for a request detail
///
/// Format: `{rfc3339 millis}-{6 random base36 chars}-{model}`, where the model
/// part keeps only `[a-zA-Z0-9-]` (anything else becomes `-`).
pub fn generate_detail_id(model: Option<&str>, now: DateTime<Utc>) -> String {
    let timestamp = now.to_rfc3339_opts(SecondsFormat::Millis, true);

    let mut rng = rand::thread_rng();
    let random: String = (0..ID_SUFFIX_LEN)
        .map(|_| ID_SUFFIX_ALPHABET[rng.gen_range(0..ID_SUFFIX_ALPHABET.len())] as char)
        .collect();

    let model_part = match model {
        Some(m) if !m.is_empty() => m
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '-' })
            .collect(),
        _ => "unknown".to_string(),
    };

    format!("{}-{}-{}", timestamp, random, model_part)
}
