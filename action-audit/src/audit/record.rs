//! Audit record types and assembly
//!
//! An [`AuditRecord`] is the canonical, already-redacted description of one
//! request/response cycle. It is built once from the request metadata taken
//! before the handler ran and the response captured after the body finished
//! streaming.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;

use super::redact::Redactor;

/// Sentinel recorded when a body could not be captured
pub const UNAVAILABLE: &str = "[unavailable]";

/// One structured entry capturing a full request/response cycle
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditRecord {
    /// Request arrival time
    #[serde(with = "timestamp_millis")]
    pub timestamp: DateTime<Utc>,
    /// Correlation id (incoming `x-request-id` or generated)
    pub request_id: String,
    /// HTTP method
    pub method: String,
    /// Request path, without the query string
    pub url: String,
    /// Query parameters (redacted)
    pub query: Map<String, Value>,
    /// Request body (redacted)
    pub body: Value,
    /// Captured request headers (redacted)
    pub headers: Map<String, Value>,
    /// Authenticated user id, if any
    pub user_id: Option<String>,
    /// Client address
    pub ip: Option<String>,
    /// Client user agent
    pub user_agent: Option<String>,
    /// Response status code
    pub status_code: u16,
    /// Time from request arrival to response completion
    pub duration_ms: u64,
    /// Response body (redacted when structured)
    pub response_body: ResponseBody,
}

/// Materialized response body as stored in a record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "Value", into = "Value")]
pub enum ResponseBody {
    /// Body parsed as JSON
    Structured(Value),
    /// Body was valid UTF-8 but not JSON
    Text(String),
    /// Body could not be captured or decoded
    Unavailable,
}

impl ResponseBody {
    /// Interpret captured bytes: JSON first, then UTF-8 text
    pub fn from_bytes(bytes: &[u8], redactor: &Redactor) -> Self {
        if let Ok(value) = serde_json::from_slice::<Value>(bytes) {
            return ResponseBody::Structured(redactor.redact(&value));
        }
        match std::str::from_utf8(bytes) {
            Ok(text) => ResponseBody::Text(text.to_string()),
            Err(_) => ResponseBody::Unavailable,
        }
    }

    /// Structured payload, if the body was JSON
    pub fn as_json(&self) -> Option<&Value> {
        match self {
            ResponseBody::Structured(value) => Some(value),
            _ => None,
        }
    }
}

impl From<ResponseBody> for Value {
    fn from(body: ResponseBody) -> Self {
        match body {
            ResponseBody::Structured(value) => value,
            ResponseBody::Text(text) => Value::String(text),
            ResponseBody::Unavailable => Value::String(UNAVAILABLE.to_string()),
        }
    }
}

impl From<Value> for ResponseBody {
    fn from(value: Value) -> Self {
        match value {
            Value::String(s) if s == UNAVAILABLE => ResponseBody::Unavailable,
            Value::String(s) => ResponseBody::Text(s),
            other => ResponseBody::Structured(other),
        }
    }
}

/// Request side of a record, taken before the handler runs
#[derive(Debug, Clone)]
pub struct RequestMeta {
    /// Arrival time
    pub timestamp: DateTime<Utc>,
    /// Correlation id
    pub request_id: String,
    /// HTTP method
    pub method: String,
    /// Path without query
    pub url: String,
    /// Decoded query pairs, in order
    pub query: Vec<(String, String)>,
    /// `content-type` header, used to decode the body
    pub content_type: Option<String>,
    /// Raw body; `None` when the body was not buffered
    pub body: Option<Vec<u8>>,
    /// Captured header subset
    pub headers: Vec<(String, String)>,
    /// Authenticated user id
    pub user_id: Option<String>,
    /// Client address
    pub ip: Option<String>,
    /// Client user agent
    pub user_agent: Option<String>,
}

/// Captured body handed over by the response interceptor
#[derive(Debug, Clone, PartialEq)]
pub enum CapturedBody {
    /// Every data frame, concatenated
    Complete(Vec<u8>),
    /// Capture failed or the stream did not finish
    Unavailable,
}

/// Response side of a record
#[derive(Debug, Clone)]
pub struct ResponseMeta {
    /// Status code sent to the client
    pub status_code: u16,
    /// Captured body
    pub body: CapturedBody,
    /// Arrival to completion, monotonic
    pub duration: Duration,
    /// User id the handler attached to the response, if any
    pub user_id: Option<String>,
}

impl AuditRecord {
    /// Combine request and response metadata into a redacted record
    pub fn assemble(request: RequestMeta, response: ResponseMeta, redactor: &Redactor) -> Self {
        let query: Map<String, Value> = request
            .query
            .into_iter()
            .map(|(k, v)| (k, Value::String(v)))
            .collect();
        let headers: Map<String, Value> = request
            .headers
            .into_iter()
            .map(|(k, v)| (k, Value::String(v)))
            .collect();

        let body = match request.body {
            Some(bytes) => parse_request_body(&bytes, request.content_type.as_deref()),
            None => Value::String(UNAVAILABLE.to_string()),
        };

        let response_body = match response.body {
            CapturedBody::Complete(bytes) => ResponseBody::from_bytes(&bytes, redactor),
            CapturedBody::Unavailable => ResponseBody::Unavailable,
        };

        Self {
            timestamp: request.timestamp,
            request_id: request.request_id,
            method: request.method,
            url: request.url,
            query: redactor.redact_map(&query),
            body: redactor.redact(&body),
            headers: redactor.redact_map(&headers),
            user_id: request.user_id.or(response.user_id),
            ip: request.ip,
            user_agent: request.user_agent,
            status_code: response.status_code,
            duration_ms: u64::try_from(response.duration.as_millis()).unwrap_or(u64::MAX),
            response_body,
        }
    }
}

/// Decode a buffered request body into a JSON value (not yet redacted)
///
/// JSON and form bodies become structured values so their keys can be
/// redacted; other UTF-8 bodies are kept as text; empty bodies are `null`.
pub fn parse_request_body(bytes: &[u8], content_type: Option<&str>) -> Value {
    if bytes.is_empty() {
        return Value::Null;
    }

    let content_type = content_type.unwrap_or_default().to_ascii_lowercase();

    if content_type.starts_with("application/x-www-form-urlencoded") {
        if let Some(form) = std::str::from_utf8(bytes).ok().and_then(parse_pairs) {
            return Value::Object(
                form.into_iter()
                    .map(|(k, v)| (k, Value::String(v)))
                    .collect(),
            );
        }
    }

    if let Ok(value) = serde_json::from_slice::<Value>(bytes) {
        return value;
    }

    match std::str::from_utf8(bytes) {
        Ok(text) => Value::String(text.to_string()),
        Err(_) => Value::String(UNAVAILABLE.to_string()),
    }
}

/// Decode `application/x-www-form-urlencoded` pairs, keeping their order
///
/// Returns `None` when the input cannot be decoded.
pub fn parse_pairs(encoded: &str) -> Option<Vec<(String, String)>> {
    let uri: http::Uri = format!("/?{encoded}").parse().ok()?;
    axum::extract::Query::<Vec<(String, String)>>::try_from_uri(&uri)
        .ok()
        .map(|axum::extract::Query(pairs)| pairs)
}

mod timestamp_millis {
    use chrono::{DateTime, SecondsFormat, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(ts: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&ts.to_rfc3339_opts(SecondsFormat::Millis, true))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(d)?;
        DateTime::parse_from_rfc3339(&raw)
            .map(|ts| ts.with_timezone(&Utc))
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::redact::REDACTED;
    use serde_json::json;

    fn request_meta() -> RequestMeta {
        RequestMeta {
            timestamp: Utc::now(),
            request_id: "req-1".to_string(),
            method: "POST".to_string(),
            url: "/api/folders".to_string(),
            query: vec![
                ("page".to_string(), "2".to_string()),
                ("access_token".to_string(), "abc".to_string()),
            ],
            content_type: Some("application/json".to_string()),
            body: Some(br#"{"name":"Contracts","password":"pw"}"#.to_vec()),
            headers: vec![
                ("content-type".to_string(), "application/json".to_string()),
                ("authorization".to_string(), "Bearer xyz".to_string()),
            ],
            user_id: Some("u1".to_string()),
            ip: Some("10.0.0.1".to_string()),
            user_agent: Some("curl/8.0".to_string()),
        }
    }

    fn response_meta(body: CapturedBody) -> ResponseMeta {
        ResponseMeta {
            status_code: 201,
            body,
            duration: Duration::from_millis(12),
            user_id: None,
        }
    }

    #[test]
    fn test_assemble_redacts_everything() {
        let record = AuditRecord::assemble(
            request_meta(),
            response_meta(CapturedBody::Complete(
                br#"{"id":42,"name":"Contracts","token":"t-9"}"#.to_vec(),
            )),
            &Redactor::new(),
        );

        assert_eq!(record.method, "POST");
        assert_eq!(record.status_code, 201);
        assert_eq!(record.duration_ms, 12);
        assert_eq!(record.body["name"], "Contracts");
        assert_eq!(record.body["password"], REDACTED);
        assert_eq!(record.query["page"], "2");
        assert_eq!(record.query["access_token"], REDACTED);
        assert_eq!(record.headers["authorization"], REDACTED);
        assert_eq!(
            record.response_body,
            ResponseBody::Structured(json!({"id": 42, "name": "Contracts", "token": REDACTED}))
        );

        let line = serde_json::to_string(&record).unwrap();
        assert!(!line.contains("xyz"));
        assert!(!line.contains("t-9"));
        assert!(!line.contains("\"pw\""));
    }

    #[test]
    fn test_serialized_field_names() {
        let record = AuditRecord::assemble(
            request_meta(),
            response_meta(CapturedBody::Unavailable),
            &Redactor::new(),
        );
        let value = serde_json::to_value(&record).unwrap();
        for key in [
            "timestamp",
            "requestId",
            "method",
            "url",
            "query",
            "body",
            "headers",
            "userId",
            "ip",
            "userAgent",
            "statusCode",
            "durationMs",
            "responseBody",
        ] {
            assert!(value.get(key).is_some(), "missing {key}");
        }
        assert_eq!(value["responseBody"], UNAVAILABLE);
        assert!(value["timestamp"].as_str().unwrap().ends_with('Z'));
    }

    #[test]
    fn test_record_survives_line_round_trip() {
        let record = AuditRecord::assemble(
            request_meta(),
            response_meta(CapturedBody::Complete(b"plain text".to_vec())),
            &Redactor::new(),
        );
        let line = serde_json::to_string(&record).unwrap();
        let back: AuditRecord = serde_json::from_str(&line).unwrap();
        assert_eq!(back.response_body, ResponseBody::Text("plain text".to_string()));
        assert_eq!(
            back.timestamp.timestamp_millis(),
            record.timestamp.timestamp_millis()
        );
    }

    #[test]
    fn test_response_body_decoding() {
        let r = Redactor::new();
        assert_eq!(
            ResponseBody::from_bytes(br#"[1,2]"#, &r),
            ResponseBody::Structured(json!([1, 2]))
        );
        assert_eq!(
            ResponseBody::from_bytes(b"<h1>hi</h1>", &r),
            ResponseBody::Text("<h1>hi</h1>".to_string())
        );
        assert_eq!(
            ResponseBody::from_bytes(&[0xff, 0xfe, 0x00], &r),
            ResponseBody::Unavailable
        );
    }

    #[test]
    fn test_request_body_parsing() {
        assert_eq!(parse_request_body(b"", None), Value::Null);
        assert_eq!(
            parse_request_body(br#"{"a":1}"#, Some("application/json; charset=utf-8")),
            json!({"a": 1})
        );
        assert_eq!(
            parse_request_body(
                b"user=bob&password=hunter2",
                Some("application/x-www-form-urlencoded")
            ),
            json!({"user": "bob", "password": "hunter2"})
        );
        assert_eq!(parse_request_body(b"hello", Some("text/plain")), json!("hello"));
    }

    #[test]
    fn test_user_id_falls_back_to_response() {
        let mut request = request_meta();
        request.user_id = None;
        let mut response = response_meta(CapturedBody::Unavailable);
        response.user_id = Some("u-from-handler".to_string());

        let record = AuditRecord::assemble(request, response, &Redactor::new());
        assert_eq!(record.user_id.as_deref(), Some("u-from-handler"));
    }

    #[test]
    fn test_unbuffered_request_body_is_unavailable() {
        let mut request = request_meta();
        request.body = None;
        let record = AuditRecord::assemble(
            request,
            response_meta(CapturedBody::Unavailable),
            &Redactor::new(),
        );
        assert_eq!(record.body, json!(UNAVAILABLE));
    }
}
