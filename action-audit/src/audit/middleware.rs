//! Audit middleware for axum routers
//!
//! Captures request metadata before the handler runs, wraps the response
//! body in a [`CaptureBody`], and hands the raw capture to the audit worker
//! once the body has finished streaming to the client.
//!
//! # Example
//!
//! ```rust,ignore
//! use action_audit::prelude::*;
//!
//! let logger = AuditLogger::new(config.audit.clone());
//! let app = Router::new()
//!     .route("/api/folders", post(create_folder))
//!     .with_audit(logger);
//! ```

use axum::{
    body::Body,
    extract::{ConnectInfo, Request, State},
    http::{header, request::Parts, HeaderMap},
    middleware::Next,
    response::Response,
    Router,
};
use axum::body::Bytes;
use chrono::Utc;
use futures::StreamExt;
use http_body::Body as _;
use std::net::SocketAddr;
use std::time::Instant;
use uuid::Uuid;

use super::capture::CaptureBody;
use super::logger::AuditLogger;
use super::record::{parse_pairs, RequestMeta, ResponseMeta};

/// Identity of the caller, set by an outer auth layer or by the handler
///
/// Inserted as a request extension it takes precedence over the configured
/// user id header. A handler may also attach it to its response.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuthenticatedUser(pub String);

/// Router extension for mounting the audit middleware
pub trait AuditLayerExt {
    /// Audit every request handled by this router
    fn with_audit(self, logger: AuditLogger) -> Self;
}

impl<S> AuditLayerExt for Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    fn with_audit(self, logger: AuditLogger) -> Self {
        self.layer(axum::middleware::from_fn_with_state(logger, audit_middleware))
    }
}

/// Audit middleware function
///
/// For use with `axum::middleware::from_fn_with_state`. Requests pass through
/// untouched when the logger is disabled or the path matches one of the
/// `excluded_routes` patterns.
pub async fn audit_middleware(
    State(logger): State<AuditLogger>,
    request: Request<Body>,
    next: Next,
) -> Response {
    if !logger.is_enabled()
        || path_matches_patterns(request.uri().path(), &logger.config().excluded_routes)
    {
        return next.run(request).await;
    }

    let started = Instant::now();
    let timestamp = Utc::now();

    let (parts, body) = request.into_parts();
    let config = logger.config();
    let (body, buffered) = buffer_body(&parts.headers, body, config.max_body_bytes).await;

    let meta = RequestMeta {
        timestamp,
        request_id: header_str(&parts.headers, "x-request-id")
            .map(String::from)
            .unwrap_or_else(|| Uuid::now_v7().to_string()),
        method: parts.method.to_string(),
        url: parts.uri.path().to_string(),
        query: parts.uri.query().and_then(parse_pairs).unwrap_or_default(),
        content_type: header_str(&parts.headers, header::CONTENT_TYPE.as_str()).map(String::from),
        body: buffered,
        headers: captured_headers(&parts.headers, &config.captured_headers),
        user_id: request_user(&parts, &config.user_id_header),
        ip: client_ip(&parts),
        user_agent: header_str(&parts.headers, header::USER_AGENT.as_str()).map(String::from),
    };
    let capture_limit = config.max_capture_bytes;

    let response = next.run(Request::from_parts(parts, body)).await;

    let (parts, body) = response.into_parts();
    let status_code = parts.status.as_u16();
    let response_user = parts
        .extensions
        .get::<AuthenticatedUser>()
        .map(|user| user.0.clone());

    // runs inside the client's poll; only a channel send happens here
    let body = CaptureBody::new(body, capture_limit, started, move |captured| {
        logger.submit_capture(
            meta,
            ResponseMeta {
                status_code,
                body: captured.body,
                duration: captured.duration,
                user_id: response_user,
            },
        );
    });

    Response::from_parts(parts, body.into_body())
}

/// Buffer the request body when its length is known and within `limit`
///
/// Returns the body to hand to the handler and the bytes for the record.
/// Bodies of unknown or excessive length are passed through untouched. A
/// body that fails or overruns mid-read is re-supplied as the chunks already
/// read followed by the remainder of the stream, error included.
async fn buffer_body(headers: &HeaderMap, body: Body, limit: usize) -> (Body, Option<Vec<u8>>) {
    if body.is_end_stream() {
        return (body, Some(Vec::new()));
    }

    let length = header_str(headers, header::CONTENT_LENGTH.as_str())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .or_else(|| body.size_hint().exact());

    match length {
        Some(len) if len <= limit as u64 => {}
        _ => return (body, None),
    }

    let mut stream = body.into_data_stream();
    let mut read: Vec<Bytes> = Vec::new();
    let mut total = 0usize;

    while let Some(chunk) = stream.next().await {
        match chunk {
            Ok(data) => {
                total += data.len();
                read.push(data);
                if total > limit {
                    tracing::debug!(limit, "Request body exceeded its declared length");
                    let prefix = futures::stream::iter(read.into_iter().map(Ok));
                    return (Body::from_stream(prefix.chain(stream)), None);
                }
            }
            Err(e) => {
                tracing::debug!(error = %e, "Failed to buffer request body for audit");
                let replay = read
                    .into_iter()
                    .map(Ok)
                    .chain(std::iter::once(Err(e)));
                return (Body::from_stream(futures::stream::iter(replay)), None);
            }
        }
    }

    let bytes: Bytes = read.concat().into();
    let copy = bytes.to_vec();
    (Body::from(bytes), Some(copy))
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Configured header subset; repeated headers are joined with `, `
fn captured_headers(headers: &HeaderMap, names: &[String]) -> Vec<(String, String)> {
    names
        .iter()
        .filter_map(|name| {
            let name = name.to_ascii_lowercase();
            let values: Vec<String> = headers
                .get_all(name.as_str())
                .iter()
                .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned())
                .collect();
            if values.is_empty() {
                None
            } else {
                Some((name, values.join(", ")))
            }
        })
        .collect()
}

fn request_user(parts: &Parts, user_id_header: &str) -> Option<String> {
    parts
        .extensions
        .get::<AuthenticatedUser>()
        .map(|user| user.0.clone())
        .or_else(|| {
            header_str(&parts.headers, user_id_header)
                .map(str::trim)
                .filter(|id| !id.is_empty())
                .map(String::from)
        })
}

/// `x-forwarded-for` first hop, then `x-real-ip`, then the socket peer
fn client_ip(parts: &Parts) -> Option<String> {
    header_str(&parts.headers, "x-forwarded-for")
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|ip| !ip.is_empty())
        .or_else(|| header_str(&parts.headers, "x-real-ip").map(str::trim))
        .map(String::from)
        .or_else(|| {
            parts
                .extensions
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| addr.ip().to_string())
        })
}

/// Check if a path matches any of the given glob patterns
pub fn path_matches_patterns(path: &str, patterns: &[String]) -> bool {
    patterns
        .iter()
        .any(|pattern| path_matches_glob(path, pattern))
}

/// Segment-wise glob matching for route patterns
///
/// - `*` matches exactly one path segment
/// - `**` matches any number of remaining segments, including none
/// - `*` inside a segment matches any run of characters (`*.css`)
pub fn path_matches_glob(path: &str, pattern: &str) -> bool {
    if path == pattern {
        return true;
    }
    let path: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    let pattern: Vec<&str> = pattern.split('/').filter(|s| !s.is_empty()).collect();
    match_segments(&path, &pattern)
}

fn match_segments(path: &[&str], pattern: &[&str]) -> bool {
    match (pattern.first(), path.first()) {
        (None, None) => true,
        (Some(&"**"), _) => {
            // zero segments, or consume one and retry
            match_segments(path, &pattern[1..])
                || (!path.is_empty() && match_segments(&path[1..], pattern))
        }
        (Some(p), Some(s)) => segment_matches(s, p) && match_segments(&path[1..], &pattern[1..]),
        _ => false,
    }
}

fn segment_matches(segment: &str, pattern: &str) -> bool {
    if pattern == "*" {
        return true;
    }
    let pieces: Vec<&str> = pattern.split('*').collect();
    let (Some((first, rest)), Some(last)) = (pieces.split_first(), pieces.last()) else {
        return segment == pattern;
    };
    if rest.is_empty() {
        return segment == pattern;
    }

    let Some(mut remaining) = segment.strip_prefix(first) else {
        return false;
    };
    for piece in &rest[..rest.len() - 1] {
        match remaining.find(piece) {
            Some(at) => remaining = &remaining[at + piece.len()..],
            None => return false,
        }
    }
    remaining.ends_with(last)
}
