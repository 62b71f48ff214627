//! Audit subsystem configuration
//!
//! Loaded from the `[audit]` section of config.toml or environment variables.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

const BYTES_PER_MB: i64 = 1024 * 1024;

/// Audit subsystem configuration
///
/// Controls whether requests are audited, where the two log files live and
/// when they rotate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditConfig {
    /// Enable the whole subsystem (default: true)
    ///
    /// When false no request is captured and neither log file is touched.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Rotation threshold in megabytes (default: 10)
    ///
    /// Zero or negative disables rotation.
    #[serde(default = "default_max_file_size_mb")]
    pub max_file_size_mb: i64,

    /// Primary file: one JSON record per line
    #[serde(default = "default_log_path")]
    pub log_path: PathBuf,

    /// Secondary file: human-readable blocks
    #[serde(default = "default_narrative_path")]
    pub narrative_path: PathBuf,

    /// JSON snapshot of the user list used to resolve display names
    #[serde(default)]
    pub user_directory_path: Option<PathBuf>,

    /// Header carrying the authenticated user id when no extension is present
    #[serde(default = "default_user_id_header")]
    pub user_id_header: String,

    /// Request headers copied (redacted) into each record
    #[serde(default = "default_captured_headers")]
    pub captured_headers: Vec<String>,

    /// Glob patterns for routes that are never audited
    ///
    /// Examples: `["/health", "/static/*"]`
    #[serde(default)]
    pub excluded_routes: Vec<String>,

    /// Additional key fragments treated as sensitive, on top of the built-in set
    #[serde(default)]
    pub extra_sensitive_keys: Vec<String>,

    /// Largest request body (by `content-length`) buffered for the record
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,

    /// Largest response body copied for the record
    #[serde(default = "default_max_capture_bytes")]
    pub max_capture_bytes: usize,

    /// Capacity of each background queue
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

impl AuditConfig {
    /// Rotation threshold in bytes, as understood by the appender
    pub fn max_file_size_bytes(&self) -> i64 {
        self.max_file_size_mb.saturating_mul(BYTES_PER_MB)
    }
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_file_size_mb: default_max_file_size_mb(),
            log_path: default_log_path(),
            narrative_path: default_narrative_path(),
            user_directory_path: None,
            user_id_header: default_user_id_header(),
            captured_headers: default_captured_headers(),
            excluded_routes: Vec::new(),
            extra_sensitive_keys: Vec::new(),
            max_body_bytes: default_max_body_bytes(),
            max_capture_bytes: default_max_capture_bytes(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_max_file_size_mb() -> i64 {
    10
}

fn default_log_path() -> PathBuf {
    PathBuf::from("logs/audit.log")
}

fn default_narrative_path() -> PathBuf {
    PathBuf::from("logs/audit-narrative.log")
}

fn default_user_id_header() -> String {
    "x-user-id".to_string()
}

fn default_captured_headers() -> Vec<String> {
    [
        "content-type",
        "content-length",
        "accept",
        "user-agent",
        "referer",
        "origin",
        "authorization",
        "x-request-id",
        "x-forwarded-for",
    ]
    .iter()
    .map(|h| h.to_string())
    .collect()
}

fn default_max_body_bytes() -> usize {
    1024 * 1024 // 1 MB
}

fn default_max_capture_bytes() -> usize {
    1024 * 1024 // 1 MB
}

fn default_queue_capacity() -> usize {
    1024
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audit_config_defaults() {
        let config = AuditConfig::default();
        assert!(config.enabled);
        assert_eq!(config.max_file_size_mb, 10);
        assert_eq!(config.log_path, PathBuf::from("logs/audit.log"));
        assert!(config.user_directory_path.is_none());
        assert_eq!(config.user_id_header, "x-user-id");
        assert!(config.captured_headers.contains(&"authorization".to_string()));
        assert!(config.excluded_routes.is_empty());
    }

    #[test]
    fn test_max_file_size_bytes() {
        let mut config = AuditConfig::default();
        assert_eq!(config.max_file_size_bytes(), 10 * 1024 * 1024);

        config.max_file_size_mb = 0;
        assert_eq!(config.max_file_size_bytes(), 0);

        config.max_file_size_mb = -3;
        assert!(config.max_file_size_bytes() < 0);
    }

    #[test]
    fn test_partial_deserialize_fills_defaults() {
        let config: AuditConfig =
            serde_json::from_str(r#"{"enabled": false, "excluded_routes": ["/health"]}"#).unwrap();
        assert!(!config.enabled);
        assert_eq!(config.excluded_routes, vec!["/health"]);
        assert_eq!(config.queue_capacity, 1024);
        assert_eq!(config.narrative_path, PathBuf::from("logs/audit-narrative.log"));
    }
}
