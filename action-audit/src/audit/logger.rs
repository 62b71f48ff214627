//! Audit logger: the fire-and-forget handle used by the middleware
//!
//! `AuditLogger` is cheap to clone and is stored as middleware state. Captured
//! exchanges are handed to the background `AuditWorker` with a non-blocking
//! `try_send`; parsing, redaction and serialization all happen on the worker,
//! so audit logging never holds up a response.

use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

use super::appender::RotatingAppender;
use super::config::AuditConfig;
use super::directory::{JsonFileUserSource, UserDirectory};
use super::narrator::Narrator;
use super::queue::AppendQueue;
use super::record::{AuditRecord, RequestMeta, ResponseMeta};
use super::redact::Redactor;
use super::worker::{AuditWorker, WorkerMessage};

/// Handle for submitting audit records
#[derive(Clone)]
pub struct AuditLogger {
    config: Arc<AuditConfig>,
    redactor: Arc<Redactor>,
    directory: UserDirectory,
    tx: Option<mpsc::Sender<WorkerMessage>>,
}

impl std::fmt::Debug for AuditLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditLogger")
            .field("enabled", &self.is_enabled())
            .field("log_path", &self.config.log_path)
            .field("narrative_path", &self.config.narrative_path)
            .finish()
    }
}

impl AuditLogger {
    /// Build a logger from configuration
    ///
    /// Display names come from `user_directory_path` when set. When the
    /// subsystem is disabled this is equivalent to [`AuditLogger::disabled`]
    /// with the given configuration. Must be called inside a tokio runtime.
    pub fn new(config: AuditConfig) -> Self {
        let directory = match &config.user_directory_path {
            Some(path) => UserDirectory::new(Arc::new(JsonFileUserSource::new(path))),
            None => UserDirectory::empty(),
        };
        Self::with_directory(config, directory)
    }

    /// Build a logger that resolves names through `directory`
    pub fn with_directory(config: AuditConfig, directory: UserDirectory) -> Self {
        Self::with_narrator(config, directory, Narrator::default())
    }

    /// Build a logger with a custom narration rule set
    pub fn with_narrator(config: AuditConfig, directory: UserDirectory, narrator: Narrator) -> Self {
        let redactor = Arc::new(
            Redactor::new().with_extra_patterns(config.extra_sensitive_keys.iter()),
        );

        let tx = if config.enabled {
            let max_bytes = config.max_file_size_bytes();
            let capacity = config.queue_capacity;
            let worker = AuditWorker {
                redactor: redactor.clone(),
                directory: directory.clone(),
                narrator,
                primary: AppendQueue::spawn(
                    RotatingAppender::new(&config.log_path, max_bytes),
                    capacity,
                ),
                narrative: AppendQueue::spawn(
                    RotatingAppender::new(&config.narrative_path, max_bytes),
                    capacity,
                ),
            };
            tracing::info!(
                log_path = %config.log_path.display(),
                narrative_path = %config.narrative_path.display(),
                max_file_size_mb = config.max_file_size_mb,
                "Audit logging enabled"
            );
            Some(worker.spawn(capacity))
        } else {
            tracing::info!("Audit logging disabled");
            None
        };

        Self {
            config: Arc::new(config),
            redactor,
            directory,
            tx,
        }
    }

    /// Logger that records nothing and never touches the filesystem
    pub fn disabled() -> Self {
        Self {
            config: Arc::new(AuditConfig {
                enabled: false,
                ..AuditConfig::default()
            }),
            redactor: Arc::new(Redactor::new()),
            directory: UserDirectory::empty(),
            tx: None,
        }
    }

    /// Whether records are being persisted
    pub fn is_enabled(&self) -> bool {
        self.tx.is_some()
    }

    /// Get the audit configuration
    pub fn config(&self) -> &AuditConfig {
        &self.config
    }

    /// Redactor configured for this logger
    pub fn redactor(&self) -> &Redactor {
        &self.redactor
    }

    /// User directory used for narration
    pub fn directory(&self) -> &UserDirectory {
        &self.directory
    }

    /// Submit a finished record (fire-and-forget)
    ///
    /// Never blocks. A full or closed queue drops the record with a warning.
    pub fn submit(&self, record: AuditRecord) {
        self.enqueue(WorkerMessage::Record(Box::new(record)));
    }

    /// Submit a captured request/response pair (fire-and-forget)
    ///
    /// Body decoding, redaction and serialization run on the worker task, not
    /// on the caller. Same drop behaviour as [`AuditLogger::submit`].
    pub fn submit_capture(&self, request: RequestMeta, response: ResponseMeta) {
        self.enqueue(WorkerMessage::Capture {
            request: Box::new(request),
            response,
        });
    }

    fn enqueue(&self, message: WorkerMessage) {
        let Some(tx) = &self.tx else {
            return;
        };
        match tx.try_send(message) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(message)) => {
                if let Some((request_id, url)) = message.request() {
                    tracing::warn!(request_id, url, "Audit queue full, record dropped");
                }
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::warn!("Audit worker stopped, record dropped");
            }
        }
    }

    /// Wait until every record submitted so far has been written to disk
    pub async fn flush(&self) {
        let Some(tx) = &self.tx else {
            return;
        };
        let (done_tx, done_rx) = oneshot::channel();
        if tx.send(WorkerMessage::Flush(done_tx)).await.is_err() {
            tracing::warn!("Audit worker stopped before flush");
            return;
        }
        let _ = done_rx.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::directory::{StaticUserSource, UserDirectoryEntry};
    use crate::audit::narrator::{BLOCK_BEGIN, BLOCK_END};
    use crate::audit::record::{CapturedBody, ResponseBody};
    use crate::audit::redact::REDACTED;
    use chrono::Utc;
    use serde_json::{json, Map};
    use std::path::Path;

    fn config_in(dir: &Path) -> AuditConfig {
        AuditConfig {
            log_path: dir.join("audit.log"),
            narrative_path: dir.join("audit-narrative.log"),
            ..AuditConfig::default()
        }
    }

    fn record(method: &str, url: &str, body: serde_json::Value) -> AuditRecord {
        AuditRecord {
            timestamp: Utc::now(),
            request_id: "req-1".to_string(),
            method: method.to_string(),
            url: url.to_string(),
            query: Map::new(),
            body,
            headers: Map::new(),
            user_id: Some("u1".to_string()),
            ip: None,
            user_agent: None,
            status_code: 201,
            duration_ms: 3,
            response_body: ResponseBody::Structured(json!({"id": 1})),
        }
    }

    #[tokio::test]
    async fn test_submit_writes_line_and_block() {
        let dir = tempfile::tempdir().unwrap();
        let directory = UserDirectory::new(Arc::new(StaticUserSource::new(vec![
            UserDirectoryEntry::new("u1", "Alice Martin"),
        ])));
        let logger = AuditLogger::with_directory(config_in(dir.path()), directory);
        assert!(logger.is_enabled());

        logger.submit(record("POST", "/api/folders", json!({"name": "Contracts"})));
        logger.flush().await;

        let primary = tokio::fs::read_to_string(dir.path().join("audit.log"))
            .await
            .unwrap();
        assert_eq!(primary.lines().count(), 1);
        let line: serde_json::Value = serde_json::from_str(primary.trim()).unwrap();
        assert_eq!(line["url"], "/api/folders");

        let narrative = tokio::fs::read_to_string(dir.path().join("audit-narrative.log"))
            .await
            .unwrap();
        assert!(narrative.starts_with(BLOCK_BEGIN));
        assert!(narrative.trim_end().ends_with(BLOCK_END));
        assert!(narrative.contains("Alice Martin created folder \"Contracts\""));
    }

    #[tokio::test]
    async fn test_records_keep_submission_order() {
        let dir = tempfile::tempdir().unwrap();
        let logger = AuditLogger::new(config_in(dir.path()));

        for i in 0..50 {
            logger.submit(record("PUT", &format!("/api/items/{i}"), json!({})));
        }
        logger.flush().await;

        let primary = tokio::fs::read_to_string(dir.path().join("audit.log"))
            .await
            .unwrap();
        let urls: Vec<String> = primary
            .lines()
            .map(|l| serde_json::from_str::<serde_json::Value>(l).unwrap()["url"].to_string())
            .collect();
        let expected: Vec<String> = (0..50).map(|i| format!("\"/api/items/{i}\"")).collect();
        assert_eq!(urls, expected);
    }

    #[tokio::test]
    async fn test_disabled_logger_touches_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let config = AuditConfig {
            enabled: false,
            ..config_in(dir.path())
        };
        let logger = AuditLogger::new(config);
        assert!(!logger.is_enabled());

        logger.submit(record("POST", "/api/folders", json!({})));
        logger.flush().await;

        let mut entries = tokio::fs::read_dir(dir.path()).await.unwrap();
        assert!(entries.next_entry().await.unwrap().is_none());

        let off = AuditLogger::disabled();
        assert!(!off.is_enabled());
        assert!(!off.config().enabled);
        off.submit(record("DELETE", "/api/folders/1", json!(null)));
        off.flush().await;
    }

    #[tokio::test]
    async fn test_submit_capture_is_assembled_and_redacted_by_worker() {
        let dir = tempfile::tempdir().unwrap();
        let config = AuditConfig {
            extra_sensitive_keys: vec!["ssn".to_string()],
            ..config_in(dir.path())
        };
        let logger = AuditLogger::new(config);

        let request = RequestMeta {
            timestamp: Utc::now(),
            request_id: "req-9".to_string(),
            method: "POST".to_string(),
            url: "/api/login".to_string(),
            query: vec![("token".to_string(), "q-secret".to_string())],
            content_type: Some("application/json".to_string()),
            body: Some(br#"{"user":"ann","password":"hunter2","ssn":"987-65-4321"}"#.to_vec()),
            headers: vec![("authorization".to_string(), "Bearer abc".to_string())],
            user_id: None,
            ip: Some("10.0.0.2".to_string()),
            user_agent: None,
        };
        let response = ResponseMeta {
            status_code: 200,
            body: CapturedBody::Complete(br#"{"accessToken":"at-secret-1","ok":true}"#.to_vec()),
            duration: std::time::Duration::from_millis(12),
            user_id: Some("u7".to_string()),
        };
        logger.submit_capture(request, response);
        logger.flush().await;

        let primary = tokio::fs::read_to_string(dir.path().join("audit.log"))
            .await
            .unwrap();
        for secret in ["hunter2", "987-65-4321", "q-secret", "Bearer abc", "at-secret-1"] {
            assert!(!primary.contains(secret), "{secret} leaked");
        }
        let line: serde_json::Value = serde_json::from_str(primary.trim()).unwrap();
        assert_eq!(line["requestId"], "req-9");
        assert_eq!(line["body"]["user"], "ann");
        assert_eq!(line["body"]["password"], REDACTED);
        assert_eq!(line["body"]["ssn"], REDACTED);
        assert_eq!(line["responseBody"]["ok"], true);
        assert_eq!(line["userId"], "u7");
        assert_eq!(line["durationMs"], 12);
    }

    #[tokio::test]
    async fn test_extra_sensitive_keys_reach_redactor() {
        let dir = tempfile::tempdir().unwrap();
        let config = AuditConfig {
            extra_sensitive_keys: vec!["ssn".to_string()],
            ..config_in(dir.path())
        };
        let logger = AuditLogger::new(config);
        assert!(logger.redactor().is_sensitive_key("customer_SSN"));
        assert!(logger.redactor().is_sensitive_key("password"));
    }
}
