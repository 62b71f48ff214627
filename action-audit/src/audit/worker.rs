//! Sequential audit worker
//!
//! The `AuditWorker` receives captured request/response data from the
//! middleware, assembles and redacts the record, and turns it into a primary
//! JSON line and a narrative block. It handles one record at a time, so lines
//! reach both append queues in submission order.

use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

use super::directory::UserDirectory;
use super::narrator::{narrative_block, Narrator};
use super::queue::AppendQueue;
use super::record::{AuditRecord, RequestMeta, ResponseMeta};
use super::redact::Redactor;

/// Message accepted by the worker task
#[derive(Debug)]
pub(crate) enum WorkerMessage {
    /// Render and persist one record
    Record(Box<AuditRecord>),
    /// Assemble, redact, render and persist one captured exchange
    Capture {
        request: Box<RequestMeta>,
        response: ResponseMeta,
    },
    /// Reply once everything received so far has been written
    Flush(oneshot::Sender<()>),
}

impl WorkerMessage {
    /// Request id and URL of a message carrying a record
    pub(crate) fn request(&self) -> Option<(&str, &str)> {
        match self {
            Self::Record(record) => Some((record.request_id.as_str(), record.url.as_str())),
            Self::Capture { request, .. } => Some((request.request_id.as_str(), request.url.as_str())),
            Self::Flush(_) => None,
        }
    }
}

/// State owned by the worker task
pub(crate) struct AuditWorker {
    pub(crate) redactor: Arc<Redactor>,
    pub(crate) directory: UserDirectory,
    pub(crate) narrator: Narrator,
    pub(crate) primary: AppendQueue,
    pub(crate) narrative: AppendQueue,
}

impl AuditWorker {
    /// Spawn the worker and return its inbox
    pub(crate) fn spawn(self, capacity: usize) -> mpsc::Sender<WorkerMessage> {
        let (tx, mut rx) = mpsc::channel::<WorkerMessage>(capacity.max(1));

        tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                match message {
                    WorkerMessage::Record(record) => self.process(*record).await,
                    WorkerMessage::Capture { request, response } => {
                        let record = AuditRecord::assemble(*request, response, &self.redactor);
                        self.process(record).await;
                    }
                    WorkerMessage::Flush(done) => {
                        self.flush().await;
                        let _ = done.send(());
                    }
                }
            }
            tracing::debug!("Audit worker stopped");
        });

        tx
    }

    async fn process(&self, record: AuditRecord) {
        let line = match serde_json::to_string(&record) {
            Ok(line) => line,
            Err(e) => {
                tracing::error!(
                    request_id = %record.request_id,
                    error = %e,
                    "Failed to serialize audit record, entry dropped"
                );
                return;
            }
        };

        let user = self.directory.display_name(record.user_id.as_deref()).await;
        let sentence = self.narrator.narrate(&record, &user);
        let block = narrative_block(&record, &user, sentence.as_deref());

        if let Err(e) = self.primary.append(line).await {
            tracing::error!(error = %e, "Failed to enqueue audit record");
        }
        if let Err(e) = self.narrative.append(block).await {
            tracing::error!(error = %e, "Failed to enqueue audit narrative");
        }
    }

    async fn flush(&self) {
        for queue in [&self.primary, &self.narrative] {
            if let Err(e) = queue.flush().await {
                tracing::warn!(error = %e, "Audit queue flush failed");
            }
        }
    }
}
