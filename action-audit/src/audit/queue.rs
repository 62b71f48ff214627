//! Per-file background append queue
//!
//! Each [`AppendQueue`] owns one [`RotatingAppender`] on a dedicated tokio
//! task fed by a bounded channel, so appends to one file happen in the order
//! they were enqueued and callers never wait on disk I/O. `flush` resolves
//! once everything enqueued before it has been written.

use tokio::sync::{mpsc, oneshot};

use super::appender::RotatingAppender;
use crate::error::{Error, Result};

#[derive(Debug)]
enum Command {
    Append(String),
    Flush(oneshot::Sender<()>),
}

/// Handle to a background writer for one file
#[derive(Debug, Clone)]
pub struct AppendQueue {
    tx: mpsc::Sender<Command>,
}

impl AppendQueue {
    /// Spawn the writer task for `appender`
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(appender: RotatingAppender, capacity: usize) -> Self {
        let (tx, mut rx) = mpsc::channel::<Command>(capacity.max(1));

        tokio::spawn(async move {
            while let Some(command) = rx.recv().await {
                match command {
                    Command::Append(line) => {
                        if let Err(e) = appender.append(&line).await {
                            tracing::error!(
                                path = %appender.path().display(),
                                error = %e,
                                "Failed to append audit entry, entry dropped"
                            );
                        }
                    }
                    Command::Flush(done) => {
                        let _ = done.send(());
                    }
                }
            }
            tracing::debug!(path = %appender.path().display(), "Audit append queue closed");
        });

        Self { tx }
    }

    /// Enqueue a line, waiting for room in the queue
    pub async fn append(&self, line: String) -> Result<()> {
        self.tx
            .send(Command::Append(line))
            .await
            .map_err(|_| Error::Audit("append queue closed".to_string()))
    }

    /// Enqueue a line without waiting; fails when the queue is full or closed
    pub fn try_append(&self, line: String) -> Result<()> {
        self.tx.try_send(Command::Append(line)).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => Error::Audit("append queue full".to_string()),
            mpsc::error::TrySendError::Closed(_) => {
                Error::Audit("append queue closed".to_string())
            }
        })
    }

    /// Wait until every previously enqueued line has been written
    pub async fn flush(&self) -> Result<()> {
        let (done_tx, done_rx) = oneshot::channel();
        self.tx
            .send(Command::Flush(done_tx))
            .await
            .map_err(|_| Error::Audit("append queue closed".to_string()))?;
        done_rx
            .await
            .map_err(|_| Error::Audit("append queue stopped before flush".to_string()))
    }
}
