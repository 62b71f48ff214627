//! Size-bounded, append-only file writer
//!
//! Before every append the target's size is checked; once it has reached the
//! threshold the file is renamed to `<path>.<epoch-millis>` and a fresh file
//! is started at the original path. Rotated files are never overwritten or
//! pruned.

use chrono::Utc;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;

use crate::error::Result;

/// Append-only writer bound to one path
#[derive(Debug, Clone)]
pub struct RotatingAppender {
    path: PathBuf,
    max_bytes: i64,
}

impl RotatingAppender {
    /// Create an appender for `path`
    ///
    /// `max_bytes <= 0` disables rotation.
    pub fn new(path: impl Into<PathBuf>, max_bytes: i64) -> Self {
        Self {
            path: path.into(),
            max_bytes,
        }
    }

    /// Target path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether size-based rotation is active
    pub fn rotation_enabled(&self) -> bool {
        self.max_bytes > 0
    }

    /// Append one line, rotating first if the file is at or over the threshold
    ///
    /// A trailing newline is added when missing. Rotation failures are logged
    /// and the line goes to the existing file; only the append itself can fail.
    pub async fn append(&self, line: &str) -> Result<()> {
        if self.rotation_enabled() {
            if let Err(e) = self.rotate_if_needed().await {
                tracing::warn!(
                    path = %self.path.display(),
                    error = %e,
                    "Audit log rotation failed, continuing with existing file"
                );
            }
        }

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await?;
        }

        let mut payload = Vec::with_capacity(line.len() + 1);
        payload.extend_from_slice(line.as_bytes());
        if !line.ends_with('\n') {
            payload.push(b'\n');
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(&payload).await?;
        file.flush().await?;

        Ok(())
    }

    /// Rename the current file aside when it has reached the threshold
    ///
    /// Returns the rotated path when a rotation happened.
    pub async fn rotate_if_needed(&self) -> Result<Option<PathBuf>> {
        let size = match fs::metadata(&self.path).await {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let threshold = u64::try_from(self.max_bytes).unwrap_or(0);
        if threshold == 0 || size < threshold {
            return Ok(None);
        }

        let target = self.free_rotation_path().await?;
        match fs::rename(&self.path, &target).await {
            Ok(()) => {
                tracing::info!(
                    path = %self.path.display(),
                    rotated_to = %target.display(),
                    size_bytes = size,
                    "Rotated audit log"
                );
                Ok(Some(target))
            }
            // another writer rotated it between our check and the rename
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// `<path>.<epoch-millis>`, bumping the suffix past any existing file
    async fn free_rotation_path(&self) -> Result<PathBuf> {
        let mut millis = Utc::now().timestamp_millis();
        loop {
            let candidate = rotated_path(&self.path, millis);
            if !fs::try_exists(&candidate).await? {
                return Ok(candidate);
            }
            millis += 1;
        }
    }
}

/// Name a rotated file gets for a given epoch-millis stamp
pub fn rotated_path(path: &Path, epoch_millis: i64) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(format!(".{epoch_millis}"));
    PathBuf::from(name)
}
