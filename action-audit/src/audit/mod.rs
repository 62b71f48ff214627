//! HTTP action audit trail
//!
//! Every request passing through [`audit_middleware`] produces one structured
//! [`AuditRecord`], appended as a JSON line to the primary audit file, and one
//! human-readable block in the narrative file. Sensitive keys are redacted
//! before anything is written, and both files rotate by size.
//!
//! # Architecture
//!
//! The middleware wraps each response body in a [`CaptureBody`]. When the body
//! finishes streaming, the assembled record is handed to the [`AuditLogger`]
//! with a non-blocking `try_send`. A single background worker renders records
//! in order and feeds one [`AppendQueue`] per file, each owning a
//! [`RotatingAppender`]. Request handling never waits on disk I/O.

pub mod appender;
pub mod capture;
pub mod config;
pub mod directory;
pub mod logger;
pub mod middleware;
pub mod narrator;
pub mod queue;
pub mod record;
pub mod redact;
mod worker;

pub use appender::RotatingAppender;
pub use capture::{CaptureBody, CapturedResponse};
pub use config::AuditConfig;
pub use directory::{
    JsonFileUserSource, StaticUserSource, UserDirectory, UserDirectoryEntry, UserSource,
};
pub use logger::AuditLogger;
pub use middleware::{audit_middleware, AuditLayerExt, AuthenticatedUser};
pub use narrator::{narrative_block, NarrationRule, Narrator};
pub use queue::AppendQueue;
pub use record::{AuditRecord, ResponseBody};
pub use redact::Redactor;
