//! # action-audit
//!
//! Request/response audit trail for axum services.
//!
//! ## Features
//!
//! - **Full-cycle capture**: method, path, query, selected headers, request body,
//!   status, duration and the streamed response body
//! - **Redaction**: passwords, tokens and auth values never reach disk
//! - **Narration**: a plain-English sentence per write action, with user names
//!   resolved from a directory snapshot
//! - **Rotation**: size-triggered, never overwrites or prunes old files
//! - **Non-blocking**: records are persisted by a background worker
//!
//! ## Example
//!
//! ```rust,no_run
//! use action_audit::prelude::*;
//! use axum::routing::post;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let config = Config::load()?;
//!     init_tracing(&config)?;
//!
//!     let logger = AuditLogger::new(config.audit.clone());
//!     let app: Router = Router::new()
//!         .route("/api/folders", post(|| async { "created" }))
//!         .with_audit(logger);
//!
//!     let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.service.port)).await?;
//!     axum::serve(listener, app).await?;
//!
//!     Ok(())
//! }
//! ```

pub mod audit;
pub mod config;
pub mod error;
pub mod observability;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::audit::{
        audit_middleware, AuditConfig, AuditLayerExt, AuditLogger, AuditRecord, AuthenticatedUser,
        JsonFileUserSource, Narrator, Redactor, StaticUserSource, UserDirectory,
        UserDirectoryEntry,
    };
    pub use crate::config::Config;
    pub use crate::error::{Error, Result};
    pub use crate::observability::{init_tracing, shutdown_tracing};

    pub use axum::Router;
}
