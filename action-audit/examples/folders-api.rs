//! Example: Auditing a small folders API
//!
//! Every request is recorded to `logs/audit.log` and narrated in
//! `logs/audit-narrative.log`. A toy auth layer turns `Authorization: Bearer <id>`
//! into an authenticated user id.
//!
//! Run with: cargo run --example folders-api
//!
//! Then try:
//!   curl -X POST localhost:8080/api/folders -H 'authorization: Bearer u1' \
//!        -H 'content-type: application/json' -d '{"name":"Contracts"}'
//!   curl -X PUT localhost:8080/api/folders/1/rename -H 'authorization: Bearer u1' \
//!        -H 'content-type: application/json' -d '{"name":"Signed contracts"}'
//!   curl -X DELETE localhost:8080/api/folders/1 -H 'x-user-id: u2'

use action_audit::prelude::*;
use axum::{
    extract::{Path, Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::Mutex;
use tower_http::trace::TraceLayer;

#[derive(Debug, Clone, Serialize)]
struct Folder {
    id: u64,
    name: String,
    approved: bool,
}

#[derive(Debug, Deserialize)]
struct FolderName {
    name: String,
}

#[derive(Default)]
struct Store {
    next_id: u64,
    folders: BTreeMap<u64, Folder>,
}

type Db = Arc<Mutex<Store>>;

async fn list_folders(State(db): State<Db>) -> Json<Vec<Folder>> {
    Json(db.lock().await.folders.values().cloned().collect())
}

async fn create_folder(State(db): State<Db>, Json(body): Json<FolderName>) -> impl IntoResponse {
    let mut store = db.lock().await;
    store.next_id += 1;
    let folder = Folder {
        id: store.next_id,
        name: body.name,
        approved: false,
    };
    store.folders.insert(folder.id, folder.clone());
    (StatusCode::CREATED, Json(folder))
}

async fn rename_folder(
    State(db): State<Db>,
    Path(id): Path<u64>,
    Json(body): Json<FolderName>,
) -> std::result::Result<Json<Folder>, StatusCode> {
    let mut store = db.lock().await;
    let folder = store.folders.get_mut(&id).ok_or(StatusCode::NOT_FOUND)?;
    folder.name = body.name;
    Ok(Json(folder.clone()))
}

async fn approve_folder(
    State(db): State<Db>,
    Path(id): Path<u64>,
) -> std::result::Result<Json<Folder>, StatusCode> {
    let mut store = db.lock().await;
    let folder = store.folders.get_mut(&id).ok_or(StatusCode::NOT_FOUND)?;
    folder.approved = true;
    Ok(Json(folder.clone()))
}

async fn delete_folder(
    State(db): State<Db>,
    Path(id): Path<u64>,
) -> std::result::Result<Json<Folder>, StatusCode> {
    db.lock()
        .await
        .folders
        .remove(&id)
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}

/// Toy bearer auth: the token is the user id
async fn bearer_user(mut request: Request, next: Next) -> Response {
    let user = request
        .headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|token| AuthenticatedUser(token.trim().to_string()));
    if let Some(user) = user {
        request.extensions_mut().insert(user);
    }
    next.run(request).await
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load()?;
    init_tracing(&config)?;

    let logger = AuditLogger::new(config.audit.clone());

    let app = Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/api/folders", get(list_folders).post(create_folder))
        .route("/api/folders/{id}", axum::routing::delete(delete_folder))
        .route("/api/folders/{id}/rename", put(rename_folder))
        .route("/api/folders/{id}/approve", post(approve_folder))
        .with_state(Db::default())
        .with_audit(logger.clone())
        .layer(middleware::from_fn(bearer_user))
        .layer(TraceLayer::new_for_http());

    let addr = SocketAddr::from(([0, 0, 0, 0], config.service.port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Listening on {}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    logger.flush().await;
    shutdown_tracing();

    Ok(())
}
