//! Status HTTP server
//!
//! Read-only JSON views of library settings, queues and completion history for
//! operators and dashboards.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::dispatch::{DispatchError, QueueSnapshot};
use crate::library::LibrarySettings;
use crate::manager::LibraryManager;
use crate::store::HistoryEntry;

/// Errors that can occur when running the status server
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Invalid bind address {0:?}")]
    InvalidAddress(String),

    #[error("Failed to bind to address: {0}")]
    BindError(#[from] std::io::Error),
}

/// Maps a failed store read to a 503 so dashboards can retry.
struct ApiError(DispatchError);

impl From<DispatchError> for ApiError {
    fn from(e: DispatchError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        tracing::warn!(error = %self.0, "status request failed");
        (StatusCode::SERVICE_UNAVAILABLE, self.0.to_string()).into_response()
    }
}

/// Handler for GET /libraries
async fn get_libraries(
    State(manager): State<Arc<LibraryManager>>,
) -> Result<Json<Vec<LibrarySettings>>, ApiError> {
    Ok(Json(manager.library_settings().await?))
}

/// Handler for GET /queues
async fn get_queues(
    State(manager): State<Arc<LibraryManager>>,
) -> Result<Json<Vec<QueueSnapshot>>, ApiError> {
    Ok(Json(manager.library_queues().await?))
}

/// Handler for GET /history
async fn get_history(
    State(manager): State<Arc<LibraryManager>>,
) -> Result<Json<Vec<HistoryEntry>>, ApiError> {
    Ok(Json(manager.history().await?))
}

/// Creates the axum Router with the status endpoints
pub fn create_status_router(manager: Arc<LibraryManager>) -> Router {
    Router::new()
        .route("/libraries", get(get_libraries))
        .route("/queues", get(get_queues))
        .route("/history", get(get_history))
        .with_state(manager)
}

/// Binds the status server's listening socket.
pub async fn bind_status_listener(bind: &str) -> Result<TcpListener, ServerError> {
    let addr: SocketAddr = bind
        .parse()
        .map_err(|_| ServerError::InvalidAddress(bind.to_string()))?;
    Ok(TcpListener::bind(addr).await?)
}

/// Serves the status endpoints on an already bound `listener` until `cancel`
/// fires.
pub async fn serve_status(
    manager: Arc<LibraryManager>,
    listener: TcpListener,
    cancel: CancellationToken,
) -> Result<(), ServerError> {
    let app = create_status_router(manager);

    if let Ok(addr) = listener.local_addr() {
        tracing::info!(%addr, "status server listening");
    }
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await?;

    Ok(())
}

/// Runs the status server on `bind` until `cancel` fires.
pub async fn run_status_server(
    manager: Arc<LibraryManager>,
    bind: &str,
    cancel: CancellationToken,
) -> Result<(), ServerError> {
    let listener = bind_status_listener(bind).await?;
    serve_status(manager, listener, cancel).await
}
