//! Reference document server backing the networked repositories.
//!
//! Each command runs inside one `MemoryStore::mutate` call, i.e. under the
//! collection's write lock, which is what makes `$inc` and friends atomic
//! for concurrent clients.

pub mod error;
pub mod handlers;

pub use error::ServerError;

use crate::storage::MemoryStore;
use axum::Router;
use axum::routing::{delete, get, post};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct ServerState {
    pub store: Arc<MemoryStore>,
}

pub fn router(store: Arc<MemoryStore>) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/collections/:collection", delete(handlers::clear))
        .route("/collections/:collection/insert", post(handlers::insert))
        .route(
            "/collections/:collection/documents/:id",
            get(handlers::get_document)
                .put(handlers::replace_document)
                .delete(handlers::delete_document),
        )
        .route("/collections/:collection/find", post(handlers::find))
        .route("/collections/:collection/count", post(handlers::count))
        .route("/collections/:collection/update", post(handlers::update))
        .route("/collections/:collection/delete", post(handlers::delete_matching))
        .layer(TraceLayer::new_for_http())
        .with_state(ServerState { store })
}

/// Serves until `shutdown` fires, then checkpoints the store.
pub async fn serve(listener: TcpListener, store: Arc<MemoryStore>, shutdown: CancellationToken) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        tracing::info!(%addr, durable = store.is_durable(), "document server listening");
    }
    axum::serve(listener, router(store.clone()))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    if let Err(err) = store.checkpoint().await {
        tracing::warn!(error = %err, "final checkpoint failed");
    }
    tracing::info!("document server stopped");
    Ok(())
}
