//! camli-blobd: development blob server speaking the chunk upload protocol.

pub mod handlers;
pub mod storage;

use std::future::Future;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post, put};
use axum::Router;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

pub use handlers::{BlobState, BLOB_ROOT};
pub use storage::{DiskStore, Storage};

pub fn router(state: BlobState) -> Router {
    let body_limit = match state.max_blob_bytes {
        0 => DefaultBodyLimit::disable(),
        n => DefaultBodyLimit::max(usize::try_from(n).unwrap_or(usize::MAX)),
    };

    let blob_routes = Router::new()
        .route("/presence", post(handlers::handle_presence))
        .route(
            "/upload/{reference}",
            put(handlers::handle_upload).layer(body_limit),
        )
        .route("/blob/{reference}", get(handlers::handle_get_blob))
        .route("/stats", get(handlers::handle_stats));

    Router::new()
        .route("/", get(handlers::handle_root))
        .nest(BLOB_ROOT.trim_end_matches('/'), blob_routes)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve on 127.0.0.1:`port` until ctrl-c.
pub async fn serve(state: BlobState, port: u16) -> anyhow::Result<()> {
    let listener = TcpListener::bind(format!("127.0.0.1:{}", port)).await?;
    serve_on(listener, state, async {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("shutdown requested");
    })
    .await
}

/// Serve on an already-bound listener until `shutdown` resolves.
pub async fn serve_on(
    listener: TcpListener,
    state: BlobState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let addr = listener.local_addr()?;
    tracing::info!(
        %addr,
        backend = state.storage.kind(),
        blob_root = BLOB_ROOT,
        "blob server listening"
    );
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}
