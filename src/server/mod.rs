//! HTTP surface: evaluation endpoints plus session routes over [`AppState`].

pub mod error;
pub mod handlers;
pub mod router;

use crate::state::AppState;

pub use error::ApiError;
pub use router::build_router;

/// Serve until the listener fails or ctrl+c arrives.
pub async fn listen(addr: &str, state: AppState) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(addr = %listener.local_addr()?, "listening");
    tokio::select! {
        r = axum::serve(listener, build_router(state)) => {
            tracing::warn!("server ended unexpectedly: {:?}", &r);
            r?;
        },
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("received ctrl+c interrupt, closing server");
        }
    }
    Ok(())
}
