use tokio::net::TcpListener;

use error::ObserverError;
use routes::{AppState, router};

pub mod broadcast;
pub mod config;
pub mod demo;
pub mod error;
pub mod event;
pub mod prds;
pub mod protocol;
pub mod routes;
pub mod session;
pub mod supervisor;

/// Serve the dashboard and control API until the listener fails.
pub async fn serve(listener: TcpListener, state: AppState) -> Result<(), ObserverError> {
    axum::serve(listener, router(state)).await?;
    Ok(())
}
