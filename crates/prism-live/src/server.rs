//! Axum wiring for the live-update endpoint.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::{ConnectInfo, State};
use axum::http::HeaderMap;
use axum::response::Response;
use axum::routing::get;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::hub::LiveUpdateHub;

/// Path browsers connect to for live updates.
pub const LIVE_UPDATE_PATH: &str = "/__prism/ws";

/// Router exposing [`LIVE_UPDATE_PATH`]. Needs connect info, see [`serve`].
pub fn router(hub: Arc<LiveUpdateHub>) -> Router {
    Router::new()
        .route(LIVE_UPDATE_PATH, get(handle_live_update))
        .with_state(hub)
}

async fn handle_live_update(
    State(hub): State<Arc<LiveUpdateHub>>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    upgrade: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    hub.handle_connection(upgrade, &headers, remote)
}

/// Serve the live-update router on `listener` until `token` is cancelled.
///
/// On cancellation the hub is shut down first, so clients receive a close
/// frame before the listener stops.
pub async fn serve(
    listener: TcpListener,
    hub: Arc<LiveUpdateHub>,
    token: CancellationToken,
) -> std::io::Result<()> {
    let addr = listener.local_addr()?;
    tracing::info!(%addr, path = LIVE_UPDATE_PATH, "live-update server listening");

    let app = router(Arc::clone(&hub)).into_make_service_with_connect_info::<SocketAddr>();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            token.cancelled().await;
            hub.shutdown().await;
        })
        .await
}
