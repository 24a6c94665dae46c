//! Room broker for synchronized watch parties.
//!
//! Viewers connect over WebSocket at `/ws`, join a room and exchange
//! play/pause/seek events that the broker fans out to everyone else in the
//! same room.

use axum::{
    extract::{State, WebSocketUpgrade},
    response::IntoResponse,
    routing::get,
    Router,
};
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;

pub mod broker;
pub mod config;
pub mod connection;
pub mod error;
pub mod protocol;

pub use broker::RoomBroker;
pub use config::Config;

/// Builds the HTTP router around a broker.
pub fn app(broker: RoomBroker) -> Router {
    Router::new()
        .route("/healthz", get(health_check))
        .route("/ws", get(ws_endpoint))
        .layer(CorsLayer::permissive())
        .with_state(broker)
}

/// Serves the relay on an already bound listener until the process stops.
pub async fn serve(listener: TcpListener, broker: RoomBroker) -> anyhow::Result<()> {
    axum::serve(listener, app(broker)).await?;
    Ok(())
}

async fn ws_endpoint(ws: WebSocketUpgrade, State(broker): State<RoomBroker>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| connection::handle_connection(socket, broker))
}

async fn health_check() -> &'static str {
    "ok"
}
