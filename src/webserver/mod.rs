/// WebSocket transport
///
/// Serves the single `/ws` route that bridges the engine's event bus to UI
/// subscribers and demultiplexes their command messages back into engine
/// calls. No domain logic lives here.
pub mod ws;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;

use crate::engine::TradingEngine;
use crate::events::EventBus;
use crate::logger::{self, LogTag};

const HOST: &str = "127.0.0.1";

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<TradingEngine>,
    pub bus: Arc<EventBus>,
}

pub async fn start_server(
    port: u16,
    engine: Arc<TradingEngine>,
    bus: Arc<EventBus>,
) -> Result<(), String> {
    let state = Arc::new(AppState { engine, bus });
    let app = Router::new()
        .route("/ws", get(ws::websocket_handler))
        .with_state(state);

    let addr: SocketAddr = format!("{HOST}:{port}")
        .parse()
        .map_err(|e| format!("invalid listen address: {e}"))?;
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| format!("failed to bind {addr}: {e}"))?;

    logger::info(LogTag::Webserver, &format!("listening on ws://{addr}/ws"));

    axum::serve(listener, app)
        .await
        .map_err(|e| format!("server error: {e}"))
}
