/// WebSocket connection handling: upgrade, initial snapshot, event
/// forwarding, inbound command demultiplexing.
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;

use super::AppState;
use crate::events::EngineEvent;
use crate::logger::{self, LogTag};
use crate::settings::Settings;

/// Inbound messages from the UI. Everything else is logged and ignored.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientMessage {
    Command { command: String },
    Settings { payload: Settings },
}

pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> Response {
    ws.on_upgrade(move |socket| handle_connection(socket, state))
}

async fn handle_connection(socket: WebSocket, state: Arc<AppState>) {
    let (subscriber_id, mut events) = state.bus.subscribe().await;
    let (mut ws_tx, mut ws_rx) = socket.split();

    // Full state on subscribe; the client needs no further handshake.
    let snapshot = state.engine.snapshot().await;
    let initial = json!({ "type": "initial_state", "payload": snapshot });
    if ws_tx.send(Message::Text(initial.to_string())).await.is_err() {
        state.bus.unsubscribe(subscriber_id).await;
        return;
    }

    loop {
        tokio::select! {
            biased;

            event = events.recv() => {
                match event {
                    Some(event) => {
                        let frame = outbound_frame(&event);
                        if ws_tx.send(Message::Text(frame.to_string())).await.is_err() {
                            break;
                        }
                    }
                    // The bus disconnected us (slow consumer) or shut down.
                    None => break,
                }
            }

            message = ws_rx.next() => {
                match message {
                    Some(Ok(Message::Text(text))) => {
                        handle_client_message(&text, &state).await;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        logger::warning(
                            LogTag::Webserver,
                            &format!("subscriber {subscriber_id}: socket error: {e}"),
                        );
                        break;
                    }
                    _ => {}
                }
            }
        }
    }

    state.bus.unsubscribe(subscriber_id).await;
    logger::debug(
        LogTag::Webserver,
        &format!("subscriber {subscriber_id} disconnected"),
    );
}

async fn handle_client_message(text: &str, state: &Arc<AppState>) {
    let message: ClientMessage = match serde_json::from_str(text) {
        Ok(message) => message,
        Err(_) => {
            logger::warning(
                LogTag::Webserver,
                &format!("ignoring unparseable client message: {text}"),
            );
            return;
        }
    };

    match message {
        ClientMessage::Command { command } => match command.as_str() {
            "START_BOT" => state.engine.clone().start().await,
            "STOP_BOT" => state.engine.stop(false).await,
            "KILL_SWITCH" => state.engine.stop(true).await,
            other => {
                logger::warning(
                    LogTag::Webserver,
                    &format!("ignoring unknown command: {other}"),
                );
            }
        },
        ClientMessage::Settings { payload } => {
            // Validation feedback reaches the UI as an ERROR log event.
            let _ = state.engine.clone().update_settings(payload).await;
        }
    }
}

fn outbound_frame(event: &EngineEvent) -> serde_json::Value {
    match event {
        EngineEvent::Status(status) => json!({ "type": "status", "status": status }),
        EngineEvent::Log(log) => json!({ "type": "log", "payload": log }),
        EngineEvent::Market(coins) => {
            json!({ "type": "market_update_full", "payload": coins })
        }
        EngineEvent::Portfolio {
            portfolio,
            usdt_balance,
        } => json!({
            "type": "portfolio_update",
            "payload": { "portfolio": portfolio, "usdtBalance": usdt_balance },
        }),
        EngineEvent::Ledger(trades) => {
            json!({ "type": "trade_ledger_update", "payload": trades })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BotLog, BotStatus, LogKind};

    #[test]
    fn client_message_parses_commands() {
        let message: ClientMessage =
            serde_json::from_str(r#"{"type":"command","command":"START_BOT"}"#).unwrap();
        assert!(matches!(
            message,
            ClientMessage::Command { command } if command == "START_BOT"
        ));
    }

    #[test]
    fn client_message_parses_settings() {
        let payload = serde_json::to_string(&Settings::default()).unwrap();
        let raw = format!(r#"{{"type":"settings","payload":{payload}}}"#);
        let message: ClientMessage = serde_json::from_str(&raw).unwrap();
        assert!(matches!(message, ClientMessage::Settings { .. }));
    }

    #[test]
    fn client_message_rejects_unknown_type() {
        assert!(serde_json::from_str::<ClientMessage>(r#"{"type":"mystery"}"#).is_err());
    }

    #[test]
    fn status_frame_shape() {
        let frame = outbound_frame(&EngineEvent::Status(BotStatus::Running));
        assert_eq!(frame["type"], "status");
        assert_eq!(frame["status"], "RUNNING");
    }

    #[test]
    fn portfolio_frame_shape() {
        let frame = outbound_frame(&EngineEvent::Portfolio {
            portfolio: Vec::new(),
            usdt_balance: 42.5,
        });
        assert_eq!(frame["type"], "portfolio_update");
        assert_eq!(frame["payload"]["usdtBalance"], 42.5);
    }

    #[test]
    fn log_frame_carries_payload() {
        let log = BotLog::new(LogKind::Info, "hello");
        let frame = outbound_frame(&EngineEvent::Log(log.clone()));
        assert_eq!(frame["type"], "log");
        assert_eq!(frame["payload"]["message"], "hello");
        assert_eq!(frame["payload"]["type"], "INFO");
    }
}
