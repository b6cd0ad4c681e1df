//! Streamed answers over WebSocket.
//!
//! Client sends `{"type": "question", "message": "..."}` and receives
//! `citations`, then one `chunk` per generated fragment, then `done`.
//! Closing the socket mid-answer drops the token stream, which cancels
//! generation.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};

use super::protocol::{WsIncomingMessage, WS_APP_PROTOCOL};
use crate::core::errors::ApiError;
use crate::rag::IndexFilter;
use crate::server::router::allowed_origins;
use crate::state::AppState;

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let origin_ok = validate_origin(&headers, &state);

    ws.protocols([WS_APP_PROTOCOL])
        .on_upgrade(move |socket| handle_socket(socket, state, origin_ok))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>, origin_ok: bool) {
    let (mut sender, mut receiver) = socket.split();

    if !origin_ok {
        let _ = sender
            .send(Message::Close(Some(axum::extract::ws::CloseFrame {
                code: 4003,
                reason: "Forbidden: Invalid Origin".into(),
            })))
            .await;
        return;
    }

    while let Some(Ok(msg)) = receiver.next().await {
        let incoming = match msg {
            Message::Text(text) => match serde_json::from_str::<WsIncomingMessage>(&text) {
                Ok(incoming) => incoming,
                Err(err) => {
                    let _ = send_json(
                        &mut sender,
                        json!({"type": "error", "message": format!("Invalid message: {}", err)}),
                    )
                    .await;
                    continue;
                }
            },
            Message::Close(_) => break,
            _ => continue,
        };

        if let Err(err) = handle_message(&mut sender, &state, incoming).await {
            tracing::debug!("WebSocket message failed: {}", err);
            if send_json(
                &mut sender,
                json!({"type": "error", "message": err.to_string()}),
            )
            .await
            .is_err()
            {
                break;
            }
        }
    }
}

async fn handle_message(
    sender: &mut SplitSink<WebSocket, Message>,
    state: &Arc<AppState>,
    data: WsIncomingMessage,
) -> Result<(), ApiError> {
    match data.msg_type.as_deref().unwrap_or("question") {
        "clear_history" => {
            state.pipeline.clear_history();
            send_json(sender, json!({"type": "history_cleared"})).await
        }
        "get_history" => {
            let turns = state.pipeline.history();
            send_json(sender, json!({"type": "history", "turns": turns})).await
        }
        "question" => {
            let query = data.message.unwrap_or_default();
            let query = query.trim();
            if query.is_empty() {
                return Err(ApiError::BadRequest("message must not be empty".to_string()));
            }
            let filter = data.source_uri.as_deref().map(IndexFilter::source);
            stream_answer(sender, state, query, filter.as_ref()).await
        }
        other => Err(ApiError::BadRequest(format!("Unknown message type: {}", other))),
    }
}

async fn stream_answer(
    sender: &mut SplitSink<WebSocket, Message>,
    state: &Arc<AppState>,
    query: &str,
    filter: Option<&IndexFilter>,
) -> Result<(), ApiError> {
    let answer = state.pipeline.answer_stream(query, filter).await?;
    send_json(
        sender,
        json!({
            "type": "citations",
            "grounded": answer.grounded,
            "citations": answer.citations,
        }),
    )
    .await?;

    let mut tokens = answer.tokens;
    let mut full_response = String::new();
    while let Some(chunk_result) = tokens.next().await {
        match chunk_result {
            Ok(chunk) => {
                if chunk.is_empty() {
                    continue;
                }
                full_response.push_str(&chunk);
                send_json(sender, json!({"type": "chunk", "message": chunk})).await?;
            }
            Err(err) => {
                send_json(
                    sender,
                    json!({"type": "error", "message": format!("{}", err)}),
                )
                .await?;
                return Ok(());
            }
        }
    }

    send_json(sender, json!({"type": "done"})).await?;

    if answer.grounded {
        state.pipeline.record_turn(query, &full_response);
    }
    Ok(())
}

pub async fn send_json(
    sender: &mut SplitSink<WebSocket, Message>,
    payload: Value,
) -> Result<(), ApiError> {
    let text = serde_json::to_string(&payload).map_err(ApiError::internal)?;
    sender
        .send(Message::Text(text))
        .await
        .map_err(ApiError::internal)?;
    Ok(())
}

fn validate_origin(headers: &HeaderMap, state: &AppState) -> bool {
    let Some(origin) = headers.get("origin").and_then(|v| v.to_str().ok()) else {
        // Non-browser clients send no Origin header.
        return true;
    };

    origin_allowed(origin, &state.pipeline.settings().server.cors_allowed_origins)
}

/// Browsers send a bare scheme://host[:port] origin, so only exact matches count.
fn origin_allowed(origin: &str, configured: &[String]) -> bool {
    allowed_origins(configured).iter().any(|allowed| allowed == origin)
}
