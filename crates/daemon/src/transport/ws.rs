// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `GET /ws/auth`: pushes the auth state to the shell on every change.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::response::{IntoResponse, Response};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use promptdock_auth::AuthState;

use crate::state::AppState;
use crate::transport::auth;

#[derive(Debug, Clone, Deserialize)]
pub struct WsQuery {
    pub token: Option<String>,
}

pub async fn ws_auth(
    State(state): State<Arc<AppState>>,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    if let Err(code) = auth::validate_ws_token(query.token.as_deref(), state.auth_token.as_deref()) {
        return code.to_http_response("unauthorized").into_response();
    }

    let rx = state.auth.subscribe();
    let shutdown = state.shutdown.clone();
    ws.on_upgrade(move |socket| stream_state(socket, rx, shutdown)).into_response()
}

/// Send the current state, then one message per change until either side
/// goes away.
async fn stream_state(
    socket: WebSocket,
    mut rx: watch::Receiver<AuthState>,
    shutdown: CancellationToken,
) {
    let (mut ws_tx, mut ws_rx) = socket.split();

    loop {
        let text = {
            let state = rx.borrow_and_update();
            serde_json::to_string(&*state)
        };
        let text = match text {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(err = %e, "failed to encode auth state");
                break;
            }
        };
        if ws_tx.send(Message::Text(text.into())).await.is_err() {
            break;
        }

        let changed = loop {
            tokio::select! {
                _ = shutdown.cancelled() => break false,
                changed = rx.changed() => break changed.is_ok(),
                msg = ws_rx.next() => match msg {
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break false,
                    Some(Ok(_)) => {}
                },
            }
        };
        if !changed {
            break;
        }
    }

    let _ = ws_tx.send(Message::Close(None)).await;
}
