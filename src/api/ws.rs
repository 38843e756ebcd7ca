// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! WebSocket transport.
//!
//! One persistent socket per client. A dedicated task writes outbound
//! frames (acknowledgements and pushes share one ordered channel), while
//! the read loop handles client frames strictly in arrival order, so a
//! session's login is always observed by its own subsequent requests.
//!
//! Every request frame is answered by exactly one acknowledgement; close,
//! error and EOF all end the read loop and run the same disconnect
//! cleanup.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use chrono::Utc;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::sync::mpsc;

use crate::error::RelayError;
use crate::models::{Channel, ClientFrame, ServerFrame};
use crate::registry::{SessionId, SessionSender};
use crate::state::AppState;

pub async fn ws_handler(State(state): State<AppState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(state, socket))
}

async fn handle_socket(state: AppState, socket: WebSocket) {
    let (sink, mut stream) = socket.split();
    let (out_tx, out_rx) = mpsc::unbounded_channel::<ServerFrame>();

    let session = state.registry.connect(out_tx.clone());
    tracing::debug!(%session, "session connected");

    let sender_task = tokio::spawn(async move {
        if let Err(error) = write_outgoing_frames(sink, out_rx).await {
            tracing::debug!(%error, "websocket sender loop ended with error");
        }
    });

    read_incoming_frames(&state, session, &out_tx, &mut stream).await;

    state.relay.disconnect(session);
    drop(out_tx);
    let _ = sender_task.await;
}

async fn write_outgoing_frames(
    mut sink: SplitSink<WebSocket, Message>,
    mut out_rx: mpsc::UnboundedReceiver<ServerFrame>,
) -> Result<(), axum::Error> {
    while let Some(frame) = out_rx.recv().await {
        match serde_json::to_string(&frame) {
            Ok(text) => sink.send(Message::Text(text.into())).await?,
            Err(error) => tracing::warn!(%error, "dropping unserializable frame"),
        }
    }

    Ok(())
}

async fn read_incoming_frames(
    state: &AppState,
    session: SessionId,
    out_tx: &SessionSender,
    stream: &mut SplitStream<WebSocket>,
) {
    while let Some(result) = stream.next().await {
        let message = match result {
            Ok(message) => message,
            Err(error) => {
                tracing::debug!(%session, %error, "websocket receive error");
                break;
            }
        };

        let Message::Text(text) = message else {
            if matches!(message, Message::Close(_)) {
                break;
            }
            continue;
        };

        let frame = match serde_json::from_str::<ClientFrame>(&text) {
            Ok(frame) => frame,
            Err(error) => {
                // No parseable seq to echo; clients treat seq 0 as unmatched.
                let err = RelayError::MalformedEnvelope(format!("invalid request frame: {error}"));
                let _ = out_tx.send(ServerFrame::error(0, &err));
                continue;
            }
        };

        let ack = dispatch(state, session, &frame).await;
        let _ = out_tx.send(ack);
    }
}

/// Run one request to completion and build its acknowledgement.
async fn dispatch(state: &AppState, session: SessionId, frame: &ClientFrame) -> ServerFrame {
    let result = match frame.channel {
        Channel::Login => state
            .relay
            .login(&frame.envelope, session)
            .await
            .map(|new_binding| json!(new_binding)),
        Channel::Relay => state
            .relay
            .relay(&frame.envelope, session)
            .await
            .map(|()| json!(true)),
        Channel::Swap => state.swap.swap_to_evm(&frame.envelope, session).await,
        Channel::Faucet => state.swap.faucet(&frame.envelope, session, Utc::now()).await,
    };

    match result {
        Ok(details) => ServerFrame::ok(frame.seq, details),
        Err(error) => {
            tracing::debug!(%session, channel = ?frame.channel, %error, "request failed");
            ServerFrame::error(frame.seq, &error)
        }
    }
}
