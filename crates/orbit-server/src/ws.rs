//! WebSocket transport for the lifecycle manager.
//!
//! One task per socket reads frames and dispatches events; a second task
//! drains the connection's outbound queue into the socket.  Either side
//! ending tears the whole connection down.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures::stream::SplitStream;
use futures::{SinkExt, StreamExt};
use tracing::{debug, warn};

use orbit_shared::constants::MAX_FRAME_SIZE;
use orbit_shared::protocol::ClientEvent;
use orbit_shared::types::ConnectionId;

use crate::api::AppState;
use crate::lifecycle::ConnectionLifecycle;

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.max_message_size(MAX_FRAME_SIZE)
        .on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let lifecycle = state.realtime.lifecycle().clone();
    let (conn, mut outbound) = lifecycle.connect().await;
    let (mut sender, receiver) = socket.split();

    let mut send_task = tokio::spawn(async move {
        while let Some(envelope) = outbound.recv().await {
            let text = match envelope.to_text() {
                Ok(text) => text,
                Err(e) => {
                    warn!(conn = %conn, event = %envelope.event, error = %e, "Failed to encode event");
                    continue;
                }
            };
            if sender.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    tokio::select! {
        _ = read_frames(conn, receiver, &lifecycle, &state) => {}
        _ = &mut send_task => debug!(conn = %conn, "WebSocket write failed"),
    }

    lifecycle.disconnect(conn).await;
    state.event_limiter.forget(&conn).await;
    send_task.abort();
}

/// Dispatch inbound frames until the peer closes or a read fails.
async fn read_frames(
    conn: ConnectionId,
    mut receiver: SplitStream<WebSocket>,
    lifecycle: &ConnectionLifecycle,
    state: &AppState,
) {
    while let Some(frame) = receiver.next().await {
        let frame = match frame {
            Ok(frame) => frame,
            Err(e) => {
                debug!(conn = %conn, error = %e, "WebSocket read failed");
                return;
            }
        };

        match frame {
            Message::Text(text) => {
                if !state.event_limiter.check(conn).await {
                    warn!(conn = %conn, "Event rate exceeded, dropping frame");
                    continue;
                }

                match ClientEvent::parse(text.as_str()) {
                    Ok(event) => lifecycle.handle_event(conn, event).await,
                    Err(e) => debug!(conn = %conn, error = %e, "Dropping unusable frame"),
                }
            }
            Message::Close(_) => return,
            // Pings are answered by the transport; binary frames carry nothing
            // in this protocol.
            _ => {}
        }
    }
}
