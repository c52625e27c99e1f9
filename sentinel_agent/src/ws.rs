//! WebSocket upgrade and per-connection handler. Forwards broadcast events as text frames.

use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::time::Duration;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
};
use futures_util::{SinkExt, StreamExt};
use tracing::debug;

use crate::broadcast::Subscription;
use crate::state::AppState;

// How long an evicted viewer's writer may keep flushing its backlog and the Close frame.
const EVICTION_GRACE: Duration = Duration::from_millis(500);

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(q): Query<HashMap<String, String>>,
) -> Response {
    if !state.authorized(q.get("token")) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let Subscription {
        id,
        mut rx,
        mut evicted,
    } = state.broadcaster.subscribe();
    state.client_count.fetch_add(1, Ordering::Relaxed);

    // Ensure we unsubscribe and decrement on disconnect (drop).
    struct ClientGuard(AppState, u64);
    impl Drop for ClientGuard {
        fn drop(&mut self) {
            self.0.broadcaster.unsubscribe(self.1);
            self.0.client_count.fetch_sub(1, Ordering::Relaxed);
        }
    }
    let _guard = ClientGuard(state.clone(), id);
    debug!(subscriber = id, "viewer connected");

    let (mut sink, mut stream) = socket.split();

    // Writer: ends when its queue closes or the socket errors. It can stay parked in `send`
    // while the peer is not reading, so eviction is watched separately below.
    let mut writer = tokio::spawn(async move {
        while let Some(payload) = rx.recv().await {
            if sink.send(Message::Text(payload.to_string())).await.is_err() {
                return;
            }
        }
        let _ = sink.send(Message::Close(None)).await;
    });

    // Viewers only send lifecycle frames; anything else is ignored.
    let was_evicted = loop {
        tokio::select! {
            _ = &mut evicted => break true,
            _ = &mut writer => break false,
            msg = stream.next() => match msg {
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break false,
                Some(Ok(_)) => {}
            },
        }
    };

    if was_evicted {
        debug!(subscriber = id, "viewer evicted, closing");
        if tokio::time::timeout(EVICTION_GRACE, &mut writer).await.is_err() {
            debug!(subscriber = id, "viewer not draining, dropping socket");
        }
    }
    // Aborting drops the sink half; the stream half goes with this frame.
    writer.abort();
}
