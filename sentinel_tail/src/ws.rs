//! Minimal WebSocket client for following an agent's live feed.

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

use crate::types::FeedEvent;

pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

// Connect to the agent and return the WS stream
pub async fn connect(url: &str) -> anyhow::Result<WsStream> {
    let (ws, _) = connect_async(url).await?;
    Ok(ws)
}

/// Next raw text frame, or `None` once the agent closes the feed.
pub async fn next_text(ws: &mut WsStream) -> Option<String> {
    while let Some(msg) = ws.next().await {
        match msg {
            Ok(Message::Text(text)) => return Some(text),
            Ok(Message::Close(_)) | Err(_) => return None,
            Ok(_) => {}
        }
    }
    None
}

/// Next decodable event. Frames that are not `{type,data}` objects are skipped.
pub async fn next_event(ws: &mut WsStream) -> Option<FeedEvent> {
    while let Some(text) = next_text(ws).await {
        if let Ok(ev) = serde_json::from_str::<FeedEvent>(&text) {
            return Some(ev);
        }
    }
    None
}

pub async fn close(ws: &mut WsStream) {
    let _ = ws.send(Message::Close(None)).await;
}
