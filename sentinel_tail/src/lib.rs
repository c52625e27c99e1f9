//! Library API for sentinel_tail (feed decoding and the WebSocket client).

pub mod types;
pub mod ws;
