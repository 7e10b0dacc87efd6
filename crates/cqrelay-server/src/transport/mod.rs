//! Transport layer: WebSocket upgrade, upstream dial and close helpers.

pub mod websocket;

pub use websocket::{ClientStream, UpstreamStream};
