//! WebSocket Signaling Transport
//!
//! JSON `{"type", "payload"}` envelopes over a WebSocket, with a supervisor
//! task that redials with exponential backoff when the socket drops.

pub mod transport;

pub use transport::{normalize_url, WebSocketTransport};
