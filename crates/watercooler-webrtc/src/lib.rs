//! Watercooler WebRTC
//!
//! `PeerConnectionFactory` backed by the `webrtc` crate. Local tracks are
//! static sample tracks; feeding samples into them is left to the media stack.

pub mod connection;
pub mod convert;

pub use connection::{WebRtcPeerConnection, WebRtcPeerConnectionFactory};
