//! Watercooler Harness
//!
//! In-memory doubles for the collaborators a `RemoteConnection` talks to:
//! a signaling transport, a rendezvous server linking several transports,
//! a scripted peer connection factory, and movement and volume fakes.

pub mod mock_peer;
pub mod mock_server;
pub mod mock_transport;
pub mod samplers;

pub use mock_peer::{MockPeerConnection, MockPeerConnectionFactory};
pub use mock_server::MockSignalingServer;
pub use mock_transport::MockTransport;
pub use samplers::{wait_until, RecordingVolume, RecordingVolumeFactory, ScriptedSampler};
