//! In-memory signaling transport
//!
//! A `MockTransport` records every call made on it. On its own it only
//! delivers what a test injects with `deliver`; when created through a
//! `MockSignalingServer` its traffic is routed to the other members.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{debug, warn};

use watercooler_core::{
    InboundSignal, OutboundSignal, ParticipantId, SendOutcome, SignalHandler, SignalKind,
    SignalingTransport, TransportError,
};

use crate::mock_server::MockSignalingServer;

#[derive(Default)]
struct TransportState {
    connected: bool,
    handlers: HashMap<SignalKind, SignalHandler>,
    sent: Vec<OutboundSignal>,
    on_calls: Vec<SignalKind>,
    off_calls: Vec<SignalKind>,
    connect_calls: Vec<String>,
    disconnect_calls: usize,
    connect_error: Option<TransportError>,
    server: Option<MockSignalingServer>,
    assigned_id: Option<ParticipantId>,
}

/// Recording signaling transport; clones share state
#[derive(Clone, Default)]
pub struct MockTransport {
    state: Arc<Mutex<TransportState>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn linked(server: MockSignalingServer) -> Self {
        let transport = Self::new();
        transport.state.lock().server = Some(server);
        transport
    }

    pub(crate) fn set_assigned_id(&self, id: Option<ParticipantId>) {
        self.state.lock().assigned_id = id;
    }

    /// Id the linked server assigned on connect
    pub fn assigned_id(&self) -> Option<ParticipantId> {
        self.state.lock().assigned_id.clone()
    }

    /// Invoke the handler registered for the signal's kind.
    ///
    /// Returns false if no handler is registered.
    pub fn deliver(&self, signal: InboundSignal) -> bool {
        let handler = self.state.lock().handlers.get(&signal.kind()).cloned();
        match handler {
            Some(handler) => {
                handler(signal);
                true
            }
            None => {
                debug!(kind = %signal.kind(), "No handler registered; signal dropped");
                false
            }
        }
    }

    pub fn sent(&self) -> Vec<OutboundSignal> {
        self.state.lock().sent.clone()
    }

    pub fn take_sent(&self) -> Vec<OutboundSignal> {
        std::mem::take(&mut self.state.lock().sent)
    }

    pub fn registered_kinds(&self) -> Vec<SignalKind> {
        let mut kinds: Vec<_> = self.state.lock().handlers.keys().copied().collect();
        kinds.sort();
        kinds
    }

    pub fn on_calls(&self) -> Vec<SignalKind> {
        self.state.lock().on_calls.clone()
    }

    pub fn off_calls(&self) -> Vec<SignalKind> {
        self.state.lock().off_calls.clone()
    }

    pub fn connect_calls(&self) -> Vec<String> {
        self.state.lock().connect_calls.clone()
    }

    pub fn connect_count(&self) -> usize {
        self.state.lock().connect_calls.len()
    }

    pub fn disconnect_count(&self) -> usize {
        self.state.lock().disconnect_calls
    }

    /// Simulate the link dropping or coming back without a reconnect
    pub fn set_connected(&self, connected: bool) {
        self.state.lock().connected = connected;
    }

    /// Make the next `connect` fail with `error`
    pub fn fail_next_connect(&self, error: TransportError) {
        self.state.lock().connect_error = Some(error);
    }
}

#[async_trait]
impl SignalingTransport for MockTransport {
    async fn connect(&self, url: &str) -> Result<(), TransportError> {
        let server = {
            let mut state = self.state.lock();
            state.connect_calls.push(url.to_string());
            if let Some(error) = state.connect_error.take() {
                return Err(error);
            }
            state.connected = true;
            state.server.clone()
        };
        if let Some(server) = server {
            server.join(self);
        }
        Ok(())
    }

    fn send(&self, signal: OutboundSignal) -> SendOutcome {
        let route = {
            let mut state = self.state.lock();
            if !state.connected {
                warn!(kind = %signal.kind(), "Transport not connected; signal dropped");
                return SendOutcome::NotConnected;
            }
            state.sent.push(signal.clone());
            state.server.clone().zip(state.assigned_id.clone())
        };
        if let Some((server, from)) = route {
            server.route(&from, signal);
        }
        SendOutcome::Sent
    }

    fn on(&self, kind: SignalKind, handler: SignalHandler) {
        let mut state = self.state.lock();
        state.on_calls.push(kind);
        state.handlers.insert(kind, handler);
    }

    fn off(&self, kind: SignalKind) {
        let mut state = self.state.lock();
        state.off_calls.push(kind);
        state.handlers.remove(&kind);
    }

    async fn disconnect(&self) {
        let leaving = {
            let mut state = self.state.lock();
            state.disconnect_calls += 1;
            state.connected = false;
            state.server.clone().zip(state.assigned_id.take())
        };
        if let Some((server, id)) = leaving {
            server.leave(&id);
        }
    }

    fn is_connected(&self) -> bool {
        self.state.lock().connected
    }
}
