//! Signal handler registry
//!
//! Tracks the message types registered on the signaling transport so
//! teardown removes exactly that set.

use std::collections::BTreeSet;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use watercooler_core::{InboundSignal, SignalKind, SignalingTransport};

#[derive(Debug, Default)]
pub struct HandlerRegistry {
    registered: BTreeSet<SignalKind>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a forwarding handler for `kind`; refuses a second registration
    pub fn register(
        &mut self,
        transport: &dyn SignalingTransport,
        kind: SignalKind,
        inbound: mpsc::UnboundedSender<InboundSignal>,
    ) -> bool {
        if self.registered.contains(&kind) {
            warn!(%kind, "Handler already registered");
            return false;
        }
        transport.on(
            kind,
            Arc::new(move |signal: InboundSignal| {
                if inbound.send(signal).is_err() {
                    debug!(%kind, "Session task gone; dropping signal");
                }
            }),
        );
        self.registered.insert(kind);
        true
    }

    /// Register every message type the session task consumes
    pub fn register_all(
        &mut self,
        transport: &dyn SignalingTransport,
        inbound: &mpsc::UnboundedSender<InboundSignal>,
    ) -> usize {
        let mut count = 0;
        for kind in SignalKind::ALL {
            if self.register(transport, kind, inbound.clone()) {
                count += 1;
            }
        }
        count
    }

    /// Deregister everything registered through this registry
    pub fn deregister_all(&mut self, transport: &dyn SignalingTransport) -> usize {
        let count = self.registered.len();
        for kind in std::mem::take(&mut self.registered) {
            transport.off(kind);
        }
        count
    }

    pub fn is_registered(&self, kind: SignalKind) -> bool {
        self.registered.contains(&kind)
    }

    pub fn len(&self) -> usize {
        self.registered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registered.is_empty()
    }
}
