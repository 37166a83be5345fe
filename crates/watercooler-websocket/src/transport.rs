//! WebSocket transport implementation

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};
use url::Url;

use watercooler_core::{
    Frame, InboundSignal, OutboundSignal, ReconnectConfig, SendOutcome, SignalHandler, SignalKind,
    SignalingTransport, TransportError,
};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Map `http`/`https` to `ws`/`wss` and reject anything else
pub fn normalize_url(raw: &str) -> Result<Url, TransportError> {
    let invalid = |reason: String| TransportError::InvalidUrl {
        url: raw.to_string(),
        reason,
    };
    let mut url = Url::parse(raw).map_err(|e| invalid(e.to_string()))?;
    let scheme = match url.scheme() {
        "ws" | "http" => "ws",
        "wss" | "https" => "wss",
        other => return Err(invalid(format!("unsupported scheme {}", other))),
    };
    if url.scheme() != scheme {
        url.set_scheme(scheme)
            .map_err(|_| invalid(format!("cannot use scheme {}", scheme)))?;
    }
    Ok(url)
}

// ----------------------------------------------------------------------------
// Shared State
// ----------------------------------------------------------------------------

/// State shared between the transport handle and its supervisor
#[derive(Default)]
struct Shared {
    handlers: RwLock<HashMap<SignalKind, SignalHandler>>,
    outgoing: Mutex<Option<mpsc::UnboundedSender<String>>>,
    connected: AtomicBool,
}

impl Shared {
    fn dispatch(&self, text: &str) {
        let frame = match Frame::parse(text) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Ignoring malformed signaling frame: {}", e);
                return;
            }
        };
        let Some(kind) = frame.signal_kind() else {
            debug!(kind = %frame.kind, "Ignoring unknown message type");
            return;
        };
        let signal = match InboundSignal::from_payload(kind, frame.payload) {
            Ok(signal) => signal,
            Err(e) => {
                warn!(%kind, "Ignoring undecodable payload: {}", e);
                return;
            }
        };
        let handler = self.handlers.read().get(&kind).cloned();
        match handler {
            Some(handler) => handler(signal),
            None => debug!(%kind, "No handler registered"),
        }
    }

    fn attach(&self, outgoing: mpsc::UnboundedSender<String>) {
        *self.outgoing.lock() = Some(outgoing);
        self.connected.store(true, Ordering::SeqCst);
    }

    fn detach(&self) {
        self.connected.store(false, Ordering::SeqCst);
        *self.outgoing.lock() = None;
    }
}

struct Supervisor {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

// ----------------------------------------------------------------------------
// WebSocket Transport
// ----------------------------------------------------------------------------

/// Signaling transport over a WebSocket with transparent reconnect
pub struct WebSocketTransport {
    reconnect: ReconnectConfig,
    shared: Arc<Shared>,
    supervisor: Mutex<Option<Supervisor>>,
}

impl WebSocketTransport {
    pub fn new(reconnect: ReconnectConfig) -> Self {
        Self {
            reconnect,
            shared: Arc::new(Shared::default()),
            supervisor: Mutex::new(None),
        }
    }

    fn stop_supervisor(&self) -> Option<Supervisor> {
        let supervisor = self.supervisor.lock().take()?;
        let _ = supervisor.shutdown.send(true);
        Some(supervisor)
    }
}

impl Default for WebSocketTransport {
    fn default() -> Self {
        Self::new(ReconnectConfig::default())
    }
}

#[async_trait]
impl SignalingTransport for WebSocketTransport {
    async fn connect(&self, url: &str) -> Result<(), TransportError> {
        let url = normalize_url(url)?;
        if let Some(previous) = self.stop_supervisor() {
            debug!("Replacing existing signaling connection");
            let _ = previous.handle.await;
        }

        info!(%url, "Connecting to signaling server");
        let (stream, _) = connect_async(url.as_str())
            .await
            .map_err(|e| TransportError::ConnectionFailed {
                url: url.to_string(),
                reason: e.to_string(),
            })?;
        info!("Connected to signaling server");

        let (outgoing, pending) = mpsc::unbounded_channel();
        self.shared.attach(outgoing);

        let (shutdown, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(supervise(
            url,
            (stream, pending),
            self.shared.clone(),
            self.reconnect.clone(),
            shutdown_rx,
        ));
        *self.supervisor.lock() = Some(Supervisor { shutdown, handle });
        Ok(())
    }

    fn send(&self, signal: OutboundSignal) -> SendOutcome {
        let kind = signal.kind();
        let Some(outgoing) = self.shared.outgoing.lock().clone() else {
            warn!(%kind, "Signaling socket not open; message dropped");
            return SendOutcome::NotConnected;
        };
        let text = match signal.to_frame().and_then(|frame| frame.to_text()) {
            Ok(text) => text,
            Err(e) => {
                error!(%kind, "Failed to encode signaling frame: {}", e);
                return SendOutcome::NotConnected;
            }
        };
        if outgoing.send(text).is_err() {
            warn!(%kind, "Signaling socket closing; message dropped");
            return SendOutcome::NotConnected;
        }
        SendOutcome::Sent
    }

    fn on(&self, kind: SignalKind, handler: SignalHandler) {
        self.shared.handlers.write().insert(kind, handler);
    }

    fn off(&self, kind: SignalKind) {
        self.shared.handlers.write().remove(&kind);
    }

    async fn disconnect(&self) {
        if let Some(supervisor) = self.stop_supervisor() {
            if let Err(e) = supervisor.handle.await {
                debug!("Signaling supervisor ended abnormally: {}", e);
            }
            info!("Disconnected from signaling server");
        }
        self.shared.detach();
    }

    fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }
}

impl Drop for WebSocketTransport {
    fn drop(&mut self) {
        if let Some(supervisor) = self.stop_supervisor() {
            supervisor.handle.abort();
        }
    }
}

// ----------------------------------------------------------------------------
// Supervisor
// ----------------------------------------------------------------------------

/// Serve the socket, then redial with backoff until shut down
async fn supervise(
    url: Url,
    first: (WsStream, mpsc::UnboundedReceiver<String>),
    shared: Arc<Shared>,
    reconnect: ReconnectConfig,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut stream = Some(first);
    let mut attempt: u32 = 0;

    loop {
        if let Some((socket, pending)) = stream.take() {
            if serve(socket, pending, &shared, &mut shutdown).await {
                break;
            }
            attempt = 0;
        }
        if *shutdown.borrow() {
            break;
        }

        let delay = reconnect.delay_for_attempt(attempt);
        attempt = attempt.saturating_add(1);
        info!(attempt, ?delay, "Reconnecting to signaling server");
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = tokio::time::sleep(delay) => {}
        }

        tokio::select! {
            _ = shutdown.changed() => break,
            dialed = connect_async(url.as_str()) => match dialed {
                Ok((socket, _)) => {
                    info!("Reconnected to signaling server");
                    let (outgoing, pending) = mpsc::unbounded_channel();
                    shared.attach(outgoing);
                    stream = Some((socket, pending));
                }
                Err(e) => warn!(attempt, "Reconnect failed: {}", e),
            }
        }
    }
    shared.detach();
    debug!("Signaling supervisor stopped");
}

/// Pump one socket until it closes; returns true if shutdown was requested
async fn serve(
    socket: WsStream,
    mut pending: mpsc::UnboundedReceiver<String>,
    shared: &Shared,
    shutdown: &mut watch::Receiver<bool>,
) -> bool {
    let (mut write, mut read) = socket.split();

    let stopped = loop {
        tokio::select! {
            _ = shutdown.changed() => {
                if let Err(e) = write.send(Message::Close(None)).await {
                    debug!("Close frame not sent: {}", e);
                }
                break true;
            }
            Some(text) = pending.recv() => {
                if let Err(e) = write.send(Message::Text(text)).await {
                    warn!("Failed to write signaling frame: {}", e);
                    break false;
                }
            }
            message = read.next() => match message {
                Some(Ok(Message::Text(text))) => shared.dispatch(&text),
                Some(Ok(Message::Close(_))) | None => {
                    info!("Signaling socket closed by server");
                    break false;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!("Signaling socket error: {}", e);
                    break false;
                }
            }
        }
    };

    shared.detach();
    stopped
}
