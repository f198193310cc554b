//! In-memory client transport.
//!
//! [`channel_transport`] returns the two halves a session runs over plus a
//! [`ClientEnd`] the test drives. Frames travel over unbounded channels, so
//! tests observe exactly what a WebSocket client would see without sockets.

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use courier_proto::{Message, Notice, SendRequest};
use courier_server::{FrameReader, FrameWriter, TransportError, WireFrame};
use tokio::sync::mpsc;

enum Inbound {
    Frame(WireFrame),
    Fail(TransportError),
}

#[derive(Default)]
struct Faults {
    fail_writes: AtomicBool,
    closed_by_server: AtomicBool,
}

/// Create a connected client/session transport pair.
pub fn channel_transport() -> (ClientEnd, ChannelReader, ChannelWriter) {
    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    let faults = Arc::new(Faults::default());

    let client =
        ClientEnd { inbound: Some(inbound_tx), outbound: outbound_rx, faults: Arc::clone(&faults) };
    let reader = ChannelReader { inbound: inbound_rx };
    let writer = ChannelWriter { outbound: Some(outbound_tx), faults };

    (client, reader, writer)
}

/// Session-side reading half.
pub struct ChannelReader {
    inbound: mpsc::UnboundedReceiver<Inbound>,
}

#[async_trait]
impl FrameReader for ChannelReader {
    async fn next_frame(&mut self) -> Result<Option<WireFrame>, TransportError> {
        match self.inbound.recv().await {
            Some(Inbound::Frame(frame)) => Ok(Some(frame)),
            Some(Inbound::Fail(e)) => Err(e),
            None => Ok(None),
        }
    }
}

/// Session-side writing half.
pub struct ChannelWriter {
    outbound: Option<mpsc::UnboundedSender<String>>,
    faults: Arc<Faults>,
}

#[async_trait]
impl FrameWriter for ChannelWriter {
    async fn send_text(&mut self, payload: &str) -> Result<(), TransportError> {
        if self.faults.fail_writes.load(Ordering::Acquire) {
            return Err(TransportError::Write("injected write failure".to_string()));
        }
        let Some(outbound) = &self.outbound else {
            return Err(TransportError::Write("transport closed".to_string()));
        };
        outbound
            .send(payload.to_owned())
            .map_err(|_| TransportError::Write("client gone".to_string()))
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.outbound = None;
        self.faults.closed_by_server.store(true, Ordering::Release);
        Ok(())
    }
}

/// Something the client received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// A delivered chat message
    Message(Message),
    /// A control notice for this connection
    Notice(Notice),
    /// A frame that is neither
    Unknown(String),
}

impl ClientEvent {
    /// Classify a raw outbound frame.
    pub fn parse(raw: &str) -> Self {
        if let Ok(message) = Message::decode(raw) {
            return Self::Message(message);
        }
        match serde_json::from_str::<Notice>(raw) {
            Ok(notice) => Self::Notice(notice),
            Err(_) => Self::Unknown(raw.to_owned()),
        }
    }

    /// The message, if this is one.
    pub fn into_message(self) -> Option<Message> {
        match self {
            Self::Message(message) => Some(message),
            Self::Notice(_) | Self::Unknown(_) => None,
        }
    }

    /// The notice error code, if this is an error notice.
    pub fn error_code(&self) -> Option<&str> {
        match self {
            Self::Notice(Notice::Error { code, .. }) => Some(code),
            Self::Message(_) | Self::Unknown(_) => None,
        }
    }
}

/// Test-side end of a connection.
pub struct ClientEnd {
    inbound: Option<mpsc::UnboundedSender<Inbound>>,
    outbound: mpsc::UnboundedReceiver<String>,
    faults: Arc<Faults>,
}

impl ClientEnd {
    /// Send a request as a text frame. Returns `false` once the session has
    /// stopped reading.
    pub fn send_request(&self, request: &SendRequest) -> bool {
        match request.encode() {
            Ok(raw) => self.send_raw(&raw),
            Err(e) => {
                tracing::warn!(error = %e, "request encode failed");
                false
            },
        }
    }

    /// Send an arbitrary text frame.
    pub fn send_raw(&self, raw: &str) -> bool {
        self.push(Inbound::Frame(WireFrame::Text(raw.to_owned())))
    }

    /// Send an arbitrary binary frame.
    pub fn send_binary(&self, raw: Vec<u8>) -> bool {
        self.push(Inbound::Frame(WireFrame::Binary(raw)))
    }

    /// Make the session's next read fail.
    pub fn fail_read(&self, reason: &str) -> bool {
        self.push(Inbound::Fail(TransportError::Read(reason.to_owned())))
    }

    /// Make every later session write fail.
    pub fn fail_writes(&self) {
        self.faults.fail_writes.store(true, Ordering::Release);
    }

    /// Hang up cleanly, as a client close frame would.
    pub fn close(&mut self) {
        self.inbound = None;
    }

    /// Whether the session closed its writing half.
    pub fn closed_by_server(&self) -> bool {
        self.faults.closed_by_server.load(Ordering::Acquire)
    }

    /// Next raw frame, or `None` on timeout or once the server closed and
    /// everything queued was read.
    pub async fn recv_timeout(&mut self, wait: Duration) -> Option<String> {
        tokio::time::timeout(wait, self.outbound.recv()).await.ok().flatten()
    }

    /// Next frame, classified.
    pub async fn next_event(&mut self, wait: Duration) -> Option<ClientEvent> {
        self.recv_timeout(wait).await.map(|raw| ClientEvent::parse(&raw))
    }

    /// Next delivered message, skipping notices.
    pub async fn next_message(&mut self, wait: Duration) -> Option<Message> {
        let next = async {
            while let Some(raw) = self.outbound.recv().await {
                if let ClientEvent::Message(message) = ClientEvent::parse(&raw) {
                    return Some(message);
                }
            }
            None
        };
        tokio::time::timeout(wait, next).await.ok().flatten()
    }

    /// Next error notice code, skipping messages.
    pub async fn next_error_code(&mut self, wait: Duration) -> Option<String> {
        let next = async {
            while let Some(raw) = self.outbound.recv().await {
                if let Some(code) = ClientEvent::parse(&raw).error_code() {
                    return Some(code.to_owned());
                }
            }
            None
        };
        tokio::time::timeout(wait, next).await.ok().flatten()
    }

    /// Everything already queued, without waiting.
    pub fn drain(&mut self) -> Vec<ClientEvent> {
        let mut events = Vec::new();
        while let Ok(raw) = self.outbound.try_recv() {
            events.push(ClientEvent::parse(&raw));
        }
        events
    }

    /// Wait until the server closes this connection. Returns `false` on
    /// timeout. Frames still queued are discarded.
    pub async fn wait_closed(&mut self, wait: Duration) -> bool {
        let drained = async {
            while self.outbound.recv().await.is_some() {}
        };
        tokio::time::timeout(wait, drained).await.is_ok()
    }

    fn push(&self, inbound: Inbound) -> bool {
        self.inbound.as_ref().is_some_and(|tx| tx.send(inbound).is_ok())
    }
}
