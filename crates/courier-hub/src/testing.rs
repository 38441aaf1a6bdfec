//! Test support: channel-backed frame sinks and stub routers.
//!
//! Compiled for this crate's own tests and, behind the `test-util`
//! feature, for dependent crates that need to drive sockets without a
//! live transport.

use std::sync::{Arc, Mutex, RwLock};

use tokio::sync::{mpsc, watch};

use courier_proto::Envelope;

use crate::connection::FrameSink;
use crate::dispatch::SignalingRouter;
use crate::socket::Socket;

/// One frame observed at the sink, in transport order.
#[derive(Debug, Clone, PartialEq)]
pub enum SinkFrame {
    Text(Vec<u8>),
    Binary(Vec<u8>),
    Pong(Vec<u8>),
}

impl SinkFrame {
    /// Decode a text frame's JSON payload, panicking on anything else.
    pub fn into_envelope(self) -> Envelope {
        match self {
            SinkFrame::Text(payload) => {
                courier_proto::decode(&payload).expect("sink frame is not a valid envelope")
            }
            other => panic!("expected text frame, got {other:?}"),
        }
    }
}

/// A [`FrameSink`] that forwards every frame into an unbounded channel.
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<SinkFrame>,
    gate: Option<watch::Receiver<bool>>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<SinkFrame>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx, gate: None }, rx)
    }

    /// A sink whose writes park until [`StalledReceiver::release`] is
    /// called, for exercising full-lane behavior.
    pub fn stalled() -> (Self, StalledReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        let (gate_tx, gate_rx) = watch::channel(false);
        (
            Self {
                tx,
                gate: Some(gate_rx),
            },
            StalledReceiver { rx, gate_tx },
        )
    }

    async fn wait_gate(&mut self) {
        if let Some(gate) = &mut self.gate {
            while !*gate.borrow() {
                if gate.changed().await.is_err() {
                    break;
                }
            }
        }
    }

    fn forward(&self, frame: SinkFrame) -> anyhow::Result<()> {
        self.tx
            .send(frame)
            .map_err(|_| anyhow::anyhow!("test sink receiver dropped"))
    }
}

impl FrameSink for ChannelSink {
    async fn send_text(&mut self, payload: Vec<u8>) -> anyhow::Result<()> {
        self.wait_gate().await;
        self.forward(SinkFrame::Text(payload))
    }

    async fn send_binary(&mut self, payload: Vec<u8>) -> anyhow::Result<()> {
        self.wait_gate().await;
        self.forward(SinkFrame::Binary(payload))
    }

    async fn send_pong(&mut self, payload: Vec<u8>) -> anyhow::Result<()> {
        self.wait_gate().await;
        self.forward(SinkFrame::Pong(payload))
    }
}

/// Receiver side of [`ChannelSink::stalled`].
pub struct StalledReceiver {
    rx: mpsc::UnboundedReceiver<SinkFrame>,
    gate_tx: watch::Sender<bool>,
}

impl StalledReceiver {
    /// Unpark the sink; all subsequent writes go straight through.
    pub fn release(&self) {
        let _ = self.gate_tx.send(true);
    }

    pub fn inner(&mut self) -> &mut mpsc::UnboundedReceiver<SinkFrame> {
        &mut self.rx
    }
}

/// A signaling router that ignores everything.
pub struct NullSignalingRouter;

impl SignalingRouter for NullSignalingRouter {
    fn handle_signaling(&self, _socket: &Arc<Socket>, _envelope: Envelope) {}

    fn handle_disconnect(&self, _socket_id: &str) {}
}

/// A signaling router that records what it was handed.
#[derive(Default)]
pub struct RecordingRouter {
    seen: Mutex<Vec<(String, Envelope)>>,
    disconnected: RwLock<Vec<String>>,
}

impl RecordingRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seen(&self) -> Vec<(String, Envelope)> {
        self.seen.lock().expect("recording lock poisoned").clone()
    }

    pub fn disconnected(&self) -> Vec<String> {
        self.disconnected
            .read()
            .expect("recording lock poisoned")
            .clone()
    }
}

impl SignalingRouter for RecordingRouter {
    fn handle_signaling(&self, socket: &Arc<Socket>, envelope: Envelope) {
        self.seen
            .lock()
            .expect("recording lock poisoned")
            .push((socket.id().to_string(), envelope));
    }

    fn handle_disconnect(&self, socket_id: &str) {
        self.disconnected
            .write()
            .expect("recording lock poisoned")
            .push(socket_id.to_string());
    }
}
