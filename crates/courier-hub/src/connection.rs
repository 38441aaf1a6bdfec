//! Per-connection write pipeline.
//!
//! Each accepted transport gets one [`Connection`] with two bounded
//! outbound lanes (text and binary) drained by a single writer task.
//! Enqueueing never blocks: a full lane drops the frame, which keeps the
//! fan-out path bounded regardless of how slow an individual peer reads.

use std::collections::HashSet;
use std::future::Future;
use std::sync::{Arc, RwLock};

use tokio::sync::{mpsc, watch};
use tracing::debug;

use courier_proto::constants::WRITE_QUEUE_CAPACITY;

/// Pong replies are rare; a handful of slots is plenty.
const PONG_QUEUE_CAPACITY: usize = 8;

/// The transport half the writer task drains into.
///
/// Implemented by the server over the WebSocket sink; tests use a
/// channel-backed sink. Returning an error from any method tells the
/// writer the transport is gone and shuts the pipeline down.
pub trait FrameSink: Send + 'static {
    fn send_text(&mut self, payload: Vec<u8>) -> impl Future<Output = anyhow::Result<()>> + Send;
    fn send_binary(&mut self, payload: Vec<u8>) -> impl Future<Output = anyhow::Result<()>> + Send;
    fn send_pong(&mut self, payload: Vec<u8>) -> impl Future<Output = anyhow::Result<()>> + Send;
}

#[derive(Debug)]
pub struct Connection {
    text_tx: mpsc::Sender<Vec<u8>>,
    binary_tx: mpsc::Sender<Vec<u8>>,
    pong_tx: mpsc::Sender<Vec<u8>>,
    close_tx: watch::Sender<bool>,
    subscriptions: RwLock<HashSet<String>>,
}

impl Connection {
    /// Create the connection and start its writer task over `sink`.
    ///
    /// The writer is the only actor that ever touches the sink. It exits
    /// on the close signal, on the empty-payload sentinel, or when the
    /// sink reports the transport gone.
    pub fn open<S: FrameSink>(sink: S) -> Arc<Self> {
        let (text_tx, text_rx) = mpsc::channel(WRITE_QUEUE_CAPACITY);
        let (binary_tx, binary_rx) = mpsc::channel(WRITE_QUEUE_CAPACITY);
        let (pong_tx, pong_rx) = mpsc::channel(PONG_QUEUE_CAPACITY);
        let (close_tx, close_rx) = watch::channel(false);

        tokio::spawn(writer_loop(sink, text_rx, binary_rx, pong_rx, close_rx));

        Arc::new(Self {
            text_tx,
            binary_tx,
            pong_tx,
            close_tx,
            subscriptions: RwLock::new(HashSet::new()),
        })
    }

    /// Enqueue a text frame. Never blocks; drops on a full or closed lane.
    pub fn write_text(&self, payload: Vec<u8>) {
        if let Err(mpsc::error::TrySendError::Full(_)) = self.text_tx.try_send(payload) {
            debug!("text lane full, dropping frame for slow peer");
        }
    }

    /// Enqueue a binary frame. Never blocks; drops on a full or closed lane.
    pub fn write_binary(&self, payload: Vec<u8>) {
        if let Err(mpsc::error::TrySendError::Full(_)) = self.binary_tx.try_send(payload) {
            debug!("binary lane full, dropping frame for slow peer");
        }
    }

    /// Enqueue a pong reply to a transport ping, echoing its payload.
    pub fn write_pong(&self, payload: Vec<u8>) {
        let _ = self.pong_tx.try_send(payload);
    }

    /// Signal the writer to exit. Pending frames may be discarded; any
    /// enqueue after this is silently dropped.
    pub fn shutdown(&self) {
        let _ = self.close_tx.send(true);
        // Sentinel unblocks a writer parked on the lanes.
        let _ = self.text_tx.try_send(Vec::new());
    }

    /// Add a topic to this connection's subscription set.
    ///
    /// Returns `false` if the topic was already present (idempotent).
    pub fn subscribe(&self, topic: &str) -> bool {
        self.subscriptions
            .write()
            .expect("subscription lock poisoned")
            .insert(topic.to_string())
    }

    /// Remove a topic; `false` if it was not subscribed.
    pub fn unsubscribe(&self, topic: &str) -> bool {
        self.subscriptions
            .write()
            .expect("subscription lock poisoned")
            .remove(topic)
    }

    pub fn is_subscribed(&self, topic: &str) -> bool {
        self.subscriptions
            .read()
            .expect("subscription lock poisoned")
            .contains(topic)
    }

    pub fn topics(&self) -> Vec<String> {
        self.subscriptions
            .read()
            .expect("subscription lock poisoned")
            .iter()
            .cloned()
            .collect()
    }
}

async fn writer_loop<S: FrameSink>(
    mut sink: S,
    mut text_rx: mpsc::Receiver<Vec<u8>>,
    mut binary_rx: mpsc::Receiver<Vec<u8>>,
    mut pong_rx: mpsc::Receiver<Vec<u8>>,
    mut close_rx: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            frame = text_rx.recv() => match frame {
                Some(payload) if payload.is_empty() => break,
                Some(payload) => {
                    if sink.send_text(payload).await.is_err() {
                        break;
                    }
                }
                None => break,
            },
            frame = binary_rx.recv() => match frame {
                Some(payload) => {
                    if sink.send_binary(payload).await.is_err() {
                        break;
                    }
                }
                None => break,
            },
            frame = pong_rx.recv() => match frame {
                Some(payload) => {
                    if sink.send_pong(payload).await.is_err() {
                        break;
                    }
                }
                None => break,
            },
            changed = close_rx.changed() => {
                if changed.is_err() || *close_rx.borrow() {
                    break;
                }
            }
        }
    }
}
