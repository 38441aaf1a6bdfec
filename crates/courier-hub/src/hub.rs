//! Socket registry and fan-out engine.
//!
//! One process-global `Hub` owns every live [`Socket`]. Registration and
//! removal take the write half of the registry lock; every fan-out path
//! takes the read half for the duration of the iteration. All enqueues
//! are non-blocking, so the lock is never held across an await.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, RwLock};
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Map, Value};
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

use courier_proto::constants::{DEFAULT_MAX_CONNECTIONS, RESERVED_TOPIC};
use courier_proto::{encode, Envelope};

use crate::connection::Connection;
use crate::offline::{OfflineError, OfflineStore};
use crate::socket::Socket;

#[derive(Error, Debug)]
pub enum HubError {
    #[error("connection limit reached ({max} active)")]
    AtCapacity { max: usize },
}

/// Event handler fired by the hub; each invocation runs in its own task.
pub type Handler = Arc<dyn Fn(Arc<Socket>) + Send + Sync>;

/// One row of the user list reply.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct UserEntry {
    pub id: String,
    pub alias: String,
}

struct Registry {
    sockets: HashMap<String, Arc<Socket>>,
    conn_count: usize,
}

pub struct Hub {
    registry: RwLock<Registry>,
    handlers: RwLock<HashMap<String, Vec<Handler>>>,
    max_connections: usize,
    offline: Arc<dyn OfflineStore>,
}

impl Hub {
    pub fn new(max_connections: usize, offline: Arc<dyn OfflineStore>) -> Self {
        Self {
            registry: RwLock::new(Registry {
                sockets: HashMap::new(),
                conn_count: 0,
            }),
            handlers: RwLock::new(HashMap::new()),
            max_connections,
            offline,
        }
    }

    pub fn with_defaults(offline: Arc<dyn OfflineStore>) -> Self {
        Self::new(DEFAULT_MAX_CONNECTIONS, offline)
    }

    // ------------------------------------------------------------------
    // Admission and removal
    // ------------------------------------------------------------------

    /// Register a new socket for `connection`.
    ///
    /// The admission cap is checked and the socket registered under one
    /// write-lock critical section, so the count and the registry can
    /// never disagree.
    pub fn admit(&self, connection: Arc<Connection>) -> Result<Arc<Socket>, HubError> {
        let mut registry = self.registry.write().expect("hub lock poisoned");

        if registry.conn_count >= self.max_connections {
            return Err(HubError::AtCapacity {
                max: self.max_connections,
            });
        }

        let mut stamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        while registry.sockets.contains_key(&stamp.to_string()) {
            stamp += 1;
        }
        let id = stamp.to_string();

        let socket = Arc::new(Socket::new(id.clone(), connection));
        registry.sockets.insert(id, socket.clone());
        registry.conn_count += 1;

        Ok(socket)
    }

    /// Remove a socket and fire its disconnect handlers.
    pub fn remove(&self, socket_id: &str) -> Option<Arc<Socket>> {
        let removed = {
            let mut registry = self.registry.write().expect("hub lock poisoned");
            let removed = registry.sockets.remove(socket_id);
            if removed.is_some() {
                registry.conn_count -= 1;
            }
            removed
        };

        if let Some(socket) = &removed {
            self.trigger_handlers("disconnect", socket);
        }
        removed
    }

    pub fn connection_count(&self) -> usize {
        self.registry.read().expect("hub lock poisoned").conn_count
    }

    // ------------------------------------------------------------------
    // Event handlers
    // ------------------------------------------------------------------

    pub fn on<F>(&self, event: &str, handler: F)
    where
        F: Fn(Arc<Socket>) + Send + Sync + 'static,
    {
        self.handlers
            .write()
            .expect("hub lock poisoned")
            .entry(event.to_string())
            .or_default()
            .push(Arc::new(handler));
    }

    pub fn on_connect<F: Fn(Arc<Socket>) + Send + Sync + 'static>(&self, handler: F) {
        self.on("connect", handler);
    }

    pub fn on_message<F: Fn(Arc<Socket>) + Send + Sync + 'static>(&self, handler: F) {
        self.on("message", handler);
    }

    pub fn on_close<F: Fn(Arc<Socket>) + Send + Sync + 'static>(&self, handler: F) {
        self.on("close", handler);
    }

    pub fn on_disconnect<F: Fn(Arc<Socket>) + Send + Sync + 'static>(&self, handler: F) {
        self.on("disconnect", handler);
    }

    /// Fire every handler registered for `event`, each in its own task so
    /// application code cannot stall the hub.
    pub fn trigger_handlers(&self, event: &str, socket: &Arc<Socket>) {
        let handlers = {
            let registry = self.handlers.read().expect("hub lock poisoned");
            registry.get(event).cloned().unwrap_or_default()
        };

        for handler in handlers {
            let socket = socket.clone();
            tokio::spawn(async move { handler(socket) });
        }
    }

    // ------------------------------------------------------------------
    // Fan-out
    // ------------------------------------------------------------------

    /// Broadcast to every non-banned socket.
    pub fn broadcast_message(&self, envelope: &Envelope) {
        self.broadcast_message_except(envelope, None);
    }

    /// Broadcast with the topic rule: a topic other than the reserved
    /// name goes to that topic's subscribers (sender included when
    /// subscribed); otherwise everyone except `except`.
    pub fn broadcast_message_except(&self, envelope: &Envelope, except: Option<&str>) {
        let payload = encode(envelope);
        let topic_filter = envelope
            .topic
            .as_deref()
            .filter(|topic| *topic != RESERVED_TOPIC);

        let registry = self.registry.read().expect("hub lock poisoned");
        let mut sent = 0usize;
        for (id, socket) in &registry.sockets {
            if socket.is_banned() {
                continue;
            }
            match topic_filter {
                Some(topic) => {
                    if !socket.connection().is_subscribed(topic) {
                        continue;
                    }
                }
                None => {
                    if except == Some(id.as_str()) {
                        continue;
                    }
                }
            }
            socket.connection().write_text(payload.clone());
            sent += 1;
        }
        debug!(t = envelope.t, recipients = sent, "broadcast");
    }

    /// Binary broadcast to every non-banned socket except the sender.
    pub fn broadcast_binary_except(&self, payload: &[u8], except: Option<&str>) {
        let registry = self.registry.read().expect("hub lock poisoned");
        let mut sent = 0usize;
        for (id, socket) in &registry.sockets {
            if socket.is_banned() || except == Some(id.as_str()) {
                continue;
            }
            socket.connection().write_binary(payload.to_vec());
            sent += 1;
        }
        debug!(bytes = payload.len(), recipients = sent, "binary broadcast");
    }

    /// Fan out a file announcement followed by its binary payload to one
    /// recipient set, derived from the announcement's topic: subscribers
    /// of a real topic, everyone for none or the reserved name. The
    /// sender is always excluded and both frames reach the same sockets.
    pub fn broadcast_file(&self, announce: &Envelope, payload: &[u8], except: &str) {
        let text = encode(announce);
        let topic_filter = announce
            .topic
            .as_deref()
            .filter(|topic| *topic != RESERVED_TOPIC);

        let registry = self.registry.read().expect("hub lock poisoned");
        for (id, socket) in &registry.sockets {
            if socket.is_banned() || id == except {
                continue;
            }
            if let Some(topic) = topic_filter {
                if !socket.connection().is_subscribed(topic) {
                    continue;
                }
            }
            socket.connection().write_text(text.clone());
            socket.connection().write_binary(payload.to_vec());
        }
    }

    /// Direct delivery. An absent recipient gets the message spooled
    /// (synthesizing an id when the sender did not supply one); a live
    /// one gets a best-effort enqueue.
    pub fn emit(&self, recipient: &str, mut envelope: Envelope) {
        match self.get_socket(recipient) {
            Some(socket) => socket.send_message(&envelope),
            None => {
                if envelope.id.is_none() {
                    envelope.id = Some(format!("msg_{}", Uuid::new_v4()));
                }
                if let Err(error) = self.offline.store(recipient, envelope) {
                    warn!(%error, recipient, "failed to spool offline message");
                }
            }
        }
    }

    /// Direct binary delivery. There is no spool for raw payloads; an
    /// absent recipient's bytes are dropped.
    pub fn emit_binary(&self, recipient: &str, payload: Vec<u8>) {
        match self.get_socket(recipient) {
            Some(socket) => socket.send_binary(payload),
            None => debug!(recipient, "dropping binary frame for absent recipient"),
        }
    }

    /// Targeted delivery to known-live subjects; absent ids are skipped,
    /// never spooled.
    pub fn notify(&self, socket_ids: &[String], envelope: &Envelope) {
        let payload = encode(envelope);
        let registry = self.registry.read().expect("hub lock poisoned");
        for id in socket_ids {
            if let Some(socket) = registry.sockets.get(id) {
                if !socket.is_banned() {
                    socket.connection().write_text(payload.clone());
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Lookup
    // ------------------------------------------------------------------

    pub fn get_socket(&self, socket_id: &str) -> Option<Arc<Socket>> {
        self.registry
            .read()
            .expect("hub lock poisoned")
            .sockets
            .get(socket_id)
            .cloned()
    }

    pub fn all_sockets(&self) -> Vec<Arc<Socket>> {
        self.registry
            .read()
            .expect("hub lock poisoned")
            .sockets
            .values()
            .cloned()
            .collect()
    }

    /// Linear scan for sockets carrying a given property value.
    pub fn sockets_by_property(&self, key: &str, value: &Value) -> Vec<Arc<Socket>> {
        self.registry
            .read()
            .expect("hub lock poisoned")
            .sockets
            .values()
            .filter(|socket| socket.has_property_value(key, value))
            .cloned()
            .collect()
    }

    /// Connected users (id and display alias), banned sockets excluded.
    pub fn user_list(&self) -> Vec<UserEntry> {
        self.registry
            .read()
            .expect("hub lock poisoned")
            .sockets
            .values()
            .filter(|socket| !socket.is_banned())
            .map(|socket| UserEntry {
                id: socket.id().to_string(),
                alias: socket.display_name(),
            })
            .collect()
    }

    /// Every topic with at least one non-banned subscriber, sorted.
    pub fn all_topics(&self) -> Vec<String> {
        let registry = self.registry.read().expect("hub lock poisoned");
        let mut topics = BTreeSet::new();
        for socket in registry.sockets.values() {
            if !socket.is_banned() {
                topics.extend(socket.connection().topics());
            }
        }
        topics.into_iter().collect()
    }

    // ------------------------------------------------------------------
    // Moderation and lifecycle
    // ------------------------------------------------------------------

    pub fn ban(&self, socket_id: &str) {
        if let Some(socket) = self.get_socket(socket_id) {
            socket.ban();
        }
    }

    pub fn unban(&self, socket_id: &str) {
        if let Some(socket) = self.get_socket(socket_id) {
            socket.unban();
        }
    }

    pub fn close_socket(&self, socket_id: &str) {
        if let Some(socket) = self.get_socket(socket_id) {
            socket.close();
        }
    }

    // ------------------------------------------------------------------
    // Offline drain
    // ------------------------------------------------------------------

    /// Deliver everything spooled for this socket, then delete the
    /// delivered copies in one call. Each message's `data` is coerced to
    /// an object carrying `offline: true` and the delivery timestamp.
    ///
    /// A delete failure leaves the enqueues in place (at-least-once);
    /// the copies survive for the next drain.
    pub fn deliver_offline(&self, socket: &Arc<Socket>) -> Result<usize, OfflineError> {
        let stored = self.offline.load(socket.id())?;
        if stored.is_empty() {
            return Ok(0);
        }

        let delivered_at = Utc::now().timestamp();
        let mut delivered_ids = Vec::with_capacity(stored.len());

        for mut entry in stored {
            let mut map = match entry.message.data.take() {
                Some(Value::Object(map)) => map,
                Some(other) => {
                    let mut map = Map::new();
                    map.insert("value".to_string(), other);
                    map
                }
                None => Map::new(),
            };
            map.insert("offline".to_string(), Value::Bool(true));
            map.insert("delivered_at".to_string(), json!(delivered_at));
            entry.message.data = Some(Value::Object(map));

            socket.send_message(&entry.message);
            delivered_ids.push(entry.id);
        }

        let count = delivered_ids.len();
        if let Err(error) = self.offline.delete(socket.id(), &delivered_ids) {
            warn!(%error, socket = socket.id(), "failed to delete delivered offline messages");
        }

        debug!(socket = socket.id(), count, "drained offline spool");
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::offline::MemoryOfflineStore;
    use crate::testing::{ChannelSink, SinkFrame};
    use courier_proto::Kind;
    use std::time::Duration;
    use tokio::sync::mpsc::UnboundedReceiver;

    fn new_hub(max: usize) -> Hub {
        Hub::new(
            max,
            Arc::new(MemoryOfflineStore::new(Duration::from_secs(3600))),
        )
    }

    fn join(hub: &Hub) -> (Arc<Socket>, UnboundedReceiver<SinkFrame>) {
        let (sink, rx) = ChannelSink::new();
        let socket = hub.admit(Connection::open(sink)).expect("admission failed");
        (socket, rx)
    }

    async fn recv_envelope(rx: &mut UnboundedReceiver<SinkFrame>) -> Envelope {
        tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("timed out waiting for frame")
            .expect("sink closed")
            .into_envelope()
    }

    async fn assert_no_frame(rx: &mut UnboundedReceiver<SinkFrame>) {
        // Give the writer task a chance to drain anything pending.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(rx.try_recv().is_err(), "unexpected frame enqueued");
    }

    #[tokio::test]
    async fn count_matches_registry_across_admits_and_removes() {
        let hub = new_hub(10);
        let mut sockets = Vec::new();
        for _ in 0..5 {
            sockets.push(join(&hub));
            assert_eq!(hub.connection_count(), hub.all_sockets().len());
        }
        for (socket, _rx) in &sockets {
            hub.remove(socket.id());
            assert_eq!(hub.connection_count(), hub.all_sockets().len());
        }
        assert_eq!(hub.connection_count(), 0);

        // Removing an unknown id must not corrupt the count.
        hub.remove("no-such-socket");
        assert_eq!(hub.connection_count(), 0);
    }

    #[tokio::test]
    async fn admission_rejected_at_capacity() {
        let hub = new_hub(2);
        let _a = join(&hub);
        let _b = join(&hub);

        let (sink, _rx) = ChannelSink::new();
        let err = hub.admit(Connection::open(sink)).unwrap_err();
        assert!(matches!(err, HubError::AtCapacity { max: 2 }));
        assert_eq!(hub.connection_count(), 2);
    }

    #[tokio::test]
    async fn broadcast_excludes_sender_and_banned() {
        let hub = new_hub(10);
        let (a, mut a_rx) = join(&hub);
        let (_b, mut b_rx) = join(&hub);
        let (c, mut c_rx) = join(&hub);
        c.ban();

        let msg = Envelope::new(Kind::Broadcast).with_data(json!({"m": "hi"}));
        hub.broadcast_message_except(&msg, Some(a.id()));

        let got = recv_envelope(&mut b_rx).await;
        assert_eq!(got.data.unwrap()["m"], "hi");
        assert_no_frame(&mut a_rx).await;
        assert_no_frame(&mut c_rx).await;
    }

    #[tokio::test]
    async fn topic_publish_reaches_only_subscribers() {
        let hub = new_hub(10);
        let (a, mut a_rx) = join(&hub);
        let (b, mut b_rx) = join(&hub);
        let (_c, mut c_rx) = join(&hub);
        a.connection().subscribe("news");

        let msg = Envelope::new(Kind::Broadcast)
            .with_topic("news")
            .with_data(json!({"m": "hi"}));
        hub.broadcast_message_except(&msg, Some(b.id()));

        let got = recv_envelope(&mut a_rx).await;
        assert_eq!(got.topic.as_deref(), Some("news"));
        assert_no_frame(&mut b_rx).await;
        assert_no_frame(&mut c_rx).await;
    }

    #[tokio::test]
    async fn reserved_topic_behaves_like_plain_broadcast() {
        let hub = new_hub(10);
        let (a, mut a_rx) = join(&hub);
        let (_b, mut b_rx) = join(&hub);

        // Nobody is subscribed to "general"; it must still fan out to
        // everyone but the sender.
        let msg = Envelope::new(Kind::Broadcast)
            .with_topic(RESERVED_TOPIC)
            .with_data(json!({"m": "hi"}));
        hub.broadcast_message_except(&msg, Some(a.id()));

        recv_envelope(&mut b_rx).await;
        assert_no_frame(&mut a_rx).await;
    }

    #[tokio::test]
    async fn subscribed_sender_receives_own_topic_publish() {
        let hub = new_hub(10);
        let (a, mut a_rx) = join(&hub);
        a.connection().subscribe("news");

        let msg = Envelope::new(Kind::Broadcast)
            .with_topic("news")
            .with_data(json!({"m": "self"}));
        hub.broadcast_message_except(&msg, Some(a.id()));

        recv_envelope(&mut a_rx).await;
    }

    #[tokio::test]
    async fn ban_stops_later_fanouts() {
        let hub = new_hub(10);
        let (a, mut a_rx) = join(&hub);

        hub.broadcast_message(&Envelope::system(json!({"n": 1})));
        recv_envelope(&mut a_rx).await;

        hub.ban(a.id());
        hub.broadcast_message(&Envelope::system(json!({"n": 2})));
        assert_no_frame(&mut a_rx).await;

        hub.unban(a.id());
        hub.broadcast_message(&Envelope::system(json!({"n": 3})));
        let got = recv_envelope(&mut a_rx).await;
        assert_eq!(got.data.unwrap()["n"], 3);
    }

    #[tokio::test]
    async fn emit_to_live_socket_delivers_directly() {
        let hub = new_hub(10);
        let (a, mut a_rx) = join(&hub);

        let msg = Envelope::new(Kind::Direct).with_data(json!({"m": "now"}));
        hub.emit(a.id(), msg);

        let got = recv_envelope(&mut a_rx).await;
        assert_eq!(got.data.unwrap()["m"], "now");
        // Nothing was spooled for a live recipient.
        assert_eq!(hub.deliver_offline(&a).unwrap(), 0);
    }

    #[tokio::test]
    async fn emit_to_absent_id_spools_and_drains_exactly_once() {
        let hub = new_hub(10);
        let msg = Envelope::new(Kind::Direct).with_data(json!({"m": "later"}));
        hub.emit("999", msg);

        // Reconnect under the same id: exactly one delivery, marked.
        let (sink, mut rx) = ChannelSink::new();
        let socket = Arc::new(Socket::new("999".to_string(), Connection::open(sink)));
        assert_eq!(hub.deliver_offline(&socket).unwrap(), 1);

        let got = recv_envelope(&mut rx).await;
        let data = got.data.unwrap();
        assert_eq!(data["m"], "later");
        assert_eq!(data["offline"], true);
        assert!(data["delivered_at"].is_i64());
        assert!(got.id.is_some(), "spooled message carries a synthetic id");

        // Second drain delivers nothing.
        assert_eq!(hub.deliver_offline(&socket).unwrap(), 0);
        assert_no_frame(&mut rx).await;
    }

    #[tokio::test]
    async fn offline_drain_wraps_non_object_data() {
        let hub = new_hub(10);
        hub.emit(
            "999",
            Envelope::new(Kind::Direct).with_data(json!("plain string")),
        );

        let (sink, mut rx) = ChannelSink::new();
        let socket = Arc::new(Socket::new("999".to_string(), Connection::open(sink)));
        hub.deliver_offline(&socket).unwrap();

        let data = recv_envelope(&mut rx).await.data.unwrap();
        assert_eq!(data["value"], "plain string");
        assert_eq!(data["offline"], true);
    }

    #[tokio::test]
    async fn notify_skips_absent_and_banned_without_spooling() {
        let hub = new_hub(10);
        let (a, mut a_rx) = join(&hub);
        let (b, mut b_rx) = join(&hub);
        b.ban();

        let msg = Envelope::system(json!({"type": "nudge"}));
        hub.notify(
            &[a.id().to_string(), b.id().to_string(), "ghost".to_string()],
            &msg,
        );

        recv_envelope(&mut a_rx).await;
        assert_no_frame(&mut b_rx).await;

        // The absent id was not spooled.
        let (sink, mut ghost_rx) = ChannelSink::new();
        let ghost = Arc::new(Socket::new("ghost".to_string(), Connection::open(sink)));
        assert_eq!(hub.deliver_offline(&ghost).unwrap(), 0);
        assert_no_frame(&mut ghost_rx).await;
    }

    #[tokio::test]
    async fn topics_and_users_reflect_live_state() {
        let hub = new_hub(10);
        let (a, _a_rx) = join(&hub);
        let (b, _b_rx) = join(&hub);
        a.connection().subscribe("news");
        a.connection().subscribe("alerts");
        b.connection().subscribe("news");
        a.set_alias("Alice");

        assert_eq!(hub.all_topics(), vec!["alerts", "news"]);

        let users = hub.user_list();
        assert_eq!(users.len(), 2);
        assert!(users
            .iter()
            .any(|u| u.id == a.id() && u.alias == "Alice"));

        b.ban();
        assert_eq!(hub.all_topics(), vec!["alerts", "news"]);
        assert_eq!(hub.user_list().len(), 1);
    }

    #[tokio::test]
    async fn sockets_by_property_scans_linearly() {
        let hub = new_hub(10);
        let (a, _a_rx) = join(&hub);
        let (_b, _b_rx) = join(&hub);
        a.set_property("user_id", json!("user123"));

        let matches = hub.sockets_by_property("user_id", &json!("user123"));
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].id(), a.id());
    }

    #[tokio::test]
    async fn handlers_fire_per_event() {
        let hub = new_hub(10);
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        hub.on_disconnect(move |socket| {
            let _ = tx.send(socket.id().to_string());
        });

        let (a, _a_rx) = join(&hub);
        let id = a.id().to_string();
        hub.remove(&id);

        let fired = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(fired, id);
    }
}
