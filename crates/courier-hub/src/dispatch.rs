//! Message dispatcher.
//!
//! Every decoded frame is routed here by kind. Subscribe/unsubscribe
//! mutate the sender's subscription set, broadcast and direct go through
//! the hub's fan-out, file metadata arms the pending-file slot for the
//! next binary frame, and the signaling range is delegated to the call
//! subsystem through [`SignalingRouter`].
//!
//! A malformed or mis-shaped frame costs the sender an error reply,
//! never the connection.

use std::sync::Arc;

use serde_json::json;
use tracing::{debug, trace};

use courier_proto::payload::{self, AliasChange, FileMeta};
use courier_proto::{decode, Envelope, Kind};

use crate::hub::Hub;
use crate::socket::Socket;

/// Hub-side seam for the WebRTC call subsystem. Kinds 16-24 and socket
/// departures are handed through it.
pub trait SignalingRouter: Send + Sync {
    fn handle_signaling(&self, socket: &Arc<Socket>, envelope: Envelope);

    fn handle_disconnect(&self, socket_id: &str);
}

pub struct Dispatcher {
    hub: Arc<Hub>,
    signaling: Arc<dyn SignalingRouter>,
}

impl Dispatcher {
    pub fn new(hub: Arc<Hub>, signaling: Arc<dyn SignalingRouter>) -> Self {
        Self { hub, signaling }
    }

    pub fn hub(&self) -> &Arc<Hub> {
        &self.hub
    }

    /// Route one inbound text frame.
    pub fn dispatch(&self, socket: &Arc<Socket>, payload: &[u8]) {
        let envelope = match decode(payload) {
            Ok(envelope) => envelope,
            Err(error) => {
                debug!(socket = socket.id(), %error, "dropping malformed frame");
                socket.send_error("malformed message");
                return;
            }
        };

        self.hub.trigger_handlers("message", socket);
        let kind = envelope.kind();
        if let Some(kind) = kind {
            self.hub.trigger_handlers(kind.name(), socket);
        }

        // A banned sender's frames are still seen (handlers above) but
        // produce no routing of any sort.
        if socket.is_banned() {
            return;
        }

        let Some(kind) = kind else {
            socket.send_message(&Envelope::ack(json!({ "status": "received" })));
            return;
        };

        match kind {
            Kind::Broadcast => {
                let mut relay = Envelope::new(Kind::Broadcast);
                relay.topic = envelope.topic;
                relay.data = envelope.data;
                self.hub.broadcast_message_except(&relay, Some(socket.id()));
            }

            // Deprecated alias of direct; without a recipient it is
            // dropped on the floor.
            Kind::Private => {
                if envelope.to.is_some() {
                    self.route_direct(socket, envelope);
                }
            }

            Kind::Subscribe => self.handle_subscribe(socket, envelope, true),
            Kind::Unsubscribe => self.handle_subscribe(socket, envelope, false),

            Kind::Ping => {
                socket.send_message(&Envelope::pong(chrono::Utc::now().timestamp()));
            }

            Kind::File => match payload::extract::<FileMeta>(&envelope, "file") {
                Ok(_) => socket.set_pending_file(envelope),
                Err(error) => {
                    debug!(socket = socket.id(), %error, "rejecting file metadata");
                    socket.send_error("file metadata requires filename and size");
                }
            },

            Kind::Typing => {
                let mut relay = Envelope::new(Kind::Typing).with_from(socket.display_name());
                relay.data = envelope.data;
                self.hub.broadcast_message_except(&relay, Some(socket.id()));
            }

            Kind::Direct => {
                if envelope.to.is_none() {
                    socket.send_error("direct message requires `to`");
                    return;
                }
                self.route_direct(socket, envelope);
            }

            Kind::Thread => {
                if envelope.to.is_some() {
                    self.route_direct(socket, envelope);
                } else {
                    let mut relay = Envelope::new(Kind::Thread).with_from(socket.display_name());
                    relay.data = envelope.data;
                    relay.thread_id = envelope.thread_id;
                    relay.reply_to = envelope.reply_to;
                    self.hub.broadcast_message_except(&relay, Some(socket.id()));
                }
            }

            Kind::UserList => {
                socket.send_message(&self.user_list_message());
            }

            Kind::SetAlias => match payload::extract::<AliasChange>(&envelope, "set_alias") {
                Ok(change) => {
                    socket.set_alias(&change.alias);
                    self.hub.broadcast_message(&Envelope::system(json!({
                        "type": "alias_change",
                        "userId": socket.id(),
                        "alias": change.alias,
                    })));
                    self.hub.broadcast_message(&self.user_list_message());
                }
                Err(_) => socket.send_error("set_alias requires an alias"),
            },

            signaling if signaling.is_signaling() => {
                self.signaling.handle_signaling(socket, envelope);
            }

            // Server-originated kinds and inbound no-ops.
            other => {
                trace!(socket = socket.id(), kind = other.name(), "ignoring inbound frame");
            }
        }
    }

    /// Pair an inbound binary frame with the armed file metadata and fan
    /// both out; an orphan frame has no side effects.
    pub fn dispatch_binary(&self, socket: &Arc<Socket>, payload: Vec<u8>) {
        if socket.is_banned() {
            return;
        }

        let Some(pending) = socket.take_pending_file() else {
            debug!(socket = socket.id(), "dropping orphan binary frame");
            return;
        };

        let meta: FileMeta = match payload::extract(&pending, "file") {
            Ok(meta) => meta,
            Err(error) => {
                debug!(socket = socket.id(), %error, "pending file metadata unusable");
                return;
            }
        };

        let announce_data = json!({
            "filename": meta.filename,
            "size": meta.size,
            "from": socket.display_name(),
        });

        if let Some(to) = pending.to {
            let announce = Envelope::new(Kind::File).with_data(announce_data);
            self.hub.emit(&to, announce);
            self.hub.emit_binary(&to, payload);
        } else {
            let mut announce = Envelope::new(Kind::File).with_data(announce_data);
            announce.topic = pending.topic;
            self.hub.broadcast_file(&announce, &payload, socket.id());
        }
    }

    /// Transport closed: let the call subsystem clean up its peer state.
    pub fn handle_disconnect(&self, socket: &Arc<Socket>) {
        self.signaling.handle_disconnect(socket.id());
    }

    fn handle_subscribe(&self, socket: &Arc<Socket>, envelope: Envelope, subscribe: bool) {
        let Some(topic) = envelope.topic.filter(|t| !t.is_empty()) else {
            socket.send_error(if subscribe {
                "subscribe requires a topic"
            } else {
                "unsubscribe requires a topic"
            });
            return;
        };

        let action = if subscribe {
            socket.connection().subscribe(&topic);
            "subscribed"
        } else {
            socket.connection().unsubscribe(&topic);
            "unsubscribed"
        };

        socket.send_message(&Envelope::ack(json!({ "action": action, "topic": topic })));

        self.hub.broadcast_message(&Envelope::system(json!({
            "type": "topic_list",
            "topics": self.hub.all_topics(),
        })));
    }

    /// Direct-style delivery: relay the payload to `to` with the sender's
    /// alias, spooling if the recipient is absent. Thread metadata rides
    /// along untouched.
    fn route_direct(&self, socket: &Arc<Socket>, envelope: Envelope) {
        let Some(to) = envelope.to else {
            return;
        };

        let relay = Envelope {
            t: envelope.t,
            topic: None,
            to: None,
            from: Some(socket.display_name()),
            data: envelope.data,
            id: envelope.id,
            code: None,
            thread_id: envelope.thread_id,
            reply_to: envelope.reply_to,
        };

        self.hub.emit(&to, relay);
    }

    fn user_list_message(&self) -> Envelope {
        let users = serde_json::to_value(self.hub.user_list()).unwrap_or_default();
        Envelope::new(Kind::UserList).with_data(json!({ "users": users }))
    }
}
