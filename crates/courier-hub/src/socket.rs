//! Logical endpoint over one connection.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use serde_json::Value;

use courier_proto::constants::ALIAS_PREFIX_LEN;
use courier_proto::{encode, Envelope};

use crate::connection::Connection;

/// A logical endpoint: stable id, display alias, opaque property bag,
/// banned flag and the single-slot pending-file descriptor.
///
/// A banned socket neither originates nor receives application messages;
/// every outbound enqueue is a no-op while the flag is set.
#[derive(Debug)]
pub struct Socket {
    id: String,
    connection: Arc<Connection>,
    state: RwLock<SocketState>,
}

#[derive(Default, Debug)]
struct SocketState {
    alias: String,
    banned: bool,
    properties: HashMap<String, Value>,
    pending_file: Option<Envelope>,
}

impl Socket {
    pub fn new(id: String, connection: Arc<Connection>) -> Self {
        Self {
            id,
            connection,
            state: RwLock::new(SocketState::default()),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn connection(&self) -> &Arc<Connection> {
        &self.connection
    }

    /// The alias, or the leading characters of the id when none is set.
    pub fn display_name(&self) -> String {
        let state = self.state.read().expect("socket lock poisoned");
        if state.alias.is_empty() {
            self.id.chars().take(ALIAS_PREFIX_LEN).collect()
        } else {
            state.alias.clone()
        }
    }

    pub fn set_alias(&self, alias: impl Into<String>) {
        self.state.write().expect("socket lock poisoned").alias = alias.into();
    }

    pub fn is_banned(&self) -> bool {
        self.state.read().expect("socket lock poisoned").banned
    }

    pub fn ban(&self) {
        self.state.write().expect("socket lock poisoned").banned = true;
    }

    pub fn unban(&self) {
        self.state.write().expect("socket lock poisoned").banned = false;
    }

    pub fn property(&self, key: &str) -> Option<Value> {
        self.state
            .read()
            .expect("socket lock poisoned")
            .properties
            .get(key)
            .cloned()
    }

    pub fn set_property(&self, key: impl Into<String>, value: Value) {
        self.state
            .write()
            .expect("socket lock poisoned")
            .properties
            .insert(key.into(), value);
    }

    pub fn has_property_value(&self, key: &str, value: &Value) -> bool {
        self.state
            .read()
            .expect("socket lock poisoned")
            .properties
            .get(key)
            .is_some_and(|v| v == value)
    }

    /// Park file metadata until the paired binary frame arrives. A newer
    /// metadata frame overwrites the slot, abandoning the old transfer.
    pub fn set_pending_file(&self, envelope: Envelope) {
        self.state
            .write()
            .expect("socket lock poisoned")
            .pending_file = Some(envelope);
    }

    pub fn take_pending_file(&self) -> Option<Envelope> {
        self.state
            .write()
            .expect("socket lock poisoned")
            .pending_file
            .take()
    }

    /// Encode and enqueue a message; no-op while banned.
    pub fn send_message(&self, envelope: &Envelope) {
        if self.is_banned() {
            return;
        }
        self.connection.write_text(encode(envelope));
    }

    /// Enqueue a binary payload; no-op while banned.
    pub fn send_binary(&self, payload: Vec<u8>) {
        if self.is_banned() {
            return;
        }
        self.connection.write_binary(payload);
    }

    /// Reply with a protocol error, keeping the connection open.
    pub fn send_error(&self, message: impl Into<String>) {
        self.send_message(&Envelope::error(message));
    }

    /// Ask the transport to go away.
    pub fn close(&self) {
        self.connection.shutdown();
    }
}
