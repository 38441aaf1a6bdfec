//! The canonical message envelope.
//!
//! All inbound encodings normalize to this shape and it is the only shape
//! the server ever emits. Absent fields are omitted from the wire.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::kind::Kind;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Message kind tag. Kept as the raw integer so that frames with
    /// tags this build does not know survive decoding; [`Envelope::kind`]
    /// resolves it.
    pub t: u8,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,

    /// Server-populated sender identity on relayed messages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<i64>,

    #[serde(default, rename = "threadId", skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,

    #[serde(default, rename = "replyTo", skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
}

impl Envelope {
    pub fn new(kind: Kind) -> Self {
        Self {
            t: kind as u8,
            topic: None,
            to: None,
            from: None,
            data: None,
            id: None,
            code: None,
            thread_id: None,
            reply_to: None,
        }
    }

    /// Resolve the tag, if it is one this build knows.
    pub fn kind(&self) -> Option<Kind> {
        Kind::try_from(self.t).ok()
    }

    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = Some(topic.into());
        self
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn with_from(mut self, from: impl Into<String>) -> Self {
        self.from = Some(from.into());
        self
    }

    /// An ack reply carrying an arbitrary payload.
    pub fn ack(data: Value) -> Self {
        Envelope::new(Kind::Ack).with_data(data)
    }

    /// An error reply for protocol shape failures.
    pub fn error(message: impl Into<String>) -> Self {
        Envelope::new(Kind::Error).with_data(json!({ "message": message.into() }))
    }

    /// A server-originated system message.
    pub fn system(data: Value) -> Self {
        Envelope::new(Kind::System).with_data(data)
    }

    /// The reply to a protocol-level ping.
    pub fn pong(timestamp: i64) -> Self {
        Envelope::new(Kind::Pong).with_data(json!({ "timestamp": timestamp }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_fields_are_omitted() {
        let env = Envelope::new(Kind::Ping);
        let wire = serde_json::to_string(&env).unwrap();
        assert_eq!(wire, r#"{"t":6}"#);
    }

    #[test]
    fn thread_fields_use_wire_names() {
        let mut env = Envelope::new(Kind::Thread).with_data(json!({"m": "x"}));
        env.thread_id = Some("th-1".into());
        env.reply_to = Some("msg-9".into());
        let wire = serde_json::to_value(&env).unwrap();
        assert_eq!(wire["threadId"], "th-1");
        assert_eq!(wire["replyTo"], "msg-9");
        assert!(wire.get("thread_id").is_none());
    }

    #[test]
    fn error_reply_shape() {
        let env = Envelope::error("bad payload");
        assert_eq!(env.t, Kind::Error as u8);
        assert_eq!(env.data.unwrap()["message"], "bad payload");
    }
}
