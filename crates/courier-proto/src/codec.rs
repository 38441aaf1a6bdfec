//! Frame codec.
//!
//! Three inbound encodings are accepted and normalized to [`Envelope`]:
//!
//! * object form: `{"t": 4, "topic": "news"}`
//! * positional array form: `[t, topic?, data?, id?, to?, code?]`
//! * legacy keyword form: `{"event": "subscribe", "topic": "news"}`
//!
//! Only the canonical object form is ever emitted.

use serde_json::Value;

use crate::envelope::Envelope;
use crate::error::ProtoError;
use crate::kind::Kind;

/// Decode one text frame into the canonical envelope.
pub fn decode(payload: &[u8]) -> Result<Envelope, ProtoError> {
    let value: Value = serde_json::from_slice(payload)?;

    match value {
        Value::Array(items) => decode_positional(items),
        Value::Object(map) => {
            if map.contains_key("t") {
                Ok(serde_json::from_value(Value::Object(map))?)
            } else if map.contains_key("event") {
                decode_legacy(Value::Object(map))
            } else {
                Err(ProtoError::Malformed(
                    "object frame has neither `t` nor `event`".into(),
                ))
            }
        }
        other => Err(ProtoError::Malformed(format!(
            "expected object or array frame, got {}",
            type_name(&other)
        ))),
    }
}

/// Encode an envelope in the canonical object form.
pub fn encode(envelope: &Envelope) -> Vec<u8> {
    // Envelope contains only JSON-representable types; serialization
    // cannot fail.
    serde_json::to_vec(envelope).unwrap_or_default()
}

/// `[t, topic?, data?, id?, to?, code?]`, later positions optional and
/// `null` holes permitted. Trailing extras are ignored.
fn decode_positional(items: Vec<Value>) -> Result<Envelope, ProtoError> {
    let mut items = items.into_iter();

    let tag = match items.next() {
        Some(Value::Number(n)) => n
            .as_u64()
            .filter(|t| *t <= u8::MAX as u64)
            .ok_or_else(|| ProtoError::Malformed("array tag is not a small integer".into()))?
            as u8,
        Some(other) => {
            return Err(ProtoError::Malformed(format!(
                "array tag must be an integer, got {}",
                type_name(&other)
            )))
        }
        None => return Err(ProtoError::Malformed("empty array frame".into())),
    };

    let mut envelope = Envelope {
        t: tag,
        topic: None,
        to: None,
        from: None,
        data: None,
        id: None,
        code: None,
        thread_id: None,
        reply_to: None,
    };

    envelope.topic = opt_string(items.next(), "topic")?;
    envelope.data = match items.next() {
        None | Some(Value::Null) => None,
        Some(v) => Some(v),
    };
    envelope.id = opt_string(items.next(), "id")?;
    envelope.to = opt_string(items.next(), "to")?;
    envelope.code = match items.next() {
        None | Some(Value::Null) => None,
        Some(Value::Number(n)) => n.as_i64(),
        Some(other) => {
            return Err(ProtoError::Malformed(format!(
                "array code must be an integer, got {}",
                type_name(&other)
            )))
        }
    };

    Ok(envelope)
}

/// `{"event": "...", "topic"?, "data"?, "id"?}` with the event name
/// mapped through the legacy table.
fn decode_legacy(value: Value) -> Result<Envelope, ProtoError> {
    #[derive(serde::Deserialize)]
    struct LegacyFrame {
        event: String,
        #[serde(default)]
        topic: Option<String>,
        #[serde(default)]
        data: Option<Value>,
        #[serde(default)]
        id: Option<String>,
        #[serde(default)]
        to: Option<String>,
    }

    let legacy: LegacyFrame = serde_json::from_value(value)?;
    let kind = Kind::from_event_name(&legacy.event);

    Ok(Envelope {
        t: kind as u8,
        topic: legacy.topic,
        to: legacy.to,
        from: None,
        data: legacy.data,
        id: legacy.id,
        code: None,
        thread_id: None,
        reply_to: None,
    })
}

fn opt_string(value: Option<Value>, position: &str) -> Result<Option<String>, ProtoError> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(other) => Err(ProtoError::Malformed(format!(
            "array {position} must be a string, got {}",
            type_name(&other)
        ))),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn canonical_round_trip() {
        let mut env = Envelope::new(Kind::Direct).with_data(json!({"m": "later"}));
        env.to = Some("X".into());
        env.id = Some("msg_1".into());

        let decoded = decode(&encode(&env)).unwrap();
        assert_eq!(decoded, env);
    }

    #[test]
    fn three_encodings_agree() {
        let object = decode(br#"{"t":4,"topic":"news","id":"c1"}"#).unwrap();
        let array = decode(br#"[4,"news",null,"c1"]"#).unwrap();
        let legacy = decode(br#"{"event":"subscribe","topic":"news","id":"c1"}"#).unwrap();

        assert_eq!(object, array);
        assert_eq!(object, legacy);
        assert_eq!(object.kind(), Some(Kind::Subscribe));
    }

    #[test]
    fn positional_with_all_slots() {
        let env = decode(br#"[12,null,{"m":"hi"},"id-1","peer-9",404]"#).unwrap();
        assert_eq!(env.kind(), Some(Kind::Direct));
        assert_eq!(env.topic, None);
        assert_eq!(env.data, Some(json!({"m": "hi"})));
        assert_eq!(env.id.as_deref(), Some("id-1"));
        assert_eq!(env.to.as_deref(), Some("peer-9"));
        assert_eq!(env.code, Some(404));
    }

    #[test]
    fn positional_ignores_trailing_extras() {
        let env = decode(br#"[6,null,null,null,null,null,"extra"]"#).unwrap();
        assert_eq!(env.kind(), Some(Kind::Ping));
    }

    #[test]
    fn legacy_unknown_event_becomes_system() {
        let env = decode(br#"{"event":"mystery","data":1}"#).unwrap();
        assert_eq!(env.kind(), Some(Kind::System));
    }

    #[test]
    fn unknown_tag_still_decodes() {
        let env = decode(br#"{"t":99}"#).unwrap();
        assert_eq!(env.t, 99);
        assert_eq!(env.kind(), None);
    }

    #[test]
    fn rejects_scalars_and_tagless_objects() {
        assert!(decode(b"42").is_err());
        assert!(decode(br#""hello""#).is_err());
        assert!(decode(br#"{"topic":"news"}"#).is_err());
        assert!(decode(br#"["4","news"]"#).is_err());
        assert!(decode(b"[]").is_err());
    }

    #[test]
    fn emission_has_no_null_keys() {
        let env = Envelope::new(Kind::Broadcast).with_data(json!({"m": "hi"}));
        let wire: Value = serde_json::from_slice(&encode(&env)).unwrap();
        let keys: Vec<&str> = wire.as_object().unwrap().keys().map(String::as_str).collect();
        assert_eq!(keys, ["data", "t"]);
    }
}
