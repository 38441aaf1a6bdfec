//! Typed payloads for the kinds the server interprets.
//!
//! The envelope's `data` field stays opaque for application kinds
//! (broadcast, direct, thread, typing); for everything the server acts
//! on, the payload is deserialized into one of these structs at the
//! dispatch site and a mismatch is rejected with an error reply instead
//! of coerced.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::envelope::Envelope;
use crate::error::ProtoError;

/// File transfer metadata (`t=10`), sent one frame ahead of the binary
/// payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileMeta {
    pub filename: String,
    pub size: u64,
}

/// `set_alias` payload (`t=15`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AliasChange {
    pub alias: String,
}

/// `auth` payload (`t=16`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthPayload {
    pub token: String,
}

/// `join` payload (`t=17`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinPayload {
    pub room: String,
    pub display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capabilities: Option<Map<String, Value>>,
}

/// `offer`/`answer` payload (`t=18`, `t=19`). The SDP body is relayed
/// verbatim, never parsed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SdpPayload {
    pub sdp: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_id: Option<String>,
}

/// `ice_candidate` payload (`t=20`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IcePayload {
    pub candidate: String,
    #[serde(default, rename = "sdpMid", skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(default, rename = "sdpMLineIndex", skip_serializing_if = "Option::is_none")]
    pub sdp_mline_index: Option<i64>,
}

/// `mute`/`unmute`/`hold` payload (`t=21`-`23`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub track: Option<String>,
}

impl ControlPayload {
    /// Track defaults to audio when the client leaves it out.
    pub fn track_or_default(&self) -> &str {
        self.track.as_deref().unwrap_or("audio")
    }
}

/// `dtmf` payload (`t=24`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DtmfPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_id: Option<String>,
    pub tones: String,
}

/// Deserialize an envelope's `data` into the typed payload for its kind.
pub fn extract<T>(envelope: &Envelope, kind_name: &'static str) -> Result<T, ProtoError>
where
    T: serde::de::DeserializeOwned,
{
    let data = envelope
        .data
        .clone()
        .ok_or(ProtoError::MissingField("data", kind_name))?;
    serde_json::from_value(data).map_err(|e| ProtoError::PayloadShape {
        kind: kind_name,
        reason: e.to_string(),
    })
}
