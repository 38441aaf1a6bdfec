//! Message kind tags.
//!
//! Every frame carries an integer tag `t` identifying its variant. Tags
//! 1-15 are the messaging protocol, 16-24 are client-originated WebRTC
//! signaling, 25-30 are server-originated call events.

use crate::error::ProtoError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Kind {
    Broadcast = 1,
    Private = 2,
    System = 3,
    Subscribe = 4,
    Unsubscribe = 5,
    Ping = 6,
    Pong = 7,
    Error = 8,
    Ack = 9,
    File = 10,
    Typing = 11,
    Direct = 12,
    Thread = 13,
    UserList = 14,
    SetAlias = 15,
    Auth = 16,
    Join = 17,
    Offer = 18,
    Answer = 19,
    IceCandidate = 20,
    Mute = 21,
    Unmute = 22,
    Hold = 23,
    Dtmf = 24,
    Joined = 25,
    PeerJoined = 26,
    PeerLeft = 27,
    CallStateChanged = 28,
    RecordingStarted = 29,
    RecordingFinished = 30,
}

impl Kind {
    /// The canonical event name for this tag.
    pub fn name(self) -> &'static str {
        match self {
            Kind::Broadcast => "broadcast",
            Kind::Private => "private",
            Kind::System => "system",
            Kind::Subscribe => "subscribe",
            Kind::Unsubscribe => "unsubscribe",
            Kind::Ping => "ping",
            Kind::Pong => "pong",
            Kind::Error => "error",
            Kind::Ack => "ack",
            Kind::File => "file",
            Kind::Typing => "typing",
            Kind::Direct => "direct",
            Kind::Thread => "thread",
            Kind::UserList => "user_list",
            Kind::SetAlias => "set_alias",
            Kind::Auth => "auth",
            Kind::Join => "join",
            Kind::Offer => "offer",
            Kind::Answer => "answer",
            Kind::IceCandidate => "ice-candidate",
            Kind::Mute => "mute",
            Kind::Unmute => "unmute",
            Kind::Hold => "hold",
            Kind::Dtmf => "dtmf",
            Kind::Joined => "joined",
            Kind::PeerJoined => "peer-joined",
            Kind::PeerLeft => "peer-left",
            Kind::CallStateChanged => "call-state-changed",
            Kind::RecordingStarted => "recording-started",
            Kind::RecordingFinished => "recording-finished",
        }
    }

    /// Map a legacy event name to a tag.
    ///
    /// `subscribed`/`unsubscribed` are historical ack spellings. Unknown
    /// names fall back to `System`, matching the legacy protocol.
    pub fn from_event_name(event: &str) -> Kind {
        match event {
            "broadcast" => Kind::Broadcast,
            "private" => Kind::Private,
            "system" => Kind::System,
            "subscribe" => Kind::Subscribe,
            "unsubscribe" => Kind::Unsubscribe,
            "ping" => Kind::Ping,
            "pong" => Kind::Pong,
            "error" => Kind::Error,
            "ack" | "subscribed" | "unsubscribed" => Kind::Ack,
            "file" => Kind::File,
            "typing" => Kind::Typing,
            "direct" => Kind::Direct,
            "thread" => Kind::Thread,
            "user_list" => Kind::UserList,
            "set_alias" => Kind::SetAlias,
            "auth" => Kind::Auth,
            "join" => Kind::Join,
            "offer" => Kind::Offer,
            "answer" => Kind::Answer,
            "ice-candidate" => Kind::IceCandidate,
            "mute" => Kind::Mute,
            "unmute" => Kind::Unmute,
            "hold" => Kind::Hold,
            "dtmf" => Kind::Dtmf,
            "joined" => Kind::Joined,
            "peer-joined" => Kind::PeerJoined,
            "peer-left" => Kind::PeerLeft,
            "call-state-changed" => Kind::CallStateChanged,
            "recording-started" => Kind::RecordingStarted,
            "recording-finished" => Kind::RecordingFinished,
            _ => Kind::System,
        }
    }

    /// True for tags the server only ever emits; inbound copies are ignored.
    pub fn server_originated(self) -> bool {
        matches!(
            self,
            Kind::System
                | Kind::Joined
                | Kind::PeerJoined
                | Kind::PeerLeft
                | Kind::CallStateChanged
                | Kind::RecordingStarted
                | Kind::RecordingFinished
        )
    }

    /// True for tags delegated to the call signaling subsystem.
    pub fn is_signaling(self) -> bool {
        (Kind::Auth as u8..=Kind::Dtmf as u8).contains(&(self as u8))
    }
}

impl TryFrom<u8> for Kind {
    type Error = ProtoError;

    fn try_from(tag: u8) -> Result<Self, ProtoError> {
        let kind = match tag {
            1 => Kind::Broadcast,
            2 => Kind::Private,
            3 => Kind::System,
            4 => Kind::Subscribe,
            5 => Kind::Unsubscribe,
            6 => Kind::Ping,
            7 => Kind::Pong,
            8 => Kind::Error,
            9 => Kind::Ack,
            10 => Kind::File,
            11 => Kind::Typing,
            12 => Kind::Direct,
            13 => Kind::Thread,
            14 => Kind::UserList,
            15 => Kind::SetAlias,
            16 => Kind::Auth,
            17 => Kind::Join,
            18 => Kind::Offer,
            19 => Kind::Answer,
            20 => Kind::IceCandidate,
            21 => Kind::Mute,
            22 => Kind::Unmute,
            23 => Kind::Hold,
            24 => Kind::Dtmf,
            25 => Kind::Joined,
            26 => Kind::PeerJoined,
            27 => Kind::PeerLeft,
            28 => Kind::CallStateChanged,
            29 => Kind::RecordingStarted,
            30 => Kind::RecordingFinished,
            other => return Err(ProtoError::UnknownTag(other)),
        };
        Ok(kind)
    }
}
