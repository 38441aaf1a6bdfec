// WebRTC call signaling: authenticated room membership and transparent
// relay of SDP/ICE/control messages between room peers.

pub mod manager;
pub mod token;

pub use manager::{CallManager, ParticipantInfo, RoomState};
pub use token::{StaticTokenValidator, TokenError, TokenValidator};
