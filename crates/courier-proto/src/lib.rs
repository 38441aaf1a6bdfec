// Wire protocol shared by the hub, the call subsystem and the server.

pub mod codec;
pub mod constants;
pub mod envelope;
pub mod kind;
pub mod payload;

mod error;

pub use codec::{decode, encode};
pub use envelope::Envelope;
pub use error::ProtoError;
pub use kind::Kind;
