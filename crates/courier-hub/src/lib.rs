// Connection hub: per-connection write pipeline, socket registry,
// fan-out engine, offline spool and the protocol dispatcher.

pub mod connection;
pub mod dispatch;
pub mod hub;
pub mod offline;
pub mod socket;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use connection::{Connection, FrameSink};
pub use dispatch::{Dispatcher, SignalingRouter};
pub use hub::{Hub, HubError};
pub use offline::{MemoryOfflineStore, OfflineError, OfflineStore, StoredMessage};
pub use socket::Socket;
