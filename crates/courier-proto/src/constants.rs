/// Topic name that routes as an ordinary broadcast (sender excluded)
/// instead of a subscription-filtered publish.
pub const RESERVED_TOPIC: &str = "general";

/// Capacity of each outbound queue lane (text and binary) per connection.
pub const WRITE_QUEUE_CAPACITY: usize = 256;

/// Default admission cap for the hub.
pub const DEFAULT_MAX_CONNECTIONS: usize = 100_000;

/// Default time-to-live for spooled offline messages, in hours.
pub const OFFLINE_MAX_AGE_HOURS: u64 = 24;

/// When a socket has no alias, its display name is this many leading
/// characters of the socket id.
pub const ALIAS_PREFIX_LEN: usize = 12;
