pub mod broker;
pub mod cache;
pub mod config;
pub mod envelope;
pub mod fanout;
pub mod http;

// CLIENT SIDE
pub mod demo;
pub mod link;
pub mod state;

use std::time::Duration;

/// period between reconnect attempts, on the broker link and the client link
pub const RECONNECT_PERIOD: Duration = Duration::from_secs(5);

/// bound on a single broker connect attempt, seconds
pub const CONNECT_TIMEOUT_SECS: u64 = 30;

/// period of the full-cache rebroadcast to all connected clients
pub const REBROADCAST_PERIOD: Duration = Duration::from_secs(60);

/// path clients connect to when no explicit socket URL is configured
pub const WS_PATH: &str = "/ws";

/// capacity of the fan-out broadcast channel, in serialized frames
pub const BROADCAST_CAPACITY: usize = 256;

/// entries kept in the link manager's rolling event log
pub const LINK_LOG_CAP: usize = 32;

/// Current wall-clock time as epoch milliseconds.
pub fn epoch_ms() -> u64 {
    chrono::Utc::now().timestamp_millis() as u64
}
