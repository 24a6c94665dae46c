use std::time::Duration;

pub const LOCAL_WS_URL: &str = "ws://localhost:3000/ws";

/// Automatic retries after the first failed connection attempt
pub const RECONNECT_ATTEMPTS: u32 = 5;
pub const RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// How long a remote-applied transition may still show up as a player callback
pub const SUPPRESSION_WINDOW: Duration = Duration::from_millis(500);
/// Max drift, in seconds, between a remote-applied position and its callback
pub const ECHO_TOLERANCE_SECS: f64 = 1.0;

pub const SAMPLE_INTERVAL: Duration = Duration::from_secs(1);
/// Period of the party host's state broadcast while it plays
pub const HOST_SYNC_INTERVAL: Duration = Duration::from_secs(5);
pub const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(12);

/// Current application version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
