//! Protocol limits and timing constants.

use std::time::Duration;

/// The only protocol version this node speaks or accepts.
pub const PROTOCOL_VERSION: i32 = 1;

/// Outbound connection ceiling.
pub const MAX_OUTBOUND_PEERS: usize = 8;
/// Inbound connection ceiling; the 126th connection is closed before
/// handshake.
pub const MAX_INBOUND_PEERS: usize = 125;

/// Hard ceiling on a framed message payload.
pub const MAX_PROTOCOL_MESSAGE_LEN: usize = 10 * 1024 * 1024;
/// The smallest payload a `block` message can carry.
pub const MIN_BLOCK_PAYLOAD_LEN: usize = 80;

/// Messages per peer per second before the rate limiter bites.
pub const MAX_MESSAGES_PER_SECOND: u32 = 100;
/// The sliding rate-limit window.
pub const RATE_WINDOW: Duration = Duration::from_secs(1);

/// Each handshake phase (version exchange, verack exchange) gets this long.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);
/// The per-peer read deadline; doubles as the liveness timeout.
pub const READ_TIMEOUT: Duration = Duration::from_secs(60);
/// How often the ping timer fires.
pub const PING_INTERVAL: Duration = Duration::from_secs(60);
/// How often scores decay and bans expire.
pub const MAINTENANCE_INTERVAL: Duration = Duration::from_secs(600);

/// Peers at or below this score are disconnected and banned.
pub const BAN_SCORE: i32 = -50;
/// Scores at or below this earn the long ban tier.
pub const SEVERE_BAN_SCORE: i32 = -75;
/// The default ban duration.
pub const BAN_DURATION: Duration = Duration::from_secs(24 * 60 * 60);
/// The ban duration for severely negative scores.
pub const SEVERE_BAN_DURATION: Duration = Duration::from_secs(7 * 24 * 60 * 60);
/// Disconnected outbound peers below this score are not redialed.
pub const RECONNECT_SCORE_CUTOFF: i32 = -25;

/// Reconnect backoff parameters: `2^(attempt-1)` seconds plus up to 25%
/// jitter, capped, for at most this many attempts.
pub const MAX_RECONNECT_ATTEMPTS: u32 = 10;
pub const RECONNECT_BACKOFF_CAP: Duration = Duration::from_secs(300);

/// A peer may be at most this far ahead of us before its advertised height
/// is treated as a lie.
pub const MAX_HEIGHT_LEAD: u32 = 10_000;
/// The handshake user agent ceiling.
pub const MAX_USER_AGENT_BYTES: usize = 256;
/// Acceptable clock skew in a handshake timestamp.
pub const HANDSHAKE_TIME_DRIFT: Duration = Duration::from_secs(24 * 60 * 60);

/// Response size ceilings for locator-driven queries.
pub const MAX_HEADERS_RESPONSE: usize = 160;
pub const MAX_BLOCK_INV_RESPONSE: usize = 500;
/// The most addresses a single `addr` message will carry.
pub const MAX_ADDRS_RESPONSE: usize = 100;

/// Advisory known-inventory cache sizes.
pub const KNOWN_INVENTORY_CAP: usize = 50_000;
/// Out-of-order blocks waiting for their parents.
pub const MAX_QUEUED_BLOCKS: usize = 64;

/// Our advertised user agent.
pub const USER_AGENT: &str = "/umbra:1.0.0-alpha.1/";
