//! Per-peer state: score, rate limiting, ban status, relay preferences.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use crate::constants::{
    BAN_DURATION, BAN_SCORE, MAX_MESSAGES_PER_SECOND, RATE_WINDOW, SEVERE_BAN_DURATION,
    SEVERE_BAN_SCORE,
};
use crate::protocol::message::Version;

/// Observed peer behaviour and its score adjustment.
///
/// Scores are clamped to `[-100, 100]`; a peer at or below [`BAN_SCORE`]
/// is disconnected and banned.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Behaviour {
    ValidBlock,
    ValidTx,
    InvalidBlock,
    InvalidTx,
    Timeout,
    Misbehavior,
    ProtocolViolation,
    Duplicate,
    StaleBlock,
}

impl Behaviour {
    pub fn score(self) -> i32 {
        use Behaviour::*;
        match self {
            ValidBlock => 5,
            ValidTx => 1,
            InvalidBlock => -25,
            InvalidTx => -10,
            Timeout => -5,
            Misbehavior => -20,
            ProtocolViolation => -50,
            Duplicate => -2,
            StaleBlock => -3,
        }
    }
}

/// The ban tier a score earns.
pub fn ban_duration_for_score(score: i32) -> Duration {
    if score <= SEVERE_BAN_SCORE {
        SEVERE_BAN_DURATION
    } else {
        BAN_DURATION
    }
}

/// One connected peer.
#[derive(Debug)]
pub struct Peer {
    pub addr: SocketAddr,
    pub inbound: bool,
    score: i32,
    messages_in_window: u32,
    window_start: Instant,
    pub banned_until: Option<Instant>,
    /// Satoshis per kilobyte below which this peer does not want tx
    /// announcements.
    pub fee_filter: i64,
    /// The version message the peer presented during the handshake.
    pub version: Option<Version>,
    pub last_seen: Instant,
    /// Set by `sendheaders`: announce blocks with headers instead of invs.
    pub prefers_headers: bool,
    /// Set by `sendcmpct` version 1.
    pub wants_compact_blocks: bool,
}

impl Peer {
    pub fn new(addr: SocketAddr, inbound: bool) -> Peer {
        Peer {
            addr,
            inbound,
            score: 0,
            messages_in_window: 0,
            window_start: Instant::now(),
            banned_until: None,
            fee_filter: 0,
            version: None,
            last_seen: Instant::now(),
            prefers_headers: false,
            wants_compact_blocks: false,
        }
    }

    pub fn score(&self) -> i32 {
        self.score
    }

    /// Apply a behaviour adjustment and return the new score.
    pub fn adjust(&mut self, behaviour: Behaviour) -> i32 {
        self.score = (self.score + behaviour.score()).clamp(-100, 100);
        self.score
    }

    /// Whether the score has crossed the ban threshold.
    pub fn should_ban(&self) -> bool {
        self.score <= BAN_SCORE
    }

    /// Count one inbound message against the sliding rate window. Returns
    /// `false` when the peer exceeded the limit (the caller scores it).
    pub fn record_message(&mut self) -> bool {
        let now = Instant::now();
        if now.duration_since(self.window_start) >= RATE_WINDOW {
            self.window_start = now;
            self.messages_in_window = 0;
        }
        self.messages_in_window += 1;
        self.last_seen = now;
        self.messages_in_window <= MAX_MESSAGES_PER_SECOND
    }

    /// Periodic decay toward zero: good peers lose a point, bad peers gain
    /// one, very bad peers two.
    pub fn decay_score(&mut self) {
        if self.score > 0 {
            self.score -= 1;
        } else if self.score < SEVERE_BAN_SCORE {
            self.score += 2;
        } else if self.score < 0 {
            self.score += 1;
        }
    }
}
