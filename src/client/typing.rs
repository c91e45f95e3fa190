/// Receiver-side typing indicator state
///
/// A (room, username) pair stays active until a matching `stop-typing`
/// arrives or [`TYPING_TIMEOUT`] passes without a new `typing` signal.
use crate::realtime::{RoomId, ServerEvent, TypingSignal};
use std::{
    collections::HashMap,
    time::{Duration, Instant},
};

/// How long a typing signal stays active without a refresh
pub const TYPING_TIMEOUT: Duration = Duration::from_secs(2);

/// Tracks who is typing where
#[derive(Debug)]
pub struct TypingIndicators {
    timeout: Duration,
    active: HashMap<(RoomId, String), Instant>,
}

impl Default for TypingIndicators {
    fn default() -> Self {
        Self::new(TYPING_TIMEOUT)
    }
}

impl TypingIndicators {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            active: HashMap::new(),
        }
    }

    fn key(signal: &TypingSignal) -> (RoomId, String) {
        let room = if signal.is_group {
            RoomId::group(&signal.target_id)
        } else {
            RoomId::user(&signal.target_id)
        };
        (room, signal.username.clone())
    }

    /// Apply a realtime event; returns true if it was a typing signal
    pub fn apply(&mut self, event: &ServerEvent, now: Instant) -> bool {
        match event {
            ServerEvent::Typing(signal) => {
                self.active.insert(Self::key(signal), now);
                true
            }
            ServerEvent::StopTyping(signal) => {
                self.active.remove(&Self::key(signal));
                true
            }
            _ => false,
        }
    }

    /// Usernames currently typing in `room`, sorted
    pub fn typing_in(&self, room: &RoomId, now: Instant) -> Vec<String> {
        let mut users: Vec<String> = self
            .active
            .iter()
            .filter(|((r, _), since)| r == room && now.duration_since(**since) < self.timeout)
            .map(|((_, user), _)| user.clone())
            .collect();
        users.sort();
        users
    }

    pub fn is_typing(&self, room: &RoomId, username: &str, now: Instant) -> bool {
        self.active
            .get(&(room.clone(), username.to_string()))
            .map(|since| now.duration_since(*since) < self.timeout)
            .unwrap_or(false)
    }

    /// Drop expired entries
    pub fn prune(&mut self, now: Instant) {
        let timeout = self.timeout;
        self.active
            .retain(|_, since| now.duration_since(*since) < timeout);
    }

    pub fn len(&self) -> usize {
        self.active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }
}
