/// Realtime delivery: connection registry, presence and room fan-out
///
/// Every live socket is registered with the [`ConnectionRegistry`], which
/// owns room membership and the online set under a single lock. The
/// [`RoomBroadcaster`] publishes events to rooms on top of it.

pub mod broadcaster;
pub mod events;
pub mod presence;
pub mod registry;

pub use broadcaster::RoomBroadcaster;
pub use events::{ClientEvent, ServerEvent, TypingSignal};
pub use presence::{PresenceSet, PresenceTransition};
pub use registry::ConnectionRegistry;

use std::fmt;

/// Identifier of one live connection, unique for the process lifetime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Named fan-out target
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RoomId {
    /// Private room of one user; every connection of that user joins it
    User(String),
    /// Room of one group; connections join explicitly
    Group(String),
}

impl RoomId {
    pub fn user(id: impl Into<String>) -> Self {
        RoomId::User(id.into())
    }

    pub fn group(id: impl Into<String>) -> Self {
        RoomId::Group(id.into())
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoomId::User(id) => write!(f, "user:{}", id),
            RoomId::Group(id) => write!(f, "group:{}", id),
        }
    }
}
