/// Online set derived from connection counts
use std::collections::HashMap;

/// Effect of a connection change on a user's presence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenceTransition {
    CameOnline,
    WentOffline,
    Unchanged,
}

/// Per-user open connection counts
///
/// A user is online iff their count is positive.
#[derive(Debug, Default)]
pub struct PresenceSet {
    counts: HashMap<String, usize>,
}

impl PresenceSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connection_opened(&mut self, user_id: &str) -> PresenceTransition {
        let count = self.counts.entry(user_id.to_string()).or_insert(0);
        *count += 1;
        if *count == 1 {
            PresenceTransition::CameOnline
        } else {
            PresenceTransition::Unchanged
        }
    }

    pub fn connection_closed(&mut self, user_id: &str) -> PresenceTransition {
        match self.counts.get_mut(user_id) {
            Some(count) if *count > 1 => {
                *count -= 1;
                PresenceTransition::Unchanged
            }
            Some(_) => {
                self.counts.remove(user_id);
                PresenceTransition::WentOffline
            }
            None => PresenceTransition::Unchanged,
        }
    }

    pub fn is_online(&self, user_id: &str) -> bool {
        self.counts.contains_key(user_id)
    }

    /// Online user ids, sorted
    pub fn snapshot(&self) -> Vec<String> {
        let mut users: Vec<String> = self.counts.keys().cloned().collect();
        users.sort();
        users
    }

    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }
}
