use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::debug;

use easel_core::types::{MessageRef, UserId};

/// Upper bound on tracked per-user entries before idle ones are evicted.
const MAX_SESSIONS: usize = 512;

/// Holding this marks the user's generation gate as busy.
///
/// The gate releases when the permit drops, so every exit path of a
/// generation attempt releases exactly once.
pub struct GatePermit {
    _permit: OwnedSemaphorePermit,
}

struct SessionEntry {
    gate: Arc<Semaphore>,
    menu_message: Option<MessageRef>,
    last_touch: Instant,
}

impl SessionEntry {
    fn new() -> Self {
        Self {
            gate: Arc::new(Semaphore::new(1)),
            menu_message: None,
            last_touch: Instant::now(),
        }
    }
}

/// In-memory per-user session state: the single-permit generation gate and
/// the dedicated model-menu message slot.
///
/// Entries are created lazily on first touch. The table is bounded: at
/// capacity the least-recently-touched idle entry is evicted. An entry
/// holding its gate or an open menu is never evicted, so the table can
/// transiently exceed the cap when everyone is busy.
pub struct SessionTable {
    entries: Mutex<HashMap<UserId, SessionEntry>>,
    capacity: usize,
}

impl SessionTable {
    pub fn new() -> Self {
        Self::with_capacity(MAX_SESSIONS)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            capacity,
        }
    }

    /// Try to take the user's generation gate without waiting.
    ///
    /// `None` means a generation is already running for this user. The
    /// returned permit frees the gate on drop.
    pub fn try_acquire(&self, user: UserId) -> Option<GatePermit> {
        let gate = self.touch(user, |entry| Arc::clone(&entry.gate));
        gate.try_acquire_owned()
            .ok()
            .map(|permit| GatePermit { _permit: permit })
    }

    /// Non-mutating probe: is a generation currently running for this user?
    /// A user with no entry is idle.
    pub fn is_locked(&self, user: UserId) -> bool {
        let entries = self.entries.lock().unwrap();
        entries
            .get(&user)
            .map(|entry| entry.gate.available_permits() == 0)
            .unwrap_or(false)
    }

    /// Replace the model-menu slot, returning the previous occupant.
    pub fn swap_menu_message(&self, user: UserId, message: Option<MessageRef>) -> Option<MessageRef> {
        self.touch(user, |entry| {
            std::mem::replace(&mut entry.menu_message, message)
        })
    }

    /// Run `f` on the user's entry, creating it if absent and bumping its
    /// LRU clock. Evicts before inserting when the table is full.
    fn touch<T>(&self, user: UserId, f: impl FnOnce(&mut SessionEntry) -> T) -> T {
        let mut entries = self.entries.lock().unwrap();
        if !entries.contains_key(&user) && entries.len() >= self.capacity {
            evict_idle(&mut entries);
        }
        let entry = entries.entry(user).or_insert_with(SessionEntry::new);
        entry.last_touch = Instant::now();
        f(entry)
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }
}

impl Default for SessionTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Drop the least-recently-touched entry that holds neither its gate nor a
/// menu message.
fn evict_idle(entries: &mut HashMap<UserId, SessionEntry>) {
    let victim = entries
        .iter()
        .filter(|(_, e)| e.gate.available_permits() > 0 && e.menu_message.is_none())
        .min_by_key(|(_, e)| e.last_touch)
        .map(|(user, _)| *user);
    if let Some(user) = victim {
        debug!(user = user.0, "evicting idle session entry");
        entries.remove(&user);
    }
}
