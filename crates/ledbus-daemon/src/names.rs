//! Well-known name ownership.
//!
//! Each name has one primary owner and a FIFO queue of waiting connections.
//! An owner that set `ALLOW_REPLACEMENT` loses the name to a requester with
//! `REPLACE_EXISTING`; unless it asked for `DO_NOT_QUEUE` it goes to the head
//! of the queue and gets the name back when the new owner releases it.

use std::collections::{HashMap, VecDeque};

use ledbus::{NameFlags, ReleaseNameReply, RequestNameReply};

use crate::state::ConnectionId;

#[derive(Debug, Clone)]
struct Claim {
    conn: ConnectionId,
    flags: NameFlags,
}

#[derive(Debug)]
struct NameEntry {
    owner: Claim,
    queue: VecDeque<Claim>,
}

/// A change of primary owner, to broadcast as `name_owner_changed`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnerChange {
    pub name: String,
    pub previous: Option<ConnectionId>,
    pub new: Option<ConnectionId>,
}

#[derive(Debug, Default)]
pub struct NameTable {
    entries: HashMap<String, NameEntry>,
}

impl NameTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn owner(&self, name: &str) -> Option<&ConnectionId> {
        self.entries.get(name).map(|e| &e.owner.conn)
    }

    #[must_use]
    pub fn queued(&self, name: &str) -> Vec<ConnectionId> {
        self.entries
            .get(name)
            .map(|e| e.queue.iter().map(|c| c.conn.clone()).collect())
            .unwrap_or_default()
    }

    pub fn request(
        &mut self,
        name: &str,
        conn: &ConnectionId,
        flags: NameFlags,
    ) -> (RequestNameReply, Option<OwnerChange>) {
        let claim = Claim {
            conn: conn.clone(),
            flags,
        };

        let Some(entry) = self.entries.get_mut(name) else {
            self.entries.insert(
                name.to_string(),
                NameEntry {
                    owner: claim,
                    queue: VecDeque::new(),
                },
            );
            return (
                RequestNameReply::PrimaryOwner,
                Some(OwnerChange {
                    name: name.to_string(),
                    previous: None,
                    new: Some(conn.clone()),
                }),
            );
        };

        if entry.owner.conn == *conn {
            entry.owner.flags = flags;
            return (RequestNameReply::AlreadyOwner, None);
        }

        if entry.owner.flags.contains(NameFlags::ALLOW_REPLACEMENT)
            && flags.contains(NameFlags::REPLACE_EXISTING)
        {
            entry.queue.retain(|c| c.conn != *conn);
            let displaced = std::mem::replace(&mut entry.owner, claim);
            let previous = displaced.conn.clone();
            if !displaced.flags.contains(NameFlags::DO_NOT_QUEUE) {
                entry.queue.push_front(displaced);
            }
            return (
                RequestNameReply::PrimaryOwner,
                Some(OwnerChange {
                    name: name.to_string(),
                    previous: Some(previous),
                    new: Some(conn.clone()),
                }),
            );
        }

        if flags.contains(NameFlags::DO_NOT_QUEUE) {
            entry.queue.retain(|c| c.conn != *conn);
            return (RequestNameReply::Exists, None);
        }

        match entry.queue.iter_mut().find(|c| c.conn == *conn) {
            Some(queued) => queued.flags = flags,
            None => entry.queue.push_back(claim),
        }
        (RequestNameReply::InQueue, None)
    }

    pub fn release(
        &mut self,
        name: &str,
        conn: &ConnectionId,
    ) -> (ReleaseNameReply, Option<OwnerChange>) {
        let Some(entry) = self.entries.get_mut(name) else {
            return (ReleaseNameReply::NonExistent, None);
        };

        if entry.owner.conn == *conn {
            return (ReleaseNameReply::Released, Some(self.promote(name, conn)));
        }

        let before = entry.queue.len();
        entry.queue.retain(|c| c.conn != *conn);
        if entry.queue.len() == before {
            (ReleaseNameReply::NotOwner, None)
        } else {
            (ReleaseNameReply::Released, None)
        }
    }

    /// Drop every claim held by `conn`.
    pub fn remove_connection(&mut self, conn: &ConnectionId) -> Vec<OwnerChange> {
        let owned: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, e)| e.owner.conn == *conn)
            .map(|(name, _)| name.clone())
            .collect();

        for entry in self.entries.values_mut() {
            entry.queue.retain(|c| c.conn != *conn);
        }

        owned
            .into_iter()
            .map(|name| self.promote(&name, conn))
            .collect()
    }

    // Caller guarantees `previous` owns `name`.
    fn promote(&mut self, name: &str, previous: &ConnectionId) -> OwnerChange {
        let next = self
            .entries
            .get_mut(name)
            .and_then(|entry| entry.queue.pop_front());
        let new = match next {
            Some(claim) => {
                let conn = claim.conn.clone();
                if let Some(entry) = self.entries.get_mut(name) {
                    entry.owner = claim;
                }
                Some(conn)
            }
            None => {
                self.entries.remove(name);
                None
            }
        };
        OwnerChange {
            name: name.to_string(),
            previous: Some(previous.clone()),
            new,
        }
    }
}
