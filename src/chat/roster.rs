//! Capacity-bounded set of chat members
//!
//! Each member is reachable through a bounded outbound channel drained by its
//! own writer, so a broadcast only enqueues under the lock and never touches a
//! socket. A member that stops reading loses chunks once its outbox is full.

use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::SocketAddr;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::mpsc::{channel, Receiver, Sender};

use crate::error::ChatError;
use crate::server::ConnId;

/// Outbound side of one member
#[derive(Debug)]
struct Member {
    peer: SocketAddr,
    outbox: Sender<Bytes>,
}

/// Result of relaying one chunk
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Members the chunk was queued for
    pub delivered: usize,
    /// Members whose outbox was full or whose writer has gone away
    pub failed: usize,
}

#[derive(Debug)]
pub struct ChatRoster {
    capacity: usize,
    outbox_depth: usize,
    members: Mutex<HashMap<ConnId, Member>>,
}

impl ChatRoster {
    /// Roster of at most `capacity` members, each buffering up to
    /// `outbox_depth` chunks
    pub fn new(capacity: usize, outbox_depth: usize) -> Self {
        Self {
            capacity,
            outbox_depth: outbox_depth.max(1),
            members: Mutex::new(HashMap::with_capacity(capacity)),
        }
    }

    /// Channel sized for one member's outbox
    pub fn outbox(&self) -> (Sender<Bytes>, Receiver<Bytes>) {
        channel(self.outbox_depth)
    }

    /// Admit a member. Returns the new roster size.
    pub fn join(
        &self,
        id: ConnId,
        peer: SocketAddr,
        outbox: Sender<Bytes>,
    ) -> Result<usize, ChatError> {
        let mut members = self.members.lock();
        if members.contains_key(&id) {
            return Err(ChatError::AlreadyMember(id));
        }
        if members.len() >= self.capacity {
            return Err(ChatError::RosterFull {
                capacity: self.capacity,
            });
        }
        members.insert(id, Member { peer, outbox });
        Ok(members.len())
    }

    /// Remove a member, dropping its outbound channel. Returns the new size,
    /// or `None` if it was not a member.
    pub fn leave(&self, id: ConnId) -> Option<usize> {
        let mut members = self.members.lock();
        members.remove(&id).map(|_| members.len())
    }

    /// Queue `chunk` for every member except `from`.
    ///
    /// Never waits: a member whose outbox is full or closed is counted as
    /// failed and stays in the roster. Only its own handler removes it.
    pub fn broadcast(&self, from: ConnId, chunk: &Bytes) -> BroadcastReport {
        let members = self.members.lock();
        let mut report = BroadcastReport::default();
        for (id, member) in members.iter() {
            if *id == from {
                continue;
            }
            match member.outbox.try_send(chunk.clone()) {
                Ok(()) => report.delivered += 1,
                Err(TrySendError::Full(_)) => {
                    tracing::warn!("Chat relay to {} failed: outbox full", member.peer);
                    report.failed += 1;
                }
                Err(TrySendError::Closed(_)) => {
                    tracing::warn!("Chat relay to {} failed: writer closed", member.peer);
                    report.failed += 1;
                }
            }
        }
        report
    }

    pub fn contains(&self, id: ConnId) -> bool {
        self.members.lock().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.members.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn outbox_depth(&self) -> usize {
        self.outbox_depth
    }
}
