//! Matchmaking queue implementation

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crate::connection::ConnectionId;

/// Connection waiting for an opponent
#[derive(Debug, Clone)]
pub struct WaitingEntry {
    pub connection_id: ConnectionId,
    pub queued_at: Instant,
}

impl WaitingEntry {
    pub fn new(connection_id: ConnectionId) -> Self {
        Self {
            connection_id,
            queued_at: Instant::now(),
        }
    }

    /// How long this connection has been waiting
    pub fn wait_time(&self) -> Duration {
        self.queued_at.elapsed()
    }
}

/// Two entries taken off the front of the queue, oldest first
#[derive(Debug, Clone)]
pub struct Pairing {
    pub left: WaitingEntry,
    pub right: WaitingEntry,
}

/// The matchmaking queue: strict FIFO, two players per match
#[derive(Debug, Default)]
pub struct MatchmakingQueue {
    queue: VecDeque<WaitingEntry>,
}

impl MatchmakingQueue {
    pub fn new() -> Self {
        Self {
            queue: VecDeque::new(),
        }
    }

    /// Add a connection to the back of the queue. No-op if it is already waiting.
    pub fn enqueue(&mut self, connection_id: ConnectionId) -> bool {
        if self.contains(connection_id) {
            return false;
        }
        self.queue.push_back(WaitingEntry::new(connection_id));
        true
    }

    /// Remove a connection from the queue
    pub fn dequeue(&mut self, connection_id: ConnectionId) -> Option<WaitingEntry> {
        let pos = self
            .queue
            .iter()
            .position(|e| e.connection_id == connection_id)?;
        self.queue.remove(pos)
    }

    /// Check if a connection is in the queue
    pub fn contains(&self, connection_id: ConnectionId) -> bool {
        self.queue.iter().any(|e| e.connection_id == connection_id)
    }

    /// Get queue length
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Take the two oldest live entries, if there are two.
    ///
    /// Entries for which `is_live` is false are discarded on the way, so a
    /// connection that vanished without being dequeued is never paired.
    pub fn try_pair<F>(&mut self, is_live: F) -> Option<Pairing>
    where
        F: Fn(ConnectionId) -> bool,
    {
        self.queue.retain(|e| is_live(e.connection_id));
        if self.queue.len() < 2 {
            return None;
        }
        let left = self.queue.pop_front()?;
        let right = self.queue.pop_front()?;
        Some(Pairing { left, right })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_enqueue_is_noop() {
        let mut queue = MatchmakingQueue::new();
        let a = ConnectionId::new();

        assert!(queue.enqueue(a));
        assert!(!queue.enqueue(a));
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn pairs_oldest_two_in_order() {
        let mut queue = MatchmakingQueue::new();
        let ids: Vec<ConnectionId> = (0..5).map(|_| ConnectionId::new()).collect();
        for id in &ids {
            queue.enqueue(*id);
        }

        let first = queue.try_pair(|_| true).unwrap();
        assert_eq!((first.left.connection_id, first.right.connection_id), (ids[0], ids[1]));
        let second = queue.try_pair(|_| true).unwrap();
        assert_eq!((second.left.connection_id, second.right.connection_id), (ids[2], ids[3]));
        assert!(queue.try_pair(|_| true).is_none());
        assert!(queue.contains(ids[4]));
    }

    #[test]
    fn dead_entries_are_skipped() {
        let mut queue = MatchmakingQueue::new();
        let (a, dead, b) = (ConnectionId::new(), ConnectionId::new(), ConnectionId::new());
        queue.enqueue(a);
        queue.enqueue(dead);
        queue.enqueue(b);

        let pair = queue.try_pair(|id| id != dead).unwrap();
        assert_eq!((pair.left.connection_id, pair.right.connection_id), (a, b));
        assert_eq!(queue.len(), 0);
    }

    #[test]
    fn dequeue_removes_waiting_entry() {
        let mut queue = MatchmakingQueue::new();
        let a = ConnectionId::new();
        queue.enqueue(a);

        assert!(queue.dequeue(a).is_some());
        assert!(queue.dequeue(a).is_none());
        assert!(queue.try_pair(|_| true).is_none());
    }
}
