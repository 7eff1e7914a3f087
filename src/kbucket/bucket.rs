// Copyright 2019 Fluence Labs Limited
// Copyright 2018 Parity Technologies (UK) Ltd.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! A single k-bucket: an ordered, bounded list of contacts plus the
//! single in-flight ping-arbitration candidate for that bucket.

use crate::identifier::PeerId;
use std::collections::VecDeque;
use std::time::Instant;

/// A routing-table entry. Exclusively owned by the bucket that holds it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Node {
    pub peer: PeerId,
    pub last_seen: Instant,
}

/// A new contact that arrived while its bucket was full and unsplittable,
/// waiting on the ping queue to decide whether it replaces the bucket's
/// oldest entry.
#[derive(Clone, Debug)]
pub struct PendingNode {
    pub node: Node,
    /// Index of the oldest node being pinged for arbitration.
    pub arbitration_candidate: PeerId,
}

/// Outcome of attempting to insert into a single bucket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertResult {
    /// The peer is new and there was room; it was appended as newest.
    Inserted,
    /// The peer was already present; its liveness marker was refreshed and
    /// it was moved to the newest position.
    Refreshed,
    /// The bucket is full. Ping arbitration must run against
    /// `arbitration_candidate` (the oldest entry) before `new_peer` can be
    /// considered again.
    Full {
        arbitration_candidate: PeerId,
    },
    /// The bucket is full and arbitration is already in flight for it; the
    /// new peer is dropped per the "only one arbitration per bucket"
    /// invariant.
    ArbitrationInFlight,
}

/// An ordered (oldest → newest), capacity-bounded list of contacts, matching
/// invariants 1–2 of the specification: unique by peer id, never more than
/// `capacity` entries.
#[derive(Debug, Clone)]
pub struct Bucket {
    nodes: VecDeque<Node>,
    capacity: usize,
    pending: Option<PendingNode>,
}

impl Bucket {
    pub fn new(capacity: usize) -> Self {
        Bucket {
            nodes: VecDeque::with_capacity(capacity),
            capacity,
            pending: None,
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.nodes.len() >= self.capacity
    }

    pub fn contains(&self, peer: &PeerId) -> bool {
        self.nodes.iter().any(|n| &n.peer == peer)
    }

    pub fn get(&self, peer: &PeerId) -> Option<&Node> {
        self.nodes.iter().find(|n| &n.peer == peer)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter()
    }

    pub fn oldest(&self) -> Option<&Node> {
        self.nodes.front()
    }

    pub fn has_pending_arbitration(&self) -> bool {
        self.pending.is_some()
    }

    /// Insert or refresh `peer`. If the bucket is full, this does not
    /// mutate state — it reports the arbitration candidate (or that
    /// arbitration is already running) and leaves the decision to
    /// [`Self::resolve_arbitration`].
    pub fn insert(&mut self, peer: PeerId) -> InsertResult {
        if let Some(pos) = self.nodes.iter().position(|n| n.peer == peer) {
            let mut node = self.nodes.remove(pos).expect("position just found");
            node.last_seen = Instant::now();
            self.nodes.push_back(node);
            return InsertResult::Refreshed;
        }

        if !self.is_full() {
            self.nodes.push_back(Node {
                peer,
                last_seen: Instant::now(),
            });
            return InsertResult::Inserted;
        }

        if self.pending.is_some() {
            return InsertResult::ArbitrationInFlight;
        }

        let arbitration_candidate = self
            .oldest()
            .expect("bucket is full, so it has an oldest entry")
            .peer
            .clone();
        self.pending = Some(PendingNode {
            node: Node {
                peer,
                last_seen: Instant::now(),
            },
            arbitration_candidate: arbitration_candidate.clone(),
        });
        InsertResult::Full {
            arbitration_candidate,
        }
    }

    /// The oldest entry responded to the liveness probe: it's refreshed to
    /// newest and the challenger is dropped.
    pub fn arbitration_candidate_survived(&mut self) {
        if let Some(pending) = self.pending.take() {
            self.insert(pending.arbitration_candidate);
        }
    }

    /// The oldest entry failed to respond: it's evicted and the challenger
    /// takes its place.
    pub fn arbitration_candidate_evicted(&mut self) -> Option<Node> {
        let pending = self.pending.take()?;
        let evicted = self.remove(&pending.arbitration_candidate);
        self.nodes.push_back(pending.node);
        evicted
    }

    pub fn remove(&mut self, peer: &PeerId) -> Option<Node> {
        let pos = self.nodes.iter().position(|n| &n.peer == peer)?;
        self.nodes.remove(pos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(n: u8) -> PeerId {
        PeerId::new(vec![n])
    }

    #[test]
    fn insert_until_full_then_arbitrates() {
        let mut bucket = Bucket::new(2);
        assert_eq!(bucket.insert(peer(1)), InsertResult::Inserted);
        assert_eq!(bucket.insert(peer(2)), InsertResult::Inserted);
        assert!(bucket.is_full());

        match bucket.insert(peer(3)) {
            InsertResult::Full {
                arbitration_candidate,
            } => assert_eq!(arbitration_candidate, peer(1)),
            other => panic!("expected Full, got {:?}", other),
        }
        // A second newcomer while arbitration is in flight is dropped.
        assert_eq!(bucket.insert(peer(4)), InsertResult::ArbitrationInFlight);
    }

    #[test]
    fn surviving_candidate_keeps_its_slot_and_drops_challenger() {
        let mut bucket = Bucket::new(1);
        bucket.insert(peer(1));
        bucket.insert(peer(2));
        bucket.arbitration_candidate_survived();
        assert!(bucket.contains(&peer(1)));
        assert!(!bucket.contains(&peer(2)));
        assert_eq!(bucket.len(), 1);
    }

    #[test]
    fn failing_candidate_is_evicted_for_challenger() {
        let mut bucket = Bucket::new(1);
        bucket.insert(peer(1));
        bucket.insert(peer(2));
        let evicted = bucket.arbitration_candidate_evicted();
        assert_eq!(evicted.map(|n| n.peer), Some(peer(1)));
        assert!(bucket.contains(&peer(2)));
        assert!(!bucket.contains(&peer(1)));
    }
}
