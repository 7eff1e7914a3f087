// Copyright 2018 Parity Technologies (UK) Ltd.
//
// Permission is hereby granted, free of charge, to any person obtaining a
// copy of this software and associated documentation files (the "Software"),
// to deal in the Software without restriction, including without limitation
// the rights to use, copy, modify, merge, publish, distribute, sublicense,
// and/or sell copies of the Software, and to permit persons to whom the
// Software is furnished to do so, subject to the following conditions:
//
// The above copyright notice and this permission notice shall be included in
// all copies or substantial portions of the Software.
//
// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS
// OR IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
// FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
// AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
// LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING
// FROM, OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER
// DEALINGS IN THE SOFTWARE.

//! A single disjoint lookup path: its candidate queue, its claimed peers,
//! and its own "no closer peer found" termination counter.

use crate::identifier::{Distance, KeyBytes, PeerId};
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};

/// A peer waiting to be queried on some path, ordered so the nearest
/// candidate to the target sorts first out of a max-[`BinaryHeap`].
#[derive(Debug, Clone)]
struct Candidate {
    distance: Distance,
    peer: PeerId,
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.distance == other.distance
    }
}
impl Eq for Candidate {}
impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for Candidate {
    /// Reversed so [`BinaryHeap`] (a max-heap) pops the *nearest* candidate
    /// first.
    fn cmp(&self, other: &Self) -> Ordering {
        other.distance.cmp(&self.distance)
    }
}

/// Terminal state of a path after a `poll` decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathStatus {
    Active,
    /// The queue ran dry, or the last `beta` rounds produced no closer
    /// candidate than the current best.
    Finished,
}

/// One of the `D` disjoint lookup frontiers. Holds only peers first-claimed
/// by this path; a peer claimed by another path never appears here.
pub struct Path {
    target: KeyBytes,
    queue: BinaryHeap<Candidate>,
    queried: HashSet<PeerId>,
    in_flight: HashSet<PeerId>,
    /// Best (smallest) distance to the target observed among queried peers
    /// so far, used for the "no closer" termination rule.
    best_distance: Option<Distance>,
    no_closer_rounds: u32,
    beta: u32,
}

impl Path {
    pub fn new(target: KeyBytes, beta: u32) -> Self {
        Path {
            target,
            queue: BinaryHeap::new(),
            queried: HashSet::new(),
            in_flight: HashSet::new(),
            best_distance: None,
            no_closer_rounds: 0,
            beta,
        }
    }

    /// Add a candidate this path has exclusively claimed. No-op if already
    /// queried or in flight.
    pub fn offer(&mut self, peer: PeerId, peer_key: &KeyBytes) {
        if self.queried.contains(&peer) || self.in_flight.contains(&peer) {
            return;
        }
        let distance = peer_key.distance(&self.target);
        self.queue.push(Candidate { distance, peer });
    }

    /// Pop the globally-nearest unqueried candidate on this path and mark it
    /// in flight, if the path has room for more concurrency and isn't done.
    pub fn next_to_query(&mut self, alpha: usize) -> Option<PeerId> {
        if self.in_flight.len() >= alpha {
            return None;
        }
        let candidate = self.queue.pop()?;
        self.in_flight.insert(candidate.peer.clone());
        Some(candidate.peer)
    }

    /// Record a successful response from `peer`, observed at `peer_key`'s
    /// distance to the target. Updates the "no closer" counter.
    pub fn record_response(&mut self, peer: &PeerId, peer_key: &KeyBytes) {
        self.in_flight.remove(peer);
        self.queried.insert(peer.clone());
        let distance = peer_key.distance(&self.target);
        match self.best_distance {
            Some(best) if distance >= best => {
                self.no_closer_rounds += 1;
            }
            _ => {
                self.best_distance = Some(distance);
                self.no_closer_rounds = 0;
            }
        }
    }

    /// Record a failed request to `peer`; counts toward "no closer" just
    /// like a response that wasn't closer, since it consumed a round
    /// without improving the best distance.
    pub fn record_error(&mut self, peer: &PeerId) {
        self.in_flight.remove(peer);
        self.queried.insert(peer.clone());
        self.no_closer_rounds += 1;
    }

    pub fn has_room(&self, alpha: usize) -> bool {
        self.in_flight.len() < alpha && !self.queue.is_empty()
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    pub fn status(&self) -> PathStatus {
        if self.in_flight.is_empty()
            && (self.queue.is_empty() || self.no_closer_rounds >= self.beta)
        {
            PathStatus::Finished
        } else {
            PathStatus::Active
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(b: u8) -> KeyBytes {
        KeyBytes::new([b])
    }

    #[test]
    fn pops_nearest_candidate_first() {
        let target = KeyBytes::new(b"target");
        let mut path = Path::new(target, 1);
        path.offer(PeerId::new(vec![1]), &key(1));
        path.offer(PeerId::new(vec![2]), &key(2));
        path.offer(PeerId::new(vec![3]), &key(3));

        let mut popped = Vec::new();
        while let Some(p) = path.next_to_query(10) {
            popped.push(p);
        }
        let mut distances: Vec<Distance> = vec![
            key(1).distance(&target),
            key(2).distance(&target),
            key(3).distance(&target),
        ];
        distances.sort();
        // the popped order's distances should match the ascending sort
        let popped_distances: Vec<Distance> = popped
            .iter()
            .map(|p| KeyBytes::new(p.as_bytes()).distance(&target))
            .collect();
        assert_eq!(popped_distances, distances);
    }

    #[test]
    fn alpha_bounds_concurrency() {
        let target = KeyBytes::new(b"target");
        let mut path = Path::new(target, 1);
        for i in 0..5u8 {
            path.offer(PeerId::new(vec![i]), &key(i));
        }
        assert!(path.next_to_query(2).is_some());
        assert!(path.next_to_query(2).is_some());
        assert!(path.next_to_query(2).is_none());
    }

    #[test]
    fn finishes_after_beta_rounds_without_improvement() {
        let target = KeyBytes::new(b"target");
        let mut path = Path::new(target, 2);
        let far = PeerId::new(vec![200]);
        let farther = PeerId::new(vec![201]);
        path.offer(far.clone(), &key(200));
        path.offer(farther.clone(), &key(201));

        let p1 = path.next_to_query(10).unwrap();
        path.record_response(&p1, &key(200));
        assert_eq!(path.status(), PathStatus::Active);

        let p2 = path.next_to_query(10).unwrap();
        // whichever of the two is farther won't improve best_distance
        let peer_key = if p2 == far { key(200) } else { key(201) };
        path.record_response(&p2, &peer_key);
        // queue is now drained either way, so the path is finished
        assert_eq!(path.status(), PathStatus::Finished);
    }

    #[test]
    fn empty_queue_with_no_in_flight_is_finished() {
        let path = Path::new(KeyBytes::new(b"t"), 1);
        assert_eq!(path.status(), PathStatus::Finished);
    }
}
