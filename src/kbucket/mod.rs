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

//! The k-bucket routing table: a bit-prefix tree, realized as a flat array
//! of 256 buckets indexed by common-prefix-length with the local key (the
//! fully-split realization of the splittable tree the specification
//! describes — a peer's bucket index *is* its cpl to the local key, so no
//! bucket is ever inserted into beyond the point where it would split).
//!
//! Bucket mutation is always performed by [`RoutingTable`]'s own methods,
//! per the design note that the table owns its buckets exclusively; timers
//! and the ping-queue worker only ever call back into it.

mod bucket;
pub mod ping_queue;

pub use bucket::{InsertResult, Node};
pub use ping_queue::{ArbitrationResult, Pinger, PingQueue};

use crate::identifier::{Key, KeyBytes, PeerId};
use bucket::Bucket;
use std::sync::Arc;

/// The number of distinct buckets: one per possible common-prefix-length
/// with a 256-bit routing key, `[0, 256)`.
const NUM_BUCKETS: usize = 256;

/// Emitted whenever the table's membership changes, for the refresh job and
/// query engine to observe opportunistically.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    PeerAdded(PeerId),
    PeerRemoved(PeerId),
}

/// The pure bucket-tree data structure, without the ping-queue wiring.
/// Kept separate from [`RoutingTable`] so unit tests can exercise insertion
/// and arbitration bookkeeping without an async runtime.
pub struct KBucketsTable {
    local_key: Key<PeerId>,
    buckets: Vec<Bucket>,
    k: usize,
}

impl KBucketsTable {
    pub fn new(local_peer: PeerId, k: usize) -> Self {
        KBucketsTable {
            local_key: Key::from(local_peer),
            buckets: (0..NUM_BUCKETS).map(|_| Bucket::new(k)).collect(),
            k,
        }
    }

    pub fn local_peer(&self) -> &PeerId {
        self.local_key.preimage()
    }

    /// The bucket index for `key`, i.e. its common-prefix-length with the
    /// local key. `None` if `key` equals the local key (it has no bucket).
    pub fn bucket_index(&self, key: &KeyBytes) -> Option<usize> {
        let local: &KeyBytes = self.local_key.as_ref();
        let distance = local.distance(key);
        distance.ilog2().map(|log2| 255 - log2 as usize)
    }

    fn bucket_index_of_peer(&self, peer: &PeerId) -> Option<usize> {
        let key = Key::new(peer.as_bytes().to_vec());
        self.bucket_index(key.as_ref())
    }

    pub fn insert(&mut self, peer: PeerId) -> Option<(usize, InsertResult)> {
        let index = self.bucket_index_of_peer(&peer)?;
        let result = self.buckets[index].insert(peer);
        Some((index, result))
    }

    pub fn remove(&mut self, peer: &PeerId) -> bool {
        match self.bucket_index_of_peer(peer) {
            Some(index) => self.buckets[index].remove(peer).is_some(),
            None => false,
        }
    }

    pub fn resolve_arbitration(&mut self, bucket_index: usize, survived: bool) {
        if bucket_index >= self.buckets.len() {
            return;
        }
        if survived {
            self.buckets[bucket_index].arbitration_candidate_survived();
        } else {
            self.buckets[bucket_index].arbitration_candidate_evicted();
        }
    }

    /// Up to `count` contacts nearest to `target` in XOR distance, stable
    /// ascending sort, satisfying invariant 3 of the specification.
    pub fn closest_peers(&self, target: &KeyBytes, count: usize) -> Vec<PeerId> {
        let mut candidates: Vec<PeerId> = self
            .buckets
            .iter()
            .flat_map(|b| b.iter().map(|n| n.peer.clone()))
            .collect();
        candidates.sort_by_key(|peer| {
            let key = Key::new(peer.as_bytes().to_vec());
            key.as_ref().distance(target)
        });
        candidates.truncate(count);
        candidates
    }

    pub fn contains(&self, peer: &PeerId) -> bool {
        self.bucket_index_of_peer(peer)
            .map_or(false, |i| self.buckets[i].contains(peer))
    }

    pub fn size(&self) -> usize {
        self.buckets.iter().map(Bucket::len).sum()
    }

    pub fn k(&self) -> usize {
        self.k
    }
}

/// The routing table proper: a [`KBucketsTable`] plus the ping-arbitration
/// worker and an event feed for subscribers, matching the "routing table +
/// eviction/ping arbitration protocol" component of the specification.
pub struct RoutingTable {
    table: KBucketsTable,
    ping_queue: PingQueue,
    events: Vec<Event>,
}

impl RoutingTable {
    pub fn new(local_peer: PeerId, k: usize, pinger: Arc<dyn Pinger>, ping_concurrency: usize) -> Self {
        RoutingTable {
            table: KBucketsTable::new(local_peer, k),
            ping_queue: PingQueue::new(pinger, ping_concurrency),
            events: Vec::new(),
        }
    }

    pub fn local_peer(&self) -> &PeerId {
        self.table.local_peer()
    }

    /// Insert or refresh `peer`. On a full, unsplittable bucket this
    /// enqueues a ping-arbitration job and returns without mutating the
    /// table; call [`Self::drive_arbitration`] to let that job resolve.
    pub fn add(&mut self, peer: PeerId) {
        if peer == *self.table.local_peer() {
            return;
        }
        match self.table.insert(peer.clone()) {
            Some((_, InsertResult::Inserted)) => {
                log::debug!("routing table: inserted {}", peer);
                self.events.push(Event::PeerAdded(peer));
            }
            Some((_, InsertResult::Refreshed)) => {
                log::trace!("routing table: refreshed {}", peer);
            }
            Some((index, InsertResult::Full {
                arbitration_candidate,
            })) => {
                log::debug!(
                    "routing table: bucket {} full, arbitrating {} vs {}",
                    index,
                    arbitration_candidate,
                    peer
                );
                self.ping_queue.enqueue(index, arbitration_candidate);
            }
            Some((_, InsertResult::ArbitrationInFlight)) => {
                log::trace!("routing table: dropping {} (arbitration in flight)", peer);
            }
            None => {
                // `peer` is the local identifier; nothing to do.
            }
        }
    }

    pub fn remove(&mut self, peer: &PeerId) -> bool {
        let removed = self.table.remove(peer);
        if removed {
            self.events.push(Event::PeerRemoved(peer.clone()));
        }
        removed
    }

    pub fn closest_peers(&self, target: &KeyBytes, count: usize) -> Vec<PeerId> {
        self.table.closest_peers(target, count)
    }

    /// The underlying bucket tree, for inbound-request handlers that only
    /// need read access (see [`crate::handler::dispatch`]).
    pub fn kbuckets(&self) -> &KBucketsTable {
        &self.table
    }

    pub fn contains(&self, peer: &PeerId) -> bool {
        self.table.contains(peer)
    }

    pub fn size(&self) -> usize {
        self.table.size()
    }

    /// Drain events accumulated since the last call, for subscribers
    /// (refresh job, query engine opportunistic population).
    pub fn drain_events(&mut self) -> Vec<Event> {
        std::mem::take(&mut self.events)
    }

    /// Await the next ping-arbitration outcome and apply it. Returns
    /// `None` once the queue has no outstanding or pending jobs at the
    /// moment of the call and nothing to await.
    pub async fn drive_arbitration(&mut self) -> Option<()> {
        let result = self.ping_queue.next().await?;
        let survived = result.survived;
        let bucket_index = result.bucket_index;
        if survived {
            log::debug!(
                "ping arbitration: bucket {} candidate survived",
                bucket_index
            );
        } else {
            log::debug!(
                "ping arbitration: bucket {} candidate evicted",
                bucket_index
            );
        }
        self.table.resolve_arbitration(bucket_index, survived);
        Some(())
    }

    pub fn has_pending_arbitration(&self) -> bool {
        self.ping_queue.has_pending_work()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identifier::KeyBytes;
    use async_trait::async_trait;
    use futures::executor::block_on;

    struct AlwaysSucceeds;
    #[async_trait]
    impl Pinger for AlwaysSucceeds {
        async fn ping(&self, _peer: &PeerId) -> bool {
            true
        }
    }

    struct AlwaysFails;
    #[async_trait]
    impl Pinger for AlwaysFails {
        async fn ping(&self, _peer: &PeerId) -> bool {
            false
        }
    }

    fn peer(n: u8) -> PeerId {
        PeerId::new(vec![n])
    }

    #[test]
    fn size_never_exceeds_k_across_many_inserts() {
        let mut table =
            KBucketsTable::new(peer(0), 20);
        for round in 0..1000u32 {
            let p = PeerId::new((round % 20).to_be_bytes().to_vec());
            table.insert(p);
        }
        assert!(table.size() <= 20);
    }

    #[test]
    fn remove_then_closest_peers_reflects_removal() {
        let mut table = KBucketsTable::new(peer(0), 20);
        let peers: Vec<PeerId> = (1..=10u8).map(peer).collect();
        for p in &peers {
            table.insert(p.clone());
        }
        assert_eq!(table.size(), 10);
        assert!(table.remove(&peer(5)));
        assert_eq!(table.size(), 9);
        let target = Key::new(peer(2).as_bytes().to_vec());
        let closest = table.closest_peers(target.as_ref(), 10);
        assert_eq!(closest.len(), 9);
        assert!(!closest.contains(&peer(5)));
    }

    #[test]
    fn closest_peer_to_itself_is_itself() {
        let mut table = KBucketsTable::new(peer(0), 20);
        for p in (1..=4u8).map(peer) {
            table.insert(p);
        }
        let target = Key::new(peer(2).as_bytes().to_vec());
        let closest = table.closest_peers(target.as_ref(), 1);
        assert_eq!(closest.get(0), Some(&peer(2)));
    }

    /// Brute-force two distinct peer ids that hash into the same bucket
    /// relative to `local`, so arbitration tests can force a collision
    /// without reaching into the table's private bucket array.
    fn two_colliding_peers(local: &PeerId, k: usize) -> (PeerId, PeerId) {
        let probe = KBucketsTable::new(local.clone(), k);
        let mut by_bucket: std::collections::HashMap<usize, PeerId> = std::collections::HashMap::new();
        for n in 1..=255u8 {
            let candidate = peer(n);
            let key = Key::new(candidate.as_bytes().to_vec());
            if let Some(index) = probe.bucket_index(key.as_ref()) {
                if let Some(existing) = by_bucket.get(&index) {
                    return (existing.clone(), candidate);
                }
                by_bucket.insert(index, candidate);
            }
        }
        panic!("no colliding pair found in search space");
    }

    #[test]
    fn full_bucket_surviving_candidate_drops_newcomer() {
        let local = peer(0);
        let (oldest, newcomer) = two_colliding_peers(&local, 1);
        let mut table = RoutingTable::new(local, 1, Arc::new(AlwaysSucceeds), 1);
        table.add(oldest.clone());
        table.add(newcomer.clone());
        block_on(table.drive_arbitration());
        assert!(table.contains(&oldest));
        assert!(!table.contains(&newcomer));
    }

    #[test]
    fn full_bucket_failing_candidate_admits_newcomer() {
        let local = peer(0);
        let (oldest, newcomer) = two_colliding_peers(&local, 1);
        let mut table = RoutingTable::new(local, 1, Arc::new(AlwaysFails), 1);
        table.add(oldest.clone());
        table.add(newcomer.clone());
        block_on(table.drive_arbitration());
        assert!(!table.contains(&oldest));
        assert!(table.contains(&newcomer));
    }
}
