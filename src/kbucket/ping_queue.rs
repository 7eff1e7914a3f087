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

//! The ping-arbitration job queue: a bounded, single-flight-per-bucket FIFO
//! that decides whether a challenger replaces a full bucket's oldest entry.
//!
//! This is the "behind-an-interface dependency injected at construction"
//! the design notes call for: tests supply a [`Pinger`] stub that resolves
//! synchronously, so the routing table's arbitration logic never needs a
//! live network to be exercised.

use crate::identifier::PeerId;
use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

/// Opens a DHT protocol stream to `peer` and checks for a reply within the
/// configured timeout. Implemented by the network layer; a test stub may
/// resolve immediately without touching a real transport.
#[async_trait]
pub trait Pinger: Send + Sync {
    async fn ping(&self, peer: &PeerId) -> bool;
}

struct Job {
    bucket_index: usize,
    candidate: PeerId,
}

/// The result of one completed arbitration: did the bucket's oldest entry
/// survive the liveness probe?
pub struct ArbitrationResult {
    pub bucket_index: usize,
    pub survived: bool,
}

/// Bounded single-flight-per-bucket ping arbitration.
///
/// At most one arbitration job is ever in flight per bucket (concurrent
/// insertions into the same full bucket coalesce onto the existing job);
/// `concurrency` bounds how many *different* buckets may be arbitrating at
/// once, default 1 per the specification.
pub struct PingQueue {
    pinger: Arc<dyn Pinger>,
    concurrency: usize,
    in_flight_buckets: HashSet<usize>,
    waiting: VecDeque<Job>,
    running: FuturesUnordered<BoxFuture<'static, ArbitrationResult>>,
}

impl PingQueue {
    pub fn new(pinger: Arc<dyn Pinger>, concurrency: usize) -> Self {
        PingQueue {
            pinger,
            concurrency: concurrency.max(1),
            in_flight_buckets: HashSet::new(),
            waiting: VecDeque::new(),
            running: FuturesUnordered::new(),
        }
    }

    /// Schedule arbitration of `candidate` (the bucket's oldest entry)
    /// against `bucket_index`. Returns `false` without enqueuing anything
    /// if arbitration is already running for that bucket — "concurrent
    /// requests for the same bucket coalesce."
    pub fn enqueue(&mut self, bucket_index: usize, candidate: PeerId) -> bool {
        if self.in_flight_buckets.contains(&bucket_index) {
            log::trace!(
                "ping arbitration already in flight for bucket {}; coalescing",
                bucket_index
            );
            return false;
        }
        self.in_flight_buckets.insert(bucket_index);
        self.waiting.push_back(Job {
            bucket_index,
            candidate,
        });
        self.drain();
        true
    }

    fn drain(&mut self) {
        while self.running.len() < self.concurrency {
            let job = match self.waiting.pop_front() {
                Some(j) => j,
                None => break,
            };
            let pinger = self.pinger.clone();
            let Job {
                bucket_index,
                candidate,
            } = job;
            let fut = async move {
                let survived = pinger.ping(&candidate).await;
                ArbitrationResult {
                    bucket_index,
                    survived,
                }
            };
            self.running.push(fut.boxed());
        }
    }

    /// Await the next completed arbitration job. The caller must feed the
    /// result into [`super::RoutingTable::resolve_arbitration`].
    pub async fn next(&mut self) -> Option<ArbitrationResult> {
        let result = self.running.next().await;
        if let Some(r) = &result {
            self.in_flight_buckets.remove(&r.bucket_index);
            self.drain();
        }
        result
    }

    pub fn has_pending_work(&self) -> bool {
        !self.waiting.is_empty() || !self.running.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::executor::block_on;

    struct AlwaysSucceeds;
    #[async_trait]
    impl Pinger for AlwaysSucceeds {
        async fn ping(&self, _peer: &PeerId) -> bool {
            true
        }
    }

    #[test]
    fn coalesces_concurrent_requests_for_same_bucket() {
        let mut queue = PingQueue::new(Arc::new(AlwaysSucceeds), 1);
        assert!(queue.enqueue(0, PeerId::new(vec![1])));
        assert!(!queue.enqueue(0, PeerId::new(vec![2])));
        let result = block_on(queue.next()).unwrap();
        assert_eq!(result.bucket_index, 0);
        assert!(result.survived);
    }
}
