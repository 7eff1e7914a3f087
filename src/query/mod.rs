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

//! The iterative, α-parallel, D-disjoint-path lookup engine.
//!
//! A query is driven to completion by polling a [`futures::Stream`] of
//! [`QueryEvent`]s built with [`futures::stream::unfold`] over a private
//! state machine ([`QueryState`]); dropping the stream before it ends is how
//! a consumer signals early termination, exactly as described for the
//! lazy event sequences this engine produces.

mod path;

pub use path::PathStatus;

use crate::error::Error;
use crate::identifier::{KeyBytes, PeerId};
use crate::network::{self, AbortHandle, ConnectionManager, NetworkEvent};
use crate::protocol::{Message, MessageType};
use crate::record::{Record, Selector, Validator};
use futures::future::{BoxFuture, Either};
use futures::stream::{FuturesUnordered, Stream, StreamExt};
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use wasm_timer::Delay;

use path::Path;

/// What a query is looking for, and which request type each hop sends.
#[derive(Clone)]
pub enum QueryTarget {
    FindNode {
        target: PeerId,
    },
    GetValue {
        key: Vec<u8>,
        quorum: usize,
    },
    GetProviders {
        key: Vec<u8>,
        count: usize,
    },
    /// The walk phase of a `PUT_VALUE` operation: a `FIND_NODE`-style
    /// lookup for the closest K peers to `key`. The write fan-out itself
    /// happens after the engine finishes, driven by the caller.
    PutValue {
        key: Vec<u8>,
    },
    /// The walk phase of an `ADD_PROVIDER` operation; same shape as
    /// [`QueryTarget::PutValue`].
    AddProvider {
        key: Vec<u8>,
    },
}

impl QueryTarget {
    fn routing_key(&self) -> KeyBytes {
        match self {
            QueryTarget::FindNode { target } => KeyBytes::new(target.as_bytes()),
            QueryTarget::GetValue { key, .. } => KeyBytes::new(key),
            QueryTarget::GetProviders { key, .. } => KeyBytes::new(key),
            QueryTarget::PutValue { key } => KeyBytes::new(key),
            QueryTarget::AddProvider { key } => KeyBytes::new(key),
        }
    }

    fn walk_message(&self) -> Message {
        match self {
            QueryTarget::FindNode { target } => Message::find_node(target.as_bytes().to_vec()),
            QueryTarget::PutValue { key } | QueryTarget::AddProvider { key } => {
                Message::find_node(key.clone())
            }
            QueryTarget::GetValue { key, .. } => Message {
                ty: MessageType::GetValue,
                key: Some(key.clone()),
                record: None,
                cluster_level: 0,
                closer_peers: Vec::new(),
                provider_peers: Vec::new(),
            },
            QueryTarget::GetProviders { key, .. } => Message {
                ty: MessageType::GetProviders,
                key: Some(key.clone()),
                record: None,
                cluster_level: 0,
                closer_peers: Vec::new(),
                provider_peers: Vec::new(),
            },
        }
    }
}

/// A typed event produced while driving a query. The engine never returns a
/// fatal `Result::Err` for per-peer failures; those surface as
/// [`QueryEvent::QueryError`] and the query continues.
#[derive(Debug)]
pub enum QueryEvent {
    PeerResponse { peer: PeerId, message: Message },
    ValueFound { record: Record, from: PeerId },
    ProviderFound { provider: PeerId },
    FinishPath { path: usize },
    QueryError { peer: PeerId, error: Error },
    Aborted,
}

type PathOutcome = (usize, PeerId, Vec<NetworkEvent>);

/// Outcome of racing the next in-flight response against the query's
/// deadline, if it has one.
enum Step {
    Outcome(Option<PathOutcome>),
    TimedOut,
}

/// Sentinel path index for `GET_VALUE` put-back writes, which aren't part
/// of any lookup path and should never drive path termination.
const PUT_BACK_PATH: usize = usize::MAX;

/// Mutable state driven one step at a time by [`run_query`]'s
/// `stream::unfold`.
struct QueryState<'a> {
    manager: &'a dyn ConnectionManager,
    protocol_name: String,
    max_message_size: usize,
    target: QueryTarget,
    alpha: usize,
    abort: AbortHandle,
    deadline: Option<Instant>,
    claims: HashSet<PeerId>,
    paths: Vec<Path>,
    in_flight: FuturesUnordered<BoxFuture<'a, PathOutcome>>,
    pending: VecDeque<QueryEvent>,
    done: bool,
    // GET_VALUE bookkeeping.
    validator: Arc<dyn Validator>,
    selector: Arc<dyn Selector>,
    collected_records: Vec<(Record, PeerId)>,
    stale_peers: Vec<PeerId>,
    put_back_issued: bool,
    // GET_PROVIDERS bookkeeping.
    providers_seen: HashSet<PeerId>,
}

impl<'a> QueryState<'a> {
    fn routing_key(&self) -> KeyBytes {
        self.target.routing_key()
    }

    fn fill_in_flight(&mut self) {
        let message = self.target.walk_message();
        for idx in 0..self.paths.len() {
            while self.paths[idx].has_room(self.alpha) {
                let peer = match self.paths[idx].next_to_query(self.alpha) {
                    Some(p) => p,
                    None => break,
                };
                let fut = Self::spawn_request(
                    self.manager,
                    self.protocol_name.clone(),
                    self.max_message_size,
                    idx,
                    peer,
                    message.clone(),
                    self.abort.clone(),
                );
                self.in_flight.push(fut);
            }
        }
    }

    fn spawn_request(
        manager: &'a dyn ConnectionManager,
        protocol_name: String,
        max_message_size: usize,
        path_idx: usize,
        peer: PeerId,
        message: Message,
        abort: AbortHandle,
    ) -> BoxFuture<'a, PathOutcome> {
        Box::pin(async move {
            let events = network::send_request(
                manager,
                &protocol_name,
                max_message_size,
                peer.clone(),
                message,
                &abort,
            )
            .await;
            (path_idx, peer, events)
        })
    }

    /// Offer every peer mentioned in `events` to `path_idx`'s queue unless
    /// already claimed by some other path (first-claim-wins, outlives the
    /// query).
    fn offer_discovered_peers(&mut self, path_idx: usize, events: &[NetworkEvent]) {
        for ev in events {
            if let NetworkEvent::PeerObserved { peer, .. } = ev {
                if self.claims.contains(peer) {
                    continue;
                }
                self.claims.insert(peer.clone());
                let key = KeyBytes::new(peer.as_bytes());
                self.paths[path_idx].offer(peer.clone(), &key);
            }
        }
    }

    fn process_outcome(&mut self, (path_idx, peer, events): PathOutcome) {
        if path_idx == PUT_BACK_PATH {
            // Fire-and-forget: we don't feed put-back replies back into any
            // path's bookkeeping, but still surface errors to the caller.
            for ev in events {
                if let NetworkEvent::Error { peer, error } = ev {
                    self.pending
                        .push_back(QueryEvent::QueryError { peer, error });
                }
            }
            return;
        }

        self.offer_discovered_peers(path_idx, &events);

        for ev in events {
            match ev {
                NetworkEvent::PeerObserved { .. } => {}
                NetworkEvent::Response { peer, message } => {
                    let peer_key = KeyBytes::new(peer.as_bytes());
                    self.paths[path_idx].record_response(&peer, &peer_key);
                    self.handle_response(&peer, &message);
                    self.pending.push_back(QueryEvent::PeerResponse {
                        peer,
                        message,
                    });
                }
                NetworkEvent::Error { peer, error } => {
                    self.paths[path_idx].record_error(&peer);
                    self.pending
                        .push_back(QueryEvent::QueryError { peer, error });
                }
            }
        }

        if self.paths[path_idx].status() == PathStatus::Finished {
            self.pending.push_back(QueryEvent::FinishPath { path: path_idx });
        }
    }

    fn handle_response(&mut self, peer: &PeerId, message: &Message) {
        match &self.target {
            QueryTarget::GetValue { .. } => {
                match &message.record {
                    Some(record) if self.validator.validate(&record.key, record) => {
                        self.collected_records.push((record.clone(), peer.clone()));
                    }
                    _ => self.stale_peers.push(peer.clone()),
                }
            }
            QueryTarget::GetProviders { .. } => {
                for p in &message.provider_peers {
                    if self.providers_seen.insert(p.peer_id.clone()) {
                        self.pending.push_back(QueryEvent::ProviderFound {
                            provider: p.peer_id.clone(),
                        });
                    }
                }
            }
            _ => {}
        }
    }

    fn get_value_quorum_met(&self) -> bool {
        match &self.target {
            QueryTarget::GetValue { quorum, .. } => self.collected_records.len() >= *quorum,
            _ => false,
        }
    }

    fn get_providers_count_met(&self) -> bool {
        match &self.target {
            QueryTarget::GetProviders { count, .. } => self.providers_seen.len() >= *count,
            _ => false,
        }
    }

    fn all_paths_finished(&self) -> bool {
        self.paths.iter().all(|p| p.status() == PathStatus::Finished)
    }

    /// Called once there is no more in-flight work and no path has room to
    /// issue more requests: decide whether the query is truly done, or
    /// whether a `GET_VALUE` put-back round still needs to run.
    fn finalize(&mut self) {
        if let QueryTarget::GetValue { .. } = &self.target {
            if !self.put_back_issued {
                self.put_back_issued = true;
                if let Some((best, from)) = self.select_best_record() {
                    self.pending.push_back(QueryEvent::ValueFound {
                        record: best.clone(),
                        from,
                    });
                    self.issue_put_back(best);
                    if !self.in_flight.is_empty() {
                        return;
                    }
                }
            }
        }
        self.done = true;
    }

    fn select_best_record(&self) -> Option<(Record, PeerId)> {
        if self.collected_records.is_empty() {
            return None;
        }
        let records: Vec<Record> = self.collected_records.iter().map(|(r, _)| r.clone()).collect();
        let key = match &self.target {
            QueryTarget::GetValue { key, .. } => key.clone(),
            _ => return None,
        };
        let idx = self.selector.select(&key, &records);
        self.collected_records.get(idx).cloned()
    }

    /// Send the selected record back to every peer that answered with no
    /// record or an invalid one, so the value self-heals into the network.
    /// Their outcomes are drained like any other in-flight request but
    /// routed through the reserved `PUT_BACK_PATH` index, which
    /// `process_outcome` treats as fire-and-forget.
    fn issue_put_back(&mut self, best: Record) {
        let stale: Vec<PeerId> = self.stale_peers.drain(..).collect();
        for peer in stale {
            let message = Message {
                ty: MessageType::PutValue,
                key: Some(best.key.clone()),
                record: Some(best.clone()),
                cluster_level: 0,
                closer_peers: Vec::new(),
                provider_peers: Vec::new(),
            };
            let manager = self.manager;
            let protocol_name = self.protocol_name.clone();
            let max_message_size = self.max_message_size;
            let abort = self.abort.clone();
            let fut: BoxFuture<'a, PathOutcome> = Box::pin(async move {
                let events = network::send_request(
                    manager,
                    &protocol_name,
                    max_message_size,
                    peer.clone(),
                    message,
                    &abort,
                )
                .await;
                (PUT_BACK_PATH, peer, events)
            });
            self.in_flight.push(fut);
        }
    }
}

/// Drive `target` to completion, seeding the D disjoint paths round-robin
/// from `seed_peers` (the local routing table's closest peers, already
/// sorted by distance by the caller).
///
/// `timeout` composes with `abort` into the per-operation deadline: once
/// elapsed, it flips `abort` itself and the query ends with
/// [`QueryEvent::Aborted`], the same as an explicit caller-triggered abort.
#[allow(clippy::too_many_arguments)]
pub fn run_query<'a>(
    manager: &'a dyn ConnectionManager,
    protocol_name: String,
    max_message_size: usize,
    target: QueryTarget,
    seed_peers: Vec<PeerId>,
    disjoint_paths: usize,
    alpha: usize,
    beta: u32,
    timeout: Option<Duration>,
    abort: AbortHandle,
    validator: Arc<dyn Validator>,
    selector: Arc<dyn Selector>,
) -> impl Stream<Item = QueryEvent> + 'a {
    let deadline = timeout.map(|d| Instant::now() + d);
    let routing_target = target.routing_key();
    let mut paths: Vec<Path> = (0..disjoint_paths.max(1))
        .map(|_| Path::new(routing_target, beta))
        .collect();
    let mut claims = HashSet::new();
    for (i, peer) in seed_peers.into_iter().enumerate() {
        let path_idx = i % paths.len();
        claims.insert(peer.clone());
        let key = KeyBytes::new(peer.as_bytes());
        paths[path_idx].offer(peer, &key);
    }

    let state = QueryState {
        manager,
        protocol_name,
        max_message_size,
        target,
        alpha: alpha.max(1),
        abort,
        deadline,
        claims,
        paths,
        in_flight: FuturesUnordered::new(),
        pending: VecDeque::new(),
        done: false,
        validator,
        selector,
        collected_records: Vec::new(),
        stale_peers: Vec::new(),
        put_back_issued: false,
        providers_seen: HashSet::new(),
    };

    futures::stream::unfold(state, |mut state| async move {
        loop {
            if let Some(ev) = state.pending.pop_front() {
                return Some((ev, state));
            }
            if state.done {
                return None;
            }
            if state.abort.is_aborted() {
                state.done = true;
                state.in_flight.clear();
                return Some((QueryEvent::Aborted, state));
            }
            if let Some(deadline) = state.deadline {
                if Instant::now() >= deadline {
                    state.abort.abort();
                    state.done = true;
                    state.in_flight.clear();
                    return Some((QueryEvent::Aborted, state));
                }
            }

            if state.get_providers_count_met() {
                state.done = true;
                continue;
            }
            if state.get_value_quorum_met() && !state.put_back_issued {
                state.in_flight.clear();
                state.finalize();
                continue;
            }

            state.fill_in_flight();

            if state.in_flight.is_empty() {
                if state.all_paths_finished() {
                    state.finalize();
                    continue;
                }
                // No path has room and nothing is in flight, but not every
                // path reports finished: nothing left to do, so stop.
                state.done = true;
                continue;
            }

            let step = match state.deadline {
                Some(deadline) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    let next = state.in_flight.next();
                    futures::pin_mut!(next);
                    let delay = Delay::new(remaining);
                    futures::pin_mut!(delay);
                    match futures::future::select(next, delay).await {
                        Either::Left((outcome, _)) => Step::Outcome(outcome),
                        Either::Right(_) => Step::TimedOut,
                    }
                }
                None => Step::Outcome(state.in_flight.next().await),
            };

            match step {
                Step::Outcome(Some(outcome)) => state.process_outcome(outcome),
                Step::Outcome(None) => state.finalize(),
                Step::TimedOut => {
                    state.abort.abort();
                    state.done = true;
                    state.in_flight.clear();
                    return Some((QueryEvent::Aborted, state));
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::AcceptAllValidator;
    use crate::record::FirstSelector;
    use async_trait::async_trait;
    use futures::executor::block_on;
    use std::sync::Mutex;

    /// A manager that answers every request with a fixed closer-peers list
    /// once, and an empty list after that peer has already been asked, so
    /// the walk terminates.
    struct ScriptedManager {
        asked: Mutex<HashSet<PeerId>>,
    }

    #[async_trait]
    impl ConnectionManager for ScriptedManager {
        async fn open_stream(
            &self,
            peer: &PeerId,
            _protocol_name: &str,
        ) -> Result<network::Stream, Error> {
            let mut asked = self.asked.lock().unwrap();
            let _ = asked.insert(peer.clone());
            Err(Error::DialFailed("scripted manager has no transport".into()))
        }
    }

    #[test]
    fn find_node_terminates_and_reports_errors_for_seed_peers() {
        let manager = ScriptedManager {
            asked: Mutex::new(HashSet::new()),
        };
        let seeds = vec![PeerId::new(vec![1]), PeerId::new(vec![2]), PeerId::new(vec![3])];
        let target = QueryTarget::FindNode {
            target: PeerId::new(vec![9]),
        };
        let stream = run_query(
            &manager,
            "/kad/1.0.0".to_string(),
            16 * 1024,
            target,
            seeds.clone(),
            2,
            3,
            1,
            None,
            AbortHandle::new(),
            Arc::new(AcceptAllValidator),
            Arc::new(FirstSelector),
        );

        let events = block_on(stream.collect::<Vec<_>>());
        let error_count = events
            .iter()
            .filter(|e| matches!(e, QueryEvent::QueryError { .. }))
            .count();
        assert_eq!(error_count, seeds.len());
        assert!(events.iter().any(|e| matches!(e, QueryEvent::FinishPath { .. })));
    }

    #[test]
    fn abort_short_circuits_the_stream() {
        let manager = ScriptedManager {
            asked: Mutex::new(HashSet::new()),
        };
        let abort = AbortHandle::new();
        abort.abort();
        let target = QueryTarget::FindNode {
            target: PeerId::new(vec![9]),
        };
        let stream = run_query(
            &manager,
            "/kad/1.0.0".to_string(),
            16 * 1024,
            target,
            vec![PeerId::new(vec![1])],
            1,
            1,
            1,
            None,
            abort,
            Arc::new(AcceptAllValidator),
            Arc::new(FirstSelector),
        );
        let events = block_on(stream.collect::<Vec<_>>());
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], QueryEvent::Aborted));
    }

    #[test]
    fn deadline_aborts_a_query_whose_peers_never_answer() {
        /// A manager whose `open_stream` never resolves, simulating a peer
        /// that never completes the connection upgrade.
        struct HangingManager;

        #[async_trait]
        impl ConnectionManager for HangingManager {
            async fn open_stream(
                &self,
                _peer: &PeerId,
                _protocol_name: &str,
            ) -> Result<network::Stream, Error> {
                futures::future::pending().await
            }
        }

        let manager = HangingManager;
        let target = QueryTarget::FindNode {
            target: PeerId::new(vec![9]),
        };
        let stream = run_query(
            &manager,
            "/kad/1.0.0".to_string(),
            16 * 1024,
            target,
            vec![PeerId::new(vec![1])],
            1,
            1,
            1,
            Some(Duration::from_millis(50)),
            AbortHandle::new(),
            Arc::new(AcceptAllValidator),
            Arc::new(FirstSelector),
        );
        let events = block_on(stream.collect::<Vec<_>>());
        assert!(events.iter().any(|e| matches!(e, QueryEvent::Aborted)));
    }
}
