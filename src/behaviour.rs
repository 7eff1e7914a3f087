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

//! The orchestration root: wires the routing table, the two record stores,
//! the query engine and the background jobs into the small set of public
//! operations an embedding application actually calls.
//!
//! One `Behaviour` is one table (WAN *or* LAN); a node that wants both
//! instantiates two of them against the same [`ConnectionManager`], per the
//! design note that LAN/WAN duality is a constructor parameter rather than
//! internal branching.

use crate::config::{Config, Mode};
use crate::handler::{self, AddressFilter};
use crate::identifier::{KeyBytes, PeerId};
use crate::jobs::{self, RefreshSchedule};
use crate::kbucket::ping_queue::Pinger;
use crate::kbucket::RoutingTable;
use crate::network::{AbortHandle, ConnectionManager};
use crate::protocol::{Message, MessageType};
use crate::query::{self, QueryEvent, QueryTarget};
use crate::record::provider_store::ProviderStore;
use crate::record::store::RecordStore;
use crate::record::{AcceptAllValidator, FirstSelector, Record, Selector, Validator};
use std::sync::Arc;
use std::time::{Instant, SystemTime};

/// Everything a `Behaviour` needs from its embedding application, gathered
/// so construction takes one argument instead of five.
pub struct Collaborators {
    pub connection_manager: Arc<dyn ConnectionManager>,
    pub pinger: Arc<dyn Pinger>,
    pub address_filter: Arc<dyn AddressFilter>,
    pub validator: Arc<dyn Validator>,
    pub selector: Arc<dyn Selector>,
}

impl Collaborators {
    /// Minimal collaborators for tests and for hosts that don't yet have a
    /// namespace-specific validator/selector registered.
    pub fn new(
        connection_manager: Arc<dyn ConnectionManager>,
        pinger: Arc<dyn Pinger>,
        address_filter: Arc<dyn AddressFilter>,
    ) -> Self {
        Collaborators {
            connection_manager,
            pinger,
            address_filter,
            validator: Arc::new(AcceptAllValidator),
            selector: Arc::new(FirstSelector),
        }
    }
}

/// The Kademlia DHT orchestration root.
pub struct Behaviour {
    config: Config,
    local_peer: PeerId,
    table: RoutingTable,
    record_store: RecordStore,
    provider_store: ProviderStore,
    refresh_schedule: RefreshSchedule,
    manager: Arc<dyn ConnectionManager>,
    filter: Arc<dyn AddressFilter>,
    validator: Arc<dyn Validator>,
    selector: Arc<dyn Selector>,
    last_sweep: Instant,
}

impl Behaviour {
    pub fn new(local_peer: PeerId, config: Config, collaborators: Collaborators) -> Self {
        let ping_concurrency = 1;
        let table = RoutingTable::new(
            local_peer.clone(),
            config.k_bucket_size,
            collaborators.pinger,
            ping_concurrency,
        );
        let provider_store = ProviderStore::new(
            config.provider_lru_cap,
            config.provider_record_cap,
            config.provider_ttl,
        )
        .expect("provider_lru_cap must be non-zero");
        let refresh_schedule = RefreshSchedule::new(256, config.refresh_interval);

        Behaviour {
            config,
            local_peer,
            table,
            record_store: RecordStore::new(),
            provider_store,
            refresh_schedule,
            manager: collaborators.connection_manager,
            filter: collaborators.address_filter,
            validator: collaborators.validator,
            selector: collaborators.selector,
            last_sweep: Instant::now(),
        }
    }

    pub fn local_peer(&self) -> &PeerId {
        &self.local_peer
    }

    pub fn set_mode(&mut self, mode: Mode) {
        self.config.mode = mode;
    }

    pub fn mode(&self) -> Mode {
        self.config.mode
    }

    /// A peer discovered by the host's peer-discovery machinery. Bridges
    /// straight into the routing table, per [`crate::topology`].
    pub fn add_address(&mut self, peer: PeerId) {
        self.table.add(peer);
    }

    /// Seed the routing table (already populated via [`Self::add_address`])
    /// and perform the immediate self-lookup the specification calls for.
    pub async fn bootstrap(&mut self, abort: AbortHandle) -> Vec<QueryEvent> {
        let local = self.local_peer.clone();
        self.get_closest_peers(local, abort).await
    }

    /// Every public operation accepts an abort signal in addition to the
    /// deadline composed in automatically from [`crate::config::Config::with_query_timeout`]
    /// (see [`Self::run`]); pass a fresh [`AbortHandle::new`] if the caller
    /// has no reason to cancel early.
    pub async fn get_closest_peers(&mut self, target: PeerId, abort: AbortHandle) -> Vec<QueryEvent> {
        let routing_key = KeyBytes::new(target.as_bytes());
        let seeds = self.table.closest_peers(&routing_key, self.config.k_bucket_size);
        self.run(QueryTarget::FindNode { target }, seeds, abort).await
    }

    pub async fn get_record(&mut self, key: Vec<u8>, abort: AbortHandle) -> Vec<QueryEvent> {
        let routing_key = KeyBytes::new(&key);
        let seeds = self.table.closest_peers(&routing_key, self.config.k_bucket_size);
        let quorum = self.config.get_value_quorum;
        self.run(QueryTarget::GetValue { key, quorum }, seeds, abort).await
    }

    pub async fn put_record(&mut self, record: Record, abort: AbortHandle) -> Vec<QueryEvent> {
        let key = record.key.clone();
        let routing_key = KeyBytes::new(&key);
        let seeds = self.table.closest_peers(&routing_key, self.config.k_bucket_size);
        let mut events = self
            .run(QueryTarget::PutValue { key: key.clone() }, seeds, abort.clone())
            .await;
        let closest = responding_peers(&events, self.config.k_bucket_size);
        let mut fanout = self
            .fan_out(closest, MessageType::PutValue, key, Some(record), &abort)
            .await;
        events.append(&mut fanout);
        events
    }

    pub async fn start_providing(&mut self, key: Vec<u8>, abort: AbortHandle) -> Vec<QueryEvent> {
        self.provider_store
            .add_provider(key.clone(), self.local_peer.clone(), SystemTime::now());
        let routing_key = KeyBytes::new(&key);
        let seeds = self.table.closest_peers(&routing_key, self.config.k_bucket_size);
        let mut events = self
            .run(QueryTarget::AddProvider { key: key.clone() }, seeds, abort.clone())
            .await;
        let closest = responding_peers(&events, self.config.k_bucket_size);
        let mut fanout = self
            .fan_out(closest, MessageType::AddProvider, key, None, &abort)
            .await;
        events.append(&mut fanout);
        events
    }

    pub async fn get_providers(&mut self, key: Vec<u8>, abort: AbortHandle) -> Vec<QueryEvent> {
        let now = SystemTime::now();
        let mut events: Vec<QueryEvent> = self
            .provider_store
            .get_providers(&key, now)
            .into_iter()
            .map(|provider| QueryEvent::ProviderFound { provider })
            .collect();
        let routing_key = KeyBytes::new(&key);
        let seeds = self.table.closest_peers(&routing_key, self.config.k_bucket_size);
        let count = self.config.k_bucket_size;
        let mut network_events = self
            .run(QueryTarget::GetProviders { key, count }, seeds, abort)
            .await;
        events.append(&mut network_events);
        events
    }

    /// Drive one round of background work: refresh any stale buckets and
    /// sweep expired provider records. Intended to be called from the
    /// host's own timer loop (see [`crate::jobs::tick`]).
    pub async fn run_periodic(&mut self, force_refresh: bool) -> Vec<QueryEvent> {
        let now = Instant::now();
        let due = if force_refresh {
            self.refresh_schedule.all_buckets()
        } else {
            self.refresh_schedule.due_buckets(now)
        };
        let local_key = KeyBytes::new(self.local_peer.as_bytes());
        let mut events = Vec::new();
        for bucket in due {
            let target_key = jobs::random_key_in_bucket(&local_key, bucket);
            let seeds = self.table.closest_peers(&target_key, self.config.k_bucket_size);
            let target = PeerId::new(target_key.as_bytes().to_vec());
            let mut round = self
                .run(QueryTarget::FindNode { target }, seeds, AbortHandle::new())
                .await;
            events.append(&mut round);
            self.refresh_schedule.mark_refreshed(bucket, now);
        }

        if now.duration_since(self.last_sweep) > self.config.provider_sweep_interval {
            let removed = self.provider_store.sweep_expired(SystemTime::now());
            log::debug!("provider sweep: removed {} expired entries", removed);
            self.last_sweep = now;
        }

        events
    }

    /// Drive [`Self::run_periodic`] and the self-lookup forever, on the
    /// intervals configured at construction. Intended to be spawned onto
    /// the host's own executor once; never returns.
    pub async fn run_background_loop(&mut self) {
        let mut last_self_lookup = Instant::now();
        loop {
            jobs::tick(self.config.refresh_interval.min(self.config.query_self_interval)).await;

            let now = Instant::now();
            if now.duration_since(last_self_lookup) >= self.config.query_self_interval {
                let target = jobs::self_lookup_target(&self.local_peer);
                let _ = self.get_closest_peers(target, AbortHandle::new()).await;
                last_self_lookup = now;
            }

            let _ = self.run_periodic(false).await;
        }
    }

    pub async fn query_self(&mut self, abort: AbortHandle) -> Vec<QueryEvent> {
        let local = self.local_peer.clone();
        self.get_closest_peers(local, abort).await
    }

    /// Drive a query to completion, composing `abort` with the
    /// configured per-operation deadline (default 60s, [`crate::config::Config::with_query_timeout`]):
    /// whichever fires first ends the query with [`QueryEvent::Aborted`].
    async fn run(&mut self, target: QueryTarget, seeds: Vec<PeerId>, abort: AbortHandle) -> Vec<QueryEvent> {
        use futures::StreamExt;
        let stream = query::run_query(
            &*self.manager,
            self.config.protocol_name(),
            self.config.max_message_size,
            target,
            seeds,
            self.config.disjoint_paths,
            self.config.alpha,
            self.config.no_closer_rounds as u32,
            Some(self.config.query_timeout),
            abort,
            self.validator.clone(),
            self.selector.clone(),
        );
        let events: Vec<QueryEvent> = stream.collect().await;
        for event in &events {
            if let QueryEvent::PeerResponse { peer, .. } = event {
                self.table.add(peer.clone());
            }
        }
        events
    }

    async fn fan_out(
        &self,
        peers: Vec<PeerId>,
        ty: MessageType,
        key: Vec<u8>,
        record: Option<Record>,
        abort: &AbortHandle,
    ) -> Vec<QueryEvent> {
        use crate::network;
        use crate::protocol::{ConnectionType, Peer};

        let protocol_name = self.config.protocol_name();
        let max_message_size = self.config.max_message_size;
        // ADD_PROVIDER must advertise the providing peer itself: the
        // receiver only records a provider who vouches for themselves
        // (see `handler::handle_add_provider`).
        let provider_peers = if ty == MessageType::AddProvider {
            vec![Peer {
                peer_id: self.local_peer.clone(),
                addrs: self.filter.addresses_of(&self.local_peer),
                connection: ConnectionType::Connected,
            }]
        } else {
            Vec::new()
        };
        let mut events = Vec::new();
        for peer in peers {
            if abort.is_aborted() {
                events.push(QueryEvent::Aborted);
                break;
            }
            let message = Message {
                ty,
                key: Some(key.clone()),
                record: record.clone(),
                cluster_level: 0,
                closer_peers: Vec::new(),
                provider_peers: provider_peers.clone(),
            };
            let outcome = if ty == MessageType::AddProvider {
                network::send_message(&*self.manager, &protocol_name, max_message_size, peer, message, abort)
                    .await
            } else {
                network::send_request(&*self.manager, &protocol_name, max_message_size, peer, message, abort)
                    .await
            };
            for ev in outcome {
                match ev {
                    network::NetworkEvent::Response { peer, message } => {
                        events.push(QueryEvent::PeerResponse { peer, message })
                    }
                    network::NetworkEvent::Error { peer, error } => {
                        events.push(QueryEvent::QueryError { peer, error })
                    }
                    network::NetworkEvent::PeerObserved { .. } => {}
                }
            }
        }
        events
    }

    /// Inbound request dispatch, for the host to call from its registered
    /// stream handler.
    pub fn handle_inbound(&mut self, message: &Message, sender: &PeerId) -> Option<Message> {
        if self.config.mode != Mode::Server {
            return None;
        }
        handler::dispatch(
            message,
            sender,
            self.table.kbuckets(),
            &mut self.record_store,
            &mut self.provider_store,
            &*self.validator,
            &*self.selector,
            &*self.filter,
            self.config.k_bucket_size,
            SystemTime::now(),
        )
    }
}

/// Distinct peers that actually answered during a walk, in the order they
/// responded, truncated to `count` — an approximation of "the closest K"
/// good enough to address a fan-out, since every respondent came from a
/// distance-ordered candidate queue.
fn responding_peers(events: &[QueryEvent], count: usize) -> Vec<PeerId> {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();
    for event in events {
        if let QueryEvent::PeerResponse { peer, .. } = event {
            if seen.insert(peer.clone()) {
                out.push(peer.clone());
                if out.len() >= count {
                    break;
                }
            }
        }
    }
    out
}
