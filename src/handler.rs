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

//! Inbound request dispatch: one pure function per message type, called by
//! whatever the host wires to its incoming-stream listener.

use crate::identifier::{Key, KeyBytes, PeerId};
use crate::kbucket::KBucketsTable;
use crate::protocol::{ConnectionType, Message, MessageType, Peer};
use crate::record::provider_store::ProviderStore;
use crate::record::store::RecordStore;
use crate::record::{Record, Selector, Validator};
use std::sync::Arc;
use std::time::SystemTime;

/// Resolves a peer's known addresses and connectivity, and applies the
/// LAN/WAN address-filtering policy (spec §6): a WAN table strips private
/// addresses, a LAN table strips public ones.
pub trait AddressFilter: Send + Sync {
    fn addresses_of(&self, peer: &PeerId) -> Vec<Vec<u8>>;
    fn retain(&self, addrs: &mut Vec<Vec<u8>>);
}

/// An [`AddressFilter`] that performs no filtering and reports no known
/// addresses; useful for tests and for hosts that resolve addresses
/// out-of-band.
pub struct NoopAddressFilter;
impl AddressFilter for NoopAddressFilter {
    fn addresses_of(&self, _peer: &PeerId) -> Vec<Vec<u8>> {
        Vec::new()
    }
    fn retain(&self, _addrs: &mut Vec<Vec<u8>>) {}
}

fn closer_peers(
    table: &KBucketsTable,
    filter: &dyn AddressFilter,
    target: &KeyBytes,
    count: usize,
) -> Vec<Peer> {
    table
        .closest_peers(target, count)
        .into_iter()
        .map(|peer_id| {
            let mut addrs = filter.addresses_of(&peer_id);
            filter.retain(&mut addrs);
            Peer {
                peer_id,
                addrs,
                connection: ConnectionType::CanConnect,
            }
        })
        .collect()
}

/// Answer an inbound `PING` by echoing it back verbatim.
pub fn handle_ping(message: &Message) -> Option<Message> {
    debug_assert_eq!(message.ty, MessageType::Ping);
    Some(Message::ping())
}

/// Answer an inbound `FIND_NODE` with the closest K peers to the requested
/// key.
pub fn handle_find_node(
    message: &Message,
    table: &KBucketsTable,
    filter: &dyn AddressFilter,
    k: usize,
) -> Option<Message> {
    let key = message.key.as_ref()?;
    let target = KeyBytes::new(key);
    Some(Message {
        ty: MessageType::FindNode,
        key: Some(key.clone()),
        record: None,
        cluster_level: message.cluster_level,
        closer_peers: closer_peers(table, filter, &target, k),
        provider_peers: Vec::new(),
    })
}

/// Answer an inbound `GET_VALUE`: include the local record if present and
/// valid, and always include the closest K peers.
pub fn handle_get_value(
    message: &Message,
    table: &KBucketsTable,
    store: &RecordStore,
    filter: &dyn AddressFilter,
    k: usize,
) -> Option<Message> {
    let key = message.key.as_ref()?;
    let target = KeyBytes::new(key);
    let record = store.get(key).cloned();
    Some(Message {
        ty: MessageType::GetValue,
        key: Some(key.clone()),
        record,
        cluster_level: message.cluster_level,
        closer_peers: closer_peers(table, filter, &target, k),
        provider_peers: Vec::new(),
    })
}

/// Handle an inbound `PUT_VALUE`: validate for the key's namespace and,
/// if valid and either no local record exists or the selector would prefer
/// the new one, persist it. Always replies with whatever ends up stored.
pub fn handle_put_value(
    message: &Message,
    store: &mut RecordStore,
    validator: &dyn Validator,
    selector: &dyn Selector,
) -> Option<Message> {
    let key = message.key.as_ref()?;
    let incoming = message.record.as_ref()?;
    if !validator.validate(key, incoming) {
        return None;
    }

    let accept = match store.get(key) {
        None => true,
        Some(existing) => {
            let candidates = [existing.clone(), incoming.clone()];
            selector.select(key, &candidates) == 1
        }
    };
    if accept {
        store.put(incoming.clone());
    }

    let stored = store.get(key).cloned();
    Some(Message {
        ty: MessageType::PutValue,
        key: Some(key.clone()),
        record: stored,
        cluster_level: message.cluster_level,
        closer_peers: Vec::new(),
        provider_peers: Vec::new(),
    })
}

/// Answer an inbound `GET_PROVIDERS` with non-expired providers for the CID
/// plus the closest K peers.
pub fn handle_get_providers(
    message: &Message,
    table: &KBucketsTable,
    providers: &mut ProviderStore,
    filter: &dyn AddressFilter,
    now: SystemTime,
    k: usize,
) -> Option<Message> {
    let key = message.key.as_ref()?;
    let target = KeyBytes::new(key);
    let provider_peers = providers
        .get_providers(key, now)
        .into_iter()
        .map(|peer_id| {
            let mut addrs = filter.addresses_of(&peer_id);
            filter.retain(&mut addrs);
            Peer {
                peer_id,
                addrs,
                connection: ConnectionType::CanConnect,
            }
        })
        .collect();
    Some(Message {
        ty: MessageType::GetProviders,
        key: Some(key.clone()),
        record: None,
        cluster_level: message.cluster_level,
        closer_peers: closer_peers(table, filter, &target, k),
        provider_peers,
    })
}

/// Handle an inbound `ADD_PROVIDER`: record the sender as a provider for
/// the CID, but only if the sender is itself one of the peers the message
/// advertises (it can't vouch for someone else).
pub fn handle_add_provider(
    message: &Message,
    sender: &PeerId,
    providers: &mut ProviderStore,
    now: SystemTime,
) -> Option<Message> {
    let key = message.key.as_ref()?;
    let advertises_sender = message
        .provider_peers
        .iter()
        .any(|p| &p.peer_id == sender);
    if advertises_sender {
        providers.add_provider(key.clone(), sender.clone(), now);
    }
    None
}

/// Top-level dispatch matching the specification's RPC table. Malformed
/// inbound messages (missing required fields) fall through to `None`,
/// which the caller must translate into a silent stream close rather than
/// an empty reply.
pub fn dispatch(
    message: &Message,
    sender: &PeerId,
    table: &KBucketsTable,
    record_store: &mut RecordStore,
    provider_store: &mut ProviderStore,
    validator: &dyn Validator,
    selector: &dyn Selector,
    filter: &dyn AddressFilter,
    k: usize,
    now: SystemTime,
) -> Option<Message> {
    match message.ty {
        MessageType::Ping => handle_ping(message),
        MessageType::FindNode => handle_find_node(message, table, filter, k),
        MessageType::GetValue => handle_get_value(message, table, record_store, filter, k),
        MessageType::PutValue => handle_put_value(message, record_store, validator, selector),
        MessageType::GetProviders => {
            handle_get_providers(message, table, provider_store, filter, now, k)
        }
        MessageType::AddProvider => handle_add_provider(message, sender, provider_store, now),
    }
}

#[allow(dead_code)]
fn preimage_key(peer: &PeerId) -> Key<PeerId> {
    Key::from(peer.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{AcceptAllValidator, FirstSelector};

    fn table() -> KBucketsTable {
        KBucketsTable::new(PeerId::new(vec![0]), 20)
    }

    #[test]
    fn ping_echoes() {
        let reply = handle_ping(&Message::ping()).unwrap();
        assert_eq!(reply.ty, MessageType::Ping);
    }

    #[test]
    fn find_node_returns_closest_peers() {
        let mut t = table();
        t.insert(PeerId::new(vec![5]));
        t.insert(PeerId::new(vec![6]));
        let msg = Message::find_node(b"target".to_vec());
        let reply = handle_find_node(&msg, &t, &NoopAddressFilter, 20).unwrap();
        assert_eq!(reply.closer_peers.len(), 2);
    }

    #[test]
    fn put_value_accepts_first_write_then_replies_with_it() {
        let mut store = RecordStore::new();
        let msg = Message {
            ty: MessageType::PutValue,
            key: Some(b"k".to_vec()),
            record: Some(Record::new(b"k".to_vec(), b"v1".to_vec())),
            cluster_level: 0,
            closer_peers: vec![],
            provider_peers: vec![],
        };
        let reply =
            handle_put_value(&msg, &mut store, &AcceptAllValidator, &FirstSelector).unwrap();
        assert_eq!(reply.record.unwrap().value, b"v1");
        assert_eq!(store.get(b"k").unwrap().value, b"v1");
    }

    #[test]
    fn add_provider_requires_self_advertisement() {
        let mut providers = ProviderStore::new(256, 10, std::time::Duration::from_secs(3600)).unwrap();
        let sender = PeerId::new(vec![1]);
        let now = SystemTime::UNIX_EPOCH;
        let msg_without_self = Message {
            ty: MessageType::AddProvider,
            key: Some(b"cid".to_vec()),
            record: None,
            cluster_level: 0,
            closer_peers: vec![],
            provider_peers: vec![Peer {
                peer_id: PeerId::new(vec![2]),
                addrs: vec![],
                connection: ConnectionType::Connected,
            }],
        };
        handle_add_provider(&msg_without_self, &sender, &mut providers, now);
        assert!(providers.get_providers(b"cid", now).is_empty());

        let msg_with_self = Message {
            provider_peers: vec![Peer {
                peer_id: sender.clone(),
                addrs: vec![],
                connection: ConnectionType::Connected,
            }],
            ..msg_without_self
        };
        handle_add_provider(&msg_with_self, &sender, &mut providers, now);
        assert_eq!(providers.get_providers(b"cid", now), vec![sender]);
    }
}
