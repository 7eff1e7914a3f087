//! Multi-peer `FIND_NODE` and `PUT_VALUE`/`GET_VALUE` round trips driven
//! over the real wire codec via an in-process network (see `support`).

mod support;

use kad_dht::{AbortHandle, Behaviour, Collaborators, Config, Mode, NoopAddressFilter, PeerId, QueryEvent, Record};
use std::sync::{Arc, Mutex};
use support::{AlwaysAlive, LoopbackNetwork};

fn spawn_peer(network: &LoopbackNetwork, id: u8, mode: Mode) -> (PeerId, Arc<Mutex<Behaviour>>) {
    let peer = PeerId::new(vec![id]);
    let collaborators = Collaborators::new(
        network.handle(peer.clone()),
        Arc::new(AlwaysAlive),
        Arc::new(NoopAddressFilter),
    );
    let config = Config::new().with_mode(mode).with_k_bucket_size(4);
    let behaviour = Arc::new(Mutex::new(Behaviour::new(peer.clone(), config, collaborators)));
    network.register(peer.clone(), behaviour.clone());
    (peer, behaviour)
}

/// A line topology, querier -> relay -> target: the querier only knows the
/// relay, so reaching the target requires actually following the
/// `closerPeers` the relay returns.
#[test]
fn find_node_walks_through_an_intermediate_peer_to_reach_the_target() {
    let network = LoopbackNetwork::new();

    let (_querier, querier_behaviour) = spawn_peer(&network, 1, Mode::Client);
    let (relay, relay_behaviour) = spawn_peer(&network, 2, Mode::Server);
    let (target, _target_behaviour) = spawn_peer(&network, 3, Mode::Server);

    relay_behaviour.lock().unwrap().add_address(target.clone());
    querier_behaviour.lock().unwrap().add_address(relay.clone());

    let events = futures::executor::block_on(
        querier_behaviour
            .lock()
            .unwrap()
            .get_closest_peers(target.clone(), AbortHandle::new()),
    );

    let contacted_target = events.iter().any(|event| {
        matches!(event, QueryEvent::PeerResponse { peer, .. } if *peer == target)
    });
    assert!(
        contacted_target,
        "expected the walk to reach the target via the relay, got: {:?}",
        events
    );
}

/// `put_record` walks to the closest peers and then really writes the
/// record to whoever answered; a later `get_record` from the same querier
/// should see it come back from the network, not just a local cache.
#[test]
fn put_record_then_get_record_round_trips_through_the_network() {
    let network = LoopbackNetwork::new();

    let (_querier, querier_behaviour) = spawn_peer(&network, 1, Mode::Client);
    let (relay, relay_behaviour) = spawn_peer(&network, 2, Mode::Server);
    let (target, _target_behaviour) = spawn_peer(&network, 3, Mode::Server);

    relay_behaviour.lock().unwrap().add_address(target.clone());
    querier_behaviour.lock().unwrap().add_address(relay.clone());
    querier_behaviour.lock().unwrap().add_address(target.clone());

    let record = Record::new(b"/some/key".to_vec(), b"some-value".to_vec());
    let put_events = futures::executor::block_on(
        querier_behaviour
            .lock()
            .unwrap()
            .put_record(record.clone(), AbortHandle::new()),
    );
    assert!(
        put_events
            .iter()
            .any(|e| matches!(e, QueryEvent::PeerResponse { .. })),
        "expected at least one peer to answer the walk phase: {:?}",
        put_events
    );

    let get_events = futures::executor::block_on(
        querier_behaviour
            .lock()
            .unwrap()
            .get_record(record.key.clone(), AbortHandle::new()),
    );
    let found = get_events.iter().find_map(|e| match e {
        QueryEvent::ValueFound { record: found, .. } => Some(found.clone()),
        _ => None,
    });
    assert_eq!(
        found.map(|r| r.value),
        Some(record.value),
        "expected the put record to be found again via the network: {:?}",
        get_events
    );
}
