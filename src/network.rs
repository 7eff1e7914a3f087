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

//! The host-supplied dialing/stream collaborator, and the request/response
//! plumbing built on top of it.
//!
//! This crate never opens a socket itself. [`ConnectionManager`] is the seam
//! an embedding application implements to hand us an
//! `AsyncRead + AsyncWrite` stream for a peer, the same way the host
//! application supplies connection upgrades and a dialer in the crate this
//! one is grounded on; everything above that seam (framing, request
//! matching, event shape) belongs to this crate.

use crate::error::Error;
use crate::identifier::PeerId;
use crate::protocol::{Codec, Message};
use async_trait::async_trait;
use asynchronous_codec::Framed;
use futures::future::Either;
use futures::io::{AsyncRead, AsyncWrite};
use futures::{SinkExt, StreamExt};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::Duration;
use wasm_timer::Delay;

/// A cooperative abort signal shared between a query's caller and the
/// request(s) it drives. Cloning shares the same underlying flag.
#[derive(Clone, Default)]
pub struct AbortHandle(Arc<AtomicBool>);

impl AbortHandle {
    pub fn new() -> Self {
        AbortHandle(Arc::new(AtomicBool::new(false)))
    }

    pub fn abort(&self) {
        self.0.store(true, AtomicOrdering::SeqCst);
    }

    pub fn is_aborted(&self) -> bool {
        self.0.load(AtomicOrdering::SeqCst)
    }

    /// Resolves once [`Self::abort`] has been called. The flag carries no
    /// waker of its own, so this polls at a coarse interval rather than
    /// being woken directly — fine for tearing down a single in-flight
    /// request, not meant for tight loops.
    async fn cancelled(&self) {
        loop {
            if self.is_aborted() {
                return;
            }
            let _ = Delay::new(Duration::from_millis(50)).await;
        }
    }
}

/// Race `fut` against `abort`, yielding `Err(Error::Aborted)` if the abort
/// fires first.
async fn race_abort<F: std::future::Future>(
    fut: F,
    abort: &AbortHandle,
) -> std::result::Result<F::Output, Error> {
    if abort.is_aborted() {
        return Err(Error::Aborted);
    }
    futures::pin_mut!(fut);
    let cancelled = abort.cancelled();
    futures::pin_mut!(cancelled);
    match futures::future::select(fut, cancelled).await {
        Either::Left((out, _)) => Ok(out),
        Either::Right(_) => Err(Error::Aborted),
    }
}

/// A duplex byte stream to a single remote peer, already authenticated and
/// multiplexed by the host overlay. This crate only ever reads and writes
/// length-prefixed protobuf frames over it.
pub type Stream = Pin<Box<dyn AsyncReadWrite + Send>>;

/// Convenience bound alias; `Pin<Box<dyn Trait>>` can't name a bound made of
/// two traits directly.
pub trait AsyncReadWrite: AsyncRead + AsyncWrite {}
impl<T: AsyncRead + AsyncWrite> AsyncReadWrite for T {}

/// The host-supplied dialing collaborator. An embedding application
/// implements this once, wrapping whatever transport/multiplexer it already
/// uses, and hands it to the orchestration root at construction time.
#[async_trait]
pub trait ConnectionManager: Send + Sync {
    /// Open (or reuse) a stream to `peer`, speaking the protocol named by
    /// `protocol_name` (from [`crate::config::Config::protocol_name`]).
    /// Returns [`Error::DialFailed`] if no connection could be established.
    async fn open_stream(&self, peer: &PeerId, protocol_name: &str) -> Result<Stream, Error>;
}

/// One event produced while driving a request to completion. The query
/// engine consumes these to learn about both the outcome of the request it
/// asked for and any other peers it opportunistically discovered.
#[derive(Debug, Clone)]
pub enum NetworkEvent {
    /// A peer was mentioned in a `closerPeers` or `providerPeers` list, or
    /// is the peer a request was addressed to. Emitted for every distinct
    /// peer encountered, regardless of whether the request it came from
    /// ultimately succeeded.
    PeerObserved { peer: PeerId, addrs: Vec<Vec<u8>> },
    /// `peer` answered with `message`.
    Response { peer: PeerId, message: Message },
    /// Sending to or receiving from `peer` failed.
    Error { peer: PeerId, error: Error },
}

/// Send `message` to `peer` and wait for its response, opening a fresh
/// stream through `manager`. Returns the peer's reply message plus the
/// [`NetworkEvent::PeerObserved`] events for every peer mentioned in its
/// `closerPeers`/`providerPeers` fields, in the order the spec processes
/// them (requested peer first).
///
/// `abort` is raced against every await point (dial, send, receive): once
/// it fires, the stream is dropped without completing and a single
/// [`NetworkEvent::Error`] carrying [`Error::Aborted`] is returned.
pub async fn send_request(
    manager: &dyn ConnectionManager,
    protocol_name: &str,
    max_message_size: usize,
    peer: PeerId,
    message: Message,
    abort: &AbortHandle,
) -> Vec<NetworkEvent> {
    let stream = match race_abort(manager.open_stream(&peer, protocol_name), abort).await {
        Ok(Ok(s)) => s,
        Ok(Err(e)) | Err(e) => return vec![NetworkEvent::Error { peer, error: e }],
    };

    let codec = Codec::new(max_message_size);
    let mut framed = Framed::new(stream, codec);

    match race_abort(framed.send(message), abort).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) | Err(e) => return vec![NetworkEvent::Error { peer, error: e }],
    }

    let response = match race_abort(framed.next(), abort).await {
        Ok(Some(Ok(msg))) => msg,
        Ok(Some(Err(e))) | Err(e) => return vec![NetworkEvent::Error { peer, error: e }],
        Ok(None) => {
            return vec![NetworkEvent::Error {
                peer,
                error: Error::NoMessageReceived,
            }]
        }
    };

    events_from_response(peer, response)
}

/// Send `message` to `peer` without waiting for a reply, for RPCs the wire
/// schema never answers (`ADD_PROVIDER`). Only dial/send failures are
/// reported; there is nothing to read, so no [`NetworkEvent::PeerObserved`]
/// events are produced either. `abort` is raced the same way as in
/// [`send_request`].
pub async fn send_message(
    manager: &dyn ConnectionManager,
    protocol_name: &str,
    max_message_size: usize,
    peer: PeerId,
    message: Message,
    abort: &AbortHandle,
) -> Vec<NetworkEvent> {
    let stream = match race_abort(manager.open_stream(&peer, protocol_name), abort).await {
        Ok(Ok(s)) => s,
        Ok(Err(e)) | Err(e) => return vec![NetworkEvent::Error { peer, error: e }],
    };

    let codec = Codec::new(max_message_size);
    let mut framed = Framed::new(stream, codec);

    match race_abort(framed.send(message), abort).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) | Err(e) => return vec![NetworkEvent::Error { peer, error: e }],
    }
    Vec::new()
}

/// Split a response into the opportunistic peer-discovery events plus the
/// response event itself, in the order described by [`send_request`].
fn events_from_response(peer: PeerId, response: Message) -> Vec<NetworkEvent> {
    let mut events =
        Vec::with_capacity(1 + response.closer_peers.len() + response.provider_peers.len());
    for p in &response.closer_peers {
        events.push(NetworkEvent::PeerObserved {
            peer: p.peer_id.clone(),
            addrs: p.addrs.clone(),
        });
    }
    for p in &response.provider_peers {
        events.push(NetworkEvent::PeerObserved {
            peer: p.peer_id.clone(),
            addrs: p.addrs.clone(),
        });
    }
    events.push(NetworkEvent::Response {
        peer,
        message: response,
    });
    events
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{ConnectionType, MessageType, Peer};
    use futures::executor::block_on;

    #[test]
    fn events_from_response_surfaces_closer_peers_before_response() {
        let response = Message {
            ty: MessageType::FindNode,
            key: None,
            record: None,
            cluster_level: 0,
            closer_peers: vec![Peer {
                peer_id: PeerId::new(vec![7]),
                addrs: vec![b"/ip4/127.0.0.1/tcp/4001".to_vec()],
                connection: ConnectionType::Connected,
            }],
            provider_peers: vec![Peer {
                peer_id: PeerId::new(vec![8]),
                addrs: vec![],
                connection: ConnectionType::CanConnect,
            }],
        };

        let events = events_from_response(PeerId::new(vec![1]), response);

        assert_eq!(events.len(), 3);
        assert!(matches!(events[0], NetworkEvent::PeerObserved { .. }));
        assert!(matches!(events[1], NetworkEvent::PeerObserved { .. }));
        assert!(matches!(events[2], NetworkEvent::Response { .. }));
    }

    /// A manager whose `open_stream` always fails, exercising the
    /// dial-failure path without needing a real transport.
    struct AlwaysFails;

    #[async_trait]
    impl ConnectionManager for AlwaysFails {
        async fn open_stream(&self, _peer: &PeerId, _protocol_name: &str) -> Result<Stream, Error> {
            Err(Error::DialFailed("no route".into()))
        }
    }

    #[test]
    fn send_request_surfaces_dial_failure() {
        let events = block_on(send_request(
            &AlwaysFails,
            "/kad/1.0.0",
            16 * 1024,
            PeerId::new(vec![1]),
            Message::find_node(b"x".to_vec()),
            &AbortHandle::new(),
        ));
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], NetworkEvent::Error { .. }));
    }

    #[test]
    fn send_request_reports_aborted_when_already_cancelled() {
        let abort = AbortHandle::new();
        abort.abort();
        let events = block_on(send_request(
            &AlwaysFails,
            "/kad/1.0.0",
            16 * 1024,
            PeerId::new(vec![1]),
            Message::find_node(b"x".to_vec()),
            &abort,
        ));
        assert_eq!(events.len(), 1);
        assert!(matches!(
            events[0],
            NetworkEvent::Error {
                error: Error::Aborted,
                ..
            }
        ));
    }
}
