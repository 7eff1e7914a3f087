//! A fully in-process "network" for exercising the wire protocol without a
//! real transport: `open_stream` for peer B, issued by peer A, is routed
//! straight into B's own [`kad_dht::Behaviour::handle_inbound`]. Every
//! request still goes through the real length-prefixed protobuf codec, so
//! this exercises the actual framing, not a shortcut around it.

use async_trait::async_trait;
use asynchronous_codec::{Decoder, Encoder};
use bytes::BytesMut;
use futures::io::{AsyncRead, AsyncWrite};
use kad_dht::{Behaviour, Codec, ConnectionManager, Error, Message, PeerId, Pinger, Stream};
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

const TEST_FRAME_CAP: usize = 64 * 1024;

#[derive(Clone, Default)]
pub struct LoopbackNetwork {
    peers: Arc<Mutex<HashMap<PeerId, Arc<Mutex<Behaviour>>>>>,
}

impl LoopbackNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, peer: PeerId, behaviour: Arc<Mutex<Behaviour>>) {
        self.peers.lock().unwrap().insert(peer, behaviour);
    }

    /// A [`ConnectionManager`] that dials through this network as `caller`.
    pub fn handle(&self, caller: PeerId) -> Arc<dyn ConnectionManager> {
        Arc::new(LoopbackManager {
            network: self.clone(),
            caller,
        })
    }
}

struct LoopbackManager {
    network: LoopbackNetwork,
    caller: PeerId,
}

#[async_trait]
impl ConnectionManager for LoopbackManager {
    async fn open_stream(&self, peer: &PeerId, _protocol_name: &str) -> Result<Stream, Error> {
        let target = self
            .network
            .peers
            .lock()
            .unwrap()
            .get(peer)
            .cloned()
            .ok_or_else(|| Error::DialFailed(format!("no such peer: {}", peer)))?;
        Ok(Box::pin(LoopbackStream {
            target,
            caller: self.caller.clone(),
            write_buf: BytesMut::new(),
            read_buf: BytesMut::new(),
            codec: Codec::new(TEST_FRAME_CAP),
        }))
    }
}

/// One half of a synchronous request/reply stream: bytes written accumulate
/// until a full frame decodes, at which point the dispatch happens
/// immediately and the encoded reply is queued for reading. Request and
/// reply never overlap in time, so `poll_write`/`poll_read` always resolve
/// in one step without ever needing `Poll::Pending`.
struct LoopbackStream {
    target: Arc<Mutex<Behaviour>>,
    caller: PeerId,
    write_buf: BytesMut,
    read_buf: BytesMut,
    codec: Codec,
}

impl AsyncWrite for LoopbackStream {
    fn poll_write(self: Pin<&mut Self>, _cx: &mut Context<'_>, buf: &[u8]) -> Poll<std::io::Result<usize>> {
        let this = self.get_mut();
        this.write_buf.extend_from_slice(buf);
        while let Ok(Some(message)) = this.codec.decode(&mut this.write_buf) {
            let reply = this.target.lock().unwrap().handle_inbound(&message, &this.caller);
            if let Some(reply) = reply {
                let _ = this.codec.encode(reply, &mut this.read_buf);
            }
        }
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_close(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

impl AsyncRead for LoopbackStream {
    fn poll_read(self: Pin<&mut Self>, _cx: &mut Context<'_>, buf: &mut [u8]) -> Poll<std::io::Result<usize>> {
        let this = self.get_mut();
        let n = buf.len().min(this.read_buf.len());
        if n == 0 {
            // Nothing queued: every message in these tests gets exactly one
            // reply and the caller only reads once it has already written,
            // so this means the peer had nothing to say (e.g. ADD_PROVIDER).
            return Poll::Ready(Ok(0));
        }
        buf[..n].copy_from_slice(&this.read_buf[..n]);
        let _ = this.read_buf.split_to(n);
        Poll::Ready(Ok(n))
    }
}

/// A [`Pinger`] that always reports the candidate alive; none of these
/// tests race a bucket eviction, so arbitration never needs to matter.
pub struct AlwaysAlive;

#[async_trait]
impl Pinger for AlwaysAlive {
    async fn ping(&self, _peer: &PeerId) -> bool {
        true
    }
}
