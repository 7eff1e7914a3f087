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

//! A Kademlia-style distributed hash table for a peer-to-peer overlay.
//!
//! This crate implements the routing table, iterative lookup engine, wire
//! protocol and record/provider stores; it never opens a socket or maintains
//! a peer identity itself. An embedding application supplies a
//! [`network::ConnectionManager`] (how to open a stream to a peer),
//! registers any namespace [`record::Validator`]/[`record::Selector`]s it
//! cares about, and drives a [`behaviour::Behaviour`] from its own event
//! loop.
//!
//! ```ignore
//! let behaviour = Behaviour::new(local_peer, Config::new(), collaborators);
//! ```

mod error;
mod config;
mod identifier;
mod proto;
mod protocol;
mod kbucket;
mod record;
mod network;
mod query;
mod handler;
mod jobs;
mod behaviour;
mod topology;

pub use behaviour::{Behaviour, Collaborators};
pub use config::{Config, Mode};
pub use error::{Error, QueryErrorKind, Result};
pub use handler::{AddressFilter, NoopAddressFilter};
pub use identifier::{Distance, Key, KeyBytes, PeerId};
pub use jobs::RefreshSchedule;
pub use kbucket::{Event as RoutingEvent, InsertResult, KBucketsTable, Node, Pinger, PingQueue, RoutingTable};
pub use network::{AbortHandle, ConnectionManager, NetworkEvent, Stream};
pub use protocol::{Codec, ConnectionType, Message, MessageType, Peer};
pub use query::{PathStatus, QueryEvent, QueryTarget};
pub use record::provider_store::ProviderStore;
pub use record::store::RecordStore;
pub use record::{AcceptAllValidator, FirstSelector, ProviderRecord, Record, Selector, Validator};
pub use topology::{RoutingTableListener, TopologyListener};
