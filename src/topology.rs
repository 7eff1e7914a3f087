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

//! Bridges peers discovered by whatever the host uses for peer-discovery
//! (mDNS, a rendezvous protocol, a bootstrap list...) into routing-table
//! insertion.
//!
//! Kept as a plain, construction-time-injected listener rather than global
//! state, per the design note that LAN/WAN instantiation keeps every flag
//! (including which table a listener feeds) a constructor parameter.

use crate::identifier::PeerId;
use crate::kbucket::RoutingTable;

/// Fed one discovered peer at a time; the embedding application calls this
/// from its own peer-discovery plumbing (a connection-established
/// callback, an mDNS response handler, and so on).
pub trait TopologyListener: Send + Sync {
    fn on_peer_discovered(&mut self, peer: PeerId);
}

/// The default listener: every discovered peer is offered straight to a
/// [`RoutingTable`]. Constructed once per table (so twice, for a node
/// running both a LAN and a WAN table).
pub struct RoutingTableListener<'a> {
    table: &'a mut RoutingTable,
}

impl<'a> RoutingTableListener<'a> {
    pub fn new(table: &'a mut RoutingTable) -> Self {
        RoutingTableListener { table }
    }
}

impl<'a> TopologyListener for RoutingTableListener<'a> {
    fn on_peer_discovered(&mut self, peer: PeerId) {
        self.table.add(peer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kbucket::ping_queue::Pinger;
    use async_trait::async_trait;
    use std::sync::Arc;

    struct NeverPing;
    #[async_trait]
    impl Pinger for NeverPing {
        async fn ping(&self, _peer: &PeerId) -> bool {
            true
        }
    }

    #[test]
    fn discovered_peers_land_in_the_table() {
        let mut table = RoutingTable::new(PeerId::new(vec![0]), 20, Arc::new(NeverPing), 1);
        {
            let mut listener = RoutingTableListener::new(&mut table);
            listener.on_peer_discovered(PeerId::new(vec![1]));
            listener.on_peer_discovered(PeerId::new(vec![2]));
        }
        assert_eq!(table.size(), 2);
    }
}
