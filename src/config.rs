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

//! Construction-time configuration.

use std::time::Duration;

/// The mode a node runs in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Only issue queries; never answer inbound RPCs.
    Client,
    /// Answer inbound RPCs in addition to issuing queries.
    Server,
}

/// Construction-time options for a [`crate::behaviour::Behaviour`].
///
/// A plain, infallible-to-build data type: it performs no I/O. Mirrors the
/// options enumerated in the external-interfaces section of the
/// specification this crate implements.
#[derive(Debug, Clone)]
pub struct Config {
    pub(crate) k_bucket_size: usize,
    pub(crate) mode: Mode,
    pub(crate) protocol_prefix: String,
    pub(crate) lan: bool,
    pub(crate) query_self_interval: Duration,
    pub(crate) refresh_interval: Duration,
    pub(crate) provider_ttl: Duration,
    pub(crate) provider_record_cap: usize,
    pub(crate) provider_lru_cap: usize,
    pub(crate) provider_sweep_interval: Duration,
    pub(crate) ping_timeout: Duration,
    pub(crate) alpha: usize,
    pub(crate) disjoint_paths: usize,
    pub(crate) query_timeout: Duration,
    pub(crate) no_closer_rounds: usize,
    pub(crate) max_message_size: usize,
    pub(crate) get_value_quorum: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            k_bucket_size: 20,
            mode: Mode::Client,
            protocol_prefix: "/ipfs".to_string(),
            lan: false,
            query_self_interval: Duration::from_secs(60),
            refresh_interval: Duration::from_secs(10 * 60),
            provider_ttl: Duration::from_secs(24 * 60 * 60),
            provider_record_cap: 10,
            provider_lru_cap: 256,
            provider_sweep_interval: Duration::from_secs(60 * 60),
            ping_timeout: Duration::from_secs(10),
            alpha: 3,
            disjoint_paths: 10, // ceil(k_bucket_size / 2), recomputed in `with_k_bucket_size`
            query_timeout: Duration::from_secs(60),
            no_closer_rounds: 1,
            max_message_size: 16 * 1024,
            get_value_quorum: 1,
        }
    }
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_k_bucket_size(mut self, size: usize) -> Self {
        self.k_bucket_size = size;
        self.disjoint_paths = (size + 1) / 2;
        self
    }

    pub fn with_mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_protocol_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.protocol_prefix = prefix.into();
        self
    }

    pub fn with_lan(mut self, lan: bool) -> Self {
        self.lan = lan;
        self
    }

    pub fn with_query_self_interval(mut self, interval: Duration) -> Self {
        self.query_self_interval = interval;
        self
    }

    pub fn with_refresh_interval(mut self, interval: Duration) -> Self {
        self.refresh_interval = interval;
        self
    }

    pub fn with_provider_ttl(mut self, ttl: Duration) -> Self {
        self.provider_ttl = ttl;
        self
    }

    pub fn with_ping_timeout(mut self, timeout: Duration) -> Self {
        self.ping_timeout = timeout;
        self
    }

    pub fn with_alpha(mut self, alpha: usize) -> Self {
        self.alpha = alpha;
        self
    }

    pub fn with_disjoint_paths(mut self, d: usize) -> Self {
        self.disjoint_paths = d;
        self
    }

    pub fn with_query_timeout(mut self, timeout: Duration) -> Self {
        self.query_timeout = timeout;
        self
    }

    /// How many distinct valid records `GET_VALUE` collects before
    /// selecting a winner and running put-back; the specification leaves
    /// this quorum unnamed (see the open question recorded in DESIGN.md).
    pub fn with_get_value_quorum(mut self, quorum: usize) -> Self {
        self.get_value_quorum = quorum.max(1);
        self
    }

    /// The `/<prefix>/kad/1.0.0` or `/<prefix>/lan/kad/1.0.0` protocol name.
    pub fn protocol_name(&self) -> String {
        if self.lan {
            format!("{}/lan/kad/1.0.0", self.protocol_prefix)
        } else {
            format!("{}/kad/1.0.0", self.protocol_prefix)
        }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn k_bucket_size(&self) -> usize {
        self.k_bucket_size
    }
}
