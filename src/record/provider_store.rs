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

//! The provider store: CID → set of (provider, timestamp), bounded by a
//! per-CID cap and an overall LRU of distinct content keys, with lazy TTL
//! purging on read and a periodic background sweep.

use crate::error::Error;
use crate::identifier::PeerId;
use crate::record::ProviderRecord;
use lru::LruCache;
use std::time::{Duration, SystemTime};

/// In-memory provider store.
///
/// The specification names a persistent `Datastore` collaborator backing
/// this; as with the rest of the external interfaces in §6, this crate only
/// defines the in-memory cache in front of it. An application wiring a real
/// datastore does so by writing through on [`Self::add_provider`] and
/// reading it back to repopulate the cache at startup — this type doesn't
/// prescribe that integration.
pub struct ProviderStore {
    by_key: LruCache<Vec<u8>, Vec<ProviderRecord>>,
    per_key_cap: usize,
    ttl: Duration,
}

impl ProviderStore {
    pub fn new(lru_cap: usize, per_key_cap: usize, ttl: Duration) -> Result<Self, Error> {
        if lru_cap == 0 {
            return Err(Error::StoreFull);
        }
        Ok(ProviderStore {
            by_key: LruCache::new(lru_cap),
            per_key_cap,
            ttl,
        })
    }

    /// Record that `provider` can serve `key`, evicting the oldest entry
    /// for `key` if already at the per-key cap.
    pub fn add_provider(&mut self, key: Vec<u8>, provider: PeerId, now: SystemTime) {
        if self.by_key.get_mut(&key).is_none() {
            self.by_key.put(key.clone(), Vec::new());
        }
        let entry = self.by_key.get_mut(&key).expect("just inserted above");
        if let Some(existing) = entry.iter_mut().find(|r| r.provider == provider) {
            existing.received = now;
            return;
        }
        if entry.len() >= self.per_key_cap {
            // Oldest inserted provider for this key is evicted to make room,
            // matching the bucket eviction style used elsewhere: providers
            // are pushed in arrival order, so the front is oldest.
            entry.remove(0);
        }
        entry.push(ProviderRecord {
            key,
            provider,
            received: now,
        });
    }

    /// Non-expired providers for `key`, purging any expired entries found
    /// along the way (lazy purge on read, per the specification).
    pub fn get_providers(&mut self, key: &[u8], now: SystemTime) -> Vec<PeerId> {
        let ttl = self.ttl;
        let result = match self.by_key.get_mut(key) {
            Some(entry) => {
                entry.retain(|r| {
                    now.duration_since(r.received)
                        .map(|age| age < ttl)
                        .unwrap_or(true)
                });
                entry.iter().map(|r| r.provider.clone()).collect()
            }
            None => Vec::new(),
        };
        result
    }

    /// Remove all provider records older than the configured TTL across
    /// every key, in batches, for the periodic background sweep (default
    /// interval: 1 hour per the specification).
    pub fn sweep_expired(&mut self, now: SystemTime) -> usize {
        let ttl = self.ttl;
        let mut removed = 0usize;
        let keys: Vec<Vec<u8>> = self.by_key.iter().map(|(k, _)| k.clone()).collect();
        for key in keys {
            if let Some(entry) = self.by_key.get_mut(&key) {
                let before = entry.len();
                entry.retain(|r| {
                    now.duration_since(r.received)
                        .map(|age| age < ttl)
                        .unwrap_or(true)
                });
                removed += before - entry.len();
            }
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.by_key.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(n: u8) -> PeerId {
        PeerId::new(vec![n])
    }

    #[test]
    fn provider_expires_after_ttl() {
        let mut store = ProviderStore::new(256, 10, Duration::from_secs(60)).unwrap();
        let t0 = SystemTime::UNIX_EPOCH;
        store.add_provider(b"cid".to_vec(), peer(1), t0);
        assert_eq!(store.get_providers(b"cid", t0).len(), 1);

        let past_ttl = t0 + Duration::from_secs(61);
        assert!(store.get_providers(b"cid", past_ttl).is_empty());
    }

    #[test]
    fn per_cid_cap_evicts_oldest() {
        let mut store = ProviderStore::new(256, 2, Duration::from_secs(3600)).unwrap();
        let t0 = SystemTime::UNIX_EPOCH;
        store.add_provider(b"cid".to_vec(), peer(1), t0);
        store.add_provider(b"cid".to_vec(), peer(2), t0 + Duration::from_secs(1));
        store.add_provider(b"cid".to_vec(), peer(3), t0 + Duration::from_secs(2));

        let providers = store.get_providers(b"cid", t0 + Duration::from_secs(2));
        assert_eq!(providers.len(), 2);
        assert!(!providers.contains(&peer(1)));
    }

    #[test]
    fn lru_bounds_distinct_keys() {
        let mut store = ProviderStore::new(2, 10, Duration::from_secs(3600)).unwrap();
        let t0 = SystemTime::UNIX_EPOCH;
        store.add_provider(b"a".to_vec(), peer(1), t0);
        store.add_provider(b"b".to_vec(), peer(1), t0);
        store.add_provider(b"c".to_vec(), peer(1), t0);
        assert_eq!(store.len(), 2);
        assert!(store.get_providers(b"a", t0).is_empty());
    }
}
