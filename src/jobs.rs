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

//! Periodic background work: routing-table refresh and the query-self loop.
//!
//! Both are plain timers built on [`wasm_timer::Delay`], the way the
//! teacher's own `jobs.rs` schedules its periodic sweeps, generalized here
//! to per-bucket refresh targets instead of a single provider sweep.

use crate::identifier::{KeyBytes, PeerId};
use rand::RngCore;
use std::time::{Duration, Instant};
use wasm_timer::Delay;

/// Per-bucket refresh bookkeeping: when a bucket was last the target of a
/// successful or attempted refresh lookup.
pub struct RefreshSchedule {
    last_refreshed: Vec<Instant>,
    interval: Duration,
}

impl RefreshSchedule {
    pub fn new(bucket_count: usize, interval: Duration) -> Self {
        let now = Instant::now();
        RefreshSchedule {
            last_refreshed: vec![now; bucket_count],
            interval,
        }
    }

    /// Buckets whose last refresh is older than the configured interval,
    /// in bucket-index order.
    pub fn due_buckets(&self, now: Instant) -> Vec<usize> {
        self.last_refreshed
            .iter()
            .enumerate()
            .filter(|(_, &last)| now.duration_since(last) > self.interval)
            .map(|(i, _)| i)
            .collect()
    }

    /// All bucket indices, for a forced `refresh(true)`.
    pub fn all_buckets(&self) -> Vec<usize> {
        (0..self.last_refreshed.len()).collect()
    }

    /// Mark `bucket` refreshed `at`, regardless of whether its lookup
    /// succeeded (per the specification: "set `last_refreshed = now`
    /// regardless of outcome").
    pub fn mark_refreshed(&mut self, bucket: usize, at: Instant) {
        if let Some(slot) = self.last_refreshed.get_mut(bucket) {
            *slot = at;
        }
    }
}

/// A random routing key whose common-prefix-length with `local` is exactly
/// `bucket`, i.e. a plausible member of that bucket, used as the refresh
/// lookup's target.
pub fn random_key_in_bucket(local: &KeyBytes, bucket: usize) -> KeyBytes {
    let local_bytes = local.as_bytes();
    let mut out = [0u8; 32];
    let mut rng = rand::thread_rng();
    rng.fill_bytes(&mut out);

    // Copy the first `bucket` bits from `local` so the generated key shares
    // exactly that much common prefix, then force bit `bucket` to differ.
    let full_bytes = bucket / 8;
    let rem_bits = bucket % 8;
    out[..full_bytes].copy_from_slice(&local_bytes[..full_bytes]);
    if full_bytes < 32 {
        let mask: u8 = if rem_bits == 0 {
            0
        } else {
            0xFFu8 << (8 - rem_bits)
        };
        let differing_bit = 0x80u8 >> rem_bits;
        let kept = local_bytes[full_bytes] & mask;
        let flipped = !local_bytes[full_bytes] & differing_bit;
        out[full_bytes] = (out[full_bytes] & !(mask | differing_bit)) | kept | flipped;
    }
    KeyBytes::from_bytes(out)
}

/// Sleep for `interval`, for the query-self and refresh timer loops to
/// `.await` between rounds.
pub async fn tick(interval: Duration) {
    let _ = Delay::new(interval).await;
}

/// A self-lookup target, per the query-self loop (`FIND_NODE(local_id)`).
pub fn self_lookup_target(local_peer: &PeerId) -> PeerId {
    local_peer.clone()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn due_buckets_empty_immediately_after_construction() {
        let schedule = RefreshSchedule::new(4, Duration::from_secs(600));
        assert!(schedule.due_buckets(Instant::now()).is_empty());
    }

    #[test]
    fn due_buckets_reports_stale_entries() {
        let mut schedule = RefreshSchedule::new(4, Duration::from_millis(1));
        std::thread::sleep(Duration::from_millis(5));
        let due = schedule.due_buckets(Instant::now());
        assert_eq!(due.len(), 4);
        schedule.mark_refreshed(0, Instant::now());
        let due = schedule.due_buckets(Instant::now());
        assert!(!due.contains(&0));
    }

    #[test]
    fn random_key_in_bucket_has_matching_common_prefix_length() {
        let local = KeyBytes::new(b"local-peer");
        for bucket in [0usize, 3, 8, 17, 63, 200] {
            let key = random_key_in_bucket(&local, bucket);
            assert_eq!(local.common_prefix_len(&key), bucket as u32);
        }
    }
}
