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

//! Peer identifiers, routing keys and XOR distance.
//!
//! A [`PeerId`] is an opaque byte string (the host overlay's concern is
//! deriving it from a public key; we never look inside it). A [`Key`] is
//! the SHA-256 routing key derived from either a `PeerId` or an arbitrary
//! content key, plus the original value it was derived from.

use sha2::{Digest, Sha256};
use std::cmp::Ordering;
use std::hash::Hash;
use uint::construct_uint;

construct_uint! {
    /// A 256-bit big-endian integer, used to represent XOR distance between
    /// two routing keys.
    pub struct U256(4);
}

/// An opaque peer identifier. The host overlay is responsible for deriving
/// this from a peer's public key; this crate only ever treats it as bytes.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PeerId(Vec<u8>);

impl PeerId {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        PeerId(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }
}

impl AsRef<[u8]> for PeerId {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl std::fmt::Display for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for byte in &self.0 {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

/// The 32-byte SHA-256 routing key bytes shared by [`Key`] and [`Distance`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct KeyBytes([u8; 32]);

impl KeyBytes {
    /// Hash arbitrary bytes into a routing key, per the specification:
    /// "the routing key for an external key is SHA-256 of that key's
    /// bytes"; a peer's routing key is SHA-256 of its identifier bytes.
    pub fn new(bytes: impl AsRef<[u8]>) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(bytes.as_ref());
        let digest = hasher.finalize();
        let mut buf = [0u8; 32];
        buf.copy_from_slice(&digest);
        KeyBytes(buf)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Wrap already-hashed bytes directly, for callers that construct a key
    /// by bit-manipulation rather than hashing (the refresh job's
    /// per-bucket random target).
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        KeyBytes(bytes)
    }

    /// XOR distance to another routing key.
    pub fn distance(&self, other: &KeyBytes) -> Distance {
        let mut xor = [0u8; 32];
        for i in 0..32 {
            xor[i] = self.0[i] ^ other.0[i];
        }
        Distance(U256::from_big_endian(&xor))
    }

    /// Count of leading equal bits between two routing keys, in `[0, 256]`.
    pub fn common_prefix_len(&self, other: &KeyBytes) -> u32 {
        let mut cpl = 0u32;
        for i in 0..32 {
            let xor = self.0[i] ^ other.0[i];
            if xor == 0 {
                cpl += 8;
            } else {
                cpl += xor.leading_zeros();
                break;
            }
        }
        cpl
    }
}

/// A value paired with the routing key derived from it.
///
/// `T` is typically a [`PeerId`] (for routing-table keys) or a `Vec<u8>`
/// content key (for provider/record lookups).
#[derive(Clone, Debug)]
pub struct Key<T> {
    preimage: T,
    bytes: KeyBytes,
}

impl<T: AsRef<[u8]>> Key<T> {
    pub fn new(preimage: T) -> Self {
        let bytes = KeyBytes::new(&preimage);
        Key { preimage, bytes }
    }
}

impl<T> Key<T> {
    pub fn preimage(&self) -> &T {
        &self.preimage
    }

    pub fn into_preimage(self) -> T {
        self.preimage
    }

    pub fn distance<U>(&self, other: &Key<U>) -> Distance {
        self.bytes.distance(&other.bytes)
    }

    pub fn common_prefix_len<U>(&self, other: &Key<U>) -> u32 {
        self.bytes.common_prefix_len(&other.bytes)
    }
}

impl<T> AsRef<KeyBytes> for Key<T> {
    fn as_ref(&self) -> &KeyBytes {
        &self.bytes
    }
}

impl<T: PartialEq> PartialEq for Key<T> {
    fn eq(&self, other: &Self) -> bool {
        self.preimage == other.preimage
    }
}
impl<T: Eq> Eq for Key<T> {}

impl<T: Hash> Hash for Key<T> {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.preimage.hash(state)
    }
}

impl From<PeerId> for Key<PeerId> {
    fn from(p: PeerId) -> Self {
        let bytes = KeyBytes::new(p.as_bytes());
        Key {
            preimage: p,
            bytes,
        }
    }
}

/// XOR distance between two routing keys, ordered so that `Distance(0)` is
/// nearest.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Distance(U256);

impl Distance {
    /// Number of leading zero bits, i.e. the common-prefix-length implied by
    /// this distance.
    pub fn leading_zeros(&self) -> u32 {
        (self.0).leading_zeros()
    }

    pub fn ilog2(&self) -> Option<u32> {
        if self.0.is_zero() {
            None
        } else {
            Some(255 - self.leading_zeros())
        }
    }
}

/// Stable sort of `items` ascending by XOR distance to `target`.
///
/// Ties (equal distance, which can only happen for identical keys) are
/// broken by insertion order, since [`Vec::sort_by_key`] is a stable sort.
pub fn sort_by_distance<T, F>(items: &mut Vec<T>, target: &KeyBytes, key_of: F)
where
    F: Fn(&T) -> KeyBytes,
{
    items.sort_by_key(|item| key_of(item).distance(target));
}

impl PartialOrd for KeyBytes {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.0.cmp(&other.0))
    }
}
impl Ord for KeyBytes {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.cmp(&other.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_keys_have_zero_distance_and_full_cpl() {
        let a = KeyBytes::new(b"same-input");
        let b = KeyBytes::new(b"same-input");
        assert_eq!(a.distance(&b).0, U256::zero());
        assert_eq!(a.common_prefix_len(&b), 256);
    }

    #[test]
    fn distance_is_symmetric() {
        let a = KeyBytes::new(b"alpha");
        let b = KeyBytes::new(b"beta");
        assert_eq!(a.distance(&b), b.distance(&a));
    }

    #[test]
    fn cpl_matches_leading_zeros_of_distance() {
        let a = KeyBytes::new(b"alpha");
        let b = KeyBytes::new(b"beta");
        assert_eq!(a.common_prefix_len(&b), a.distance(&b).leading_zeros());
    }

    #[test]
    fn sort_by_distance_is_ascending_and_stable() {
        let target = KeyBytes::new(b"target");
        let mut items: Vec<KeyBytes> = (0..20u32)
            .map(|i| KeyBytes::new(&i.to_be_bytes()))
            .collect();
        sort_by_distance(&mut items, &target, |k| *k);
        for window in items.windows(2) {
            assert!(window[0].distance(&target) <= window[1].distance(&target));
        }
    }
}
