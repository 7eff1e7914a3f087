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

//! Records and the namespace-level validator/selector seam.

pub mod provider_store;
pub mod store;

use crate::identifier::PeerId;
use std::time::SystemTime;

/// A PUT_VALUE/GET_VALUE record: an opaque key/value pair plus receipt
/// time, mirroring the wire `Record` message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Record {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
    pub time_received: Option<SystemTime>,
}

impl Record {
    pub fn new(key: Vec<u8>, value: Vec<u8>) -> Self {
        Record {
            key,
            value,
            time_received: Some(SystemTime::now()),
        }
    }
}

/// A provider record: a peer asserting it can serve `key`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProviderRecord {
    pub key: Vec<u8>,
    pub provider: PeerId,
    pub received: SystemTime,
}

/// Namespace-specific acceptance check for a [`Record`]. The namespace is
/// conventionally the first path segment of the key (e.g. `/pk/...`), but
/// this crate never interprets the key itself — it only ever dispatches to
/// whichever validator was registered for the relevant namespace by the
/// embedding application, per the specification's "validators are
/// pluggable, not prescribed" non-goal.
pub trait Validator: Send + Sync {
    /// Does `record` pass validation for `key`'s namespace?
    fn validate(&self, key: &[u8], record: &Record) -> bool;
}

/// Namespace-specific choice among multiple valid records for the same key.
/// Returns the index of the best record in `records`.
pub trait Selector: Send + Sync {
    fn select(&self, key: &[u8], records: &[Record]) -> usize;
}

/// A validator that accepts everything; useful when the embedding
/// application registers no validators for a namespace; per spec this is
/// the explicit non-goal of prescribing validation, not a default to ship
/// into production.
pub struct AcceptAllValidator;
impl Validator for AcceptAllValidator {
    fn validate(&self, _key: &[u8], _record: &Record) -> bool {
        true
    }
}

/// A selector that always keeps the first record seen; again, a
/// deliberately minimal fallback, not a prescribed policy.
pub struct FirstSelector;
impl Selector for FirstSelector {
    fn select(&self, _key: &[u8], _records: &[Record]) -> usize {
        0
    }
}
