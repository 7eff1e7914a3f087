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

//! The local record half of the `Datastore` collaborator: what `PUT_VALUE`
//! and `GET_VALUE` read and write, sibling to the provider store.

use crate::record::Record;
use std::collections::HashMap;

/// In-memory local record store. See [`super::provider_store::ProviderStore`]
/// for the parallel discussion of the persistent-backing relationship.
#[derive(Default)]
pub struct RecordStore {
    records: HashMap<Vec<u8>, Record>,
}

impl RecordStore {
    pub fn new() -> Self {
        RecordStore {
            records: HashMap::new(),
        }
    }

    pub fn put(&mut self, record: Record) {
        self.records.insert(record.key.clone(), record);
    }

    pub fn get(&self, key: &[u8]) -> Option<&Record> {
        self.records.get(key)
    }

    pub fn remove(&mut self, key: &[u8]) -> Option<Record> {
        self.records.remove(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_then_get_round_trips() {
        let mut store = RecordStore::new();
        store.put(Record::new(b"k".to_vec(), b"v".to_vec()));
        assert_eq!(store.get(b"k").unwrap().value, b"v");
    }

    #[test]
    fn remove_drops_record() {
        let mut store = RecordStore::new();
        store.put(Record::new(b"k".to_vec(), b"v".to_vec()));
        assert!(store.remove(b"k").is_some());
        assert!(store.get(b"k").is_none());
    }
}
