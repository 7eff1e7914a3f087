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

//! Error kinds shared by the routing table, network layer, query engine and
//! RPC handler.

use std::io;

/// Top-level error type for the crate.
///
/// Per-peer failures that occur while a query is in flight are never
/// represented by this type; they're carried as data inside
/// [`crate::query::QueryEvent::QueryError`] so that one bad peer never
/// aborts a lookup. This type is reserved for failures that are fatal to a
/// single operation (or to startup).
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A received or locally-constructed record failed namespace validation.
    #[error("record failed validation")]
    InvalidRecord,

    /// A stream was opened and a request written, but no response arrived
    /// before the remote closed the stream.
    #[error("no message received on stream")]
    NoMessageReceived,

    /// The operation did not complete before its deadline.
    #[error("operation timed out")]
    Timeout,

    /// The operation was cancelled via its abort signal.
    #[error("operation aborted")]
    Aborted,

    /// Opening a connection or stream to the remote failed.
    #[error("dial failed: {0}")]
    DialFailed(String),

    /// The stream was reset by the remote or the local transport.
    #[error("stream reset")]
    StreamReset,

    /// The remote does not speak a protocol we understand.
    #[error("protocol mismatch")]
    ProtocolMismatch,

    /// An operation was attempted before the routing table finished
    /// initializing (e.g. before the local identifier was known).
    #[error("routing table not initialized")]
    TableNotInitialized,

    /// A store operation could not be honored because of a zero-sized or
    /// otherwise unsatisfiable capacity bound.
    #[error("store is full")]
    StoreFull,

    /// Wire-format framing or protobuf decoding failed.
    #[error("failed to decode message: {0}")]
    Decode(String),

    /// Protobuf encoding failed, or a message exceeded the size limit.
    #[error("failed to encode message: {0}")]
    Encode(String),

    /// Underlying I/O failure from the transport (construction-time only;
    /// per-request I/O failures are `query_error` events, not this).
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Classification attached to a [`crate::query::QueryEvent::QueryError`].
///
/// This is deliberately a smaller set than [`Error`]: it's the subset of
/// failure modes that can happen to a single outbound request and that the
/// query engine needs to reason about (e.g. to decide whether a peer is
/// still worth reinserting into the routing table).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueryErrorKind {
    #[error("no message received on stream")]
    NoMessageReceived,
    #[error("operation timed out")]
    Timeout,
    #[error("operation aborted")]
    Aborted,
    #[error("dial failed: {0}")]
    DialFailed(String),
    #[error("stream reset")]
    StreamReset,
    #[error("protocol mismatch")]
    ProtocolMismatch,
}

pub type Result<T> = std::result::Result<T, Error>;
