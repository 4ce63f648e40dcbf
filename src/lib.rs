/*
 * Copyright 2017-2026 Ben Ashford
 *
 * Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
 * http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
 * <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
 * option. This file may not be copied, modified, or distributed
 * except according to those terms.
 */

//! A single-connection Redis client using Tokio and Futures.
//!
//! Three interfaces are provided: a low-level one that makes no assumptions about how Redis is
//! used; a `Dispatcher`, suitable for the vast majority of use-cases; and a `PubsubConnection`
//! specifically for Redis's PUBSUB functionality.
//!
//! ## Low-level
//!
//! [`client::connect::connect`](client/connect/fn.connect.html) returns a framed connection
//! that is both a `Sink` of [`Command`](protocol/struct.Command.html)s and a `Stream` of
//! [`RespValue`](protocol/enum.RespValue.html)s.  The two halves work independently of one
//! another to allow pipelining, and it is the responsibility of the caller to match responses
//! to requests.
//!
//! ## Dispatcher
//!
//! [`client::connect`](client/fn.connect.html) returns a
//! [`Dispatcher`](client/struct.Dispatcher.html).  Commands are queued in the order that
//! [`send`](client/struct.Dispatcher.html#method.send) is called, regardless of how the future
//! is realised, and written one at a time.  If the connection fails with a retriable error the
//! command is sent again over a new connection; commands queued behind it wait and are never
//! reordered.
//!
//! ## PUBSUB
//!
//! A connection will subscribe to one or more channels or patterns, then receive all messages
//! published to them, so the single-request/single-response model does not apply.
//! [`client::pubsub_connect`](client/fn.pubsub_connect.html) resolves to a
//! [`PubsubConnection`](client/struct.PubsubConnection.html) whose `receive` stream survives
//! reconnects: subscriptions are restored before the stream continues.
//!
//! ## RESP3
//!
//! Set [`ProtocolVersion::Resp3`](client/enum.ProtocolVersion.html) on the `ConnectionBuilder`
//! to negotiate RESP3 with `HELLO 3`.  Maps, sets, doubles, booleans and push frames all decode
//! to their own `RespValue` variants.

#[macro_use]
pub mod protocol;

pub mod backoff;
pub mod client;
pub mod error;

mod task;

pub use self::{
    backoff::{Backoff, ExponentialBackoff},
    client::{connect, pubsub_connect, ConnectionBuilder, Dispatcher, PubsubConnection},
    error::Error,
    protocol::{Command, FromResp, RespValue},
};
