/*
 * Copyright 2017-2026 Ben Ashford
 *
 * Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
 * http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
 * <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
 * option. This file may not be copied, modified, or distributed
 * except according to those terms.
 */

//! The client API itself.
//!
//! This contains three main functions that return three specific types of client:
//!
//! * `connect::connect` returns a `RespConnection`, a `Sink` of commands and a `Stream` of
//! replies.  Pairing requests to responses is up to the caller.  This is intended to be a
//! low-level interface from which more user-friendly interfaces can be built.
//! * `connect` returns a `Dispatcher`, used for most of the standard Redis commands, where one
//! request results in one response.
//! * `pubsub_connect` returns a `PubsubConnection` for Redis's PUBSUB functionality.
//!
//! All three are configured through a `ConnectionBuilder`.

mod builder;
pub mod connect;
mod dispatcher;
#[cfg(test)]
pub(crate) mod mock;
pub(crate) mod pubsub;

pub use self::{
    builder::{connect, ConnectionBuilder},
    connect::{Connector, ProtocolVersion, RespConnection, TcpConnector, Transport},
    dispatcher::Dispatcher,
    pubsub::{pubsub_connect, PubsubConnection, PubsubMessage},
};
