/*
 * Copyright 2017-2026 Ben Ashford
 *
 * Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
 * http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
 * <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
 * option. This file may not be copied, modified, or distributed
 * except according to those terms.
 */

//! Error handling

use std::{error, fmt, io};

use futures_channel::oneshot;

use crate::protocol::RespValue;

#[derive(Debug)]
pub enum Error {
    /// A non-specific internal error that prevented an operation from completing
    Internal(String),

    /// An error raised by the underlying transport, carrying whether a reconnect-and-resend
    /// could plausibly resolve it
    Transport(TransportError),

    /// A RESP parsing/serialising error occurred, the stream that produced it can no longer be
    /// trusted
    RESP(String, Option<RespValue>),

    /// A remote error, i.e. an error reply sent by the Redis server in response to a command
    Remote(String),

    /// An operation was attempted on a connection in a state that does not allow it
    Connection(ConnectionReason),

    /// The retry budget was used up, the last error encountered is attached
    RetriesExhausted(u32, Box<Error>),

    /// The transport reached end-of-stream before a complete reply was read
    EndOfStream,

    /// An unexpected error.  In this context "unexpected" means
    /// "unexpected because we check ahead of time", it used to maintain the type signature of
    /// chains of futures; but it occurring at runtime should be considered a catastrophic
    /// failure.
    ///
    /// If any error is propagated this way that needs to be handled, then it should be made into
    /// a proper option.
    Unexpected(String),
}

pub(crate) fn internal(msg: impl Into<String>) -> Error {
    Error::Internal(msg.into())
}

pub(crate) fn unexpected(msg: impl Into<String>) -> Error {
    Error::Unexpected(msg.into())
}

pub(crate) fn resp(msg: impl Into<String>, resp: RespValue) -> Error {
    Error::RESP(msg.into(), Some(resp))
}

impl Error {
    /// Wrap an IO error raised by a transport, stating explicitly whether it is retriable.
    ///
    /// Custom `Connector` implementations can use this when the default classification of
    /// `io::ErrorKind`s does not suit the transport.
    pub fn transport(source: io::Error, retriable: bool) -> Error {
        Error::Transport(TransportError { source, retriable })
    }

    /// Whether a reconnect followed by re-sending the same command could succeed.
    pub fn is_retriable(&self) -> bool {
        match self {
            Error::Transport(err) => err.retriable,
            Error::EndOfStream => true,
            Error::Internal(_)
            | Error::RESP(_, _)
            | Error::Remote(_)
            | Error::Connection(_)
            | Error::RetriesExhausted(_, _)
            | Error::Unexpected(_) => false,
        }
    }
}

/// An IO error tagged, at the point it left the transport, with its retry classification.
#[derive(Debug)]
pub struct TransportError {
    source: io::Error,
    retriable: bool,
}

impl TransportError {
    pub fn kind(&self) -> io::ErrorKind {
        self.source.kind()
    }

    pub fn is_retriable(&self) -> bool {
        self.retriable
    }

    pub fn into_inner(self) -> io::Error {
        self.source
    }
}

fn is_retriable_kind(kind: io::ErrorKind) -> bool {
    matches!(
        kind,
        io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionRefused
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::NotConnected
            | io::ErrorKind::UnexpectedEof
    )
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Error {
        let retriable = is_retriable_kind(err.kind());
        Error::transport(err, retriable)
    }
}

impl From<oneshot::Canceled> for Error {
    fn from(err: oneshot::Canceled) -> Error {
        Error::Unexpected(format!("Oneshot was cancelled before use: {}", err))
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Error::Transport(err) => Some(&err.source),
            Error::RetriesExhausted(_, err) => Some(err.as_ref()),
            _ => None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Internal(s) => write!(f, "{}", s),
            Error::Transport(err) => write!(f, "{}", err.source),
            Error::RESP(s, _) => write!(f, "{}", s),
            Error::Remote(s) => write!(f, "{}", s),
            Error::Connection(ConnectionReason::Closed) => write!(f, "Connection has been closed"),
            Error::Connection(ConnectionReason::NotConnected) => {
                write!(f, "Connection is not currently connected")
            }
            Error::RetriesExhausted(attempts, err) => {
                write!(f, "Gave up after {} retries, last error: {}", attempts, err)
            }
            Error::EndOfStream => write!(f, "End of stream"),
            Error::Unexpected(err) => write!(f, "{}", err),
        }
    }
}

/// Details of a `ConnectionError`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionReason {
    /// The connection was closed, either explicitly or because connecting failed for good; no
    /// further commands will be accepted
    Closed,
    /// The connection is not currently connected, the next command will attempt to reconnect
    NotConnected,
}
