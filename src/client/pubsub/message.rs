/*
 * Copyright 2026 Ben Ashford
 *
 * Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
 * http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
 * <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
 * option. This file may not be copied, modified, or distributed
 * except according to those terms.
 */

use crate::{
    error::{self, Error},
    protocol::{FromResp, RespValue},
};

/// A message published to a channel this connection is subscribed to.
#[derive(Debug, Clone, PartialEq)]
pub struct PubsubMessage {
    pub channel: String,
    /// The pattern that matched, for messages received through `psubscribe`
    pub pattern: Option<String>,
    pub payload: RespValue,
}

impl PubsubMessage {
    /// Convert the payload, e.g. into a `String`.
    pub fn payload_as<T: FromResp>(&self) -> Result<T, Error> {
        T::from_resp(self.payload.clone())
    }

    pub(crate) fn from_frame(frame: RespValue) -> Result<PubsubMessage, Error> {
        let parts = match frame {
            RespValue::Array(parts) | RespValue::Push(parts) => parts,
            _ => {
                return Err(error::unexpected(
                    "PUBSUB message should be encoded as an array",
                ));
            }
        };
        let mut parts = parts.into_iter();
        let kind = parts.next().map(String::from_resp);
        match (kind, parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(Ok(kind)), Some(channel), Some(payload), None, None) if kind == "message" => {
                Ok(PubsubMessage {
                    channel: String::from_resp(channel)?,
                    pattern: None,
                    payload,
                })
            }
            (Some(Ok(kind)), Some(pattern), Some(channel), Some(payload), None)
                if kind == "pmessage" =>
            {
                Ok(PubsubMessage {
                    channel: String::from_resp(channel)?,
                    pattern: Some(String::from_resp(pattern)?),
                    payload,
                })
            }
            _ => Err(error::unexpected("Incorrect format of a PUBSUB message")),
        }
    }
}

/// How an incoming frame relates to pub/sub.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FrameKind {
    /// A published message
    Message,
    /// A (un)subscribe confirmation with the number of subscriptions still active
    Ack(i64),
    /// Not pub/sub related
    Other,
}

fn kind_name(value: &RespValue) -> Option<&[u8]> {
    match value {
        RespValue::BulkString(bytes) => Some(bytes.as_slice()),
        RespValue::SimpleString(string) => Some(string.as_bytes()),
        _ => None,
    }
}

pub(crate) fn frame_kind(frame: &RespValue) -> FrameKind {
    let parts = match frame.as_elements() {
        Some(parts) => parts,
        None => return FrameKind::Other,
    };
    let name = match parts.first().and_then(kind_name) {
        Some(name) => name,
        None => return FrameKind::Other,
    };
    match (name, parts.len()) {
        (b"message", 3) | (b"pmessage", 4) => FrameKind::Message,
        (b"subscribe" | b"psubscribe" | b"unsubscribe" | b"punsubscribe", 3) => match parts[2] {
            RespValue::Integer(count) => FrameKind::Ack(count),
            _ => FrameKind::Other,
        },
        _ => FrameKind::Other,
    }
}

/// What a subscription acknowledgement confirms.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Ack {
    Subscribe(String),
    Psubscribe(String),
    Unsubscribe(Option<String>),
    Punsubscribe(Option<String>),
}

impl Ack {
    pub(crate) fn from_frame(frame: RespValue) -> Result<Ack, Error> {
        let frame = frame.into_result()?;
        let (name, topic) = match frame {
            RespValue::Array(parts) | RespValue::Push(parts) if parts.len() == 3 => {
                let mut parts = parts.into_iter();
                match (parts.next(), parts.next()) {
                    (Some(name), Some(topic)) => (String::from_resp(name)?, topic),
                    _ => return Err(error::unexpected("Subscription acknowledgement too short")),
                }
            }
            other => {
                return Err(error::resp(
                    "Not a subscription acknowledgement",
                    other,
                ));
            }
        };
        let topic = Option::<String>::from_resp(topic)?;
        match (name.as_str(), topic) {
            ("subscribe", Some(topic)) => Ok(Ack::Subscribe(topic)),
            ("psubscribe", Some(topic)) => Ok(Ack::Psubscribe(topic)),
            ("unsubscribe", topic) => Ok(Ack::Unsubscribe(topic)),
            ("punsubscribe", topic) => Ok(Ack::Punsubscribe(topic)),
            (name, _) => Err(error::unexpected(format!(
                "Unexpected subscription acknowledgement: {}",
                name
            ))),
        }
    }
}
