/*
 * Copyright 2020-2026 Ben Ashford
 *
 * Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
 * http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
 * <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
 * option. This file may not be copied, modified, or distributed
 * except according to those terms.
 */

mod decode;
mod encode;

use std::io;

use bytes::{Buf, BytesMut};

use tokio_util::codec::{Decoder, Encoder};

use crate::{
    error::Error,
    protocol::{command::Command, resp::RespValue},
};

use self::decode::Frame;

/// Codec to read frames
///
/// Decodes every RESP2 and RESP3 type.  Error replies are produced as `RespValue::Error` so that
/// the stream stays framed; turning them into a typed error is the job of whoever owns the
/// pending request.
#[derive(Debug, Default)]
pub struct RespCodec {
    /// The outermost aggregate of a reply that has only partly arrived
    partial: Option<decode::Partial>,
}

impl Decoder for RespCodec {
    type Item = RespValue;
    type Error = Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if self.partial.is_none() {
            match decode::decode_frame(buf)? {
                Frame::Incomplete => return Ok(None),
                Frame::Complete(pos, item) => {
                    buf.advance(pos);
                    return Ok(Some(item));
                }
                Frame::Started(pos, partial) => {
                    buf.advance(pos);
                    self.partial = Some(partial);
                }
            }
        }

        let partial = match self.partial.as_mut() {
            Some(partial) => partial,
            None => return Ok(None),
        };
        let pos = match partial.fill(buf) {
            Ok(pos) => pos,
            Err(e) => {
                self.partial = None;
                return Err(e);
            }
        };
        buf.advance(pos);
        if !partial.is_complete() {
            return Ok(None);
        }
        Ok(self.partial.take().map(decode::Partial::finish))
    }
}

impl<'a> Encoder<&'a Command> for RespCodec {
    type Error = io::Error;

    fn encode(&mut self, command: &'a Command, buf: &mut BytesMut) -> Result<(), Self::Error> {
        encode::encode_command(command, buf);
        Ok(())
    }
}

impl Encoder<Command> for RespCodec {
    type Error = io::Error;

    fn encode(&mut self, command: Command, buf: &mut BytesMut) -> Result<(), Self::Error> {
        encode::encode_command(&command, buf);
        Ok(())
    }
}

impl Encoder<RespValue> for RespCodec {
    type Error = io::Error;

    fn encode(&mut self, msg: RespValue, buf: &mut BytesMut) -> Result<(), Self::Error> {
        encode::encode(msg, buf);
        Ok(())
    }
}
