/*
 * Copyright 2020-2026 Ben Ashford
 *
 * Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
 * http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
 * <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
 * option. This file may not be copied, modified, or distributed
 * except according to those terms.
 */

use std::str;

use bytes::BytesMut;

use crate::{error::Error, protocol::resp::RespValue};

/// `Ok(None)` means the buffer does not yet hold a complete value, nothing has been consumed.
type DecodeResult = Result<Option<(usize, RespValue)>, Error>;

/// Largest bulk length or element count accepted, the same as Redis's `proto-max-bulk-len` default.
const MAX_LENGTH: i64 = 512 * 1024 * 1024;

#[inline]
fn parse_error(message: String) -> Error {
    Error::RESP(message, None)
}

/// Many RESP types have their length (which is either bytes or "number of elements", depending on context)
/// encoded as a string, terminated by "\r\n", this looks for them.
///
/// Only return the string if the whole sequence is complete, including the terminator bytes (but those final
/// two bytes will not be returned)
fn scan_integer(buf: &BytesMut, idx: usize) -> Result<Option<(usize, &[u8])>, Error> {
    let length = buf.len();
    let mut at_end = false;
    let mut pos = idx;
    loop {
        if length <= pos {
            return Ok(None);
        }
        match (at_end, buf[pos]) {
            (true, b'\n') => return Ok(Some((pos + 1, &buf[idx..pos - 1]))),
            (false, b'\r') => at_end = true,
            (false, b'0'..=b'9') => (),
            (false, b'-') => (),
            (_, val) => {
                return Err(parse_error(format!(
                    "Unexpected byte in size_string: {}",
                    val
                )));
            }
        }
        pos += 1;
    }
}

/// A line is any series of bytes terminated by `\r\n`; a lone `\r` or `\n` is a framing error.
fn scan_line(buf: &BytesMut, idx: usize) -> Result<Option<(usize, &[u8])>, Error> {
    let length = buf.len();
    let mut at_end = false;
    let mut pos = idx;
    loop {
        if length <= pos {
            return Ok(None);
        }
        match (at_end, buf[pos]) {
            (true, b'\n') => return Ok(Some((pos + 1, &buf[idx..pos - 1]))),
            (true, val) => {
                return Err(parse_error(format!(
                    "Expected line feed after carriage return, got: {}",
                    val
                )));
            }
            (false, b'\r') => at_end = true,
            (false, b'\n') => return Err(parse_error("Line feed without carriage return".into())),
            (false, _) => (),
        }
        pos += 1;
    }
}

fn scan_string(buf: &BytesMut, idx: usize) -> Result<Option<(usize, String)>, Error> {
    Ok(scan_line(buf, idx)?
        .map(|(pos, line)| (pos, String::from_utf8_lossy(line).into_owned())))
}

fn decode_raw_integer(buf: &BytesMut, idx: usize) -> Result<Option<(usize, i64)>, Error> {
    match scan_integer(buf, idx) {
        Ok(None) => Ok(None),
        Ok(Some((pos, int_str))) => {
            // Redis integers are transmitted as strings, so we first convert the raw bytes into a string...
            match str::from_utf8(int_str) {
                Ok(string) => {
                    // ...and then parse the string.
                    match string.parse() {
                        Ok(int) => Ok(Some((pos, int))),
                        Err(_) => Err(parse_error(format!("Not an integer: {}", string))),
                    }
                }
                Err(_) => Err(parse_error(format!("Not a valid string: {:?}", int_str))),
            }
        }
        Err(e) => Err(e),
    }
}

/// The payload of a length-prefixed type (`$`, `=`, `!`), or `None` for the RESP2 null length.
fn decode_blob(buf: &BytesMut, idx: usize) -> Result<Option<(usize, Option<&[u8]>)>, Error> {
    match decode_raw_integer(buf, idx)? {
        None => Ok(None),
        Some((pos, -1)) => Ok(Some((pos, None))),
        Some((_, size)) if size > MAX_LENGTH => Err(parse_error(format!(
            "String size {} exceeds the limit of {}",
            size, MAX_LENGTH
        ))),
        Some((pos, size)) if size >= 0 => {
            let size = size as usize;
            let remaining = buf.len() - pos;
            let required_bytes = size + 2;

            if remaining < required_bytes {
                return Ok(None);
            }
            if &buf[pos + size..pos + required_bytes] != b"\r\n" {
                return Err(parse_error(format!(
                    "Bulk data of length {} is not terminated by CRLF",
                    size
                )));
            }

            Ok(Some((pos + required_bytes, Some(&buf[pos..(pos + size)]))))
        }
        Some((_, size)) => Err(parse_error(format!("Invalid string size: {}", size))),
    }
}

fn decode_bulk_string(buf: &BytesMut, idx: usize) -> DecodeResult {
    Ok(decode_blob(buf, idx)?.map(|(pos, bytes)| match bytes {
        Some(bytes) => (pos, RespValue::BulkString(bytes.to_vec())),
        None => (pos, RespValue::Nil),
    }))
}

fn decode_blob_error(buf: &BytesMut, idx: usize) -> DecodeResult {
    Ok(decode_blob(buf, idx)?.map(|(pos, bytes)| match bytes {
        Some(bytes) => (pos, RespValue::Error(String::from_utf8_lossy(bytes).into_owned())),
        None => (pos, RespValue::Nil),
    }))
}

fn decode_verbatim(buf: &BytesMut, idx: usize) -> DecodeResult {
    match decode_blob(buf, idx)? {
        None => Ok(None),
        Some((pos, None)) => Ok(Some((pos, RespValue::Nil))),
        Some((pos, Some(bytes))) => {
            if bytes.len() < 4 || bytes[3] != b':' {
                return Err(parse_error(
                    "Verbatim string is missing its format prefix".into(),
                ));
            }
            let format = String::from_utf8_lossy(&bytes[..3]).into_owned();
            Ok(Some((pos, RespValue::Verbatim(format, bytes[4..].to_vec()))))
        }
    }
}

/// Reads `size` values starting at `pos`, or `Ok(None)` if any of them is incomplete.
fn decode_values(
    buf: &BytesMut,
    pos: usize,
    size: usize,
) -> Result<Option<(usize, Vec<RespValue>)>, Error> {
    let mut pos = pos;
    // Every value takes at least one byte, so the buffer bounds what can be reserved
    let mut values = Vec::with_capacity(size.min(buf.len().saturating_sub(pos)));
    for _ in 0..size {
        match decode(buf, pos)? {
            None => return Ok(None),
            Some((new_pos, value)) => {
                values.push(value);
                pos = new_pos;
            }
        }
    }
    Ok(Some((pos, values)))
}

/// The number of values an aggregate header announces.
fn aggregate_len(size: i64, elements_per_entry: usize) -> Result<usize, Error> {
    if !(0..=MAX_LENGTH).contains(&size) {
        return Err(parse_error(format!(
            "Aggregate size {} is outside 0..={}",
            size, MAX_LENGTH
        )));
    }
    (size as usize)
        .checked_mul(elements_per_entry)
        .ok_or_else(|| parse_error(format!("Aggregate size {} overflows", size)))
}

fn decode_aggregate<F>(
    buf: &BytesMut,
    idx: usize,
    elements_per_entry: usize,
    build: F,
) -> DecodeResult
where
    F: FnOnce(Vec<RespValue>) -> RespValue,
{
    match decode_raw_integer(buf, idx)? {
        None => Ok(None),
        Some((pos, -1)) => Ok(Some((pos, RespValue::Nil))),
        Some((pos, size)) => {
            let size = aggregate_len(size, elements_per_entry)?;
            Ok(decode_values(buf, pos, size)?.map(|(pos, values)| (pos, build(values))))
        }
    }
}

fn build_aggregate(tag: u8, values: Vec<RespValue>) -> RespValue {
    match tag {
        b'%' => RespValue::Map(into_pairs(values)),
        b'~' => RespValue::Set(values),
        b'>' => RespValue::Push(values),
        _ => RespValue::Array(values),
    }
}

fn into_pairs(values: Vec<RespValue>) -> Vec<(RespValue, RespValue)> {
    let mut pairs = Vec::with_capacity(values.len() / 2);
    let mut items = values.into_iter();
    while let (Some(k), Some(v)) = (items.next(), items.next()) {
        pairs.push((k, v));
    }
    pairs
}

/// Attributes annotate the value that follows them, the annotation is discarded.
fn decode_attribute(buf: &BytesMut, idx: usize) -> DecodeResult {
    match decode_aggregate(buf, idx, 2, RespValue::Array)? {
        None => Ok(None),
        Some((pos, _)) => decode(buf, pos),
    }
}

fn decode_integer(buf: &BytesMut, idx: usize) -> DecodeResult {
    match decode_raw_integer(buf, idx) {
        Ok(None) => Ok(None),
        Ok(Some((pos, int))) => Ok(Some((pos, RespValue::Integer(int)))),
        Err(e) => Err(e),
    }
}

/// A simple string is any series of bytes that ends with `\r\n`
fn decode_simple_string(buf: &BytesMut, idx: usize) -> DecodeResult {
    Ok(scan_string(buf, idx)?.map(|(pos, string)| (pos, RespValue::SimpleString(string))))
}

fn decode_error(buf: &BytesMut, idx: usize) -> DecodeResult {
    Ok(scan_string(buf, idx)?.map(|(pos, string)| (pos, RespValue::Error(string))))
}

fn decode_null(buf: &BytesMut, idx: usize) -> DecodeResult {
    match scan_line(buf, idx)? {
        None => Ok(None),
        Some((pos, b"")) => Ok(Some((pos, RespValue::Nil))),
        Some((_, line)) => Err(parse_error(format!(
            "Null must have an empty payload, got: {}",
            String::from_utf8_lossy(line)
        ))),
    }
}

fn decode_boolean(buf: &BytesMut, idx: usize) -> DecodeResult {
    match scan_line(buf, idx)? {
        None => Ok(None),
        Some((pos, b"t")) => Ok(Some((pos, RespValue::Boolean(true)))),
        Some((pos, b"f")) => Ok(Some((pos, RespValue::Boolean(false)))),
        Some((_, line)) => Err(parse_error(format!(
            "Not a boolean: {}",
            String::from_utf8_lossy(line)
        ))),
    }
}

fn decode_double(buf: &BytesMut, idx: usize) -> DecodeResult {
    match scan_string(buf, idx)? {
        None => Ok(None),
        Some((pos, string)) => match string.parse() {
            Ok(d) => Ok(Some((pos, RespValue::Double(d)))),
            Err(_) => Err(parse_error(format!("Not a double: {}", string))),
        },
    }
}

fn decode_big_number(buf: &BytesMut, idx: usize) -> DecodeResult {
    match scan_string(buf, idx)? {
        None => Ok(None),
        Some((pos, string)) => {
            let digits = string.strip_prefix(['-', '+']).unwrap_or(&string);
            if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
                return Err(parse_error(format!("Not a big number: {}", string)));
            }
            Ok(Some((pos, RespValue::BigNumber(string))))
        }
    }
}

/// Decode one complete value starting at `idx`, dispatching on its type tag.
pub(crate) fn decode(buf: &BytesMut, idx: usize) -> DecodeResult {
    let length = buf.len();
    if length <= idx {
        return Ok(None);
    }

    let first_byte = buf[idx];
    match first_byte {
        b'$' => decode_bulk_string(buf, idx + 1),
        b'*' => decode_aggregate(buf, idx + 1, 1, RespValue::Array),
        b':' => decode_integer(buf, idx + 1),
        b'+' => decode_simple_string(buf, idx + 1),
        b'-' => decode_error(buf, idx + 1),
        b'_' => decode_null(buf, idx + 1),
        b'#' => decode_boolean(buf, idx + 1),
        b',' => decode_double(buf, idx + 1),
        b'(' => decode_big_number(buf, idx + 1),
        b'=' => decode_verbatim(buf, idx + 1),
        b'!' => decode_blob_error(buf, idx + 1),
        b'%' => decode_aggregate(buf, idx + 1, 2, |values| RespValue::Map(into_pairs(values))),
        b'~' => decode_aggregate(buf, idx + 1, 1, RespValue::Set),
        b'>' => decode_aggregate(buf, idx + 1, 1, RespValue::Push),
        b'|' => decode_attribute(buf, idx + 1),
        _ => Err(parse_error(format!("Unexpected byte: {}", first_byte))),
    }
}

/// An outermost aggregate read so far: its header and some leading elements have been consumed
/// from the buffer, and are not decoded again.
#[derive(Debug)]
pub(crate) struct Partial {
    tag: u8,
    remaining: usize,
    values: Vec<RespValue>,
}

impl Partial {
    /// Decode as many whole elements as `buf` holds and return the number of bytes they took.
    pub(crate) fn fill(&mut self, buf: &BytesMut) -> Result<usize, Error> {
        let mut pos = 0;
        while self.remaining > 0 {
            match decode(buf, pos)? {
                None => break,
                Some((new_pos, value)) => {
                    self.values.push(value);
                    self.remaining -= 1;
                    pos = new_pos;
                }
            }
        }
        Ok(pos)
    }

    pub(crate) fn is_complete(&self) -> bool {
        self.remaining == 0
    }

    pub(crate) fn finish(self) -> RespValue {
        build_aggregate(self.tag, self.values)
    }
}

pub(crate) enum Frame {
    /// A whole value and the number of bytes it took
    Complete(usize, RespValue),
    /// A non-empty aggregate header and the number of bytes it took, elements follow
    Started(usize, Partial),
    Incomplete,
}

/// Start decoding the next frame at the front of `buf`.
pub(crate) fn decode_frame(buf: &BytesMut) -> Result<Frame, Error> {
    let elements_per_entry = match buf.first() {
        None => return Ok(Frame::Incomplete),
        Some(b'*') | Some(b'~') | Some(b'>') => 1,
        Some(b'%') => 2,
        Some(_) => {
            return Ok(match decode(buf, 0)? {
                Some((pos, value)) => Frame::Complete(pos, value),
                None => Frame::Incomplete,
            })
        }
    };
    let tag = buf[0];
    match decode_raw_integer(buf, 1)? {
        None => Ok(Frame::Incomplete),
        Some((pos, size)) if size > 0 => {
            let remaining = aggregate_len(size, elements_per_entry)?;
            let values = Vec::with_capacity(remaining.min(buf.len() - pos));
            Ok(Frame::Started(
                pos,
                Partial {
                    tag,
                    remaining,
                    values,
                },
            ))
        }
        Some(_) => Ok(match decode(buf, 0)? {
            Some((pos, value)) => Frame::Complete(pos, value),
            None => Frame::Incomplete,
        }),
    }
}
