/*
 * Copyright 2017-2026 Ben Ashford
 *
 * Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
 * http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
 * <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
 * option. This file may not be copied, modified, or distributed
 * except according to those terms.
 */

//! An implementation of the RESP protocol

use std::collections::HashMap;
use std::hash::{BuildHasher, Hash};
use std::str;
use std::sync::Arc;

use crate::error::{self, Error};

/// A single RESP value, this owns the data that is read/to-be written to Redis.
///
/// Covers every kind that can appear on the wire under RESP2 and RESP3.  Attributes (`|`) are
/// not represented, the decoder discards them and returns the value they annotate.
///
/// It is cloneable to allow multiple copies to be delivered in certain circumstances, e.g. multiple
/// subscribers to the same topic.
#[derive(Debug, Clone, PartialEq)]
pub enum RespValue {
    /// A null bulk string (`$-1`), null array (`*-1`), or RESP3 null (`_`).
    Nil,

    /// Zero, one or more other `RespValue`s.
    Array(Vec<RespValue>),

    /// A bulk string.  In Redis terminology a string is a byte-array, so this is stored as a
    /// vector of `u8`s to allow clients to interpret the bytes as appropriate.
    BulkString(Vec<u8>),

    /// An error from the Redis server, either a simple error (`-`) or a RESP3 blob error (`!`)
    Error(String),

    /// Redis documentation defines an integer as being a signed 64-bit integer:
    /// https://redis.io/topics/protocol#resp-integers
    Integer(i64),

    SimpleString(String),

    /// RESP3 `#t` / `#f`
    Boolean(bool),

    /// RESP3 double, including `inf`, `-inf` and `nan`
    Double(f64),

    /// RESP3 big number, kept as its decimal representation
    BigNumber(String),

    /// RESP3 verbatim string: the three character format (e.g. `txt`, `mkd`) and the text
    Verbatim(String, Vec<u8>),

    /// RESP3 map, in wire order
    Map(Vec<(RespValue, RespValue)>),

    /// RESP3 set, in wire order
    Set(Vec<RespValue>),

    /// RESP3 out-of-band push data, e.g. Pub/Sub messages
    Push(Vec<RespValue>),
}

impl RespValue {
    /// An error reply is turned into a typed `Error::Remote`; every other kind passes through.
    pub(crate) fn into_result(self) -> Result<RespValue, Error> {
        match self {
            RespValue::Error(string) => Err(Error::Remote(string)),
            x => Ok(x),
        }
    }

    /// The elements of an aggregate that carries a list of values (array, set, push).
    pub(crate) fn as_elements(&self) -> Option<&[RespValue]> {
        match self {
            RespValue::Array(values) | RespValue::Set(values) | RespValue::Push(values) => {
                Some(values)
            }
            _ => None,
        }
    }
}

/// A trait to be implemented for every time which can be read from a RESP value.
///
/// Implementing this trait on a type means that type becomes a valid return type for calls such as `send` on
/// `client::Dispatcher`
pub trait FromResp: Sized {
    /// Return a `Result` containing either `Self` or `Error`.  Errors can occur due to either: a) the particular
    /// `RespValue` being incompatible with the required type, or b) a remote Redis error occuring.
    fn from_resp(resp: RespValue) -> Result<Self, Error> {
        Self::from_resp_int(resp.into_result()?)
    }

    fn from_resp_int(resp: RespValue) -> Result<Self, Error>;
}

impl FromResp for RespValue {
    fn from_resp_int(resp: RespValue) -> Result<RespValue, Error> {
        Ok(resp)
    }
}

impl FromResp for String {
    fn from_resp_int(resp: RespValue) -> Result<String, Error> {
        match resp {
            RespValue::BulkString(ref bytes) => Ok(String::from_utf8_lossy(bytes).into_owned()),
            RespValue::Verbatim(_, ref bytes) => Ok(String::from_utf8_lossy(bytes).into_owned()),
            RespValue::SimpleString(string) => Ok(string),
            RespValue::BigNumber(string) => Ok(string),
            _ => Err(error::resp("Cannot convert into a string", resp)),
        }
    }
}

impl FromResp for Vec<u8> {
    fn from_resp_int(resp: RespValue) -> Result<Vec<u8>, Error> {
        match resp {
            RespValue::BulkString(bytes) => Ok(bytes),
            RespValue::Verbatim(_, bytes) => Ok(bytes),
            _ => Err(error::resp("Not a bulk string", resp)),
        }
    }
}

impl FromResp for i64 {
    fn from_resp_int(resp: RespValue) -> Result<i64, Error> {
        match resp {
            RespValue::Integer(i) => Ok(i),
            _ => Err(error::resp("Cannot be converted into an i64", resp)),
        }
    }
}

macro_rules! impl_fromresp_integers {
    ($($int_ty:ident),* $(,)*) => {
        $(
            #[allow(clippy::cast_lossless)]
            impl FromResp for $int_ty {
                fn from_resp_int(resp: RespValue) -> Result<Self, Error> {
                    i64::from_resp_int(resp).and_then(|x| {
                        $int_ty::try_from(x).map_err(|_| {
                            error::resp(
                                concat!("i64 value cannot be represented as ", stringify!($int_ty)),
                                RespValue::Integer(x),
                            )
                        })
                    })
                }
            }
        )*
    };
}

impl_fromresp_integers!(isize, usize, i32, u32, u64);

impl FromResp for f64 {
    fn from_resp_int(resp: RespValue) -> Result<f64, Error> {
        match resp {
            RespValue::Double(d) => Ok(d),
            RespValue::Integer(i) => Ok(i as f64),
            RespValue::BulkString(ref bytes) => str::from_utf8(bytes)
                .ok()
                .and_then(|s| s.parse().ok())
                .ok_or_else(|| error::resp("Cannot be converted into an f64", resp.clone())),
            _ => Err(error::resp("Cannot be converted into an f64", resp)),
        }
    }
}

impl FromResp for bool {
    fn from_resp_int(resp: RespValue) -> Result<bool, Error> {
        match resp {
            RespValue::Boolean(b) => Ok(b),
            resp => i64::from_resp_int(resp).and_then(|x| match x {
                0 => Ok(false),
                1 => Ok(true),
                _ => Err(error::resp(
                    "i64 value cannot be represented as bool",
                    RespValue::Integer(x),
                )),
            }),
        }
    }
}

impl<T: FromResp> FromResp for Option<T> {
    fn from_resp_int(resp: RespValue) -> Result<Option<T>, Error> {
        match resp {
            RespValue::Nil => Ok(None),
            x => Ok(Some(T::from_resp_int(x)?)),
        }
    }
}

impl<T: FromResp> FromResp for Vec<T> {
    fn from_resp_int(resp: RespValue) -> Result<Vec<T>, Error> {
        match resp {
            RespValue::Array(ary) | RespValue::Set(ary) | RespValue::Push(ary) => {
                let mut ar = Vec::with_capacity(ary.len());
                for value in ary {
                    ar.push(T::from_resp(value)?);
                }
                Ok(ar)
            }
            _ => Err(error::resp("Cannot be converted into a vector", resp)),
        }
    }
}

impl<K: FromResp + Hash + Eq, T: FromResp, S: BuildHasher + Default> FromResp for HashMap<K, T, S> {
    fn from_resp_int(resp: RespValue) -> Result<HashMap<K, T, S>, Error> {
        match resp {
            RespValue::Map(pairs) => {
                let mut map = HashMap::with_capacity_and_hasher(pairs.len(), S::default());
                for (k, v) in pairs {
                    map.insert(K::from_resp(k)?, T::from_resp(v)?);
                }
                Ok(map)
            }
            RespValue::Array(ary) => {
                let mut map = HashMap::with_capacity_and_hasher(ary.len() / 2, S::default());
                let mut items = ary.into_iter();

                while let Some(k) = items.next() {
                    let key = K::from_resp(k)?;
                    let value = T::from_resp(items.next().ok_or_else(|| {
                        error::resp(
                            "Cannot convert an odd number of elements into a hashmap",
                            "".into(),
                        )
                    })?)?;

                    map.insert(key, value);
                }

                Ok(map)
            }
            _ => Err(error::resp("Cannot be converted into a hashmap", resp)),
        }
    }
}

impl FromResp for () {
    fn from_resp_int(resp: RespValue) -> Result<(), Error> {
        match resp {
            RespValue::SimpleString(string) => match string.as_ref() {
                "OK" => Ok(()),
                _ => Err(Error::RESP(
                    format!("Unexpected value within SimpleString: {}", string),
                    None,
                )),
            },
            _ => Err(error::resp("Unexpected value", resp)),
        }
    }
}

impl<A, B> FromResp for (A, B)
where
    A: FromResp,
    B: FromResp,
{
    fn from_resp_int(resp: RespValue) -> Result<(A, B), Error> {
        match resp {
            RespValue::Array(ary) => match <[RespValue; 2]>::try_from(ary) {
                Ok([a, b]) => Ok((A::from_resp(a)?, B::from_resp(b)?)),
                Err(ary) => Err(Error::RESP(
                    format!("Array needs to be 2 elements, is: {}", ary.len()),
                    None,
                )),
            },
            _ => Err(error::resp("Unexpected value", resp)),
        }
    }
}

impl<A, B, C> FromResp for (A, B, C)
where
    A: FromResp,
    B: FromResp,
    C: FromResp,
{
    fn from_resp_int(resp: RespValue) -> Result<(A, B, C), Error> {
        match resp {
            RespValue::Array(ary) => match <[RespValue; 3]>::try_from(ary) {
                Ok([a, b, c]) => Ok((A::from_resp(a)?, B::from_resp(b)?, C::from_resp(c)?)),
                Err(ary) => Err(Error::RESP(
                    format!("Array needs to be 3 elements, is: {}", ary.len()),
                    None,
                )),
            },
            _ => Err(error::resp("Unexpected value", resp)),
        }
    }
}

macro_rules! into_resp {
    ($t:ty, $f:ident) => {
        impl<'a> From<$t> for RespValue {
            fn from(from: $t) -> RespValue {
                from.$f()
            }
        }
    };
}

/// A specific trait to convert into a `RespValue::BulkString`
pub trait ToRespString {
    fn to_resp_string(self) -> RespValue;
}

macro_rules! string_into_resp {
    ($t:ty) => {
        into_resp!($t, to_resp_string);
    };
}

impl ToRespString for String {
    fn to_resp_string(self) -> RespValue {
        RespValue::BulkString(self.into_bytes())
    }
}
string_into_resp!(String);

impl<'a> ToRespString for &'a String {
    fn to_resp_string(self) -> RespValue {
        RespValue::BulkString(self.as_bytes().into())
    }
}
string_into_resp!(&'a String);

impl<'a> ToRespString for &'a str {
    fn to_resp_string(self) -> RespValue {
        RespValue::BulkString(self.as_bytes().into())
    }
}
string_into_resp!(&'a str);

impl<'a> ToRespString for &'a [u8] {
    fn to_resp_string(self) -> RespValue {
        RespValue::BulkString(self.to_vec())
    }
}
string_into_resp!(&'a [u8]);

impl ToRespString for Vec<u8> {
    fn to_resp_string(self) -> RespValue {
        RespValue::BulkString(self)
    }
}
string_into_resp!(Vec<u8>);

impl ToRespString for Arc<str> {
    fn to_resp_string(self) -> RespValue {
        RespValue::BulkString(self.as_bytes().into())
    }
}
string_into_resp!(Arc<str>);

pub trait ToRespInteger {
    fn to_resp_integer(self) -> RespValue;
}

macro_rules! integer_into_resp {
    ($t:ty) => {
        into_resp!($t, to_resp_integer);
    };
}

impl ToRespInteger for i64 {
    fn to_resp_integer(self) -> RespValue {
        RespValue::Integer(self)
    }
}
integer_into_resp!(i64);

macro_rules! impl_toresp_integers {
    ($($int_ty:ident),* $(,)*) => {
        $(
            impl ToRespInteger for $int_ty {
                fn to_resp_integer(self) -> RespValue {
                    let new_self = self as i64;
                    new_self.to_resp_integer()
                }
            }
            integer_into_resp!($int_ty);
        )*
    };
}

impl_toresp_integers!(isize, i32, u32);

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use crate::error::Error;

    use super::{FromResp, RespValue};

    #[test]
    fn test_integer_overflow() {
        let resp_object = RespValue::Integer(i64::max_value());
        let res = i32::from_resp(resp_object);
        assert!(res.is_err());
    }

    #[test]
    fn test_integer_underflow() {
        let resp_object = RespValue::Integer(-2);
        let res = u64::from_resp(resp_object);
        assert!(res.is_err());
    }

    #[test]
    fn test_integer_convesion() {
        let resp_object = RespValue::Integer(50);
        assert_eq!(u32::from_resp(resp_object).unwrap(), 50);
    }

    #[test]
    fn test_error_reply_becomes_remote_error() {
        let res = String::from_resp(RespValue::Error("ERR wrong type".into()));
        match res {
            Err(Error::Remote(msg)) => assert_eq!(msg, "ERR wrong type"),
            other => panic!("Expected a remote error, got: {:?}", other),
        }
    }

    #[test]
    fn test_nil_is_absent() {
        assert_eq!(Option::<String>::from_resp(RespValue::Nil).unwrap(), None);
        assert_eq!(Option::<Vec<String>>::from_resp(RespValue::Nil).unwrap(), None);
        assert_eq!(
            Option::<String>::from_resp("".into()).unwrap(),
            Some(String::new())
        );
    }

    #[test]
    fn test_resp3_scalars() {
        assert!(bool::from_resp(RespValue::Boolean(true)).unwrap());
        assert!(!bool::from_resp(RespValue::Integer(0)).unwrap());
        assert_eq!(f64::from_resp(RespValue::Double(1.5)).unwrap(), 1.5);
        assert_eq!(f64::from_resp("2.25".into()).unwrap(), 2.25);
        assert_eq!(
            String::from_resp(RespValue::Verbatim("txt".into(), b"hello".to_vec())).unwrap(),
            "hello"
        );
        assert_eq!(
            String::from_resp(RespValue::BigNumber("3492890328409238509324850943850943825024385".into()))
                .unwrap(),
            "3492890328409238509324850943850943825024385"
        );
    }

    #[test]
    fn test_hashmap_conversion() {
        let mut expected = HashMap::new();
        expected.insert("KEY1".to_string(), "VALUE1".to_string());
        expected.insert("KEY2".to_string(), "VALUE2".to_string());

        let resp_object = RespValue::Array(vec![
            "KEY1".into(),
            "VALUE1".into(),
            "KEY2".into(),
            "VALUE2".into(),
        ]);
        assert_eq!(
            HashMap::<String, String>::from_resp(resp_object).unwrap(),
            expected
        );

        let resp_object = RespValue::Map(vec![
            ("KEY1".into(), "VALUE1".into()),
            ("KEY2".into(), "VALUE2".into()),
        ]);
        assert_eq!(
            HashMap::<String, String>::from_resp(resp_object).unwrap(),
            expected
        );
    }

    #[test]
    fn test_hashmap_conversion_fails_with_odd_length_array() {
        let resp_object = RespValue::Array(vec![
            "KEY1".into(),
            "VALUE1".into(),
            "KEY2".into(),
            "VALUE2".into(),
            "KEY3".into(),
        ]);
        let res = HashMap::<String, String>::from_resp(resp_object);

        match res {
            Err(Error::RESP(_, _)) => {}
            _ => panic!("Should not be able to convert an odd number of elements to a hashmap"),
        }
    }

    #[test]
    fn test_tuple_conversion() {
        let resp_object = RespValue::Array(vec!["a".into(), RespValue::Integer(2)]);
        let (a, b): (String, i64) = FromResp::from_resp(resp_object).unwrap();
        assert_eq!(a, "a");
        assert_eq!(b, 2);

        let resp_object = RespValue::Array(vec!["a".into()]);
        assert!(<(String, i64)>::from_resp(resp_object).is_err());
    }
}
