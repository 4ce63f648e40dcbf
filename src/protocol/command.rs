/*
 * Copyright 2026 Ben Ashford
 *
 * Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
 * http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
 * <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
 * option. This file may not be copied, modified, or distributed
 * except according to those terms.
 */

//! Commands as sent to Redis: a name and a list of binary-safe arguments.

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;

/// A Redis command, encoded on the wire as an array of bulk strings.
///
/// Built by value and immutable once handed to a `Dispatcher`.
#[derive(Clone, PartialEq, Eq)]
pub struct Command {
    name: String,
    args: Vec<Vec<u8>>,
}

impl Command {
    pub fn new(name: impl Into<String>) -> Self {
        Command {
            name: name.into(),
            args: Vec::new(),
        }
    }

    /// Append a single argument.  Arguments that are absent (`None`) are dropped.
    pub fn arg<A: CommandArg>(mut self, arg: A) -> Self {
        if let Some(bytes) = arg.into_arg() {
            self.args.push(bytes);
        }
        self
    }

    /// Convenience function for building dynamic Redis commands with variable numbers of
    /// arguments, e.g. RPUSH
    pub fn args<A, I>(mut self, args: I) -> Self
    where
        A: CommandArg,
        I: IntoIterator<Item = A>,
    {
        self.args
            .extend(args.into_iter().filter_map(CommandArg::into_arg));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn args_slice(&self) -> &[Vec<u8>] {
        &self.args
    }
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        // Arguments may hold credentials or large payloads, only their count is shown
        write!(f, "Command({}, {} args)", self.name, self.args.len())
    }
}

/// A value usable as a command argument.
///
/// Strings and byte buffers are passed through verbatim, numbers are stringified.  `None`
/// produces no argument at all.
pub trait CommandArg {
    fn into_arg(self) -> Option<Vec<u8>>;
}

impl CommandArg for String {
    fn into_arg(self) -> Option<Vec<u8>> {
        Some(self.into_bytes())
    }
}

impl<'a> CommandArg for &'a String {
    fn into_arg(self) -> Option<Vec<u8>> {
        Some(self.as_bytes().to_vec())
    }
}

impl<'a> CommandArg for &'a str {
    fn into_arg(self) -> Option<Vec<u8>> {
        Some(self.as_bytes().to_vec())
    }
}

impl CommandArg for Arc<str> {
    fn into_arg(self) -> Option<Vec<u8>> {
        Some(self.as_bytes().to_vec())
    }
}

impl<'a> CommandArg for &'a [u8] {
    fn into_arg(self) -> Option<Vec<u8>> {
        Some(self.to_vec())
    }
}

impl<'a, const N: usize> CommandArg for &'a [u8; N] {
    fn into_arg(self) -> Option<Vec<u8>> {
        Some(self.to_vec())
    }
}

impl CommandArg for Vec<u8> {
    fn into_arg(self) -> Option<Vec<u8>> {
        Some(self)
    }
}

impl CommandArg for Bytes {
    fn into_arg(self) -> Option<Vec<u8>> {
        Some(self.to_vec())
    }
}

impl CommandArg for f64 {
    fn into_arg(self) -> Option<Vec<u8>> {
        Some(self.to_string().into_bytes())
    }
}

impl<T: CommandArg> CommandArg for Option<T> {
    fn into_arg(self) -> Option<Vec<u8>> {
        self.and_then(CommandArg::into_arg)
    }
}

macro_rules! impl_commandarg_integers {
    ($($int_ty:ident),* $(,)*) => {
        $(
            impl CommandArg for $int_ty {
                fn into_arg(self) -> Option<Vec<u8>> {
                    Some(self.to_string().into_bytes())
                }
            }
        )*
    };
}

impl_commandarg_integers!(i8, i16, i32, i64, isize, u8, u16, u32, u64, usize);

/// Macro to create a command, useful for preparing commands to send.  The first element is the
/// command name, the rest can be any type, or a mixture of types, that implement `CommandArg`.
///
/// # Examples
///
/// ```
/// #[macro_use]
/// extern crate redis_dispatch;
///
/// fn main() {
///     let value = format!("something_{}", 123);
///     let command = cmd!["SET", "key_name", value, "EX", 60];
///     assert_eq!(command.args_slice().len(), 4);
/// }
/// ```
///
/// For variable length Redis commands:
///
/// ```
/// #[macro_use]
/// extern crate redis_dispatch;
///
/// fn main() {
///     let data = vec!["data", "from", "somewhere", "else"];
///     let command = cmd!["RPUSH", "mykey"].args(data);
/// }
/// ```
#[macro_export]
macro_rules! cmd {
    ($name:expr $(, $arg:expr)* $(,)?) => {
        {
            $crate::protocol::Command::new($name)
                $(
                    .arg($arg)
                )*
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Command;

    #[test]
    fn numbers_are_stringified() {
        let command = cmd!["INCRBY", "counter", 42, -7i64, 1.5f64];
        assert_eq!(
            command.args_slice(),
            &[
                b"counter".to_vec(),
                b"42".to_vec(),
                b"-7".to_vec(),
                b"1.5".to_vec()
            ]
        );
    }

    #[test]
    fn absent_arguments_are_dropped() {
        let ttl: Option<u32> = None;
        let command = cmd!["SET", "k", "v", ttl, Some("NX")];
        assert_eq!(command.args_slice().len(), 3);
        assert_eq!(command.args_slice()[2], b"NX".to_vec());
    }

    #[test]
    fn binary_arguments_pass_through() {
        let command = Command::new("SET").arg("bin").arg(&[0u8, 13, 10, 255][..]);
        assert_eq!(command.args_slice()[1], vec![0u8, 13, 10, 255]);
    }

    #[test]
    fn debug_output_hides_arguments() {
        let command = cmd!["AUTH", "user", "secret"];
        assert_eq!(format!("{:?}", command), "Command(AUTH, 2 args)");
    }
}
