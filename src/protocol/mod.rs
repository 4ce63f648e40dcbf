/*
 * Copyright 2020-2026 Ben Ashford
 *
 * Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
 * http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
 * <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
 * option. This file may not be copied, modified, or distributed
 * except according to those terms.
 */

//! The RESP wire protocol: values, commands and the framing codec.

#[macro_use]
pub mod command;

pub(crate) mod resp;

mod codec;

pub use codec::RespCodec;
pub use command::{Command, CommandArg};
pub use resp::{FromResp, RespValue, ToRespInteger, ToRespString};
