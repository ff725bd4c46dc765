// Copyright 2024 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! tlog records an interactive terminal session into a structured,
//! line-delimited JSON log and decodes that log back into timestamped
//! packets.
//!
//! The core pipeline is [`sink::Sink`] (packets in, JSON lines out) and
//! [`source::Source`] (JSON lines in, packets out), both built on a
//! bounded [`chunk::Chunk`] workspace. [`transport`] supplies the
//! `Reader`/`Writer` trait pair plus file- and memory-backed
//! implementations; [`config::Config`] holds the options the core
//! consumes.

mod chunk;
pub mod config;
mod consts;
mod dispatcher;
pub mod error;
pub mod message;
mod pkt;
pub mod sink;
pub mod source;
mod stream;
pub mod transport;
mod trx;
mod utf8;

pub use config::Config;
pub use error::{Error, ErrorKind, Result};
pub use message::Message;
pub use pkt::{Packet, PacketPos, Timestamp};
pub use sink::Sink;
pub use source::{Filter, Source};
