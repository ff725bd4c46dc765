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

//! Wraps a [`Reader`] and a [`Message`] parser to reassemble a session's
//! packet stream, grounded on `lib/source.c`. Applies an identity
//! filter, enforces cross-message ordering invariants the original
//! leaves to its callers, and collapses consecutive duplicate window
//! packets.

use tracing::{debug, warn};

use crate::{
    error::{Error, ErrorKind, Result},
    message::Message,
    pkt::{Packet, Timestamp},
    transport::Reader,
};

/// Which recorded sessions a [`Source`] accepts. `None` fields accept
/// anything.
#[derive(Debug, Clone, Default)]
pub struct Filter {
    pub host: Option<String>,
    pub user: Option<String>,
    pub session: Option<u32>,
}

impl Filter {
    fn accepts(&self, msg: &Message) -> bool {
        if let Some(host) = &self.host {
            if msg.host() != host {
                return false;
            }
        }
        if let Some(user) = &self.user {
            if msg.user() != user {
                return false;
            }
        }
        if let Some(session) = self.session {
            if msg.session() != session {
                return false;
            }
        }
        true
    }
}

/// Reassembles packets out of a stream of validated JSON messages.
pub struct Source<R> {
    reader: R,
    filter: Filter,
    lax: bool,
    io_size: usize,
    msg: Option<Message>,
    last_id: Option<u64>,
    last_ts: Timestamp,
    last_window: Option<(u16, u16)>,
}

impl<R: Reader> Source<R> {
    pub fn new(reader: R, filter: Filter, lax: bool, io_size: usize) -> Self {
        assert!(io_size >= crate::consts::IO_SIZE_MIN);
        Source {
            reader,
            filter,
            lax,
            io_size,
            msg: None,
            last_id: None,
            last_ts: Timestamp::default(),
            last_window: None,
        }
    }

    /// Read the next packet, or `Packet::Void` at end of stream.
    pub fn read(&mut self) -> Result<Packet> {
        loop {
            if self.msg.is_none() {
                match self.next_msg()? {
                    None => return Ok(Packet::Void),
                    Some(msg) => self.msg = Some(msg),
                }
            }

            let pkt = self.msg.as_mut().expect("just populated").read(self.io_size)?;
            if pkt.is_void() {
                self.msg = None;
                continue;
            }

            if let Some(ts) = pkt.timestamp() {
                if ts < self.last_ts {
                    warn!(?ts, last_ts = ?self.last_ts, "packet timestamp moved backwards");
                    return Err(Error::new(ErrorKind::SourcePktTsOutOfOrder));
                }
                self.last_ts = ts;
            }

            if let Packet::Window { width, height, .. } = &pkt {
                if self.last_window == Some((*width, *height)) {
                    continue;
                }
                self.last_window = Some((*width, *height));
            }

            return Ok(pkt);
        }
    }

    /// Pull the next message this source's filter accepts, validating
    /// `id` ordering as each candidate is read.
    fn next_msg(&mut self) -> Result<Option<Message>> {
        loop {
            let Some(value) = self.reader.read()? else { return Ok(None) };
            let msg = Message::parse(&value)?;
            if !self.filter.accepts(&msg) {
                debug!(id = msg.id(), "message rejected by identity filter");
                continue;
            }
            self.check_id(msg.id())?;
            return Ok(Some(msg));
        }
    }

    fn check_id(&mut self, id: u64) -> Result<()> {
        if let Some(prev) = self.last_id {
            let ok = if self.lax { id == prev || id == prev + 1 } else { id == prev + 1 };
            if !ok {
                warn!(id, prev, "message id is not contiguous");
                return Err(Error::new(ErrorKind::SourceMsgIdOutOfOrder));
            }
        }
        self.last_id = Some(id);
        Ok(())
    }
}
