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

//! The packet data model: the tagged union passed between the recorder
//! and the sink (or between the source and the player), plus the opaque
//! cursor used to track how much of a packet's payload has been
//! consumed.

/// A monotonic point in time since session start, seconds plus
/// nanoseconds. Always non-negative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct Timestamp {
    pub secs: u64,
    pub nanos: u32,
}

impl Timestamp {
    pub fn new(secs: u64, nanos: u32) -> Self {
        Timestamp { secs, nanos: nanos % 1_000_000_000 }
    }

    pub fn from_millis(ms: u64) -> Self {
        Timestamp { secs: ms / 1000, nanos: ((ms % 1000) as u32) * 1_000_000 }
    }

    pub fn as_millis(&self) -> u64 {
        self.secs * 1000 + (self.nanos / 1_000_000) as u64
    }

    /// `self + other`, used to fold a parsed `+<ms>` delay record into a
    /// running position.
    pub fn add(&self, other: Timestamp) -> Timestamp {
        let mut secs = self.secs + other.secs;
        let mut nanos = self.nanos + other.nanos;
        if nanos >= 1_000_000_000 {
            nanos -= 1_000_000_000;
            secs += 1;
        }
        Timestamp { secs, nanos }
    }

    /// `self - earlier`, clamped at zero instead of underflowing, the way
    /// the original clamps a possibly-out-of-order delay to zero.
    pub fn saturating_sub(&self, earlier: Timestamp) -> Timestamp {
        if *self <= earlier {
            return Timestamp::default();
        }
        let mut secs = self.secs - earlier.secs;
        let nanos = if self.nanos >= earlier.nanos {
            self.nanos - earlier.nanos
        } else {
            secs -= 1;
            1_000_000_000 + self.nanos - earlier.nanos
        };
        Timestamp { secs, nanos }
    }
}

/// One recorded event.
#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    /// No event; used to signal end-of-stream from a source.
    Void,
    /// A terminal resize.
    Window { ts: Timestamp, width: u16, height: u16 },
    /// A run of bytes flowing in one direction.
    Io { ts: Timestamp, output: bool, bytes: Vec<u8> },
}

impl Packet {
    pub fn timestamp(&self) -> Option<Timestamp> {
        match self {
            Packet::Void => None,
            Packet::Window { ts, .. } => Some(*ts),
            Packet::Io { ts, .. } => Some(*ts),
        }
    }

    pub fn is_void(&self) -> bool {
        matches!(self, Packet::Void)
    }

    /// A cursor positioned at the natural end of this packet's payload.
    pub fn end_pos(&self) -> PacketPos {
        match self {
            Packet::Void => PacketPos::Void,
            Packet::Window { .. } => PacketPos::Window(true),
            Packet::Io { bytes, .. } => PacketPos::Io(bytes.len()),
        }
    }

    /// A cursor positioned at the start of this packet's payload.
    pub fn start_pos(&self) -> PacketPos {
        match self {
            Packet::Void => PacketPos::Void,
            Packet::Window { .. } => PacketPos::Window(false),
            Packet::Io { .. } => PacketPos::Io(0),
        }
    }
}

/// An opaque cursor into a packet's payload: a byte offset for `Io`, a
/// written/not-written flag for `Window`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PacketPos {
    Void,
    Window(bool),
    Io(usize),
}

impl PacketPos {
    pub fn is_void(&self) -> bool {
        matches!(self, PacketPos::Void)
    }

    /// Advance an `Io` cursor by `n` bytes. No-op for the other variants.
    pub fn move_by(&mut self, n: usize) {
        if let PacketPos::Io(offset) = self {
            *offset += n;
        }
    }

    /// Jump straight to the end of `pkt`'s payload.
    pub fn move_past(&mut self, pkt: &Packet) {
        *self = pkt.end_pos();
    }
}
