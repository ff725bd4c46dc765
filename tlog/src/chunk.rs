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

//! The bounded chunk workspace, grounded on `lib/json_chunk.c`: one input
//! stream, one output stream, a timing script buffer, a window-size
//! state machine, and the delay encoder that ties them together.
//!
//! `Chunk` splits into two disjoint fields, `shared` and the two
//! streams, so it can hand a stream a dispatcher that reaches the
//! *other* stream without ever reborrowing the stream currently being
//! written to. The chunk-level `advance` (see [`StreamDispatcher`])
//! therefore only flushes the other stream; the calling stream flushes
//! its own pending run beforehand, via [`Dispatcher::delay_pending`].

use crate::{
    consts::{CHUNK_SIZE_MIN, MARK_INVALID_INPUT, MARK_INVALID_OUTPUT, MARK_VALID_INPUT, MARK_VALID_OUTPUT},
    dispatcher::Dispatcher,
    error::{Error, ErrorKind, Result},
    pkt::{Packet, PacketPos, Timestamp},
    stream::Stream,
    trx::{Frame, Trx},
};

/// Window-size knowledge, monotonically richer within one flush cycle:
/// `empty()` demotes `Reserved`/`Written` back down to `Known`, never to
/// `Void` (once a session has seen a window size, it is never forgotten,
/// only re-asserted lazily).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum WindowState {
    Void,
    Known,
    Reserved,
    Written,
}

fn window_record(width: u16, height: u16) -> String {
    format!("={width}x{height}")
}

/// The parts of a chunk a stream's dispatcher can reach: the byte
/// budget, the timing script, and the delay/window bookkeeping. Holds
/// no reference to either stream.
#[derive(Debug, Clone)]
struct ChunkShared {
    size: usize,
    rem: usize,
    timing_buf: Vec<u8>,
    got_ts: bool,
    first_ts: Timestamp,
    last_ts: Timestamp,
    window_state: WindowState,
    last_width: u16,
    last_height: u16,
}

impl ChunkShared {
    /// Charge `len` bytes against the remaining budget, additionally
    /// charging the cost of re-asserting the current window size if one
    /// is `Known` but not yet reserved this flush cycle.
    fn charge(&mut self, mut len: usize) -> bool {
        if self.window_state == WindowState::Known {
            len += window_record(self.last_width, self.last_height).len();
        }
        if len > self.rem {
            return false;
        }
        self.rem -= len;
        if self.window_state == WindowState::Known {
            self.window_state = WindowState::Reserved;
        }
        true
    }

    /// Append to the timing script, writing out a reserved-but-not-yet-
    /// written window record first if one is owed.
    fn append_timing(&mut self, bytes: &[u8]) {
        if self.window_state == WindowState::Reserved {
            let record = window_record(self.last_width, self.last_height);
            self.timing_buf.extend_from_slice(record.as_bytes());
            self.window_state = WindowState::Written;
        }
        self.timing_buf.extend_from_slice(bytes);
    }

    /// Whether `do_advance(ts)` would need to emit a delay record,
    /// without mutating anything.
    fn peek_delay_pending(&self, ts: Timestamp) -> bool {
        if !self.got_ts || ts <= self.last_ts {
            return false;
        }
        let delta = ts.saturating_sub(self.last_ts);
        delta.secs != 0 || delta.nanos >= 1_000_000
    }

    /// Record passage of time to `ts`, charging and emitting a `+<ms>`
    /// record if a measurable delay has elapsed since the last call.
    /// Does not flush either stream: callers flush whatever pending runs
    /// need to precede the delay record before calling this.
    fn do_advance(&mut self, trx: &mut Trx, ts: Timestamp) -> bool {
        let frame = Frame::begin(trx, self);

        let record = if !self.got_ts {
            self.got_ts = true;
            self.first_ts = ts;
            self.last_ts = ts;
            None
        } else if ts > self.last_ts {
            let delta = ts.saturating_sub(self.last_ts);
            self.last_ts = ts;
            let ms = delta.nanos / 1_000_000;
            if delta.secs != 0 {
                Some(format!("+{}{:03}", delta.secs, ms))
            } else if ms != 0 {
                Some(format!("+{ms}"))
            } else {
                None
            }
        } else {
            None
        };

        if let Some(record) = record {
            if !self.charge(record.len()) {
                frame.abort(trx, self);
                return false;
            }
            self.append_timing(record.as_bytes());
        }

        frame.commit(trx);
        true
    }
}

impl Dispatcher for ChunkShared {
    /// A degenerate `advance` that does not flush either stream: used
    /// only where a caller already guarantees no stream has a pending
    /// run (window writes flush both streams explicitly beforehand).
    fn advance(&mut self, trx: &mut Trx, ts: Timestamp) -> bool {
        self.do_advance(trx, ts)
    }

    fn reserve(&mut self, _trx: &mut Trx, n: usize) -> bool {
        self.charge(n)
    }

    fn write(&mut self, _trx: &mut Trx, bytes: &[u8]) {
        self.append_timing(bytes);
    }

    fn delay_pending(&self, ts: Timestamp) -> bool {
        self.peek_delay_pending(ts)
    }
}

/// The dispatcher handed to whichever stream is actively being written:
/// reaches the shared budget/timing state and the *other* stream, never
/// the stream it is dispatching for.
struct StreamDispatcher<'a> {
    shared: &'a mut ChunkShared,
    other: &'a mut Stream,
}

impl<'a> Dispatcher for StreamDispatcher<'a> {
    fn advance(&mut self, trx: &mut Trx, ts: Timestamp) -> bool {
        if self.shared.peek_delay_pending(ts) {
            self.other.flush(&mut *self.shared, trx);
        }
        self.shared.do_advance(trx, ts)
    }

    fn reserve(&mut self, _trx: &mut Trx, n: usize) -> bool {
        self.shared.charge(n)
    }

    fn write(&mut self, _trx: &mut Trx, bytes: &[u8]) {
        self.shared.append_timing(bytes);
    }

    fn delay_pending(&self, ts: Timestamp) -> bool {
        self.shared.peek_delay_pending(ts)
    }
}

/// A bounded workspace accumulating one flush cycle's worth of input and
/// output, plus the timing script tying them together.
#[derive(Debug, Clone)]
pub struct Chunk {
    shared: ChunkShared,
    input: Stream,
    output: Stream,
}

impl Chunk {
    pub fn new(size: usize) -> Result<Self> {
        if size < CHUNK_SIZE_MIN {
            return Err(Error::with_detail(
                ErrorKind::Config,
                format!("chunk size {size} is below the minimum of {CHUNK_SIZE_MIN}"),
            ));
        }
        Ok(Chunk {
            shared: ChunkShared {
                size,
                rem: size,
                timing_buf: Vec::with_capacity(size),
                got_ts: false,
                first_ts: Timestamp::default(),
                last_ts: Timestamp::default(),
                window_state: WindowState::Void,
                last_width: 0,
                last_height: 0,
            },
            input: Stream::new(MARK_VALID_INPUT, MARK_INVALID_INPUT),
            output: Stream::new(MARK_VALID_OUTPUT, MARK_INVALID_OUTPUT),
        })
    }

    pub fn is_pending(&self) -> bool {
        self.input.is_pending() || self.output.is_pending()
    }

    pub fn is_empty(&self) -> bool {
        self.shared.rem >= self.shared.size
    }

    pub fn timing(&self) -> &[u8] {
        &self.shared.timing_buf
    }

    /// Timestamp of the chunk's first write since the last `empty()`, or
    /// the zero timestamp if the chunk has seen none yet.
    pub fn first_ts(&self) -> Timestamp {
        self.shared.first_ts
    }

    pub fn input_txt(&self) -> &[u8] {
        self.input.txt()
    }

    pub fn input_bin(&self) -> &[u8] {
        self.input.bin()
    }

    pub fn output_txt(&self) -> &[u8] {
        self.output.txt()
    }

    pub fn output_bin(&self) -> &[u8] {
        self.output.bin()
    }

    /// Write as much of `pkt`'s payload between `*pos` and `end` as
    /// fits. Returns whether the whole of the requested range fit;
    /// `*pos` is advanced by however much did, even on partial failure.
    pub fn write(&mut self, pkt: &Packet, pos: &mut PacketPos, end: &PacketPos) -> bool {
        assert!(!pkt.is_void());
        let mut trx = Trx::new();
        let frame = Frame::begin(&mut trx, self);

        let start = *pos;
        let mut cursor = *pos;
        let complete = match pkt {
            Packet::Io { ts, output, bytes } => {
                self.write_io(&mut trx, *ts, *output, bytes, &mut cursor, end)
            }
            Packet::Window { ts, width, height } => {
                self.write_window(&mut trx, *ts, *width, *height, &mut cursor, end)
            }
            Packet::Void => unreachable!("caller asserts pkt is not Void"),
        };

        if !complete && cursor == start {
            frame.abort(&mut trx, self);
            return false;
        }

        frame.commit(&mut trx);
        *pos = cursor;
        complete
    }

    fn write_io(
        &mut self,
        trx: &mut Trx,
        ts: Timestamp,
        output: bool,
        bytes: &[u8],
        pos: &mut PacketPos,
        end: &PacketPos,
    ) -> bool {
        let (PacketPos::Io(start), PacketPos::Io(stop)) = (*pos, *end) else {
            panic!("io packet requires io positions");
        };
        if start >= stop {
            return true;
        }
        let slice = &bytes[start..stop];
        let consumed = if output {
            let mut dispatcher = StreamDispatcher { shared: &mut self.shared, other: &mut self.input };
            self.output.write(&mut dispatcher, trx, ts, slice)
        } else {
            let mut dispatcher = StreamDispatcher { shared: &mut self.shared, other: &mut self.output };
            self.input.write(&mut dispatcher, trx, ts, slice)
        };
        pos.move_by(consumed);
        consumed == slice.len()
    }

    fn write_window(
        &mut self,
        trx: &mut Trx,
        ts: Timestamp,
        width: u16,
        height: u16,
        pos: &mut PacketPos,
        end: &PacketPos,
    ) -> bool {
        if *pos >= *end {
            return true;
        }
        let frame = Frame::begin(trx, &self.shared);

        if self.shared.window_state != WindowState::Void
            && width == self.shared.last_width
            && height == self.shared.last_height
        {
            *pos = PacketPos::Window(true);
            frame.commit(trx);
            return true;
        }

        self.input.flush(&mut self.shared, trx);
        self.output.flush(&mut self.shared, trx);

        if !self.shared.do_advance(trx, ts) {
            frame.abort(trx, &mut self.shared);
            return false;
        }

        self.shared.window_state = WindowState::Reserved;
        let record = window_record(width, height);
        if !self.shared.charge(record.len()) {
            frame.abort(trx, &mut self.shared);
            return false;
        }

        self.shared.window_state = WindowState::Written;
        self.shared.timing_buf.extend_from_slice(record.as_bytes());
        self.shared.last_width = width;
        self.shared.last_height = height;

        *pos = PacketPos::Window(true);
        frame.commit(trx);
        true
    }

    /// Flush both streams' pending runs. A no-op on an already-flushed
    /// chunk.
    pub fn flush(&mut self) {
        let mut trx = Trx::new();
        self.input.flush(&mut self.shared, &mut trx);
        self.output.flush(&mut self.shared, &mut trx);
    }

    /// Force any mid-assembly UTF-8 characters in either stream to be
    /// treated as invalid, so the chunk can be cleanly flushed.
    pub fn cut(&mut self) -> bool {
        let mut trx = Trx::new();
        let frame = Frame::begin(&mut trx, self);

        let input_ok = {
            let mut dispatcher = StreamDispatcher { shared: &mut self.shared, other: &mut self.output };
            self.input.cut(&mut dispatcher, &mut trx)
        };
        let output_ok = {
            let mut dispatcher = StreamDispatcher { shared: &mut self.shared, other: &mut self.input };
            self.output.cut(&mut dispatcher, &mut trx)
        };

        if !input_ok || !output_ok {
            frame.abort(&mut trx, self);
            return false;
        }
        frame.commit(&mut trx);
        true
    }

    /// Return the chunk to its initial state, except that a `Known`
    /// window size survives (it will be lazily re-asserted on the next
    /// write) and the UTF-8 accumulators are untouched.
    pub fn empty(&mut self) {
        self.shared.rem = self.shared.size;
        self.shared.timing_buf.clear();
        self.shared.got_ts = false;
        self.shared.first_ts = Timestamp::default();
        self.shared.last_ts = Timestamp::default();
        if self.shared.window_state > WindowState::Known {
            self.shared.window_state = WindowState::Known;
        }
        self.input.empty();
        self.output.empty();
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn rejects_undersized_chunk() {
        assert!(Chunk::new(CHUNK_SIZE_MIN - 1).is_err());
        assert!(Chunk::new(CHUNK_SIZE_MIN).is_ok());
    }

    #[test]
    fn single_window_packet_writes_timing_with_no_payload() {
        let mut chunk = Chunk::new(64).unwrap();
        let pkt = Packet::Window { ts: Timestamp::default(), width: 100, height: 200 };
        let mut pos = pkt.start_pos();
        let end = pkt.end_pos();
        assert!(chunk.write(&pkt, &mut pos, &end));
        chunk.flush();
        assert_eq!(chunk.timing(), b"=100x200");
        assert!(chunk.input_txt().is_empty());
        assert!(chunk.output_txt().is_empty());
    }

    #[test]
    fn output_text_packet_round_trips() {
        let mut chunk = Chunk::new(64).unwrap();
        let pkt = Packet::Io { ts: Timestamp::default(), output: true, bytes: b"A".to_vec() };
        let mut pos = pkt.start_pos();
        let end = pkt.end_pos();
        assert!(chunk.write(&pkt, &mut pos, &end));
        chunk.flush();
        assert_eq!(chunk.timing(), b">1");
        assert_eq!(chunk.output_txt(), b"A");
    }

    #[test]
    fn multi_byte_char_split_across_packets_joins_into_one_line() {
        let mut chunk = Chunk::new(64).unwrap();
        let pkt1 = Packet::Io { ts: Timestamp::default(), output: true, bytes: vec![0xf0, 0x9d] };
        let mut pos1 = pkt1.start_pos();
        let end1 = pkt1.end_pos();
        assert!(chunk.write(&pkt1, &mut pos1, &end1));
        assert!(chunk.is_pending());

        let pkt2 = Packet::Io { ts: Timestamp::default(), output: true, bytes: vec![0x84, 0x9e] };
        let mut pos2 = pkt2.start_pos();
        let end2 = pkt2.end_pos();
        assert!(chunk.write(&pkt2, &mut pos2, &end2));
        assert!(!chunk.is_pending());

        chunk.flush();
        assert_eq!(chunk.timing(), b">1");
        assert_eq!(chunk.output_txt(), [0xf0u8, 0x9d, 0x84, 0x9e]);
    }

    #[test]
    fn incomplete_char_cut_at_flush_boundary() {
        let mut chunk = Chunk::new(64).unwrap();
        let pkt = Packet::Io { ts: Timestamp::default(), output: true, bytes: vec![0xf0, 0x9d, 0x84] };
        let mut pos = pkt.start_pos();
        let end = pkt.end_pos();
        assert!(chunk.write(&pkt, &mut pos, &end));
        assert!(chunk.is_pending());
        assert!(chunk.cut());
        assert!(!chunk.is_pending());
        chunk.flush();
        assert_eq!(chunk.timing(), b"]1/3");
        assert_eq!(chunk.output_bin(), &[240, 157, 132]);
    }

    #[test]
    fn delay_between_packets_is_recorded() {
        let mut chunk = Chunk::new(64).unwrap();
        let pkt1 = Packet::Io { ts: Timestamp::new(0, 0), output: false, bytes: b"A".to_vec() };
        let mut pos1 = pkt1.start_pos();
        let end1 = pkt1.end_pos();
        assert!(chunk.write(&pkt1, &mut pos1, &end1));

        let pkt2 = Packet::Io {
            ts: Timestamp::new(0, 1_100_000),
            output: true,
            bytes: b"B".to_vec(),
        };
        let mut pos2 = pkt2.start_pos();
        let end2 = pkt2.end_pos();
        assert!(chunk.write(&pkt2, &mut pos2, &end2));
        chunk.flush();

        assert_eq!(chunk.timing(), b"<1+1>1");
        assert_eq!(chunk.input_txt(), b"A");
        assert_eq!(chunk.output_txt(), b"B");
    }

    #[test]
    fn window_known_after_empty_is_reasserted_on_next_write() {
        let mut chunk = Chunk::new(64).unwrap();
        let win = Packet::Window { ts: Timestamp::default(), width: 80, height: 24 };
        let mut wpos = win.start_pos();
        let wend = win.end_pos();
        assert!(chunk.write(&win, &mut wpos, &wend));
        chunk.flush();
        chunk.empty();
        assert!(chunk.is_empty());

        let io = Packet::Io { ts: Timestamp::default(), output: true, bytes: b"A".to_vec() };
        let mut ipos = io.start_pos();
        let iend = io.end_pos();
        assert!(chunk.write(&io, &mut ipos, &iend));
        chunk.flush();
        assert_eq!(chunk.timing(), b"=80x24>1");
    }

    #[test]
    fn repeated_window_size_is_a_no_op() {
        let mut chunk = Chunk::new(64).unwrap();
        let win1 = Packet::Window { ts: Timestamp::default(), width: 80, height: 24 };
        let mut pos1 = win1.start_pos();
        let end1 = win1.end_pos();
        assert!(chunk.write(&win1, &mut pos1, &end1));
        chunk.flush();

        let win2 = Packet::Window { ts: Timestamp::default(), width: 80, height: 24 };
        let mut pos2 = win2.start_pos();
        let end2 = win2.end_pos();
        assert!(chunk.write(&win2, &mut pos2, &end2));
        chunk.flush();

        assert_eq!(chunk.timing(), b"=80x24");
    }

    #[test]
    fn overflow_leaves_chunk_unchanged() {
        let mut chunk = Chunk::new(CHUNK_SIZE_MIN).unwrap();
        let huge = vec![b'A'; CHUNK_SIZE_MIN * 4];
        let pkt = Packet::Io { ts: Timestamp::default(), output: true, bytes: huge };
        let mut pos = pkt.start_pos();
        let end = pkt.end_pos();
        let complete = chunk.write(&pkt, &mut pos, &end);
        assert!(!complete);
        // Whatever fit was committed; the rest is left for the next chunk.
        assert!(matches!(pos, PacketPos::Io(n) if n > 0));
    }
}
