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

//! Per-direction stream encoder, grounded on `lib/json_stream.c`. Encodes
//! a run of bytes into parallel JSON text/binary fragments plus
//! contributions to the chunk's timing script, talking to its enclosing
//! chunk only through a [`Dispatcher`].

use crate::{dispatcher::Dispatcher, pkt::Timestamp, trx::Frame, trx::Trx, utf8::Accumulator};

const REPLACEMENT_CHAR: [u8; 3] = [0xef, 0xbf, 0xbd];

/// One direction (input or output) inside a chunk.
#[derive(Debug, Clone)]
pub struct Stream {
    valid_mark: u8,
    invalid_mark: u8,
    txt_buf: Vec<u8>,
    txt_run: usize,
    txt_dig: usize,
    bin_buf: Vec<u8>,
    bin_run: usize,
    bin_dig: usize,
    utf8: Accumulator,
    /// Timestamp of the most recently admitted byte of the character
    /// currently being assembled.
    ts: Timestamp,
}

impl Stream {
    pub fn new(valid_mark: u8, invalid_mark: u8) -> Self {
        assert_ne!(valid_mark, invalid_mark);
        Stream {
            valid_mark,
            invalid_mark,
            txt_buf: Vec::new(),
            txt_run: 0,
            txt_dig: 0,
            bin_buf: Vec::new(),
            bin_run: 0,
            bin_dig: 0,
            utf8: Accumulator::new(),
            ts: Timestamp::default(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.txt_buf.is_empty() && self.bin_buf.is_empty()
    }

    /// True if a UTF-8 character is mid-assembly (started, not yet ended).
    pub fn is_pending(&self) -> bool {
        self.utf8.is_started()
    }

    pub fn txt(&self) -> &[u8] {
        &self.txt_buf
    }

    pub fn bin(&self) -> &[u8] {
        &self.bin_buf
    }

    /// Encode one (possibly multi-byte) sequence into the text buffer,
    /// JSON-escaping it if it is a single byte. Mirrors
    /// `tlog_json_stream_enc_txt`: the run/digit bookkeeping reserves one
    /// extra byte whenever the run's printed length is about to grow an
    /// extra digit, anticipating the eventual meta record.
    fn enc_txt(&mut self, dispatcher: &mut dyn Dispatcher, trx: &mut Trx, input: &[u8]) -> bool {
        if input.is_empty() {
            return true;
        }
        let frame = Frame::begin(trx, self);

        if self.txt_run == 0 {
            self.txt_dig = 10;
            if !dispatcher.reserve(trx, 2) {
                frame.abort(trx, self);
                return false;
            }
        }
        self.txt_run += 1;
        if self.txt_run >= self.txt_dig {
            if !dispatcher.reserve(trx, 1) {
                frame.abort(trx, self);
                return false;
            }
            self.txt_dig *= 10;
        }

        if input.len() > 1 {
            // A complete multi-byte UTF-8 character (or the 3-byte
            // replacement character) never needs JSON escaping.
            if !dispatcher.reserve(trx, input.len()) {
                frame.abort(trx, self);
                return false;
            }
            self.txt_buf.extend_from_slice(input);
        } else {
            let c = input[0];
            // Budget for the length the byte will occupy once the final
            // line is JSON-serialized, but store the raw byte: the
            // eventual `serde_json` pass performs the actual escaping,
            // so storing pre-escaped text here would double-escape it.
            let reserved = match c {
                b'"' | b'\\' | 0x08 | 0x0c | b'\n' | b'\r' | b'\t' => 2,
                _ if c < 0x20 || c == 0x7f => 6,
                _ => 1,
            };
            if !dispatcher.reserve(trx, reserved) {
                frame.abort(trx, self);
                return false;
            }
            self.txt_buf.push(c);
        }

        frame.commit(trx);
        true
    }

    /// Encode one raw invalid byte into the binary buffer. Mirrors
    /// `tlog_json_stream_enc_bin`'s run/digit bookkeeping, but the
    /// original writes a comma-separated decimal run straight into the
    /// hand-built JSON text; here the final line is built by `serde`
    /// from a real `Vec<u8>`, so the buffer holds raw byte values and
    /// the reservation alone models the decimal text width (plus
    /// separating comma) those bytes will cost once serialized.
    fn enc_bin(&mut self, dispatcher: &mut dyn Dispatcher, trx: &mut Trx, input: &[u8]) -> bool {
        if input.is_empty() {
            return true;
        }
        let frame = Frame::begin(trx, self);

        if self.bin_run == 0 {
            self.bin_dig = 10;
            if !dispatcher.reserve(trx, 2) {
                frame.abort(trx, self);
                return false;
            }
        }

        for &byte in input {
            self.bin_run += 1;
            if self.bin_run >= self.bin_dig {
                if !dispatcher.reserve(trx, 1) {
                    frame.abort(trx, self);
                    return false;
                }
                self.bin_dig *= 10;
            }
            let digits = byte.to_string();
            if !self.bin_buf.is_empty() {
                if !dispatcher.reserve(trx, 1 + digits.len()) {
                    frame.abort(trx, self);
                    return false;
                }
            } else if !dispatcher.reserve(trx, digits.len()) {
                frame.abort(trx, self);
                return false;
            }
            self.bin_buf.push(byte);
        }

        frame.commit(trx);
        true
    }

    /// Emit the pending run meta-record(s), if any, and reset both runs.
    /// Does not need to reserve: the run encoders already pre-charged the
    /// eventual meta record's growth.
    pub fn flush(&mut self, dispatcher: &mut dyn Dispatcher, trx: &mut Trx) {
        if self.txt_run != 0 {
            let mark = if self.bin_run == 0 { self.valid_mark } else { self.invalid_mark };
            let record = format!("{}{}", mark as char, self.txt_run);
            dispatcher.write(trx, record.as_bytes());
        }
        if self.bin_run != 0 {
            let record = format!("/{}", self.bin_run);
            dispatcher.write(trx, record.as_bytes());
        }
        self.txt_run = 0;
        self.bin_run = 0;
    }

    /// Atomically write one character (valid UTF-8 `buf`, or a single
    /// invalid byte when `!valid`) at timestamp `ts`.
    fn write_seq(
        &mut self,
        dispatcher: &mut dyn Dispatcher,
        trx: &mut Trx,
        ts: Timestamp,
        valid: bool,
        buf: &[u8],
    ) -> bool {
        if buf.is_empty() {
            return true;
        }
        let frame = Frame::begin(trx, self);

        if (!valid) != (self.bin_run != 0) {
            self.flush(dispatcher, trx);
        }

        // A chunk-level dispatcher flushes the *other* stream when a
        // delay record is about to be written; it has no access to this
        // stream, so this stream flushes its own pending run here.
        if dispatcher.delay_pending(ts) {
            self.flush(dispatcher, trx);
        }

        if !dispatcher.advance(trx, ts) {
            frame.abort(trx, self);
            return false;
        }

        if valid {
            if !self.enc_txt(dispatcher, trx, buf) {
                frame.abort(trx, self);
                return false;
            }
        } else {
            if !self.enc_txt(dispatcher, trx, &REPLACEMENT_CHAR) {
                frame.abort(trx, self);
                return false;
            }
            if !self.enc_bin(dispatcher, trx, buf) {
                frame.abort(trx, self);
                return false;
            }
        }

        frame.commit(trx);
        true
    }

    /// Feed as much of `buf` as fits, admitting bytes into the UTF-8
    /// accumulator and writing out completed (or invalid) characters.
    /// Returns the number of bytes consumed; an incomplete character is
    /// left buffered in the accumulator across calls.
    pub fn write(
        &mut self,
        dispatcher: &mut dyn Dispatcher,
        trx: &mut Trx,
        ts: Timestamp,
        buf: &[u8],
    ) -> usize {
        assert!(!self.utf8.is_ended());
        let mut cursor = 0usize;

        loop {
            let start_cursor = cursor;
            let frame = Frame::begin(trx, self);

            loop {
                if cursor == buf.len() {
                    frame.commit(trx);
                    return cursor;
                }
                if self.utf8.add(buf[cursor]) {
                    cursor += 1;
                    self.ts = ts;
                }
                if self.utf8.is_ended() {
                    break;
                }
            }

            if self.utf8.len() == 0 {
                // The byte at `cursor` was an invalid leading byte and was
                // not admitted into the accumulator; write it directly.
                if !self.write_seq(dispatcher, trx, ts, false, &buf[cursor..cursor + 1]) {
                    frame.abort(trx, self);
                    return cursor;
                }
                cursor += 1;
            } else {
                let complete = self.utf8.is_complete();
                let char_ts = self.ts;
                let char_bytes = self.utf8.buf().to_vec();
                if !self.write_seq(dispatcher, trx, char_ts, complete, &char_bytes) {
                    cursor = start_cursor;
                    frame.abort(trx, self);
                    return cursor;
                }
            }
            self.utf8.reset();
            frame.commit(trx);
        }
    }

    /// Force any partially-assembled character to be treated as invalid,
    /// so the stream can be cleanly flushed. Leaves the accumulator reset
    /// on success.
    pub fn cut(&mut self, dispatcher: &mut dyn Dispatcher, trx: &mut Trx) -> bool {
        assert!(!self.utf8.is_ended());
        let frame = Frame::begin(trx, self);
        let bytes = self.utf8.buf().to_vec();
        let ts = self.ts;
        if self.write_seq(dispatcher, trx, ts, false, &bytes) {
            self.utf8.reset();
            frame.commit(trx);
            true
        } else {
            frame.abort(trx, self);
            false
        }
    }

    /// Reset buffered text/binary lengths and runs to zero. Does not
    /// touch the UTF-8 accumulator.
    pub fn empty(&mut self) {
        self.txt_buf.clear();
        self.txt_run = 0;
        self.bin_buf.clear();
        self.bin_run = 0;
    }
}

#[cfg(test)]
mod test {
    use super::*;

    /// A stub dispatcher for isolated stream testing: an unlimited or
    /// fixed budget, with writes recorded for inspection.
    struct StubDispatcher {
        remaining: usize,
        written: Vec<u8>,
        advances: Vec<Timestamp>,
    }

    impl StubDispatcher {
        fn new(remaining: usize) -> Self {
            StubDispatcher { remaining, written: Vec::new(), advances: Vec::new() }
        }
    }

    impl Dispatcher for StubDispatcher {
        fn advance(&mut self, _trx: &mut Trx, ts: Timestamp) -> bool {
            self.advances.push(ts);
            true
        }

        fn reserve(&mut self, _trx: &mut Trx, n: usize) -> bool {
            if n > self.remaining {
                return false;
            }
            self.remaining -= n;
            true
        }

        fn write(&mut self, _trx: &mut Trx, bytes: &[u8]) {
            self.written.extend_from_slice(bytes);
        }

        fn delay_pending(&self, _ts: Timestamp) -> bool {
            false
        }
    }

    #[test]
    fn ascii_round_trips_through_txt_buf() {
        let mut stream = Stream::new(b'<', b'[');
        let mut dispatcher = StubDispatcher::new(1024);
        let mut trx = Trx::new();
        let written = stream.write(&mut dispatcher, &mut trx, Timestamp::default(), b"AB");
        assert_eq!(written, 2);
        assert_eq!(stream.txt(), b"AB");
        assert!(stream.bin().is_empty());
    }

    #[test]
    fn control_chars_stored_raw_but_budgeted_as_escaped() {
        // txt_buf holds raw bytes; serde_json escapes them when the line
        // is finally serialized, so storing pre-escaped text here would
        // double-escape it. Only the dispatcher budget reflects the
        // escaped length.
        let mut stream = Stream::new(b'<', b'[');
        let mut dispatcher = StubDispatcher::new(1024);
        let mut trx = Trx::new();
        stream.write(&mut dispatcher, &mut trx, Timestamp::default(), b"\"\n\x01");
        assert_eq!(stream.txt(), b"\"\n\x01");
    }

    #[test]
    fn invalid_leading_byte_emits_replacement_and_binary() {
        let mut stream = Stream::new(b'>', b']');
        let mut dispatcher = StubDispatcher::new(1024);
        let mut trx = Trx::new();
        stream.write(&mut dispatcher, &mut trx, Timestamp::default(), &[0xff]);
        assert_eq!(stream.txt(), REPLACEMENT_CHAR.as_slice());
        assert_eq!(stream.bin(), &[255]);
        stream.flush(&mut dispatcher, &mut trx);
        assert_eq!(dispatcher.written, b"]1/1");
    }

    #[test]
    fn multi_byte_char_split_across_writes_uses_last_byte_timestamp() {
        let mut stream = Stream::new(b'>', b']');
        let mut dispatcher = StubDispatcher::new(1024);
        let mut trx = Trx::new();
        let ts0 = Timestamp::new(0, 0);
        let ts1 = Timestamp::new(0, 5_000_000);
        stream.write(&mut dispatcher, &mut trx, ts0, &[0xf0, 0x9d]);
        assert!(stream.is_pending());
        stream.write(&mut dispatcher, &mut trx, ts1, &[0x84, 0x9e]);
        assert!(!stream.is_pending());
        assert_eq!(stream.txt(), [0xf0u8, 0x9d, 0x84, 0x9e]);
        assert_eq!(dispatcher.advances.last(), Some(&ts1));
    }

    #[test]
    fn reserve_failure_rolls_back_buffers() {
        let mut stream = Stream::new(b'<', b'[');
        // Only enough budget for the marker reservation, not the byte.
        let mut dispatcher = StubDispatcher::new(1);
        let mut trx = Trx::new();
        let written = stream.write(&mut dispatcher, &mut trx, Timestamp::default(), b"A");
        assert_eq!(written, 0);
        assert!(stream.is_empty());
        assert_eq!(trx.depth(), 0);
    }

    #[test]
    fn cut_materializes_partial_accumulator() {
        let mut stream = Stream::new(b'>', b']');
        let mut dispatcher = StubDispatcher::new(1024);
        let mut trx = Trx::new();
        stream.write(&mut dispatcher, &mut trx, Timestamp::default(), &[0xf0, 0x9d, 0x84]);
        assert!(stream.is_pending());
        assert!(stream.cut(&mut dispatcher, &mut trx));
        assert!(!stream.is_pending());
        assert_eq!(stream.txt(), REPLACEMENT_CHAR.as_slice());
        assert_eq!(stream.bin(), &[240, 157, 132]);
    }

    #[test]
    fn empty_clears_buffers_not_accumulator() {
        let mut stream = Stream::new(b'<', b'[');
        let mut dispatcher = StubDispatcher::new(1024);
        let mut trx = Trx::new();
        stream.write(&mut dispatcher, &mut trx, Timestamp::default(), &[0xf0, 0x9d]);
        stream.empty();
        assert!(stream.is_empty());
        assert!(stream.is_pending());
    }
}
