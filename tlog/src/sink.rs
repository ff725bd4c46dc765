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

//! Frames a chunk's contents into line-delimited JSON, grounded on
//! `tlog_sink.c`'s emission logic and the canonical (`json_chunk.c`)
//! schema rather than the older `tlog_io` one it still tests (see
//! `lib/sink_test.c`).

use tlog_wire::Record;
use tracing::{debug, error};

use crate::{
    chunk::Chunk,
    error::{Error, ErrorKind, Result},
    pkt::{Packet, Timestamp},
    transport::Writer,
};

/// Frames packets written to it into `\n`-terminated JSON lines handed
/// to a [`Writer`]. Owns one [`Chunk`] as its working buffer and a
/// monotonic per-line `id` starting at 1.
pub struct Sink<W> {
    writer: W,
    host: String,
    rec: Option<String>,
    user: String,
    term: String,
    session: u32,
    start: Timestamp,
    next_id: u64,
    chunk: Chunk,
}

impl<W: Writer> Sink<W> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        writer: W,
        host: impl Into<String>,
        user: impl Into<String>,
        term: impl Into<String>,
        session: u32,
        rec: Option<String>,
        payload_size: usize,
        start: Timestamp,
    ) -> Result<Self> {
        Ok(Sink {
            writer,
            host: host.into(),
            rec,
            user: user.into(),
            term: term.into(),
            session,
            start,
            next_id: 1,
            chunk: Chunk::new(payload_size)?,
        })
    }

    /// Write `pkt` into the current chunk, flushing and retrying the
    /// remainder as many times as the packet's payload does not fit a
    /// single chunk.
    pub fn write(&mut self, pkt: &Packet) -> Result<()> {
        if pkt.is_void() {
            return Ok(());
        }
        let mut pos = pkt.start_pos();
        let end = pkt.end_pos();
        while pos != end {
            let complete = self.chunk.write(pkt, &mut pos, &end);
            if complete {
                break;
            }
            if self.chunk.is_empty() {
                error!(?pos, ?end, "packet too large for an empty chunk");
                return Err(Error::new(ErrorKind::ChunkOverflow));
            }
            debug!(id = self.next_id, "chunk full, flushing to make room");
            self.flush()?;
        }
        Ok(())
    }

    /// Unwrap the sink, discarding any unflushed chunk contents, to
    /// reclaim the underlying writer.
    pub fn into_inner(self) -> W {
        self.writer
    }

    /// Force any mid-assembly UTF-8 character in either stream to be
    /// materialized as an invalid run, so a following `flush` carries no
    /// leftover partial character.
    pub fn cut(&mut self) -> bool {
        self.chunk.cut()
    }

    /// Emit the current chunk as one JSON line, if it holds anything.
    /// Advances `id` and empties the chunk on success.
    pub fn flush(&mut self) -> Result<()> {
        if self.chunk.is_empty() {
            return Ok(());
        }

        let pos = self.chunk.first_ts().saturating_sub(self.start).as_millis();
        let record = Record {
            ver: tlog_wire::VERSION.to_string(),
            host: self.host.clone(),
            rec: self.rec.clone(),
            user: self.user.clone(),
            term: self.term.clone(),
            session: self.session,
            id: self.next_id,
            pos,
            timing: utf8(self.chunk.timing()),
            in_txt: utf8(self.chunk.input_txt()),
            in_bin: self.chunk.input_bin().to_vec(),
            out_txt: utf8(self.chunk.output_txt()),
            out_bin: self.chunk.output_bin().to_vec(),
        };
        let line = record.to_line().expect("wire record always serializes");
        self.writer.write(self.session as u64, &line)?;

        self.next_id += 1;
        self.chunk.empty();
        Ok(())
    }
}

/// The chunk only ever accumulates ASCII timing tokens and text runs
/// built from validated UTF-8 (original bytes or the replacement
/// character), so this conversion cannot fail.
fn utf8(bytes: &[u8]) -> String {
    String::from_utf8(bytes.to_vec()).expect("chunk buffers are always valid UTF-8")
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::transport::MemWriter;

    fn sink(payload: usize) -> Sink<MemWriter> {
        Sink::new(MemWriter::new(), "localhost", "user", "xterm", 1, None, payload, Timestamp::default()).unwrap()
    }

    #[test]
    fn window_only_write_then_flush_emits_one_line() {
        let mut sink = sink(32);
        sink.write(&Packet::Window { ts: Timestamp::default(), width: 100, height: 200 }).unwrap();
        sink.flush().unwrap();
        let line = sink.writer.into_string();
        assert!(line.contains("\"timing\":\"=100x200\""));
        assert!(line.contains("\"id\":1"));
        assert!(line.contains("\"pos\":0"));
        assert!(line.ends_with('\n'));
    }

    #[test]
    fn output_text_round_trips_through_one_line() {
        let mut sink = sink(32);
        sink.write(&Packet::Io { ts: Timestamp::default(), output: true, bytes: b"A".to_vec() }).unwrap();
        sink.flush().unwrap();
        let line = sink.writer.into_string();
        assert!(line.contains("\"timing\":\">1\""));
        assert!(line.contains("\"out_txt\":\"A\""));
    }

    #[test]
    fn flush_on_empty_chunk_is_a_no_op() {
        let mut sink = sink(32);
        sink.flush().unwrap();
        assert_eq!(sink.writer.as_str(), "");
    }

    #[test]
    fn overflowing_payload_splits_across_two_lines() {
        // A chunk of the minimum size (32 bytes) fits 29 plain-ASCII
        // characters of one run before its budget is exhausted: `write`
        // flushes internally and continues with the other 11 into a
        // fresh chunk.
        let mut sink = sink(crate::consts::CHUNK_SIZE_MIN);
        let bytes = vec![b'A'; 40];
        sink.write(&Packet::Io { ts: Timestamp::default(), output: true, bytes }).unwrap();
        sink.flush().unwrap();
        let out = sink.writer.into_string();
        let lines: Vec<serde_json::Value> =
            out.lines().map(|l| serde_json::from_str(l).unwrap()).collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["id"], 1);
        assert_eq!(lines[1]["id"], 2);
        let first = lines[0]["out_txt"].as_str().unwrap();
        let second = lines[1]["out_txt"].as_str().unwrap();
        assert_eq!(first.len() + second.len(), 40);
        assert_eq!(format!("{first}{second}"), "A".repeat(40));
    }

    #[test]
    fn ids_increment_across_flushes() {
        let mut sink = sink(32);
        sink.write(&Packet::Io { ts: Timestamp::default(), output: false, bytes: b"A".to_vec() }).unwrap();
        sink.flush().unwrap();
        sink.write(&Packet::Io {
            ts: Timestamp::new(0, 1_000_000),
            output: true,
            bytes: b"B".to_vec(),
        })
        .unwrap();
        sink.flush().unwrap();
        let out = sink.writer.into_string();
        let lines: Vec<&str> = out.lines().collect();
        assert!(lines[0].contains("\"id\":1"));
        assert!(lines[1].contains("\"id\":2"));
        assert!(lines[1].contains("\"pos\":1"));
    }
}
