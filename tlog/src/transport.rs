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

//! Transport traits plus the concrete implementors this crate carries,
//! grounded on `lib/fd_reader.c`/`lib/fd_writer.c`'s function-pointer
//! tables, replaced here with a plain trait pair.

use std::{
    fs::{File, OpenOptions},
    io::{self, BufRead, BufReader, BufWriter, Write},
    path::Path,
};

use crate::error::{Error, ErrorKind, Result};

/// A source of JSON objects, one per physical line.
pub trait Reader {
    /// Read the next object, or `None` at end of stream.
    fn read(&mut self) -> Result<Option<serde_json::Value>>;
}

/// A sink for complete JSON lines.
pub trait Writer {
    /// Write one complete, `\n`-terminated JSON line. `id` identifies the
    /// session the line belongs to; transports that multiplex several
    /// sessions (syslog, journal) use it to tag the record. Must be
    /// all-or-nothing.
    fn write(&mut self, id: u64, line: &str) -> Result<()>;
}

/// Parse one non-blank physical line as a single JSON object. A parse
/// failure is reported as `IncompleteLine`: this crate requires a
/// message object to close within the line it starts on, matching the
/// original reader's "object not finished by the terminating newline"
/// error.
fn parse_line(trimmed: &str, line_no: usize) -> Result<serde_json::Value> {
    serde_json::from_str(trimmed)
        .map_err(|_| Error::with_detail(ErrorKind::IncompleteLine, format!("line {line_no}")))
}

fn is_blank(line: &str) -> bool {
    line.chars().all(|c| matches!(c, ' ' | '\t' | '\r' | '\x0c' | '\x0b'))
}

/// Reads line-delimited JSON session records from a file.
pub struct FileReader {
    lines: io::Lines<BufReader<File>>,
    line_no: usize,
}

impl FileReader {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path)?;
        Ok(FileReader { lines: BufReader::new(file).lines(), line_no: 0 })
    }
}

impl Reader for FileReader {
    fn read(&mut self) -> Result<Option<serde_json::Value>> {
        loop {
            let Some(line) = self.lines.next() else { return Ok(None) };
            let line = line?;
            self.line_no += 1;
            if is_blank(&line) {
                continue;
            }
            return Ok(Some(parse_line(line.trim(), self.line_no)?));
        }
    }
}

/// Writes line-delimited JSON session records to a file.
pub struct FileWriter {
    file: BufWriter<File>,
}

impl FileWriter {
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::create(path)?;
        Ok(FileWriter { file: BufWriter::new(file) })
    }

    pub fn append(path: impl AsRef<Path>) -> Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(FileWriter { file: BufWriter::new(file) })
    }
}

impl Writer for FileWriter {
    fn write(&mut self, _id: u64, line: &str) -> Result<()> {
        self.file.write_all(line.as_bytes())?;
        self.file.flush()?;
        Ok(())
    }
}

/// An in-memory reader over a pre-built log, for tests.
pub struct MemReader {
    lines: std::vec::IntoIter<String>,
    line_no: usize,
}

impl MemReader {
    pub fn new(data: &str) -> Self {
        let lines = data.lines().map(str::to_string).collect::<Vec<_>>().into_iter();
        MemReader { lines, line_no: 0 }
    }
}

impl Reader for MemReader {
    fn read(&mut self) -> Result<Option<serde_json::Value>> {
        loop {
            let Some(line) = self.lines.next() else { return Ok(None) };
            self.line_no += 1;
            if is_blank(&line) {
                continue;
            }
            return Ok(Some(parse_line(line.trim(), self.line_no)?));
        }
    }
}

/// An in-memory writer collecting lines into one buffer, for tests.
#[derive(Debug, Default)]
pub struct MemWriter {
    buf: String,
}

impl MemWriter {
    pub fn new() -> Self {
        MemWriter::default()
    }

    pub fn as_str(&self) -> &str {
        &self.buf
    }

    pub fn into_string(self) -> String {
        self.buf
    }
}

impl Writer for MemWriter {
    fn write(&mut self, _id: u64, line: &str) -> Result<()> {
        self.buf.push_str(line);
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn mem_reader_skips_blank_lines() {
        let mut reader = MemReader::new("\n  \n{\"a\":1}\n");
        let value = reader.read().unwrap().unwrap();
        assert_eq!(value, serde_json::json!({"a": 1}));
        assert_eq!(reader.read().unwrap(), None);
    }

    #[test]
    fn mem_reader_rejects_unparsable_line() {
        let mut reader = MemReader::new("{\"a\":\n");
        let err = reader.read().unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::IncompleteLine);
    }

    #[test]
    fn mem_writer_collects_written_lines() {
        let mut writer = MemWriter::new();
        writer.write(1, "{\"a\":1}\n").unwrap();
        writer.write(1, "{\"a\":2}\n").unwrap();
        assert_eq!(writer.into_string(), "{\"a\":1}\n{\"a\":2}\n");
    }

    #[test]
    fn file_reader_and_writer_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.json");
        {
            let mut writer = FileWriter::create(&path).unwrap();
            writer.write(1, "{\"a\":1}\n").unwrap();
        }
        let mut reader = FileReader::open(&path).unwrap();
        let value = reader.read().unwrap().unwrap();
        assert_eq!(value, serde_json::json!({"a": 1}));
        assert_eq!(reader.read().unwrap(), None);
    }
}
