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

//! JSON message schema validation and the timing mini-language reader,
//! grounded on `lib/json_msg.c`. A [`Message`] is a validated JSON
//! object plus a read cursor into its `timing` field: each call to
//! [`Message::read`] advances the cursor and yields the next packet
//! implied by the timing script, reassembling split text/binary runs
//! into I/O packets no larger than the caller's buffer.

use serde_json::Value;

use crate::{
    consts::{DELAY_MAX_MS, IO_SIZE_MIN, SCHEMA_VERSION_MAJOR_MAX, TIMING_DELAY, TIMING_WINDOW},
    error::{Error, ErrorKind, Result},
    pkt::{Packet, Timestamp},
};

/// One validated log message: the line-level envelope fields plus the
/// still-unparsed `timing`/text/binary payloads, and the read cursor
/// tracking how much of `timing` has been consumed.
#[derive(Debug, Clone)]
pub struct Message {
    ver_major: u32,
    host: String,
    rec: Option<String>,
    user: String,
    term: String,
    session: u32,
    id: u64,
    timing: String,
    in_txt: String,
    in_bin: Vec<u8>,
    out_txt: String,
    out_bin: Vec<u8>,
    cursor: Cursor,
}

#[derive(Debug, Clone)]
struct Cursor {
    timing_off: usize,
    pos: Timestamp,
    rem: u64,
    output: bool,
    binary: bool,
    in_txt_off: usize,
    out_txt_off: usize,
    in_bin_off: usize,
    out_bin_off: usize,
}

impl Message {
    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn rec(&self) -> Option<&str> {
        self.rec.as_deref()
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn term(&self) -> &str {
        &self.term
    }

    pub fn session(&self) -> u32 {
        self.session
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn ver_major(&self) -> u32 {
        self.ver_major
    }

    /// Validate a JSON value against the message schema.
    pub fn parse(value: &Value) -> Result<Message> {
        let obj = value
            .as_object()
            .ok_or_else(|| Error::new(ErrorKind::MsgFieldInvalidType("<root>")))?;

        let ver_major = parse_version(&get_ver_string(obj)?)?;
        let host = get_string(obj, "host")?;
        let rec = get_optional_string(obj, "rec")?;
        let user = get_string(obj, "user")?;
        let term = get_string(obj, "term")?;
        let session = get_session(obj)?;
        let id = get_id(obj)?;
        let pos_ms = get_pos(obj)?;
        let timing = get_string(obj, "timing")?;
        let in_txt = get_string(obj, "in_txt")?;
        let in_bin = get_byte_array(obj, "in_bin")?;
        let out_txt = get_string(obj, "out_txt")?;
        let out_bin = get_byte_array(obj, "out_bin")?;

        Ok(Message {
            ver_major,
            host,
            rec,
            user,
            term,
            session,
            id,
            timing,
            in_txt,
            in_bin,
            out_txt,
            out_bin,
            cursor: Cursor {
                timing_off: 0,
                pos: Timestamp::from_millis(pos_ms),
                rem: 0,
                output: false,
                binary: false,
                in_txt_off: 0,
                out_txt_off: 0,
                in_bin_off: 0,
                out_bin_off: 0,
            },
        })
    }

    /// Read the next packet out of the timing script, merging
    /// consecutive same-direction, same-kind runs into one I/O packet
    /// up to `io_size` bytes. Returns `Packet::Void` once the timing
    /// script is exhausted and nothing is left buffered.
    pub fn read(&mut self, io_size: usize) -> Result<Packet> {
        assert!(io_size >= IO_SIZE_MIN);
        let mut io_buf: Vec<u8> = Vec::new();
        let mut io_output = false;

        'outer: loop {
            if self.cursor.rem == 0 {
                let bytes = self.timing.as_bytes();
                while self.cursor.timing_off < bytes.len()
                    && matches!(bytes[self.cursor.timing_off], b' ' | 0x0c | b'\n' | b'\r' | b'\t' | 0x0b)
                {
                    self.cursor.timing_off += 1;
                }
                if self.cursor.timing_off >= bytes.len() {
                    break 'outer;
                }

                let rest = &self.timing[self.cursor.timing_off..];
                let (kind, first_val, mut consumed) = parse_timing_token(rest)?;
                let mut second_val: u64 = 0;
                match kind {
                    b'[' | b']' => {
                        let (v, c) = parse_suffixed_count(&rest[consumed..], b'/')?;
                        second_val = v;
                        consumed += c;
                    }
                    TIMING_WINDOW => {
                        let (v, c) = parse_suffixed_count(&rest[consumed..], b'x')?;
                        second_val = v;
                        consumed += c;
                    }
                    _ => {}
                }

                if kind == TIMING_DELAY {
                    if first_val != 0 {
                        if first_val > DELAY_MAX_MS {
                            return Err(Error::new(ErrorKind::MsgFieldInvalidValueTiming));
                        }
                        if !io_buf.is_empty() {
                            // Return what's buffered; re-read this delay next call.
                            break 'outer;
                        }
                        self.cursor.pos = self.cursor.pos.add(Timestamp::from_millis(first_val));
                    }
                    self.cursor.timing_off += consumed;
                    continue 'outer;
                } else if kind == TIMING_WINDOW {
                    if !io_buf.is_empty() {
                        break 'outer;
                    }
                    if first_val > u16::MAX as u64 || second_val > u16::MAX as u64 {
                        return Err(Error::new(ErrorKind::MsgFieldInvalidValueTiming));
                    }
                    self.cursor.timing_off += consumed;
                    return Ok(Packet::Window {
                        ts: self.cursor.pos,
                        width: first_val as u16,
                        height: second_val as u16,
                    });
                }

                match kind {
                    b'<' => {
                        self.cursor.output = false;
                        self.cursor.binary = false;
                        self.cursor.rem = first_val;
                    }
                    b'[' => {
                        self.cursor.output = false;
                        self.cursor.binary = true;
                        self.cursor.rem = second_val;
                    }
                    b'>' => {
                        self.cursor.output = true;
                        self.cursor.binary = false;
                        self.cursor.rem = first_val;
                    }
                    b']' => {
                        self.cursor.output = true;
                        self.cursor.binary = true;
                        self.cursor.rem = second_val;
                    }
                    _ => return Err(Error::new(ErrorKind::MsgFieldInvalidValueTiming)),
                }
                self.cursor.timing_off += consumed;

                if self.cursor.binary {
                    let (txt, txt_off) = if self.cursor.output {
                        (&self.out_txt, &mut self.cursor.out_txt_off)
                    } else {
                        (&self.in_txt, &mut self.cursor.in_txt_off)
                    };
                    skip_replacement_chars(txt.as_bytes(), txt_off, first_val)?;
                }

                if self.cursor.rem == 0 {
                    continue 'outer;
                }
            }

            if io_buf.is_empty() {
                io_output = self.cursor.output;
            } else if io_output != self.cursor.output {
                break 'outer;
            }

            if self.cursor.binary {
                let (bin, bin_off) = if self.cursor.output {
                    (&self.out_bin, &mut self.cursor.out_bin_off)
                } else {
                    (&self.in_bin, &mut self.cursor.in_bin_off)
                };
                while self.cursor.rem > 0 {
                    let Some(&byte) = bin.get(*bin_off) else {
                        return Err(Error::new(ErrorKind::MsgFieldInvalidValueBin));
                    };
                    io_buf.push(byte);
                    *bin_off += 1;
                    self.cursor.rem -= 1;
                    if io_buf.len() >= io_size {
                        break 'outer;
                    }
                }
            } else {
                let (txt, txt_off) = if self.cursor.output {
                    (&self.out_txt, &mut self.cursor.out_txt_off)
                } else {
                    (&self.in_txt, &mut self.cursor.in_txt_off)
                };
                let bytes = txt.as_bytes();
                while self.cursor.rem > 0 {
                    let Some(&lead) = bytes.get(*txt_off) else {
                        return Err(Error::new(ErrorKind::MsgFieldInvalidValueTxt));
                    };
                    let len = utf8_lead_len(lead).ok_or_else(|| Error::new(ErrorKind::MsgFieldInvalidValueTxt))?;
                    if *txt_off + len > bytes.len() {
                        return Err(Error::new(ErrorKind::MsgFieldInvalidValueTxt));
                    }
                    if io_buf.len() + len > io_size {
                        break 'outer;
                    }
                    io_buf.extend_from_slice(&bytes[*txt_off..*txt_off + len]);
                    *txt_off += len;
                    self.cursor.rem -= 1;
                }
            }
        }

        if io_buf.is_empty() {
            Ok(Packet::Void)
        } else {
            Ok(Packet::Io { ts: self.cursor.pos, output: io_output, bytes: io_buf })
        }
    }
}

fn skip_replacement_chars(text: &[u8], off: &mut usize, mut count: u64) -> Result<()> {
    while count > 0 {
        let Some(&lead) = text.get(*off) else {
            return Err(Error::new(ErrorKind::MsgFieldInvalidValueTxt));
        };
        let len = utf8_lead_len(lead).ok_or_else(|| Error::new(ErrorKind::MsgFieldInvalidValueTxt))?;
        if *off + len > text.len() {
            return Err(Error::new(ErrorKind::MsgFieldInvalidValueTxt));
        }
        *off += len;
        count -= 1;
    }
    Ok(())
}

/// Length of the UTF-8 character starting with lead byte `b`, or `None`
/// if `b` cannot start a character. Unlike [`crate::utf8::Accumulator`],
/// this only classifies the lead byte; it does not validate
/// continuation bytes, matching `tlog_json_msg_utf8_len`.
fn utf8_lead_len(b: u8) -> Option<usize> {
    if b & 0x80 == 0 {
        Some(1)
    } else if b & 0xe0 == 0xc0 {
        Some(2)
    } else if b & 0xf0 == 0xe0 {
        Some(3)
    } else if b & 0xf8 == 0xf0 {
        Some(4)
    } else {
        None
    }
}

/// Parse one `<type><digits>` timing token, e.g. `+150` or `<12`.
fn parse_timing_token(s: &str) -> Result<(u8, u64, usize)> {
    let bytes = s.as_bytes();
    let kind = *bytes
        .first()
        .filter(|b| matches!(b, b'[' | b']' | b'<' | b'>' | &TIMING_DELAY | &TIMING_WINDOW))
        .ok_or_else(|| Error::new(ErrorKind::MsgFieldInvalidValueTiming))?;
    let (val, digits) = parse_digits(&s[1..])?;
    Ok((kind, val, 1 + digits))
}

/// Parse a `<sep><digits>` suffix, e.g. `/3` or `x200`.
fn parse_suffixed_count(s: &str, sep: u8) -> Result<(u64, usize)> {
    if s.as_bytes().first() != Some(&sep) {
        return Err(Error::new(ErrorKind::MsgFieldInvalidValueTiming));
    }
    let (val, digits) = parse_digits(&s[1..])?;
    Ok((val, 1 + digits))
}

fn parse_digits(s: &str) -> Result<(u64, usize)> {
    let bytes = s.as_bytes();
    let mut i = 0;
    while i < bytes.len() && bytes[i].is_ascii_digit() {
        i += 1;
    }
    if i == 0 {
        return Err(Error::new(ErrorKind::MsgFieldInvalidValueTiming));
    }
    let val = s[..i].parse().map_err(|_| Error::new(ErrorKind::MsgFieldInvalidValueTiming))?;
    Ok((val, i))
}

/// Parse a `<major>[.<minor>]` version string, rejecting trailing
/// garbage and a major version past what this schema understands.
fn parse_version(s: &str) -> Result<u32> {
    let bytes = s.as_bytes();
    let mut i = 0;
    while i < bytes.len() && bytes[i].is_ascii_digit() {
        i += 1;
    }
    if i == 0 {
        return Err(Error::new(ErrorKind::MsgFieldInvalidValueVer));
    }
    let major: u32 = s[..i].parse().map_err(|_| Error::new(ErrorKind::MsgFieldInvalidValueVer))?;

    if i < bytes.len() {
        if bytes[i] != b'.' {
            return Err(Error::new(ErrorKind::MsgFieldInvalidValueVer));
        }
        let mut j = i + 1;
        while j < bytes.len() && bytes[j].is_ascii_digit() {
            j += 1;
        }
        if j == i + 1 || j != bytes.len() {
            return Err(Error::new(ErrorKind::MsgFieldInvalidValueVer));
        }
    }

    if major > SCHEMA_VERSION_MAJOR_MAX {
        return Err(Error::new(ErrorKind::MsgFieldInvalidValueVer));
    }
    Ok(major)
}

fn get_ver_string(obj: &serde_json::Map<String, Value>) -> Result<String> {
    match obj.get("ver") {
        None => Err(Error::new(ErrorKind::MsgFieldMissing("ver"))),
        Some(Value::String(s)) => Ok(s.clone()),
        Some(Value::Number(n)) => Ok(n.to_string()),
        Some(_) => Err(Error::new(ErrorKind::MsgFieldInvalidType("ver"))),
    }
}

fn get_string(obj: &serde_json::Map<String, Value>, field: &'static str) -> Result<String> {
    match obj.get(field) {
        None => Err(Error::new(ErrorKind::MsgFieldMissing(field))),
        Some(Value::String(s)) => Ok(s.clone()),
        Some(_) => Err(Error::new(ErrorKind::MsgFieldInvalidType(field))),
    }
}

fn get_optional_string(obj: &serde_json::Map<String, Value>, field: &'static str) -> Result<Option<String>> {
    match obj.get(field) {
        None => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(_) => Err(Error::new(ErrorKind::MsgFieldInvalidType(field))),
    }
}

fn get_session(obj: &serde_json::Map<String, Value>) -> Result<u32> {
    let v = obj.get("session").ok_or_else(|| Error::new(ErrorKind::MsgFieldMissing("session")))?;
    let i = v.as_i64().ok_or_else(|| Error::new(ErrorKind::MsgFieldInvalidType("session")))?;
    if i < 1 || i > u32::MAX as i64 {
        return Err(Error::new(ErrorKind::MsgFieldInvalidValueSession));
    }
    Ok(i as u32)
}

fn get_id(obj: &serde_json::Map<String, Value>) -> Result<u64> {
    let v = obj.get("id").ok_or_else(|| Error::new(ErrorKind::MsgFieldMissing("id")))?;
    let i = v.as_i64().ok_or_else(|| Error::new(ErrorKind::MsgFieldInvalidType("id")))?;
    if i < 0 {
        return Err(Error::new(ErrorKind::MsgFieldInvalidValueId));
    }
    Ok(i as u64)
}

fn get_pos(obj: &serde_json::Map<String, Value>) -> Result<u64> {
    let v = obj.get("pos").ok_or_else(|| Error::new(ErrorKind::MsgFieldMissing("pos")))?;
    let i = v.as_i64().ok_or_else(|| Error::new(ErrorKind::MsgFieldInvalidType("pos")))?;
    if i < 0 || i as u64 > DELAY_MAX_MS {
        return Err(Error::new(ErrorKind::MsgFieldInvalidValuePos));
    }
    Ok(i as u64)
}

fn get_byte_array(obj: &serde_json::Map<String, Value>, field: &'static str) -> Result<Vec<u8>> {
    let v = obj.get(field).ok_or_else(|| Error::new(ErrorKind::MsgFieldMissing(field)))?;
    let arr = v.as_array().ok_or_else(|| Error::new(ErrorKind::MsgFieldInvalidType(field)))?;
    let mut bytes = Vec::with_capacity(arr.len());
    for elem in arr {
        let n = elem.as_i64().ok_or_else(|| Error::new(ErrorKind::MsgFieldInvalidValueBin))?;
        if !(0..=255).contains(&n) {
            return Err(Error::new(ErrorKind::MsgFieldInvalidValueBin));
        }
        bytes.push(n as u8);
    }
    Ok(bytes)
}
