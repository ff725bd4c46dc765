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

use std::{fmt, io};

/// The kind of failure behind an [`Error`]. Callers match on this rather
/// than the `Error` itself so recovery logic (the source dropping a bad
/// message and continuing) can distinguish cases cheaply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    MsgFieldMissing(&'static str),
    MsgFieldInvalidType(&'static str),
    MsgFieldInvalidValueVer,
    MsgFieldInvalidValueSession,
    MsgFieldInvalidValueId,
    MsgFieldInvalidValuePos,
    MsgFieldInvalidValueTiming,
    MsgFieldInvalidValueTxt,
    MsgFieldInvalidValueBin,
    SourceMsgIdOutOfOrder,
    SourcePktTsOutOfOrder,
    SourceTerminalMismatch,
    IncompleteLine,
    ChunkOverflow,
    Io,
    Config,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::MsgFieldMissing(field) => write!(f, "field '{field}' is missing"),
            ErrorKind::MsgFieldInvalidType(field) => {
                write!(f, "field '{field}' has the wrong JSON type")
            }
            ErrorKind::MsgFieldInvalidValueVer => write!(f, "unparsable or unsupported 'ver'"),
            ErrorKind::MsgFieldInvalidValueSession => {
                write!(f, "'session' is not in 1..=u32::MAX")
            }
            ErrorKind::MsgFieldInvalidValueId => write!(f, "'id' is negative or out of range"),
            ErrorKind::MsgFieldInvalidValuePos => {
                write!(f, "'pos' is negative or beyond the delay ceiling")
            }
            ErrorKind::MsgFieldInvalidValueTiming => {
                write!(f, "'timing' has a syntax error or numeric overflow")
            }
            ErrorKind::MsgFieldInvalidValueTxt => {
                write!(f, "a text field is too short or holds malformed UTF-8")
            }
            ErrorKind::MsgFieldInvalidValueBin => {
                write!(f, "a binary array is too short or has an out-of-range element")
            }
            ErrorKind::SourceMsgIdOutOfOrder => write!(f, "message id is non-contiguous"),
            ErrorKind::SourcePktTsOutOfOrder => write!(f, "packet timestamp would decrease"),
            ErrorKind::SourceTerminalMismatch => write!(f, "message identity rejected by filter"),
            ErrorKind::IncompleteLine => write!(f, "newline seen inside an incomplete JSON object"),
            ErrorKind::ChunkOverflow => write!(f, "operation exceeds the chunk's byte budget"),
            ErrorKind::Io => write!(f, "transport I/O failure"),
            ErrorKind::Config => write!(f, "invalid configuration"),
        }
    }
}

/// A tlog error: a `kind` callers can match on, plus an optional
/// human-readable detail and source error.
#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    detail: Option<String>,
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl Error {
    pub fn new(kind: ErrorKind) -> Self {
        Error { kind, detail: None, source: None }
    }

    pub fn with_detail(kind: ErrorKind, detail: impl Into<String>) -> Self {
        Error { kind, detail: Some(detail.into()), source: None }
    }

    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.detail {
            Some(detail) => write!(f, "{}: {}", self.kind, detail),
            None => write!(f, "{}", self.kind),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_ref().map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error { kind: ErrorKind::Io, detail: None, source: Some(Box::new(e)) }
    }
}

impl From<toml::de::Error> for Error {
    fn from(e: toml::de::Error) -> Self {
        Error { kind: ErrorKind::Config, detail: None, source: Some(Box::new(e)) }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
