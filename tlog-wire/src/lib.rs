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

//! tlog-wire defines the line-delimited JSON message tlog writes to and
//! reads from its log transports (files, Elasticsearch, journal, ...). It
//! is a plain data shape with no validation attached -- the `tlog` crate's
//! message parser turns an arbitrary `serde_json::Value` into a validated
//! instance of this shape and interprets the embedded timing script.

use serde_derive::{Deserialize, Serialize};

/// The schema version this crate emits. Readers accept any `ver` whose
/// major component is `<= 2`, see `tlog::message`.
pub const VERSION: &str = "2.2";

/// One recorded chunk of a terminal session, serialized as a single JSON
/// line. Field order here is load-bearing: `Serialize` derives serialize
/// struct fields in declaration order, and the schema fixes that order.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Record {
    pub ver: String,
    pub host: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub rec: Option<String>,
    pub user: String,
    pub term: String,
    pub session: u32,
    pub id: u64,
    pub pos: u64,
    pub timing: String,
    pub in_txt: String,
    pub in_bin: Vec<u8>,
    pub out_txt: String,
    pub out_bin: Vec<u8>,
}

impl Record {
    /// Serialize to a single `\n`-terminated JSON line, ready to hand to a
    /// transport writer.
    pub fn to_line(&self) -> serde_json::Result<String> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }
}
