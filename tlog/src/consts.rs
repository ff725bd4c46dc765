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

/// Smallest chunk payload budget a sink will accept.
pub const CHUNK_SIZE_MIN: usize = 32;

/// Smallest I/O buffer a source will accept; must hold at least one
/// complete UTF-8 character.
pub const IO_SIZE_MIN: usize = 4;

/// Largest `pos`/delay value representable by the timing script, in
/// milliseconds: `u32::MAX` seconds expressed in ms, capped to what the
/// original format's `%llu` / millisecond-pair encoding can carry.
pub const DELAY_MAX_MS: u64 = 281_474_976_710_655;

/// Highest schema major version this crate understands.
pub const SCHEMA_VERSION_MAJOR_MAX: u32 = 2;

pub const MARK_VALID_INPUT: u8 = b'<';
pub const MARK_INVALID_INPUT: u8 = b'[';
pub const MARK_VALID_OUTPUT: u8 = b'>';
pub const MARK_INVALID_OUTPUT: u8 = b']';

pub const TIMING_DELAY: u8 = b'+';
pub const TIMING_WINDOW: u8 = b'=';
