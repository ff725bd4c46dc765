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

//! The callback trio a [`crate::stream::Stream`] uses to talk to its
//! enclosing chunk, replacing the C side's function-pointer struct plus
//! `container_of` trick. A stream never holds a pointer back to its
//! chunk: it only ever borrows `&mut dyn Dispatcher` for the duration of
//! a call.

use crate::{pkt::Timestamp, trx::Trx};

pub trait Dispatcher {
    /// Record passage of wall time, emitting a `+<ms>` timing record if
    /// time has moved on since the last call. Returns `false` if the
    /// record could not be reserved (the caller's transaction should
    /// abort).
    fn advance(&mut self, trx: &mut Trx, ts: Timestamp) -> bool;

    /// Charge `n` bytes against the chunk's remaining budget. Returns
    /// `false`, with no mutation, if the budget is insufficient.
    fn reserve(&mut self, trx: &mut Trx, n: usize) -> bool;

    /// Append `bytes` to the timing buffer, first flushing any pending
    /// window record if one is owed.
    fn write(&mut self, trx: &mut Trx, bytes: &[u8]);

    /// Whether calling `advance(ts)` would need to emit a delay record.
    /// A stream calls this before `advance` to decide whether to flush
    /// its own pending run first: the chunk-level `advance` flushes the
    /// *other* stream, since it has no access to the stream that is
    /// currently calling it.
    fn delay_pending(&self, ts: Timestamp) -> bool;
}
