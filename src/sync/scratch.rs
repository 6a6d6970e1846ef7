// Copyright 2022. The Tari Project
//
// Redistribution and use in source and binary forms, with or without modification, are permitted provided that the
// following conditions are met:
//
// 1. Redistributions of source code must retain the above copyright notice, this list of conditions and the following
// disclaimer.
//
// 2. Redistributions in binary form must reproduce the above copyright notice, this list of conditions and the
// following disclaimer in the documentation and/or other materials provided with the distribution.
//
// 3. Neither the name of the copyright holder nor the names of its contributors may be used to endorse or promote
// products derived from this software without specific prior written permission.
//
// THIS SOFTWARE IS PROVIDED BY THE COPYRIGHT HOLDERS AND CONTRIBUTORS "AS IS" AND ANY EXPRESS OR IMPLIED WARRANTIES,
// INCLUDING, BUT NOT LIMITED TO, THE IMPLIED WARRANTIES OF MERCHANTABILITY AND FITNESS FOR A PARTICULAR PURPOSE ARE
// DISCLAIMED. IN NO EVENT SHALL THE COPYRIGHT HOLDER OR CONTRIBUTORS BE LIABLE FOR ANY DIRECT, INDIRECT, INCIDENTAL,
// SPECIAL, EXEMPLARY, OR CONSEQUENTIAL DAMAGES (INCLUDING, BUT NOT LIMITED TO, PROCUREMENT OF SUBSTITUTE GOODS OR
// SERVICES; LOSS OF USE, DATA, OR PROFITS; OR BUSINESS INTERRUPTION) HOWEVER CAUSED AND ON ANY THEORY OF LIABILITY,
// WHETHER IN CONTRACT, STRICT LIABILITY, OR TORT (INCLUDING NEGLIGENCE OR OTHERWISE) ARISING IN ANY WAY OUT OF THE
// USE OF THIS SOFTWARE, EVEN IF ADVISED OF THE POSSIBILITY OF SUCH DAMAGE.

use crate::{
    blocks::{BlockHash, BlockHeader},
    peers::PeerId,
};

/// The in-memory staging area for concurrently downloaded header batches.
///
/// Slot 0 corresponds to block number `head` and slot `i` to `head - i`. The window is divided
/// into fixed-size batch tasks; `owners` tracks which peer a task is assigned to (the owner stays
/// recorded after delivery until the batch is drained or reverted). Headers are only ever
/// consumed from the front of the window, one batch at a time, once they link to the subchain
/// being extended.
///
/// The backing buffers are allocated on [reset](ScratchWindow::reset) at the start of a sync
/// cycle and released on [clear](ScratchWindow::clear) when the cycle exits.
pub(super) struct ScratchWindow {
    scratch_len: usize,
    batch_len: usize,
    buffer: Vec<Option<BlockHeader>>,
    owners: Vec<Option<PeerId>>,
    head: u64,
}

impl ScratchWindow {
    pub fn new(scratch_len: usize, batch_len: usize) -> Self {
        assert!(
            batch_len > 0 && scratch_len % batch_len == 0,
            "scratch length ({}) must be a non-zero multiple of the batch length ({})",
            scratch_len,
            batch_len
        );
        Self {
            scratch_len,
            batch_len,
            buffer: Vec::new(),
            owners: Vec::new(),
            head: 0,
        }
    }

    /// Clear the window and point slot 0 at block number `head`.
    pub fn reset(&mut self, head: u64) {
        self.buffer.clear();
        self.buffer.resize(self.scratch_len, None);
        self.owners.clear();
        self.owners.resize(self.scratch_len / self.batch_len, None);
        self.head = head;
    }

    /// Drop the backing buffers. Called when a sync cycle exits so the window does not hold on
    /// to megabytes of headers between cycles.
    pub fn clear(&mut self) {
        self.buffer = Vec::new();
        self.owners = Vec::new();
    }

    /// Block number of slot 0.
    pub fn head(&self) -> u64 {
        self.head
    }

    pub fn group_count(&self) -> usize {
        self.owners.len()
    }

    /// The head block number a request for the given task must be anchored at.
    pub fn task_head(&self, task: usize) -> u64 {
        self.head - (task * self.batch_len) as u64
    }

    /// The task that a request anchored at `request_head` currently maps to. Valid while the
    /// request is pending: reverts happen before the owning batch can have been drained past.
    pub fn task_for_head(&self, request_head: u64) -> usize {
        ((self.head - request_head) / self.batch_len as u64) as usize
    }

    /// Tasks that are unassigned and still above the genesis block, in scheduling order.
    pub fn unowned_tasks(&self) -> Vec<usize> {
        (0..self.owners.len())
            .take_while(|task| ((task * self.batch_len) as u64) < self.head)
            .filter(|task| self.owners[*task].is_none())
            .collect()
    }

    pub fn assign(&mut self, task: usize, peer: PeerId) {
        assert!(self.owners[task].is_none(), "task {} is already owned", task);
        self.owners[task] = Some(peer);
    }

    /// Mark a task unassigned again, returning the previous owner.
    pub fn release(&mut self, task: usize) -> Option<PeerId> {
        self.owners[task].take()
    }

    pub fn owner(&self, task: usize) -> Option<&PeerId> {
        self.owners[task].as_ref()
    }

    /// Place a delivered batch into the window at the slots matching its block numbers. The
    /// batch was validated to be a contiguous descending run, so only its anchor determines the
    /// placement.
    pub fn deposit(&mut self, headers: Vec<BlockHeader>) {
        assert!(!headers.is_empty());
        assert!(
            headers[0].height <= self.head && (self.head - headers[0].height) as usize + headers.len() <= self.buffer.len(),
            "header batch anchored at #{} does not fit the scratch window (head #{})",
            headers[0].height,
            self.head
        );
        let base = (self.head - headers[0].height) as usize;
        for (i, header) in headers.into_iter().enumerate() {
            self.buffer[base + i] = Some(header);
        }
    }

    /// Hash of the header in slot 0, if it has been delivered.
    pub fn head_hash(&self) -> Option<BlockHash> {
        self.buffer.first().and_then(|slot| slot.as_ref()).map(|h| h.hash())
    }

    /// Take the delivered headers out of the first batch, in descending block number order.
    /// Slots may be empty below the genesis block, so fewer than a full batch may come back.
    pub fn take_head_batch(&mut self) -> Vec<BlockHeader> {
        self.buffer[..self.batch_len]
            .iter_mut()
            .filter_map(|slot| slot.take())
            .collect()
    }

    /// Discard whatever is in the first batch without consuming it. Used when the delivered
    /// batch fails to link to the subchain being extended.
    pub fn clear_head_batch(&mut self) {
        for slot in &mut self.buffer[..self.batch_len] {
            *slot = None;
        }
    }

    /// Rotate the window one batch forward: slots shift left by a full batch and task owners by
    /// one, the freed tail filling with empties.
    pub fn shift(&mut self) {
        self.buffer.rotate_left(self.batch_len);
        let len = self.buffer.len();
        for slot in &mut self.buffer[len - self.batch_len..] {
            *slot = None;
        }
        self.owners.rotate_left(1);
        let last = self.owners.len() - 1;
        self.owners[last] = None;
    }

    /// Move the window head down by the number of consumed headers. This is a full batch except
    /// at the genesis boundary, where the cycle ends immediately after.
    pub fn advance(&mut self, consumed: u64) {
        self.head -= consumed;
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::test_helpers::chain;

    fn window() -> ScratchWindow {
        let mut scratch = ScratchWindow::new(16, 4);
        scratch.reset(7);
        scratch
    }

    fn batch(headers: &[BlockHeader], from: u64, count: usize) -> Vec<BlockHeader> {
        // Descending run anchored at `from`.
        (0..count as u64)
            .map(|i| headers[(from - i - 1) as usize].clone())
            .collect()
    }

    #[test]
    fn task_heads_step_down_in_batches() {
        let scratch = window();
        assert_eq!(scratch.task_head(0), 7);
        assert_eq!(scratch.task_head(1), 3);
        assert_eq!(scratch.task_for_head(7), 0);
        assert_eq!(scratch.task_for_head(3), 1);
    }

    #[test]
    fn unowned_tasks_stop_at_genesis() {
        let mut scratch = window();
        // With the head at #7 only tasks 0 (head 7) and 1 (head 3) are above genesis.
        assert_eq!(scratch.unowned_tasks(), vec![0, 1]);
        scratch.assign(0, "alice".into());
        assert_eq!(scratch.unowned_tasks(), vec![1]);
        scratch.reset(3);
        assert_eq!(scratch.unowned_tasks(), vec![0]);
        scratch.reset(0);
        assert!(scratch.unowned_tasks().is_empty());
    }

    #[test]
    fn release_returns_the_owner() {
        let mut scratch = window();
        scratch.assign(1, "bob".into());
        assert_eq!(scratch.owner(1), Some(&"bob".into()));
        assert_eq!(scratch.release(1), Some("bob".into()));
        assert_eq!(scratch.release(1), None);
    }

    #[test]
    fn deposit_fills_the_matching_slots() {
        let headers = chain(7, b"scratch");
        let mut scratch = window();
        // Deliver the second batch first: blocks 3, 2, 1.
        scratch.deposit(batch(&headers, 3, 3));
        assert!(scratch.head_hash().is_none());
        // Now the head batch: blocks 7..4.
        scratch.deposit(batch(&headers, 7, 4));
        assert_eq!(scratch.head_hash(), Some(headers[6].hash()));
    }

    #[test]
    fn drain_consumes_head_batches_in_order() {
        let headers = chain(7, b"scratch");
        let mut scratch = window();
        scratch.deposit(batch(&headers, 7, 4));
        scratch.deposit(batch(&headers, 3, 3));

        let first = scratch.take_head_batch();
        assert_eq!(first.len(), 4);
        assert_eq!(first[0].height, 7);
        assert_eq!(first[3].height, 4);
        scratch.shift();
        scratch.advance(first.len() as u64);
        assert_eq!(scratch.head(), 3);

        let second = scratch.take_head_batch();
        assert_eq!(second.len(), 3);
        assert_eq!(second[0].height, 3);
        assert_eq!(second[2].height, 1);
        scratch.shift();
        scratch.advance(second.len() as u64);
        assert_eq!(scratch.head(), 0);
        assert!(scratch.head_hash().is_none());
    }

    #[test]
    fn shift_moves_owners_forward() {
        let mut scratch = window();
        scratch.assign(0, "alice".into());
        scratch.assign(1, "bob".into());
        scratch.shift();
        assert_eq!(scratch.owner(0), Some(&"bob".into()));
        assert_eq!(scratch.owner(1), None);
        assert_eq!(scratch.owner(scratch.group_count() - 1), None);
    }

    #[test]
    fn clear_head_batch_discards_without_consuming() {
        let headers = chain(7, b"scratch");
        let mut scratch = window();
        scratch.deposit(batch(&headers, 7, 4));
        scratch.clear_head_batch();
        assert!(scratch.head_hash().is_none());
        assert!(scratch.take_head_batch().is_empty());
        assert_eq!(scratch.head(), 7);
    }

    #[test]
    #[should_panic(expected = "does not fit the scratch window")]
    fn deposit_outside_the_window_panics() {
        let headers = chain(40, b"scratch");
        let mut scratch = window();
        scratch.reset(40);
        scratch.deposit(batch(&headers, 10, 4));
    }

    #[test]
    #[should_panic(expected = "non-zero multiple of the batch length")]
    fn a_non_dividing_batch_length_panics() {
        ScratchWindow::new(10, 4);
    }

    #[test]
    #[should_panic(expected = "already owned")]
    fn double_assignment_panics() {
        let mut scratch = window();
        scratch.assign(0, "alice".into());
        scratch.assign(0, "bob".into());
    }
}
