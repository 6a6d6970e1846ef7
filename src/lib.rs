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

//! # Skeleton sync
//!
//! A reverse header chain synchronizer for nodes whose chain head is dictated by an external
//! trusted source (a consensus layer). Announced head headers are accepted through the
//! [SkeletonSync](sync::SkeletonSync) handle and the chain is then downloaded *backwards*, head
//! towards genesis, by requesting fixed-size header batches concurrently from the available sync
//! peers.
//!
//! Because batches download concurrently they cannot be validated against the chain until they
//! link up with the segment being extended; downloaded headers are staged in a bounded in-memory
//! scratch window and drained strictly from its head. Progress is tracked as a list of disjoint
//! subchains which is persisted atomically alongside every accepted batch, so that a restart
//! resumes exactly where the previous run stopped. Once the primary subchain links down to the
//! genesis block, a backfiller collaborator is resumed to start forward filling of block bodies
//! and state.

pub mod blocks;
pub mod chain_storage;
pub mod peers;
pub mod sync;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use blocks::{BlockHash, BlockHeader};
pub use chain_storage::{MemoryDatabase, SkeletonBackend, SkeletonDb};
pub use sync::{SkeletonSync, SkeletonSyncConfig, SkeletonSyncError, SkeletonSynchronizer, SyncStatusInfo};
