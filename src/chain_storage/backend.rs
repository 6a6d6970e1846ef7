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

use crate::chain_storage::{ChainStorageError, DbKey, DbTransaction, DbValue};

/// Identifies behaviour for skeleton store back ends. Implementations must support `Send` and
/// `Sync` so that [SkeletonDb](crate::chain_storage::SkeletonDb) can be shared between the
/// synchronizer and API callers. The backend *must* execute transactions atomically; i.e. every
/// operation within it must succeed, or they all fail. Failure to support this contract breaks
/// crash recovery: the progress blob would be allowed to reference headers that were never
/// written, or vice versa.
pub trait SkeletonBackend: Send + Sync {
    /// Commit the transaction to the backend. If there is an error, the transaction must be
    /// rolled back and the error condition returned.
    fn write(&self, txn: DbTransaction) -> Result<(), ChainStorageError>;

    /// Fetch the value for the given key, or `Ok(None)` if it is not present. This should only
    /// error if there is an access or integrity issue with the underlying store.
    fn fetch(&self, key: &DbKey) -> Result<Option<DbValue>, ChainStorageError>;
}
