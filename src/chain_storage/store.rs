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

use std::sync::Arc;

use crate::{
    blocks::BlockHeader,
    chain_storage::{ChainStorageError, DbKey, DbTransaction, DbValue, SkeletonBackend},
};

/// A thin, cloneable wrapper around a [SkeletonBackend] providing typed reads over the two
/// logical tables. All writes go through [DbTransaction] batches.
#[derive(Debug)]
pub struct SkeletonDb<B> {
    db: Arc<B>,
}

impl<B> Clone for SkeletonDb<B> {
    fn clone(&self) -> Self {
        Self { db: Arc::clone(&self.db) }
    }
}

impl<B: SkeletonBackend> SkeletonDb<B> {
    pub fn new(backend: B) -> Self {
        Self { db: Arc::new(backend) }
    }

    /// Read a skeleton header by height.
    pub fn fetch_header(&self, height: u64) -> Result<Option<BlockHeader>, ChainStorageError> {
        match self.db.fetch(&DbKey::SkeletonHeader(height))? {
            Some(DbValue::SkeletonHeader(header)) => Ok(Some(*header)),
            Some(other) => Err(ChainStorageError::UnexpectedResult(format!(
                "expected a skeleton header for #{}, got {:?}",
                height, other
            ))),
            None => Ok(None),
        }
    }

    /// Read the serialized sync progress blob, if any was ever written.
    pub fn fetch_sync_progress(&self) -> Result<Option<Vec<u8>>, ChainStorageError> {
        match self.db.fetch(&DbKey::SyncProgress)? {
            Some(DbValue::SyncProgress(blob)) => Ok(Some(blob)),
            Some(other) => Err(ChainStorageError::UnexpectedResult(format!(
                "expected the sync progress blob, got {:?}",
                other
            ))),
            None => Ok(None),
        }
    }

    /// Commit a batch of writes atomically.
    pub fn write(&self, txn: DbTransaction) -> Result<(), ChainStorageError> {
        self.db.write(txn)
    }
}
