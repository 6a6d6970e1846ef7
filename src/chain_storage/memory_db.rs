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

use std::{collections::BTreeMap, sync::RwLock};

use crate::{
    blocks::BlockHeader,
    chain_storage::{ChainStorageError, DbKey, DbTransaction, DbValue, SkeletonBackend, WriteOperation},
};

/// A fully in-memory implementation of the skeleton store backend. Suitable for tests and for
/// nodes that do not need sync progress to survive a restart.
#[derive(Debug, Default)]
pub struct MemoryDatabase {
    inner: RwLock<InnerDatabase>,
}

#[derive(Debug, Default)]
struct InnerDatabase {
    headers: BTreeMap<u64, BlockHeader>,
    progress: Option<Vec<u8>>,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SkeletonBackend for MemoryDatabase {
    fn write(&self, txn: DbTransaction) -> Result<(), ChainStorageError> {
        // A single write lock held across all operations makes the batch atomic with respect to
        // readers.
        let mut db = self
            .inner
            .write()
            .map_err(|e| ChainStorageError::AccessError(format!("write lock poisoned: {}", e)))?;
        for op in txn.into_operations() {
            match op {
                WriteOperation::InsertSkeletonHeader(header) => {
                    db.headers.insert(header.height, *header);
                },
                WriteOperation::SetSyncProgress(blob) => {
                    db.progress = Some(blob);
                },
            }
        }
        Ok(())
    }

    fn fetch(&self, key: &DbKey) -> Result<Option<DbValue>, ChainStorageError> {
        let db = self
            .inner
            .read()
            .map_err(|e| ChainStorageError::AccessError(format!("read lock poisoned: {}", e)))?;
        let value = match key {
            DbKey::SkeletonHeader(height) => db
                .headers
                .get(height)
                .map(|header| DbValue::SkeletonHeader(Box::new(header.clone()))),
            DbKey::SyncProgress => db.progress.clone().map(DbValue::SyncProgress),
        };
        Ok(value)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::test_helpers::chain;

    #[test]
    fn fetch_missing_returns_none() {
        let db = MemoryDatabase::new();
        assert!(db.fetch(&DbKey::SkeletonHeader(1)).unwrap().is_none());
        assert!(db.fetch(&DbKey::SyncProgress).unwrap().is_none());
    }

    #[test]
    fn batch_writes_are_visible_together() {
        let db = MemoryDatabase::new();
        let headers = chain(3, b"mem");
        let mut txn = DbTransaction::new();
        for header in &headers {
            txn.insert_skeleton_header(header.clone());
        }
        txn.set_sync_progress(b"progress".to_vec());
        db.write(txn).unwrap();

        for header in &headers {
            match db.fetch(&DbKey::SkeletonHeader(header.height)).unwrap() {
                Some(DbValue::SkeletonHeader(stored)) => assert_eq!(*stored, *header),
                other => panic!("unexpected fetch result: {:?}", other),
            }
        }
        match db.fetch(&DbKey::SyncProgress).unwrap() {
            Some(DbValue::SyncProgress(blob)) => assert_eq!(blob, b"progress".to_vec()),
            other => panic!("unexpected fetch result: {:?}", other),
        }
    }

    #[test]
    fn progress_is_overwritten() {
        let db = MemoryDatabase::new();
        let mut txn = DbTransaction::new();
        txn.set_sync_progress(b"one".to_vec());
        db.write(txn).unwrap();
        let mut txn = DbTransaction::new();
        txn.set_sync_progress(b"two".to_vec());
        db.write(txn).unwrap();
        match db.fetch(&DbKey::SyncProgress).unwrap() {
            Some(DbValue::SyncProgress(blob)) => assert_eq!(blob, b"two".to_vec()),
            other => panic!("unexpected fetch result: {:?}", other),
        }
    }
}
