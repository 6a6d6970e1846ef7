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

use std::fmt::{Display, Formatter};

use crate::blocks::BlockHeader;

/// A set of write operations applied to the backend as a single atomic unit.
#[derive(Debug, Default)]
pub struct DbTransaction {
    operations: Vec<WriteOperation>,
}

impl DbTransaction {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a skeleton header write, keyed by the header's height.
    pub fn insert_skeleton_header(&mut self, header: BlockHeader) -> &mut Self {
        self.operations.push(WriteOperation::InsertSkeletonHeader(Box::new(header)));
        self
    }

    /// Queue an overwrite of the serialized sync progress blob.
    pub fn set_sync_progress(&mut self, blob: Vec<u8>) -> &mut Self {
        self.operations.push(WriteOperation::SetSyncProgress(blob));
        self
    }

    pub fn operations(&self) -> &[WriteOperation] {
        &self.operations
    }

    pub fn into_operations(self) -> Vec<WriteOperation> {
        self.operations
    }
}

impl Display for DbTransaction {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str("Db transaction: \n")?;
        for op in &self.operations {
            writeln!(f, "{}", op)?;
        }
        Ok(())
    }
}

#[derive(Debug)]
pub enum WriteOperation {
    InsertSkeletonHeader(Box<BlockHeader>),
    SetSyncProgress(Vec<u8>),
}

impl Display for WriteOperation {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            WriteOperation::InsertSkeletonHeader(header) => write!(f, "Insert skeleton header {}", header),
            WriteOperation::SetSyncProgress(blob) => write!(f, "Set sync progress ({} bytes)", blob.len()),
        }
    }
}

/// Keys into the two logical tables used by the skeleton store.
///
/// Disk-backed implementations should key headers by the fixed-width big-endian encoding of the
/// height so that the iteration order matches the chain order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DbKey {
    SkeletonHeader(u64),
    SyncProgress,
}

impl Display for DbKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            DbKey::SkeletonHeader(height) => write!(f, "Skeleton header (#{})", height),
            DbKey::SyncProgress => f.write_str("Sync progress"),
        }
    }
}

#[derive(Debug)]
pub enum DbValue {
    SkeletonHeader(Box<BlockHeader>),
    SyncProgress(Vec<u8>),
}
