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

use tokio::sync::{mpsc, oneshot, watch};

use crate::{
    blocks::BlockHeader,
    chain_storage::{ChainStorageError, SkeletonBackend, SkeletonDb},
    sync::{progress::SkeletonProgress, synchronizer::TerminateReply, SkeletonSyncError, SyncStatusInfo},
};

/// Handle to a running [SkeletonSynchronizer](crate::sync::SkeletonSynchronizer).
///
/// Head announcements are fed in through [sync](SkeletonSync::sync); the current sync state is
/// read straight from the store, so the reads here stay valid even while the synchronizer churns
/// through cycles.
pub struct SkeletonSync<B> {
    db: SkeletonDb<B>,
    head_tx: mpsc::Sender<BlockHeader>,
    terminate_tx: mpsc::Sender<TerminateReply>,
    status_rx: watch::Receiver<SyncStatusInfo>,
}

impl<B> Clone for SkeletonSync<B> {
    fn clone(&self) -> Self {
        Self {
            db: self.db.clone(),
            head_tx: self.head_tx.clone(),
            terminate_tx: self.terminate_tx.clone(),
            status_rx: self.status_rx.clone(),
        }
    }
}

impl<B: SkeletonBackend> SkeletonSync<B> {
    pub(super) fn new(
        db: SkeletonDb<B>,
        head_tx: mpsc::Sender<BlockHeader>,
        terminate_tx: mpsc::Sender<TerminateReply>,
        status_rx: watch::Receiver<SyncStatusInfo>,
    ) -> Self {
        Self {
            db,
            head_tx,
            terminate_tx,
            status_rx,
        }
    }

    /// Announce a new chain head to sync towards. Returns once the announcement has been
    /// accepted; what the synchronizer does with it is the synchronizer's business. Fails with
    /// [SkeletonSyncError::StaleSync] if the synchronizer has shut down.
    pub async fn sync(&self, head: BlockHeader) -> Result<(), SkeletonSyncError> {
        self.head_tx.send(head).await.map_err(|_| SkeletonSyncError::StaleSync)
    }

    /// The current head of the synced chain. Only available once the chain is linked all the way
    /// down to genesis; before that [SkeletonSyncError::NotStarted] or
    /// [SkeletonSyncError::NotFinished] is returned.
    ///
    /// This reads from the store rather than synchronizer state, which is safe for the
    /// backfiller's usage: it only runs while the chain below the head is complete and stable,
    /// and any head reorg tears the backfiller down before the store changes.
    pub fn head(&self) -> Result<BlockHeader, SkeletonSyncError> {
        let blob = self.db.fetch_sync_progress()?.ok_or(SkeletonSyncError::NotStarted)?;
        let progress = SkeletonProgress::decode(&blob)
            .map_err(|e| ChainStorageError::CorruptedDatabase(format!("sync progress failed to decode: {}", e)))?;
        let primary = match progress.subchains.first() {
            Some(subchain) => *subchain,
            None => return Err(SkeletonSyncError::NotStarted),
        };
        if primary.tail != 1 {
            return Err(SkeletonSyncError::NotFinished);
        }
        let header = self.db.fetch_header(primary.head)?.ok_or_else(|| {
            ChainStorageError::CorruptedDatabase(format!("head header #{} is missing from the store", primary.head))
        })?;
        Ok(header)
    }

    /// Read a synced header by height, straight from the store.
    pub fn header(&self, height: u64) -> Result<Option<BlockHeader>, SkeletonSyncError> {
        Ok(self.db.fetch_header(height)?)
    }

    /// A watcher over sync progress snapshots, updated after every commit.
    pub fn status_receiver(&self) -> watch::Receiver<SyncStatusInfo> {
        self.status_rx.clone()
    }

    /// Tear the synchronizer down, blocking until it and all of its in-flight requests have
    /// exited. Surfaces the fatal error if sync previously failed.
    pub async fn terminate(&self) -> Result<(), SkeletonSyncError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.terminate_tx
            .send(reply_tx)
            .await
            .map_err(|_| SkeletonSyncError::StaleSync)?;
        match reply_rx.await {
            Ok(result) => result,
            Err(_) => Err(SkeletonSyncError::StaleSync),
        }
    }
}
