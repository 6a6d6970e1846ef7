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

use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};

use log::*;
use rand::{rngs::OsRng, RngCore};
use tari_shutdown::{Shutdown, ShutdownSignal};
use tokio::{
    sync::{mpsc, oneshot, watch},
    task,
    task::JoinSet,
};

use crate::{
    blocks::BlockHeader,
    chain_storage::{ChainStorageError, DbTransaction, SkeletonBackend, SkeletonDb},
    peers::{Backfiller, PeerDropFn, PeerEvent, PeerId, SyncPeer, SyncPeerSet},
    sync::{
        fetcher::{HeaderRequest, HeaderResponse, RequestFetcher},
        hooks::Hooks,
        progress::{SkeletonProgress, Subchain},
        scratch::ScratchWindow,
        SkeletonSync,
        SkeletonSyncConfig,
        SkeletonSyncError,
        SyncStatusInfo,
    },
};

const LOG_TARGET: &str = "ss::sync";

/// How often a progress line is logged while headers are downloading.
const PROGRESS_LOG_INTERVAL: Duration = Duration::from_secs(8);

/// Reply channel for a termination request.
pub(super) type TerminateReply = oneshot::Sender<Result<(), SkeletonSyncError>>;

/// The reason a sync cycle wound down. These are internal control signals, not errors surfaced to
/// API callers: each one tells the outer loop how to run the next cycle.
enum CycleOutcome {
    /// The cycle linked the chain down to the genesis block. Restart so the backfiller gets
    /// resumed through the single entry path.
    Linked,
    /// The primary subchain merged with a previously interrupted one. Restart with a fresh
    /// scratch window on the tail of the merged chain rather than hot-patching cycle state.
    Merged,
    /// The announced head could not be integrated into the chain being synced. Restart with the
    /// new head to force a cleanup.
    Reorged(BlockHeader),
    /// Termination was requested, either through the handle (with a reply pending) or by the
    /// node-wide shutdown signal.
    Terminated(Option<TerminateReply>),
}

/// In-flight request bookkeeping. Dropping `stale` is what marks the request stale to its
/// fetcher.
struct PendingRequest {
    peer: PeerId,
    head: u64,
    #[allow(dead_code)]
    stale: oneshot::Sender<()>,
}

/// Downloads and maintains a reverse header chain, from externally announced heads towards
/// genesis.
///
/// Header batches are requested fully concurrently from any available peers since the announced
/// head is trusted; batches that do not link up correctly are simply discarded and their peer
/// dropped. One synchronizer runs per node and lives as long as the node does: announced heads
/// arrive through the [SkeletonSync] handle while sync cycles come and go underneath it.
pub struct SkeletonSynchronizer<B, P> {
    config: SkeletonSyncConfig,
    db: SkeletonDb<B>,
    peers: Arc<P>,
    backfiller: Arc<dyn Backfiller>,
    drop_peer: PeerDropFn,
    hooks: Hooks,
    shutdown_signal: ShutdownSignal,

    progress: SkeletonProgress,
    scratch: ScratchWindow,
    requests: HashMap<u64, PendingRequest>,
    idles: HashMap<PeerId, SyncPeer>,

    started: Instant,
    logged: Instant,
    pulled: u64,

    head_rx: mpsc::Receiver<BlockHeader>,
    head_tx: mpsc::Sender<BlockHeader>,
    terminate_rx: mpsc::Receiver<TerminateReply>,
    terminate_tx: mpsc::Sender<TerminateReply>,
    status_tx: watch::Sender<SyncStatusInfo>,
    status_rx: watch::Receiver<SyncStatusInfo>,
}

impl<B, P> SkeletonSynchronizer<B, P>
where
    B: SkeletonBackend + 'static,
    P: SyncPeerSet + 'static,
{
    pub fn new(
        config: SkeletonSyncConfig,
        db: SkeletonDb<B>,
        peers: Arc<P>,
        backfiller: Arc<dyn Backfiller>,
        drop_peer: PeerDropFn,
        shutdown_signal: ShutdownSignal,
    ) -> Result<Self, SkeletonSyncError> {
        config.validate()?;
        let scratch = ScratchWindow::new(config.scratch_len, config.request_len);
        let (head_tx, head_rx) = mpsc::channel(1);
        let (terminate_tx, terminate_rx) = mpsc::channel(1);
        let (status_tx, status_rx) = watch::channel(SyncStatusInfo::default());
        Ok(Self {
            config,
            db,
            peers,
            backfiller,
            drop_peer,
            hooks: Hooks::default(),
            shutdown_signal,
            progress: SkeletonProgress::default(),
            scratch,
            requests: HashMap::new(),
            idles: HashMap::new(),
            started: Instant::now(),
            logged: Instant::now(),
            pulled: 0,
            head_rx,
            head_tx,
            terminate_rx,
            terminate_tx,
            status_tx,
            status_rx,
        })
    }

    /// Register a hook that fires once a sync cycle has been initialized, just before its event
    /// loop starts. The hook receives the cycle's starting scratch head.
    pub fn on_cycle_starting<H>(&mut self, hook: H)
    where H: Fn(u64) + Send + Sync + 'static {
        self.hooks.add_on_cycle_starting_hook(hook);
    }

    /// A handle for feeding head announcements to this synchronizer and reading sync state.
    pub fn handle(&self) -> SkeletonSync<B> {
        SkeletonSync::new(
            self.db.clone(),
            self.head_tx.clone(),
            self.terminate_tx.clone(),
            self.status_rx.clone(),
        )
    }

    /// Spawn the synchronizer onto the runtime, returning its handle.
    pub fn spawn(self) -> SkeletonSync<B> {
        let handle = self.handle();
        task::spawn(self.run());
        handle
    }

    /// Run the synchronizer until it is terminated. Waits for the first head announcement, then
    /// loops sync cycles, reacting to each cycle's outcome.
    pub async fn run(mut self) {
        debug!(target: LOG_TARGET, "Header synchronizer waiting for the first head announcement");
        let first_head = loop {
            tokio::select! {
                maybe_head = self.head_rx.recv() => match maybe_head {
                    Some(head) => break head,
                    // Every handle is gone; nothing can ever start a sync.
                    None => return,
                },
                maybe_reply = self.terminate_rx.recv() => {
                    if let Some(reply) = maybe_reply {
                        let _ = reply.send(Ok(()));
                    }
                    return;
                },
                _ = self.shutdown_signal.clone() => {
                    info!(target: LOG_TARGET, "Header synchronizer shutting down before sync started");
                    return;
                },
            }
        };

        self.started = Instant::now();
        self.logged = self.started;

        let mut head = Some(first_head);
        loop {
            match self.sync_cycle(head.take()).await {
                Ok(CycleOutcome::Linked) => {
                    // Restart from the stored state so the backfiller is resumed through the
                    // cycle start path.
                },
                Ok(CycleOutcome::Merged) => {
                    // Restart to continue on the tail of the merged chain.
                },
                Ok(CycleOutcome::Reorged(new_head)) => {
                    head = Some(new_head);
                },
                Ok(CycleOutcome::Terminated(reply)) => {
                    info!(target: LOG_TARGET, "Header synchronizer terminated");
                    if let Some(reply) = reply {
                        let _ = reply.send(Ok(()));
                    }
                    return;
                },
                Err(err) => {
                    // The sync loop is never meant to fail. Park until termination is requested
                    // and surface the error to whoever asks.
                    error!(target: LOG_TARGET, "Header sync failed: {}", err);
                    loop {
                        tokio::select! {
                            maybe_reply = self.terminate_rx.recv() => {
                                match maybe_reply {
                                    Some(reply) => {
                                        let _ = reply.send(Err(err.clone()));
                                    },
                                    None => {},
                                }
                                return;
                            },
                            maybe_head = self.head_rx.recv() => match maybe_head {
                                // Heads keep arriving but there is nothing sane to do with them.
                                Some(_) => continue,
                                None => return,
                            },
                            _ = self.shutdown_signal.clone() => return,
                        }
                    }
                },
            }
        }
    }

    /// Execute a single sync cycle until a termination condition is reached or the cycle merges
    /// with a previously interrupted run. A `None` head continues from the in-memory state left
    /// by the previous cycle.
    async fn sync_cycle(&mut self, head: Option<BlockHeader>) -> Result<CycleOutcome, SkeletonSyncError> {
        let head = match head {
            Some(head) => {
                // Trim any previous state that is inconsistent with the newly requested head.
                self.init_sync(&head)?;
                head
            },
            None => self.read_stored_head()?,
        };

        let tail = self.progress.primary().tail;
        assert!(tail > 0, "primary subchain tail must stay above the genesis block");
        self.scratch.reset(tail - 1);

        // If the sync is already linked, get the backfiller going; it is suspended again
        // whenever this cycle exits.
        if self.scratch.head() == 0 {
            self.backfiller.resume();
        }

        // Channels are unique to this cycle so nothing stale can be delivered across cycles.
        let (deliver_tx, mut deliver_rx) = mpsc::channel(1);
        let (revert_tx, mut revert_rx) = mpsc::channel(1);
        let mut cancel = Shutdown::new();
        let cancel_signal = cancel.to_signal();
        let mut fetchers = JoinSet::new();

        let mut peer_events = self.peers.subscribe_events();
        let mut peer_events_open = true;
        self.requests.clear();
        self.idles = self
            .peers
            .all_peers()
            .into_iter()
            .map(|peer| (peer.id().clone(), peer))
            .collect();

        debug!(
            target: LOG_TARGET,
            "Starting reverse header sync cycle: head {}, scratch head #{}",
            head,
            self.scratch.head()
        );
        self.hooks.call_on_cycle_starting_hooks(self.scratch.head());

        let result = loop {
            // Something happened, try to hand tasks to any idle peers before blocking again.
            self.assign_tasks(&deliver_tx, &revert_tx, &cancel_signal, &mut fetchers);

            tokio::select! {
                event = peer_events.recv(), if peer_events_open => match event {
                    Some(PeerEvent::Joined(peer)) => {
                        debug!(target: LOG_TARGET, "Peer `{}` joined the sync peer set", peer);
                        self.idles.insert(peer.id().clone(), peer);
                    },
                    Some(PeerEvent::Left(peer_id)) => {
                        debug!(target: LOG_TARGET, "Peer `{}` left the sync peer set", peer_id);
                        self.revert_peer_requests(&peer_id);
                        self.idles.remove(&peer_id);
                    },
                    None => {
                        peer_events_open = false;
                    },
                },
                maybe_reply = self.terminate_rx.recv() => {
                    break Ok(CycleOutcome::Terminated(maybe_reply));
                },
                _ = self.shutdown_signal.clone() => {
                    break Ok(CycleOutcome::Terminated(None));
                },
                maybe_head = self.head_rx.recv() => match maybe_head {
                    Some(new_head) => match self.process_new_head(&new_head) {
                        // The head extended the chain being synced; if the backfiller already
                        // finished it needs a nudge for the new head.
                        Ok(false) => {
                            if self.scratch.head() == 0 {
                                self.backfiller.resume();
                            }
                        },
                        Ok(true) => break Ok(CycleOutcome::Reorged(new_head)),
                        Err(err) => break Err(err),
                    },
                    None => break Ok(CycleOutcome::Terminated(None)),
                },
                Some(request) = revert_rx.recv() => {
                    self.revert_request(&request);
                },
                Some(response) = deliver_rx.recv() => {
                    match self.process_response(response) {
                        Ok(true) => break Ok(CycleOutcome::Merged),
                        Ok(false) => {
                            if self.scratch.head() == 0 {
                                break Ok(CycleOutcome::Linked);
                            }
                        },
                        Err(err) => break Err(err),
                    }
                },
            }
        };

        debug!(
            target: LOG_TARGET,
            "Terminating reverse header sync cycle: head {}, scratch head #{}",
            head,
            self.scratch.head()
        );

        // Wind the cycle down: cancel and collect every fetcher, disregard any future packets
        // and release the scratch memory. The backfiller is suspended unconditionally; resuming
        // is the next cycle's call.
        cancel.trigger();
        while fetchers.join_next().await.is_some() {}
        self.requests.clear();
        self.idles.clear();
        self.scratch.clear();
        self.backfiller.suspend();

        result
    }

    /// Bring the sync state into consistency with a newly announced chain head, trimming any
    /// previous on-disk leftovers that the new head invalidates.
    fn init_sync(&mut self, head: &BlockHeader) -> Result<(), SkeletonSyncError> {
        let number = head.height;

        if let Some(blob) = self.db.fetch_sync_progress()? {
            match SkeletonProgress::decode(&blob) {
                Ok(progress) => {
                    self.progress = progress;
                    for subchain in &self.progress.subchains {
                        debug!(
                            target: LOG_TARGET,
                            "Restarting sync subchain: head #{}, tail #{}", subchain.head, subchain.tail
                        );
                    }
                    // Drop subchains the new head is at or below, and trim one that overlaps it.
                    loop {
                        let first = match self.progress.subchains.first() {
                            Some(subchain) => *subchain,
                            None => break,
                        };
                        if first.tail >= number {
                            debug!(
                                target: LOG_TARGET,
                                "Dropping obsolete subchain: head #{}, tail #{}", first.head, first.tail
                            );
                            self.progress.subchains.remove(0);
                            continue;
                        }
                        if first.head >= number {
                            debug!(
                                target: LOG_TARGET,
                                "Trimming subchain head #{} down to #{} (tail #{})",
                                first.head,
                                number - 1,
                                first.tail
                            );
                            self.progress.subchains[0].head = number - 1;
                        }
                        break;
                    }
                    // If the remaining subchain ends directly below the new head, it may simply
                    // be extended; otherwise the head starts a subchain of its own.
                    let mut extended = false;
                    if let Some(first) = self.progress.subchains.first() {
                        if first.head == number - 1 {
                            if let Some(stored) = self.db.fetch_header(first.head)? {
                                if stored.hash() == head.prev_hash {
                                    debug!(
                                        target: LOG_TARGET,
                                        "Extended subchain with new head: head #{}, tail #{}", number, first.tail
                                    );
                                    self.progress.subchains[0].head = number;
                                    extended = true;
                                }
                            }
                        }
                    }
                    if !extended {
                        debug!(target: LOG_TARGET, "Created new subchain for head #{}", number);
                        self.progress.subchains.insert(0, Subchain::from_head(head));
                    }
                    // Trimmed headers outside any subchain range stay in the store; they fall
                    // outside every subchain's index space and get reclaimed by later
                    // compaction.
                    let mut txn = DbTransaction::new();
                    txn.insert_skeleton_header(head.clone());
                    self.save_progress(&mut txn);
                    self.db.write(txn)?;
                    return Ok(());
                },
                Err(err) => {
                    error!(target: LOG_TARGET, "Failed to decode stored sync progress: {}", err);
                },
            }
        }

        // No previous state, or it failed to decode: start a fresh sync anchored at the head.
        self.progress = SkeletonProgress::from_head(head);
        let mut txn = DbTransaction::new();
        txn.insert_skeleton_header(head.clone());
        self.save_progress(&mut txn);
        self.db.write(txn)?;
        debug!(target: LOG_TARGET, "Created initial subchain for head #{}", number);
        Ok(())
    }

    /// Reload the head header of the primary subchain after a merge or link restart.
    fn read_stored_head(&self) -> Result<BlockHeader, SkeletonSyncError> {
        let number = self.progress.primary().head;
        let header = self.db.fetch_header(number)?.ok_or_else(|| {
            ChainStorageError::CorruptedDatabase(format!("stored head header #{} is missing", number))
        })?;
        Ok(header)
    }

    /// Integrate a head announced mid-cycle. Returns `true` when the head cannot be integrated
    /// without restarting the cycle: reconstructing sync state is simpler and safer than
    /// mutating it in place.
    fn process_new_head(&mut self, head: &BlockHeader) -> Result<bool, SkeletonSyncError> {
        let number = head.height;
        let last = *self.progress.primary();

        if last.tail >= number {
            warn!(
                target: LOG_TARGET,
                "Chain head reorged below the current segment: tail #{}, new head #{}", last.tail, number
            );
            return Ok(true);
        }
        if last.head + 1 < number {
            warn!(
                target: LOG_TARGET,
                "Chain head leaves a gap: head #{}, new head #{}", last.head, number
            );
            return Ok(true);
        }
        match self.db.fetch_header(number - 1)? {
            Some(parent) if parent.hash() == head.prev_hash => {},
            Some(parent) => {
                warn!(
                    target: LOG_TARGET,
                    "Chain head forked: ancestor #{} has hash {}, new head wants {}",
                    parent.height,
                    parent.hash(),
                    head.prev_hash
                );
                return Ok(true);
            },
            None => {
                warn!(
                    target: LOG_TARGET,
                    "Chain head #{} has no stored ancestor at #{}", number, number - 1
                );
                return Ok(true);
            },
        }

        let mut txn = DbTransaction::new();
        txn.insert_skeleton_header(head.clone());
        self.progress.primary_mut().head = number;
        self.save_progress(&mut txn);
        self.db.write(txn)?;
        Ok(false)
    }

    /// Match idle peers against pending scratch tasks, spawning a fetcher per assignment. Peers
    /// with the highest estimated capacity are handed tasks first.
    fn assign_tasks(
        &mut self,
        deliver: &mpsc::Sender<HeaderResponse>,
        revert: &mpsc::Sender<HeaderRequest>,
        cancel: &ShutdownSignal,
        fetchers: &mut JoinSet<()>,
    ) {
        if self.idles.is_empty() {
            return;
        }
        let target_timeout = self.peers.target_timeout();
        let mut idlers = self
            .idles
            .values()
            .cloned()
            .map(|peer| {
                let capacity = self.peers.header_capacity(peer.id(), target_timeout);
                (peer, capacity)
            })
            .collect::<Vec<_>>();
        idlers.sort_by(|(_, a), (_, b)| b.cmp(a));
        let mut idlers = idlers.into_iter();

        for task in self.scratch.unowned_tasks() {
            let (peer, _) = match idlers.next() {
                Some(idle) => idle,
                None => break,
            };

            let reqid = unused_request_id(&self.requests);
            let head = self.scratch.task_head(task);
            let (stale_tx, stale_rx) = oneshot::channel();
            let request = HeaderRequest {
                peer: peer.id().clone(),
                id: reqid,
                head,
            };
            trace!(
                target: LOG_TARGET,
                "Assigning headers #{} down to peer `{}` (request {})",
                head,
                peer,
                reqid
            );
            self.requests.insert(reqid, PendingRequest {
                peer: peer.id().clone(),
                head,
                stale: stale_tx,
            });
            self.idles.remove(peer.id());
            self.scratch.assign(task, peer.id().clone());

            let fetcher = RequestFetcher::new(
                peer,
                request,
                self.config.request_len,
                Arc::clone(&self.peers),
                deliver.clone(),
                revert.clone(),
                cancel.clone(),
                stale_rx,
            );
            fetchers.spawn(fetcher.run());
        }
    }

    /// Clean up a failed or cancelled request, returning its scratch task to the scheduler.
    /// Runs on the controller so idle-peer reassignment stays race free.
    fn revert_request(&mut self, request: &HeaderRequest) {
        trace!(
            target: LOG_TARGET,
            "Reverting header request {} to `{}`", request.id, request.peer
        );
        let pending = match self.requests.remove(&request.id) {
            Some(pending) => pending,
            None => {
                trace!(target: LOG_TARGET, "Header request {} already reverted", request.id);
                return;
            },
        };
        // Dropping the stale signal tells a still-running fetcher that its result is unwanted.
        let task = self.scratch.task_for_head(pending.head);
        self.scratch.release(task);
    }

    /// Revert every pending request assigned to a departed peer.
    fn revert_peer_requests(&mut self, peer: &PeerId) {
        let requests = self
            .requests
            .iter()
            .filter(|(_, pending)| &pending.peer == peer)
            .map(|(id, pending)| HeaderRequest {
                peer: pending.peer.clone(),
                id: *id,
                head: pending.head,
            })
            .collect::<Vec<_>>();
        for request in requests {
            self.revert_request(&request);
        }
    }

    /// Process a delivered header batch: stage it in the scratch window, then drain as many
    /// linked batches as possible from the window head into the store. Returns `true` when the
    /// drain merged the primary subchain with an older one.
    fn process_response(&mut self, response: HeaderResponse) -> Result<bool, SkeletonSyncError> {
        trace!(
            target: LOG_TARGET,
            "Processing header response from `{}`: #{} down, {} header(s)",
            response.peer,
            response.headers[0].height,
            response.headers.len()
        );

        // Successful or not, the peer is available for another task; if the content turns out
        // to be junk the peer gets dropped at the linking check below.
        self.idles.insert(response.peer.id().clone(), response.peer.clone());

        if self.requests.remove(&response.reqid).is_none() {
            // Request went stale; most likely the peer timed out but came through in the end.
            warn!(
                target: LOG_TARGET,
                "Unexpected header packet from `{}` (request {})", response.peer, response.reqid
            );
            return Ok(false);
        }

        // Stage the headers regardless of content; they are validated the moment they reach the
        // head of the window.
        self.scratch.deposit(response.headers);

        // Nothing to do yet while a gap remains at the head of the window.
        if self.scratch.head_hash().is_none() {
            return Ok(false);
        }

        let mut merged = false;
        let mut txn = DbTransaction::new();
        while let Some(link) = self.scratch.head_hash() {
            let primary = *self.progress.primary();
            if primary.next != link {
                // The delivered batch is not part of the subchain being extended. Free up the
                // batch's scratch space for reassignment and drop the offending peer.
                warn!(
                    target: LOG_TARGET,
                    "Unlinked headers at the scratch head: #{} must have hash {}, got {}",
                    primary.tail - 1,
                    primary.next,
                    link
                );
                self.scratch.clear_head_batch();
                if let Some(owner) = self.scratch.release(0) {
                    (self.drop_peer)(&owner);
                }
                break;
            }

            // The batch links up; persist it and pull the primary subchain down over it.
            let headers = self.scratch.take_head_batch();
            let consumed = headers.len() as u64;
            for header in headers {
                let primary = self.progress.primary_mut();
                primary.tail -= 1;
                primary.next = header.prev_hash;
                self.pulled += 1;
                txn.insert_skeleton_header(header);
            }
            self.scratch.shift();
            self.scratch.advance(consumed);
            {
                let primary = self.progress.primary();
                trace!(
                    target: LOG_TARGET,
                    "Primary subchain extended: head #{}, tail #{}, next {}",
                    primary.head,
                    primary.tail,
                    primary.next
                );
            }

            // The extension may have grown into the subchain below; keep resolving overlaps
            // until the lists are disjoint again, merging when the endpoints meet.
            while self.progress.subchains.len() > 1 && self.progress.subchains[1].head >= self.progress.subchains[0].tail
            {
                let second = self.progress.subchains[1];
                if second.tail >= self.progress.subchains[0].tail {
                    debug!(
                        target: LOG_TARGET,
                        "Previous subchain fully overwritten: head #{}, tail #{}", second.head, second.tail
                    );
                    self.progress.subchains.remove(1);
                    continue;
                }
                debug!(
                    target: LOG_TARGET,
                    "Previous subchain partially overwritten: head #{}, tail #{}", second.head, second.tail
                );
                self.progress.subchains[1].head = self.progress.subchains[0].tail - 1;

                // If the old subchain is now an extension of the new one, merge the two and let
                // the cycle restart with clean state.
                let trimmed_head = self.progress.subchains[1].head;
                let stored = self.db.fetch_header(trimmed_head)?;
                if stored.map(|header| header.hash()) == Some(self.progress.subchains[0].next) {
                    let second = self.progress.subchains.remove(1);
                    debug!(
                        target: LOG_TARGET,
                        "Merged with previous subchain: tail #{}, next {}", second.tail, second.next
                    );
                    let primary = self.progress.primary_mut();
                    primary.tail = second.tail;
                    primary.next = second.next;
                    merged = true;
                }
            }
        }

        self.save_progress(&mut txn);
        self.db.write(txn)?;
        self.report_progress();
        Ok(merged)
    }

    fn save_progress(&self, txn: &mut DbTransaction) {
        txn.set_sync_progress(self.progress.encode());
    }

    /// Publish a status snapshot and occasionally log a progress line with an ETA.
    fn report_progress(&mut self) {
        let primary = *self.progress.primary();
        let status = SyncStatusInfo {
            head: primary.head,
            tail: primary.tail,
            downloaded: self.pulled,
        };
        let left = status.left();
        let _ = self.status_tx.send(status);

        if self.logged.elapsed() > PROGRESS_LOG_INTERVAL || left == 0 {
            self.logged = Instant::now();
            if self.pulled == 0 {
                info!(target: LOG_TARGET, "Reverse header sync starting, {} header(s) left", left);
            } else {
                let eta = Duration::from_secs_f64(
                    self.started.elapsed().as_secs_f64() / self.pulled as f64 * left as f64,
                );
                info!(
                    target: LOG_TARGET,
                    "Syncing headers: downloaded {}, left {}, eta {:.0?}", self.pulled, left, eta
                );
            }
        }
    }
}

/// Allocate a request id that is non-zero and not currently in flight.
fn unused_request_id(pending: &HashMap<u64, PendingRequest>) -> u64 {
    loop {
        let id = OsRng.next_u64();
        if id != 0 && !pending.contains_key(&id) {
            return id;
        }
    }
}
