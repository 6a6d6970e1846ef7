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

use std::{cmp, sync::Arc, time::Instant};

use log::*;
use tari_shutdown::ShutdownSignal;
use tokio::{
    sync::{mpsc, oneshot},
    time,
};

use crate::{
    blocks::BlockHeader,
    peers::{PeerId, SyncPeer, SyncPeerSet},
};

const LOG_TARGET: &str = "ss::fetcher";

/// A pending header request.
///
/// Requests and responses are handled concurrently with the controller loop so that batch
/// validation happens on the peer's task and invalid responses can be rejected there. The request
/// therefore carries everything needed to construct and check the response without touching
/// controller state; the controller matches responses back to scratch tasks by request id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) struct HeaderRequest {
    /// Peer this request is assigned to.
    pub peer: PeerId,
    /// Unique, non-zero id of this request within the cycle.
    pub id: u64,
    /// Head block number of the requested batch.
    pub head: u64,
}

/// An already validated response to a header request.
pub(super) struct HeaderResponse {
    pub peer: SyncPeer,
    pub reqid: u64,
    pub headers: Vec<BlockHeader>,
}

/// Executes a single header request against its assigned peer, blocking until a result arrives,
/// the request times out, or the cycle is cancelled. Runs on its own task and communicates with
/// the controller exclusively through the deliver and revert channels.
pub(super) struct RequestFetcher<P> {
    peer: SyncPeer,
    request: HeaderRequest,
    batch_len: usize,
    peers: Arc<P>,
    deliver: mpsc::Sender<HeaderResponse>,
    revert: mpsc::Sender<HeaderRequest>,
    cancel: ShutdownSignal,
    stale: oneshot::Receiver<()>,
}

impl<P: SyncPeerSet> RequestFetcher<P> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        peer: SyncPeer,
        request: HeaderRequest,
        batch_len: usize,
        peers: Arc<P>,
        deliver: mpsc::Sender<HeaderResponse>,
        revert: mpsc::Sender<HeaderRequest>,
        cancel: ShutdownSignal,
        stale: oneshot::Receiver<()>,
    ) -> Self {
        Self {
            peer,
            request,
            batch_len,
            peers,
            deliver,
            revert,
            cancel,
            stale,
        }
    }

    pub async fn run(mut self) {
        // Usually a full batch is requested, but the very tail of the chain is trimmed to the
        // number of blocks left. Peers may or may not serve the genesis header, so it is never
        // requested; the parent hash of block #1 is enough to link.
        let count = cmp::min(self.batch_len as u64, self.request.head) as usize;
        let ttl = self.peers.target_timeout();
        let started = Instant::now();

        trace!(
            target: LOG_TARGET,
            "Fetching headers from `{}`: #{} down, {} header(s)",
            self.peer,
            self.request.head,
            count
        );
        let client = Arc::clone(self.peer.client());
        let request_fut = client.headers_by_number(self.request.head, count, 0, true);
        tokio::pin!(request_fut);

        let result = tokio::select! {
            _ = self.cancel.clone() => {
                debug!(target: LOG_TARGET, "Header request to `{}` cancelled", self.peer);
                self.schedule_revert().await;
                return;
            },
            _ = time::sleep(ttl) => {
                warn!(
                    target: LOG_TARGET,
                    "Header request to `{}` timed out after {:.2?}", self.peer, ttl
                );
                self.peers.update_header_rate(self.peer.id(), 0, std::time::Duration::ZERO);
                self.schedule_revert().await;
                return;
            },
            result = &mut request_fut => result,
        };

        let batch = match result {
            Ok(batch) => batch,
            Err(err) => {
                debug!(target: LOG_TARGET, "Failed to request headers from `{}`: {}", self.peer, err);
                self.schedule_revert().await;
                return;
            },
        };
        self.peers
            .update_header_rate(self.peer.id(), batch.headers.len(), started.elapsed());

        if let Err(reason) = validate_batch(&self.request, self.batch_len, &batch.headers) {
            debug!(
                target: LOG_TARGET,
                "Rejecting header batch from `{}` anchored at #{}: {}", self.peer, self.request.head, reason
            );
            batch.ack.reject(reason);
            self.schedule_revert().await;
            return;
        }

        // The hash chain is intact, but the delivery may still be junk: batches download
        // concurrently, so the batch cannot be linked to the chain until the gaps above it fill.
        // The peer gets dropped at the drain boundary if that linking fails.
        batch.ack.accept();
        let response = HeaderResponse {
            peer: self.peer.clone(),
            reqid: self.request.id,
            headers: batch.headers,
        };
        tokio::select! {
            _ = self.deliver.send(response) => {},
            _ = self.cancel.clone() => {},
        }
    }

    /// Ask the controller loop to clean this request up and reschedule its task, tolerating the
    /// races where the request already went stale or the cycle was torn down.
    async fn schedule_revert(&mut self) {
        let request = self.request.clone();
        tokio::select! {
            _ = self.revert.send(request) => {},
            _ = self.cancel.clone() => {},
            _ = &mut self.stale => {},
        }
    }
}

/// Cross-checks a delivered batch against its request: it must be non-empty, anchored at the
/// requested head, complete (a full batch, or everything down to block #1 at the chain tail) and
/// internally hash-linked.
fn validate_batch(request: &HeaderRequest, batch_len: usize, headers: &[BlockHeader]) -> Result<(), &'static str> {
    if headers.is_empty() {
        return Err("no headers delivered");
    }
    if headers[0].height != request.head {
        return Err("header batch anchored at wrong block number");
    }
    if request.head >= batch_len as u64 && headers.len() != batch_len {
        return Err("incomplete header batch delivered");
    }
    if request.head < batch_len as u64 && headers.len() as u64 != request.head {
        return Err("incomplete chain tail delivered");
    }
    for pair in headers.windows(2) {
        if pair[0].prev_hash != pair[1].hash() {
            return Err("unlinked headers inside batch");
        }
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use tari_shutdown::Shutdown;
    use tokio::task;

    use super::*;
    use crate::test_helpers::{chain, ClientMode, TestHeaderClient, TestPeerSet};

    struct FetcherTest {
        peers: Arc<TestPeerSet>,
        client: Arc<TestHeaderClient>,
        deliver_rx: mpsc::Receiver<HeaderResponse>,
        revert_rx: mpsc::Receiver<HeaderRequest>,
        revert_tx: mpsc::Sender<HeaderRequest>,
        cancel: Shutdown,
        stale_tx: Option<oneshot::Sender<()>>,
        handle: task::JoinHandle<()>,
    }

    fn spawn_fetcher(mode: ClientMode, headers: &[BlockHeader], head: u64, ttl: Duration) -> FetcherTest {
        let peers = Arc::new(TestPeerSet::new(ttl));
        let client = Arc::new(TestHeaderClient::new(headers.to_vec(), mode));
        let peer = peers.add_peer("alice", Arc::clone(&client), 1);
        let (deliver_tx, deliver_rx) = mpsc::channel(1);
        let (revert_tx, revert_rx) = mpsc::channel(1);
        let (stale_tx, stale_rx) = oneshot::channel();
        let cancel = Shutdown::new();
        let request = HeaderRequest {
            peer: peer.id().clone(),
            id: 1,
            head,
        };
        let fetcher = RequestFetcher::new(
            peer,
            request,
            4,
            Arc::clone(&peers),
            deliver_tx,
            revert_tx.clone(),
            cancel.to_signal(),
            stale_rx,
        );
        let handle = task::spawn(fetcher.run());
        FetcherTest {
            peers,
            client,
            deliver_rx,
            revert_rx,
            revert_tx,
            cancel,
            stale_tx: Some(stale_tx),
            handle,
        }
    }

    const TTL: Duration = Duration::from_secs(5);

    #[tokio::test]
    async fn valid_batch_is_delivered() {
        let headers = chain(8, b"fetch");
        let mut t = spawn_fetcher(ClientMode::Serve, &headers, 7, TTL);
        let response = t.deliver_rx.recv().await.unwrap();
        assert_eq!(response.reqid, 1);
        assert_eq!(response.headers.len(), 4);
        assert_eq!(response.headers[0].height, 7);
        assert_eq!(response.headers[3].height, 4);
        t.handle.await.unwrap();
        assert_eq!(t.client.requests(), vec![(7, 4)]);
        assert_eq!(t.client.ack_results(), vec![Some(Ok(()))]);
    }

    #[tokio::test]
    async fn tail_batch_is_trimmed_to_genesis() {
        let headers = chain(8, b"fetch");
        let mut t = spawn_fetcher(ClientMode::Serve, &headers, 3, TTL);
        let response = t.deliver_rx.recv().await.unwrap();
        assert_eq!(response.headers.len(), 3);
        assert_eq!(response.headers[2].height, 1);
        t.handle.await.unwrap();
        // Block #0 is never requested; the parent hash of #1 is enough to link to genesis.
        assert_eq!(t.client.requests(), vec![(3, 3)]);
    }

    #[tokio::test]
    async fn empty_response_is_reverted() {
        let headers = chain(8, b"fetch");
        let mut t = spawn_fetcher(ClientMode::Empty, &headers, 7, TTL);
        let request = t.revert_rx.recv().await.unwrap();
        assert_eq!(request.id, 1);
        assert!(t.deliver_rx.try_recv().is_err());
        t.handle.await.unwrap();
        assert_eq!(t.client.ack_results(), vec![Some(Err("no headers delivered".to_string()))]);
    }

    #[tokio::test]
    async fn wrong_anchor_is_reverted() {
        let headers = chain(8, b"fetch");
        let mut t = spawn_fetcher(ClientMode::WrongAnchor, &headers, 7, TTL);
        t.revert_rx.recv().await.unwrap();
        t.handle.await.unwrap();
    }

    #[tokio::test]
    async fn short_batch_is_reverted() {
        let headers = chain(8, b"fetch");
        let mut t = spawn_fetcher(ClientMode::ShortBatch, &headers, 7, TTL);
        t.revert_rx.recv().await.unwrap();
        t.handle.await.unwrap();
    }

    #[tokio::test]
    async fn broken_hash_chain_is_reverted() {
        let headers = chain(8, b"fetch");
        let mut t = spawn_fetcher(ClientMode::BrokenLink, &headers, 7, TTL);
        t.revert_rx.recv().await.unwrap();
        t.handle.await.unwrap();
        assert_eq!(
            t.client.ack_results(),
            vec![Some(Err("unlinked headers inside batch".to_string()))]
        );
    }

    #[tokio::test]
    async fn timeout_resets_peer_capacity() {
        let headers = chain(8, b"fetch");
        let mut t = spawn_fetcher(ClientMode::Stall, &headers, 7, Duration::from_millis(50));
        let request = t.revert_rx.recv().await.unwrap();
        assert_eq!(request.id, 1);
        let rates = t.peers.rate_reports();
        assert!(rates.contains(&("alice".into(), 0, Duration::ZERO)));
        t.handle.await.unwrap();
    }

    #[tokio::test]
    async fn cancellation_stops_the_fetcher() {
        let headers = chain(8, b"fetch");
        let mut t = spawn_fetcher(ClientMode::Stall, &headers, 7, TTL);
        t.cancel.trigger();
        t.handle.await.unwrap();
        assert!(t.deliver_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn stale_signal_unblocks_a_stuck_revert() {
        let headers = chain(8, b"fetch");
        let mut t = spawn_fetcher(ClientMode::Empty, &headers, 7, TTL);
        // Fill the revert channel so the fetcher's send has to wait, then mark the request
        // stale. The fetcher must give up on the revert and exit.
        let dummy = HeaderRequest {
            peer: "other".into(),
            id: 99,
            head: 3,
        };
        t.revert_tx.send(dummy.clone()).await.unwrap();
        t.stale_tx.take();
        t.handle.await.unwrap();
        assert_eq!(t.revert_rx.recv().await.unwrap(), dummy);
        assert!(t.revert_rx.try_recv().is_err());
    }
}
