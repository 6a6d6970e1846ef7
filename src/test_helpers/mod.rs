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

//! Common test collaborators: deterministic header chains, a scriptable peer set and header
//! clients, a counting backfiller and a peer-drop recorder.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
        Mutex,
    },
    time::{Duration, Instant},
};

use async_trait::async_trait;
use blake2::{digest::consts::U32, Blake2b, Digest};
use tokio::sync::{mpsc, oneshot};

use crate::{
    blocks::{BlockHash, BlockHeader},
    peers::{
        Backfiller,
        BatchAck,
        HeaderBatch,
        HeaderClient,
        PeerConnectionError,
        PeerDropFn,
        PeerEvent,
        PeerId,
        SyncPeer,
        SyncPeerSet,
    },
};

type TestHasher = Blake2b<U32>;

/// Build a header with a hash the way the node's wire codec would: a digest over the parsed
/// fields and the opaque payload.
pub fn make_header(height: u64, prev_hash: BlockHash, salt: &[u8]) -> BlockHeader {
    let payload = salt.to_vec();
    let mut hasher = TestHasher::new();
    hasher.update(height.to_le_bytes());
    hasher.update(prev_hash.as_bytes());
    hasher.update(&payload);
    let hash: [u8; 32] = hasher.finalize().into();
    BlockHeader::new(height, prev_hash, hash.into(), payload)
}

/// A hash-linked chain of headers at heights `1..=len`, anchored on the all-zero genesis hash.
/// Different salts produce entirely different (forked) chains.
pub fn chain(len: u64, salt: &[u8]) -> Vec<BlockHeader> {
    let mut headers = Vec::with_capacity(len as usize);
    let mut prev = BlockHash::zero();
    for height in 1..=len {
        let header = make_header(height, prev, salt);
        prev = header.hash();
        headers.push(header);
    }
    headers
}

/// What a [TestHeaderClient] does with incoming requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientMode {
    /// Serve correct batches from the configured chain.
    Serve,
    /// Never respond.
    Stall,
    /// Respond with no headers.
    Empty,
    /// Serve a batch anchored one block below the requested head.
    WrongAnchor,
    /// Serve one header short of a complete batch.
    ShortBatch,
    /// Serve a batch with a corrupted parent hash in the middle.
    BrokenLink,
}

/// A scriptable in-process header client. Records every request it receives and keeps the
/// acknowledgement receivers around for inspection.
pub struct TestHeaderClient {
    chain: HashMap<u64, BlockHeader>,
    mode: ClientMode,
    serve_limit: Option<usize>,
    requests: Mutex<Vec<(u64, usize)>>,
    acks: Mutex<Vec<oneshot::Receiver<Result<(), String>>>>,
}

impl TestHeaderClient {
    pub fn new(headers: Vec<BlockHeader>, mode: ClientMode) -> Self {
        Self {
            chain: headers.into_iter().map(|h| (h.height, h)).collect(),
            mode,
            serve_limit: None,
            requests: Mutex::new(Vec::new()),
            acks: Mutex::new(Vec::new()),
        }
    }

    /// Fail requests after the first `limit` have been answered.
    pub fn with_serve_limit(mut self, limit: usize) -> Self {
        self.serve_limit = Some(limit);
        self
    }

    /// Every `(start, count)` request received so far.
    pub fn requests(&self) -> Vec<(u64, usize)> {
        self.requests.lock().unwrap().clone()
    }

    /// The settled acknowledgement of each response, in request order. `None` when the
    /// acknowledgement has not been settled (yet).
    pub fn ack_results(&self) -> Vec<Option<Result<(), String>>> {
        self.acks
            .lock()
            .unwrap()
            .iter_mut()
            .map(|rx| rx.try_recv().ok())
            .collect()
    }

    fn serve(&self, start: u64, count: usize) -> Vec<BlockHeader> {
        let mut headers = Vec::with_capacity(count);
        let mut height = start;
        while headers.len() < count && height > 0 {
            match self.chain.get(&height) {
                Some(header) => headers.push(header.clone()),
                None => break,
            }
            height -= 1;
        }
        headers
    }

    fn respond(&self, headers: Vec<BlockHeader>) -> HeaderBatch {
        let (ack, ack_rx) = BatchAck::channel();
        self.acks.lock().unwrap().push(ack_rx);
        HeaderBatch { headers, ack }
    }
}

#[async_trait]
impl HeaderClient for TestHeaderClient {
    async fn headers_by_number(
        &self,
        start: u64,
        count: usize,
        _skip: u64,
        _reverse: bool,
    ) -> Result<HeaderBatch, PeerConnectionError> {
        let served = {
            let mut requests = self.requests.lock().unwrap();
            requests.push((start, count));
            requests.len()
        };
        if let Some(limit) = self.serve_limit {
            if served > limit {
                return Err(PeerConnectionError::RequestFailed("serve limit reached".to_string()));
            }
        }
        match self.mode {
            ClientMode::Stall => std::future::pending().await,
            ClientMode::Empty => Ok(self.respond(Vec::new())),
            ClientMode::Serve => Ok(self.respond(self.serve(start, count))),
            ClientMode::WrongAnchor => Ok(self.respond(self.serve(start.saturating_sub(1), count))),
            ClientMode::ShortBatch => {
                let mut headers = self.serve(start, count);
                headers.pop();
                Ok(self.respond(headers))
            },
            ClientMode::BrokenLink => {
                let mut headers = self.serve(start, count);
                if headers.len() > 1 {
                    headers[0].prev_hash = BlockHash::zero();
                }
                Ok(self.respond(headers))
            },
        }
    }
}

#[derive(Default)]
struct PeerSetInner {
    peers: Vec<SyncPeer>,
    capacities: HashMap<PeerId, u64>,
    events: Option<mpsc::Sender<PeerEvent>>,
    rates: Vec<(PeerId, usize, Duration)>,
}

/// An in-process [SyncPeerSet] whose membership and capacities are driven by the test.
pub struct TestPeerSet {
    inner: Mutex<PeerSetInner>,
    target_timeout: Duration,
}

impl TestPeerSet {
    pub fn new(target_timeout: Duration) -> Self {
        Self {
            inner: Mutex::new(PeerSetInner::default()),
            target_timeout,
        }
    }

    /// Register a peer backed by the given client. The peer is visible to `all_peers`
    /// immediately; emitting a join event is the test's own business.
    pub fn add_peer(&self, id: &str, client: Arc<TestHeaderClient>, capacity: u64) -> SyncPeer {
        let peer = SyncPeer::new(id.into(), client);
        let mut inner = self.inner.lock().unwrap();
        inner.capacities.insert(peer.id().clone(), capacity);
        inner.peers.push(peer.clone());
        peer
    }

    pub fn remove_peer(&self, id: &PeerId) {
        let mut inner = self.inner.lock().unwrap();
        inner.peers.retain(|peer| peer.id() != id);
    }

    /// Push a join/leave event to the current subscriber.
    pub fn push_event(&self, event: PeerEvent) {
        let inner = self.inner.lock().unwrap();
        inner
            .events
            .as_ref()
            .expect("no active peer event subscription")
            .try_send(event)
            .expect("peer event buffer overflow");
    }

    /// Every `(peer, items, elapsed)` rate measurement reported so far.
    pub fn rate_reports(&self) -> Vec<(PeerId, usize, Duration)> {
        self.inner.lock().unwrap().rates.clone()
    }
}

impl SyncPeerSet for TestPeerSet {
    fn all_peers(&self) -> Vec<SyncPeer> {
        self.inner.lock().unwrap().peers.clone()
    }

    fn subscribe_events(&self) -> mpsc::Receiver<PeerEvent> {
        let (tx, rx) = mpsc::channel(64);
        self.inner.lock().unwrap().events = Some(tx);
        rx
    }

    fn header_capacity(&self, peer: &PeerId, _target_timeout: Duration) -> u64 {
        self.inner.lock().unwrap().capacities.get(peer).copied().unwrap_or(1)
    }

    fn target_timeout(&self) -> Duration {
        self.target_timeout
    }

    fn update_header_rate(&self, peer: &PeerId, items: usize, elapsed: Duration) {
        self.inner.lock().unwrap().rates.push((peer.clone(), items, elapsed));
    }
}

/// A [Backfiller] that only counts how often it is suspended and resumed.
#[derive(Default)]
pub struct CountingBackfiller {
    suspended: AtomicUsize,
    resumed: AtomicUsize,
}

impl CountingBackfiller {
    pub fn suspended(&self) -> usize {
        self.suspended.load(Ordering::SeqCst)
    }

    pub fn resumed(&self) -> usize {
        self.resumed.load(Ordering::SeqCst)
    }
}

impl Backfiller for CountingBackfiller {
    fn suspend(&self) {
        self.suspended.fetch_add(1, Ordering::SeqCst);
    }

    fn resume(&self) {
        self.resumed.fetch_add(1, Ordering::SeqCst);
    }
}

/// A peer-drop callback that records who was dropped.
pub fn drop_recorder() -> (PeerDropFn, Arc<Mutex<Vec<PeerId>>>) {
    let log = Arc::new(Mutex::new(Vec::new()));
    let recorder = Arc::clone(&log);
    let callback: PeerDropFn = Arc::new(move |peer: &PeerId| {
        recorder.lock().unwrap().push(peer.clone());
    });
    (callback, log)
}

/// Poll `cond` until it holds, panicking after `timeout`.
pub async fn wait_until<F>(mut cond: F, timeout: Duration)
where F: FnMut() -> bool {
    let deadline = Instant::now() + timeout;
    while !cond() {
        if Instant::now() > deadline {
            panic!("condition not met within {:?}", timeout);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
