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

//! Collaborator seams between the synchronizer and the node's networking layer.
//!
//! The synchronizer does not speak any wire protocol itself. It sees peers through the
//! [SyncPeerSet] trait (membership, join/leave events and download capacity estimates) and issues
//! header requests through each peer's [HeaderClient]. Peers that misbehave at the chain linking
//! boundary are reported through the [PeerDropFn] callback; what "dropping" means (disconnect,
//! ban, score penalty) is the network layer's business.

use std::{
    fmt::{Display, Formatter},
    sync::Arc,
    time::Duration,
};

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};

use crate::blocks::BlockHeader;

/// Identifies a peer within the sync peer set.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId(String);

impl PeerId {
    pub fn new<T: Into<String>>(id: T) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for PeerId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for PeerId {
    fn from(id: String) -> Self {
        Self::new(id)
    }
}

impl Display for PeerId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A connected peer that header batches can be requested from.
#[derive(Clone)]
pub struct SyncPeer {
    id: PeerId,
    client: Arc<dyn HeaderClient>,
}

impl SyncPeer {
    pub fn new(id: PeerId, client: Arc<dyn HeaderClient>) -> Self {
        Self { id, client }
    }

    pub fn id(&self) -> &PeerId {
        &self.id
    }

    pub fn client(&self) -> &Arc<dyn HeaderClient> {
        &self.client
    }
}

impl PartialEq for SyncPeer {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}
impl Eq for SyncPeer {}

impl std::fmt::Debug for SyncPeer {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncPeer").field("id", &self.id).finish()
    }
}

impl Display for SyncPeer {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Display::fmt(&self.id, f)
    }
}

/// Peer set membership changes, delivered on the stream returned by
/// [SyncPeerSet::subscribe_events].
#[derive(Debug, Clone)]
pub enum PeerEvent {
    Joined(SyncPeer),
    Left(PeerId),
}

/// Access to the node's sync peer set and its bandwidth oracle.
///
/// Capacity estimation and timeout targeting are deliberately opaque: the synchronizer only ranks
/// idle peers by the returned capacity and feeds measured rates back after every request.
pub trait SyncPeerSet: Send + Sync {
    /// All currently connected sync peers.
    fn all_peers(&self) -> Vec<SyncPeer>;

    /// Subscribe to join/leave events. Implementations must buffer bursts of at least 64 events.
    fn subscribe_events(&self) -> mpsc::Receiver<PeerEvent>;

    /// Estimated number of headers the peer can deliver within the target timeout.
    fn header_capacity(&self, peer: &PeerId, target_timeout: Duration) -> u64;

    /// The timeout allowance that in-flight header requests should be given.
    fn target_timeout(&self) -> Duration;

    /// Feed a measured header delivery back into the capacity oracle. A timed out request is
    /// reported as zero items in zero time, which resets the peer's capacity estimate.
    fn update_header_rate(&self, peer: &PeerId, items: usize, elapsed: Duration);
}

/// Callback used to drop a peer whose delivered batch failed to link into the chain being
/// extended.
pub type PeerDropFn = Arc<dyn Fn(&PeerId) + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PeerConnectionError {
    #[error("Header request failed: {0}")]
    RequestFailed(String),
}

/// The remote end of a header-by-number request.
#[async_trait]
pub trait HeaderClient: Send + Sync {
    /// Request up to `count` consecutive headers anchored at block number `start`. With
    /// `reverse` set the run proceeds towards genesis; `skip` leaves gaps between returned
    /// headers. The skeleton synchronizer always requests contiguous descending runs.
    async fn headers_by_number(
        &self,
        start: u64,
        count: usize,
        skip: u64,
        reverse: bool,
    ) -> Result<HeaderBatch, PeerConnectionError>;
}

/// A batch of headers returned by a peer, along with the acknowledgement used to report the
/// outcome of validating it back to the peer's reputation tracking.
pub struct HeaderBatch {
    pub headers: Vec<BlockHeader>,
    pub ack: BatchAck,
}

/// One-shot acknowledgement of a delivered header batch. Carries an optional rejection reason
/// back to the transport; dropping it unsettled simply closes the channel.
pub struct BatchAck {
    reply: Option<oneshot::Sender<Result<(), String>>>,
}

impl BatchAck {
    pub fn channel() -> (Self, oneshot::Receiver<Result<(), String>>) {
        let (tx, rx) = oneshot::channel();
        (Self { reply: Some(tx) }, rx)
    }

    /// An acknowledgement nobody is listening to.
    pub fn discard() -> Self {
        Self { reply: None }
    }

    pub fn accept(mut self) {
        if let Some(reply) = self.reply.take() {
            let _ = reply.send(Ok(()));
        }
    }

    pub fn reject<T: Into<String>>(mut self, reason: T) {
        if let Some(reply) = self.reply.take() {
            let _ = reply.send(Err(reason.into()));
        }
    }
}

/// Collaborator performing forward body/state sync once the skeleton chain is complete.
///
/// Both calls must be idempotent and re-entrant: the synchronizer suspends unconditionally on
/// every cycle exit and may resume several times without an intervening suspend.
pub trait Backfiller: Send + Sync {
    /// Abort any running forward fill; the skeleton chain above it may be about to change.
    fn suspend(&self);

    /// The skeleton chain is linked down to genesis; forward filling may proceed.
    fn resume(&self);
}
