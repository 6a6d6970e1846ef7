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

use serde::{Deserialize, Serialize};

use crate::blocks::{BlockHash, BlockHeader};

/// A contiguous header chain segment that is backed by the database, but may not yet be linked to
/// the chain below it. Restarting an interrupted sync produces a new subchain per restart; as the
/// primary subchain grows downwards it swallows or merges with the older ones.
///
/// All subchains share the one header table and are not kept disjoint on disk. Extending one to
/// overlap another therefore entails trimming the older one first, which avoids having to move
/// header data around when two subchains are joined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subchain {
    /// Block number of the newest header in the subchain.
    #[serde(rename = "Head")]
    pub head: u64,
    /// Block number of the oldest header in the subchain.
    #[serde(rename = "Tail")]
    pub tail: u64,
    /// Block hash that the next header below the tail must have.
    #[serde(rename = "Next")]
    pub next: BlockHash,
}

impl Subchain {
    /// A single-header subchain anchored at the announced head.
    pub fn from_head(header: &BlockHeader) -> Self {
        Self {
            head: header.height,
            tail: header.height,
            next: header.prev_hash,
        }
    }
}

/// The durable record of sync progress: the ordered list of disjoint subchains downloaded so
/// far, newest first. Serialized as JSON so the on-disk format stays readable and stable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkeletonProgress {
    #[serde(rename = "Subchains")]
    pub subchains: Vec<Subchain>,
}

impl SkeletonProgress {
    pub fn from_head(header: &BlockHeader) -> Self {
        Self {
            subchains: vec![Subchain::from_head(header)],
        }
    }

    /// The primary subchain: the youngest one, currently being extended downward.
    ///
    /// ## Panics
    ///
    /// Panics if the progress has not been initialized with at least one subchain. The
    /// synchronizer establishes this before any cycle runs.
    pub fn primary(&self) -> &Subchain {
        &self.subchains[0]
    }

    pub fn primary_mut(&mut self) -> &mut Subchain {
        &mut self.subchains[0]
    }

    pub fn encode(&self) -> Vec<u8> {
        serde_json::to_vec(self).expect("sync progress serialization is infallible")
    }

    pub fn decode(blob: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(blob)
    }
}
