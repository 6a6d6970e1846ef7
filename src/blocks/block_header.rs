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

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use tari_utilities::hex::{from_hex, to_hex};

/// The length in bytes of a block header hash.
pub const BLOCK_HASH_LENGTH: usize = 32;

/// A block header hash. Hashes are computed by the node's consensus rules; this crate treats them
/// as opaque identifiers and only ever compares them for equality.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct BlockHash([u8; BLOCK_HASH_LENGTH]);

impl BlockHash {
    /// The all-zero hash, used as the parent hash of the genesis block.
    pub fn zero() -> Self {
        Self::default()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl From<[u8; BLOCK_HASH_LENGTH]> for BlockHash {
    fn from(bytes: [u8; BLOCK_HASH_LENGTH]) -> Self {
        Self(bytes)
    }
}

impl Display for BlockHash {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{}", to_hex(&self.0))
    }
}

// Hashes serialize as 0x-prefixed hex strings so that the persisted sync progress stays
// wire-compatible with pre-existing on-disk state.
impl Serialize for BlockHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("0x{}", to_hex(&self.0)))
    }
}

impl<'de> Deserialize<'de> for BlockHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let hex = String::deserialize(deserializer)?;
        let hex = hex.strip_prefix("0x").unwrap_or(&hex);
        let bytes = from_hex(hex).map_err(|e| de::Error::custom(format!("invalid block hash: {}", e)))?;
        if bytes.len() != BLOCK_HASH_LENGTH {
            return Err(de::Error::custom(format!(
                "invalid block hash length: expected {} bytes, got {}",
                BLOCK_HASH_LENGTH,
                bytes.len()
            )));
        }
        let mut hash = [0u8; BLOCK_HASH_LENGTH];
        hash.copy_from_slice(&bytes);
        Ok(Self(hash))
    }
}

/// A block header as seen by the skeleton synchronizer.
///
/// The synchronizer only ever looks at the height, the parent hash and the header's own hash; the
/// remainder of the encoded header travels along as an opaque payload. The hash is a deterministic
/// function of the header computed by the wire codec before the header enters this crate, and the
/// header is never mutated here.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    /// Height (block number) of this header.
    pub height: u64,
    /// Hash of the parent header.
    pub prev_hash: BlockHash,
    /// The header's own hash, as computed by the consensus rules.
    hash: BlockHash,
    /// The rest of the encoded header. Opaque to the synchronizer.
    pub payload: Vec<u8>,
}

impl BlockHeader {
    pub fn new(height: u64, prev_hash: BlockHash, hash: BlockHash, payload: Vec<u8>) -> Self {
        Self {
            height,
            prev_hash,
            hash,
            payload,
        }
    }

    pub fn hash(&self) -> BlockHash {
        self.hash
    }
}

impl Display for BlockHeader {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{} ({})", self.height, self.hash)
    }
}
