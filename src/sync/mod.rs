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

mod error;
mod fetcher;
mod handle;
mod hooks;
mod progress;
mod scratch;
mod synchronizer;


pub use error::SkeletonSyncError;
pub use handle::SkeletonSync;
pub use progress::{SkeletonProgress, Subchain};
pub use synchronizer::SkeletonSynchronizer;

/// Configuration for the skeleton synchronizer.
#[derive(Debug, Clone)]
pub struct SkeletonSyncConfig {
    /// Number of header slots in the in-memory scratch window used to reassemble concurrently
    /// downloaded batches. A header is roughly 0.5KB, so the default of 131072 slots costs about
    /// 64MB of RAM. Gaps can only be validated once they link up to the window head, so a larger
    /// window also means more potential for invalid headers in flight.
    pub scratch_len: usize,
    /// Number of headers requested from a peer in a single request. The batch size stays fixed
    /// regardless of peer capacity; headers are small and fixed batches keep the scratch window
    /// bookkeeping simple.
    pub request_len: usize,
}

impl Default for SkeletonSyncConfig {
    fn default() -> Self {
        Self {
            scratch_len: 131_072,
            request_len: 512,
        }
    }
}

impl SkeletonSyncConfig {
    /// The scratch window must be assignable in full to peers; a dangling half-batch is a
    /// useless corner case to support.
    pub fn validate(&self) -> Result<(), SkeletonSyncError> {
        if self.request_len == 0 {
            return Err(SkeletonSyncError::InvalidConfiguration(
                "request_len must be non-zero".to_string(),
            ));
        }
        if self.scratch_len == 0 || self.scratch_len % self.request_len != 0 {
            return Err(SkeletonSyncError::InvalidConfiguration(format!(
                "scratch_len ({}) must be a non-zero multiple of request_len ({})",
                self.scratch_len, self.request_len
            )));
        }
        Ok(())
    }
}

/// A snapshot of sync progress, published on a watch channel after every commit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncStatusInfo {
    /// Height of the newest header of the primary subchain.
    pub head: u64,
    /// Height of the oldest header of the primary subchain.
    pub tail: u64,
    /// Headers downloaded since the synchronizer started.
    pub downloaded: u64,
}

impl SyncStatusInfo {
    /// Number of headers still missing below the primary subchain.
    pub fn left(&self) -> u64 {
        self.tail.saturating_sub(1)
    }
}

#[cfg(test)]
mod config_test {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        SkeletonSyncConfig::default().validate().unwrap();
    }

    #[test]
    fn scratch_len_must_be_a_multiple_of_request_len() {
        let config = SkeletonSyncConfig {
            scratch_len: 100,
            request_len: 64,
        };
        assert!(matches!(
            config.validate(),
            Err(SkeletonSyncError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn zero_lengths_are_rejected() {
        let config = SkeletonSyncConfig {
            scratch_len: 0,
            request_len: 0,
        };
        assert!(config.validate().is_err());
    }
}
