// Copyright 2021 Datafuse Labs
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use crate::backoff::BackoffConfig;

/// Page size used when the requested one is too small to detect the end of a range.
pub const DEFAULT_BATCH_SIZE: usize = 256;

/// Settings of a [`Scanner`](crate::Scanner).
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Max number of rows fetched per request.
    pub batch_size: usize,

    /// Retry policy for rows blocked by an undecided lock.
    pub lock_backoff: BackoffConfig,

    /// Retry policy for requests rejected because of stale range routing.
    pub range_miss_backoff: BackoffConfig,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            lock_backoff: BackoffConfig::txn_lock(),
            range_miss_backoff: BackoffConfig::range_miss(),
        }
    }
}

impl ScanConfig {
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_lock_backoff(mut self, config: BackoffConfig) -> Self {
        self.lock_backoff = config;
        self
    }

    pub fn with_range_miss_backoff(mut self, config: BackoffConfig) -> Self {
        self.range_miss_backoff = config;
        self
    }

    /// The page size actually requested.
    ///
    /// It must be > 1: a range is considered exhausted when a page returns fewer
    /// rows than requested, which can not be told apart from a full page at size 1.
    pub fn effective_batch_size(&self) -> usize {
        if self.batch_size <= 1 {
            DEFAULT_BATCH_SIZE
        } else {
            self.batch_size
        }
    }
}
