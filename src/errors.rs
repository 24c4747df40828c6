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

use std::io;

use crate::types::KeyError;

/// Errors returned by a [`Scanner`](crate::Scanner).
#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    /// The scan reached the end of the key space.
    ///
    /// Not a failure: callers treat it as the end of the sequence.
    #[error("end of data")]
    EndOfData,

    /// The cursor was already closed or exhausted.
    #[error("scanner iterator is invalid")]
    IteratorInvalid,

    /// A retry budget was exhausted. Retrying the enclosing operation may succeed.
    #[error("retryable: {reason}")]
    Retryable { reason: String },

    /// The storage node replied without a scan body.
    #[error("body is missing")]
    BodyMissing,

    /// A row carried an error that is not a lock.
    #[error("key error: {0}")]
    KeyError(KeyError),

    /// Lock resolution failed in a way that retrying will not fix.
    #[error("failed to resolve lock: {0}")]
    ResolveLock(io::Error),

    /// Routing or transport failure from a collaborator.
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl ScanError {
    pub fn retryable(reason: impl ToString) -> Self {
        ScanError::Retryable {
            reason: reason.to_string(),
        }
    }

    pub fn is_end_of_data(&self) -> bool {
        matches!(self, ScanError::EndOfData)
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, ScanError::Retryable { .. })
    }
}

/// Outcome of a failed attempt to resolve a row error into a value.
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    /// The locking transaction is still undecided; try again later.
    #[error("lock not yet resolvable: {0}")]
    Retryable(String),

    #[error(transparent)]
    Fatal(#[from] io::Error),
}
