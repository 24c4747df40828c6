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

//! The read view a scan is pinned to.

use std::sync::Arc;

use crate::errors::ResolveError;
use crate::key::Value;
use crate::types::KeyError;
use crate::types::Timestamp;

/// An immutable read view fixed at a transaction's start timestamp.
///
/// A snapshot is shared, read-only, by every cursor opened on it.
#[async_trait::async_trait]
pub trait Snapshot: Send + Sync {
    /// The timestamp every read of this snapshot is consistent at.
    fn version(&self) -> Timestamp;

    /// Resolve a row error into the value visible at [`Self::version`].
    ///
    /// This consults the status of the transaction that owns the lock.
    ///
    /// # Returns
    ///
    /// - `Ok(value)`: the visible value. An empty value means the key has no value at this snapshot.
    /// - `Err(ResolveError::Retryable)`: the locking transaction is not decided yet.
    /// - `Err(ResolveError::Fatal)`: resolution failed for good.
    async fn resolve_key_error(&self, error: &KeyError) -> Result<Value, ResolveError>;
}

#[async_trait::async_trait]
impl<T> Snapshot for &T
where T: Snapshot + ?Sized
{
    fn version(&self) -> Timestamp {
        (**self).version()
    }

    async fn resolve_key_error(&self, error: &KeyError) -> Result<Value, ResolveError> {
        (**self).resolve_key_error(error).await
    }
}

#[async_trait::async_trait]
impl<T> Snapshot for Arc<T>
where T: Snapshot + ?Sized
{
    fn version(&self) -> Timestamp {
        (**self).version()
    }

    async fn resolve_key_error(&self, error: &KeyError) -> Result<Value, ResolveError> {
        (**self).resolve_key_error(error).await
    }
}
