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
use std::sync::Arc;

use crate::types::KeyRange;

/// Maps a key to the range that currently owns it.
///
/// The routing information may be stale; a locator is expected to refresh it
/// after a storage node rejected a request routed with it.
#[async_trait::async_trait]
pub trait RangeLocator: Send + Sync {
    /// Returns the range containing `key`.
    async fn locate(&self, key: &[u8]) -> Result<KeyRange, io::Error>;
}

#[async_trait::async_trait]
impl<T> RangeLocator for &T
where T: RangeLocator + ?Sized
{
    async fn locate(&self, key: &[u8]) -> Result<KeyRange, io::Error> {
        (**self).locate(key).await
    }
}

#[async_trait::async_trait]
impl<T> RangeLocator for Arc<T>
where T: RangeLocator + ?Sized
{
    async fn locate(&self, key: &[u8]) -> Result<KeyRange, io::Error> {
        (**self).locate(key).await
    }
}
