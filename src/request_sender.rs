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

use crate::types::RangeVerId;
use crate::types::ScanRequest;
use crate::types::ScanResponse;

/// Sends a range-scoped request to the storage node owning the range.
#[async_trait::async_trait]
pub trait RequestSender: Send + Sync {
    /// Send `req` to the owner of the range identified by `range`.
    ///
    /// A stale `range` is reported in [`ScanResponse::range_error`], not as `Err`.
    /// `Err` is reserved for transport failures.
    async fn send_scan(
        &self,
        req: ScanRequest,
        range: RangeVerId,
    ) -> Result<ScanResponse, io::Error>;
}

#[async_trait::async_trait]
impl<T> RequestSender for &T
where T: RequestSender + ?Sized
{
    async fn send_scan(
        &self,
        req: ScanRequest,
        range: RangeVerId,
    ) -> Result<ScanResponse, io::Error> {
        (**self).send_scan(req, range).await
    }
}

#[async_trait::async_trait]
impl<T> RequestSender for Arc<T>
where T: RequestSender + ?Sized
{
    async fn send_scan(
        &self,
        req: ScanRequest,
        range: RangeVerId,
    ) -> Result<ScanResponse, io::Error> {
        (**self).send_scan(req, range).await
    }
}
