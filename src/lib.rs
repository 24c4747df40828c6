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

//! # Range Scan
//!
//! A client-side range-scan cursor for a distributed, range-partitioned MVCC key-value store.
//!
//! Given a snapshot and a start key, a [`Scanner`] yields the `(key, value)` pairs visible at
//! the snapshot in ascending key order. It fetches rows page by page from whichever range owns
//! the next key, resolves locks left by in-flight transactions before exposing a row, and
//! retries when the routing information turns out stale.
//!
//! ## Core Components
//!
//! - [`Scanner`]: the cursor.
//! - [`Snapshot`]: the read view; resolves locks.
//! - [`RangeLocator`]: maps a key to the range owning it.
//! - [`RequestSender`]: sends a scan request to a range owner.
//! - [`Backoff`]: bounded retry policy, one instance per retry loop.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use range_scan::impls::mem_cluster::MemCluster;
//! use range_scan::ScanError;
//! use range_scan::Scanner;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), ScanError> {
//!     let cluster = Arc::new(MemCluster::new());
//!     cluster.put("k1", "v1").await;
//!     cluster.put("k2", "v2").await;
//!
//!     let snapshot = cluster.snapshot().await;
//!     let mut scanner = Scanner::new(&snapshot, &*cluster, &*cluster, "k", 64).await?;
//!
//!     while let Some((key, value)) = scanner.current() {
//!         println!("{:?} = {:?}", key, value);
//!         match scanner.advance().await {
//!             Ok(()) => {}
//!             Err(e) if e.is_end_of_data() => break,
//!             Err(e) => return Err(e),
//!         }
//!     }
//!
//!     Ok(())
//! }
//! ```

use futures_util::stream::BoxStream;

pub mod backoff;
pub mod config;
pub mod errors;
pub mod impls;
pub mod key;
pub mod range_locator;
pub mod request_sender;
pub mod scanner;
pub mod snapshot;
pub mod types;

#[cfg(test)]
mod scanner_test;

pub use crate::backoff::Backoff;
pub use crate::backoff::BackoffConfig;
pub use crate::backoff::Jitter;
pub use crate::config::ScanConfig;
pub use crate::config::DEFAULT_BATCH_SIZE;
pub use crate::errors::ResolveError;
pub use crate::errors::ScanError;
pub use crate::key::next_key;
pub use crate::key::Key;
pub use crate::key::Value;
pub use crate::range_locator::RangeLocator;
pub use crate::request_sender::RequestSender;
pub use crate::scanner::scan;
pub use crate::scanner::Scanner;
pub use crate::snapshot::Snapshot;

/// A key-value pair yielded by a scan.
pub type KV = (Key, Value);

/// A boxed stream of the visible key-value pairs of a scan.
/// The stream is 'static so it can outlive the scope that opened the scanner.
pub type ScanResultStream = BoxStream<'static, Result<KV, ScanError>>;
