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

//! An in-memory, range-partitioned MVCC store.
//!
//! [`MemCluster`] plays the role of both the routing service and the storage nodes:
//! it implements [`RangeLocator`] and [`RequestSender`], and [`MemSnapshot`] resolves
//! the locks it reports. It is intended for testing and demonstration purposes,
//! not for production use.
//!
//! Routing is cached the way a client-side range cache is: [`MemCluster::split`]
//! changes the ranges but not the cached routing, so a scan routed with the old
//! ranges is rejected with [`RangeError::EpochNotMatch`] and the cache is dropped.

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::io;
use std::ops::Bound;
use std::sync::Arc;

use log::debug;
use log::info;
use tokio::sync::Mutex;

use crate::errors::ResolveError;
use crate::key::display_key;
use crate::key::Key;
use crate::key::Value;
use crate::range_locator::RangeLocator;
use crate::request_sender::RequestSender;
use crate::snapshot::Snapshot;
use crate::types::KeyError;
use crate::types::KeyRange;
use crate::types::LockInfo;
use crate::types::RangeError;
use crate::types::RangeVerId;
use crate::types::Row;
use crate::types::ScanRequest;
use crate::types::ScanResponse;
use crate::types::Timestamp;

/// How the transaction owning a pending lock ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnDecision {
    Commit { commit_ts: Timestamp },
    Rollback,
}

#[derive(Debug, Clone)]
struct PendingLock {
    info: LockInfo,
    /// `None` is a pending delete.
    value: Option<Value>,
    /// `None` until the owning transaction commits or rolls back.
    decision: Option<TxnDecision>,
    /// Number of status checks that still report the transaction as running.
    /// Once it reaches zero an undecided lock is treated as expired and rolled back.
    undecided_checks: u32,
}

#[derive(Debug, Default)]
struct Inner {
    /// Committed versions of every key, in ascending commit timestamp. `None` is a delete.
    data: BTreeMap<Key, Vec<(Timestamp, Option<Value>)>>,

    locks: BTreeMap<Key, PendingLock>,

    /// The authoritative ranges, sorted by start key, covering the whole key space.
    ranges: Vec<KeyRange>,

    /// Ranges as last seen by the locator. Empty means "reload on next locate".
    route_cache: Vec<KeyRange>,

    next_range_id: u64,
    ts: Timestamp,

    /// Number of upcoming scans to reject with [`RangeError::NotLeader`].
    injected_range_errors: usize,

    scan_requests: usize,
}

impl Inner {
    fn new() -> Self {
        let first = KeyRange::new(
            RangeVerId {
                id: 1,
                conf_ver: 1,
                version: 1,
            },
            vec![],
            vec![],
        );
        Self {
            ranges: vec![first],
            next_range_id: 2,
            ..Default::default()
        }
    }

    fn alloc_ts(&mut self) -> Timestamp {
        self.ts += 1;
        self.ts
    }

    fn range_index(&self, key: &[u8]) -> Option<usize> {
        self.ranges.iter().position(|r| r.contains(key))
    }

    fn put_version(&mut self, key: Key, commit_ts: Timestamp, value: Option<Value>) {
        self.ts = self.ts.max(commit_ts);
        let versions = self.data.entry(key).or_default();
        let at = versions.partition_point(|(ts, _)| *ts <= commit_ts);
        versions.insert(at, (commit_ts, value));
    }

    /// The committed value of `key` visible at `read_ts`. Deletes and absent keys yield `None`.
    fn get_at(&self, key: &[u8], read_ts: Timestamp) -> Option<&Value> {
        let versions = self.data.get(key)?;
        let (_, v) = versions.iter().rev().find(|(ts, _)| *ts <= read_ts)?;
        v.as_ref()
    }

    fn decide(&mut self, lock: &LockInfo, decision: TxnDecision) {
        if let Some(p) = self.locks.get_mut(&lock.key) {
            if p.info.lock_version == lock.lock_version {
                p.decision = Some(decision);
            }
        }
    }

    fn scan(&self, req: &ScanRequest, range: &KeyRange) -> Vec<Row> {
        let upper = if range.is_last() {
            Bound::Unbounded
        } else {
            Bound::Excluded(range.end_key.clone())
        };
        let bounds = (Bound::Included(req.start_key.clone()), upper);

        let keys = self
            .data
            .range(bounds.clone())
            .map(|(k, _)| k)
            .chain(self.locks.range(bounds).map(|(k, _)| k))
            .collect::<BTreeSet<_>>();

        let mut rows = vec![];
        for key in keys {
            if rows.len() >= req.limit as usize {
                break;
            }

            if let Some(lock) = self.locks.get(key) {
                if lock.info.lock_version <= req.version {
                    rows.push(Row::locked(lock.info.clone()));
                    continue;
                }
            }

            if let Some(v) = self.get_at(key, req.version) {
                rows.push(Row::new(key.clone(), v.clone()));
            }
        }
        rows
    }
}

/// An in-memory cluster of ranges holding multi-version data.
#[derive(Debug)]
pub struct MemCluster {
    inner: Mutex<Inner>,
}

impl Default for MemCluster {
    fn default() -> Self {
        Self::new()
    }
}

impl MemCluster {
    /// A cluster with a single range covering the whole key space.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::new()),
        }
    }

    /// Allocate a new timestamp.
    pub async fn alloc_ts(&self) -> Timestamp {
        self.inner.lock().await.alloc_ts()
    }

    /// Commit `value` for `key` at a newly allocated timestamp and return it.
    pub async fn put(&self, key: impl Into<Key>, value: impl Into<Value>) -> Timestamp {
        let mut inner = self.inner.lock().await;
        let ts = inner.alloc_ts();
        inner.put_version(key.into(), ts, Some(value.into()));
        ts
    }

    /// Commit a delete of `key` at a newly allocated timestamp and return it.
    pub async fn delete(&self, key: impl Into<Key>) -> Timestamp {
        let mut inner = self.inner.lock().await;
        let ts = inner.alloc_ts();
        inner.put_version(key.into(), ts, None);
        ts
    }

    /// Leave a lock on `key` from a transaction started at a newly allocated timestamp.
    ///
    /// Status checks report the transaction as running `undecided_checks` times.
    /// After that, the lock is resolved with the decision made by [`Self::commit`]
    /// or [`Self::rollback`], or rolled back as expired if there is none.
    pub async fn lock(
        &self,
        key: impl Into<Key>,
        value: Option<Value>,
        undecided_checks: u32,
    ) -> LockInfo {
        let key = key.into();
        let mut inner = self.inner.lock().await;
        let start_ts = inner.alloc_ts();

        let info = LockInfo {
            primary_lock: key.clone(),
            lock_version: start_ts,
            key: key.clone(),
            lock_ttl: 3000,
        };

        inner.locks.insert(key, PendingLock {
            info: info.clone(),
            value,
            decision: None,
            undecided_checks,
        });
        info
    }

    /// Commit the transaction owning `lock` at a newly allocated timestamp and return it.
    ///
    /// The lock stays in place until a reader resolves it.
    pub async fn commit(&self, lock: &LockInfo) -> Timestamp {
        let mut inner = self.inner.lock().await;
        let commit_ts = inner.alloc_ts();
        inner.decide(lock, TxnDecision::Commit { commit_ts });
        commit_ts
    }

    /// Roll back the transaction owning `lock`.
    pub async fn rollback(&self, lock: &LockInfo) {
        self.inner.lock().await.decide(lock, TxnDecision::Rollback);
    }

    /// Split the range containing `at` into `[start, at)` and `[at, end)`.
    ///
    /// The routing cache is kept, so the next request routed through it is rejected.
    pub async fn split(&self, at: impl Into<Key>) {
        let at = at.into();
        let mut inner = self.inner.lock().await;

        let Some(idx) = inner.range_index(&at) else {
            return;
        };
        if inner.ranges[idx].start_key == at {
            return;
        }

        let right_id = inner.next_range_id;
        inner.next_range_id += 1;

        let left = &mut inner.ranges[idx];
        let right = KeyRange::new(
            RangeVerId {
                id: right_id,
                conf_ver: 1,
                version: 1,
            },
            at.clone(),
            left.end_key.clone(),
        );
        left.end_key = at.clone();
        left.ver_id.version += 1;

        inner.ranges.insert(idx + 1, right);
        info!("MemCluster: split at {}", display_key(&at));
    }

    /// Reject the next `n` scans with [`RangeError::NotLeader`].
    pub async fn inject_range_errors(&self, n: usize) {
        self.inner.lock().await.injected_range_errors = n;
    }

    /// Number of scan requests received so far, including rejected ones.
    pub async fn scan_requests(&self) -> usize {
        self.inner.lock().await.scan_requests
    }

    /// The ranges currently owning the key space.
    pub async fn ranges(&self) -> Vec<KeyRange> {
        self.inner.lock().await.ranges.clone()
    }

    /// Resolve `lock` for a reader at `read_ts` by checking its transaction status.
    ///
    /// Returns the value visible at `read_ts` once the transaction is decided,
    /// an empty value if there is none.
    pub async fn resolve_lock(
        &self,
        lock: &LockInfo,
        read_ts: Timestamp,
    ) -> Result<Value, ResolveError> {
        let mut inner = self.inner.lock().await;

        let pending = inner
            .locks
            .get_mut(&lock.key)
            .filter(|p| p.info.lock_version == lock.lock_version);

        if let Some(p) = pending {
            if p.undecided_checks > 0 {
                p.undecided_checks -= 1;
                return Err(ResolveError::Retryable(format!(
                    "txn {} is still running",
                    lock.lock_version
                )));
            }

            let decision = p.decision.unwrap_or(TxnDecision::Rollback);
            let value = p.value.clone();
            inner.locks.remove(&lock.key);

            match decision {
                TxnDecision::Commit { commit_ts } => {
                    debug!(
                        "MemCluster: commit lock {} at {}",
                        display_key(&lock.key),
                        commit_ts
                    );
                    inner.put_version(lock.key.clone(), commit_ts, value);
                }
                TxnDecision::Rollback => {
                    debug!("MemCluster: rollback lock {}", display_key(&lock.key));
                }
            }
        }

        Ok(inner.get_at(&lock.key, read_ts).cloned().unwrap_or_default())
    }

    /// A snapshot at the latest allocated timestamp.
    pub async fn snapshot(self: &Arc<Self>) -> MemSnapshot {
        let ts = self.inner.lock().await.ts;
        MemSnapshot::new(self.clone(), ts)
    }
}

#[async_trait::async_trait]
impl RangeLocator for MemCluster {
    async fn locate(&self, key: &[u8]) -> Result<KeyRange, io::Error> {
        let mut inner = self.inner.lock().await;

        if inner.route_cache.is_empty() {
            inner.route_cache = inner.ranges.clone();
        }

        inner
            .route_cache
            .iter()
            .find(|r| r.contains(key))
            .cloned()
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("no range contains key {}", display_key(key)),
                )
            })
    }
}

#[async_trait::async_trait]
impl RequestSender for MemCluster {
    async fn send_scan(
        &self,
        req: ScanRequest,
        range: RangeVerId,
    ) -> Result<ScanResponse, io::Error> {
        let mut inner = self.inner.lock().await;
        inner.scan_requests += 1;

        if inner.injected_range_errors > 0 {
            inner.injected_range_errors -= 1;
            return Ok(ScanResponse::range_error(RangeError::NotLeader {
                range_id: range.id,
            }));
        }

        let current = inner
            .range_index(&req.start_key)
            .map(|i| inner.ranges[i].clone());

        let Some(current) = current else {
            return Ok(ScanResponse::range_error(RangeError::RangeNotFound {
                range_id: range.id,
            }));
        };

        if current.ver_id != range {
            // Drop the stale routing, like a client-side range cache does.
            inner.route_cache.clear();
            return Ok(ScanResponse::range_error(RangeError::EpochNotMatch {
                current: current.ver_id,
            }));
        }

        let rows = inner.scan(&req, &current);
        Ok(ScanResponse::rows(rows))
    }
}

/// A read view of a [`MemCluster`] at a fixed timestamp.
#[derive(Debug, Clone)]
pub struct MemSnapshot {
    cluster: Arc<MemCluster>,
    version: Timestamp,
}

impl MemSnapshot {
    pub fn new(cluster: Arc<MemCluster>, version: Timestamp) -> Self {
        Self { cluster, version }
    }

    pub fn cluster(&self) -> &Arc<MemCluster> {
        &self.cluster
    }
}

#[async_trait::async_trait]
impl Snapshot for MemSnapshot {
    fn version(&self) -> Timestamp {
        self.version
    }

    async fn resolve_key_error(&self, error: &KeyError) -> Result<Value, ResolveError> {
        match error {
            KeyError::Locked(lock) => self.cluster.resolve_lock(lock, self.version).await,
            KeyError::Retryable(msg) => Err(ResolveError::Retryable(msg.clone())),
            KeyError::Abort(msg) => Err(ResolveError::Fatal(io::Error::new(
                io::ErrorKind::Other,
                msg.clone(),
            ))),
        }
    }
}
