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

//! Request, response and routing types exchanged between the cursor and a storage node.
//!
//! Encoding is left to the transport: every type derives serde traits.

use std::fmt;

use crate::key::display_key;
use crate::key::is_unbounded;
use crate::key::Key;
use crate::key::Value;

/// Transaction timestamp used as the read consistency point.
pub type Timestamp = u64;

/// Identifies one version of a key range's ownership.
///
/// A request carries the `RangeVerId` it was routed with; a storage node rejects
/// it with a [`RangeError`] if the range has since split, merged or moved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct RangeVerId {
    pub id: u64,
    pub conf_ver: u64,
    pub version: u64,
}

impl fmt::Display for RangeVerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{id:{}, conf_ver:{}, ver:{}}}", self.id, self.conf_ver, self.version)
    }
}

/// A contiguous partition `[start_key, end_key)` of the key space.
///
/// An empty `end_key` means the range is unbounded, i.e. it is the last range.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct KeyRange {
    pub ver_id: RangeVerId,
    pub start_key: Key,
    pub end_key: Key,
}

impl KeyRange {
    pub fn new(ver_id: RangeVerId, start_key: impl Into<Key>, end_key: impl Into<Key>) -> Self {
        Self {
            ver_id,
            start_key: start_key.into(),
            end_key: end_key.into(),
        }
    }

    pub fn ver_id(&self) -> RangeVerId {
        self.ver_id
    }

    pub fn end_key(&self) -> &[u8] {
        &self.end_key
    }

    /// Whether this is the last range of the key space.
    pub fn is_last(&self) -> bool {
        is_unbounded(&self.end_key)
    }

    pub fn contains(&self, key: &[u8]) -> bool {
        key >= self.start_key.as_slice() && (self.is_last() || key < self.end_key.as_slice())
    }
}

/// Describes a pending write left by an uncommitted transaction.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct LockInfo {
    /// The primary key of the locking transaction, which holds its commit status.
    pub primary_lock: Key,
    /// Start timestamp of the locking transaction.
    pub lock_version: Timestamp,
    /// The key actually blocked by the lock.
    pub key: Key,
    pub lock_ttl: u64,
}

/// An error attached to a single row of a scan response.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum KeyError {
    /// The row is blocked by a lock of another transaction.
    Locked(LockInfo),
    /// The storage node asks the reader to retry.
    Retryable(String),
    /// The read must be aborted.
    Abort(String),
}

impl KeyError {
    pub fn lock_info(&self) -> Option<&LockInfo> {
        match self {
            KeyError::Locked(lock) => Some(lock),
            _ => None,
        }
    }
}

impl fmt::Display for KeyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyError::Locked(lock) => write!(
                f,
                "locked: key={} primary={} lock_version={}",
                display_key(&lock.key),
                display_key(&lock.primary_lock),
                lock.lock_version
            ),
            KeyError::Retryable(msg) => write!(f, "retryable: {}", msg),
            KeyError::Abort(msg) => write!(f, "abort: {}", msg),
        }
    }
}

/// One observation returned by a scan: a key with either a value or a row error.
#[derive(Debug, Clone, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
pub struct Row {
    pub key: Key,
    pub value: Value,
    pub error: Option<KeyError>,
}

impl Row {
    pub fn new(key: impl Into<Key>, value: impl Into<Value>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            error: None,
        }
    }

    /// Build a row whose value is blocked by `lock`.
    ///
    /// The row key is left empty: the blocked key is carried by the lock.
    pub fn locked(lock: LockInfo) -> Self {
        Self {
            key: vec![],
            value: vec![],
            error: Some(KeyError::Locked(lock)),
        }
    }

    pub fn with_error(key: impl Into<Key>, error: KeyError) -> Self {
        Self {
            key: key.into(),
            value: vec![],
            error: Some(error),
        }
    }

    /// Returns a resolved copy of this row, with the error cleared and `value` installed.
    pub fn resolved(&self, value: Value) -> Self {
        Self {
            key: self.key.clone(),
            value,
            error: None,
        }
    }
}

/// Errors a storage node returns when the routing information of a request is stale.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize, thiserror::Error)]
pub enum RangeError {
    #[error("not leader of range {range_id}")]
    NotLeader { range_id: u64 },

    #[error("epoch not match, current: {current}")]
    EpochNotMatch { current: RangeVerId },

    #[error("range {range_id} not found")]
    RangeNotFound { range_id: u64 },

    #[error("stale command")]
    StaleCommand,
}

/// A range-scoped scan request: read at most `limit` rows from `start_key` at `version`.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ScanRequest {
    pub start_key: Key,
    pub limit: u32,
    pub version: Timestamp,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
pub struct ScanBody {
    pub rows: Vec<Row>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
pub struct ScanResponse {
    pub range_error: Option<RangeError>,
    pub body: Option<ScanBody>,
}

impl ScanResponse {
    pub fn rows(rows: Vec<Row>) -> Self {
        Self {
            range_error: None,
            body: Some(ScanBody { rows }),
        }
    }

    pub fn range_error(err: RangeError) -> Self {
        Self {
            range_error: Some(err),
            body: None,
        }
    }
}
