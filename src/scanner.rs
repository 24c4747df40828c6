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

//! A forward cursor over the rows visible at a snapshot.
//!
//! The cursor fetches rows page by page from whichever range owns the next key,
//! resolves locks before exposing a row and skips rows with no value.

use futures_util::StreamExt;
use log::debug;
use log::warn;

use crate::backoff::Backoff;
use crate::config::ScanConfig;
use crate::errors::ResolveError;
use crate::errors::ScanError;
use crate::key::display_key;
use crate::key::next_key;
use crate::key::Key;
use crate::key::Value;
use crate::range_locator::RangeLocator;
use crate::request_sender::RequestSender;
use crate::snapshot::Snapshot;
use crate::types::KeyError;
use crate::types::KeyRange;
use crate::types::LockInfo;
use crate::types::Row;
use crate::types::ScanRequest;
use crate::types::Timestamp;
use crate::ScanResultStream;

/// Scans the rows visible at a snapshot, in ascending key order, starting at a key.
///
/// A `Scanner` is always positioned on a visible row while [`Scanner::is_valid`] returns `true`.
/// Once invalid, either closed, exhausted or failed, it never becomes valid again.
///
/// - `S`: the snapshot the scan reads at.
/// - `L`: resolves a key to the range owning it.
/// - `T`: sends scan requests to range owners.
pub struct Scanner<S, L, T>
where
    S: Snapshot,
    L: RangeLocator,
    T: RequestSender,
{
    snapshot: S,
    locator: L,
    sender: T,

    config: ScanConfig,
    batch_size: usize,

    valid: bool,

    /// Rows of the last fetched page.
    page: Vec<Row>,

    /// Index of the current row in `page`. `None` is before the first row.
    pos: Option<usize>,

    /// Where the next fetch starts.
    next_start_key: Key,

    /// No range exists after the one last fetched.
    eof: bool,
}

impl<S, L, T> Scanner<S, L, T>
where
    S: Snapshot,
    L: RangeLocator,
    T: RequestSender,
{
    /// Open a scanner at `start_key` fetching `batch_size` rows per request.
    ///
    /// A `batch_size` <= 1 is replaced with the default batch size.
    pub async fn new(
        snapshot: S,
        locator: L,
        sender: T,
        start_key: impl Into<Key>,
        batch_size: usize,
    ) -> Result<Self, ScanError> {
        let config = ScanConfig::default().with_batch_size(batch_size);
        Self::with_config(snapshot, locator, sender, start_key, config).await
    }

    /// Open a scanner and position it on the first visible row at or after `start_key`.
    ///
    /// An empty scan is not an error: the returned scanner is just invalid.
    pub async fn with_config(
        snapshot: S,
        locator: L,
        sender: T,
        start_key: impl Into<Key>,
        config: ScanConfig,
    ) -> Result<Self, ScanError> {
        let batch_size = config.effective_batch_size();

        let mut scanner = Self {
            snapshot,
            locator,
            sender,
            config,
            batch_size,
            valid: true,
            page: vec![],
            pos: None,
            next_start_key: start_key.into(),
            eof: false,
        };

        match scanner.advance().await {
            Ok(()) => Ok(scanner),
            Err(e) if e.is_end_of_data() => Ok(scanner),
            Err(e) => Err(e),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    /// The key of the current row, or `None` if the scanner is invalid.
    pub fn key(&self) -> Option<&[u8]> {
        self.current_row().map(|r| r.key.as_slice())
    }

    /// The value of the current row, or `None` if the scanner is invalid.
    pub fn value(&self) -> Option<&[u8]> {
        self.current_row().map(|r| r.value.as_slice())
    }

    /// The current `(key, value)`, or `None` if the scanner is invalid.
    pub fn current(&self) -> Option<(&[u8], &[u8])> {
        self.current_row()
            .map(|r| (r.key.as_slice(), r.value.as_slice()))
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// The key the next fetch will start at.
    pub fn next_start_key(&self) -> &[u8] {
        &self.next_start_key
    }

    pub fn version(&self) -> Timestamp {
        self.snapshot.version()
    }

    /// Move to the next visible row.
    ///
    /// # Returns
    ///
    /// - `Ok(())`: positioned on a visible row.
    /// - `Err(ScanError::EndOfData)`: no more rows. The scanner is closed.
    /// - `Err(ScanError::IteratorInvalid)`: the scanner was already invalid.
    /// - Any other error closes the scanner.
    pub async fn advance(&mut self) -> Result<(), ScanError> {
        if !self.valid {
            return Err(ScanError::IteratorInvalid);
        }

        loop {
            let pos = self.pos.map_or(0, |p| p + 1);

            if pos >= self.page.len() {
                if self.eof {
                    self.close();
                    return Err(ScanError::EndOfData);
                }

                if let Err(e) = self.fetch().await {
                    self.close();
                    return Err(e);
                }

                // The new page is positioned before its first row.
                continue;
            }

            self.pos = Some(pos);

            if let Err(e) = self.resolve_current_lock(pos).await {
                self.close();
                return Err(e);
            }

            // An empty value stands for "not exist".
            if self.page[pos].value.is_empty() {
                continue;
            }

            return Ok(());
        }
    }

    /// Invalidate the scanner and release its page. Closing twice is a no-op.
    pub fn close(&mut self) {
        self.valid = false;
        self.page = vec![];
        self.pos = None;
    }

    /// Convert into a stream of the remaining visible `(key, value)` pairs,
    /// starting with the current one.
    ///
    /// The stream ends at the end of data or right after yielding an error.
    pub fn into_stream(self) -> ScanResultStream
    where
        S: 'static,
        L: 'static,
        T: 'static,
    {
        let strm = futures::stream::unfold((self, false), |(mut scanner, started)| async move {
            if started {
                if !scanner.is_valid() {
                    return None;
                }

                if let Err(e) = scanner.advance().await {
                    if e.is_end_of_data() {
                        return None;
                    }
                    return Some((Err(e), (scanner, true)));
                }
            }

            let kv = scanner.current().map(|(k, v)| (k.to_vec(), v.to_vec()))?;
            Some((Ok(kv), (scanner, true)))
        });

        strm.boxed()
    }

    fn current_row(&self) -> Option<&Row> {
        if !self.valid {
            return None;
        }
        self.pos.and_then(|p| self.page.get(p))
    }

    /// Replace the row at `pos` with its resolved form if it is blocked by a lock.
    async fn resolve_current_lock(&mut self, pos: usize) -> Result<(), ScanError> {
        let Some(key_error) = self.page[pos].error.clone() else {
            return Ok(());
        };

        let mut backoff = Backoff::new("txnLock", self.config.lock_backoff);

        loop {
            match self.snapshot.resolve_key_error(&key_error).await {
                Ok(value) => {
                    let resolved = self.page[pos].resolved(value);
                    self.page[pos] = resolved;
                    return Ok(());
                }
                Err(ResolveError::Retryable(reason)) => {
                    debug!(
                        "scanner resolve lock: key={}, {}",
                        display_key(&self.page[pos].key),
                        reason
                    );
                    backoff.backoff().await?;
                }
                Err(ResolveError::Fatal(e)) => {
                    return Err(ScanError::ResolveLock(e));
                }
            }
        }
    }

    /// Fetch the next page starting at `next_start_key`, retrying on stale routing.
    async fn fetch(&mut self) -> Result<(), ScanError> {
        debug!(
            "scanner fetch: next_start_key={}, version={}",
            display_key(&self.next_start_key),
            self.version()
        );

        let mut backoff = Backoff::new("rangeMiss", self.config.range_miss_backoff);

        loop {
            let range = self.locator.locate(&self.next_start_key).await?;

            let req = ScanRequest {
                start_key: self.next_start_key.clone(),
                limit: u32::try_from(self.batch_size).unwrap_or(u32::MAX),
                version: self.version(),
            };

            let resp = self.sender.send_scan(req, range.ver_id()).await?;

            if let Some(range_err) = resp.range_error {
                warn!(
                    "scanner fetch failed: range {}: {}",
                    range.ver_id(),
                    range_err
                );
                backoff.backoff().await?;
                continue;
            }

            let body = resp.body.ok_or(ScanError::BodyMissing)?;
            let mut rows = body.rows;

            // A locked row is reported under the key the lock blocks.
            for row in rows.iter_mut() {
                if let Some(key_error) = &row.error {
                    let lock = lock_info(key_error)?;
                    row.key = lock.key.clone();
                }
            }

            self.install_page(rows, &range);
            return Ok(());
        }
    }

    fn install_page(&mut self, rows: Vec<Row>, range: &KeyRange) {
        match rows.last() {
            Some(last) if rows.len() >= self.batch_size => {
                // The range may hold more rows. Continue right after the last
                // returned key. The next page may be empty.
                self.next_start_key = next_key(&last.key);
            }
            _ => {
                // The range is exhausted. Continue at the next range.
                self.next_start_key = range.end_key().to_vec();
                if range.is_last() {
                    self.eof = true;
                }
            }
        }

        debug!(
            "scanner page: {} rows from range {}, next_start_key={}, eof={}",
            rows.len(),
            range.ver_id(),
            display_key(&self.next_start_key),
            self.eof
        );

        self.page = rows;
        self.pos = None;
    }
}

/// Extract the lock a row error describes; other row errors fail the fetch.
fn lock_info(key_error: &KeyError) -> Result<&LockInfo, ScanError> {
    match key_error {
        KeyError::Locked(lock) => Ok(lock),
        KeyError::Retryable(reason) => Err(ScanError::retryable(reason)),
        KeyError::Abort(_) => Err(ScanError::KeyError(key_error.clone())),
    }
}

/// Collect at most `limit` visible `(key, value)` pairs starting at `start_key`.
pub async fn scan<S, L, T>(
    snapshot: S,
    locator: L,
    sender: T,
    start_key: impl Into<Key>,
    limit: usize,
) -> Result<Vec<(Key, Value)>, ScanError>
where
    S: Snapshot,
    L: RangeLocator,
    T: RequestSender,
{
    let mut res = vec![];
    if limit == 0 {
        return Ok(res);
    }

    let mut scanner = Scanner::new(snapshot, locator, sender, start_key, limit).await?;

    while let Some((k, v)) = scanner.current() {
        res.push((k.to_vec(), v.to_vec()));
        if res.len() >= limit {
            break;
        }

        match scanner.advance().await {
            Ok(()) => {}
            Err(e) if e.is_end_of_data() => break,
            Err(e) => return Err(e),
        }
    }

    scanner.close();
    Ok(res)
}
