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

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::collections::VecDeque;
    use std::io;
    use std::sync::Arc;
    use std::sync::Mutex;

    use futures_util::TryStreamExt;
    use pretty_assertions::assert_eq;

    use crate::backoff::BackoffConfig;
    use crate::config::ScanConfig;
    use crate::errors::ResolveError;
    use crate::errors::ScanError;
    use crate::impls::mem_cluster::MemCluster;
    use crate::key::display_key;
    use crate::key::Value;
    use crate::range_locator::RangeLocator;
    use crate::request_sender::RequestSender;
    use crate::scanner::scan;
    use crate::scanner::Scanner;
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
    use crate::DEFAULT_BATCH_SIZE;

    const TS: Timestamp = 10;

    fn range(id: u64, start: &str, end: &str) -> KeyRange {
        let ver_id = RangeVerId {
            id,
            conf_ver: 1,
            version: 1,
        };
        KeyRange::new(ver_id, start.as_bytes(), end.as_bytes())
    }

    fn lock(key: &str) -> LockInfo {
        LockInfo {
            primary_lock: b"primary".to_vec(),
            lock_version: 5,
            key: key.as_bytes().to_vec(),
            lock_ttl: 100,
        }
    }

    fn config(batch_size: usize) -> ScanConfig {
        ScanConfig::default()
            .with_batch_size(batch_size)
            .with_lock_backoff(BackoffConfig::immediate(2))
            .with_range_miss_backoff(BackoffConfig::immediate(2))
    }

    /// Ranges with their rows. Answers scans from them unless a scripted response is queued.
    #[derive(Default)]
    struct MockStore {
        ranges: Vec<(KeyRange, Vec<Row>)>,
        scripted: Mutex<VecDeque<Result<ScanResponse, io::Error>>>,
        locate_error: bool,
        calls: Arc<Mutex<Vec<String>>>,
    }

    impl MockStore {
        fn new(ranges: Vec<(KeyRange, Vec<Row>)>) -> Self {
            Self {
                ranges,
                ..Default::default()
            }
        }

        fn script(&self, resp: Result<ScanResponse, io::Error>) {
            self.scripted.lock().unwrap().push_back(resp);
        }

        fn record_call(&self, call: String) {
            self.calls.lock().unwrap().push(call);
        }

        fn get_calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        fn scan_calls(&self) -> usize {
            self.get_calls()
                .iter()
                .filter(|c| c.starts_with("scan"))
                .count()
        }
    }

    fn row_key(row: &Row) -> &[u8] {
        match row.error.as_ref().and_then(|e| e.lock_info()) {
            Some(lock) => &lock.key,
            None => &row.key,
        }
    }

    #[async_trait::async_trait]
    impl RangeLocator for MockStore {
        async fn locate(&self, key: &[u8]) -> Result<KeyRange, io::Error> {
            self.record_call(format!("locate({})", display_key(key)));
            if self.locate_error {
                return Err(io::Error::new(io::ErrorKind::Other, "pd unavailable"));
            }
            self.ranges
                .iter()
                .map(|(r, _)| r)
                .find(|r| r.contains(key))
                .cloned()
                .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no range"))
        }
    }

    #[async_trait::async_trait]
    impl RequestSender for MockStore {
        async fn send_scan(
            &self,
            req: ScanRequest,
            range: RangeVerId,
        ) -> Result<ScanResponse, io::Error> {
            self.record_call(format!(
                "scan({},{},{})@{}",
                display_key(&req.start_key),
                req.limit,
                req.version,
                range.id
            ));

            if let Some(resp) = self.scripted.lock().unwrap().pop_front() {
                return resp;
            }

            let (r, rows) = self
                .ranges
                .iter()
                .find(|(r, _)| r.ver_id == range)
                .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no range"))?;

            let rows = rows
                .iter()
                .filter(|row| row_key(row) >= req.start_key.as_slice() && r.contains(row_key(row)))
                .take(req.limit as usize)
                .cloned()
                .collect();
            Ok(ScanResponse::rows(rows))
        }
    }

    /// Resolves row errors with queued outcomes.
    #[derive(Default)]
    struct MockSnapshot {
        outcomes: Mutex<VecDeque<Result<Value, ResolveError>>>,
        calls: Arc<Mutex<Vec<String>>>,
    }

    impl MockSnapshot {
        fn with_outcomes(outcomes: Vec<Result<Value, ResolveError>>) -> Self {
            Self {
                outcomes: Mutex::new(outcomes.into()),
                ..Default::default()
            }
        }

        fn get_calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait::async_trait]
    impl Snapshot for MockSnapshot {
        fn version(&self) -> Timestamp {
            TS
        }

        async fn resolve_key_error(&self, error: &KeyError) -> Result<Value, ResolveError> {
            let key = error.lock_info().map(|l| display_key(&l.key)).unwrap_or_default();
            self.calls.lock().unwrap().push(format!("resolve({})", key));

            self.outcomes.lock().unwrap().pop_front().unwrap_or_else(|| {
                Err(ResolveError::Fatal(io::Error::new(
                    io::ErrorKind::Other,
                    "unexpected resolve",
                )))
            })
        }
    }

    fn retryable() -> Result<Value, ResolveError> {
        Err(ResolveError::Retryable("txn is running".to_string()))
    }

    fn kvs(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    /// Drain the scanner from its current position until the end of data.
    async fn drain<S, L, T>(scanner: &mut Scanner<S, L, T>) -> Result<Vec<(String, String)>, ScanError>
    where
        S: Snapshot,
        L: RangeLocator,
        T: RequestSender,
    {
        let mut got = vec![];
        while let Some((k, v)) = scanner.current() {
            got.push((
                String::from_utf8_lossy(k).to_string(),
                String::from_utf8_lossy(v).to_string(),
            ));

            match scanner.advance().await {
                Ok(()) => {}
                Err(e) if e.is_end_of_data() => break,
                Err(e) => return Err(e),
            }
        }
        Ok(got)
    }

    #[tokio::test]
    async fn test_cross_range_boundary_with_full_first_page() -> anyhow::Result<()> {
        let store = MockStore::new(vec![
            (range(1, "", "d"), vec![
                Row::new("a", "va"),
                Row::new("b", "vb"),
                Row::new("c", "vc"),
            ]),
            (range(2, "d", ""), vec![Row::new("d", "vd"), Row::new("e", "ve")]),
        ]);
        let snap = MockSnapshot::default();

        let mut scanner = Scanner::with_config(&snap, &store, &store, "", config(3)).await?;
        assert_eq!(scanner.next_start_key(), b"c\x00");

        let got = drain(&mut scanner).await?;
        assert_eq!(
            got,
            kvs(&[("a", "va"), ("b", "vb"), ("c", "vc"), ("d", "vd"), ("e", "ve")])
        );
        assert!(!scanner.is_valid());

        assert_eq!(store.get_calls(), vec![
            "locate()",
            "scan(,3,10)@1",
            "locate(c\\x00)",
            "scan(c\\x00,3,10)@1",
            "locate(d)",
            "scan(d,3,10)@2",
        ]);
        assert!(snap.get_calls().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_cross_range_boundary_at_successor_key() -> anyhow::Result<()> {
        let store = MockStore::new(vec![
            (range(1, "", "c\x00"), vec![
                Row::new("a", "va"),
                Row::new("b", "vb"),
                Row::new("c", "vc"),
            ]),
            (range(2, "c\x00", ""), vec![Row::new("d", "vd"), Row::new("e", "ve")]),
        ]);
        let snap = MockSnapshot::default();

        let mut scanner = Scanner::with_config(&snap, &store, &store, "", config(3)).await?;
        let got = drain(&mut scanner).await?;

        let keys = got.into_iter().map(|(k, _)| k).collect::<Vec<_>>();
        assert_eq!(keys, vec!["a", "b", "c", "d", "e"]);

        assert_eq!(store.get_calls(), vec![
            "locate()",
            "scan(,3,10)@1",
            "locate(c\\x00)",
            "scan(c\\x00,3,10)@2",
        ]);
        Ok(())
    }

    #[tokio::test]
    async fn test_end_of_data_then_iterator_invalid() -> anyhow::Result<()> {
        let store = MockStore::new(vec![(range(1, "", ""), vec![Row::new("a", "1")])]);
        let snap = MockSnapshot::default();

        let mut scanner = Scanner::with_config(&snap, &store, &store, "", config(3)).await?;
        assert_eq!(scanner.current(), Some((&b"a"[..], &b"1"[..])));

        let err = scanner.advance().await.unwrap_err();
        assert!(err.is_end_of_data());
        assert!(!scanner.is_valid());
        assert_eq!(scanner.key(), None);
        assert_eq!(scanner.value(), None);

        let err = scanner.advance().await.unwrap_err();
        assert!(matches!(err, ScanError::IteratorInvalid));
        Ok(())
    }

    #[tokio::test]
    async fn test_page_size_coercion() -> anyhow::Result<()> {
        for batch_size in [0, 1] {
            let store = MockStore::new(vec![(range(1, "", ""), vec![Row::new("a", "1")])]);
            let snap = MockSnapshot::default();

            let scanner = Scanner::new(&snap, &store, &store, "", batch_size).await?;
            assert_eq!(scanner.batch_size(), DEFAULT_BATCH_SIZE);
            assert_eq!(scanner.key(), Some(&b"a"[..]));

            assert_eq!(store.get_calls(), vec![
                "locate()".to_string(),
                format!("scan(,{},10)@1", DEFAULT_BATCH_SIZE),
            ]);
        }
        Ok(())
    }

    #[tokio::test]
    async fn test_empty_scan_is_not_an_error() -> anyhow::Result<()> {
        let store = MockStore::new(vec![
            (range(1, "", "m"), vec![Row::new("a", "1")]),
            (range(2, "m", ""), vec![]),
        ]);
        let snap = MockSnapshot::default();

        let scanner = Scanner::with_config(&snap, &store, &store, "b", config(3)).await?;
        assert!(!scanner.is_valid());
        assert_eq!(scanner.current(), None);
        assert_eq!(store.scan_calls(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_partial_page_with_tombstone() -> anyhow::Result<()> {
        let store = MockStore::new(vec![
            (range(1, "", "m"), vec![Row::new("k1", "v1"), Row::new("k2", "")]),
            (range(2, "m", ""), vec![Row::new("n", "vn")]),
        ]);
        let snap = MockSnapshot::default();

        let mut scanner = Scanner::with_config(&snap, &store, &store, "", config(3)).await?;
        assert_eq!(scanner.key(), Some(&b"k1"[..]));
        assert_eq!(store.scan_calls(), 1);

        // k2 has no value: skipped, and the next range is fetched.
        scanner.advance().await?;
        assert_eq!(scanner.current(), Some((&b"n"[..], &b"vn"[..])));
        assert_eq!(store.scan_calls(), 2);

        assert!(scanner.advance().await.unwrap_err().is_end_of_data());
        Ok(())
    }

    #[tokio::test]
    async fn test_close_is_terminal_and_idempotent() -> anyhow::Result<()> {
        let store = MockStore::new(vec![(range(1, "", ""), vec![
            Row::new("a", "1"),
            Row::new("b", "2"),
        ])]);
        let snap = MockSnapshot::default();

        let mut scanner = Scanner::with_config(&snap, &store, &store, "", config(3)).await?;
        assert!(scanner.is_valid());

        scanner.close();
        assert!(!scanner.is_valid());
        assert_eq!(scanner.key(), None);

        let err = scanner.advance().await.unwrap_err();
        assert!(matches!(err, ScanError::IteratorInvalid));

        scanner.close();
        assert!(!scanner.is_valid());
        Ok(())
    }

    #[tokio::test]
    async fn test_lock_is_resolved_before_exposed() -> anyhow::Result<()> {
        let store = MockStore::new(vec![(range(1, "", ""), vec![
            Row::new("a", "va"),
            Row::locked(lock("b")),
            Row::new("c", "vc"),
        ])]);
        let snap = MockSnapshot::with_outcomes(vec![retryable(), Ok(b"vb".to_vec())]);

        let mut scanner = Scanner::with_config(&snap, &store, &store, "", config(10)).await?;
        let got = drain(&mut scanner).await?;

        assert_eq!(got, kvs(&[("a", "va"), ("b", "vb"), ("c", "vc")]));
        assert_eq!(snap.get_calls(), vec!["resolve(b)", "resolve(b)"]);
        Ok(())
    }

    #[tokio::test]
    async fn test_lock_resolved_to_no_value_is_skipped() -> anyhow::Result<()> {
        let store = MockStore::new(vec![(range(1, "", ""), vec![
            Row::locked(lock("a")),
            Row::new("b", "vb"),
        ])]);
        let snap = MockSnapshot::with_outcomes(vec![Ok(vec![])]);

        let mut scanner = Scanner::with_config(&snap, &store, &store, "", config(10)).await?;
        assert_eq!(scanner.key(), Some(&b"b"[..]));

        let got = drain(&mut scanner).await?;
        assert_eq!(got, kvs(&[("b", "vb")]));
        Ok(())
    }

    #[tokio::test]
    async fn test_lock_retry_exhausted() -> anyhow::Result<()> {
        let store = MockStore::new(vec![(range(1, "", ""), vec![
            Row::new("a", "va"),
            Row::locked(lock("b")),
        ])]);
        let snap = MockSnapshot::with_outcomes(vec![retryable(), retryable(), retryable()]);

        let mut scanner = Scanner::with_config(&snap, &store, &store, "", config(10)).await?;
        assert_eq!(scanner.key(), Some(&b"a"[..]));

        let err = scanner.advance().await.unwrap_err();
        assert!(err.is_retryable(), "got: {}", err);
        assert!(!scanner.is_valid());

        // One attempt plus one per retry.
        assert_eq!(snap.get_calls().len(), 3);
        Ok(())
    }

    #[tokio::test]
    async fn test_lock_fatal_resolve_error() -> anyhow::Result<()> {
        let store = MockStore::new(vec![(range(1, "", ""), vec![Row::locked(lock("a"))])]);
        let snap = MockSnapshot::with_outcomes(vec![Err(ResolveError::Fatal(io::Error::new(
            io::ErrorKind::Other,
            "txn status unknown",
        )))]);

        let res = Scanner::with_config(&snap, &store, &store, "", config(10)).await;
        let err = res.err().unwrap();
        assert!(matches!(err, ScanError::ResolveLock(_)));
        assert_eq!(snap.get_calls(), vec!["resolve(a)"]);
        Ok(())
    }

    #[tokio::test]
    async fn test_range_error_is_retried() -> anyhow::Result<()> {
        let store = MockStore::new(vec![(range(1, "", ""), vec![Row::new("a", "1")])]);
        store.script(Ok(ScanResponse::range_error(RangeError::StaleCommand)));
        let snap = MockSnapshot::default();

        let mut scanner = Scanner::with_config(&snap, &store, &store, "", config(3)).await?;
        assert_eq!(store.get_calls(), vec![
            "locate()",
            "scan(,3,10)@1",
            "locate()",
            "scan(,3,10)@1",
        ]);

        assert_eq!(drain(&mut scanner).await?, kvs(&[("a", "1")]));
        Ok(())
    }

    #[tokio::test]
    async fn test_range_error_retry_exhausted() {
        let store = MockStore::new(vec![(range(1, "", ""), vec![Row::new("a", "1")])]);
        for _ in 0..3 {
            store.script(Ok(ScanResponse::range_error(RangeError::NotLeader {
                range_id: 1,
            })));
        }
        let snap = MockSnapshot::default();

        let res = Scanner::with_config(&snap, &store, &store, "", config(3)).await;
        let err = res.err().unwrap();
        assert!(err.is_retryable(), "got: {}", err);
        assert_eq!(store.scan_calls(), 3);
    }

    #[tokio::test]
    async fn test_missing_body_is_not_retried() {
        let store = MockStore::new(vec![(range(1, "", ""), vec![Row::new("a", "1")])]);
        store.script(Ok(ScanResponse::default()));
        let snap = MockSnapshot::default();

        let res = Scanner::with_config(&snap, &store, &store, "", config(3)).await;
        assert!(matches!(res.err().unwrap(), ScanError::BodyMissing));
        assert_eq!(store.scan_calls(), 1);
    }

    #[tokio::test]
    async fn test_transport_and_locate_errors_are_fatal() {
        let store = MockStore::new(vec![(range(1, "", ""), vec![Row::new("a", "1")])]);
        store.script(Err(io::Error::new(io::ErrorKind::ConnectionReset, "reset")));
        let snap = MockSnapshot::default();

        let res = Scanner::with_config(&snap, &store, &store, "", config(3)).await;
        let err = res.err().unwrap();
        assert!(matches!(err, ScanError::Io(_)));
        assert_eq!(store.scan_calls(), 1);

        let store = MockStore {
            locate_error: true,
            ..MockStore::new(vec![])
        };
        let res = Scanner::with_config(&snap, &store, &store, "", config(3)).await;
        assert!(matches!(res.err().unwrap(), ScanError::Io(_)));
        assert_eq!(store.get_calls(), vec!["locate()"]);
    }

    #[tokio::test]
    async fn test_non_lock_row_errors() {
        let snap = MockSnapshot::default();

        let store = MockStore::new(vec![(range(1, "", ""), vec![Row::with_error(
            "a",
            KeyError::Retryable("write conflict".to_string()),
        )])]);
        let res = Scanner::with_config(&snap, &store, &store, "", config(3)).await;
        assert!(res.err().unwrap().is_retryable());

        let store = MockStore::new(vec![(range(1, "", ""), vec![Row::with_error(
            "a",
            KeyError::Abort("aborted".to_string()),
        )])]);
        let res = Scanner::with_config(&snap, &store, &store, "", config(3)).await;
        assert!(matches!(res.err().unwrap(), ScanError::KeyError(KeyError::Abort(_))));

        assert!(snap.get_calls().is_empty());
    }

    #[tokio::test]
    async fn test_into_stream() -> anyhow::Result<()> {
        let store = Arc::new(MockStore::new(vec![
            (range(1, "", "c"), vec![Row::new("a", "1"), Row::new("b", "")]),
            (range(2, "c", ""), vec![Row::new("c", "3"), Row::new("d", "4")]),
        ]));
        let snap = Arc::new(MockSnapshot::default());

        let scanner =
            Scanner::with_config(snap.clone(), store.clone(), store.clone(), "", config(2)).await?;
        let got = scanner.into_stream().try_collect::<Vec<_>>().await?;

        assert_eq!(got, vec![
            (b"a".to_vec(), b"1".to_vec()),
            (b"c".to_vec(), b"3".to_vec()),
            (b"d".to_vec(), b"4".to_vec()),
        ]);
        Ok(())
    }

    #[tokio::test]
    async fn test_into_stream_ends_after_error() -> anyhow::Result<()> {
        let store = Arc::new(MockStore::new(vec![(range(1, "", ""), vec![
            Row::new("a", "1"),
            Row::locked(lock("b")),
        ])]));
        let snap = Arc::new(MockSnapshot::default());

        let scanner = Scanner::with_config(snap, store.clone(), store, "", config(3)).await?;
        let got = futures_util::StreamExt::collect::<Vec<_>>(scanner.into_stream()).await;

        assert_eq!(got.len(), 2);
        assert_eq!(got[0].as_ref().unwrap(), &(b"a".to_vec(), b"1".to_vec()));
        assert!(matches!(got[1], Err(ScanError::ResolveLock(_))));
        Ok(())
    }

    #[tokio::test]
    async fn test_scan_with_limit() -> anyhow::Result<()> {
        let store = MockStore::new(vec![(range(1, "", ""), vec![
            Row::new("a", "1"),
            Row::new("b", "2"),
            Row::new("c", "3"),
        ])]);
        let snap = MockSnapshot::default();

        let got = scan(&snap, &store, &store, "b", 5).await?;
        assert_eq!(got, vec![
            (b"b".to_vec(), b"2".to_vec()),
            (b"c".to_vec(), b"3".to_vec()),
        ]);

        let got = scan(&snap, &store, &store, "", 2).await?;
        assert_eq!(got.len(), 2);

        assert!(scan(&snap, &store, &store, "", 0).await?.is_empty());
        Ok(())
    }

    /// Scan a cluster that splits and carries locks, and compare with the expected view.
    #[tokio::test]
    async fn test_scan_mem_cluster() -> anyhow::Result<()> {
        let cluster = Arc::new(MemCluster::new());

        let mut expected = BTreeMap::new();
        for i in 0..40u32 {
            let k = format!("k{:03}", i);
            let v = format!("v{}", i);
            cluster.put(k.clone(), v.clone()).await;
            expected.insert(k, v);
        }

        // Deleted before the snapshot.
        for i in [3u32, 17, 18] {
            let k = format!("k{:03}", i);
            cluster.delete(k.clone()).await;
            expected.remove(&k);
        }

        // A pending overwrite that commits before the snapshot,
        // and a pending insert that rolls back.
        let l5 = cluster.lock("k005", Some(b"v5-new".to_vec()), 2).await;
        cluster.commit(&l5).await;
        expected.insert("k005".to_string(), "v5-new".to_string());

        let l20 = cluster.lock("k020x", Some(b"never".to_vec()), 1).await;
        cluster.rollback(&l20).await;

        // Written after the snapshot: invisible.
        let snapshot = cluster.snapshot().await;
        cluster.put("k010", "too-new").await;
        cluster.put("k010x", "too-new").await;

        // Route once, then split so that cached routing goes stale mid-scan.
        cluster.locate(b"").await?;
        cluster.split("k012").await;
        cluster.split("k030").await;

        let cfg = ScanConfig::default()
            .with_batch_size(4)
            .with_lock_backoff(BackoffConfig::immediate(5))
            .with_range_miss_backoff(BackoffConfig::immediate(5));

        let mut scanner =
            Scanner::with_config(&snapshot, &*cluster, &*cluster, "k001", cfg).await?;
        let got = drain(&mut scanner).await?;

        let want = expected
            .into_iter()
            .filter(|(k, _)| k.as_str() >= "k001")
            .collect::<Vec<_>>();
        assert_eq!(got, want);

        // Strictly increasing, no duplicates.
        assert!(got.windows(2).all(|w| w[0].0 < w[1].0));
        Ok(())
    }
}
