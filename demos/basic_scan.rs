use std::sync::Arc;

use futures_util::StreamExt;
use range_scan::impls::mem_cluster::MemCluster;
use range_scan::ScanConfig;
use range_scan::ScanError;
use range_scan::Scanner;

#[tokio::main]
async fn main() -> Result<(), ScanError> {
    // Create an in-memory cluster with a single range
    let cluster = Arc::new(MemCluster::new());

    // Write some keys
    for i in 0..10 {
        cluster
            .put(format!("key{}", i), format!("value{}", i))
            .await;
    }

    // Delete one of them
    cluster.delete("key3").await;

    // An in-flight write that will commit
    let lock = cluster.lock("key5", Some(b"value5-new".to_vec()), 1).await;
    cluster.commit(&lock).await;

    // Split the key space into three ranges
    cluster.split("key4").await;
    cluster.split("key8").await;

    // Read at the latest timestamp
    let snapshot = cluster.snapshot().await;

    // Iterate with the cursor API
    let config = ScanConfig::default().with_batch_size(3);
    let mut scanner = Scanner::with_config(&snapshot, &*cluster, &*cluster, "key", config).await?;

    while let Some((key, value)) = scanner.current() {
        println!(
            "Key: {}, Value: {}",
            String::from_utf8_lossy(key),
            String::from_utf8_lossy(value)
        );

        match scanner.advance().await {
            Ok(()) => {}
            Err(e) if e.is_end_of_data() => break,
            Err(e) => return Err(e),
        }
    }

    // Or consume a scanner as a stream
    let scanner = Scanner::new(
        snapshot.clone(),
        cluster.clone(),
        cluster.clone(),
        "key6",
        2,
    )
    .await?;

    let mut strm = scanner.into_stream();
    while let Some(result) = strm.next().await {
        let (key, value) = result?;
        println!(
            "Streamed key: {}, Value: {}",
            String::from_utf8_lossy(&key),
            String::from_utf8_lossy(&value)
        );
    }

    println!("Scan requests sent: {}", cluster.scan_requests().await);

    Ok(())
}
