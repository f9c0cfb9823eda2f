mod common;

use common::{FailingExporter, HangingExporter, InMemoryExporter, SlowExporter};
use std::sync::Arc;
use std::time::Duration;
use telemetry_pipeline::{BatchConfig, BatchQueue, EnqueueError, ExportError, ShutdownError};

fn config(queue: usize, batch: usize, delay: Duration) -> BatchConfig {
    BatchConfig::default()
        .with_max_queue_size(queue)
        .with_max_export_batch_size(batch)
        .with_scheduled_delay(delay)
}

#[tokio::test]
async fn test_overflow_drops_newest() {
    let exporter = InMemoryExporter::<u32>::new();
    let queue = BatchQueue::new(
        "spans",
        config(4, 512, Duration::from_secs(3600)),
        Arc::new(exporter.clone()),
    );

    let results: Vec<_> = (0..10).map(|i| queue.enqueue(i)).collect();
    assert!(results[..4].iter().all(Result::is_ok));
    assert!(results[4..].iter().all(|r| *r == Err(EnqueueError::Full)));

    queue.shutdown(Duration::from_secs(1)).await.unwrap();
    assert_eq!(exporter.items(), vec![0, 1, 2, 3]);

    let snapshot = queue.metrics().snapshot();
    assert_eq!(snapshot.enqueued, 4);
    assert_eq!(snapshot.dropped, 6);
}

#[tokio::test(start_paused = true)]
async fn test_linger_flushes_partial_batch() {
    let exporter = InMemoryExporter::<u32>::new();
    let queue = BatchQueue::new(
        "logs",
        config(100, 50, Duration::from_millis(100)),
        Arc::new(exporter.clone()),
    );

    for i in 0..3 {
        queue.enqueue(i).unwrap();
    }

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(exporter.exported_count(), 0);

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(exporter.items(), vec![0, 1, 2]);
    assert!(queue.is_empty());

    queue.shutdown(Duration::from_secs(1)).await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_full_batch_flushes_before_linger() {
    let exporter = InMemoryExporter::<u32>::new();
    let queue = BatchQueue::new(
        "spans",
        config(100, 5, Duration::from_secs(3600)),
        Arc::new(exporter.clone()),
    );

    for i in 0..12 {
        queue.enqueue(i).unwrap();
    }
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert_eq!(exporter.batch_sizes(), vec![5, 5, 2]);
    queue.shutdown(Duration::from_secs(1)).await.unwrap();
}

#[tokio::test]
async fn test_shutdown_respects_deadline_with_hanging_exporter() {
    let queue = BatchQueue::new(
        "spans",
        config(100, 10, Duration::from_secs(3600)),
        Arc::new(HangingExporter),
    );
    for i in 0..3u32 {
        queue.enqueue(i).unwrap();
    }

    let started = std::time::Instant::now();
    let result = queue.shutdown(Duration::from_millis(100)).await;

    assert!(matches!(result, Err(ShutdownError::Timeout(_))));
    assert!(started.elapsed() < Duration::from_secs(2));

    // the queue is closed either way
    assert_eq!(queue.enqueue(4), Err(EnqueueError::Closed));
}

#[tokio::test]
async fn test_producers_never_wait_on_a_slow_exporter() {
    let exporter = SlowExporter {
        delay: Duration::from_millis(200),
        inner: InMemoryExporter::<u32>::new(),
    };
    let recorded = exporter.inner.clone();
    let queue = BatchQueue::new(
        "spans",
        config(8, 4, Duration::from_millis(10)),
        Arc::new(exporter),
    );

    let started = std::time::Instant::now();
    for i in 0..1_000 {
        let _ = queue.enqueue(i);
        if i % 100 == 0 {
            tokio::task::yield_now().await;
        }
    }
    assert!(started.elapsed() < Duration::from_millis(200));

    let snapshot = queue.metrics().snapshot();
    assert_eq!(snapshot.enqueued + snapshot.dropped, 1_000);
    assert!(snapshot.dropped > 0);

    queue.shutdown(Duration::from_secs(5)).await.unwrap();
    assert!(recorded.batch_sizes().iter().all(|&n| n <= 4));
    assert_eq!(recorded.exported_count() as u64, snapshot.enqueued);
}

#[tokio::test(start_paused = true)]
async fn test_export_timeout_is_counted() {
    let queue = BatchQueue::new(
        "spans",
        config(100, 10, Duration::from_secs(3600)).with_export_timeout(Duration::from_millis(50)),
        Arc::new(HangingExporter),
    );
    queue.enqueue(1u32).unwrap();

    queue.force_flush().await.unwrap();

    let snapshot = queue.metrics().snapshot();
    assert_eq!(snapshot.export_errors, 1);
    assert_eq!(snapshot.items_exported, 0);
    queue.shutdown(Duration::from_secs(1)).await.unwrap();
}

#[tokio::test]
async fn test_failed_export_does_not_stop_the_queue() {
    let queue = BatchQueue::new(
        "logs",
        config(100, 10, Duration::from_secs(3600)),
        Arc::new(FailingExporter(ExportError::Status { code: 500 })),
    );

    queue.enqueue(1u32).unwrap();
    queue.force_flush().await.unwrap();
    queue.enqueue(2u32).unwrap();
    queue.force_flush().await.unwrap();

    assert_eq!(queue.metrics().export_errors(), 2);
    queue.shutdown(Duration::from_secs(1)).await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_producers() {
    let exporter = InMemoryExporter::<(usize, usize)>::new();
    let queue = Arc::new(BatchQueue::new(
        "spans",
        config(100_000, 256, Duration::from_millis(20)),
        Arc::new(exporter.clone()),
    ));

    let mut handles = Vec::new();
    for producer in 0..8 {
        let queue = Arc::clone(&queue);
        handles.push(tokio::spawn(async move {
            for seq in 0..500 {
                queue.enqueue((producer, seq)).unwrap();
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    queue.shutdown(Duration::from_secs(5)).await.unwrap();

    let items = exporter.items();
    assert_eq!(items.len(), 4_000);
    // per-producer order survives batching
    for producer in 0..8 {
        let seqs: Vec<_> = items
            .iter()
            .filter(|(p, _)| *p == producer)
            .map(|(_, s)| *s)
            .collect();
        assert_eq!(seqs, (0..500).collect::<Vec<_>>());
    }
}
