/// Orchestrator integration tests.
///
/// The queue drivers are exercised with instrumented mock workers instead
/// of browser-backed ones, so scheduling, retry accounting, batch aborts,
/// and the output/error channels are all verified without Chrome.
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use shelf_scout::output::{ErrorSink, ProductSink};
use shelf_scout::scrape::{
    run_batched_queue, run_parallel_queue, BatchWorker, BatchWorkerFactory, ItemWorker,
};
use shelf_scout::{ScrapeError, ScrapedProduct, SourceKind, WorkItem};

// Initialize logging for tests
fn init_logger() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_test_writer()
        .try_init();
}

fn items(source: SourceKind, skus: &[&str]) -> Vec<WorkItem> {
    skus.iter()
        .map(|sku| WorkItem {
            source,
            sku: sku.to_string(),
        })
        .collect()
}

fn product(sku: &str) -> ScrapedProduct {
    ScrapedProduct {
        sku: sku.to_string(),
        title: format!("Product {}", sku),
        price: "$9.99".into(),
        rating: "4.5 out of 5".into(),
        reviews: "100 ratings".into(),
        description: "Test Product".into(),
    }
}

// ── Parallel (per-item) queue ───────────────────────────────────────────────

/// Succeeds for every SKU not in the fail set; counts calls per SKU.
struct FlakyItemWorker {
    fail: HashSet<String>,
    calls: AtomicUsize,
}

#[async_trait]
impl ItemWorker for FlakyItemWorker {
    async fn process(&self, sku: &str) -> Result<Option<ScrapedProduct>, ScrapeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.contains(sku) {
            Err(ScrapeError::TransientFetch("page never loaded".into()))
        } else {
            Ok(Some(product(sku)))
        }
    }
}

#[tokio::test(start_paused = true)]
async fn test_parallel_queue_every_item_lands_exactly_once() {
    init_logger();
    let tmp = tempfile::tempdir().unwrap();
    let products = Arc::new(ProductSink::new(tmp.path().join("out.csv")));
    let errors = Arc::new(ErrorSink::new(tmp.path().join("errors.log")));

    let worker = Arc::new(FlakyItemWorker {
        fail: ["B2", "B4"].iter().map(|s| s.to_string()).collect(),
        calls: AtomicUsize::new(0),
    });
    let work = items(SourceKind::Amazon, &["B1", "B2", "B3", "B4", "B5"]);

    let summary = run_parallel_queue(
        work,
        worker.clone(),
        2,
        2,
        Arc::clone(&products),
        Arc::clone(&errors),
    )
    .await;

    assert_eq!(summary.total, 5);
    assert_eq!(summary.succeeded, 3);
    assert_eq!(summary.failed, 2);
    // 3 first-try successes + 2 failures retried twice each.
    assert_eq!(worker.calls.load(Ordering::SeqCst), 7);

    let csv = std::fs::read_to_string(tmp.path().join("out.csv")).unwrap();
    assert_eq!(csv.lines().count(), 4, "header + one row per success:\n{csv}");
    assert_eq!(csv.matches("SKU,Source,Title").count(), 1);
    for sku in ["B1", "B3", "B5"] {
        assert!(csv.contains(sku), "missing row for {sku}");
    }

    let log = std::fs::read_to_string(tmp.path().join("errors.log")).unwrap();
    assert_eq!(log.lines().count(), 2, "one error line per exhausted item:\n{log}");
    assert!(log.contains("SKU: B2"));
    assert!(log.contains("SKU: B4"));
    assert!(log.contains("Failed after 2 attempts"));
}

#[tokio::test(start_paused = true)]
async fn test_parallel_queue_appends_across_runs_without_new_header() {
    init_logger();
    let tmp = tempfile::tempdir().unwrap();
    let products = Arc::new(ProductSink::new(tmp.path().join("out.csv")));
    let errors = Arc::new(ErrorSink::new(tmp.path().join("errors.log")));

    for skus in [&["A1", "A2"][..], &["A3"][..]] {
        let worker = Arc::new(FlakyItemWorker {
            fail: HashSet::new(),
            calls: AtomicUsize::new(0),
        });
        run_parallel_queue(
            items(SourceKind::Amazon, skus),
            worker,
            2,
            2,
            Arc::clone(&products),
            Arc::clone(&errors),
        )
        .await;
    }

    let csv = std::fs::read_to_string(tmp.path().join("out.csv")).unwrap();
    assert_eq!(csv.matches("SKU,Source,Title").count(), 1, "second run must append");
    assert_eq!(csv.lines().count(), 4); // header + 3 rows across both runs
}

// ── Batched queue ───────────────────────────────────────────────────────────

#[derive(Default)]
struct BatchTrace {
    processed: Vec<(usize, String)>,
    finishes: Vec<(usize, bool)>,
    in_flight: usize,
    max_in_flight: usize,
}

/// Shared recorder: processing order, per-worker overlap, finish flags.
struct RecordingBatchWorker {
    batch_index: usize,
    trace: Arc<Mutex<BatchTrace>>,
    fail_sku: Option<String>,
}

#[async_trait]
impl BatchWorker for RecordingBatchWorker {
    async fn process(&mut self, sku: &str) -> Result<Option<ScrapedProduct>, ScrapeError> {
        {
            let mut trace = self.trace.lock().unwrap();
            trace.in_flight += 1;
            trace.max_in_flight = trace.max_in_flight.max(trace.in_flight);
            trace.processed.push((self.batch_index, sku.to_string()));
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        self.trace.lock().unwrap().in_flight -= 1;

        if self.fail_sku.as_deref() == Some(sku) {
            Err(ScrapeError::ChallengeUnresolved)
        } else {
            Ok(Some(product(sku)))
        }
    }

    async fn finish(&mut self, reset: bool) {
        self.trace
            .lock()
            .unwrap()
            .finishes
            .push((self.batch_index, reset));
    }
}

struct RecordingFactory {
    trace: Arc<Mutex<BatchTrace>>,
    fail_sku: Option<String>,
}

#[async_trait]
impl BatchWorkerFactory for RecordingFactory {
    async fn create(&self, batch_index: usize) -> Box<dyn BatchWorker> {
        Box::new(RecordingBatchWorker {
            batch_index,
            trace: Arc::clone(&self.trace),
            fail_sku: self.fail_sku.clone(),
        })
    }
}

#[tokio::test(start_paused = true)]
async fn test_batched_queue_is_sequential_within_batches() {
    init_logger();
    let tmp = tempfile::tempdir().unwrap();
    let products = Arc::new(ProductSink::new(tmp.path().join("out.csv")));
    let errors = Arc::new(ErrorSink::new(tmp.path().join("errors.log")));

    let trace = Arc::new(Mutex::new(BatchTrace::default()));
    let factory = Arc::new(RecordingFactory {
        trace: Arc::clone(&trace),
        fail_sku: None,
    });
    let work = items(SourceKind::Walmart, &["W1", "W2", "W3", "W4", "W5"]);

    let summary = run_batched_queue(
        work,
        factory,
        2,
        1,
        Arc::clone(&products),
        Arc::clone(&errors),
    )
    .await;

    assert_eq!(summary.total, 5);
    assert_eq!(summary.succeeded, 5);
    assert_eq!(summary.failed, 0);

    let trace = trace.lock().unwrap();
    // Batch concurrency 1: never more than one item in flight anywhere.
    assert_eq!(trace.max_in_flight, 1);
    // chunks(2) over 5 items: [W1,W2] [W3,W4] [W5], each in list order.
    let order: Vec<&str> = trace.processed.iter().map(|(_, s)| s.as_str()).collect();
    assert_eq!(order, ["W1", "W2", "W3", "W4", "W5"]);
    assert_eq!(
        trace.processed.iter().map(|(b, _)| *b).collect::<Vec<_>>(),
        [0, 0, 1, 1, 2]
    );
    // Every batch tore down cleanly, no resets.
    assert_eq!(trace.finishes.len(), 3);
    assert!(trace.finishes.iter().all(|(_, reset)| !reset));
}

#[tokio::test(start_paused = true)]
async fn test_batch_aborts_on_fatal_error_and_logs_remainder() {
    init_logger();
    let tmp = tempfile::tempdir().unwrap();
    let products = Arc::new(ProductSink::new(tmp.path().join("out.csv")));
    let errors = Arc::new(ErrorSink::new(tmp.path().join("errors.log")));

    let trace = Arc::new(Mutex::new(BatchTrace::default()));
    let factory = Arc::new(RecordingFactory {
        trace: Arc::clone(&trace),
        fail_sku: Some("W2".into()),
    });
    let work = items(SourceKind::Walmart, &["W1", "W2", "W3", "W4"]);

    let summary = run_batched_queue(
        work,
        factory,
        4,
        1,
        Arc::clone(&products),
        Arc::clone(&errors),
    )
    .await;

    assert_eq!(summary.total, 4);
    assert_eq!(summary.succeeded, 1);
    assert_eq!(summary.failed, 3);

    let trace = trace.lock().unwrap();
    // W3/W4 never reach the worker once W2 goes fatal.
    let order: Vec<&str> = trace.processed.iter().map(|(_, s)| s.as_str()).collect();
    assert_eq!(order, ["W1", "W2"]);
    // The session behind the aborted batch is flagged for reset.
    assert_eq!(trace.finishes.as_slice(), [(0, true)]);

    let csv = std::fs::read_to_string(tmp.path().join("out.csv")).unwrap();
    assert_eq!(csv.lines().count(), 2); // header + W1
    assert!(csv.contains("W1"));

    // Exactly one error line per non-landed item, no silent drops.
    let log = std::fs::read_to_string(tmp.path().join("errors.log")).unwrap();
    assert_eq!(log.lines().count(), 3, "{log}");
    assert!(log.contains("SKU: W2"));
    assert!(log.contains("SKU: W3 | Source: Walmart | Error: batch aborted"));
    assert!(log.contains("SKU: W4 | Source: Walmart | Error: batch aborted"));
}

#[tokio::test(start_paused = true)]
async fn test_nonfatal_batch_error_continues_with_next_item() {
    init_logger();
    let tmp = tempfile::tempdir().unwrap();
    let products = Arc::new(ProductSink::new(tmp.path().join("out.csv")));
    let errors = Arc::new(ErrorSink::new(tmp.path().join("errors.log")));

    struct OneBadItem {
        trace: Arc<Mutex<BatchTrace>>,
    }
    #[async_trait]
    impl BatchWorker for OneBadItem {
        async fn process(&mut self, sku: &str) -> Result<Option<ScrapedProduct>, ScrapeError> {
            self.trace.lock().unwrap().processed.push((0, sku.into()));
            match sku {
                "W2" => Err(ScrapeError::TransientFetch("timeout".into())),
                "W3" => Ok(None),
                _ => Ok(Some(product(sku))),
            }
        }
        async fn finish(&mut self, reset: bool) {
            self.trace.lock().unwrap().finishes.push((0, reset));
        }
    }
    struct OneBadFactory {
        trace: Arc<Mutex<BatchTrace>>,
    }
    #[async_trait]
    impl BatchWorkerFactory for OneBadFactory {
        async fn create(&self, _batch_index: usize) -> Box<dyn BatchWorker> {
            Box::new(OneBadItem {
                trace: Arc::clone(&self.trace),
            })
        }
    }

    let trace = Arc::new(Mutex::new(BatchTrace::default()));
    let factory = Arc::new(OneBadFactory {
        trace: Arc::clone(&trace),
    });
    let work = items(SourceKind::Walmart, &["W1", "W2", "W3", "W4"]);

    let summary = run_batched_queue(
        work,
        factory,
        4,
        1,
        Arc::clone(&products),
        Arc::clone(&errors),
    )
    .await;

    assert_eq!(summary.succeeded, 2);
    assert_eq!(summary.failed, 2);

    let trace = trace.lock().unwrap();
    // All four items reach the worker; neither failure mode aborts.
    assert_eq!(trace.processed.len(), 4);
    assert_eq!(trace.finishes.as_slice(), [(0, false)]);

    let log = std::fs::read_to_string(tmp.path().join("errors.log")).unwrap();
    assert_eq!(log.lines().count(), 2);
    assert!(log.contains("SKU: W2"));
    assert!(log.contains("SKU: W3 | Source: Walmart | Error: Product not found"));
}
