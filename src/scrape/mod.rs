//! Scrape orchestration: per-source queues, concurrency bounds, batching,
//! retry, and session reset on fatal failure.
//!
//! The work list is split into independent queues by source. Amazon items
//! each get a throwaway browser and run with bounded parallelism under the
//! retry wrapper; Walmart items are grouped into fixed-size batches, each
//! served strictly sequentially by one persistent worker session. A
//! session-fatal failure abandons the remainder of its batch (every
//! skipped item still gets an error record) and flags the profile for
//! reset. Queues never affect each other.
//!
//! The queue drivers are generic over small worker traits so tests can
//! substitute instrumented mocks for the browser-backed workers.

pub mod agents;
pub mod retry;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use tracing::{info, warn};

use crate::core::config::AppConfig;
use crate::core::errors::ScrapeError;
use crate::core::types::{RunSummary, ScrapedProduct, SourceKind, WorkItem};
use crate::output::{ErrorSink, ProductRow, ProductSink};
use crate::session::{warmer, SessionManager};
use crate::stealth::humanize;
use agents::agent_for;

/// Randomized pause between items sharing one session (ms).
const INTER_ITEM_DELAY_MS: (u64, u64) = (2000, 5000);

/// Processes one item on its own ephemeral browser. Stateless and shared
/// across the parallel queue.
#[async_trait]
pub trait ItemWorker: Send + Sync {
    async fn process(&self, sku: &str) -> Result<Option<ScrapedProduct>, ScrapeError>;
}

/// Serves one batch through one (lazily-opened) persistent session.
#[async_trait]
pub trait BatchWorker: Send {
    async fn process(&mut self, sku: &str) -> Result<Option<ScrapedProduct>, ScrapeError>;

    /// Tear down whatever the worker opened. `reset` means the session was
    /// flagged fatal and its profile must not be reused.
    async fn finish(&mut self, reset: bool);
}

#[async_trait]
pub trait BatchWorkerFactory: Send + Sync {
    async fn create(&self, batch_index: usize) -> Box<dyn BatchWorker>;
}

// ── Queue drivers ───────────────────────────────────────────────────────────

/// Drive a per-item queue with bounded parallelism. Every item ends either
/// in the product table or in the error log; an empty extraction counts as
/// a retryable failure.
pub async fn run_parallel_queue(
    items: Vec<WorkItem>,
    worker: Arc<dyn ItemWorker>,
    concurrency: usize,
    max_retries: u32,
    products: Arc<ProductSink>,
    errors: Arc<ErrorSink>,
) -> RunSummary {
    let total = items.len();
    let outcomes: Vec<bool> = stream::iter(items)
        .map(|item| {
            let worker = Arc::clone(&worker);
            let products = Arc::clone(&products);
            let errors = Arc::clone(&errors);
            async move {
                let op_worker = Arc::clone(&worker);
                let op_sku = item.sku.clone();
                let result = retry::retry_with_backoff(
                    move || {
                        let worker = Arc::clone(&op_worker);
                        let sku = op_sku.clone();
                        async move {
                            match worker.process(&sku).await? {
                                Some(product) => Ok(product),
                                None => Err(ScrapeError::TransientFetch(
                                    "empty extraction result".into(),
                                )),
                            }
                        }
                    },
                    max_retries,
                    &item.sku,
                    item.source,
                    errors.as_ref(),
                )
                .await;

                match result {
                    Ok(product) => {
                        let row = ProductRow::from_scraped(item.source, &product);
                        match products.append(&row) {
                            Ok(()) => true,
                            Err(e) => {
                                errors.log(&item.sku, item.source, &format!("output write: {}", e));
                                false
                            }
                        }
                    }
                    // Exhaustion already logged by the retry wrapper.
                    Err(_) => false,
                }
            }
        })
        .buffer_unordered(concurrency.max(1))
        .collect()
        .await;

    let succeeded = outcomes.iter().filter(|ok| **ok).count();
    RunSummary {
        total,
        succeeded,
        failed: total - succeeded,
    }
}

/// Drive a batched queue: fixed-size chunks, bounded batch parallelism,
/// strictly sequential items within each batch.
pub async fn run_batched_queue(
    items: Vec<WorkItem>,
    factory: Arc<dyn BatchWorkerFactory>,
    batch_size: usize,
    concurrency: usize,
    products: Arc<ProductSink>,
    errors: Arc<ErrorSink>,
) -> RunSummary {
    let batches: Vec<Vec<WorkItem>> = items
        .chunks(batch_size.max(1))
        .map(|chunk| chunk.to_vec())
        .collect();

    stream::iter(batches.into_iter().enumerate())
        .map(|(batch_index, batch)| {
            run_batch(
                batch_index,
                batch,
                Arc::clone(&factory),
                Arc::clone(&products),
                Arc::clone(&errors),
            )
        })
        .buffer_unordered(concurrency.max(1))
        .fold(RunSummary::default(), |acc, summary| async move {
            acc.merge(summary)
        })
        .await
}

async fn run_batch(
    batch_index: usize,
    batch: Vec<WorkItem>,
    factory: Arc<dyn BatchWorkerFactory>,
    products: Arc<ProductSink>,
    errors: Arc<ErrorSink>,
) -> RunSummary {
    let mut worker = factory.create(batch_index).await;
    let mut summary = RunSummary {
        total: batch.len(),
        ..Default::default()
    };
    let mut abort_from: Option<usize> = None;

    for (i, item) in batch.iter().enumerate() {
        if i > 0 {
            humanize::random_delay(INTER_ITEM_DELAY_MS.0, INTER_ITEM_DELAY_MS.1).await;
        }

        match worker.process(&item.sku).await {
            Ok(Some(product)) => {
                let row = ProductRow::from_scraped(item.source, &product);
                match products.append(&row) {
                    Ok(()) => summary.succeeded += 1,
                    Err(e) => {
                        errors.log(&item.sku, item.source, &format!("output write: {}", e));
                        summary.failed += 1;
                    }
                }
            }
            Ok(None) => {
                errors.log(&item.sku, item.source, "Product not found");
                summary.failed += 1;
            }
            Err(e) if e.is_session_fatal() => {
                errors.log(&item.sku, item.source, &e.to_string());
                summary.failed += 1;
                abort_from = Some(i + 1);
                break;
            }
            Err(e) => {
                // Non-fatal: log and move to the next item in the batch.
                errors.log(&item.sku, item.source, &e.to_string());
                summary.failed += 1;
            }
        }
    }

    if let Some(from) = abort_from {
        warn!(
            "orchestrator: batch {} aborted, {} items skipped, session flagged for reset",
            batch_index,
            batch.len() - from
        );
        for item in &batch[from..] {
            errors.log(
                &item.sku,
                item.source,
                "batch aborted after session-fatal failure",
            );
            summary.failed += 1;
        }
        worker.finish(true).await;
    } else {
        worker.finish(false).await;
    }

    summary
}

// ── Browser-backed workers ──────────────────────────────────────────────────

/// One throwaway browser per item; a detected challenge on this path is
/// not solvable in place, so the page is reported empty and retried fresh.
pub struct EphemeralItemWorker {
    sessions: Arc<SessionManager>,
    source: SourceKind,
}

#[async_trait]
impl ItemWorker for EphemeralItemWorker {
    async fn process(&self, sku: &str) -> Result<Option<ScrapedProduct>, ScrapeError> {
        let agent = agent_for(self.source);
        let browser = self.sessions.launch_ephemeral().await?;
        info!("orchestrator: processing {} ({})", sku, self.source);

        let result = async {
            agent.navigate(&browser.page, sku).await?;
            if agent.detect_challenge(&browser.page).await? {
                warn!("orchestrator: challenge on ephemeral page for {}", sku);
                return Ok(None);
            }
            agent.extract_product(&browser.page, sku).await
        }
        .await;

        browser.close().await;
        result
    }
}

/// Lazily opens a persistent session on the batch's first item, warms the
/// profile, then serves every item through the same page.
pub struct SessionBatchWorker {
    sessions: Arc<SessionManager>,
    source: SourceKind,
    worker_index: usize,
    session: Option<crate::session::WorkerSession>,
}

impl SessionBatchWorker {
    async fn ensure_session(&mut self) -> Result<(), ScrapeError> {
        if self.session.is_some() {
            return Ok(());
        }
        let session = self.sessions.launch(self.worker_index).await?;
        warmer::warm(&session, true).await;
        self.sessions.verify_egress_ip(&session).await;
        self.session = Some(session);
        Ok(())
    }
}

#[async_trait]
impl BatchWorker for SessionBatchWorker {
    async fn process(&mut self, sku: &str) -> Result<Option<ScrapedProduct>, ScrapeError> {
        let agent = agent_for(self.source);
        self.ensure_session().await?;
        let Some(session) = self.session.as_ref() else {
            return Err(ScrapeError::SessionCrashed("session not established".into()));
        };
        info!(
            "orchestrator: processing {} ({}) on worker {}",
            sku, self.source, self.worker_index
        );

        agent.navigate(&session.page, sku).await?;

        if agent.detect_challenge(&session.page).await? {
            info!("orchestrator: challenge detected for {}, attempting solve", sku);
            if !agent.solve_challenge(&session.page).await {
                return Err(ScrapeError::ChallengeUnresolved);
            }
        }

        agent.extract_product(&session.page, sku).await
    }

    async fn finish(&mut self, reset: bool) {
        if let Some(session) = self.session.take() {
            self.sessions.destroy(session, reset).await;
        }
    }
}

pub struct SessionBatchFactory {
    sessions: Arc<SessionManager>,
    source: SourceKind,
}

#[async_trait]
impl BatchWorkerFactory for SessionBatchFactory {
    async fn create(&self, batch_index: usize) -> Box<dyn BatchWorker> {
        Box::new(SessionBatchWorker {
            sessions: Arc::clone(&self.sessions),
            source: self.source,
            worker_index: batch_index,
            session: None,
        })
    }
}

// ── Top-level orchestrator ──────────────────────────────────────────────────

pub struct Orchestrator {
    config: AppConfig,
    sessions: Arc<SessionManager>,
    products: Arc<ProductSink>,
    errors: Arc<ErrorSink>,
}

impl Orchestrator {
    pub fn new(config: AppConfig) -> Self {
        let sessions = Arc::new(SessionManager::new(
            config.profiles_root.clone(),
            config.headless,
            config.proxy.clone(),
        ));
        let products = Arc::new(ProductSink::new(config.output_csv.clone()));
        let errors = Arc::new(ErrorSink::new(config.error_log.clone()));
        Self {
            config,
            sessions,
            products,
            errors,
        }
    }

    /// Run the full work list to completion. Both source queues run
    /// concurrently and independently; a failure in one never stalls the
    /// other.
    pub async fn run(&self, items: Vec<WorkItem>) -> RunSummary {
        let (amazon, walmart): (Vec<_>, Vec<_>) = items
            .into_iter()
            .partition(|item| item.source == SourceKind::Amazon);

        info!(
            "orchestrator: {} Amazon items (concurrency {}), {} Walmart items (batches of {}, concurrency {})",
            amazon.len(),
            self.config.amazon_concurrency,
            walmart.len(),
            self.config.batch_size,
            self.config.walmart_concurrency
        );

        let amazon_worker = Arc::new(EphemeralItemWorker {
            sessions: Arc::clone(&self.sessions),
            source: SourceKind::Amazon,
        });
        let walmart_factory = Arc::new(SessionBatchFactory {
            sessions: Arc::clone(&self.sessions),
            source: SourceKind::Walmart,
        });

        let (amazon_summary, walmart_summary) = tokio::join!(
            run_parallel_queue(
                amazon,
                amazon_worker,
                self.config.amazon_concurrency,
                self.config.max_retries,
                Arc::clone(&self.products),
                Arc::clone(&self.errors),
            ),
            run_batched_queue(
                walmart,
                walmart_factory,
                self.config.batch_size,
                self.config.walmart_concurrency,
                Arc::clone(&self.products),
                Arc::clone(&self.errors),
            )
        );

        amazon_summary.merge(walmart_summary)
    }
}
