//! Periodic refresh of every cache slot
//!
//! A cycle captures and converts all configured pages concurrently, one task
//! per page, and ends when the last task has finished. Cycles never overlap:
//! the next one starts a full refresh interval after the previous one ended.

use crate::{
    CacheError, CaptureError, CaptureRequest, Config, ImageCache, Metrics, Page, PageCapture,
    RasterTransform, TransformError, TransformTarget,
};
use futures::future::join_all;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// What happened to one slot during a cycle.
#[derive(Debug)]
pub enum SlotOutcome {
    Updated { bytes: usize },
    CaptureFailed(CaptureError),
    TransformFailed(TransformError),
    CacheFailed(CacheError),
    /// The slot task panicked or was cancelled
    Aborted(String),
}

impl SlotOutcome {
    pub fn is_updated(&self) -> bool {
        matches!(self, SlotOutcome::Updated { .. })
    }
}

/// Summary of a finished cycle, indexed by slot.
#[derive(Debug)]
pub struct CycleReport {
    pub cycle: u64,
    pub outcomes: Vec<SlotOutcome>,
    pub duration: Duration,
}

impl CycleReport {
    pub fn updated(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_updated()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.updated()
    }
}

/// Keeps the [`ImageCache`] fresh.
#[derive(Clone)]
pub struct RefreshScheduler {
    config: Arc<Config>,
    cache: Arc<ImageCache>,
    capture: Arc<dyn PageCapture>,
    transform: Arc<dyn RasterTransform>,
    metrics: Arc<Metrics>,
    cycles: Arc<AtomicU64>,
}

impl RefreshScheduler {
    pub fn new(
        config: Arc<Config>,
        cache: Arc<ImageCache>,
        capture: Arc<dyn PageCapture>,
        transform: Arc<dyn RasterTransform>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            config,
            cache,
            capture,
            transform,
            metrics,
            cycles: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Number of cycles started so far.
    pub fn cycles_started(&self) -> u64 {
        self.cycles.load(Ordering::Relaxed)
    }

    /// Spawns [`run`](Self::run) on the current runtime.
    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }

    /// Runs refresh cycles until `shutdown` is cancelled.
    ///
    /// Cancellation is observed between cycles and while sleeping. A cycle
    /// that has started always runs to completion.
    pub async fn run(self, shutdown: CancellationToken) {
        let interval = self.config.refresh_interval();
        info!(
            "Refresh scheduler starting: {} pages every {:?}",
            self.config.hass_pages.len(),
            interval
        );

        while !shutdown.is_cancelled() {
            self.refresh_all().await;

            tokio::select! {
                biased;

                _ = shutdown.cancelled() => break,
                _ = sleep(interval) => {}
            }
        }

        info!("Refresh scheduler stopped");
    }

    /// Refreshes every slot once and waits for all of them.
    pub async fn refresh_all(&self) -> CycleReport {
        let cycle = self.cycles.fetch_add(1, Ordering::Relaxed) + 1;
        let start_time = Instant::now();
        debug!("Refresh cycle {} started", cycle);

        let tasks: Vec<_> = self
            .config
            .hass_pages
            .iter()
            .cloned()
            .enumerate()
            .map(|(idx, page)| {
                let scheduler = self.clone();
                tokio::spawn(async move { scheduler.refresh(idx, page).await })
            })
            .collect();

        let outcomes: Vec<SlotOutcome> = join_all(tasks)
            .await
            .into_iter()
            .enumerate()
            .map(|(idx, joined)| {
                joined.unwrap_or_else(|e| {
                    error!("Refresh task for slot {} aborted: {}", idx, e);
                    SlotOutcome::Aborted(e.to_string())
                })
            })
            .collect();

        let report = CycleReport {
            cycle,
            outcomes,
            duration: start_time.elapsed(),
        };

        self.metrics
            .record_cycle(report.duration, self.cache.initialized_count());
        info!(
            "Refresh cycle {} completed in {:?}. Updated: {}, Failed: {}",
            report.cycle,
            report.duration,
            report.updated(),
            report.failed()
        );

        report
    }

    /// Captures, converts and stores the page of slot `idx`.
    ///
    /// On any failure the slot keeps its previous image.
    pub async fn refresh(&self, idx: usize, page: Page) -> SlotOutcome {
        let config = &self.config;

        info!("Taking screenshot ({})", page.path);
        let request = CaptureRequest {
            url: config.page_url(&page),
            viewport: page.viewport(config.width, config.height),
            idle_time: config.min_idle_time(),
            timeout: config.timeout(),
        };

        let screenshot = match self.capture.capture(request).await {
            Ok(data) => {
                self.metrics.captures_succeeded.increment(1);
                data
            }
            Err(e) => {
                warn!("Could not take screenshot ({}): {}", page.path, e);
                self.metrics.captures_failed.increment(1);
                if matches!(e, CaptureError::Timeout(_)) {
                    self.metrics.capture_timeouts.increment(1);
                }
                return SlotOutcome::CaptureFailed(e);
            }
        };

        info!("Transforming image ({})", page.path);
        let target = TransformTarget {
            width: config.width,
            height: config.height,
            rotation: config.rotation,
        };
        let image = match self.transform.transform(screenshot, target).await {
            Ok(data) => data,
            Err(e) => {
                warn!("Could not transform image ({}): {}", page.path, e);
                self.metrics.transforms_failed.increment(1);
                return SlotOutcome::TransformFailed(e);
            }
        };

        info!("Updating cache ({})", page.path);
        match self.cache.set(idx, &image) {
            Ok(()) => {
                self.metrics.slots_updated.increment(1);
                SlotOutcome::Updated { bytes: image.len() }
            }
            Err(e) => {
                // The cache is sized from the page list, so this is a bug.
                error!("Could not cache image ({}): {}", page.path, e);
                self.metrics.cache_set_failures.increment(1);
                SlotOutcome::CacheFailed(e)
            }
        }
    }
}
