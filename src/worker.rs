use crate::{slugify, CaptureSettings, CapturerFactory, Metrics, PageCapturer, ToolError};
use chrono::{DateTime, Utc};
use dashmap::{DashMap, DashSet};
use futures::FutureExt;
use serde::Serialize;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch, Mutex};
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

/// Wait before a failed job goes back on the queue
pub const REQUEUE_DELAY: Duration = Duration::from_millis(500);

/// One URL to capture and how many more times it may be re-queued
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureJob {
    pub url: String,
    pub retries_remaining: u32,
}

impl CaptureJob {
    pub fn new(url: impl Into<String>, retries: u32) -> Self {
        Self {
            url: url.into(),
            retries_remaining: retries,
        }
    }

    pub fn retry(self) -> Self {
        Self {
            url: self.url,
            retries_remaining: self.retries_remaining.saturating_sub(1),
        }
    }

    /// Whether `err` sends this job back to the queue
    ///
    /// A launch failure is retried too: another worker may own a live browser.
    pub fn should_retry(&self, err: &ToolError) -> bool {
        self.retries_remaining > 0
            && (err.is_retryable() || matches!(err, ToolError::BrowserLaunchFailed(_)))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkItem {
    Job(CaptureJob),
    /// Tells exactly one worker to exit
    Stop,
}

/// Stop request shared by the capture workers
///
/// Level-triggered: once raised it stays raised, so a worker that checks
/// late still sees it. Dropping the sender without raising means "never".
#[derive(Debug, Clone)]
pub struct Shutdown {
    raised: watch::Receiver<bool>,
}

impl Shutdown {
    pub fn channel() -> (watch::Sender<bool>, Shutdown) {
        let (tx, raised) = watch::channel(false);
        (tx, Shutdown { raised })
    }

    /// A signal nobody can raise
    pub fn never() -> Self {
        Self::channel().1
    }

    pub fn is_requested(&self) -> bool {
        *self.raised.borrow()
    }

    /// Resolves once shutdown is requested
    pub async fn requested(&self) {
        let mut raised = self.raised.clone();
        if raised.wait_for(|stop| *stop).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Bounded job queue with pending-count tracking
///
/// `put` counts a job as pending and `task_done` retires one. `join`
/// resolves once nothing is pending, which is only possible after every
/// re-queued retry has also been retired.
pub struct WorkQueue {
    sender: mpsc::Sender<WorkItem>,
    receiver: Mutex<mpsc::Receiver<WorkItem>>,
    pending: watch::Sender<usize>,
}

impl WorkQueue {
    pub fn new(capacity: usize) -> Self {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let (pending, _) = watch::channel(0);
        Self {
            sender,
            receiver: Mutex::new(receiver),
            pending,
        }
    }

    pub async fn put(&self, job: CaptureJob) -> Result<(), ToolError> {
        self.pending.send_modify(|n| *n += 1);
        self.sender
            .send(WorkItem::Job(job))
            .await
            .map_err(|e| ToolError::TaskError(format!("queue closed: {e}")))
    }

    pub async fn stop(&self) -> Result<(), ToolError> {
        self.sender
            .send(WorkItem::Stop)
            .await
            .map_err(|e| ToolError::TaskError(format!("queue closed: {e}")))
    }

    /// Next item; a closed queue reads as [`WorkItem::Stop`]
    pub async fn get(&self) -> WorkItem {
        let mut receiver = self.receiver.lock().await;
        receiver.recv().await.unwrap_or(WorkItem::Stop)
    }

    pub fn task_done(&self) {
        self.pending.send_modify(|n| *n = n.saturating_sub(1));
    }

    pub fn pending(&self) -> usize {
        *self.pending.borrow()
    }

    pub async fn join(&self) {
        let mut pending = self.pending.subscribe();
        // the sender lives in `self`, so the channel cannot close here
        let _ = pending.wait_for(|n| *n == 0).await;
    }
}

/// A URL that failed with no retries left
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CaptureFailure {
    pub url: String,
    pub slug: String,
    pub error: String,
}

/// Outcome counts of one capture run
#[derive(Debug, Clone, Default, Serialize)]
pub struct CaptureReport {
    pub total: usize,
    pub ok: usize,
    pub skipped: usize,
    pub retried: usize,
    pub failed: usize,
    pub failures: Vec<CaptureFailure>,
    /// The run stopped on a shutdown request before the queue drained
    pub interrupted: bool,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl CaptureReport {
    pub fn write_json(&self, path: &Path) -> Result<(), ToolError> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}

/// Counters shared by all workers of one run
#[derive(Default)]
pub struct CaptureStats {
    ok: AtomicUsize,
    skipped: AtomicUsize,
    retried: AtomicUsize,
    failed: AtomicUsize,
    failures: DashMap<String, CaptureFailure>,
}

impl CaptureStats {
    /// URLs with a final outcome so far
    fn settled(&self) -> usize {
        self.ok.load(Ordering::Relaxed)
            + self.skipped.load(Ordering::Relaxed)
            + self.failed.load(Ordering::Relaxed)
    }

    fn log_progress(&self, total: usize, started: Instant) {
        let settled = self.settled();
        let rate = settled as f64 / started.elapsed().as_secs_f64().max(f64::EPSILON);
        info!(
            "Progress: {}/{} ({:.1}%) - OK: {}, skipped: {}, failed: {}, rate: {:.1}/s",
            settled,
            total,
            settled as f64 / total.max(1) as f64 * 100.0,
            self.ok.load(Ordering::Relaxed),
            self.skipped.load(Ordering::Relaxed),
            self.failed.load(Ordering::Relaxed),
            rate
        );
    }

    fn report(&self, total: usize) -> CaptureReport {
        let mut failures: Vec<CaptureFailure> =
            self.failures.iter().map(|entry| entry.value().clone()).collect();
        failures.sort_by(|a, b| a.url.cmp(&b.url));
        CaptureReport {
            total,
            ok: self.ok.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            retried: self.retried.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            failures,
            ..Default::default()
        }
    }
}

/// State every worker of a run shares
struct RunContext {
    queue: WorkQueue,
    out_dir: PathBuf,
    settings: CaptureSettings,
    claims: DashSet<PathBuf>,
    stats: CaptureStats,
    metrics: Arc<Metrics>,
    shutdown: Shutdown,
}

pub struct CaptureWorker {
    id: usize,
    ctx: Arc<RunContext>,
}

impl CaptureWorker {
    async fn run(self, factory: Arc<dyn CapturerFactory>) {
        let mut launched = AssertUnwindSafe(factory.launch(self.id))
            .catch_unwind()
            .await
            .unwrap_or_else(|_| Err(ToolError::BrowserLaunchFailed("launch panicked".to_string())));
        if let Err(e) = &launched {
            error!(worker = self.id, error = %e, "browser launch failed, failing pulled jobs");
        }

        let shutdown = &self.ctx.shutdown;
        loop {
            let job = tokio::select! {
                biased;
                _ = shutdown.requested() => break,
                item = self.ctx.queue.get() => match item {
                    WorkItem::Job(job) => job,
                    WorkItem::Stop => break,
                },
            };

            let capturer = match &mut launched {
                Ok(capturer) => Ok(capturer.as_mut()),
                Err(e) => Err(&*e),
            };
            let processed = tokio::select! {
                processed = self.process(job, capturer) => processed,
                _ = shutdown.requested() => {
                    self.ctx.queue.task_done();
                    break;
                }
            };
            self.ctx.queue.task_done();

            let throttle = self.ctx.settings.throttle();
            if processed && !throttle.is_zero() {
                tokio::select! {
                    _ = sleep(throttle) => {}
                    _ = shutdown.requested() => break,
                }
            }
        }

        if let Ok(capturer) = &mut launched {
            capturer.close().await;
        }
        debug!(worker = self.id, "worker stopped");
    }

    /// Handle one job; returns false when it was skipped without capturing
    async fn process(
        &self,
        job: CaptureJob,
        capturer: Result<&mut (dyn PageCapturer + 'static), &ToolError>,
    ) -> bool {
        let ctx = &self.ctx;
        let slug = slugify(&job.url);
        let output = ctx
            .out_dir
            .join(format!("{slug}.{}", ctx.settings.extension()));

        if tokio::fs::try_exists(&output).await.unwrap_or(false) {
            info!(worker = self.id, slug = %slug, url = %job.url, "skip");
            self.record_skip();
            return false;
        }
        if !ctx.claims.insert(output.clone()) {
            info!(worker = self.id, slug = %slug, url = %job.url, "skip (slug claimed by another URL)");
            self.record_skip();
            return false;
        }

        let start = Instant::now();
        let result = match capturer {
            Ok(capturer) => AssertUnwindSafe(capturer.capture(&job.url, &output))
                .catch_unwind()
                .await
                .unwrap_or_else(|_| Err(ToolError::CaptureFailed("capture panicked".to_string()))),
            Err(launch_err) => Err(launch_err.clone()),
        };
        ctx.metrics.record_capture(start.elapsed(), result.is_ok());

        match result {
            Ok(()) => {
                info!(worker = self.id, slug = %slug, url = %job.url, "ok");
                ctx.stats.ok.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) if job.should_retry(&e) => {
                warn!(worker = self.id, slug = %slug, url = %job.url, error = %e, "retry");
                ctx.claims.remove(&output);
                ctx.stats.retried.fetch_add(1, Ordering::Relaxed);
                ctx.metrics.record_retry();
                sleep(REQUEUE_DELAY).await;
                if let Err(put_err) = ctx.queue.put(job.retry()).await {
                    error!(worker = self.id, error = %put_err, "could not re-queue job");
                }
            }
            Err(e) => {
                error!(worker = self.id, slug = %slug, url = %job.url, error = %e, "error");
                ctx.claims.remove(&output);
                ctx.stats.failed.fetch_add(1, Ordering::Relaxed);
                ctx.stats.failures.insert(
                    job.url.clone(),
                    CaptureFailure {
                        url: job.url,
                        slug,
                        error: e.to_string(),
                    },
                );
            }
        }
        true
    }

    fn record_skip(&self) {
        self.ctx.stats.skipped.fetch_add(1, Ordering::Relaxed);
        self.ctx.metrics.record_skip();
    }
}

/// Fixed set of capture workers draining one queue
pub struct CapturePool {
    settings: CaptureSettings,
    out_dir: PathBuf,
    factory: Arc<dyn CapturerFactory>,
    metrics: Arc<Metrics>,
    progress_interval: Option<Duration>,
    shutdown: Shutdown,
}

impl CapturePool {
    pub fn new(
        settings: CaptureSettings,
        out_dir: PathBuf,
        factory: Arc<dyn CapturerFactory>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            settings,
            out_dir,
            factory,
            metrics,
            progress_interval: Some(Duration::from_secs(10)),
            shutdown: Shutdown::never(),
        }
    }

    pub fn with_progress_interval(mut self, interval: Option<Duration>) -> Self {
        self.progress_interval = interval;
        self
    }

    /// Workers finish their current page, close their browsers and exit
    /// once `shutdown` is raised
    pub fn with_shutdown(mut self, shutdown: Shutdown) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Capture every URL, returning once the queue is drained (or shutdown
    /// is requested) and every worker has exited
    pub async fn run(&self, urls: Vec<String>) -> Result<CaptureReport, ToolError> {
        let started_at = Utc::now();
        let started = Instant::now();
        tokio::fs::create_dir_all(&self.out_dir).await?;

        let total = urls.len();
        let worker_count = self.settings.concurrency.max(1);
        info!(
            "Capturing {} URLs with {} workers into {}",
            total,
            worker_count,
            self.out_dir.display()
        );

        let ctx = Arc::new(RunContext {
            queue: WorkQueue::new(total + worker_count),
            out_dir: self.out_dir.clone(),
            settings: self.settings.clone(),
            claims: DashSet::new(),
            stats: CaptureStats::default(),
            metrics: self.metrics.clone(),
            shutdown: self.shutdown.clone(),
        });

        for url in urls {
            ctx.queue.put(CaptureJob::new(url, self.settings.retries)).await?;
        }

        let handles: Vec<_> = (1..=worker_count)
            .map(|id| {
                let worker = CaptureWorker { id, ctx: ctx.clone() };
                let factory = self.factory.clone();
                tokio::spawn(worker.run(factory))
            })
            .collect();

        let reporter = self.progress_interval.map(|interval| {
            let ctx = ctx.clone();
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                ticker.tick().await;
                while ctx.stats.settled() < total {
                    ticker.tick().await;
                    ctx.stats.log_progress(total, started);
                }
            })
        });

        let workers = futures::future::join_all(handles);
        tokio::pin!(workers);
        let exited_early = tokio::select! {
            _ = ctx.queue.join() => None,
            _ = self.shutdown.requested() => {
                warn!(pending = ctx.queue.pending(), "Shutdown requested, stopping capture workers");
                None
            }
            results = &mut workers => {
                error!(pending = ctx.queue.pending(), "All capture workers exited with jobs left");
                Some(results)
            }
        };
        let results = match exited_early {
            Some(results) => results,
            None => {
                if !self.shutdown.is_requested() {
                    for _ in 0..worker_count {
                        ctx.queue.stop().await?;
                    }
                }
                workers.await
            }
        };
        for result in results {
            if let Err(e) = result {
                error!("Capture worker panicked: {}", e);
            }
        }
        if let Some(reporter) = reporter {
            reporter.abort();
        }

        let mut report = ctx.stats.report(total);
        report.interrupted = self.shutdown.is_requested();
        report.started_at = Some(started_at);
        report.finished_at = Some(Utc::now());

        info!(
            ok = report.ok,
            skipped = report.skipped,
            retried = report.retried,
            failed = report.failed,
            interrupted = report.interrupted,
            "Capture finished"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex as StdMutex;

    /// Fails each URL a scripted number of times before succeeding
    #[derive(Default)]
    struct ScriptedFactory {
        failures: Arc<StdMutex<HashMap<String, u32>>>,
        attempts: Arc<StdMutex<Vec<String>>>,
        launch_fails_for: Vec<usize>,
        closed: Arc<AtomicUsize>,
    }

    impl ScriptedFactory {
        fn failing(url: &str, times: u32) -> Self {
            let factory = Self::default();
            factory.failures.lock().unwrap().insert(url.to_string(), times);
            factory
        }
    }

    struct ScriptedCapturer {
        failures: Arc<StdMutex<HashMap<String, u32>>>,
        attempts: Arc<StdMutex<Vec<String>>>,
        closed: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl PageCapturer for ScriptedCapturer {
        async fn capture(&mut self, url: &str, output: &Path) -> Result<(), ToolError> {
            self.attempts.lock().unwrap().push(url.to_string());
            let fail = match self.failures.lock().unwrap().get_mut(url) {
                Some(n) if *n > 0 => {
                    *n -= 1;
                    true
                }
                _ => false,
            };
            if fail {
                return Err(ToolError::NavigationTimeout(Duration::from_millis(5)));
            }
            if url.contains("invalid") {
                return Err(ToolError::InvalidUrl(url.to_string()));
            }
            if url.contains("panic") {
                panic!("capturer blew up on {url}");
            }
            if url.contains("slow") {
                sleep(Duration::from_secs(30)).await;
            }
            tokio::fs::write(output, b"png").await?;
            Ok(())
        }

        async fn close(&mut self) {
            self.closed.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl CapturerFactory for ScriptedFactory {
        async fn launch(&self, worker_id: usize) -> Result<Box<dyn PageCapturer>, ToolError> {
            if self.launch_fails_for.contains(&worker_id) {
                return Err(ToolError::BrowserLaunchFailed("no chrome".to_string()));
            }
            Ok(Box::new(ScriptedCapturer {
                failures: self.failures.clone(),
                attempts: self.attempts.clone(),
                closed: self.closed.clone(),
            }))
        }
    }

    fn settings(concurrency: usize, retries: u32) -> CaptureSettings {
        CaptureSettings {
            concurrency,
            retries,
            throttle_ms: 0,
            ..Default::default()
        }
    }

    async fn run_pool(
        factory: ScriptedFactory,
        settings: CaptureSettings,
        out_dir: &Path,
        urls: &[&str],
    ) -> CaptureReport {
        let pool = CapturePool::new(
            settings,
            out_dir.to_path_buf(),
            Arc::new(factory),
            Arc::new(Metrics::new()),
        )
        .with_progress_interval(None);
        pool.run(urls.iter().map(|u| u.to_string()).collect())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_queue_join_waits_for_task_done() {
        let queue = WorkQueue::new(4);
        queue.put(CaptureJob::new("https://a.com", 0)).await.unwrap();
        assert_eq!(queue.pending(), 1);

        assert_eq!(
            queue.get().await,
            WorkItem::Job(CaptureJob::new("https://a.com", 0))
        );
        // still pending until task_done
        assert!(
            tokio::time::timeout(Duration::from_millis(20), queue.join())
                .await
                .is_err()
        );
        queue.task_done();
        tokio::time::timeout(Duration::from_millis(100), queue.join())
            .await
            .unwrap();
    }

    #[test]
    fn test_job_retry_decrements() {
        let job = CaptureJob::new("https://a.com", 1).retry();
        assert_eq!(job.retries_remaining, 0);
        assert_eq!(job.retry().retries_remaining, 0);
    }

    #[tokio::test]
    async fn test_all_urls_captured() {
        let dir = tempfile::tempdir().unwrap();
        let factory = ScriptedFactory::default();
        let closed = factory.closed.clone();
        let report = run_pool(
            factory,
            settings(3, 1),
            dir.path(),
            &["https://a.com", "https://b.com", "https://c.com/x"],
        )
        .await;

        assert_eq!(report.ok, 3);
        assert_eq!(report.failed, 0);
        assert!(dir.path().join("a-com.png").exists());
        assert!(dir.path().join("c-com-x.png").exists());
        assert_eq!(closed.load(Ordering::SeqCst), 3);
        assert!(report.started_at.is_some() && report.finished_at.is_some());
    }

    #[tokio::test]
    async fn test_retry_then_success() {
        let dir = tempfile::tempdir().unwrap();
        let factory = ScriptedFactory::failing("https://flaky.com", 1);
        let attempts = factory.attempts.clone();
        let report = run_pool(factory, settings(2, 1), dir.path(), &["https://flaky.com"]).await;

        assert_eq!(report.ok, 1);
        assert_eq!(report.retried, 1);
        assert_eq!(report.failed, 0);
        assert_eq!(attempts.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_retries_exhausted() {
        let dir = tempfile::tempdir().unwrap();
        let factory = ScriptedFactory::failing("https://down.com", 5);
        let attempts = factory.attempts.clone();
        let report = run_pool(
            factory,
            settings(2, 1),
            dir.path(),
            &["https://down.com", "https://up.com"],
        )
        .await;

        assert_eq!(report.ok, 1);
        assert_eq!(report.retried, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(report.failures[0].url, "https://down.com");
        assert_eq!(report.failures[0].slug, "down-com");
        // first try plus one retry
        let tries = attempts
            .lock()
            .unwrap()
            .iter()
            .filter(|u| *u == "https://down.com")
            .count();
        assert_eq!(tries, 2);
    }

    #[tokio::test]
    async fn test_existing_output_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a-com.png"), b"old").unwrap();
        let factory = ScriptedFactory::default();
        let attempts = factory.attempts.clone();
        let report = run_pool(factory, settings(1, 0), dir.path(), &["https://a.com"]).await;

        assert_eq!(report.skipped, 1);
        assert_eq!(report.ok, 0);
        assert!(attempts.lock().unwrap().is_empty());
        assert_eq!(std::fs::read(dir.path().join("a-com.png")).unwrap(), b"old");
    }

    #[tokio::test]
    async fn test_same_slug_captured_once() {
        let dir = tempfile::tempdir().unwrap();
        let factory = ScriptedFactory::default();
        let report = run_pool(
            factory,
            settings(2, 0),
            dir.path(),
            &["https://a.com/x", "https://a.com/x?page=2"],
        )
        .await;

        assert_eq!(report.ok + report.skipped, 2);
        assert_eq!(report.ok, 1);
        assert_eq!(report.skipped, 1);
    }

    #[tokio::test]
    async fn test_failed_launch_does_not_strand_jobs() {
        let dir = tempfile::tempdir().unwrap();
        let mut scripted = ScriptedFactory::default();
        scripted.launch_fails_for = vec![1, 2];
        let report = run_pool(
            scripted,
            settings(2, 0),
            dir.path(),
            &["https://a.com", "https://b.com"],
        )
        .await;

        assert_eq!(report.failed, 2);
        assert_eq!(report.total, 2);
        assert!(report
            .failures
            .iter()
            .all(|f| f.error.contains("Browser launch failed")));
    }

    #[tokio::test]
    async fn test_report_json() {
        let dir = tempfile::tempdir().unwrap();
        let report = CaptureReport {
            total: 1,
            failed: 1,
            failures: vec![CaptureFailure {
                url: "https://x.com".to_string(),
                slug: "x-com".to_string(),
                error: "boom".to_string(),
            }],
            ..Default::default()
        };
        let path = dir.path().join("report.json");
        report.write_json(&path).unwrap();

        let value: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value["failed"], 1);
        assert_eq!(value["failures"][0]["slug"], "x-com");
    }

    #[test]
    fn test_stats_settled_counts_final_outcomes() {
        let stats = CaptureStats::default();
        stats.ok.fetch_add(2, Ordering::Relaxed);
        stats.retried.fetch_add(3, Ordering::Relaxed);
        stats.failed.fetch_add(1, Ordering::Relaxed);
        assert_eq!(stats.settled(), 3);
        stats.skipped.fetch_add(1, Ordering::Relaxed);
        assert_eq!(stats.settled(), 4);
        assert_eq!(stats.report(4).retried, 3);
    }

    #[test]
    fn test_should_retry_only_transient_errors() {
        let job = CaptureJob::new("https://a.com", 1);
        assert!(job.should_retry(&ToolError::NavigationTimeout(Duration::from_secs(1))));
        assert!(job.should_retry(&ToolError::BrowserLaunchFailed("no chrome".to_string())));
        assert!(!job.should_retry(&ToolError::InvalidUrl("a".to_string())));
        assert!(!job.should_retry(&ToolError::IoError("disk full".to_string())));
        let last = job.retry();
        assert!(!last.should_retry(&ToolError::NavigationTimeout(Duration::from_secs(1))));
    }

    #[tokio::test]
    async fn test_permanent_error_is_not_retried() {
        let dir = tempfile::tempdir().unwrap();
        let factory = ScriptedFactory::default();
        let attempts = factory.attempts.clone();
        let report = run_pool(factory, settings(2, 3), dir.path(), &["https://invalid.com"]).await;

        assert_eq!(report.retried, 0);
        assert_eq!(report.failed, 1);
        assert!(report.failures[0].error.starts_with("Invalid URL"));
        assert_eq!(attempts.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_panicking_capture_does_not_hang_pool() {
        let dir = tempfile::tempdir().unwrap();
        let factory = ScriptedFactory::default();
        let closed = factory.closed.clone();
        let report = tokio::time::timeout(
            Duration::from_secs(5),
            run_pool(
                factory,
                settings(2, 0),
                dir.path(),
                &["https://panic.com", "https://fine.com"],
            ),
        )
        .await
        .expect("pool hung after a capture panic");

        assert_eq!(report.failed, 1);
        assert_eq!(report.ok, 1);
        assert!(report.failures[0].error.contains("capture panicked"));
        assert_eq!(closed.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_shutdown_stops_workers_and_closes_browsers() {
        let dir = tempfile::tempdir().unwrap();
        let factory = ScriptedFactory::default();
        let closed = factory.closed.clone();
        let (stop, shutdown) = Shutdown::channel();
        let pool = CapturePool::new(
            settings(2, 0),
            dir.path().to_path_buf(),
            Arc::new(factory),
            Arc::new(Metrics::new()),
        )
        .with_progress_interval(None)
        .with_shutdown(shutdown);

        let urls = vec![
            "https://slow.com/a".to_string(),
            "https://slow.com/b".to_string(),
            "https://slow.com/c".to_string(),
        ];
        let run = tokio::spawn(async move { pool.run(urls).await });
        tokio::time::sleep(Duration::from_millis(50)).await;
        stop.send(true).unwrap();

        let report = tokio::time::timeout(Duration::from_secs(5), run)
            .await
            .expect("pool ignored shutdown")
            .unwrap()
            .unwrap();
        assert!(report.interrupted);
        assert_eq!(report.ok, 0);
        assert_eq!(closed.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_shutdown_signal_levels() {
        let (stop, shutdown) = Shutdown::channel();
        assert!(!shutdown.is_requested());
        stop.send(true).unwrap();
        // raised before anyone waits
        tokio::time::timeout(Duration::from_millis(100), shutdown.requested())
            .await
            .unwrap();
        assert!(shutdown.is_requested());

        let never = Shutdown::never();
        assert!(!never.is_requested());
        assert!(
            tokio::time::timeout(Duration::from_millis(20), never.requested())
                .await
                .is_err()
        );
    }
}
