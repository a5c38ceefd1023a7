//! Exactly-once ingestion of watched files.
//!
//! Per filename: Idle → InFlight (claimed in the in-flight set) → Done
//! (recorded in the ledger) or back to Idle on any failure. Admission
//! happens on the dispatcher thread; a pool of worker threads runs the
//! settle delay, extraction and hand-off. The claim travels with the job
//! and is released when the job is dropped.

use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use super::format::SupportedFormat;
use super::inflight::{InFlightGuard, InFlightSet};
use super::ledger::ProcessedLedger;
use super::watcher::{candidate_paths, existing_files, DirectoryWatcher};
use super::ImportError;
use crate::pipeline::extraction::{source_name, DocumentPipeline};
use crate::pipeline::panic_message;
use crate::pipeline::storage::ContentSink;

/// Dispatcher wake-up interval for shutdown checks.
const POLL_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    Unsupported,
    AlreadyProcessed,
    InFlight,
}

/// A claimed file, ready for a worker.
#[derive(Debug)]
pub struct IngestJob {
    path: PathBuf,
    claim: InFlightGuard,
}

impl IngestJob {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn name(&self) -> &str {
        self.claim.name()
    }
}

#[derive(Debug)]
pub enum Admission {
    Accepted(IngestJob),
    Rejected(RejectReason),
}

#[derive(Debug, Clone, PartialEq)]
pub enum IngestOutcome {
    Ingested { units: usize, records: usize },
    Skipped(RejectReason),
    /// Gone after the settle delay (temporary or moved-away file).
    Vanished,
    /// Decoded, but produced no content units.
    Empty,
    ExtractionFailed(String),
    HandoffFailed(String),
    /// Content was handed off but the ledger could not be updated.
    LedgerFailed(String),
}

impl IngestOutcome {
    pub fn is_ingested(&self) -> bool {
        matches!(self, Self::Ingested { .. })
    }
}

pub struct IngestionOrchestrator {
    ledger: Arc<ProcessedLedger>,
    in_flight: InFlightSet,
    pipeline: Arc<dyn DocumentPipeline>,
    sink: Arc<dyn ContentSink>,
    settle_delay: Duration,
}

impl IngestionOrchestrator {
    pub fn new(
        ledger: Arc<ProcessedLedger>,
        pipeline: Arc<dyn DocumentPipeline>,
        sink: Arc<dyn ContentSink>,
        settle_delay: Duration,
    ) -> Self {
        Self {
            ledger,
            in_flight: InFlightSet::new(),
            pipeline,
            sink,
            settle_delay,
        }
    }

    pub fn ledger(&self) -> &ProcessedLedger {
        &self.ledger
    }

    pub fn in_flight(&self) -> &InFlightSet {
        &self.in_flight
    }

    /// Idle → InFlight, if the file is supported, not yet processed and
    /// not already claimed.
    pub fn admit(&self, path: &Path) -> Admission {
        if SupportedFormat::from_path(path).is_none() {
            return Admission::Rejected(RejectReason::Unsupported);
        }
        let name = source_name(path);
        // Claim before consulting the ledger: a holder records the file
        // before releasing its claim, so a recorded file is always seen here.
        let Some(claim) = self.in_flight.try_claim(&name) else {
            debug!(file = %name, "Already in flight, ignoring");
            return Admission::Rejected(RejectReason::InFlight);
        };
        if self.ledger.contains(&name) {
            debug!(file = %name, "Already processed, ignoring");
            return Admission::Rejected(RejectReason::AlreadyProcessed);
        }

        info!(file = %name, "Accepted for ingestion");
        Admission::Accepted(IngestJob {
            path: path.to_path_buf(),
            claim,
        })
    }

    /// Run a claimed job to completion. Only a successful hand-off adds
    /// the file to the ledger; the claim is released on return.
    pub fn ingest(&self, job: IngestJob) -> IngestOutcome {
        let name = job.name().to_string();
        if !self.settle_delay.is_zero() {
            std::thread::sleep(self.settle_delay);
        }

        if !job.path().exists() {
            info!(file = %name, "File vanished before processing");
            return IngestOutcome::Vanished;
        }

        let extracted = panic::catch_unwind(AssertUnwindSafe(|| self.pipeline.extract(job.path())));
        let units = match extracted {
            Ok(Ok(units)) => units,
            Ok(Err(e)) => {
                error!(file = %name, error = %e, "Extraction failed, file left for retry");
                return IngestOutcome::ExtractionFailed(e.to_string());
            }
            Err(payload) => {
                let reason = panic_message(payload.as_ref());
                error!(file = %name, panic = %reason, "Extraction panicked, file left for retry");
                return IngestOutcome::ExtractionFailed(format!("extraction panicked: {reason}"));
            }
        };
        if units.is_empty() {
            warn!(file = %name, "No content extracted, file left for retry");
            return IngestOutcome::Empty;
        }

        let records = match self.sink.store(&name, &units) {
            Ok(records) => records,
            Err(e) => {
                error!(file = %name, error = %e, "Hand-off failed, file left for retry");
                return IngestOutcome::HandoffFailed(e.to_string());
            }
        };

        if let Err(e) = self.ledger.record(&name) {
            error!(file = %name, error = %e, "Ledger update failed after hand-off");
            return IngestOutcome::LedgerFailed(e.to_string());
        }

        info!(file = %name, units = units.len(), records, "Ingested");
        IngestOutcome::Ingested {
            units: units.len(),
            records,
        }
    }

    /// Admit and ingest on the calling thread.
    pub fn ingest_path(&self, path: &Path) -> IngestOutcome {
        match self.admit(path) {
            Admission::Accepted(job) => self.ingest(job),
            Admission::Rejected(reason) => IngestOutcome::Skipped(reason),
        }
    }
}

// ── Worker pool ────────────────────────────────────────────

/// Bounded pool of ingestion workers fed through a channel.
///
/// Dropping the handle closes the queue and joins the workers after they
/// finish the jobs already queued.
pub struct IngestionHandle {
    orchestrator: Arc<IngestionOrchestrator>,
    tx: Option<Sender<IngestJob>>,
    workers: Vec<JoinHandle<()>>,
}

impl IngestionHandle {
    pub fn start(orchestrator: Arc<IngestionOrchestrator>, workers: usize) -> Self {
        let (tx, rx) = mpsc::channel::<IngestJob>();
        let rx = Arc::new(Mutex::new(rx));

        let workers = (0..workers.max(1))
            .map(|id| {
                let orchestrator = orchestrator.clone();
                let rx = rx.clone();
                std::thread::spawn(move || worker_loop(id, &orchestrator, &rx))
            })
            .collect();

        Self {
            orchestrator,
            tx: Some(tx),
            workers,
        }
    }

    /// Admit `path` and queue it. `Ok(false)` when admission rejected it.
    pub fn submit(&self, path: &Path) -> Result<bool, ImportError> {
        let job = match self.orchestrator.admit(path) {
            Admission::Accepted(job) => job,
            Admission::Rejected(_) => return Ok(false),
        };
        let tx = self.tx.as_ref().ok_or(ImportError::WorkersStopped)?;
        tx.send(job).map_err(|_| ImportError::WorkersStopped)?;
        Ok(true)
    }

    /// Stop accepting work and wait for queued jobs to finish.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        self.tx.take();
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                error!("Ingestion worker panicked");
            }
        }
    }
}

impl Drop for IngestionHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

fn worker_loop(id: usize, orchestrator: &IngestionOrchestrator, rx: &Mutex<Receiver<IngestJob>>) {
    debug!(worker = id, "Ingestion worker started");
    loop {
        // The lock is held only while waiting for the next job.
        let job = match rx.lock() {
            Ok(rx) => rx.recv(),
            Err(_) => break,
        };
        let Ok(job) = job else {
            break;
        };
        // The job, and with it the claim, is dropped while unwinding.
        match panic::catch_unwind(AssertUnwindSafe(|| orchestrator.ingest(job))) {
            Ok(outcome) => debug!(worker = id, ?outcome, "Job finished"),
            Err(payload) => error!(
                worker = id,
                panic = %panic_message(payload.as_ref()),
                "Ingestion panicked, file left for retry"
            ),
        }
    }
    debug!(worker = id, "Ingestion worker stopped");
}

// ── Watch service ──────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct WatchSettings {
    pub dir: PathBuf,
    pub workers: usize,
    pub scan_existing: bool,
}

/// Watcher thread plus worker pool.
///
/// Supports graceful shutdown via `shutdown()` or automatic cleanup on `Drop`.
pub struct WatchService {
    shutdown: Arc<AtomicBool>,
    dispatcher: Option<JoinHandle<()>>,
}

impl WatchService {
    pub fn start(
        orchestrator: Arc<IngestionOrchestrator>,
        settings: WatchSettings,
    ) -> Result<Self, ImportError> {
        let (tx, rx) = mpsc::channel();
        let watcher = DirectoryWatcher::start(&settings.dir, tx)?;
        let existing = if settings.scan_existing {
            existing_files(&settings.dir)?
        } else {
            Vec::new()
        };

        let shutdown = Arc::new(AtomicBool::new(false));
        let flag = shutdown.clone();
        let pool = IngestionHandle::start(orchestrator, settings.workers);

        let dispatcher = std::thread::spawn(move || {
            for path in existing {
                dispatch(&pool, &path);
            }
            dispatch_loop(&watcher, &rx, &pool, &flag);
            info!("Watch dispatcher shutting down");
        });

        Ok(Self {
            shutdown,
            dispatcher: Some(dispatcher),
        })
    }

    /// Stop reacting to events. Queued jobs still run to completion.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }

    /// Block until the dispatcher exits.
    pub fn wait(mut self) {
        self.join();
    }

    fn join(&mut self) {
        if let Some(h) = self.dispatcher.take() {
            if h.join().is_err() {
                error!("Watch dispatcher panicked");
            }
        }
    }
}

impl Drop for WatchService {
    fn drop(&mut self) {
        self.shutdown();
        self.join();
    }
}

fn dispatch_loop(
    watcher: &DirectoryWatcher,
    rx: &Receiver<notify::Result<notify::Event>>,
    pool: &IngestionHandle,
    shutdown: &AtomicBool,
) {
    while !shutdown.load(Ordering::Relaxed) {
        match rx.recv_timeout(POLL_INTERVAL) {
            Ok(Ok(event)) => {
                for path in candidate_paths(&event) {
                    dispatch(pool, &path);
                }
            }
            Ok(Err(e)) => warn!(dir = %watcher.dir().display(), error = %e, "Watch error"),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                warn!(dir = %watcher.dir().display(), "Watcher channel closed");
                break;
            }
        }
    }
}

fn dispatch(pool: &IngestionHandle, path: &Path) {
    if let Err(e) = pool.submit(path) {
        error!(path = %path.display(), error = %e, "Could not queue file");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::sync::Barrier;
    use std::time::Instant;

    use super::*;
    use crate::pipeline::extraction::{ContentUnit, ExtractionError};
    use crate::pipeline::storage::StorageError;

    /// Returns one text unit per call; optionally blocks until released.
    #[derive(Default)]
    struct CountingPipeline {
        calls: AtomicUsize,
        gate: Option<Mutex<Receiver<()>>>,
        fail: AtomicBool,
        empty: bool,
        /// Files whose name starts with this make `extract` panic.
        panic_prefix: Option<&'static str>,
    }

    impl CountingPipeline {
        fn gated() -> (Self, Sender<()>) {
            let (tx, rx) = mpsc::channel();
            (
                Self {
                    gate: Some(Mutex::new(rx)),
                    ..Self::default()
                },
                tx,
            )
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl DocumentPipeline for CountingPipeline {
        fn extract(&self, path: &Path) -> Result<Vec<ContentUnit>, ExtractionError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(gate) = &self.gate {
                let _ = gate.lock().unwrap().recv_timeout(Duration::from_secs(5));
            }
            let name = source_name(path);
            if self.panic_prefix.is_some_and(|p| name.starts_with(p)) {
                panic!("unexpected end of content stream in {name}");
            }
            if self.fail.load(Ordering::SeqCst) {
                return Err(ExtractionError::PdfParsing("truncated xref".into()));
            }
            if self.empty {
                return Ok(Vec::new());
            }
            Ok(vec![ContentUnit::text(&name, Some(1), "hello".into())])
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        stored: Mutex<Vec<(String, usize)>>,
        fail: bool,
        panic_prefix: Option<&'static str>,
    }

    impl RecordingSink {
        fn calls(&self) -> usize {
            self.stored.lock().unwrap().len()
        }
    }

    impl ContentSink for RecordingSink {
        fn store(&self, source: &str, units: &[ContentUnit]) -> Result<usize, StorageError> {
            if self.fail {
                return Err(StorageError::Unavailable("index offline".into()));
            }
            if self.panic_prefix.is_some_and(|p| source.starts_with(p)) {
                panic!("index client crashed on {source}");
            }
            self.stored.lock().unwrap().push((source.to_string(), units.len()));
            Ok(units.len())
        }
    }

    struct Fixture {
        dir: tempfile::TempDir,
        orchestrator: Arc<IngestionOrchestrator>,
        pipeline: Arc<CountingPipeline>,
        sink: Arc<RecordingSink>,
    }

    fn fixture(pipeline: CountingPipeline, sink: RecordingSink) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let ledger = Arc::new(ProcessedLedger::load(&dir.path().join("processed_files.json")).unwrap());
        let pipeline = Arc::new(pipeline);
        let sink = Arc::new(sink);
        let orchestrator = Arc::new(IngestionOrchestrator::new(
            ledger,
            pipeline.clone(),
            sink.clone(),
            Duration::ZERO,
        ));
        Fixture {
            dir,
            orchestrator,
            pipeline,
            sink,
        }
    }

    impl Fixture {
        fn file(&self, name: &str) -> PathBuf {
            let path = self.dir.path().join(name);
            std::fs::write(&path, b"%PDF-1.4").unwrap();
            path
        }
    }

    fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(10);
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(20));
        }
        cond()
    }

    #[test]
    fn second_submission_after_success_is_ignored() {
        let fx = fixture(CountingPipeline::default(), RecordingSink::default());
        let path = fx.file("report.pdf");

        assert_eq!(
            fx.orchestrator.ingest_path(&path),
            IngestOutcome::Ingested { units: 1, records: 1 }
        );
        assert_eq!(
            fx.orchestrator.ingest_path(&path),
            IngestOutcome::Skipped(RejectReason::AlreadyProcessed)
        );
        assert_eq!(fx.pipeline.calls(), 1);
        assert_eq!(fx.sink.calls(), 1);
        assert!(fx.orchestrator.ledger().contains("report.pdf"));
        assert!(fx.orchestrator.in_flight().is_empty());
    }

    #[test]
    fn simultaneous_admissions_accept_one() {
        let fx = fixture(CountingPipeline::default(), RecordingSink::default());
        let path = fx.file("dup.pdf");
        let barrier = Arc::new(Barrier::new(2));

        let handles: Vec<_> = (0..2)
            .map(|_| {
                let orchestrator = fx.orchestrator.clone();
                let barrier = barrier.clone();
                let path = path.clone();
                std::thread::spawn(move || {
                    barrier.wait();
                    orchestrator.ingest_path(&path)
                })
            })
            .collect();
        let outcomes: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(outcomes.iter().filter(|o| o.is_ingested()).count(), 1);
        assert_eq!(fx.pipeline.calls(), 1);
        assert_eq!(fx.sink.calls(), 1);
    }

    #[test]
    fn queued_duplicate_is_rejected_by_pool() {
        let (pipeline, release) = CountingPipeline::gated();
        let fx = fixture(pipeline, RecordingSink::default());
        let path = fx.file("slow.pdf");
        let pool = IngestionHandle::start(fx.orchestrator.clone(), 2);

        assert!(pool.submit(&path).unwrap());
        assert!(!pool.submit(&path).unwrap());
        assert!(fx.orchestrator.in_flight().contains("slow.pdf"));

        release.send(()).unwrap();
        pool.shutdown();

        assert_eq!(fx.pipeline.calls(), 1);
        assert!(fx.orchestrator.ledger().contains("slow.pdf"));
        assert!(fx.orchestrator.in_flight().is_empty());
    }

    #[test]
    fn file_recorded_while_claimed_is_not_admitted_again() {
        let fx = fixture(CountingPipeline::default(), RecordingSink::default());
        let path = fx.file("late.pdf");

        let Admission::Accepted(job) = fx.orchestrator.admit(&path) else {
            panic!("first admission should be accepted");
        };
        fx.orchestrator.ledger().record("late.pdf").unwrap();
        assert!(matches!(
            fx.orchestrator.admit(&path),
            Admission::Rejected(RejectReason::InFlight)
        ));

        drop(job);
        assert!(matches!(
            fx.orchestrator.admit(&path),
            Admission::Rejected(RejectReason::AlreadyProcessed)
        ));
        assert!(fx.orchestrator.in_flight().is_empty());
        assert_eq!(fx.pipeline.calls(), 0);
    }

    #[test]
    fn panicking_extraction_is_a_retryable_failure() {
        let pipeline = CountingPipeline {
            panic_prefix: Some("bad"),
            ..CountingPipeline::default()
        };
        let fx = fixture(pipeline, RecordingSink::default());
        let path = fx.file("bad.pdf");

        let outcome = fx.orchestrator.ingest_path(&path);
        assert!(
            matches!(&outcome, IngestOutcome::ExtractionFailed(reason) if reason.contains("content stream")),
            "got {outcome:?}"
        );
        assert!(!fx.orchestrator.ledger().contains("bad.pdf"));
        assert!(fx.orchestrator.in_flight().is_empty());
    }

    #[test]
    fn pool_survives_panicking_documents() {
        let pipeline = CountingPipeline {
            panic_prefix: Some("bad"),
            ..CountingPipeline::default()
        };
        let fx = fixture(pipeline, RecordingSink::default());
        let pool = IngestionHandle::start(fx.orchestrator.clone(), 2);

        for name in ["bad1.pdf", "bad2.pdf", "bad3.pdf"] {
            assert!(pool.submit(&fx.file(name)).unwrap());
        }
        assert!(pool.submit(&fx.file("good.pdf")).unwrap());
        assert!(wait_until(|| fx.orchestrator.ledger().contains("good.pdf")));
        pool.shutdown();

        assert_eq!(fx.orchestrator.ledger().len(), 1);
        assert_eq!(fx.pipeline.calls(), 4);
        assert!(fx.orchestrator.in_flight().is_empty());
    }

    #[test]
    fn worker_survives_panicking_sink() {
        let sink = RecordingSink {
            panic_prefix: Some("bad"),
            ..RecordingSink::default()
        };
        let fx = fixture(CountingPipeline::default(), sink);
        let pool = IngestionHandle::start(fx.orchestrator.clone(), 1);

        assert!(pool.submit(&fx.file("bad.pdf")).unwrap());
        assert!(pool.submit(&fx.file("good.pdf")).unwrap());
        assert!(wait_until(|| fx.orchestrator.ledger().contains("good.pdf")));
        pool.shutdown();

        assert!(!fx.orchestrator.ledger().contains("bad.pdf"));
        assert!(fx.orchestrator.in_flight().is_empty());
    }

    #[test]
    fn extraction_failure_is_retryable() {
        let pipeline = CountingPipeline::default();
        pipeline.fail.store(true, Ordering::SeqCst);
        let fx = fixture(pipeline, RecordingSink::default());
        let path = fx.file("broken.pdf");

        assert!(matches!(
            fx.orchestrator.ingest_path(&path),
            IngestOutcome::ExtractionFailed(_)
        ));
        assert!(!fx.orchestrator.ledger().contains("broken.pdf"));
        assert!(fx.orchestrator.in_flight().is_empty());

        fx.pipeline.fail.store(false, Ordering::SeqCst);
        assert!(fx.orchestrator.ingest_path(&path).is_ingested());
        assert_eq!(fx.pipeline.calls(), 2);
    }

    #[test]
    fn handoff_failure_is_not_recorded() {
        let sink = RecordingSink {
            fail: true,
            ..RecordingSink::default()
        };
        let fx = fixture(CountingPipeline::default(), sink);
        let path = fx.file("a.pdf");

        assert!(matches!(
            fx.orchestrator.ingest_path(&path),
            IngestOutcome::HandoffFailed(_)
        ));
        assert!(fx.orchestrator.ledger().is_empty());
    }

    #[test]
    fn vanished_file_is_not_extracted() {
        let fx = fixture(CountingPipeline::default(), RecordingSink::default());
        let path = fx.dir.path().join("~$temp.docx");

        assert_eq!(fx.orchestrator.ingest_path(&path), IngestOutcome::Vanished);
        assert_eq!(fx.pipeline.calls(), 0);
        assert!(fx.orchestrator.in_flight().is_empty());
    }

    #[test]
    fn empty_extraction_is_not_recorded() {
        let pipeline = CountingPipeline {
            empty: true,
            ..CountingPipeline::default()
        };
        let fx = fixture(pipeline, RecordingSink::default());
        let path = fx.file("blank.pdf");

        assert_eq!(fx.orchestrator.ingest_path(&path), IngestOutcome::Empty);
        assert_eq!(fx.sink.calls(), 0);
        assert!(fx.orchestrator.ledger().is_empty());
    }

    #[test]
    fn unsupported_extension_is_skipped() {
        let fx = fixture(CountingPipeline::default(), RecordingSink::default());
        let path = fx.file("photo.jpg");
        assert_eq!(
            fx.orchestrator.ingest_path(&path),
            IngestOutcome::Skipped(RejectReason::Unsupported)
        );
    }

    #[test]
    fn watch_service_ingests_existing_and_new_files() {
        let fx = fixture(CountingPipeline::default(), RecordingSink::default());
        let inbox = fx.dir.path().join("inbox");
        std::fs::create_dir(&inbox).unwrap();
        std::fs::write(inbox.join("old.pdf"), b"%PDF-1.4").unwrap();

        let service = WatchService::start(
            fx.orchestrator.clone(),
            WatchSettings {
                dir: inbox.clone(),
                workers: 2,
                scan_existing: true,
            },
        )
        .unwrap();

        assert!(wait_until(|| fx.orchestrator.ledger().contains("old.pdf")));

        std::fs::write(inbox.join("new.docx"), b"PK\x03\x04").unwrap();
        assert!(wait_until(|| fx.orchestrator.ledger().contains("new.docx")));

        drop(service);
        assert_eq!(fx.sink.calls(), 2);
    }
}
