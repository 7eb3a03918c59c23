// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Single-flight capture orchestrator.
//!
//! A capture passes two gates before anything is assembled:
//!
//! 1. the in-flight flag (compare-and-set; losers return `None` immediately)
//! 2. the writer's storage-pressure predicate
//!
//! Everything after the first gate runs inside `catch_unwind` so a faulty
//! collaborator costs one snapshot, never the host.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;

use crate::capture::sinks::{LogRingBufferSink, TriggerSink};
use crate::capture::snapshot::DiagnosticSnapshot;
use crate::capture::writer::{enforce_pool_ceiling, DiagnosticFileWriter};
use crate::clock::Clock;
use crate::error::CaptureError;
use crate::metrics::FrameMetricsAggregator;
use crate::trace::SpanTracker;
use crate::types::AnomalyTrigger;

/// Default entry ceiling of each rotation pool.
pub const DEFAULT_MAX_ENTRIES_PER_POOL: usize = 20;

/// Default number of log lines included in a snapshot.
pub const DEFAULT_LOG_TAIL_LINES: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureConfig {
    pub max_entries_per_pool: usize,
    pub log_tail_lines: usize,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            max_entries_per_pool: DEFAULT_MAX_ENTRIES_PER_POOL,
            log_tail_lines: DEFAULT_LOG_TAIL_LINES,
        }
    }
}

/// Outcome counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CaptureStats {
    pub captured: u64,
    pub dropped_in_flight: u64,
    pub skipped_pressure: u64,
    pub failed: u64,
}

#[derive(Debug, Default)]
struct Counters {
    captured: AtomicU64,
    dropped_in_flight: AtomicU64,
    skipped_pressure: AtomicU64,
    failed: AtomicU64,
}

/// Clears the in-flight flag however the capture ends.
struct InFlightGuard<'a>(&'a AtomicBool);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Turns anomaly triggers into persisted snapshots.
pub struct DiagnosticCapture {
    metrics: Arc<FrameMetricsAggregator>,
    tracer: Arc<SpanTracker>,
    logs: Arc<dyn LogRingBufferSink>,
    writer: Arc<dyn DiagnosticFileWriter>,
    clock: Arc<dyn Clock>,
    config: CaptureConfig,
    in_progress: AtomicBool,
    sequence: AtomicU64,
    counters: Counters,
}

impl DiagnosticCapture {
    pub fn new(
        metrics: Arc<FrameMetricsAggregator>,
        tracer: Arc<SpanTracker>,
        logs: Arc<dyn LogRingBufferSink>,
        writer: Arc<dyn DiagnosticFileWriter>,
        clock: Arc<dyn Clock>,
        config: CaptureConfig,
    ) -> Self {
        Self {
            metrics,
            tracer,
            logs,
            writer,
            clock,
            config,
            in_progress: AtomicBool::new(false),
            sequence: AtomicU64::new(0),
            counters: Counters::default(),
        }
    }

    pub fn config(&self) -> CaptureConfig {
        self.config
    }

    pub fn writer(&self) -> &Arc<dyn DiagnosticFileWriter> {
        &self.writer
    }

    pub fn is_in_progress(&self) -> bool {
        self.in_progress.load(Ordering::Acquire)
    }

    /// Count a request that was dropped because another capture was running.
    pub fn note_dropped(&self, trigger: &AnomalyTrigger) {
        self.counters.dropped_in_flight.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(trigger = %trigger, "Capture already in flight, request dropped");
    }

    pub fn stats(&self) -> CaptureStats {
        CaptureStats {
            captured: self.counters.captured.load(Ordering::Relaxed),
            dropped_in_flight: self.counters.dropped_in_flight.load(Ordering::Relaxed),
            skipped_pressure: self.counters.skipped_pressure.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
        }
    }

    /// Capture and persist a snapshot for `trigger`.
    ///
    /// Returns `None` when another capture is in flight, when storage is under
    /// pressure, or when assembling or writing failed. Never panics.
    pub fn capture(&self, trigger: AnomalyTrigger) -> Option<DiagnosticSnapshot> {
        let Some(_guard) = self.try_begin() else {
            self.note_dropped(&trigger);
            return None;
        };

        let under_pressure = match catch_unwind(AssertUnwindSafe(|| {
            self.writer.check_storage_pressure()
        })) {
            Ok(pressure) => pressure,
            Err(payload) => {
                self.record_failure(&trigger, &panic_error(payload));
                return None;
            }
        };
        if under_pressure {
            self.counters.skipped_pressure.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(trigger = %trigger, "Storage pressure, capture skipped");
            return None;
        }

        let result = catch_unwind(AssertUnwindSafe(|| self.assemble_and_write(&trigger)))
            .unwrap_or_else(|payload| Err(panic_error(payload)));

        match result {
            Ok(snapshot) => {
                self.counters.captured.fetch_add(1, Ordering::Relaxed);
                Some(snapshot)
            }
            Err(e) => {
                self.record_failure(&trigger, &e);
                None
            }
        }
    }

    /// Test-and-set of the in-flight flag, retried on spurious CAS failure.
    fn try_begin(&self) -> Option<InFlightGuard<'_>> {
        loop {
            match self.in_progress.compare_exchange_weak(
                false,
                true,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Some(InFlightGuard(&self.in_progress)),
                Err(true) => return None,
                Err(false) => std::hint::spin_loop(),
            }
        }
    }

    fn assemble_and_write(&self, trigger: &AnomalyTrigger) -> Result<DiagnosticSnapshot, CaptureError> {
        let pool = trigger.pool();
        let snapshot = DiagnosticSnapshot {
            id: uuid::Uuid::new_v4().simple().to_string(),
            sequence: self.sequence.fetch_add(1, Ordering::Relaxed),
            trigger: trigger.clone(),
            pool,
            timestamp_ms: self.clock.now_ms(),
            metrics: self.metrics.snapshot(),
            log_tail: self.logs.recent_lines(self.config.log_tail_lines),
            active_spans: self.tracer.active_spans(),
        };

        let entry = self.writer.write(&snapshot, pool)?;
        tracing::info!(
            trigger = %trigger,
            pool = %pool,
            snapshot_id = %snapshot.id,
            artifact = %entry.name,
            "Diagnostic snapshot persisted"
        );

        // The artifact is on disk; a failed eviction is retried by the next capture.
        if let Err(e) =
            enforce_pool_ceiling(self.writer.as_ref(), pool, self.config.max_entries_per_pool)
        {
            tracing::warn!(pool = %pool, error = %e, "Rotation pool eviction failed");
        }
        Ok(snapshot)
    }

    fn record_failure(&self, trigger: &AnomalyTrigger, error: &CaptureError) {
        self.counters.failed.fetch_add(1, Ordering::Relaxed);
        tracing::error!(trigger = %trigger, error = %error, "Diagnostic capture failed");
    }
}

fn panic_error(payload: Box<dyn std::any::Any + Send>) -> CaptureError {
    let reason = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    CaptureError::Panicked { reason }
}

impl TriggerSink for DiagnosticCapture {
    fn request_capture(&self, trigger: AnomalyTrigger) {
        self.capture(trigger);
    }
}

impl std::fmt::Debug for DiagnosticCapture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiagnosticCapture")
            .field("config", &self.config)
            .field("in_progress", &self.is_in_progress())
            .field("stats", &self.stats())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::sinks::NoLogTail;
    use crate::capture::writer::{FsDiagnosticWriter, PoolEntry};
    use crate::clock::ManualClock;
    use crate::types::{RotationPool, UnitId, UnitType};
    use std::sync::mpsc;
    use std::sync::Mutex;
    use std::time::Duration;
    use tempfile::TempDir;

    struct FixedLogs(Vec<String>);

    impl LogRingBufferSink for FixedLogs {
        fn recent_lines(&self, max_lines: usize) -> Vec<String> {
            let skip = self.0.len().saturating_sub(max_lines);
            self.0[skip..].to_vec()
        }
    }

    /// Writer that counts writes and can be told to block, panic or report pressure.
    #[derive(Default)]
    struct ScriptedWriter {
        writes: AtomicU64,
        pressure: AtomicBool,
        panic_on_write: AtomicBool,
        fail_listing: AtomicBool,
        gate: Mutex<Option<(mpsc::Sender<()>, mpsc::Receiver<()>)>>,
    }

    impl DiagnosticFileWriter for ScriptedWriter {
        fn write(
            &self,
            snapshot: &DiagnosticSnapshot,
            pool: RotationPool,
        ) -> Result<PoolEntry, CaptureError> {
            if self.panic_on_write.load(Ordering::SeqCst) {
                panic!("disk on fire");
            }
            if let Some((entered, release)) = self.gate.lock().unwrap().take() {
                entered.send(()).unwrap();
                release.recv().unwrap();
            }
            self.writes.fetch_add(1, Ordering::SeqCst);
            Ok(PoolEntry {
                pool,
                name: snapshot.artifact_name(),
                path: snapshot.artifact_name().into(),
            })
        }

        fn check_storage_pressure(&self) -> bool {
            self.pressure.load(Ordering::SeqCst)
        }

        fn list_entries(&self, pool: RotationPool) -> Result<Vec<PoolEntry>, CaptureError> {
            if self.fail_listing.load(Ordering::SeqCst) {
                return Err(CaptureError::EvictionFailed {
                    pool,
                    reason: "directory unreadable".to_string(),
                });
            }
            Ok(Vec::new())
        }

        fn delete_entry(&self, _entry: &PoolEntry) -> Result<(), CaptureError> {
            Ok(())
        }
    }

    fn pipeline(writer: Arc<dyn DiagnosticFileWriter>) -> DiagnosticCapture {
        DiagnosticCapture::new(
            FrameMetricsAggregator::new_shared(),
            SpanTracker::new_shared(),
            Arc::new(NoLogTail),
            writer,
            Arc::new(ManualClock::new(1_000)),
            CaptureConfig::default(),
        )
    }

    fn crash(n: usize) -> AnomalyTrigger {
        AnomalyTrigger::UnitCrash {
            unit_type: UnitType::new("clock").unwrap(),
            unit_id: UnitId::new(format!("unit-{}", n)).unwrap(),
            error_summary: "boom".to_string(),
        }
    }

    #[test]
    fn test_snapshot_contents() {
        let temp = TempDir::new().unwrap();
        let metrics = FrameMetricsAggregator::new_shared();
        let tracer = SpanTracker::new_shared();
        metrics.record_frame(40.0);

        let capture = DiagnosticCapture::new(
            metrics,
            tracer.clone(),
            Arc::new(FixedLogs(vec!["a".into(), "b".into(), "c".into()])),
            Arc::new(FsDiagnosticWriter::new(temp.path(), 0)),
            Arc::new(ManualClock::new(5_000)),
            CaptureConfig {
                max_entries_per_pool: 20,
                log_tail_lines: 2,
            },
        );

        let snapshot = tracer
            .with_span(None, "render", |_| capture.capture(AnomalyTrigger::AnrDetected))
            .unwrap();

        assert_eq!(snapshot.pool, RotationPool::Perf);
        assert_eq!(snapshot.timestamp_ms, 5_000);
        assert_eq!(snapshot.metrics.total_frame_count, 1);
        assert_eq!(snapshot.log_tail, vec!["b".to_string(), "c".to_string()]);
        assert_eq!(snapshot.active_spans.len(), 1);
        assert_eq!(snapshot.active_spans[0].name, "render");
        assert!(!capture.is_in_progress());
    }

    #[test]
    fn test_concurrent_capture_is_dropped() {
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        let writer = Arc::new(ScriptedWriter::default());
        *writer.gate.lock().unwrap() = Some((entered_tx, release_rx));
        let capture = Arc::new(pipeline(writer.clone()));

        let first = {
            let capture = capture.clone();
            std::thread::spawn(move || capture.capture(AnomalyTrigger::AnrDetected))
        };
        entered_rx.recv_timeout(Duration::from_secs(5)).unwrap();

        assert!(capture.is_in_progress());
        assert!(capture.capture(AnomalyTrigger::AnrDetected).is_none());
        assert_eq!(capture.stats().dropped_in_flight, 1);

        release_tx.send(()).unwrap();
        assert!(first.join().unwrap().is_some());

        assert!(capture.capture(AnomalyTrigger::AnrDetected).is_some());
        assert_eq!(writer.writes.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_rotation_keeps_newest_twenty() {
        let temp = TempDir::new().unwrap();
        let writer = Arc::new(FsDiagnosticWriter::new(temp.path(), 0));
        let capture = pipeline(writer.clone());

        let ids: Vec<String> = (0..22)
            .map(|n| capture.capture(crash(n)).unwrap().id)
            .collect();

        let remaining = writer.list_entries(RotationPool::Crash).unwrap();
        assert_eq!(remaining.len(), 20);
        assert!(remaining[0].name.contains(&ids[2]));
        assert!(remaining[19].name.contains(&ids[21]));
        assert!(!remaining.iter().any(|e| e.name.contains(&ids[0])));
        assert!(!remaining.iter().any(|e| e.name.contains(&ids[1])));
        assert!(writer.list_entries(RotationPool::Perf).unwrap().is_empty());
    }

    #[test]
    fn test_storage_pressure_skips_write() {
        let writer = Arc::new(ScriptedWriter::default());
        writer.pressure.store(true, Ordering::SeqCst);
        let capture = pipeline(writer.clone());

        assert!(capture.capture(AnomalyTrigger::AnrDetected).is_none());
        assert_eq!(writer.writes.load(Ordering::SeqCst), 0);
        assert_eq!(capture.stats().skipped_pressure, 1);
        assert!(!capture.is_in_progress());
    }

    #[test]
    fn test_panicking_writer_releases_flag() {
        let writer = Arc::new(ScriptedWriter::default());
        writer.panic_on_write.store(true, Ordering::SeqCst);
        let capture = pipeline(writer.clone());

        assert!(capture.capture(AnomalyTrigger::AnrDetected).is_none());
        assert!(!capture.is_in_progress());
        assert_eq!(capture.stats().failed, 1);

        writer.panic_on_write.store(false, Ordering::SeqCst);
        assert!(capture.capture(AnomalyTrigger::AnrDetected).is_some());
    }

    #[test]
    fn test_failed_eviction_keeps_persisted_snapshot() {
        let writer = Arc::new(ScriptedWriter::default());
        writer.fail_listing.store(true, Ordering::SeqCst);
        let capture = pipeline(writer.clone());

        assert!(capture.capture(AnomalyTrigger::AnrDetected).is_some());
        assert_eq!(writer.writes.load(Ordering::SeqCst), 1);
        let stats = capture.stats();
        assert_eq!(stats.captured, 1);
        assert_eq!(stats.failed, 0);
    }

    #[test]
    fn test_snapshot_ids_are_unique() {
        let capture = pipeline(Arc::new(ScriptedWriter::default()));
        let a = capture.capture(AnomalyTrigger::AnrDetected).unwrap();
        let b = capture.capture(AnomalyTrigger::AnrDetected).unwrap();
        assert_ne!(a.id, b.id);
        assert!(b.sequence > a.sequence);
    }
}
