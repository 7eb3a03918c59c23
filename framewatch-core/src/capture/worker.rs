// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Dedicated capture thread.
//!
//! Detectors run on the render path, on producer threads and on timer tasks.
//! None of them may touch the filesystem, so capture requests are handed over
//! a bounded channel to one thread that owns all capture I/O. A request that
//! arrives while a capture is running or already queued is dropped, the same
//! outcome the in-flight flag gives a direct caller.

use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::sync::Arc;
use std::thread;

use crate::capture::pipeline::DiagnosticCapture;
use crate::capture::sinks::TriggerSink;
use crate::types::AnomalyTrigger;

/// One capture may wait while another runs.
const CHANNEL_BOUND: usize = 1;

enum CaptureCommand {
    Capture(AnomalyTrigger),
    /// Acknowledged once every command queued before it has been handled.
    Flush(SyncSender<()>),
}

/// Runs captures on a dedicated thread; requests never block the caller.
pub struct CaptureWorker {
    capture: Arc<DiagnosticCapture>,
    tx: Option<SyncSender<CaptureCommand>>,
}

impl CaptureWorker {
    /// Spawn the capture thread. If the thread cannot be spawned every
    /// request is counted as dropped.
    pub fn spawn(capture: Arc<DiagnosticCapture>) -> Self {
        let (tx, rx) = mpsc::sync_channel(CHANNEL_BOUND);
        let worker_capture = Arc::clone(&capture);

        let tx = match thread::Builder::new()
            .name("framewatch-capture".to_string())
            .spawn(move || worker_loop(&worker_capture, rx))
        {
            Ok(_) => Some(tx),
            Err(e) => {
                tracing::error!(error = %e, "Failed to spawn capture thread, captures disabled");
                None
            }
        };

        Self { capture, tx }
    }

    /// Block until every capture queued so far has finished. Returns false
    /// if the capture thread is gone.
    pub fn flush(&self) -> bool {
        let Some(tx) = self.tx.as_ref() else {
            return false;
        };
        let (done_tx, done_rx) = mpsc::sync_channel(0);
        if tx.send(CaptureCommand::Flush(done_tx)).is_err() {
            return false;
        }
        done_rx.recv().is_ok()
    }
}

impl TriggerSink for CaptureWorker {
    fn request_capture(&self, trigger: AnomalyTrigger) {
        if self.capture.is_in_progress() {
            self.capture.note_dropped(&trigger);
            return;
        }
        let Some(tx) = self.tx.as_ref() else {
            self.capture.note_dropped(&trigger);
            return;
        };
        match tx.try_send(CaptureCommand::Capture(trigger)) {
            Ok(()) => {}
            Err(TrySendError::Full(CaptureCommand::Capture(trigger))) => {
                self.capture.note_dropped(&trigger);
            }
            Err(TrySendError::Disconnected(CaptureCommand::Capture(trigger))) => {
                tracing::error!(trigger = %trigger, "Capture thread gone, request dropped");
                self.capture.note_dropped(&trigger);
            }
            Err(_) => {}
        }
    }
}

impl std::fmt::Debug for CaptureWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureWorker")
            .field("running", &self.tx.is_some())
            .finish_non_exhaustive()
    }
}

/// Ends when the worker (the only sender) is dropped.
fn worker_loop(capture: &DiagnosticCapture, rx: Receiver<CaptureCommand>) {
    while let Ok(command) = rx.recv() {
        match command {
            CaptureCommand::Capture(trigger) => {
                capture.capture(trigger);
            }
            CaptureCommand::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
    tracing::debug!("Capture thread exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::pipeline::CaptureConfig;
    use crate::capture::snapshot::DiagnosticSnapshot;
    use crate::capture::writer::{DiagnosticFileWriter, PoolEntry};
    use crate::clock::ManualClock;
    use crate::error::CaptureError;
    use crate::metrics::FrameMetricsAggregator;
    use crate::trace::SpanTracker;
    use crate::capture::sinks::NoLogTail;
    use crate::types::RotationPool;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::{Duration, Instant};

    /// Writer that takes `delay` per write and keeps entries in memory.
    #[derive(Default)]
    struct SlowWriter {
        delay: Duration,
        writes: AtomicUsize,
        entries: Mutex<Vec<PoolEntry>>,
    }

    impl DiagnosticFileWriter for SlowWriter {
        fn write(
            &self,
            snapshot: &DiagnosticSnapshot,
            pool: RotationPool,
        ) -> Result<PoolEntry, CaptureError> {
            std::thread::sleep(self.delay);
            self.writes.fetch_add(1, Ordering::SeqCst);
            let entry = PoolEntry {
                pool,
                name: snapshot.id.clone(),
                path: std::path::PathBuf::from(&snapshot.id),
            };
            self.entries.lock().unwrap().push(entry.clone());
            Ok(entry)
        }

        fn check_storage_pressure(&self) -> bool {
            false
        }

        fn list_entries(&self, pool: RotationPool) -> Result<Vec<PoolEntry>, CaptureError> {
            Ok(self
                .entries
                .lock()
                .unwrap()
                .iter()
                .filter(|e| e.pool == pool)
                .cloned()
                .collect())
        }

        fn delete_entry(&self, entry: &PoolEntry) -> Result<(), CaptureError> {
            self.entries.lock().unwrap().retain(|e| e.name != entry.name);
            Ok(())
        }
    }

    fn worker(delay: Duration) -> (CaptureWorker, Arc<DiagnosticCapture>, Arc<SlowWriter>) {
        let writer = Arc::new(SlowWriter {
            delay,
            ..Default::default()
        });
        let capture = Arc::new(DiagnosticCapture::new(
            FrameMetricsAggregator::new_shared(),
            SpanTracker::new_shared(),
            Arc::new(NoLogTail),
            writer.clone(),
            Arc::new(ManualClock::new(1_000)),
            CaptureConfig::default(),
        ));
        (CaptureWorker::spawn(capture.clone()), capture, writer)
    }

    #[test]
    fn test_request_does_not_wait_for_io() {
        let (worker, _capture, writer) = worker(Duration::from_millis(300));

        let started = Instant::now();
        worker.request_capture(AnomalyTrigger::AnrDetected);
        assert!(started.elapsed() < Duration::from_millis(50));

        assert!(worker.flush());
        assert_eq!(writer.writes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_requests_during_capture_are_dropped() {
        let (worker, capture, writer) = worker(Duration::from_millis(200));

        for _ in 0..5 {
            worker.request_capture(AnomalyTrigger::AnrDetected);
        }
        assert!(worker.flush());

        let stats = capture.stats();
        assert_eq!(stats.captured as usize, writer.writes.load(Ordering::SeqCst));
        assert!(stats.captured >= 1 && stats.captured <= 2);
        assert_eq!(stats.captured + stats.dropped_in_flight, 5);
    }

    #[test]
    fn test_flush_orders_after_queued_capture() {
        let (worker, capture, _writer) = worker(Duration::from_millis(20));
        for _ in 0..3 {
            worker.request_capture(AnomalyTrigger::AnrDetected);
            assert!(worker.flush());
        }
        assert_eq!(capture.stats().captured, 3);
    }
}
