// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! End-to-end integration tests for framewatch.
//!
//! These drive the public API from configuration to artifacts on disk.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use framewatch_core::capture::{NoLogTail, TriggerSink};
use framewatch_core::config::ConfigLoader;
use framewatch_core::crash::NullCrashReportSink;
use framewatch_core::detect::{
    NeverAttached, PrimaryContext, Probe, ResponsivenessWatchdog, WatchdogConfig,
};
use framewatch_core::{
    read_snapshot, AnomalyTrigger, BoundedCircularBuffer, DiagnosticFileWriter,
    FrameMetricsAggregator, FsDiagnosticWriter, HealthState, HubCollaborators, LivenessMonitor,
    ManualClock, ObservabilityHub, RotationPool, UnitId, UnitType,
};
use tempfile::TempDir;

fn hub_in(temp: &TempDir, yaml: &str, clock: Arc<ManualClock>) -> (ObservabilityHub, Arc<FsDiagnosticWriter>) {
    let mut config = ConfigLoader::load_string(yaml).expect("valid config");
    config.capture.output_dir = temp.path().to_path_buf();
    config.capture.min_free_bytes = 0;

    let writer = Arc::new(FsDiagnosticWriter::new(temp.path(), 0));
    let hub = ObservabilityHub::new(
        config,
        HubCollaborators {
            logs: Arc::new(NoLogTail),
            writer: writer.clone(),
            crash_sink: Arc::new(NullCrashReportSink),
            debugger: Arc::new(NeverAttached),
            clock,
        },
    );
    (hub, writer)
}

#[test]
fn test_ring_buffer_keeps_last_n_in_order() {
    let mut buffer = BoundedCircularBuffer::new(10);
    for i in 0..37 {
        buffer.add(i as f64);
    }
    let expected: Vec<f64> = (27..37).map(|i| i as f64).collect();
    assert_eq!(buffer.to_ordered_vec(), expected);
}

#[test]
fn test_percentiles_over_one_to_hundred() {
    let mut buffer = BoundedCircularBuffer::new(100);
    for i in 1..=100 {
        buffer.add(i as f64);
    }
    assert_eq!(buffer.percentile(0.5), Some(50.0));
    assert_eq!(buffer.percentile(0.95), Some(95.0));
    assert_eq!(buffer.percentile(0.99), Some(99.0));
    assert_eq!(buffer.percentile(0.0), Some(1.0));
    assert_eq!(buffer.percentile(1.0), Some(100.0));
}

#[test]
fn test_histogram_buckets() {
    let metrics = FrameMetricsAggregator::new();
    for duration in [5.0, 10.0, 15.0, 20.0, 30.0, 50.0] {
        metrics.record_frame(duration);
    }
    let snapshot = metrics.snapshot();
    assert_eq!(snapshot.frame_histogram, [1, 1, 1, 1, 1, 1]);
    assert_eq!(snapshot.total_frame_count, 6);
}

#[test]
fn test_concurrent_frame_recording() {
    let metrics = FrameMetricsAggregator::new_shared();
    let handles: Vec<_> = (0..100)
        .map(|_| {
            let metrics = metrics.clone();
            std::thread::spawn(move || {
                for _ in 0..100 {
                    metrics.record_frame(12.0);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(metrics.snapshot().total_frame_count, 10_000);
}

#[test]
fn test_liveness_scenarios() {
    let clock = Arc::new(ManualClock::new(0));
    let monitor = LivenessMonitor::with_clock(10_000, clock.clone());
    let ty = UnitType::new("calendar").unwrap();
    let stale = UnitId::new("stale").unwrap();
    let stalled = UnitId::new("stalled").unwrap();
    let crashed = UnitId::new("crashed").unwrap();

    monitor.report_data(&stale, &ty);
    monitor.report_data(&stalled, &ty);
    monitor.report_draw(&stalled, &ty);
    monitor.report_data(&crashed, &ty);
    monitor.report_crash(&crashed, &ty);

    clock.set(5_000);
    monitor.report_data(&stalled, &ty);

    clock.set(12_000);
    monitor.check_liveness();

    let statuses = monitor.all_statuses();
    assert_eq!(statuses[&stale].status, HealthState::StaleData);
    assert_eq!(statuses[&stalled].status, HealthState::StalledRender);
    assert_eq!(statuses[&crashed].status, HealthState::Crashed);

    monitor.report_data(&crashed, &ty);
    assert_eq!(monitor.status(&crashed), Some(HealthState::Active));
}

#[test]
fn test_jank_escalation_through_hub() {
    let temp = TempDir::new().unwrap();
    let (hub, writer) = hub_in(&temp, "", Arc::new(ManualClock::new(1_000)));

    for _ in 0..4 {
        assert!(hub.on_frame(20.0).is_none());
    }
    assert!(hub.flush_captures());
    assert!(writer.list_entries(RotationPool::Perf).unwrap().is_empty());

    let mut fired = Vec::new();
    for _ in 4..100 {
        if let Some(AnomalyTrigger::JankSpike { consecutive_frames }) = hub.on_frame(20.0) {
            fired.push(consecutive_frames);
            assert!(hub.flush_captures());
        }
    }
    assert_eq!(fired, vec![5, 20, 100]);
    assert_eq!(writer.list_entries(RotationPool::Perf).unwrap().len(), 3);

    hub.on_frame(10.0);
    for _ in 0..4 {
        assert!(hub.on_frame(20.0).is_none());
    }
}

#[test]
fn test_crash_rotation_through_hub() {
    let temp = TempDir::new().unwrap();
    let (hub, writer) = hub_in(&temp, "", Arc::new(ManualClock::new(1_000)));
    let ty = UnitType::new("clock").unwrap();

    let mut first_ids = Vec::new();
    for n in 0..22 {
        let id = UnitId::new(format!("unit-{}", n)).unwrap();
        hub.report_crash(&id, &ty, "boom");
        assert!(hub.flush_captures());
        if n < 2 {
            first_ids.push(id);
        }
    }

    let entries = writer.list_entries(RotationPool::Crash).unwrap();
    assert_eq!(entries.len(), 20);
    let survivors: Vec<_> = entries
        .iter()
        .map(|e| read_snapshot(&e.path).unwrap().trigger)
        .collect();
    for id in &first_ids {
        assert!(!survivors.iter().any(|t| matches!(
            t,
            AnomalyTrigger::UnitCrash { unit_id, .. } if unit_id == id
        )));
    }
}

#[test]
fn test_small_pool_ceiling_from_config() {
    let temp = TempDir::new().unwrap();
    let (hub, writer) = hub_in(
        &temp,
        "capture:\n  max_entries_per_pool: 3\n",
        Arc::new(ManualClock::new(1_000)),
    );
    for _ in 0..6 {
        hub.capture_now(AnomalyTrigger::AnrDetected);
    }
    assert_eq!(writer.list_entries(RotationPool::Perf).unwrap().len(), 3);
}

struct PressuredWriter {
    inner: FsDiagnosticWriter,
    pressure: AtomicBool,
}

impl DiagnosticFileWriter for PressuredWriter {
    fn write(
        &self,
        snapshot: &framewatch_core::DiagnosticSnapshot,
        pool: RotationPool,
    ) -> Result<framewatch_core::capture::PoolEntry, framewatch_core::CaptureError> {
        self.inner.write(snapshot, pool)
    }

    fn check_storage_pressure(&self) -> bool {
        self.pressure.load(Ordering::SeqCst)
    }

    fn list_entries(
        &self,
        pool: RotationPool,
    ) -> Result<Vec<framewatch_core::capture::PoolEntry>, framewatch_core::CaptureError> {
        self.inner.list_entries(pool)
    }

    fn delete_entry(
        &self,
        entry: &framewatch_core::capture::PoolEntry,
    ) -> Result<(), framewatch_core::CaptureError> {
        self.inner.delete_entry(entry)
    }
}

#[test]
fn test_storage_pressure_blocks_capture() {
    let temp = TempDir::new().unwrap();
    let writer = Arc::new(PressuredWriter {
        inner: FsDiagnosticWriter::new(temp.path(), 0),
        pressure: AtomicBool::new(true),
    });
    let hub = ObservabilityHub::new(
        Default::default(),
        HubCollaborators {
            logs: Arc::new(NoLogTail),
            writer: writer.clone(),
            crash_sink: Arc::new(NullCrashReportSink),
            debugger: Arc::new(NeverAttached),
            clock: Arc::new(ManualClock::new(1)),
        },
    );

    assert!(hub.capture_now(AnomalyTrigger::AnrDetected).is_none());
    assert!(!writer.inner.pool_dir(RotationPool::Perf).exists());

    writer.pressure.store(false, Ordering::SeqCst);
    assert!(hub.capture_now(AnomalyTrigger::AnrDetected).is_some());
}

#[test]
fn test_config_file_round_trip() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("framewatch.yaml");
    std::fs::write(
        &path,
        "frames:\n  jank_threshold_ms: 33\nthermal:\n  capture_floor: moderate\n",
    )
    .unwrap();

    let config = ConfigLoader::load_file(&path).unwrap();
    assert_eq!(config.frames.jank_threshold_ms, 33.0);
    assert_eq!(
        config.thermal.capture_floor,
        framewatch_core::ThermalState::Moderate
    );
}

/// Primary context whose probes only run while `responsive` is set.
struct SwitchablePrimary {
    responsive: Arc<AtomicBool>,
}

impl PrimaryContext for SwitchablePrimary {
    fn post(&self, probe: Probe) -> bool {
        if self.responsive.load(Ordering::SeqCst) {
            probe();
        }
        true
    }
}

struct CountingSink(std::sync::atomic::AtomicUsize);

impl TriggerSink for CountingSink {
    fn request_capture(&self, _trigger: AnomalyTrigger) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_watchdog_detects_stalled_primary() {
    let responsive = Arc::new(AtomicBool::new(true));
    let sink = Arc::new(CountingSink(Default::default()));
    let watchdog = ResponsivenessWatchdog::with_clock(
        WatchdogConfig {
            timeout: Duration::from_millis(20),
            miss_threshold: 2,
        },
        Arc::new(SwitchablePrimary {
            responsive: responsive.clone(),
        }),
        Arc::new(NeverAttached),
        sink.clone(),
        Arc::new(ManualClock::new(42)),
    );

    assert!(watchdog.start());
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(watchdog.query().is_none());

    responsive.store(false, Ordering::SeqCst);
    let mut detected = false;
    for _ in 0..100 {
        if watchdog.query().is_some() {
            detected = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(detected);
    assert_eq!(watchdog.query().unwrap().detected_at_ms, 42);

    watchdog.stop();
    assert!(!watchdog.is_running());
    assert_eq!(sink.0.load(Ordering::SeqCst), 1);
}
