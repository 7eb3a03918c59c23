// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Observability hub.
//!
//! Builds one instance of every component from a [`FrameWatchConfig`] and the
//! host's collaborators, then routes host events to them. The host owns the
//! hub and passes it (or the component handles it exposes) to whoever needs
//! them; there are no process-wide globals.
//!
//! Capture requests from host events and detectors go to a dedicated capture
//! thread, so render-path, producer and timer callers never perform file I/O.
//! [`ObservabilityHub::capture_now`] is the only synchronous entry point.

use std::sync::{Arc, Mutex, PoisonError};

use tokio::runtime::Handle;

use crate::capture::{
    CaptureWorker, DiagnosticCapture, DiagnosticFileWriter, DiagnosticSnapshot,
    FsDiagnosticWriter, LogRingBufferSink, NoLogTail, TriggerSink,
};
use crate::clock::{Clock, SystemClock};
use crate::config::FrameWatchConfig;
use crate::crash::{CrashReportSink, DedupCrashReporter, NullCrashReportSink};
use crate::detect::{
    DebuggerProbe, JankDetector, PrimaryContext, ResponsivenessWatchdog, ThermalMonitor,
    TracerPidProbe,
};
use crate::liveness::{LivenessMonitor, SweeperHandle};
use crate::metrics::FrameMetricsAggregator;
use crate::trace::SpanTracker;
use crate::types::{AnomalyTrigger, ThermalState, UnitId, UnitType};

/// External collaborators the hub is wired to.
pub struct HubCollaborators {
    pub logs: Arc<dyn LogRingBufferSink>,
    pub writer: Arc<dyn DiagnosticFileWriter>,
    pub crash_sink: Arc<dyn CrashReportSink>,
    pub debugger: Arc<dyn DebuggerProbe>,
    pub clock: Arc<dyn Clock>,
}

impl HubCollaborators {
    /// Filesystem writer under `capture.output_dir`, no log tail, no crash
    /// backend, `/proc` tracer detection and the system clock.
    pub fn from_config(config: &FrameWatchConfig) -> Self {
        Self {
            logs: Arc::new(NoLogTail),
            writer: Arc::new(FsDiagnosticWriter::new(
                config.capture.output_dir.clone(),
                config.capture.min_free_bytes,
            )),
            crash_sink: Arc::new(NullCrashReportSink),
            debugger: Arc::new(TracerPidProbe),
            clock: Arc::new(SystemClock),
        }
    }
}

/// Owns and wires every observability component.
pub struct ObservabilityHub {
    config: FrameWatchConfig,
    clock: Arc<dyn Clock>,
    debugger: Arc<dyn DebuggerProbe>,
    metrics: Arc<FrameMetricsAggregator>,
    tracer: Arc<SpanTracker>,
    liveness: Arc<LivenessMonitor>,
    jank: JankDetector,
    thermal: ThermalMonitor,
    crash_reporter: DedupCrashReporter,
    capture: Arc<DiagnosticCapture>,
    worker: Arc<CaptureWorker>,
    watchdog: Mutex<Option<Arc<ResponsivenessWatchdog>>>,
    sweeper: Mutex<Option<SweeperHandle>>,
}

impl ObservabilityHub {
    pub fn new(config: FrameWatchConfig, collaborators: HubCollaborators) -> Self {
        let HubCollaborators {
            logs,
            writer,
            crash_sink,
            debugger,
            clock,
        } = collaborators;

        let metrics = Arc::new(FrameMetricsAggregator::with_capacities(
            config.frames.unit_buffer_capacity,
            config.frames.source_buffer_capacity,
        ));
        let tracer = Arc::new(SpanTracker::with_clock(Arc::clone(&clock)));
        let liveness = Arc::new(LivenessMonitor::with_clock(
            config.liveness.staleness_threshold_ms,
            Arc::clone(&clock),
        ));

        let capture = Arc::new(DiagnosticCapture::new(
            Arc::clone(&metrics),
            Arc::clone(&tracer),
            logs,
            writer,
            Arc::clone(&clock),
            config.capture.to_capture_config(),
        ));
        let worker = Arc::new(CaptureWorker::spawn(Arc::clone(&capture)));
        let sink: Arc<dyn TriggerSink> = worker.clone();

        let jank = JankDetector::new(config.frames.jank_threshold_ms, Arc::clone(&sink));
        let thermal = ThermalMonitor::new(config.thermal.capture_floor, sink);
        let crash_reporter = DedupCrashReporter::with_clock(
            crash_sink,
            config.crash.dedup_window_ms,
            Arc::clone(&clock),
        );

        Self {
            config,
            clock,
            debugger,
            metrics,
            tracer,
            liveness,
            jank,
            thermal,
            crash_reporter,
            capture,
            worker,
            watchdog: Mutex::new(None),
            sweeper: Mutex::new(None),
        }
    }

    /// Hub with the default collaborators for `config`.
    pub fn from_config(config: FrameWatchConfig) -> Self {
        let collaborators = HubCollaborators::from_config(&config);
        Self::new(config, collaborators)
    }

    // =========================================================================
    // Host events
    // =========================================================================

    /// Render path: one frame finished.
    pub fn on_frame(&self, duration_ms: f64) -> Option<AnomalyTrigger> {
        self.metrics.record_frame(duration_ms);
        self.jank.on_frame_rendered(duration_ms)
    }

    /// A unit finished drawing; feeds both its draw-time buffer and liveness.
    pub fn on_unit_draw(&self, id: &UnitId, unit_type: &UnitType, duration_ms: f64) {
        self.metrics.record_unit_draw(id.as_str(), duration_ms);
        self.liveness.report_draw(id, unit_type);
    }

    pub fn report_data(&self, id: &UnitId, unit_type: &UnitType) {
        self.liveness.report_data(id, unit_type);
    }

    pub fn report_draw(&self, id: &UnitId, unit_type: &UnitType) {
        self.liveness.report_draw(id, unit_type);
    }

    pub fn report_setup_required(&self, id: &UnitId, unit_type: &UnitType) {
        self.liveness.report_setup_required(id, unit_type);
    }

    /// Mark the unit crashed, forward to the crash backend (deduplicated)
    /// and request a crash-pool capture.
    pub fn report_crash(&self, id: &UnitId, unit_type: &UnitType, error_summary: &str) {
        self.liveness.report_crash(id, unit_type);
        self.crash_reporter.report(unit_type, id, error_summary);
        self.worker.request_capture(AnomalyTrigger::UnitCrash {
            unit_type: unit_type.clone(),
            unit_id: id.clone(),
            error_summary: error_summary.to_string(),
        });
    }

    pub fn on_thermal_state(&self, state: ThermalState) -> Option<AnomalyTrigger> {
        self.thermal.on_thermal_state(state)
    }

    /// Capture on the caller's thread. Never call this from the render path.
    pub fn capture_now(&self, trigger: AnomalyTrigger) -> Option<DiagnosticSnapshot> {
        self.capture.capture(trigger)
    }

    /// Block until every capture requested so far has finished.
    /// Returns false if the capture thread is gone.
    pub fn flush_captures(&self) -> bool {
        self.worker.flush()
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Start background work on `runtime`: the responsiveness watchdog (if
    /// enabled) probing `primary`, and the periodic liveness sweep.
    /// Restarting replaces any previous background work.
    pub fn start(&self, primary: Arc<dyn PrimaryContext>, runtime: &Handle) {
        self.shutdown();

        if self.config.watchdog.enabled {
            let sink: Arc<dyn TriggerSink> = self.worker.clone();
            let watchdog = Arc::new(ResponsivenessWatchdog::with_clock(
                self.config.watchdog.to_watchdog_config(),
                primary,
                Arc::clone(&self.debugger),
                sink,
                Arc::clone(&self.clock),
            ));
            watchdog.start_on(runtime);
            *self.watchdog.lock().unwrap_or_else(PoisonError::into_inner) = Some(watchdog);
        }

        let sweeper = {
            let _entered = runtime.enter();
            self.liveness
                .spawn_sweeper(self.config.liveness.sweep_interval())
        };
        *self.sweeper.lock().unwrap_or_else(PoisonError::into_inner) = Some(sweeper);

        tracing::info!(
            watchdog = self.config.watchdog.enabled,
            sweep_interval_ms = self.config.liveness.sweep_interval_ms,
            "Observability hub started"
        );
    }

    /// Stop the watchdog and the sweeper. No probe callback has any effect
    /// after this returns. Host events keep being handled.
    pub fn shutdown(&self) {
        let watchdog = self
            .watchdog
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let sweeper = self
            .sweeper
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let was_running = watchdog.is_some() || sweeper.is_some();

        if let Some(watchdog) = watchdog {
            watchdog.stop();
        }
        if let Some(mut sweeper) = sweeper {
            sweeper.stop();
        }

        if was_running {
            tracing::info!("Observability hub stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.sweeper
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(SweeperHandle::is_running)
    }

    // =========================================================================
    // Component access
    // =========================================================================

    pub fn config(&self) -> &FrameWatchConfig {
        &self.config
    }

    pub fn metrics(&self) -> &Arc<FrameMetricsAggregator> {
        &self.metrics
    }

    pub fn tracer(&self) -> &Arc<SpanTracker> {
        &self.tracer
    }

    pub fn liveness(&self) -> &Arc<LivenessMonitor> {
        &self.liveness
    }

    pub fn jank(&self) -> &JankDetector {
        &self.jank
    }

    pub fn thermal(&self) -> &ThermalMonitor {
        &self.thermal
    }

    pub fn crash_reporter(&self) -> &DedupCrashReporter {
        &self.crash_reporter
    }

    pub fn capture(&self) -> &Arc<DiagnosticCapture> {
        &self.capture
    }

    /// The running watchdog, if the hub is started with the watchdog enabled.
    pub fn watchdog(&self) -> Option<Arc<ResponsivenessWatchdog>> {
        self.watchdog
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Drop for ObservabilityHub {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for ObservabilityHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObservabilityHub")
            .field("config", &self.config)
            .field("running", &self.is_running())
            .field("capture", &self.capture)
            .finish_non_exhaustive()
    }
}
