// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Responsiveness watchdog for the host's primary execution context.
//!
//! A background task posts a no-op probe onto the primary context once per
//! timeout window and waits for it to run. A probe that does not complete in
//! time is a miss. Unresponsiveness is declared once `miss_threshold`
//! consecutive misses accumulate (a single miss is never enough, the primary
//! context may just be in a long GC pause or a short blocking call), and it
//! is declared once per stall: a completed probe resets the count.
//!
//! Detection is suppressed entirely while a debugger is attached.
//!
//! `stop()` is a hard cancellation: once it returns, no probe posted earlier
//! can signal completion and the timer task is aborted.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::capture::TriggerSink;
use crate::clock::{Clock, SystemClock};
use crate::types::AnomalyTrigger;

/// Default probe timeout.
pub const DEFAULT_WATCHDOG_TIMEOUT_MS: u64 = 5_000;

/// Default number of consecutive misses that declares unresponsiveness.
pub const DEFAULT_MISS_THRESHOLD: u32 = 2;

/// Work item posted onto the primary execution context.
pub type Probe = Box<dyn FnOnce() + Send + 'static>;

/// The host's primary execution context (UI thread, main loop).
pub trait PrimaryContext: Send + Sync {
    /// Queue `probe` to run on the primary context. Returns false if the
    /// context no longer accepts work; that round counts as a miss.
    fn post(&self, probe: Probe) -> bool;
}

impl PrimaryContext for std::sync::mpsc::Sender<Probe> {
    fn post(&self, probe: Probe) -> bool {
        self.send(probe).is_ok()
    }
}

impl PrimaryContext for tokio::sync::mpsc::UnboundedSender<Probe> {
    fn post(&self, probe: Probe) -> bool {
        self.send(probe).is_ok()
    }
}

/// Reports whether a debugger or inspector is attached to the process.
pub trait DebuggerProbe: Send + Sync {
    fn is_attached(&self) -> bool;
}

impl<F> DebuggerProbe for F
where
    F: Fn() -> bool + Send + Sync,
{
    fn is_attached(&self) -> bool {
        self()
    }
}

/// Never reports a debugger.
#[derive(Debug, Clone, Copy, Default)]
pub struct NeverAttached;

impl DebuggerProbe for NeverAttached {
    fn is_attached(&self) -> bool {
        false
    }
}

/// Linux tracer detection via `TracerPid` in `/proc/self/status`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracerPidProbe;

impl TracerPidProbe {
    fn parse(status: &str) -> bool {
        status
            .lines()
            .find_map(|line| line.strip_prefix("TracerPid:"))
            .and_then(|pid| pid.trim().parse::<u32>().ok())
            .is_some_and(|pid| pid != 0)
    }
}

impl DebuggerProbe for TracerPidProbe {
    fn is_attached(&self) -> bool {
        std::fs::read_to_string("/proc/self/status")
            .map(|status| Self::parse(&status))
            .unwrap_or(false)
    }
}

/// Watchdog timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchdogConfig {
    /// Probe period and per-probe deadline.
    pub timeout: Duration,
    /// Consecutive misses that declare unresponsiveness. Values below 2 are raised to 2.
    pub miss_threshold: u32,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(DEFAULT_WATCHDOG_TIMEOUT_MS),
            miss_threshold: DEFAULT_MISS_THRESHOLD,
        }
    }
}

/// Most recent declared unresponsiveness.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnresponsiveRecord {
    pub detected_at_ms: u64,
    pub consecutive_misses: u32,
    pub timeout_ms: u64,
    pub context: String,
}

/// Shared between the watchdog and every probe it has posted.
/// Probes only complete while the flag is set, under the lock.
#[derive(Debug, Default)]
struct ProbeGate {
    open: Mutex<bool>,
}

impl ProbeGate {
    fn set(&self, open: bool) {
        *self.open.lock().unwrap_or_else(PoisonError::into_inner) = open;
    }

    fn lock(&self) -> MutexGuard<'_, bool> {
        self.open.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

struct WatchdogState {
    config: WatchdogConfig,
    primary: Arc<dyn PrimaryContext>,
    debugger: Arc<dyn DebuggerProbe>,
    sink: Arc<dyn TriggerSink>,
    clock: Arc<dyn Clock>,
    gate: Arc<ProbeGate>,
    consecutive_misses: AtomicU32,
    fired_this_stall: AtomicBool,
    detections: AtomicU64,
    last_detection: Mutex<Option<UnresponsiveRecord>>,
}

impl WatchdogState {
    fn record_probe_result(&self, completed: bool) -> Option<AnomalyTrigger> {
        if completed {
            let previous = self.consecutive_misses.swap(0, Ordering::AcqRel);
            self.fired_this_stall.store(false, Ordering::Release);
            if previous > 0 {
                tracing::debug!(previous_misses = previous, "Primary context responsive again");
            }
            return None;
        }

        let misses = self
            .consecutive_misses
            .fetch_add(1, Ordering::AcqRel)
            .saturating_add(1);
        tracing::debug!(consecutive_misses = misses, "Watchdog probe missed");

        if misses < self.config.miss_threshold {
            return None;
        }

        if self.debugger.is_attached() {
            tracing::debug!(consecutive_misses = misses, "Debugger attached, detection suppressed");
            return None;
        }

        if self.fired_this_stall.swap(true, Ordering::AcqRel) {
            return None;
        }

        let timeout_ms = self.config.timeout.as_millis() as u64;
        let record = UnresponsiveRecord {
            detected_at_ms: self.clock.now_ms(),
            consecutive_misses: misses,
            timeout_ms,
            context: format!(
                "primary context missed {} consecutive probes ({}ms timeout)",
                misses, timeout_ms
            ),
        };

        tracing::warn!(
            consecutive_misses = misses,
            timeout_ms = timeout_ms,
            "Primary context unresponsive"
        );

        *self
            .last_detection
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(record);
        self.detections.fetch_add(1, Ordering::Relaxed);

        let trigger = AnomalyTrigger::AnrDetected;
        self.sink.request_capture(trigger.clone());
        Some(trigger)
    }

    /// Post one probe and wait up to the timeout for it to run.
    async fn probe_once(&self) -> bool {
        let (tx, rx) = oneshot::channel::<()>();
        let gate = Arc::clone(&self.gate);
        let probe: Probe = Box::new(move || {
            let open = gate.lock();
            if *open {
                let _ = tx.send(());
            }
        });

        if !self.primary.post(probe) {
            // Context gone: wait out the window so a dead context is not polled in a hot loop.
            tokio::time::sleep(self.config.timeout).await;
            return false;
        }

        matches!(tokio::time::timeout(self.config.timeout, rx).await, Ok(Ok(())))
    }

    async fn run(self: Arc<Self>) {
        loop {
            let started = tokio::time::Instant::now();
            let completed = self.probe_once().await;

            {
                // Held until the result (and any capture request) is handled,
                // so stop() cannot return while a detection is being declared.
                let open = self.gate.lock();
                if !*open {
                    break;
                }
                self.record_probe_result(completed);
            }

            if completed {
                // Keep one probe per window even when the context answers quickly.
                tokio::time::sleep_until(started + self.config.timeout).await;
            }
        }
    }
}

/// ANR-style detector for the primary execution context.
pub struct ResponsivenessWatchdog {
    state: Arc<WatchdogState>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ResponsivenessWatchdog {
    pub fn new(
        config: WatchdogConfig,
        primary: Arc<dyn PrimaryContext>,
        debugger: Arc<dyn DebuggerProbe>,
        sink: Arc<dyn TriggerSink>,
    ) -> Self {
        Self::with_clock(config, primary, debugger, sink, Arc::new(SystemClock))
    }

    pub fn with_clock(
        mut config: WatchdogConfig,
        primary: Arc<dyn PrimaryContext>,
        debugger: Arc<dyn DebuggerProbe>,
        sink: Arc<dyn TriggerSink>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        config.miss_threshold = config.miss_threshold.max(DEFAULT_MISS_THRESHOLD);
        Self {
            state: Arc::new(WatchdogState {
                config,
                primary,
                debugger,
                sink,
                clock,
                gate: Arc::new(ProbeGate::default()),
                consecutive_misses: AtomicU32::new(0),
                fired_this_stall: AtomicBool::new(false),
                detections: AtomicU64::new(0),
                last_detection: Mutex::new(None),
            }),
            task: Mutex::new(None),
        }
    }

    pub fn config(&self) -> WatchdogConfig {
        self.state.config
    }

    /// Start probing on the current tokio runtime. Returns false outside a runtime.
    pub fn start(&self) -> bool {
        match Handle::try_current() {
            Ok(handle) => {
                self.start_on(&handle);
                true
            }
            Err(_) => {
                tracing::error!("Watchdog start requested outside a tokio runtime");
                false
            }
        }
    }

    /// Start probing on `runtime`. A running watchdog is left untouched.
    pub fn start_on(&self, runtime: &Handle) {
        let mut task = self.task.lock().unwrap_or_else(PoisonError::into_inner);
        if task.as_ref().is_some_and(|t| !t.is_finished()) {
            return;
        }

        self.state.consecutive_misses.store(0, Ordering::Release);
        self.state.fired_this_stall.store(false, Ordering::Release);
        self.state.gate.set(true);
        *task = Some(runtime.spawn(Arc::clone(&self.state).run()));

        tracing::info!(
            timeout_ms = self.state.config.timeout.as_millis() as u64,
            miss_threshold = self.state.config.miss_threshold,
            "Responsiveness watchdog started"
        );
    }

    /// Cancel probing. No probe callback has any effect after this returns,
    /// and a detection the timer task is declaring completes first.
    pub fn stop(&self) {
        self.state.gate.set(false);
        if let Some(task) = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            task.abort();
            tracing::info!("Responsiveness watchdog stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|t| !t.is_finished())
    }

    /// Feed the outcome of one probe round. Used by the timer task, and by
    /// hosts that schedule their own probes.
    pub fn record_probe_result(&self, completed: bool) -> Option<AnomalyTrigger> {
        self.state.record_probe_result(completed)
    }

    /// Most recent detection, if any.
    pub fn query(&self) -> Option<UnresponsiveRecord> {
        self.state
            .last_detection
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn consecutive_misses(&self) -> u32 {
        self.state.consecutive_misses.load(Ordering::Acquire)
    }

    /// Number of times unresponsiveness has been declared.
    pub fn detection_count(&self) -> u64 {
        self.state.detections.load(Ordering::Relaxed)
    }
}

impl Drop for ResponsivenessWatchdog {
    fn drop(&mut self) {
        self.stop();
    }
}

impl fmt::Debug for ResponsivenessWatchdog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponsivenessWatchdog")
            .field("config", &self.state.config)
            .field("consecutive_misses", &self.consecutive_misses())
            .field("running", &self.is_running())
            .finish()
    }
}
