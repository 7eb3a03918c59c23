// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Rate-limited forwarding of unit crashes to an external crash reporter.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;

use crate::clock::{Clock, SystemClock};
use crate::types::{UnitId, UnitType};

/// Default window in which a repeated crash fingerprint is suppressed.
pub const DEFAULT_DEDUP_WINDOW_MS: u64 = 60_000;

/// External crash-reporting backend.
pub trait CrashReportSink: Send + Sync {
    fn report(&self, unit_type: &UnitType, unit_id: &UnitId, error_summary: &str);
}

/// Backend that discards every report.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullCrashReportSink;

impl CrashReportSink for NullCrashReportSink {
    fn report(&self, _unit_type: &UnitType, _unit_id: &UnitId, _error_summary: &str) {}
}

/// Forwards each crash fingerprint (unit type + error summary) at most once per window.
pub struct DedupCrashReporter {
    sink: Arc<dyn CrashReportSink>,
    clock: Arc<dyn Clock>,
    window_ms: u64,
    /// Fingerprint -> time of the last forwarded report. `u64::MAX` marks "never".
    last_reported: DashMap<String, AtomicU64>,
    forwarded: AtomicU64,
    suppressed: AtomicU64,
}

impl DedupCrashReporter {
    pub fn new(sink: Arc<dyn CrashReportSink>, window_ms: u64) -> Self {
        Self::with_clock(sink, window_ms, Arc::new(SystemClock))
    }

    pub fn with_clock(sink: Arc<dyn CrashReportSink>, window_ms: u64, clock: Arc<dyn Clock>) -> Self {
        Self {
            sink,
            clock,
            window_ms,
            last_reported: DashMap::new(),
            forwarded: AtomicU64::new(0),
            suppressed: AtomicU64::new(0),
        }
    }

    pub fn window_ms(&self) -> u64 {
        self.window_ms
    }

    /// Report a crash. Returns true if it was forwarded to the sink.
    pub fn report(&self, unit_type: &UnitType, unit_id: &UnitId, error_summary: &str) -> bool {
        let fingerprint = format!("{}\u{1f}{}", unit_type, error_summary);
        let now = self.clock.now_ms();

        let claimed = {
            let slot = self
                .last_reported
                .entry(fingerprint)
                .or_insert_with(|| AtomicU64::new(u64::MAX));
            self.try_claim(slot.value(), now)
        };

        if !claimed {
            self.suppressed.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(
                unit_type = %unit_type,
                unit_id = %unit_id,
                "Duplicate crash report suppressed"
            );
            return false;
        }

        self.forwarded.fetch_add(1, Ordering::Relaxed);
        self.prune_expired(now);
        self.sink.report(unit_type, unit_id, error_summary);
        true
    }

    /// Drop fingerprints whose window has elapsed; they would be forwarded
    /// again anyway.
    fn prune_expired(&self, now: u64) {
        self.last_reported.retain(|_, last| {
            let last = last.load(Ordering::Acquire);
            last == u64::MAX || now.saturating_sub(last) < self.window_ms
        });
    }

    /// Fingerprints currently inside their suppression window.
    pub fn fingerprint_count(&self) -> usize {
        self.last_reported.len()
    }

    /// Move the slot's timestamp to `now` if the window has elapsed.
    /// Exactly one of several racing reporters wins.
    fn try_claim(&self, slot: &AtomicU64, now: u64) -> bool {
        let mut last = slot.load(Ordering::Acquire);
        loop {
            let due = last == u64::MAX || now.saturating_sub(last) >= self.window_ms;
            if !due {
                return false;
            }
            match slot.compare_exchange_weak(last, now, Ordering::AcqRel, Ordering::Acquire) {
                Ok(_) => return true,
                Err(actual) => last = actual,
            }
        }
    }

    pub fn forwarded_count(&self) -> u64 {
        self.forwarded.load(Ordering::Relaxed)
    }

    pub fn suppressed_count(&self) -> u64 {
        self.suppressed.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for DedupCrashReporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DedupCrashReporter")
            .field("window_ms", &self.window_ms)
            .field("fingerprints", &self.last_reported.len())
            .field("forwarded", &self.forwarded_count())
            .field("suppressed", &self.suppressed_count())
            .finish()
    }
}
