// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Anomaly detectors.
//!
//! Each detector watches its own signal and hands an [`AnomalyTrigger`] to a
//! [`TriggerSink`] when a threshold is crossed:
//!
//! ```text
//! frame durations ──► JankDetector ───────────┐
//! probe results   ──► ResponsivenessWatchdog ─┼──► TriggerSink ──► DiagnosticCapture
//! thermal states  ──► ThermalMonitor ─────────┘
//! ```
//!
//! [`AnomalyTrigger`]: crate::types::AnomalyTrigger
//! [`TriggerSink`]: crate::capture::TriggerSink

mod jank;
mod thermal;
mod watchdog;

pub use jank::{JankDetector, DEFAULT_JANK_THRESHOLD_MS, JANK_CHECKPOINTS};
pub use thermal::ThermalMonitor;
pub use watchdog::{
    DebuggerProbe, NeverAttached, PrimaryContext, Probe, ResponsivenessWatchdog,
    TracerPidProbe, UnresponsiveRecord, WatchdogConfig,
};
