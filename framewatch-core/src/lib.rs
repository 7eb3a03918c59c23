// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Framewatch Core Library
//!
//! Runtime observability and anomaly capture for render-loop hosts.
//! Provides frame metrics aggregation, span tracking, per-unit liveness,
//! jank / responsiveness / thermal detection, and single-flight diagnostic
//! capture into bounded rotation pools.

pub mod capture;
pub mod clock;
pub mod config;
pub mod crash;
pub mod detect;
pub mod error;
pub mod hub;
pub mod liveness;
pub mod metrics;
pub mod trace;
pub mod types;

// Re-export commonly used types
pub use capture::{
    read_snapshot, DiagnosticCapture, DiagnosticFileWriter, DiagnosticSnapshot,
    FsDiagnosticWriter, LogRingBufferSink, TriggerSink,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ConfigLoader, FrameWatchConfig};
pub use crash::{CrashReportSink, DedupCrashReporter};
pub use detect::{JankDetector, ResponsivenessWatchdog, ThermalMonitor};
pub use error::{CaptureError, FrameWatchError, FrameWatchResult, HardValidationError};
pub use hub::{HubCollaborators, ObservabilityHub};
pub use liveness::{HealthState, HealthStatus, LivenessMonitor};
pub use metrics::{BoundedCircularBuffer, FrameMetricsAggregator, MetricsSnapshot};
pub use trace::{Span, SpanTracker, TraceContext};
pub use types::{AnomalyTrigger, RotationPool, ThermalState, UnitId, UnitType};
