// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Collaborator seams of the capture pipeline.

use crate::types::AnomalyTrigger;

/// Receives capture requests from detectors.
pub trait TriggerSink: Send + Sync {
    fn request_capture(&self, trigger: AnomalyTrigger);
}

/// Host-side log storage able to return its most recent lines.
pub trait LogRingBufferSink: Send + Sync {
    /// Up to `max_lines` most recent lines, oldest first.
    fn recent_lines(&self, max_lines: usize) -> Vec<String>;
}

/// Log sink for hosts that keep no log tail.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoLogTail;

impl LogRingBufferSink for NoLogTail {
    fn recent_lines(&self, _max_lines: usize) -> Vec<String> {
        Vec::new()
    }
}
