// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Consecutive-jank counter with escalation checkpoints.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use crate::capture::TriggerSink;
use crate::types::AnomalyTrigger;

/// Frame budget for 60Hz rendering.
pub const DEFAULT_JANK_THRESHOLD_MS: f64 = 16.0;

/// Run lengths at which a capture is requested. Each fires once per run.
pub const JANK_CHECKPOINTS: [u32; 3] = [5, 20, 100];

/// Counts consecutive frames over budget and requests captures at
/// [`JANK_CHECKPOINTS`]. Any frame within budget restarts the count.
pub struct JankDetector {
    threshold_ms: f64,
    consecutive: AtomicU32,
    sink: Arc<dyn TriggerSink>,
}

impl JankDetector {
    pub fn new(threshold_ms: f64, sink: Arc<dyn TriggerSink>) -> Self {
        Self {
            threshold_ms,
            consecutive: AtomicU32::new(0),
            sink,
        }
    }

    pub fn threshold_ms(&self) -> f64 {
        self.threshold_ms
    }

    /// Current run of consecutive janky frames.
    pub fn consecutive_jank(&self) -> u32 {
        self.consecutive.load(Ordering::Relaxed)
    }

    /// Feed one frame duration. Returns the trigger if this frame hit a checkpoint.
    pub fn on_frame_rendered(&self, duration_ms: f64) -> Option<AnomalyTrigger> {
        if duration_ms.is_nan() || duration_ms <= self.threshold_ms {
            self.consecutive.store(0, Ordering::Relaxed);
            return None;
        }

        let run = self
            .consecutive
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| {
                Some(n.saturating_add(1))
            })
            .map_or(u32::MAX, |prev| prev.saturating_add(1));

        if !JANK_CHECKPOINTS.contains(&run) {
            return None;
        }

        tracing::warn!(
            consecutive_frames = run,
            threshold_ms = self.threshold_ms,
            last_frame_ms = duration_ms,
            "Jank checkpoint reached"
        );

        let trigger = AnomalyTrigger::JankSpike {
            consecutive_frames: run,
        };
        self.sink.request_capture(trigger.clone());
        Some(trigger)
    }
}

impl std::fmt::Debug for JankDetector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JankDetector")
            .field("threshold_ms", &self.threshold_ms)
            .field("consecutive", &self.consecutive_jank())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::testing::RecordingSink;

    fn detector() -> (JankDetector, Arc<RecordingSink>) {
        let sink = Arc::new(RecordingSink::default());
        (
            JankDetector::new(DEFAULT_JANK_THRESHOLD_MS, sink.clone()),
            sink,
        )
    }

    fn spikes(sink: &RecordingSink) -> Vec<u32> {
        sink.taken()
            .into_iter()
            .map(|t| match t {
                AnomalyTrigger::JankSpike { consecutive_frames } => consecutive_frames,
                other => panic!("unexpected trigger {:?}", other),
            })
            .collect()
    }

    #[test]
    fn test_four_janky_frames_do_not_fire() {
        let (detector, sink) = detector();
        for _ in 0..4 {
            assert!(detector.on_frame_rendered(20.0).is_none());
        }
        assert!(sink.taken().is_empty());
    }

    #[test]
    fn test_checkpoints_fire_exactly_once() {
        let (detector, sink) = detector();

        for _ in 0..5 {
            detector.on_frame_rendered(20.0);
        }
        assert_eq!(spikes(&sink), vec![5]);

        for _ in 5..19 {
            detector.on_frame_rendered(20.0);
        }
        assert_eq!(spikes(&sink), vec![5]);

        detector.on_frame_rendered(20.0);
        assert_eq!(spikes(&sink), vec![5, 20]);

        for _ in 20..150 {
            detector.on_frame_rendered(20.0);
        }
        assert_eq!(spikes(&sink), vec![5, 20, 100]);
    }

    #[test]
    fn test_good_frame_resets_run() {
        let (detector, sink) = detector();
        for _ in 0..4 {
            detector.on_frame_rendered(20.0);
        }
        detector.on_frame_rendered(8.0);
        assert_eq!(detector.consecutive_jank(), 0);
        for _ in 0..4 {
            detector.on_frame_rendered(20.0);
        }
        assert!(sink.taken().is_empty());

        detector.on_frame_rendered(20.0);
        assert_eq!(spikes(&sink), vec![5]);
    }

    #[test]
    fn test_threshold_is_exclusive() {
        let (detector, sink) = detector();
        for _ in 0..10 {
            detector.on_frame_rendered(16.0);
        }
        assert!(sink.taken().is_empty());
        assert_eq!(detector.consecutive_jank(), 0);
    }

    #[test]
    fn test_sequence_restarts_after_reset() {
        let (detector, sink) = detector();
        for _ in 0..25 {
            detector.on_frame_rendered(40.0);
        }
        detector.on_frame_rendered(1.0);
        for _ in 0..5 {
            detector.on_frame_rendered(40.0);
        }
        assert_eq!(spikes(&sink), vec![5, 20, 5]);
    }

    #[test]
    fn test_nan_frame_resets() {
        let (detector, _) = detector();
        detector.on_frame_rendered(30.0);
        detector.on_frame_rendered(f64::NAN);
        assert_eq!(detector.consecutive_jank(), 0);
    }
}
