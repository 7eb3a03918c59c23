// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Thermal escalation detector.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use crate::capture::TriggerSink;
use crate::types::{AnomalyTrigger, ThermalState};

/// Requests a capture when the thermal state rises to or past `capture_floor`.
/// Falling or unchanged states never fire.
pub struct ThermalMonitor {
    current: AtomicU8,
    capture_floor: ThermalState,
    sink: Arc<dyn TriggerSink>,
}

impl ThermalMonitor {
    pub fn new(capture_floor: ThermalState, sink: Arc<dyn TriggerSink>) -> Self {
        Self {
            current: AtomicU8::new(ThermalState::None.as_u8()),
            capture_floor,
            sink,
        }
    }

    pub fn current(&self) -> ThermalState {
        ThermalState::from_u8(self.current.load(Ordering::Acquire))
    }

    pub fn capture_floor(&self) -> ThermalState {
        self.capture_floor
    }

    /// Record the latest thermal state. Returns the trigger if it escalated.
    pub fn on_thermal_state(&self, state: ThermalState) -> Option<AnomalyTrigger> {
        let previous = ThermalState::from_u8(self.current.swap(state.as_u8(), Ordering::AcqRel));

        if state <= previous {
            if state < previous {
                tracing::info!(from = %previous, to = %state, "Thermal state eased");
            }
            return None;
        }

        if state < self.capture_floor {
            tracing::debug!(from = %previous, to = %state, "Thermal state rose below capture floor");
            return None;
        }

        tracing::warn!(from = %previous, to = %state, "Thermal escalation");
        let trigger = AnomalyTrigger::ThermalEscalation {
            from: previous,
            to: state,
        };
        self.sink.request_capture(trigger.clone());
        Some(trigger)
    }
}

impl std::fmt::Debug for ThermalMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThermalMonitor")
            .field("current", &self.current())
            .field("capture_floor", &self.capture_floor)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::testing::RecordingSink;

    fn monitor(floor: ThermalState) -> (ThermalMonitor, Arc<RecordingSink>) {
        let sink = Arc::new(RecordingSink::default());
        (ThermalMonitor::new(floor, sink.clone()), sink)
    }

    #[test]
    fn test_escalation_past_floor_fires() {
        let (monitor, sink) = monitor(ThermalState::Severe);
        assert!(monitor.on_thermal_state(ThermalState::Light).is_none());
        assert!(monitor.on_thermal_state(ThermalState::Moderate).is_none());

        let trigger = monitor.on_thermal_state(ThermalState::Critical).unwrap();
        assert_eq!(
            trigger,
            AnomalyTrigger::ThermalEscalation {
                from: ThermalState::Moderate,
                to: ThermalState::Critical,
            }
        );
        assert_eq!(sink.taken().len(), 1);
    }

    #[test]
    fn test_repeat_and_deescalation_do_not_fire() {
        let (monitor, sink) = monitor(ThermalState::Moderate);
        monitor.on_thermal_state(ThermalState::Severe);
        monitor.on_thermal_state(ThermalState::Severe);
        monitor.on_thermal_state(ThermalState::Moderate);
        assert_eq!(sink.taken().len(), 1);
        assert_eq!(monitor.current(), ThermalState::Moderate);

        // Rising again from Moderate counts as a new escalation.
        monitor.on_thermal_state(ThermalState::Severe);
        assert_eq!(sink.taken().len(), 2);
    }
}
