// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Per-unit liveness state machine.
//!
//! Units report data arrivals, completed draws and crashes. A periodic sweep
//! re-derives every unit's status from its timestamps:
//!
//! ```text
//!   report_data ──► Active ◄── report_draw
//!                     │
//!   sweep: data age > threshold ──► StaleData
//!   sweep: draw age > threshold ──► StalledRender   (data checked first)
//!
//!   report_crash ──► Crashed         (sticky; cleared only by report_data)
//!   report_setup_required ──► SetupRequired (sticky; cleared only by report_data)
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;

use crate::clock::{Clock, SystemClock};
use crate::types::{UnitId, UnitType};

/// Default staleness threshold in milliseconds.
pub const DEFAULT_STALENESS_THRESHOLD_MS: u64 = 10_000;

/// Liveness states of a tracked unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HealthState {
    /// Data and draws are both fresh.
    Active,
    /// No data within the staleness threshold.
    StaleData,
    /// Data is fresh but no draw within the staleness threshold.
    StalledRender,
    /// The unit crashed; sweeps leave it alone.
    Crashed,
    /// The unit cannot run until the user configures it; sweeps leave it alone.
    SetupRequired,
}

impl HealthState {
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Active => "ACTIVE",
            Self::StaleData => "STALE_DATA",
            Self::StalledRender => "STALLED_RENDER",
            Self::Crashed => "CRASHED",
            Self::SetupRequired => "SETUP_REQUIRED",
        }
    }

    /// States only new data can leave.
    pub const fn is_sticky(&self) -> bool {
        matches!(self, Self::Crashed | Self::SetupRequired)
    }
}

impl fmt::Display for HealthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Health record of one unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthStatus {
    pub unit_id: UnitId,
    pub unit_type: UnitType,
    pub status: HealthState,
    pub last_data_ms: Option<u64>,
    pub last_draw_ms: Option<u64>,
    /// When the unit first reported anything; stands in for missing timestamps.
    pub first_seen_ms: u64,
}

impl HealthStatus {
    fn new(unit_id: UnitId, unit_type: UnitType, now: u64) -> Self {
        Self {
            unit_id,
            unit_type,
            status: HealthState::Active,
            last_data_ms: None,
            last_draw_ms: None,
            first_seen_ms: now,
        }
    }

    /// Status derived from timestamps alone.
    fn evaluate(&self, now: u64, threshold_ms: u64) -> HealthState {
        let data_age = now.saturating_sub(self.last_data_ms.unwrap_or(self.first_seen_ms));
        let draw_age = now.saturating_sub(self.last_draw_ms.unwrap_or(self.first_seen_ms));

        if data_age > threshold_ms {
            HealthState::StaleData
        } else if draw_age > threshold_ms {
            HealthState::StalledRender
        } else {
            HealthState::Active
        }
    }
}

/// A status change applied by a sweep.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LivenessTransition {
    pub unit_id: UnitId,
    pub from: HealthState,
    pub to: HealthState,
}

/// Tracks the health of every unit that has ever reported.
pub struct LivenessMonitor {
    units: RwLock<HashMap<UnitId, HealthStatus>>,
    staleness_threshold_ms: u64,
    clock: Arc<dyn Clock>,
}

impl LivenessMonitor {
    pub fn new(staleness_threshold_ms: u64) -> Self {
        Self::with_clock(staleness_threshold_ms, Arc::new(SystemClock))
    }

    pub fn with_clock(staleness_threshold_ms: u64, clock: Arc<dyn Clock>) -> Self {
        Self {
            units: RwLock::new(HashMap::new()),
            staleness_threshold_ms,
            clock,
        }
    }

    pub fn staleness_threshold_ms(&self) -> u64 {
        self.staleness_threshold_ms
    }

    /// Apply `update` to the unit's record, creating it on first report.
    fn update(&self, id: &UnitId, unit_type: &UnitType, update: impl FnOnce(&mut HealthStatus, u64)) {
        let now = self.clock.now_ms();
        let mut units = self.units.write().unwrap_or_else(PoisonError::into_inner);
        let entry = units
            .entry(id.clone())
            .or_insert_with(|| HealthStatus::new(id.clone(), unit_type.clone(), now));
        let before = entry.status;
        entry.unit_type = unit_type.clone();
        update(entry, now);

        if before != entry.status {
            tracing::debug!(
                unit_id = %id,
                unit_type = %unit_type,
                from = before.name(),
                to = entry.status.name(),
                "Unit status changed"
            );
        }
    }

    /// Record a data arrival. Clears a crash or setup-required state.
    pub fn report_data(&self, id: &UnitId, unit_type: &UnitType) {
        self.update(id, unit_type, |status, now| {
            status.last_data_ms = Some(now);
            status.status = HealthState::Active;
        });
    }

    /// Record a completed draw. Does not clear a sticky state.
    pub fn report_draw(&self, id: &UnitId, unit_type: &UnitType) {
        self.update(id, unit_type, |status, now| {
            status.last_draw_ms = Some(now);
            if !status.status.is_sticky() {
                status.status = HealthState::Active;
            }
        });
    }

    /// Mark the unit crashed.
    pub fn report_crash(&self, id: &UnitId, unit_type: &UnitType) {
        self.update(id, unit_type, |status, _| {
            status.status = HealthState::Crashed;
        });
    }

    /// Mark the unit as waiting for configuration.
    pub fn report_setup_required(&self, id: &UnitId, unit_type: &UnitType) {
        self.update(id, unit_type, |status, _| {
            status.status = HealthState::SetupRequired;
        });
    }

    /// Re-derive every non-sticky unit's status. Returns the changes applied.
    pub fn check_liveness(&self) -> Vec<LivenessTransition> {
        let now = self.clock.now_ms();
        let mut transitions = Vec::new();

        {
            let mut units = self.units.write().unwrap_or_else(PoisonError::into_inner);
            for status in units.values_mut() {
                if status.status.is_sticky() {
                    continue;
                }
                let next = status.evaluate(now, self.staleness_threshold_ms);
                if next != status.status {
                    transitions.push(LivenessTransition {
                        unit_id: status.unit_id.clone(),
                        from: status.status,
                        to: next,
                    });
                    status.status = next;
                }
            }
        }

        for t in &transitions {
            if t.to == HealthState::Active {
                tracing::info!(unit_id = %t.unit_id, from = t.from.name(), "Unit recovered");
            } else {
                tracing::warn!(
                    unit_id = %t.unit_id,
                    from = t.from.name(),
                    to = t.to.name(),
                    threshold_ms = self.staleness_threshold_ms,
                    "Unit went stale"
                );
            }
        }

        transitions
    }

    /// Consistent point-in-time copy of every unit's record.
    pub fn all_statuses(&self) -> HashMap<UnitId, HealthStatus> {
        self.units
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn status(&self, id: &UnitId) -> Option<HealthState> {
        self.units
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .map(|s| s.status)
    }

    pub fn units_in_status(&self, state: HealthState) -> Vec<UnitId> {
        let mut ids: Vec<UnitId> = self
            .units
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|s| s.status == state)
            .map(|s| s.unit_id.clone())
            .collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.units.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run [`LivenessMonitor::check_liveness`] every `interval` on the current
    /// tokio runtime until the returned handle is stopped or dropped.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> SweeperHandle {
        let monitor = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately; skip it so units get a full window.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                monitor.check_liveness();
            }
        });

        tracing::info!(interval_ms = interval.as_millis() as u64, "Liveness sweeper started");
        SweeperHandle {
            handle: Some(handle),
        }
    }
}

impl fmt::Debug for LivenessMonitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LivenessMonitor")
            .field("units", &self.len())
            .field("staleness_threshold_ms", &self.staleness_threshold_ms)
            .finish()
    }
}

/// Owner of the periodic sweep task.
#[derive(Debug)]
pub struct SweeperHandle {
    handle: Option<JoinHandle<()>>,
}

impl SweeperHandle {
    pub fn stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
            tracing::info!("Liveness sweeper stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }
}

impl Drop for SweeperHandle {
    fn drop(&mut self) {
        self.stop();
    }
}
