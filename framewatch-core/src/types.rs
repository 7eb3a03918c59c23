// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Newtype wrappers and shared value types.
//!
//! Identifiers validate their invariants at creation time. Triggers, pools and
//! thermal states are plain tagged values shared by every detector.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::HardValidationError;

/// Maximum length of a unit identifier or unit type.
const MAX_IDENT_LEN: usize = 128;

fn validate_ident(field: &'static str, value: String) -> Result<String, HardValidationError> {
    if value.is_empty() {
        return Err(HardValidationError::InvalidFieldValue {
            field,
            value,
            reason: "Identifier cannot be empty".to_string(),
        });
    }

    if value.len() > MAX_IDENT_LEN {
        let len = value.len();
        return Err(HardValidationError::InvalidFieldValue {
            field,
            value,
            reason: format!("Identifier too long: {} chars (max {})", len, MAX_IDENT_LEN),
        });
    }

    if value.chars().any(|c| c.is_control() || c == '/' || c == '\\') {
        return Err(HardValidationError::InvalidFieldValue {
            field,
            value,
            reason: "Identifier must not contain control characters or path separators"
                .to_string(),
        });
    }

    Ok(value)
}

/// Identifier of a tracked unit (one rendered widget, panel or surface instance).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct UnitId(String);

impl UnitId {
    /// Create a new UnitId with validation.
    pub fn new(id: impl Into<String>) -> Result<Self, HardValidationError> {
        validate_ident("unit_id", id.into()).map(Self)
    }

    /// Get the inner string value.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for UnitId {
    type Error = HardValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<UnitId> for String {
    fn from(id: UnitId) -> Self {
        id.0
    }
}

/// Kind of a tracked unit, shared by all instances of the same implementation.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct UnitType(String);

impl UnitType {
    /// Create a new UnitType with validation.
    pub fn new(kind: impl Into<String>) -> Result<Self, HardValidationError> {
        validate_ident("unit_type", kind.into()).map(Self)
    }

    /// Get the inner string value.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UnitType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for UnitType {
    type Error = HardValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<UnitType> for String {
    fn from(kind: UnitType) -> Self {
        kind.0
    }
}

/// Device thermal state, ordered from coolest to hottest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum ThermalState {
    None = 0,
    Light = 1,
    Moderate = 2,
    Severe = 3,
    Critical = 4,
    Emergency = 5,
    Shutdown = 6,
}

impl ThermalState {
    /// All states in ascending severity.
    pub const ALL: [ThermalState; 7] = [
        Self::None,
        Self::Light,
        Self::Moderate,
        Self::Severe,
        Self::Critical,
        Self::Emergency,
        Self::Shutdown,
    ];

    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Light => "light",
            Self::Moderate => "moderate",
            Self::Severe => "severe",
            Self::Critical => "critical",
            Self::Emergency => "emergency",
            Self::Shutdown => "shutdown",
        }
    }

    /// Decode the value stored by [`ThermalState::as_u8`]. Out-of-range values saturate.
    pub fn from_u8(raw: u8) -> Self {
        Self::ALL
            .get(raw as usize)
            .copied()
            .unwrap_or(Self::Shutdown)
    }

    pub const fn as_u8(&self) -> u8 {
        *self as u8
    }
}

impl fmt::Display for ThermalState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ThermalState {
    type Err = HardValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|state| state.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| HardValidationError::InvalidFieldValue {
                field: "thermal_state",
                value: s.to_string(),
                reason: "Expected one of none, light, moderate, severe, critical, emergency, shutdown"
                    .to_string(),
            })
    }
}

/// Capacity-bounded storage bucket a snapshot is persisted into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RotationPool {
    Crash,
    Thermal,
    Perf,
}

impl RotationPool {
    pub const ALL: [RotationPool; 3] = [Self::Crash, Self::Thermal, Self::Perf];

    /// Pool name, also used as the pool's directory name.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Crash => "crash",
            Self::Thermal => "thermal",
            Self::Perf => "perf",
        }
    }
}

impl fmt::Display for RotationPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for RotationPool {
    type Err = HardValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|pool| pool.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| HardValidationError::InvalidFieldValue {
                field: "pool",
                value: s.to_string(),
                reason: "Expected one of crash, thermal, perf".to_string(),
            })
    }
}

/// Reason a diagnostic capture was requested.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AnomalyTrigger {
    /// A run of consecutive janky frames reached an escalation checkpoint.
    JankSpike { consecutive_frames: u32 },
    /// The primary execution context stopped servicing probes.
    AnrDetected,
    /// A tracked unit crashed.
    UnitCrash {
        unit_type: UnitType,
        unit_id: UnitId,
        error_summary: String,
    },
    /// The device thermal state rose.
    ThermalEscalation { from: ThermalState, to: ThermalState },
}

impl AnomalyTrigger {
    /// Rotation pool this trigger's snapshot is stored in.
    pub fn pool(&self) -> RotationPool {
        match self {
            Self::UnitCrash { .. } => RotationPool::Crash,
            Self::ThermalEscalation { .. } => RotationPool::Thermal,
            Self::JankSpike { .. } | Self::AnrDetected => RotationPool::Perf,
        }
    }

    /// Short name used in log fields.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::JankSpike { .. } => "jank_spike",
            Self::AnrDetected => "anr_detected",
            Self::UnitCrash { .. } => "unit_crash",
            Self::ThermalEscalation { .. } => "thermal_escalation",
        }
    }
}

impl fmt::Display for AnomalyTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::JankSpike { consecutive_frames } => {
                write!(f, "jank spike ({} consecutive frames)", consecutive_frames)
            }
            Self::AnrDetected => write!(f, "main context unresponsive"),
            Self::UnitCrash {
                unit_type,
                unit_id,
                error_summary,
            } => write!(f, "{}/{} crashed: {}", unit_type, unit_id, error_summary),
            Self::ThermalEscalation { from, to } => {
                write!(f, "thermal escalation {} -> {}", from, to)
            }
        }
    }
}
