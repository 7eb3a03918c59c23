// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! YAML configuration parser with strict schema validation.
//!
//! Every section and field is optional; missing values take the documented
//! defaults. Out-of-range values are a HardValidationError at load time.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::capture::{
    CaptureConfig, DEFAULT_LOG_TAIL_LINES, DEFAULT_MAX_ENTRIES_PER_POOL, DEFAULT_MIN_FREE_BYTES,
};
use crate::crash::DEFAULT_DEDUP_WINDOW_MS;
use crate::detect::{WatchdogConfig, DEFAULT_JANK_THRESHOLD_MS};
use crate::error::{FrameWatchError, FrameWatchResult, HardValidationError};
use crate::liveness::DEFAULT_STALENESS_THRESHOLD_MS;
use crate::metrics::DEFAULT_SAMPLE_CAPACITY;
use crate::types::ThermalState;

const MAX_SAMPLE_CAPACITY: usize = 65_536;
const MIN_WATCHDOG_TIMEOUT_MS: u64 = 10;
const MAX_WATCHDOG_TIMEOUT_MS: u64 = 600_000;
const MAX_ENTRIES_PER_POOL: usize = 10_000;
const MAX_LOG_TAIL_LINES: usize = 100_000;

/// Raw frame section as parsed from YAML (before validation).
#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct RawFramesConfig {
    jank_threshold_ms: f64,
    unit_buffer_capacity: usize,
    source_buffer_capacity: usize,
}

impl Default for RawFramesConfig {
    fn default() -> Self {
        Self {
            jank_threshold_ms: DEFAULT_JANK_THRESHOLD_MS,
            unit_buffer_capacity: DEFAULT_SAMPLE_CAPACITY,
            source_buffer_capacity: DEFAULT_SAMPLE_CAPACITY,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct RawLivenessConfig {
    staleness_threshold_ms: u64,
    sweep_interval_ms: u64,
}

impl Default for RawLivenessConfig {
    fn default() -> Self {
        Self {
            staleness_threshold_ms: DEFAULT_STALENESS_THRESHOLD_MS,
            sweep_interval_ms: 5_000,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct RawWatchdogConfig {
    enabled: bool,
    timeout_ms: u64,
    miss_threshold: u32,
}

impl Default for RawWatchdogConfig {
    fn default() -> Self {
        let defaults = WatchdogConfig::default();
        Self {
            enabled: true,
            timeout_ms: defaults.timeout.as_millis() as u64,
            miss_threshold: defaults.miss_threshold,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct RawCaptureConfig {
    output_dir: String,
    max_entries_per_pool: usize,
    log_tail_lines: usize,
    min_free_bytes: u64,
}

fn default_output_dir() -> String {
    "/tmp/framewatch".to_string()
}

impl Default for RawCaptureConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            max_entries_per_pool: DEFAULT_MAX_ENTRIES_PER_POOL,
            log_tail_lines: DEFAULT_LOG_TAIL_LINES,
            min_free_bytes: DEFAULT_MIN_FREE_BYTES,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct RawCrashConfig {
    dedup_window_ms: u64,
}

impl Default for RawCrashConfig {
    fn default() -> Self {
        Self {
            dedup_window_ms: DEFAULT_DEDUP_WINDOW_MS,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct RawThermalConfig {
    capture_floor: String,
}

impl Default for RawThermalConfig {
    fn default() -> Self {
        Self {
            capture_floor: ThermalState::Severe.as_str().to_string(),
        }
    }
}

/// Raw root configuration file.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct RawConfig {
    frames: RawFramesConfig,
    liveness: RawLivenessConfig,
    watchdog: RawWatchdogConfig,
    capture: RawCaptureConfig,
    crash: RawCrashConfig,
    thermal: RawThermalConfig,
}

/// Validated frame metrics and jank settings.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FramesSettings {
    pub jank_threshold_ms: f64,
    pub unit_buffer_capacity: usize,
    pub source_buffer_capacity: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LivenessSettings {
    pub staleness_threshold_ms: u64,
    pub sweep_interval_ms: u64,
}

impl LivenessSettings {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WatchdogSettings {
    pub enabled: bool,
    pub timeout_ms: u64,
    pub miss_threshold: u32,
}

impl WatchdogSettings {
    pub fn to_watchdog_config(&self) -> WatchdogConfig {
        WatchdogConfig {
            timeout: Duration::from_millis(self.timeout_ms),
            miss_threshold: self.miss_threshold,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CaptureSettings {
    pub output_dir: PathBuf,
    pub max_entries_per_pool: usize,
    pub log_tail_lines: usize,
    pub min_free_bytes: u64,
}

impl CaptureSettings {
    pub fn to_capture_config(&self) -> CaptureConfig {
        CaptureConfig {
            max_entries_per_pool: self.max_entries_per_pool,
            log_tail_lines: self.log_tail_lines,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CrashSettings {
    pub dedup_window_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ThermalSettings {
    pub capture_floor: ThermalState,
}

/// Complete validated configuration.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FrameWatchConfig {
    pub frames: FramesSettings,
    pub liveness: LivenessSettings,
    pub watchdog: WatchdogSettings,
    pub capture: CaptureSettings,
    pub crash: CrashSettings,
    pub thermal: ThermalSettings,
}

impl Default for FrameWatchConfig {
    fn default() -> Self {
        FrameWatchConfig {
            frames: FramesSettings {
                jank_threshold_ms: DEFAULT_JANK_THRESHOLD_MS,
                unit_buffer_capacity: DEFAULT_SAMPLE_CAPACITY,
                source_buffer_capacity: DEFAULT_SAMPLE_CAPACITY,
            },
            liveness: LivenessSettings {
                staleness_threshold_ms: DEFAULT_STALENESS_THRESHOLD_MS,
                sweep_interval_ms: 5_000,
            },
            watchdog: WatchdogSettings {
                enabled: true,
                timeout_ms: WatchdogConfig::default().timeout.as_millis() as u64,
                miss_threshold: WatchdogConfig::default().miss_threshold,
            },
            capture: CaptureSettings {
                output_dir: PathBuf::from(default_output_dir()),
                max_entries_per_pool: DEFAULT_MAX_ENTRIES_PER_POOL,
                log_tail_lines: DEFAULT_LOG_TAIL_LINES,
                min_free_bytes: DEFAULT_MIN_FREE_BYTES,
            },
            crash: CrashSettings {
                dedup_window_ms: DEFAULT_DEDUP_WINDOW_MS,
            },
            thermal: ThermalSettings {
                capture_floor: ThermalState::Severe,
            },
        }
    }
}

/// Configuration loader with strict validation.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load and validate configuration from a YAML file.
    pub fn load_file(path: impl AsRef<Path>) -> FrameWatchResult<FrameWatchConfig> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(FrameWatchError::ConfigNotFound {
                path: path.to_path_buf(),
            });
        }

        let content = std::fs::read_to_string(path).map_err(|e| FrameWatchError::Io {
            context: "reading config file",
            source: e,
        })?;

        Self::load_string(&content)
    }

    /// Load and validate configuration from a YAML string.
    pub fn load_string(content: &str) -> FrameWatchResult<FrameWatchConfig> {
        let raw: RawConfig = if is_blank_document(content) {
            RawConfig::default()
        } else {
            serde_yaml::from_str(content).map_err(|e| FrameWatchError::ConfigParse {
                message: format!("YAML parse error: {}", e),
            })?
        };

        Self::validate(raw)
    }

    fn validate(raw: RawConfig) -> FrameWatchResult<FrameWatchConfig> {
        Ok(FrameWatchConfig {
            frames: Self::validate_frames(raw.frames)?,
            liveness: Self::validate_liveness(raw.liveness)?,
            watchdog: Self::validate_watchdog(raw.watchdog)?,
            capture: Self::validate_capture(raw.capture)?,
            crash: CrashSettings {
                dedup_window_ms: raw.crash.dedup_window_ms,
            },
            thermal: ThermalSettings {
                capture_floor: raw.thermal.capture_floor.parse().map_err(
                    |e: HardValidationError| match e {
                        HardValidationError::InvalidFieldValue { value, reason, .. } => {
                            HardValidationError::InvalidFieldValue {
                                field: "thermal.capture_floor",
                                value,
                                reason,
                            }
                        }
                        other => other,
                    },
                )?,
            },
        })
    }

    fn validate_frames(raw: RawFramesConfig) -> FrameWatchResult<FramesSettings> {
        // NaN fails this comparison too.
        if !(raw.jank_threshold_ms > 0.0 && raw.jank_threshold_ms <= 1000.0) {
            return Err(invalid(
                "frames.jank_threshold_ms",
                raw.jank_threshold_ms,
                "Must be greater than 0 and at most 1000ms",
            ));
        }

        check_range(
            "frames.unit_buffer_capacity",
            raw.unit_buffer_capacity,
            1,
            MAX_SAMPLE_CAPACITY,
        )?;
        check_range(
            "frames.source_buffer_capacity",
            raw.source_buffer_capacity,
            1,
            MAX_SAMPLE_CAPACITY,
        )?;

        Ok(FramesSettings {
            jank_threshold_ms: raw.jank_threshold_ms,
            unit_buffer_capacity: raw.unit_buffer_capacity,
            source_buffer_capacity: raw.source_buffer_capacity,
        })
    }

    fn validate_liveness(raw: RawLivenessConfig) -> FrameWatchResult<LivenessSettings> {
        if raw.staleness_threshold_ms == 0 {
            return Err(invalid(
                "liveness.staleness_threshold_ms",
                0,
                "Must be greater than 0",
            ));
        }
        if raw.sweep_interval_ms == 0 {
            return Err(invalid(
                "liveness.sweep_interval_ms",
                0,
                "Must be greater than 0",
            ));
        }

        Ok(LivenessSettings {
            staleness_threshold_ms: raw.staleness_threshold_ms,
            sweep_interval_ms: raw.sweep_interval_ms,
        })
    }

    fn validate_watchdog(raw: RawWatchdogConfig) -> FrameWatchResult<WatchdogSettings> {
        check_range(
            "watchdog.timeout_ms",
            raw.timeout_ms,
            MIN_WATCHDOG_TIMEOUT_MS,
            MAX_WATCHDOG_TIMEOUT_MS,
        )?;

        if raw.miss_threshold < 2 {
            return Err(invalid(
                "watchdog.miss_threshold",
                raw.miss_threshold,
                "A single isolated miss is never enough; must be at least 2",
            ));
        }

        Ok(WatchdogSettings {
            enabled: raw.enabled,
            timeout_ms: raw.timeout_ms,
            miss_threshold: raw.miss_threshold,
        })
    }

    fn validate_capture(raw: RawCaptureConfig) -> FrameWatchResult<CaptureSettings> {
        if raw.output_dir.trim().is_empty() {
            return Err(HardValidationError::SchemaValidation {
                message: "capture.output_dir cannot be empty".to_string(),
            }
            .into());
        }

        check_range(
            "capture.max_entries_per_pool",
            raw.max_entries_per_pool,
            1,
            MAX_ENTRIES_PER_POOL,
        )?;
        check_range(
            "capture.log_tail_lines",
            raw.log_tail_lines,
            0,
            MAX_LOG_TAIL_LINES,
        )?;

        Ok(CaptureSettings {
            output_dir: PathBuf::from(raw.output_dir),
            max_entries_per_pool: raw.max_entries_per_pool,
            log_tail_lines: raw.log_tail_lines,
            min_free_bytes: raw.min_free_bytes,
        })
    }
}

/// Empty or comment-only documents mean "all defaults".
fn is_blank_document(content: &str) -> bool {
    content
        .lines()
        .map(str::trim)
        .all(|line| line.is_empty() || line.starts_with('#') || line == "---")
}

fn invalid(field: &'static str, value: impl ToString, reason: &str) -> FrameWatchError {
    HardValidationError::InvalidFieldValue {
        field,
        value: value.to_string(),
        reason: reason.to_string(),
    }
    .into()
}

fn check_range<T>(field: &'static str, value: T, min: T, max: T) -> FrameWatchResult<()>
where
    T: PartialOrd + std::fmt::Display,
{
    if value < min || value > max {
        return Err(invalid(
            field,
            &value,
            &format!("Must be between {} and {}", min, max),
        ));
    }
    Ok(())
}
