// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! `fwatch simulate` command - Synthetic render loop.
//!
//! A dedicated thread plays the host's primary context: it renders frames,
//! reports unit data and draws, and services watchdog probes between frames.
//! Everything else (watchdog timer, liveness sweep, captures) runs on the
//! tokio runtime exactly as it would in a host.

use std::sync::mpsc::{self, Receiver};
use std::sync::Arc;
use std::time::Duration;

use framewatch_core::capture::DiagnosticFileWriter;
use framewatch_core::detect::Probe;
use framewatch_core::{
    HubCollaborators, ObservabilityHub, RotationPool, UnitId, UnitType,
};
use tokio::runtime::Handle;

use super::load_config_or_default;
use crate::log_buffer::LogRingBuffer;

/// Frame time of a healthy frame.
const GOOD_FRAME_MS: f64 = 8.0;

#[derive(Debug, Clone, Copy)]
pub struct SimulateOptions {
    pub frames: u32,
    pub jank_every: u32,
    pub jank_burst: u32,
    pub jank_ms: f64,
    pub stall_main_ms: u64,
    pub watchdog_timeout_ms: Option<u64>,
    pub crash_at: Option<u32>,
}

impl SimulateOptions {
    fn frame_duration(&self, frame: u32) -> f64 {
        if self.jank_every > 0 && frame % self.jank_every < self.jank_burst {
            self.jank_ms
        } else {
            GOOD_FRAME_MS
        }
    }
}

pub async fn execute(
    config_path: &str,
    options: SimulateOptions,
    log_ring: LogRingBuffer,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = load_config_or_default(config_path)?;
    if let Some(timeout_ms) = options.watchdog_timeout_ms {
        config.watchdog.timeout_ms = timeout_ms;
    }

    let mut collaborators = HubCollaborators::from_config(&config);
    collaborators.logs = Arc::new(log_ring);
    let writer = Arc::clone(&collaborators.writer);
    let hub = Arc::new(ObservabilityHub::new(config, collaborators));

    let (probe_tx, probe_rx) = mpsc::channel::<Probe>();
    hub.start(Arc::new(probe_tx), &Handle::current());

    tracing::info!(
        frames = options.frames,
        jank_every = options.jank_every,
        jank_ms = options.jank_ms,
        stall_main_ms = options.stall_main_ms,
        "Simulation started"
    );

    let primary_hub = Arc::clone(&hub);
    tokio::task::spawn_blocking(move || run_primary_loop(&primary_hub, options, probe_rx))
        .await??;

    hub.shutdown();
    // Let a capture still on the capture thread finish before reporting.
    let flush_hub = Arc::clone(&hub);
    if !tokio::task::spawn_blocking(move || flush_hub.flush_captures()).await? {
        tracing::warn!("Capture thread unavailable, some snapshots may be missing");
    }

    let stats = hub.capture().stats();
    let metrics = hub.metrics().snapshot();

    println!("Simulation complete");
    println!();
    println!("  Frames rendered:  {}", metrics.total_frame_count);
    println!(
        "  Slow frames:      {:.1}%",
        metrics.slow_frame_ratio() * 100.0
    );
    println!("  Captured:         {}", stats.captured);
    println!("  Dropped (busy):   {}", stats.dropped_in_flight);
    println!("  Skipped (disk):   {}", stats.skipped_pressure);
    println!("  Failed:           {}", stats.failed);
    println!();

    for pool in RotationPool::ALL {
        let entries = writer.list_entries(pool)?;
        println!("[{}] {} snapshot(s)", pool, entries.len());
        for entry in entries {
            println!("  {}", entry.path.display());
        }
    }

    Ok(())
}

fn run_primary_loop(
    hub: &ObservabilityHub,
    options: SimulateOptions,
    probes: Receiver<Probe>,
) -> Result<(), framewatch_core::HardValidationError> {
    let clock_type = UnitType::new("clock")?;
    let weather_type = UnitType::new("weather")?;
    let clock_unit = UnitId::new("clock-1")?;
    let weather_unit = UnitId::new("weather-1")?;
    let stall_at = options.frames / 2;

    for frame in 0..options.frames {
        while let Ok(probe) = probes.try_recv() {
            probe();
        }

        if options.stall_main_ms > 0 && frame == stall_at {
            tracing::info!(stall_ms = options.stall_main_ms, "Stalling primary context");
            std::thread::sleep(Duration::from_millis(options.stall_main_ms));
        }

        let duration = options.frame_duration(frame);
        hub.tracer().with_span(None, "frame", |_| {
            hub.on_frame(duration);
            hub.report_data(&clock_unit, &clock_type);
            hub.on_unit_draw(&clock_unit, &clock_type, duration / 4.0);
            hub.metrics().record_recomposition(clock_unit.as_str());
            if frame % 10 == 0 {
                hub.report_data(&weather_unit, &weather_type);
                hub.metrics()
                    .record_source_latency("weather-api", 40.0 + f64::from(frame % 7));
            }
            hub.on_unit_draw(&weather_unit, &weather_type, duration / 2.0);
        });

        if options.crash_at == Some(frame) {
            hub.report_crash(&weather_unit, &weather_type, "simulated failure");
        }

        std::thread::sleep(Duration::from_secs_f64(duration / 1000.0));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options() -> SimulateOptions {
        SimulateOptions {
            frames: 100,
            jank_every: 20,
            jank_burst: 5,
            jank_ms: 40.0,
            stall_main_ms: 0,
            watchdog_timeout_ms: None,
            crash_at: None,
        }
    }

    #[test]
    fn test_jank_bursts() {
        let opts = options();
        let janky: Vec<u32> = (0..40).filter(|&f| opts.frame_duration(f) > 16.0).collect();
        assert_eq!(janky, vec![0, 1, 2, 3, 4, 20, 21, 22, 23, 24]);
    }

    #[test]
    fn test_jank_disabled() {
        let opts = SimulateOptions {
            jank_every: 0,
            ..options()
        };
        assert!((0..100).all(|f| opts.frame_duration(f) == GOOD_FRAME_MS));
    }
}
