// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! `fwatch validate` command - Validate configuration file.

use framewatch_core::ConfigLoader;

pub async fn execute(file: &str) -> Result<(), Box<dyn std::error::Error>> {
    tracing::info!(file = %file, "Validating configuration");

    match ConfigLoader::load_file(file) {
        Ok(config) => {
            println!("✓ Configuration is valid");
            println!();
            println!("Frames:");
            println!("  Jank Threshold:     {}ms", config.frames.jank_threshold_ms);
            println!(
                "  Buffer Capacity:    {} per unit, {} per source",
                config.frames.unit_buffer_capacity, config.frames.source_buffer_capacity
            );
            println!();
            println!("Liveness:");
            println!(
                "  Staleness:          {}ms",
                config.liveness.staleness_threshold_ms
            );
            println!("  Sweep Interval:     {}ms", config.liveness.sweep_interval_ms);
            println!();
            println!("Watchdog:");
            if config.watchdog.enabled {
                println!("  Timeout:            {}ms", config.watchdog.timeout_ms);
                println!("  Miss Threshold:     {}", config.watchdog.miss_threshold);
            } else {
                println!("  Disabled");
            }
            println!();
            println!("Capture:");
            println!(
                "  Output Directory:   {}",
                config.capture.output_dir.display()
            );
            println!(
                "  Pool Ceiling:       {} entries",
                config.capture.max_entries_per_pool
            );
            println!("  Log Tail:           {} lines", config.capture.log_tail_lines);
            println!(
                "  Min Free Space:     {} bytes",
                config.capture.min_free_bytes
            );
            println!();
            println!("Crash Dedup Window:   {}ms", config.crash.dedup_window_ms);
            println!("Thermal Floor:        {}", config.thermal.capture_floor);
            Ok(())
        }
        Err(e) => {
            eprintln!("✗ Configuration validation failed:");
            eprintln!("  {}", e);
            std::process::exit(1);
        }
    }
}
