// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! `fwatch show` command - Verify and print a snapshot artifact.

use framewatch_core::capture::read_snapshot;
use framewatch_core::metrics::bucket_label;

pub async fn execute(artifact: &str) -> Result<(), Box<dyn std::error::Error>> {
    let snapshot = read_snapshot(artifact)?;

    println!("✓ Checksum verified");
    println!();
    println!("Snapshot {} (#{})", snapshot.id, snapshot.sequence);
    println!("  Trigger:   {}", snapshot.trigger);
    println!("  Pool:      {}", snapshot.pool);
    println!("  Timestamp: {}ms", snapshot.timestamp_ms);
    println!("  Frames:    {}", snapshot.metrics.total_frame_count);
    for (index, count) in snapshot.metrics.frame_histogram.iter().enumerate() {
        println!("    {:<10} {}", bucket_label(index), count);
    }
    println!(
        "  Slow frames: {:.1}%",
        snapshot.metrics.slow_frame_ratio() * 100.0
    );
    println!("  Active spans: {}", snapshot.active_spans.len());
    println!("  Log lines:    {}", snapshot.log_tail.len());
    println!();
    println!("{}", serde_json::to_string_pretty(&snapshot)?);

    Ok(())
}
