// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! `fwatch list` command - List persisted snapshots per rotation pool.

use framewatch_core::capture::{read_snapshot, DiagnosticFileWriter, FsDiagnosticWriter};
use framewatch_core::RotationPool;

use super::load_config_or_default;

pub async fn execute(
    config_path: &str,
    pool: Option<&str>,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config_or_default(config_path)?;
    let writer = FsDiagnosticWriter::new(
        config.capture.output_dir.clone(),
        config.capture.min_free_bytes,
    );

    let pools: Vec<RotationPool> = match pool {
        Some(name) => vec![name.parse()?],
        None => RotationPool::ALL.to_vec(),
    };

    println!("Snapshots under {}", writer.root().display());
    println!();

    let mut total = 0;
    for pool in pools {
        let entries = writer.list_entries(pool)?;
        println!(
            "[{}] {}/{} entries",
            pool,
            entries.len(),
            config.capture.max_entries_per_pool
        );

        for entry in &entries {
            match read_snapshot(&entry.path) {
                Ok(snapshot) => println!(
                    "  {:<16} {:<20} {}",
                    snapshot.timestamp_ms,
                    snapshot.trigger.name(),
                    entry.name
                ),
                Err(e) => println!("  {:<16} {:<20} {} ({})", "-", "unreadable", entry.name, e),
            }
        }
        total += entries.len();
    }

    println!();
    println!("Total: {} snapshot(s)", total);

    Ok(())
}
