// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! `fwatch prune` command - Trim every rotation pool to its ceiling.

use framewatch_core::capture::{enforce_pool_ceiling, FsDiagnosticWriter};
use framewatch_core::RotationPool;

use super::load_config_or_default;

pub async fn execute(config_path: &str) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config_or_default(config_path)?;
    let writer = FsDiagnosticWriter::new(
        config.capture.output_dir.clone(),
        config.capture.min_free_bytes,
    );
    let max_entries = config.capture.max_entries_per_pool;

    let mut total = 0;
    for pool in RotationPool::ALL {
        let evicted = enforce_pool_ceiling(&writer, pool, max_entries)?;
        println!("[{}] evicted {} snapshot(s)", pool, evicted.len());
        total += evicted.len();
    }

    println!();
    println!("Pruned {} snapshot(s), ceiling {} per pool", total, max_entries);
    Ok(())
}
