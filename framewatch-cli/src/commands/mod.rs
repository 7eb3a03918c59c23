// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! CLI command modules.

pub mod list;
pub mod prune;
pub mod show;
pub mod simulate;
pub mod validate;

use std::path::Path;

use framewatch_core::{ConfigLoader, FrameWatchConfig, FrameWatchResult};

/// Load the configuration, falling back to defaults when the file is absent.
pub fn load_config_or_default(path: &str) -> FrameWatchResult<FrameWatchConfig> {
    if Path::new(path).exists() {
        ConfigLoader::load_file(path)
    } else {
        tracing::info!(config = %path, "Config file not found, using defaults");
        Ok(FrameWatchConfig::default())
    }
}
