// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Custom error types for framewatch.
//!
//! Explicit enum error types only. No `Box<dyn Error>`, no `anyhow::Result`.
//! None of these ever escape a detector: the capture boundary converts them
//! into a logged "no snapshot" outcome.

use std::path::PathBuf;

use thiserror::Error;

use crate::types::RotationPool;

/// Top-level error type for framewatch.
#[derive(Debug, Error)]
pub enum FrameWatchError {
    // =========================================================================
    // Configuration Errors - Fail-Fast on Invalid Config
    // =========================================================================
    #[error("Hard validation error: {0}")]
    HardValidation(#[from] HardValidationError),

    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: PathBuf },

    #[error("Configuration parse error: {message}")]
    ConfigParse { message: String },

    // =========================================================================
    // Diagnostic Capture Errors
    // =========================================================================
    #[error("Capture error: {0}")]
    Capture(#[from] CaptureError),

    // =========================================================================
    // System Errors
    // =========================================================================
    #[error("IO error: {context} - {source}")]
    Io {
        context: &'static str,
        #[source]
        source: std::io::Error,
    },
}

/// Hard validation errors reject a configuration at load time.
#[derive(Debug, Error)]
pub enum HardValidationError {
    #[error("Invalid field value: {field} = {value} - {reason}")]
    InvalidFieldValue {
        field: &'static str,
        value: String,
        reason: String,
    },

    #[error("Schema validation failed: {message}")]
    SchemaValidation { message: String },
}

/// Errors raised while assembling, persisting or reading a diagnostic snapshot.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("Failed to serialize snapshot: {reason}")]
    Serialize { reason: String },

    #[error("Failed to write snapshot into pool '{pool}': {reason}")]
    WriteFailed { pool: RotationPool, reason: String },

    #[error("Failed to evict from pool '{pool}': {reason}")]
    EvictionFailed { pool: RotationPool, reason: String },

    #[error("Artifact checksum mismatch: expected {expected:#010x}, got {actual:#010x}")]
    ChecksumMismatch { expected: u32, actual: u32 },

    #[error("Malformed artifact {path}: {reason}")]
    MalformedArtifact { path: PathBuf, reason: String },

    #[error("Capture panicked: {reason}")]
    Panicked { reason: String },
}

/// Result type alias using FrameWatchError.
pub type FrameWatchResult<T> = Result<T, FrameWatchError>;
