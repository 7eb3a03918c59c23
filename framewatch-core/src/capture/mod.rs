// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Diagnostic capture: snapshot assembly, artifact format and rotation pools.

mod pipeline;
mod sinks;
mod snapshot;
mod worker;
mod writer;

pub use pipeline::{
    CaptureConfig, CaptureStats, DiagnosticCapture, DEFAULT_LOG_TAIL_LINES,
    DEFAULT_MAX_ENTRIES_PER_POOL,
};
pub use sinks::{LogRingBufferSink, NoLogTail, TriggerSink};
pub use snapshot::{
    decode_artifact, encode_artifact, read_snapshot, DiagnosticSnapshot, ARTIFACT_EXTENSION,
    ARTIFACT_MAGIC,
};
pub use worker::CaptureWorker;
pub use writer::{
    enforce_pool_ceiling, DiagnosticFileWriter, FsDiagnosticWriter, PoolEntry,
    DEFAULT_MIN_FREE_BYTES, STALE_TMP_AGE,
};
