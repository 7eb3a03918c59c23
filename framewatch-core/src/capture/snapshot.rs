// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Diagnostic snapshot and its on-disk artifact format.
//!
//! An artifact is one ASCII header line followed by a JSON payload:
//!
//! ```text
//! FWSNAP1 <crc32 of payload, 8 hex digits> <payload length in bytes>\n
//! {"id":"...","trigger":{...},...}
//! ```
//!
//! The header lets readers reject truncated or corrupted files before parsing.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::CaptureError;
use crate::metrics::MetricsSnapshot;
use crate::trace::Span;
use crate::types::{AnomalyTrigger, RotationPool};

/// Artifact magic and format version.
pub const ARTIFACT_MAGIC: &str = "FWSNAP1";

/// File extension of persisted artifacts.
pub const ARTIFACT_EXTENSION: &str = "fwsnap";

/// Everything captured for one anomaly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagnosticSnapshot {
    pub id: String,
    /// Monotonic per-process capture number; orders captures taken in the same millisecond.
    pub sequence: u64,
    pub trigger: AnomalyTrigger,
    pub pool: RotationPool,
    pub timestamp_ms: u64,
    pub metrics: MetricsSnapshot,
    pub log_tail: Vec<String>,
    pub active_spans: Vec<Span>,
}

impl DiagnosticSnapshot {
    /// File name of this snapshot's artifact. Lexical order equals capture order.
    pub fn artifact_name(&self) -> String {
        format!(
            "{:016}_{:010}_{}.{}",
            self.timestamp_ms, self.sequence, self.id, ARTIFACT_EXTENSION
        )
    }
}

/// Serialize a snapshot into artifact bytes.
pub fn encode_artifact(snapshot: &DiagnosticSnapshot) -> Result<Vec<u8>, CaptureError> {
    let payload = serde_json::to_vec(snapshot).map_err(|e| CaptureError::Serialize {
        reason: e.to_string(),
    })?;

    let header = format!(
        "{} {:08x} {}\n",
        ARTIFACT_MAGIC,
        crc32fast::hash(&payload),
        payload.len()
    );

    let mut bytes = Vec::with_capacity(header.len() + payload.len());
    bytes.extend_from_slice(header.as_bytes());
    bytes.extend_from_slice(&payload);
    Ok(bytes)
}

/// Parse and verify artifact bytes read from `path`.
pub fn decode_artifact(bytes: &[u8], path: &Path) -> Result<DiagnosticSnapshot, CaptureError> {
    let malformed = |reason: &str| CaptureError::MalformedArtifact {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    };

    let newline = bytes
        .iter()
        .position(|&b| b == b'\n')
        .ok_or_else(|| malformed("missing header line"))?;
    let header =
        std::str::from_utf8(&bytes[..newline]).map_err(|_| malformed("header is not UTF-8"))?;
    let payload = &bytes[newline + 1..];

    let mut fields = header.split(' ');
    if fields.next() != Some(ARTIFACT_MAGIC) {
        return Err(malformed("unknown magic"));
    }
    let expected = fields
        .next()
        .and_then(|crc| u32::from_str_radix(crc, 16).ok())
        .ok_or_else(|| malformed("bad checksum field"))?;
    let length = fields
        .next()
        .and_then(|len| len.parse::<usize>().ok())
        .ok_or_else(|| malformed("bad length field"))?;

    if payload.len() != length {
        return Err(malformed(&format!(
            "payload is {} bytes, header says {}",
            payload.len(),
            length
        )));
    }

    let actual = crc32fast::hash(payload);
    if actual != expected {
        return Err(CaptureError::ChecksumMismatch { expected, actual });
    }

    serde_json::from_slice(payload).map_err(|e| malformed(&format!("invalid JSON: {}", e)))
}

/// Read and verify an artifact file.
pub fn read_snapshot(path: impl AsRef<Path>) -> Result<DiagnosticSnapshot, CaptureError> {
    let path = path.as_ref();
    let bytes = std::fs::read(path).map_err(|e| CaptureError::MalformedArtifact {
        path: path.to_path_buf(),
        reason: format!("unreadable: {}", e),
    })?;
    decode_artifact(&bytes, path)
}
