// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! In-memory tail of formatted log lines.
//!
//! Installed as the writer of an extra `fmt` layer so every event that passes
//! the filter also lands here. Captures read the tail through
//! [`LogRingBufferSink`].

use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex, PoisonError};

use framewatch_core::capture::LogRingBufferSink;
use tracing_subscriber::fmt::MakeWriter;

/// Bounded ring of the most recent log lines. Cheap to clone.
#[derive(Debug, Clone)]
pub struct LogRingBuffer {
    lines: Arc<Mutex<VecDeque<String>>>,
    capacity: usize,
}

impl LogRingBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            lines: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            capacity,
        }
    }

    pub fn push_line(&self, line: String) {
        let mut lines = self.lines.lock().unwrap_or_else(PoisonError::into_inner);
        if lines.len() == self.capacity {
            lines.pop_front();
        }
        lines.push_back(line);
    }

    pub fn len(&self) -> usize {
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl LogRingBufferSink for LogRingBuffer {
    fn recent_lines(&self, max_lines: usize) -> Vec<String> {
        let lines = self.lines.lock().unwrap_or_else(PoisonError::into_inner);
        let skip = lines.len().saturating_sub(max_lines);
        lines.iter().skip(skip).cloned().collect()
    }
}

/// Per-event writer; splits what the formatter writes into lines.
pub struct LogRingWriter {
    buffer: LogRingBuffer,
    pending: Vec<u8>,
}

impl LogRingWriter {
    fn flush_line(&mut self, bytes: &[u8]) {
        let line = String::from_utf8_lossy(bytes).trim_end().to_string();
        if !line.is_empty() {
            self.buffer.push_line(line);
        }
    }
}

impl io::Write for LogRingWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.pending.extend_from_slice(buf);
        while let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            self.flush_line(&line);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for LogRingWriter {
    fn drop(&mut self) {
        let rest = std::mem::take(&mut self.pending);
        self.flush_line(&rest);
    }
}

impl<'a> MakeWriter<'a> for LogRingBuffer {
    type Writer = LogRingWriter;

    fn make_writer(&'a self) -> Self::Writer {
        LogRingWriter {
            buffer: self.clone(),
            pending: Vec::new(),
        }
    }
}
