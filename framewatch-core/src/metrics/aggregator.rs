// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Thread-safe frame metrics aggregation.
//!
//! Frame durations land in six atomic histogram buckets. Per-unit draw times
//! and per-source latencies land in lazily created ring buffers held in a
//! [`DashMap`], so first-touch creation under contention yields exactly one
//! buffer and writers to different keys never share a lock.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::metrics::ring_buffer::{BoundedCircularBuffer, SampleStats};

/// Number of frame histogram buckets.
pub const FRAME_BUCKET_COUNT: usize = 6;

/// Exclusive upper bounds (ms) of the first five buckets; the last bucket is open.
pub const FRAME_BUCKET_BOUNDS_MS: [f64; FRAME_BUCKET_COUNT - 1] = [8.0, 12.0, 16.0, 24.0, 33.0];

/// Default per-key ring buffer capacity.
pub const DEFAULT_SAMPLE_CAPACITY: usize = 64;

/// Bucket index for a frame duration.
pub fn bucket_index(duration_ms: f64) -> usize {
    FRAME_BUCKET_BOUNDS_MS
        .iter()
        .position(|&bound| duration_ms < bound)
        .unwrap_or(FRAME_BUCKET_COUNT - 1)
}

/// Human-readable bucket label, e.g. `"<16ms"` or `">=33ms"`.
pub fn bucket_label(index: usize) -> String {
    match FRAME_BUCKET_BOUNDS_MS.get(index) {
        Some(bound) => format!("<{}ms", bound),
        None => format!(">={}ms", FRAME_BUCKET_BOUNDS_MS[FRAME_BUCKET_COUNT - 2]),
    }
}

/// Aggregates render-path metrics from any number of producer threads.
#[derive(Debug)]
pub struct FrameMetricsAggregator {
    histogram: [AtomicU64; FRAME_BUCKET_COUNT],
    unit_draw_times: DashMap<String, BoundedCircularBuffer>,
    source_latencies: DashMap<String, BoundedCircularBuffer>,
    recompositions: DashMap<String, AtomicU64>,
    unit_capacity: usize,
    source_capacity: usize,
}

impl FrameMetricsAggregator {
    /// Create an aggregator with the default ring buffer capacity.
    pub fn new() -> Self {
        Self::with_capacities(DEFAULT_SAMPLE_CAPACITY, DEFAULT_SAMPLE_CAPACITY)
    }

    pub fn with_capacities(unit_capacity: usize, source_capacity: usize) -> Self {
        Self {
            histogram: Default::default(),
            unit_draw_times: DashMap::new(),
            source_latencies: DashMap::new(),
            recompositions: DashMap::new(),
            unit_capacity: unit_capacity.max(1),
            source_capacity: source_capacity.max(1),
        }
    }

    /// Create an aggregator wrapped in an Arc for sharing across threads.
    pub fn new_shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Count one rendered frame. Non-finite durations are ignored.
    pub fn record_frame(&self, duration_ms: f64) {
        if !duration_ms.is_finite() {
            return;
        }
        self.histogram[bucket_index(duration_ms)].fetch_add(1, Ordering::Relaxed);
    }

    /// Store a draw duration for one unit.
    pub fn record_unit_draw(&self, unit_key: &str, duration_ms: f64) {
        Self::push_sample(
            &self.unit_draw_times,
            unit_key,
            duration_ms,
            self.unit_capacity,
        );
    }

    /// Store a latency sample for a data source; sources need no registration.
    pub fn record_source_latency(&self, source_key: &str, latency_ms: f64) {
        Self::push_sample(
            &self.source_latencies,
            source_key,
            latency_ms,
            self.source_capacity,
        );
    }

    /// Count one recomposition/redraw of a unit.
    pub fn record_recomposition(&self, unit_key: &str) {
        if let Some(counter) = self.recompositions.get(unit_key) {
            counter.fetch_add(1, Ordering::Relaxed);
            return;
        }
        self.recompositions
            .entry(unit_key.to_string())
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(1, Ordering::Relaxed);
    }

    fn push_sample(
        map: &DashMap<String, BoundedCircularBuffer>,
        key: &str,
        value: f64,
        capacity: usize,
    ) {
        // Fast path avoids allocating the key once the buffer exists.
        if let Some(mut buffer) = map.get_mut(key) {
            buffer.add(value);
            return;
        }
        map.entry(key.to_string())
            .or_insert_with(|| BoundedCircularBuffer::new(capacity))
            .add(value);
    }

    /// Total frames recorded so far.
    pub fn total_frame_count(&self) -> u64 {
        self.histogram
            .iter()
            .map(|bucket| bucket.load(Ordering::Relaxed))
            .sum()
    }

    /// Deep copy of the current state. Later writes never show through it.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let mut frame_histogram = [0u64; FRAME_BUCKET_COUNT];
        for (slot, bucket) in frame_histogram.iter_mut().zip(&self.histogram) {
            *slot = bucket.load(Ordering::Acquire);
        }

        let copy_samples = |map: &DashMap<String, BoundedCircularBuffer>| {
            map.iter()
                .map(|entry| (entry.key().clone(), entry.value().to_ordered_vec()))
                .collect::<BTreeMap<_, _>>()
        };

        MetricsSnapshot {
            // Derived from the copied buckets so the two always agree.
            total_frame_count: frame_histogram.iter().sum(),
            frame_histogram,
            unit_draw_times: copy_samples(&self.unit_draw_times),
            source_latencies: copy_samples(&self.source_latencies),
            recomposition_counts: self
                .recompositions
                .iter()
                .map(|entry| (entry.key().clone(), entry.value().load(Ordering::Relaxed)))
                .collect(),
        }
    }
}

impl Default for FrameMetricsAggregator {
    fn default() -> Self {
        Self::new()
    }
}

/// Immutable point-in-time copy of the aggregator.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub total_frame_count: u64,
    pub frame_histogram: [u64; FRAME_BUCKET_COUNT],
    /// Draw durations per unit, oldest first.
    pub unit_draw_times: BTreeMap<String, Vec<f64>>,
    /// Latency samples per source, oldest first.
    pub source_latencies: BTreeMap<String, Vec<f64>>,
    pub recomposition_counts: BTreeMap<String, u64>,
}

impl MetricsSnapshot {
    pub fn unit_draw_stats(&self, unit_key: &str) -> Option<SampleStats> {
        self.unit_draw_times
            .get(unit_key)
            .map(|samples| SampleStats::from_samples(samples))
    }

    pub fn source_latency_stats(&self, source_key: &str) -> Option<SampleStats> {
        self.source_latencies
            .get(source_key)
            .map(|samples| SampleStats::from_samples(samples))
    }

    /// Fraction of frames at or above the 16ms budget.
    pub fn slow_frame_ratio(&self) -> f64 {
        if self.total_frame_count == 0 {
            return 0.0;
        }
        let slow: u64 = self.frame_histogram[bucket_index(16.0)..].iter().sum();
        slow as f64 / self.total_frame_count as f64
    }
}
