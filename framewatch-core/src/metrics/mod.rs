// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Render-path metrics.
//!
//! Lock-light aggregation of frame timings, per-unit draw times, per-source
//! latencies and recomposition counts, readable as immutable snapshots.

mod aggregator;
mod ring_buffer;

pub use aggregator::{
    bucket_index, bucket_label, FrameMetricsAggregator, MetricsSnapshot,
    DEFAULT_SAMPLE_CAPACITY, FRAME_BUCKET_BOUNDS_MS, FRAME_BUCKET_COUNT,
};
pub use ring_buffer::{percentile_of_sorted, BoundedCircularBuffer, SampleStats};
