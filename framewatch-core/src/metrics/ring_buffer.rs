// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Fixed-capacity circular buffer of numeric samples.
//!
//! Once full, every insert overwrites the single oldest sample in O(1).
//! Queries (average, percentile, ordered copy) work on whatever is held.

use serde::{Deserialize, Serialize};

/// Fixed-capacity ring of `f64` samples.
#[derive(Debug, Clone)]
pub struct BoundedCircularBuffer {
    samples: Vec<f64>,
    capacity: usize,
    /// Slot the next sample is written to once the buffer is full.
    next: usize,
}

impl BoundedCircularBuffer {
    /// Create an empty buffer. A zero capacity is bumped to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: Vec::with_capacity(capacity),
            capacity,
            next: 0,
        }
    }

    /// Append a sample, discarding the oldest one if the buffer is full.
    pub fn add(&mut self, value: f64) {
        if self.samples.len() < self.capacity {
            self.samples.push(value);
        } else {
            self.samples[self.next] = value;
        }
        self.next = (self.next + 1) % self.capacity;
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Copy of the held samples, oldest first.
    pub fn to_ordered_vec(&self) -> Vec<f64> {
        if self.samples.len() < self.capacity {
            return self.samples.clone();
        }
        let mut ordered = Vec::with_capacity(self.capacity);
        ordered.extend_from_slice(&self.samples[self.next..]);
        ordered.extend_from_slice(&self.samples[..self.next]);
        ordered
    }

    /// Mean of the held samples; 0.0 when empty.
    pub fn average(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        self.samples.iter().sum::<f64>() / self.samples.len() as f64
    }

    /// Nearest-rank percentile for `p` in `[0, 1]`; `None` when empty.
    pub fn percentile(&self, p: f64) -> Option<f64> {
        let mut sorted = self.samples.clone();
        sorted.sort_by(f64::total_cmp);
        percentile_of_sorted(&sorted, p)
    }

    /// Summary statistics over the held samples.
    pub fn stats(&self) -> SampleStats {
        SampleStats::from_samples(&self.samples)
    }

    pub fn clear(&mut self) {
        self.samples.clear();
        self.next = 0;
    }
}

/// Nearest-rank percentile over an ascending slice: the value at rank
/// `ceil(p * n)`, so `p = 0` yields the minimum and `p = 1` the maximum.
pub fn percentile_of_sorted(sorted: &[f64], p: f64) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }
    let p = if p.is_nan() { 0.0 } else { p.clamp(0.0, 1.0) };
    let n = sorted.len();
    // Absorb float noise such as 0.95 * 100 = 95.00000000000001.
    let rank = (p * n as f64 - 1e-9).ceil().max(1.0) as usize;
    Some(sorted[rank.min(n) - 1])
}

/// Summary statistics for a set of samples.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct SampleStats {
    pub count: usize,
    pub average: f64,
    pub p50: f64,
    pub p95: f64,
    pub p99: f64,
    pub max: f64,
}

impl SampleStats {
    /// Calculate statistics from unsorted samples. Empty input yields zeros.
    pub fn from_samples(samples: &[f64]) -> Self {
        if samples.is_empty() {
            return Self::default();
        }

        let mut sorted = samples.to_vec();
        sorted.sort_by(f64::total_cmp);

        let at = |p: f64| percentile_of_sorted(&sorted, p).unwrap_or(0.0);

        Self {
            count: sorted.len(),
            average: sorted.iter().sum::<f64>() / sorted.len() as f64,
            p50: at(0.50),
            p95: at(0.95),
            p99: at(0.99),
            max: sorted[sorted.len() - 1],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filled(range: std::ops::RangeInclusive<u32>, capacity: usize) -> BoundedCircularBuffer {
        let mut buffer = BoundedCircularBuffer::new(capacity);
        for v in range {
            buffer.add(v as f64);
        }
        buffer
    }

    #[test]
    fn test_empty_buffer() {
        let buffer = BoundedCircularBuffer::new(8);
        assert!(buffer.is_empty());
        assert_eq!(buffer.average(), 0.0);
        assert_eq!(buffer.percentile(0.5), None);
        assert!(buffer.to_ordered_vec().is_empty());
    }

    #[test]
    fn test_keeps_last_n_in_insertion_order() {
        let buffer = filled(1..=13, 5);
        assert_eq!(buffer.len(), 5);
        assert_eq!(buffer.to_ordered_vec(), vec![9.0, 10.0, 11.0, 12.0, 13.0]);
    }

    #[test]
    fn test_exactly_full_is_ordered() {
        let buffer = filled(1..=4, 4);
        assert_eq!(buffer.to_ordered_vec(), vec![1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_wraparound_every_offset() {
        for extra in 0..10u32 {
            let buffer = filled(1..=(7 + extra), 7);
            let expected: Vec<f64> = ((1 + extra)..=(7 + extra)).map(|v| v as f64).collect();
            assert_eq!(buffer.to_ordered_vec(), expected, "extra = {}", extra);
        }
    }

    #[test]
    fn test_percentiles_one_to_hundred() {
        let buffer = filled(1..=100, 100);
        assert_eq!(buffer.percentile(0.5), Some(50.0));
        assert_eq!(buffer.percentile(0.95), Some(95.0));
        assert_eq!(buffer.percentile(0.99), Some(99.0));
        assert_eq!(buffer.percentile(0.0), Some(1.0));
        assert_eq!(buffer.percentile(1.0), Some(100.0));
    }

    #[test]
    fn test_percentile_unsorted_input() {
        let mut buffer = BoundedCircularBuffer::new(5);
        for v in [30.0, 10.0, 50.0, 20.0, 40.0] {
            buffer.add(v);
        }
        assert_eq!(buffer.percentile(0.0), Some(10.0));
        assert_eq!(buffer.percentile(0.5), Some(30.0));
        assert_eq!(buffer.percentile(1.0), Some(50.0));
    }

    #[test]
    fn test_average_only_counts_held_samples() {
        let buffer = filled(1..=10, 4);
        assert!((buffer.average() - 8.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_zero_capacity_is_bumped() {
        let mut buffer = BoundedCircularBuffer::new(0);
        buffer.add(1.0);
        buffer.add(2.0);
        assert_eq!(buffer.capacity(), 1);
        assert_eq!(buffer.to_ordered_vec(), vec![2.0]);
    }

    #[test]
    fn test_stats() {
        let stats = filled(1..=100, 100).stats();
        assert_eq!(stats.count, 100);
        assert_eq!(stats.p50, 50.0);
        assert_eq!(stats.p99, 99.0);
        assert_eq!(stats.max, 100.0);
        assert!((stats.average - 50.5).abs() < 1e-9);
    }
}
