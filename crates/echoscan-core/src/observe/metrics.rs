//! # Session Metrics
//!
//! Prometheus-compatible metrics for a simulation session:
//!
//! - **Counters**: acquisitions per mode, failures, tasks submitted, results delivered
//! - **Gauges**: pipeline queue depth, IQ buffer size
//! - **Histograms**: simulate and image formation latency
//!
//! ## Example
//!
//! ```rust
//! use echoscan_core::observe::SessionMetrics;
//!
//! let metrics = SessionMetrics::new();
//! metrics.bmode_acquisitions.inc();
//! metrics.queue_depth.inc();
//! metrics.simulate_latency_ms.observe(120.0);
//!
//! let snapshot = metrics.snapshot();
//! assert_eq!(snapshot.bmode_acquisitions, 1);
//! ```

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

/// Monotonic atomic counter.
#[derive(Debug, Default)]
pub struct Counter {
    value: AtomicU64,
}

impl Counter {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn inc_by(&self, n: u64) {
        self.value.fetch_add(n, Ordering::Relaxed);
    }

    #[inline]
    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn reset(&self) {
        self.value.store(0, Ordering::Relaxed);
    }
}

/// Atomic gauge (can go up or down).
#[derive(Debug, Default)]
pub struct Gauge {
    value: AtomicI64,
}

impl Gauge {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn set(&self, v: i64) {
        self.value.store(v, Ordering::Relaxed);
    }

    /// Increment by 1 and return the new value.
    #[inline]
    pub fn inc(&self) -> i64 {
        self.value.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Decrement by 1 and return the new value.
    #[inline]
    pub fn dec(&self) -> i64 {
        self.value.fetch_sub(1, Ordering::Relaxed) - 1
    }

    #[inline]
    pub fn get(&self) -> i64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Histogram with fixed bucket boundaries.
#[derive(Debug)]
pub struct Histogram {
    boundaries: Vec<f64>,
    /// One count per boundary plus an overflow bucket
    buckets: Vec<AtomicU64>,
    /// Sum of observations in thousandths
    sum_milli: AtomicU64,
    count: AtomicU64,
}

impl Default for Histogram {
    fn default() -> Self {
        Self::latency_ms()
    }
}

impl Histogram {
    pub fn new(boundaries: Vec<f64>) -> Self {
        let num_buckets = boundaries.len() + 1;
        Self {
            boundaries,
            buckets: (0..num_buckets).map(|_| AtomicU64::new(0)).collect(),
            sum_milli: AtomicU64::new(0),
            count: AtomicU64::new(0),
        }
    }

    /// Buckets suited to millisecond latencies of whole-frame operations.
    pub fn latency_ms() -> Self {
        Self::new(vec![
            1.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0, 10000.0,
        ])
    }

    pub fn observe(&self, value: f64) {
        let idx = self
            .boundaries
            .iter()
            .position(|&b| value < b)
            .unwrap_or(self.boundaries.len());
        self.buckets[idx].fetch_add(1, Ordering::Relaxed);
        self.sum_milli
            .fetch_add((value.max(0.0) * 1000.0) as u64, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn sum(&self) -> f64 {
        self.sum_milli.load(Ordering::Relaxed) as f64 / 1000.0
    }

    pub fn bucket_counts(&self) -> Vec<u64> {
        self.buckets.iter().map(|b| b.load(Ordering::Relaxed)).collect()
    }

    pub fn boundaries(&self) -> &[f64] {
        &self.boundaries
    }

    fn write_prometheus(&self, name: &str, help: &str, out: &mut String) {
        out.push_str(&format!("# HELP {} {}\n", name, help));
        out.push_str(&format!("# TYPE {} histogram\n", name));
        let mut cumulative = 0;
        for (bound, count) in self.boundaries.iter().zip(self.bucket_counts()) {
            cumulative += count;
            out.push_str(&format!("{}_bucket{{le=\"{}\"}} {}\n", name, bound, cumulative));
        }
        out.push_str(&format!("{}_bucket{{le=\"+Inf\"}} {}\n", name, self.count()));
        out.push_str(&format!("{}_sum {}\n", name, self.sum()));
        out.push_str(&format!("{}_count {}\n", name, self.count()));
    }
}

/// Metrics for one simulation session.
#[derive(Debug, Default)]
pub struct SessionMetrics {
    /// Successful B-mode acquisitions
    pub bmode_acquisitions: Counter,
    /// Successful color-Doppler packet acquisitions
    pub color_acquisitions: Counter,
    /// Requests abandoned because of an error
    pub acquisition_failures: Counter,
    /// Work tasks handed to the pipeline
    pub tasks_submitted: Counter,
    /// Results delivered to the subscriber
    pub results_delivered: Counter,
    /// Tasks queued or in formation
    pub queue_depth: Gauge,
    /// Frames held in the IQ buffer
    pub iq_buffer_frames: Gauge,
    /// Duration of one simulate call
    pub simulate_latency_ms: Histogram,
    /// Duration of one image formation
    pub formation_latency_ms: Histogram,
}

impl SessionMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            bmode_acquisitions: self.bmode_acquisitions.get(),
            color_acquisitions: self.color_acquisitions.get(),
            acquisition_failures: self.acquisition_failures.get(),
            tasks_submitted: self.tasks_submitted.get(),
            results_delivered: self.results_delivered.get(),
            queue_depth: self.queue_depth.get(),
            iq_buffer_frames: self.iq_buffer_frames.get(),
            simulate_count: self.simulate_latency_ms.count(),
            simulate_sum_ms: self.simulate_latency_ms.sum(),
            formation_count: self.formation_latency_ms.count(),
            formation_sum_ms: self.formation_latency_ms.sum(),
        }
    }

    /// Export metrics in Prometheus text format.
    pub fn to_prometheus(&self) -> String {
        let s = self.snapshot();
        let mut out = String::new();

        let counters = [
            ("echoscan_bmode_acquisitions_total", "Successful B-mode acquisitions", s.bmode_acquisitions),
            ("echoscan_color_acquisitions_total", "Successful color-Doppler acquisitions", s.color_acquisitions),
            ("echoscan_acquisition_failures_total", "Abandoned simulate requests", s.acquisition_failures),
            ("echoscan_tasks_submitted_total", "Work tasks submitted to the pipeline", s.tasks_submitted),
            ("echoscan_results_delivered_total", "Images delivered by the pipeline", s.results_delivered),
        ];
        for (name, help, value) in counters {
            out.push_str(&format!("# HELP {} {}\n", name, help));
            out.push_str(&format!("# TYPE {} counter\n", name));
            out.push_str(&format!("{} {}\n", name, value));
        }

        let gauges = [
            ("echoscan_pipeline_queue_depth", "Tasks waiting in the pipeline", s.queue_depth),
            ("echoscan_iq_buffer_frames", "Frames held in the IQ buffer", s.iq_buffer_frames),
        ];
        for (name, help, value) in gauges {
            out.push_str(&format!("# HELP {} {}\n", name, help));
            out.push_str(&format!("# TYPE {} gauge\n", name));
            out.push_str(&format!("{} {}\n", name, value));
        }

        self.simulate_latency_ms.write_prometheus(
            "echoscan_simulate_latency_ms",
            "Simulate call duration in milliseconds",
            &mut out,
        );
        self.formation_latency_ms.write_prometheus(
            "echoscan_formation_latency_ms",
            "Image formation duration in milliseconds",
            &mut out,
        );

        out
    }
}

/// Point-in-time copy of [`SessionMetrics`].
#[derive(Debug, Clone, PartialEq)]
pub struct MetricsSnapshot {
    pub bmode_acquisitions: u64,
    pub color_acquisitions: u64,
    pub acquisition_failures: u64,
    pub tasks_submitted: u64,
    pub results_delivered: u64,
    pub queue_depth: i64,
    pub iq_buffer_frames: i64,
    pub simulate_count: u64,
    pub simulate_sum_ms: f64,
    pub formation_count: u64,
    pub formation_sum_ms: f64,
}

impl MetricsSnapshot {
    pub fn avg_simulate_ms(&self) -> f64 {
        if self.simulate_count == 0 {
            0.0
        } else {
            self.simulate_sum_ms / self.simulate_count as f64
        }
    }

    pub fn avg_formation_ms(&self) -> f64 {
        if self.formation_count == 0 {
            0.0
        } else {
            self.formation_sum_ms / self.formation_count as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter() {
        let counter = Counter::new();
        counter.inc();
        counter.inc_by(9);
        assert_eq!(counter.get(), 10);
        counter.reset();
        assert_eq!(counter.get(), 0);
    }

    #[test]
    fn test_gauge_returns_new_value() {
        let gauge = Gauge::new();
        assert_eq!(gauge.inc(), 1);
        assert_eq!(gauge.inc(), 2);
        assert_eq!(gauge.dec(), 1);
        gauge.set(7);
        assert_eq!(gauge.get(), 7);
    }

    #[test]
    fn test_histogram() {
        let hist = Histogram::new(vec![10.0, 100.0]);
        hist.observe(5.0);
        hist.observe(50.0);
        hist.observe(500.0);
        assert_eq!(hist.count(), 3);
        assert!((hist.sum() - 555.0).abs() < 0.01);
        assert_eq!(hist.bucket_counts(), vec![1, 1, 1]);
    }

    #[test]
    fn test_snapshot_averages() {
        let metrics = SessionMetrics::new();
        metrics.simulate_latency_ms.observe(10.0);
        metrics.simulate_latency_ms.observe(30.0);
        let snap = metrics.snapshot();
        assert_eq!(snap.simulate_count, 2);
        assert!((snap.avg_simulate_ms() - 20.0).abs() < 1e-9);
        assert_eq!(snap.avg_formation_ms(), 0.0);
    }

    #[test]
    fn test_prometheus_export() {
        let metrics = SessionMetrics::new();
        metrics.tasks_submitted.inc_by(3);
        metrics.formation_latency_ms.observe(2.0);

        let output = metrics.to_prometheus();
        assert!(output.contains("# TYPE echoscan_tasks_submitted_total counter"));
        assert!(output.contains("echoscan_tasks_submitted_total 3"));
        assert!(output.contains("echoscan_formation_latency_ms_bucket{le=\"5\"} 1"));
        assert!(output.contains("echoscan_formation_latency_ms_count 1"));
    }
}
