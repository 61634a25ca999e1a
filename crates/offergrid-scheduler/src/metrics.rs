//! Scheduler metrics.
//!
//! Components report through the [`Metrics`] trait held by the scheduler
//! context. [`InMemoryMetrics`] keeps everything in process and renders it
//! in the Prometheus text exposition format.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::{Mutex, PoisonError};

pub const OFFERS_RECEIVED: &str = "offergrid_offers_received";
pub const OFFERS_DECLINED: &str = "offergrid_offers_declined";
pub const TASKS_LAUNCHED: &str = "offergrid_tasks_launched";
pub const LAUNCHES_PER_OFFER_CYCLE: &str = "offergrid_launches_per_offer_cycle";
pub const DEPLOY_ATTEMPTS: &str = "offergrid_deploy_attempts";
pub const TASKS_KILLED: &str = "offergrid_tasks_killed";
pub const TASKS_FINISHED: &str = "offergrid_tasks_finished";
pub const OFFER_ROUND_SECONDS: &str = "offergrid_offer_round_seconds";
pub const CLUSTER_FAILURES: &str = "offergrid_cluster_failures";

pub trait Metrics: Send + Sync {
    /// Add `value` to the counter `name`.
    fn counter(&self, name: &str, value: u64);

    /// Record one observation of `name`.
    fn histogram(&self, name: &str, value: f64);
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl Metrics for NoopMetrics {
    fn counter(&self, _name: &str, _value: u64) {}

    fn histogram(&self, _name: &str, _value: f64) {}
}

/// Point-in-time copy of an [`InMemoryMetrics`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricsSnapshot {
    pub counters: BTreeMap<String, u64>,
    pub histograms: BTreeMap<String, Vec<f64>>,
}

impl MetricsSnapshot {
    pub fn counter(&self, name: &str) -> u64 {
        self.counters.get(name).copied().unwrap_or(0)
    }

    pub fn samples(&self, name: &str) -> &[f64] {
        self.histograms.get(name).map(Vec::as_slice).unwrap_or(&[])
    }
}

#[derive(Debug, Default)]
pub struct InMemoryMetrics {
    inner: Mutex<MetricsSnapshot>,
}

impl InMemoryMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Counters as Prometheus counters, histograms as summaries with
    /// count, sum and the 0.5/0.99 quantiles.
    pub fn render(&self) -> String {
        let snap = self.snapshot();
        let mut out = String::new();

        for (name, value) in &snap.counters {
            let _ = writeln!(out, "# TYPE {name} counter");
            let _ = writeln!(out, "{name} {value}");
        }

        for (name, samples) in &snap.histograms {
            let mut sorted = samples.clone();
            sorted.sort_by(f64::total_cmp);
            let sum: f64 = sorted.iter().sum();
            let _ = writeln!(out, "# TYPE {name} summary");
            for q in [0.5, 0.99] {
                let _ = writeln!(out, "{name}{{quantile=\"{q}\"}} {}", quantile(&sorted, q));
            }
            let _ = writeln!(out, "{name}_sum {sum}");
            let _ = writeln!(out, "{name}_count {}", sorted.len());
        }
        out
    }
}

impl Metrics for InMemoryMetrics {
    fn counter(&self, name: &str, value: u64) {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        *inner.counters.entry(name.to_string()).or_default() += value;
    }

    fn histogram(&self, name: &str, value: f64) {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner
            .histograms
            .entry(name.to_string())
            .or_default()
            .push(value);
    }
}

fn quantile(sorted: &[f64], q: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let idx = ((sorted.len() as f64 - 1.0) * q).round() as usize;
    sorted[idx.min(sorted.len() - 1)]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let m = InMemoryMetrics::new();
        m.counter(OFFERS_RECEIVED, 3);
        m.counter(OFFERS_RECEIVED, 2);
        m.counter(TASKS_KILLED, 1);
        let snap = m.snapshot();
        assert_eq!(snap.counter(OFFERS_RECEIVED), 5);
        assert_eq!(snap.counter(TASKS_KILLED), 1);
        assert_eq!(snap.counter(TASKS_FINISHED), 0);
    }

    #[test]
    fn render_prometheus_text() {
        let m = InMemoryMetrics::new();
        m.counter(TASKS_LAUNCHED, 4);
        for v in [0.1, 0.2, 0.3] {
            m.histogram(OFFER_ROUND_SECONDS, v);
        }
        let text = m.render();
        assert!(text.contains("# TYPE offergrid_tasks_launched counter\n"));
        assert!(text.contains("offergrid_tasks_launched 4\n"));
        assert!(text.contains("# TYPE offergrid_offer_round_seconds summary\n"));
        assert!(text.contains("offergrid_offer_round_seconds{quantile=\"0.5\"} 0.2\n"));
        assert!(text.contains("offergrid_offer_round_seconds_count 3\n"));
    }

    #[test]
    fn noop_accepts_anything() {
        let m: &dyn Metrics = &NoopMetrics;
        m.counter(DEPLOY_ATTEMPTS, 1);
        m.histogram(OFFER_ROUND_SECONDS, 1.0);
    }
}
