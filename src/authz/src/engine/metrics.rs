//! Prometheus metrics for authorization decisions

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use super::decision::Decision;
use crate::cache::CacheStats;

const MAX_SAMPLES: usize = 10_000;

/// Decision counters and latency summary
#[derive(Debug, Clone, Default)]
pub struct DecisionMetrics {
    pub total_requests: u64,
    pub pass_through: u64,
    pub allowed: u64,
    pub denied_unauthenticated: u64,
    pub denied_forbidden: u64,
    /// Decisions aborted by a store failure
    pub errors: u64,

    pub latency_p50_ms: f64,
    pub latency_p90_ms: f64,
    pub latency_p99_ms: f64,
    pub avg_latency_ms: f64,
}

impl DecisionMetrics {
    pub fn denied(&self) -> u64 {
        self.denied_unauthenticated + self.denied_forbidden
    }

    /// Share of matched requests that were allowed
    pub fn allow_rate(&self) -> f64 {
        let total = self.allowed + self.denied();
        if total == 0 {
            0.0
        } else {
            self.allowed as f64 / total as f64
        }
    }
}

/// Metrics collector with Prometheus-compatible export
pub struct MetricsCollector {
    metrics: Arc<RwLock<DecisionMetrics>>,
    /// Recent latency samples in milliseconds
    latency_samples: Arc<RwLock<Vec<f64>>>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            metrics: Arc::new(RwLock::new(DecisionMetrics::default())),
            latency_samples: Arc::new(RwLock::new(Vec::with_capacity(1_024))),
        }
    }

    /// Record a completed decision
    pub async fn record_decision(&self, decision: &Decision) {
        let mut metrics = self.metrics.write().await;
        metrics.total_requests += 1;

        match decision {
            Decision::PassThrough => metrics.pass_through += 1,
            Decision::Allow(_) => metrics.allowed += 1,
            Decision::Deny(reason) if reason.is_unauthenticated() => {
                metrics.denied_unauthenticated += 1
            }
            Decision::Deny(_) => metrics.denied_forbidden += 1,
        }
    }

    /// Record a decision that failed with an error
    pub async fn record_error(&self) {
        let mut metrics = self.metrics.write().await;
        metrics.total_requests += 1;
        metrics.errors += 1;
    }

    pub async fn record_latency(&self, latency: Duration) {
        let latency_ms = latency.as_secs_f64() * 1000.0;

        let mut samples = self.latency_samples.write().await;
        samples.push(latency_ms);
        if samples.len() > MAX_SAMPLES {
            samples.drain(0..MAX_SAMPLES / 10);
        }

        let mut sorted = samples.clone();
        drop(samples);
        sorted.sort_by(f64::total_cmp);

        let mut metrics = self.metrics.write().await;
        metrics.avg_latency_ms = sorted.iter().sum::<f64>() / sorted.len() as f64;
        metrics.latency_p50_ms = percentile(&sorted, 0.50);
        metrics.latency_p90_ms = percentile(&sorted, 0.90);
        metrics.latency_p99_ms = percentile(&sorted, 0.99);
    }

    pub async fn get_metrics(&self) -> DecisionMetrics {
        self.metrics.read().await.clone()
    }

    pub async fn reset(&self) {
        *self.metrics.write().await = DecisionMetrics::default();
        self.latency_samples.write().await.clear();
    }

    /// Export decision and cache metrics in Prometheus text format
    pub async fn export_prometheus(&self, cache: &CacheStats) -> String {
        let metrics = self.metrics.read().await;

        format!(
            r#"# HELP warden_decisions_total Authorization decisions by outcome
# TYPE warden_decisions_total counter
warden_decisions_total{{outcome="pass_through"}} {}
warden_decisions_total{{outcome="allowed"}} {}
warden_decisions_total{{outcome="denied_unauthenticated"}} {}
warden_decisions_total{{outcome="denied_forbidden"}} {}
warden_decisions_total{{outcome="error"}} {}

# HELP warden_decision_latency_seconds Decision latency percentiles
# TYPE warden_decision_latency_seconds summary
warden_decision_latency_seconds{{quantile="0.5"}} {}
warden_decision_latency_seconds{{quantile="0.9"}} {}
warden_decision_latency_seconds{{quantile="0.99"}} {}

# HELP warden_cache_hits_total Permission cache hits
# TYPE warden_cache_hits_total counter
warden_cache_hits_total {}

# HELP warden_cache_misses_total Permission cache misses
# TYPE warden_cache_misses_total counter
warden_cache_misses_total {}

# HELP warden_cache_expirations_total Permission cache entries expired
# TYPE warden_cache_expirations_total counter
warden_cache_expirations_total {}

# HELP warden_cache_invalidations_total Permission cache entries invalidated
# TYPE warden_cache_invalidations_total counter
warden_cache_invalidations_total {}

# HELP warden_cache_entries Permission cache entries currently held
# TYPE warden_cache_entries gauge
warden_cache_entries {}
"#,
            metrics.pass_through,
            metrics.allowed,
            metrics.denied_unauthenticated,
            metrics.denied_forbidden,
            metrics.errors,
            metrics.latency_p50_ms / 1000.0,
            metrics.latency_p90_ms / 1000.0,
            metrics.latency_p99_ms / 1000.0,
            cache.hits,
            cache.misses,
            cache.expirations,
            cache.invalidations,
            cache.entries,
        )
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let idx = ((sorted.len() as f64) * p) as usize;
    sorted[idx.min(sorted.len() - 1)]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::decision::{DenyReason, Principal};

    #[tokio::test]
    async fn test_record_decisions() {
        let collector = MetricsCollector::new();

        collector.record_decision(&Decision::PassThrough).await;
        collector
            .record_decision(&Decision::Allow(Principal::new(1, Default::default())))
            .await;
        collector
            .record_decision(&Decision::Deny(DenyReason::MissingToken))
            .await;
        collector
            .record_decision(&Decision::Deny(DenyReason::Forbidden { required: vec![] }))
            .await;
        collector.record_error().await;

        let metrics = collector.get_metrics().await;
        assert_eq!(metrics.total_requests, 5);
        assert_eq!(metrics.denied(), 2);
        assert_eq!(metrics.errors, 1);
        assert!((metrics.allow_rate() - 1.0 / 3.0).abs() < 0.01);
    }

    #[tokio::test]
    async fn test_record_latency() {
        let collector = MetricsCollector::new();

        collector.record_latency(Duration::from_millis(5)).await;
        collector.record_latency(Duration::from_millis(10)).await;
        collector.record_latency(Duration::from_millis(15)).await;

        let metrics = collector.get_metrics().await;
        assert!((metrics.avg_latency_ms - 10.0).abs() < 1.0);
        assert!(metrics.latency_p99_ms >= metrics.latency_p50_ms);
    }

    #[tokio::test]
    async fn test_prometheus_export() {
        let collector = MetricsCollector::new();
        collector.record_decision(&Decision::PassThrough).await;

        let stats = CacheStats {
            hits: 3,
            ..Default::default()
        };
        let text = collector.export_prometheus(&stats).await;
        assert!(text.contains(r#"warden_decisions_total{outcome="pass_through"} 1"#));
        assert!(text.contains("warden_cache_hits_total 3"));
    }

    #[tokio::test]
    async fn test_reset() {
        let collector = MetricsCollector::new();
        collector.record_error().await;
        collector.reset().await;
        assert_eq!(collector.get_metrics().await.total_requests, 0);
    }
}
