//! Prometheus metrics for the control plane
//!
//! One registry per process, exported in text format on `/metrics`.

use crate::error::{Error, Result};
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};
use std::time::Duration;

/// Counters and histograms recorded by the lifecycle engine and coordinator
pub struct Metrics {
    registry: Registry,
    operations: IntCounterVec,
    driver_calls: HistogramVec,
    driver_failures: IntCounterVec,
    ready_backends: IntGauge,
}

impl Metrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new_custom(Some("sds_controlplane".into()), None)
            .map_err(prom_error)?;

        let operations = IntCounterVec::new(
            Opts::new("operations_total", "Lifecycle operations by outcome"),
            &["resource", "operation", "outcome"],
        )
        .map_err(prom_error)?;
        let driver_calls = HistogramVec::new(
            HistogramOpts::new("driver_call_duration_seconds", "Driver call latency")
                .buckets(vec![0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 30.0, 120.0, 600.0]),
            &["backend", "operation"],
        )
        .map_err(prom_error)?;
        let driver_failures = IntCounterVec::new(
            Opts::new("driver_failures_total", "Failed, timed out or cancelled driver calls"),
            &["backend", "operation"],
        )
        .map_err(prom_error)?;
        let ready_backends = IntGauge::new("ready_backends", "Backends with every driver ready")
            .map_err(prom_error)?;

        registry
            .register(Box::new(operations.clone()))
            .map_err(prom_error)?;
        registry
            .register(Box::new(driver_calls.clone()))
            .map_err(prom_error)?;
        registry
            .register(Box::new(driver_failures.clone()))
            .map_err(prom_error)?;
        registry
            .register(Box::new(ready_backends.clone()))
            .map_err(prom_error)?;

        Ok(Self {
            registry,
            operations,
            driver_calls,
            driver_failures,
            ready_backends,
        })
    }

    /// Count a settled lifecycle operation
    pub fn operation(&self, resource: &str, operation: &str, ok: bool) {
        self.operations
            .with_label_values(&[resource, operation, if ok { "ok" } else { "error" }])
            .inc();
    }

    pub fn driver_call(&self, backend: &str, operation: &str, elapsed: Duration, ok: bool) {
        self.driver_calls
            .with_label_values(&[backend, operation])
            .observe(elapsed.as_secs_f64());
        if !ok {
            self.driver_failures
                .with_label_values(&[backend, operation])
                .inc();
        }
    }

    pub fn set_ready_backends(&self, n: usize) {
        self.ready_backends.set(n as i64);
    }

    /// Text exposition of every metric
    pub fn gather(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(prom_error)?;
        String::from_utf8(buffer).map_err(|e| Error::Internal(e.to_string()))
    }
}

fn prom_error(e: prometheus::Error) -> Error {
    Error::Internal(format!("metrics: {}", e))
}
