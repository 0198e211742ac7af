//! Operator Metrics
//!
//! Prometheus counters and histograms for controller sync passes, kept in a
//! dedicated registry served on `/metrics`.

use crate::error::{Error, Result};
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGaugeVec, Opts, Registry,
    TextEncoder,
};
use std::time::Instant;

const NAMESPACE: &str = "powervs_block_csi_driver_operator";

/// Metrics shared by all workload controllers
#[derive(Clone)]
pub struct OperatorMetrics {
    registry: Registry,
    syncs: IntCounterVec,
    sync_errors: IntCounterVec,
    sync_duration: HistogramVec,
    available: IntGaugeVec,
}

impl OperatorMetrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let syncs = IntCounterVec::new(
            Opts::new("sync_total", "Number of sync passes").namespace(NAMESPACE),
            &["controller"],
        )
        .map_err(metrics_error)?;
        let sync_errors = IntCounterVec::new(
            Opts::new("sync_errors_total", "Number of failed sync passes").namespace(NAMESPACE),
            &["controller", "error"],
        )
        .map_err(metrics_error)?;
        let sync_duration = HistogramVec::new(
            HistogramOpts::new("sync_duration_seconds", "Duration of sync passes")
                .namespace(NAMESPACE)
                .buckets(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 5.0, 15.0]),
            &["controller"],
        )
        .map_err(metrics_error)?;
        let available = IntGaugeVec::new(
            Opts::new("operand_available", "Whether the operand workload is available")
                .namespace(NAMESPACE),
            &["controller"],
        )
        .map_err(metrics_error)?;

        registry
            .register(Box::new(syncs.clone()))
            .map_err(metrics_error)?;
        registry
            .register(Box::new(sync_errors.clone()))
            .map_err(metrics_error)?;
        registry
            .register(Box::new(sync_duration.clone()))
            .map_err(metrics_error)?;
        registry
            .register(Box::new(available.clone()))
            .map_err(metrics_error)?;

        Ok(Self {
            registry,
            syncs,
            sync_errors,
            sync_duration,
            available,
        })
    }

    /// Count a sync pass and time it until the returned guard is dropped
    pub fn count_and_measure(&self, controller: &str) -> SyncMeasurer {
        self.syncs.with_label_values(&[controller]).inc();
        SyncMeasurer {
            start: Instant::now(),
            histogram: self.sync_duration.with_label_values(&[controller]),
        }
    }

    pub fn count_failure(&self, controller: &str, error: &Error) {
        self.sync_errors
            .with_label_values(&[controller, error.metric_label()])
            .inc();
    }

    pub fn set_available(&self, controller: &str, available: bool) {
        self.available
            .with_label_values(&[controller])
            .set(i64::from(available));
    }

    pub fn syncs(&self, controller: &str) -> u64 {
        self.syncs.with_label_values(&[controller]).get()
    }

    pub fn failures(&self, controller: &str, error: &str) -> u64 {
        self.sync_errors.with_label_values(&[controller, error]).get()
    }

    /// Text exposition of every registered metric
    pub fn encode(&self) -> Result<(String, Vec<u8>)> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(metrics_error)?;
        Ok((encoder.format_type().to_string(), buffer))
    }
}

/// Observes elapsed time into the sync duration histogram on drop
pub struct SyncMeasurer {
    start: Instant,
    histogram: prometheus::Histogram,
}

impl Drop for SyncMeasurer {
    fn drop(&mut self) {
        self.histogram
            .observe(self.start.elapsed().as_secs_f64());
    }
}

fn metrics_error(e: prometheus::Error) -> Error {
    Error::Internal(format!("metrics: {}", e))
}
