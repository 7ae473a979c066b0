//! The registry the middleware records into, and how it gets rendered.
//!
//! The middleware only talks to a [`MetricsRecorder`]. Two implementations are provided:
//!
//! - [`OpenMetricsRecorder`] keeps its own [`prometheus_client`] registry. It supports exemplars
//!   and renders both [`Format`]s (feature `openmetrics`).
//! - [`FacadeRecorder`] forwards everything to the [`metrics`] facade, so any `metrics` exporter
//!   can be used. Paired with [`metrics_exporter_prometheus`] it renders the text format
//!   (feature `prometheus`). Exemplars are dropped.
//!
//! [`OpenMetricsRecorder`]: openmetrics::OpenMetricsRecorder
//! [`FacadeRecorder`]: facade::FacadeRecorder
//! [`prometheus_client`]: https://docs.rs/prometheus-client
//! [`metrics_exporter_prometheus`]: https://docs.rs/metrics-exporter-prometheus

use std::sync::Arc;

use crate::{labels::LabelSet, utils::MetricNames, Error};

pub mod facade;
#[cfg(feature = "openmetrics")]
pub mod openmetrics;

/// The metric families recorded by the middleware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricKind {
    /// Counter, one per observed request.
    RequestsTotal,
    /// Histogram of the request duration in seconds.
    RequestDuration,
    /// Gauge of the requests currently being handled.
    RequestsInProgress,
    /// Counter of response body bytes.
    ResponseBodySize,
    /// Counter of request body bytes.
    RequestBodySize,
}

impl MetricKind {
    pub fn name(self, names: &MetricNames) -> &str {
        match self {
            Self::RequestsTotal => &names.requests_total,
            Self::RequestDuration => &names.request_duration_seconds,
            Self::RequestsInProgress => &names.requests_in_progress,
            Self::ResponseBodySize => &names.response_body_size_bytes,
            Self::RequestBodySize => &names.request_body_size_bytes,
        }
    }

    pub fn help(self) -> &'static str {
        match self {
            Self::RequestsTotal => "Total HTTP requests",
            Self::RequestDuration => "HTTP request duration, in seconds",
            Self::RequestsInProgress => "Total HTTP requests currently in progress",
            Self::ResponseBodySize => "Total HTTP response body bytes",
            Self::RequestBodySize => "Total HTTP request body bytes",
        }
    }
}

/// A metrics registry.
///
/// Implementations must make every single operation atomic, the middleware calls them
/// concurrently from many requests without further synchronization.
pub trait MetricsRecorder: Send + Sync + 'static {
    /// Add `value` to a counter.
    fn increment_counter(
        &self,
        metric: MetricKind,
        labels: &LabelSet,
        value: u64,
        exemplar: Option<&LabelSet>,
    );

    /// Record `value` into a histogram.
    fn observe_histogram(
        &self,
        metric: MetricKind,
        labels: &LabelSet,
        value: f64,
        exemplar: Option<&LabelSet>,
    );

    /// Add `delta` to a gauge.
    fn adjust_gauge(&self, metric: MetricKind, labels: &LabelSet, delta: i64);
}

impl<R: MetricsRecorder + ?Sized> MetricsRecorder for Arc<R> {
    fn increment_counter(
        &self,
        metric: MetricKind,
        labels: &LabelSet,
        value: u64,
        exemplar: Option<&LabelSet>,
    ) {
        (**self).increment_counter(metric, labels, value, exemplar);
    }

    fn observe_histogram(
        &self,
        metric: MetricKind,
        labels: &LabelSet,
        value: f64,
        exemplar: Option<&LabelSet>,
    ) {
        (**self).observe_histogram(metric, labels, value, exemplar);
    }

    fn adjust_gauge(&self, metric: MetricKind, labels: &LabelSet, delta: i64) {
        (**self).adjust_gauge(metric, labels, delta);
    }
}

/// The exposition formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Format {
    /// The Prometheus text format. Never contains exemplars.
    #[default]
    Text,
    /// The OpenMetrics text format, including exemplars where the registry keeps them.
    OpenMetrics,
}

impl Format {
    pub const TEXT_CONTENT_TYPE: &'static str = "text/plain; version=0.0.4; charset=utf-8";
    pub const OPENMETRICS_CONTENT_TYPE: &'static str =
        "application/openmetrics-text; version=1.0.0; charset=utf-8";

    pub fn content_type(self) -> &'static str {
        match self {
            Self::Text => Self::TEXT_CONTENT_TYPE,
            Self::OpenMetrics => Self::OPENMETRICS_CONTENT_TYPE,
        }
    }
}

/// Renders the current state of a registry.
pub trait MetricsEncoder: Send + Sync + 'static {
    fn encode(&self, format: Format) -> Result<String, Error>;

    /// Whether `format` can be rendered. Callers fall back to [`Format::Text`] otherwise.
    fn supports(&self, format: Format) -> bool {
        let _ = format;
        true
    }
}

// metrics-exporter-prometheus has no exemplar support and only speaks the text format.
#[cfg(feature = "prometheus")]
impl MetricsEncoder for metrics_exporter_prometheus::PrometheusHandle {
    fn encode(&self, _format: Format) -> Result<String, Error> {
        Ok(self.render())
    }

    fn supports(&self, format: Format) -> bool {
        format == Format::Text
    }
}
