use std::sync::Arc;

use metrics::{Label, Recorder};
#[cfg(feature = "prometheus")]
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};

use super::{MetricKind, MetricsRecorder};
use crate::{config::Config, labels::LabelSet, utils::MetricNames};

/// A [`MetricsRecorder`] that emits through the [`metrics`] facade.
///
/// The facade has no notion of exemplars, so they are silently dropped.
#[derive(Clone)]
pub struct FacadeRecorder {
    names: MetricNames,
    recorder: Option<Arc<dyn Recorder + Send + Sync>>,
}

impl FacadeRecorder {
    /// Emit into whatever recorder is installed globally with [`metrics::set_global_recorder`].
    ///
    /// Metric descriptions are only registered if a global recorder is already installed.
    pub fn global(config: &Config) -> Self {
        let this = Self {
            names: config.metric_names().clone(),
            recorder: None,
        };
        this.describe(config);
        this
    }

    /// Emit into `recorder` only, leaving the global recorder alone.
    pub fn local(config: &Config, recorder: Arc<dyn Recorder + Send + Sync>) -> Self {
        let this = Self {
            names: config.metric_names().clone(),
            recorder: Some(recorder),
        };
        this.describe(config);
        this
    }

    /// Build a local [`metrics_exporter_prometheus`] recorder using the configured histogram
    /// buckets, and return the handle used to render it.
    #[cfg(feature = "prometheus")]
    pub fn prometheus(config: &Config) -> Result<(Self, PrometheusHandle), crate::Error> {
        let recorder = PrometheusBuilder::new()
            .set_buckets_for_metric(
                Matcher::Full(config.metric_names().request_duration_seconds.clone()),
                config.buckets(),
            )?
            .build_recorder();
        let handle = recorder.handle();
        Ok((Self::local(config, Arc::new(recorder)), handle))
    }

    fn scoped<T>(&self, f: impl FnOnce() -> T) -> T {
        match &self.recorder {
            Some(recorder) => metrics::with_local_recorder(&**recorder, f),
            None => f(),
        }
    }

    fn describe(&self, config: &Config) {
        let mut kinds = vec![
            MetricKind::RequestsTotal,
            MetricKind::RequestDuration,
            MetricKind::RequestsInProgress,
        ];
        if config.is_enabled(crate::OptionalMetric::ResponseBodySize) {
            kinds.push(MetricKind::ResponseBodySize);
        }
        if config.is_enabled(crate::OptionalMetric::RequestBodySize) {
            kinds.push(MetricKind::RequestBodySize);
        }

        self.scoped(|| {
            for kind in kinds {
                let name = kind.name(&self.names).to_owned();
                match kind {
                    MetricKind::RequestDuration => metrics::describe_histogram!(name, kind.help()),
                    MetricKind::RequestsInProgress => metrics::describe_gauge!(name, kind.help()),
                    _ => metrics::describe_counter!(name, kind.help()),
                }
            }
        });
    }
}

fn to_labels(labels: &LabelSet) -> Vec<Label> {
    labels
        .iter()
        .map(|(name, value)| Label::new(name.to_owned(), value.to_owned()))
        .collect()
}

impl MetricsRecorder for FacadeRecorder {
    fn increment_counter(
        &self,
        metric: MetricKind,
        labels: &LabelSet,
        value: u64,
        _exemplar: Option<&LabelSet>,
    ) {
        let name = metric.name(&self.names).to_owned();
        self.scoped(|| metrics::counter!(name, to_labels(labels)).increment(value));
    }

    fn observe_histogram(
        &self,
        metric: MetricKind,
        labels: &LabelSet,
        value: f64,
        _exemplar: Option<&LabelSet>,
    ) {
        let name = metric.name(&self.names).to_owned();
        self.scoped(|| metrics::histogram!(name, to_labels(labels)).record(value));
    }

    fn adjust_gauge(&self, metric: MetricKind, labels: &LabelSet, delta: i64) {
        let name = metric.name(&self.names).to_owned();
        self.scoped(|| {
            let gauge = metrics::gauge!(name, to_labels(labels));
            if delta >= 0 {
                gauge.increment(delta as f64);
            } else {
                gauge.decrement(delta.unsigned_abs() as f64);
            }
        });
    }
}
