use std::sync::Arc;

use prometheus_client::{
    encoding::text::encode,
    metrics::{
        exemplar::{CounterWithExemplar, HistogramWithExemplars},
        family::{Family, MetricConstructor},
        gauge::Gauge,
    },
    registry::Registry,
};

use super::{Format, MetricKind, MetricsEncoder, MetricsRecorder};
use crate::{config::Config, labels::LabelSet, Error, OptionalMetric};

type Pairs = Vec<(String, String)>;
type CounterFamily = Family<Pairs, CounterWithExemplar<Pairs>>;

#[derive(Debug, Clone)]
struct Buckets(Arc<[f64]>);

impl MetricConstructor<HistogramWithExemplars<Pairs>> for Buckets {
    fn new_metric(&self) -> HistogramWithExemplars<Pairs> {
        HistogramWithExemplars::new(self.0.iter().copied())
    }
}

/// A [`MetricsRecorder`] backed by a [`prometheus_client`] registry, with exemplar support.
#[derive(Clone)]
pub struct OpenMetricsRecorder {
    requests_total: CounterFamily,
    request_duration: Family<Pairs, HistogramWithExemplars<Pairs>, Buckets>,
    requests_in_progress: Family<Pairs, Gauge>,
    response_body_size: Option<CounterFamily>,
    request_body_size: Option<CounterFamily>,
}

impl OpenMetricsRecorder {
    /// Create the metric families described by `config` and register them in `registry`.
    ///
    /// OpenMetrics requires counter samples to end in `_total`, which `prometheus_client` appends
    /// on its own, so the body size counters are exposed as `{prefix}_response_body_size_bytes_total`
    /// and `{prefix}_request_body_size_bytes_total`.
    pub fn register(config: &Config, registry: &mut Registry) -> Self {
        let names = config.metric_names();

        let requests_total = CounterFamily::default();
        registry.register(
            counter_family_name(&names.requests_total),
            MetricKind::RequestsTotal.help(),
            requests_total.clone(),
        );

        let request_duration =
            Family::new_with_constructor(Buckets(Arc::from(config.buckets())));
        registry.register(
            names.request_duration_seconds.as_str(),
            MetricKind::RequestDuration.help(),
            request_duration.clone(),
        );

        let requests_in_progress = Family::<Pairs, Gauge>::default();
        registry.register(
            names.requests_in_progress.as_str(),
            MetricKind::RequestsInProgress.help(),
            requests_in_progress.clone(),
        );

        let optional_counter = |metric: OptionalMetric, kind: MetricKind, registry: &mut Registry| {
            config.is_enabled(metric).then(|| {
                let family = CounterFamily::default();
                registry.register(
                    counter_family_name(kind.name(names)),
                    kind.help(),
                    family.clone(),
                );
                family
            })
        };
        let response_body_size = optional_counter(
            OptionalMetric::ResponseBodySize,
            MetricKind::ResponseBodySize,
            registry,
        );
        let request_body_size = optional_counter(
            OptionalMetric::RequestBodySize,
            MetricKind::RequestBodySize,
            registry,
        );

        Self {
            requests_total,
            request_duration,
            requests_in_progress,
            response_body_size,
            request_body_size,
        }
    }

    fn counter(&self, metric: MetricKind) -> Option<&CounterFamily> {
        match metric {
            MetricKind::RequestsTotal => Some(&self.requests_total),
            MetricKind::ResponseBodySize => self.response_body_size.as_ref(),
            MetricKind::RequestBodySize => self.request_body_size.as_ref(),
            MetricKind::RequestDuration | MetricKind::RequestsInProgress => None,
        }
    }
}

fn counter_family_name(name: &str) -> &str {
    name.strip_suffix("_total").unwrap_or(name)
}

impl MetricsRecorder for OpenMetricsRecorder {
    fn increment_counter(
        &self,
        metric: MetricKind,
        labels: &LabelSet,
        value: u64,
        exemplar: Option<&LabelSet>,
    ) {
        if let Some(family) = self.counter(metric) {
            family
                .get_or_create(&labels.clone().into_pairs())
                .inc_by(value, exemplar.cloned().map(LabelSet::into_pairs));
        }
    }

    fn observe_histogram(
        &self,
        metric: MetricKind,
        labels: &LabelSet,
        value: f64,
        exemplar: Option<&LabelSet>,
    ) {
        if metric == MetricKind::RequestDuration {
            self.request_duration
                .get_or_create(&labels.clone().into_pairs())
                .observe(value, exemplar.cloned().map(LabelSet::into_pairs));
        }
    }

    fn adjust_gauge(&self, metric: MetricKind, labels: &LabelSet, delta: i64) {
        if metric == MetricKind::RequestsInProgress {
            self.requests_in_progress
                .get_or_create(&labels.clone().into_pairs())
                .inc_by(delta);
        }
    }
}

/// Renders a [`Registry`] in either [`Format`].
#[derive(Clone)]
pub struct OpenMetricsHandle {
    registry: Arc<Registry>,
}

impl OpenMetricsHandle {
    pub fn new(registry: Registry) -> Self {
        Self {
            registry: Arc::new(registry),
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn render(&self) -> Result<String, Error> {
        self.encode(Format::Text)
    }
}

impl MetricsEncoder for OpenMetricsHandle {
    fn encode(&self, format: Format) -> Result<String, Error> {
        let mut buffer = String::new();
        encode(&mut buffer, &self.registry)?;
        Ok(match format {
            Format::OpenMetrics => buffer,
            Format::Text => to_text_format(&buffer),
        })
    }
}

/// Rewrites OpenMetrics output into the Prometheus text format: exemplars, `# UNIT` and `# EOF`
/// lines are dropped, and counter families are named after their `_total` samples.
pub(crate) fn to_text_format(openmetrics: &str) -> String {
    let counters: Vec<&str> = openmetrics
        .lines()
        .filter_map(|line| line.strip_prefix("# TYPE ")?.strip_suffix(" counter"))
        .collect();

    let mut text = String::with_capacity(openmetrics.len());
    for line in openmetrics.lines() {
        if line == "# EOF" || line.starts_with("# UNIT ") {
            continue;
        }
        let rewritten = rename_counter_family(line, "# HELP ", &counters)
            .or_else(|| rename_counter_family(line, "# TYPE ", &counters));
        match rewritten {
            Some(line) => text.push_str(&line),
            None if line.starts_with('#') => text.push_str(line),
            None => text.push_str(strip_exemplar(line)),
        }
        text.push('\n');
    }
    text
}

fn rename_counter_family(line: &str, keyword: &str, counters: &[&str]) -> Option<String> {
    let (name, tail) = line.strip_prefix(keyword)?.split_once(' ')?;
    counters
        .contains(&name)
        .then(|| format!("{keyword}{name}_total {tail}"))
}

/// Cuts a sample line at the exemplar marker, ignoring `#` inside quoted label values.
fn strip_exemplar(sample: &str) -> &str {
    let mut in_quotes = false;
    let mut escaped = false;
    for (i, c) in sample.char_indices() {
        match c {
            _ if escaped => escaped = false,
            '\\' if in_quotes => escaped = true,
            '"' => in_quotes = !in_quotes,
            '#' if !in_quotes => return sample[..i].trim_end(),
            _ => {}
        }
    }
    sample
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MetricLayerBuilder;

    #[test]
    fn text_format_drops_exemplars_and_eof() {
        let openmetrics = concat!(
            "# HELP shop_requests Total HTTP requests.\n",
            "# TYPE shop_requests counter\n",
            "shop_requests_total{method=\"GET\",path=\"/a#b\"} 1 # {trace_id=\"abc\"} 1.0\n",
            "# HELP shop_requests_in_progress Total HTTP requests currently in progress.\n",
            "# TYPE shop_requests_in_progress gauge\n",
            "shop_requests_in_progress{method=\"GET\",tag=\"say \\\"#1\\\"\"} 0\n",
            "# EOF\n",
        );
        let expected = concat!(
            "# HELP shop_requests_total Total HTTP requests.\n",
            "# TYPE shop_requests_total counter\n",
            "shop_requests_total{method=\"GET\",path=\"/a#b\"} 1\n",
            "# HELP shop_requests_in_progress Total HTTP requests currently in progress.\n",
            "# TYPE shop_requests_in_progress gauge\n",
            "shop_requests_in_progress{method=\"GET\",tag=\"say \\\"#1\\\"\"} 0\n",
        );
        assert_eq!(to_text_format(openmetrics), expected);
    }

    #[test]
    fn exemplars_only_in_openmetrics() {
        let config = MetricLayerBuilder::new()
            .with_optional_metrics([OptionalMetric::ResponseBodySize])
            .config()
            .unwrap();
        let mut registry = Registry::default();
        let recorder = OpenMetricsRecorder::register(&config, &mut registry);
        let handle = OpenMetricsHandle::new(registry);

        let labels: LabelSet = [("method", "GET"), ("path", "/")].into_iter().collect();
        let exemplar: LabelSet = [("trace_id", "abc123")].into_iter().collect();
        recorder.increment_counter(MetricKind::RequestsTotal, &labels, 1, Some(&exemplar));
        recorder.observe_histogram(MetricKind::RequestDuration, &labels, 0.2, Some(&exemplar));
        recorder.increment_counter(MetricKind::ResponseBodySize, &labels, 11, None);
        // not enabled, ignored
        recorder.increment_counter(MetricKind::RequestBodySize, &labels, 7, None);

        let openmetrics = handle.encode(Format::OpenMetrics).unwrap();
        assert!(openmetrics.contains(r#"trace_id="abc123""#));
        assert!(openmetrics.contains("starlette_requests_total{"));
        assert!(openmetrics.contains("starlette_response_body_size_bytes_total{"));
        assert!(!openmetrics.contains("starlette_request_body_size_bytes"));
        assert!(openmetrics.ends_with("# EOF\n"));

        let text = handle.render().unwrap();
        assert!(!text.contains("trace_id"));
        assert!(!text.contains("# EOF"));
        assert!(text.contains("# TYPE starlette_requests_total counter"));
    }
}
