use std::sync::Arc;

#[cfg(feature = "prometheus")]
use metrics_exporter_prometheus::PrometheusHandle;
#[cfg(feature = "openmetrics")]
use prometheus_client::registry::Registry;
use tower::BoxError;

#[cfg(feature = "prometheus")]
use crate::recorder::facade::FacadeRecorder;
#[cfg(feature = "openmetrics")]
use crate::recorder::openmetrics::{OpenMetricsHandle, OpenMetricsRecorder};
use crate::{
    config::{self, Config, OptionalMetric, SkipPath},
    labels::{ExemplarFn, LabelValue},
    recorder::MetricsRecorder,
    utils::{self, MetricNames},
    Error, PrometheusMetricLayer, DEFAULT_APP_NAME, DEFAULT_PREFIX,
};

/// A builder for [`PrometheusMetricLayer`] that enables further customizations.
///
/// Nothing is validated until the builder is finalized, at which point every
/// misconfiguration is reported as an [`Error`].
///
/// ## Example
/// ```rust,no_run
/// use axum_exporter::{labels::from_header, MetricLayerBuilder, OptionalMetric};
///
/// let (metric_layer, metric_handle) = MetricLayerBuilder::new()
///     .with_app_name("shop")
///     .with_skip_paths(["/metrics"])
///     .with_skip_patterns(["/health.*"])
///     .with_skip_methods(["OPTIONS"])
///     .with_label("tenant", from_header("x-tenant", None))
///     .with_optional_metrics([OptionalMetric::ResponseBodySize])
///     .build_pair()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct MetricLayerBuilder {
    app_name: String,
    prefix: String,
    buckets: Option<Vec<f64>>,
    group_paths: bool,
    filter_unhandled_paths: bool,
    group_unhandled_paths: bool,
    skip_paths: Vec<SkipPath>,
    skip_patterns: Vec<String>,
    skip_methods: Vec<String>,
    always_use_int_status: bool,
    labels: Vec<(String, LabelValue)>,
    exemplars: Vec<(String, ExemplarFn)>,
    optional_metrics: Vec<OptionalMetric>,
    route_patterns: Vec<String>,
}

impl Default for MetricLayerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricLayerBuilder {
    /// Initialize the builder.
    pub fn new() -> Self {
        Self {
            app_name: DEFAULT_APP_NAME.to_owned(),
            prefix: DEFAULT_PREFIX.to_owned(),
            buckets: None,
            group_paths: true,
            filter_unhandled_paths: true,
            group_unhandled_paths: false,
            skip_paths: Vec::new(),
            skip_patterns: Vec::new(),
            skip_methods: Vec::new(),
            always_use_int_status: false,
            labels: Vec::new(),
            exemplars: Vec::new(),
            optional_metrics: Vec::new(),
            route_patterns: Vec::new(),
        }
    }

    /// The value of the `app_name` label.
    pub fn with_app_name(mut self, app_name: impl Into<String>) -> Self {
        self.app_name = app_name.into();
        self
    }

    /// Use a prefix for the metrics instead of `starlette`. This will use the following
    /// metric names:
    ///  - `{prefix}_requests_total`
    ///  - `{prefix}_request_duration_seconds`
    ///  - `{prefix}_requests_in_progress`
    ///  - `{prefix}_response_body_size_bytes` and `{prefix}_request_body_size_bytes`, if enabled
    ///
    /// The names in use can be read at runtime from [`Config::metric_names`].
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Upper bounds of the request duration histogram, in seconds. Must be strictly ascending.
    /// Defaults to [`SECONDS_DURATION_BUCKETS`](crate::SECONDS_DURATION_BUCKETS).
    pub fn with_buckets(mut self, buckets: impl IntoIterator<Item = f64>) -> Self {
        self.buckets = Some(buckets.into_iter().collect());
        self
    }

    /// Report the route template (`/items/:id`) instead of the requested path (`/items/42`).
    /// Enabled by default.
    pub fn with_group_paths(mut self, group_paths: bool) -> Self {
        self.group_paths = group_paths;
        self
    }

    /// Ignore requests that did not match any route. Enabled by default.
    pub fn with_filter_unhandled_paths(mut self, filter: bool) -> Self {
        self.filter_unhandled_paths = filter;
        self
    }

    /// Report requests that did not match any route under the path `__unknown__`.
    ///
    /// _Enabling this turns off [`with_filter_unhandled_paths`]._
    ///
    /// [`with_filter_unhandled_paths`]: crate::MetricLayerBuilder::with_filter_unhandled_paths
    pub fn with_group_unhandled_paths(mut self, group: bool) -> Self {
        self.group_unhandled_paths = group;
        self
    }

    /// Skip requests whose path is exactly one of `paths`.
    ///
    /// ```rust
    /// use axum_exporter::MetricLayerBuilder;
    ///
    /// let metric_layer = MetricLayerBuilder::new()
    ///     .with_skip_paths(["/metrics", "/favicon.ico"])
    ///     .build_pair();
    /// ```
    pub fn with_skip_paths<P>(mut self, paths: impl IntoIterator<Item = P>) -> Self
    where
        P: Into<SkipPath>,
    {
        self.skip_paths.extend(paths.into_iter().map(Into::into));
        self
    }

    /// Skip requests whose whole path matches one of the regular expressions in `patterns`.
    pub fn with_skip_patterns<P>(mut self, patterns: impl IntoIterator<Item = P>) -> Self
    where
        P: Into<String>,
    {
        self.skip_patterns
            .extend(patterns.into_iter().map(Into::into));
        self
    }

    /// Skip requests made with one of `methods`. Compared case-insensitively.
    pub fn with_skip_methods<M>(mut self, methods: impl IntoIterator<Item = M>) -> Self
    where
        M: AsRef<str>,
    {
        self.skip_methods.extend(
            methods
                .into_iter()
                .map(|method| method.as_ref().to_ascii_uppercase()),
        );
        self
    }

    /// Always report `status_code` as a bare integer.
    pub fn with_always_use_int_status(mut self, int_status: bool) -> Self {
        self.always_use_int_status = int_status;
        self
    }

    /// Add a custom label to every metric. Labels are reported in declaration order, after the
    /// built-in ones.
    pub fn with_label(mut self, name: impl Into<String>, value: impl Into<LabelValue>) -> Self {
        self.labels.push((name.into(), value.into()));
        self
    }

    /// Attach an exemplar entry to the counter and histogram observations.
    ///
    /// The callback runs once per observed request. An empty value leaves the entry out.
    ///
    /// ```rust
    /// use axum_exporter::MetricLayerBuilder;
    ///
    /// fn current_trace_id() -> String {
    ///     // e.g. read from the active tracing span
    ///     String::new()
    /// }
    ///
    /// let metric_layer = MetricLayerBuilder::new()
    ///     .with_exemplar("trace_id", current_trace_id)
    ///     .build_pair();
    /// ```
    pub fn with_exemplar<F, T>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
        T: Into<String>,
    {
        let f: ExemplarFn = Arc::new(move || -> Result<String, BoxError> { Ok(f().into()) });
        self.exemplars.push((name.into(), f));
        self
    }

    /// Like [`with_exemplar`], for callbacks that may fail. Failures are logged and the entry
    /// is left out.
    ///
    /// [`with_exemplar`]: crate::MetricLayerBuilder::with_exemplar
    pub fn with_try_exemplar<F, T, E>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn() -> Result<T, E> + Send + Sync + 'static,
        T: Into<String>,
        E: Into<BoxError>,
    {
        let f: ExemplarFn = Arc::new(move || -> Result<String, BoxError> {
            f().map(Into::into).map_err(Into::into)
        });
        self.exemplars.push((name.into(), f));
        self
    }

    /// Record the selected [`OptionalMetric`]s as well.
    pub fn with_optional_metrics(
        mut self,
        metrics: impl IntoIterator<Item = OptionalMetric>,
    ) -> Self {
        for metric in metrics {
            if !self.optional_metrics.contains(&metric) {
                self.optional_metrics.push(metric);
            }
        }
        self
    }

    /// Route templates used to resolve the `path` label when the layer is not installed with
    /// [`axum::Router::layer`], e.g. around a plain tower service or outside the router.
    ///
    /// Uses the same syntax as `axum`'s Router. [`axum::extract::MatchedPath`] still takes
    /// precedence when present.
    pub fn with_route_patterns<P>(mut self, patterns: impl IntoIterator<Item = P>) -> Self
    where
        P: Into<String>,
    {
        self.route_patterns
            .extend(patterns.into_iter().map(Into::into));
        self
    }

    /// Validate the options and produce the [`Config`] shared by every request.
    pub fn config(self) -> Result<Config, Error> {
        config::validate_prefix(&self.prefix)?;
        if let Some(buckets) = &self.buckets {
            config::validate_buckets(buckets)?;
        }
        config::validate_label_names(self.labels.iter().map(|(name, _)| name.as_str()))?;
        validate_exemplar_names(&self.exemplars)?;

        let mut skip_paths = self.skip_paths;
        for pattern in &self.skip_patterns {
            skip_paths.push(SkipPath::pattern(pattern)?);
        }

        let routes = if self.route_patterns.is_empty() {
            None
        } else {
            let mut router = matchit::Router::new();
            for route in self.route_patterns {
                if let Err(source) = router.insert(route.clone(), route.clone()) {
                    return Err(Error::InvalidRoute { route, source });
                }
            }
            Some(Arc::new(router))
        };

        let mut filter_unhandled_paths = self.filter_unhandled_paths;
        if self.group_unhandled_paths && filter_unhandled_paths {
            tracing::warn!(
                "group_unhandled_paths is enabled, unhandled paths will be reported instead of filtered"
            );
            filter_unhandled_paths = false;
        }

        Ok(Config {
            names: MetricNames::with_prefix(&self.prefix),
            app_name: self.app_name,
            prefix: self.prefix,
            buckets: self.buckets,
            group_paths: self.group_paths,
            filter_unhandled_paths,
            group_unhandled_paths: self.group_unhandled_paths,
            skip_paths,
            skip_methods: self.skip_methods,
            always_use_int_status: self.always_use_int_status,
            labels: self.labels,
            exemplars: self.exemplars,
            optional_metrics: self.optional_metrics,
            routes,
        })
    }

    /// Finalize the builder with any [`MetricsRecorder`], created from the validated config.
    pub fn build_with_recorder<R, F>(self, f: F) -> Result<PrometheusMetricLayer, Error>
    where
        R: MetricsRecorder,
        F: FnOnce(&Config) -> R,
    {
        let config = self.config()?;
        let recorder = f(&config);
        Ok(PrometheusMetricLayer::new(config, recorder))
    }

    /// Finalize the builder with a fresh [`prometheus_client`] registry, and get out the
    /// [`PrometheusMetricLayer`] and the handle rendering the registry as a tuple.
    #[cfg(feature = "openmetrics")]
    pub fn build_pair(self) -> Result<(PrometheusMetricLayer, OpenMetricsHandle), Error> {
        let config = self.config()?;
        let mut registry = Registry::default();
        let recorder = OpenMetricsRecorder::register(&config, &mut registry);
        Ok((
            PrometheusMetricLayer::new(config, recorder),
            OpenMetricsHandle::new(registry),
        ))
    }

    /// Finalize the builder with a local [`metrics_exporter_prometheus`] recorder. The global
    /// `metrics` recorder is left untouched.
    ///
    /// This backend cannot store exemplars and only renders the Prometheus text format.
    #[cfg(feature = "prometheus")]
    pub fn build_prometheus_pair(
        self,
    ) -> Result<(PrometheusMetricLayer, PrometheusHandle), Error> {
        let config = self.config()?;
        let (recorder, handle) = FacadeRecorder::prometheus(&config)?;
        Ok((PrometheusMetricLayer::new(config, recorder), handle))
    }
}

fn validate_exemplar_names(exemplars: &[(String, ExemplarFn)]) -> Result<(), Error> {
    for (i, (name, _)) in exemplars.iter().enumerate() {
        if !utils::is_valid_label_name(name) {
            return Err(Error::InvalidLabelName(name.clone()));
        }
        if exemplars[..i].iter().any(|(other, _)| other == name) {
            return Err(Error::DuplicateLabel(name.clone()));
        }
    }
    Ok(())
}
