use std::sync::Arc;

#[cfg(feature = "openmetrics")]
use prometheus_client::registry::Registry;
use tower::Layer;

#[cfg(feature = "openmetrics")]
use crate::recorder::openmetrics::{OpenMetricsHandle, OpenMetricsRecorder};
use crate::{config::Config, recorder::MetricsRecorder, service::PrometheusMetricService};

/// State shared by every service produced by one layer.
pub(crate) struct Shared {
    pub(crate) config: Config,
    pub(crate) recorder: Arc<dyn MetricsRecorder>,
}

/// The tower middleware layer for recording HTTP metrics.
///
/// Use [`MetricLayerBuilder`](crate::MetricLayerBuilder) for anything but the defaults.
#[derive(Clone)]
pub struct PrometheusMetricLayer {
    shared: Arc<Shared>,
}

impl PrometheusMetricLayer {
    /// Construct a new [`PrometheusMetricLayer`] recording into `recorder`.
    ///
    /// The families the recorder knows about must match the ones described by `config`.
    pub fn new(config: Config, recorder: impl MetricsRecorder) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                recorder: Arc::new(recorder),
            }),
        }
    }

    /// Construct the default [`PrometheusMetricLayer`] together with the handle rendering its
    /// registry.
    ///
    /// # Example
    /// ```rust,no_run
    /// use axum::{routing::get, Router};
    /// use axum_exporter::{
    ///     handler::{handle_negotiated, MetricsHandler},
    ///     recorder::openmetrics::OpenMetricsHandle,
    ///     PrometheusMetricLayer,
    /// };
    ///
    /// #[tokio::main]
    /// async fn main() {
    ///     let (metric_layer, metric_handle) = PrometheusMetricLayer::pair();
    ///
    ///     let metrics: Router = Router::new()
    ///         .route("/metrics", get(handle_negotiated::<OpenMetricsHandle>))
    ///         .with_state(MetricsHandler::new(metric_handle));
    ///
    ///     let app = Router::new()
    ///         .route("/fast", get(|| async {}))
    ///         .route(
    ///             "/slow",
    ///             get(|| async {
    ///                 tokio::time::sleep(std::time::Duration::from_secs(1)).await;
    ///             }),
    ///         )
    ///         .layer(metric_layer)
    ///         .merge(metrics);
    ///
    ///     // and to actually run the server:
    ///     // let listener = tokio::net::TcpListener::bind("127.0.0.1:3000").await.unwrap();
    ///     // axum::serve(listener, app).await.unwrap();
    /// }
    /// ```
    #[cfg(feature = "openmetrics")]
    pub fn pair() -> (Self, OpenMetricsHandle) {
        let config = Config::default();
        let mut registry = Registry::default();
        let recorder = OpenMetricsRecorder::register(&config, &mut registry);
        (Self::new(config, recorder), OpenMetricsHandle::new(registry))
    }

    /// The configuration shared by every service this layer produces.
    pub fn config(&self) -> &Config {
        &self.shared.config
    }
}

impl<S> Layer<S> for PrometheusMetricLayer {
    type Service = PrometheusMetricService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        PrometheusMetricService::new(inner, self.shared.clone())
    }
}
