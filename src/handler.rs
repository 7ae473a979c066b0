//! Axum handlers exposing the registry to a Prometheus scraper.
//!
//! ```rust,no_run
//! use axum::{routing::get, Router};
//! use axum_exporter::{
//!     handler::{handle_metrics, handle_openmetrics, MetricsHandler},
//!     recorder::openmetrics::OpenMetricsHandle,
//!     PrometheusMetricLayer,
//! };
//!
//! let (metric_layer, metric_handle) = PrometheusMetricLayer::pair();
//! let app: Router = Router::new()
//!     .route("/metrics", get(handle_metrics::<OpenMetricsHandle>))
//!     .route("/openmetrics", get(handle_openmetrics::<OpenMetricsHandle>))
//!     .with_state(MetricsHandler::new(metric_handle))
//!     .layer(metric_layer);
//! ```
use std::sync::Arc;

use axum::{
    extract::State,
    response::{IntoResponse, Response},
};
use http::{
    header::{ACCEPT, CONTENT_TYPE},
    HeaderMap, StatusCode,
};

use crate::recorder::{Format, MetricsEncoder};

/// Renders a [`MetricsEncoder`] into HTTP responses.
pub struct MetricsHandler<E> {
    encoder: Arc<E>,
}

impl<E> Clone for MetricsHandler<E> {
    fn clone(&self) -> Self {
        Self {
            encoder: self.encoder.clone(),
        }
    }
}

impl<E: MetricsEncoder> MetricsHandler<E> {
    pub fn new(encoder: E) -> Self {
        Self {
            encoder: Arc::new(encoder),
        }
    }

    pub fn encoder(&self) -> &E {
        &self.encoder
    }

    /// The response for `format`, or for [`Format::Text`] when the encoder cannot produce
    /// `format`.
    pub fn render(&self, format: Format) -> Response {
        let format = if self.encoder.supports(format) {
            format
        } else {
            Format::Text
        };
        match self.encoder.encode(format) {
            Ok(body) => ([(CONTENT_TYPE, format.content_type())], body).into_response(),
            Err(err) => {
                tracing::error!(error = %err, "failed to encode metrics");
                StatusCode::INTERNAL_SERVER_ERROR.into_response()
            }
        }
    }

    /// Picks OpenMetrics when the scraper accepts it and the encoder can produce it.
    pub fn negotiate(&self, headers: &HeaderMap) -> Format {
        let accepts_openmetrics = headers
            .get_all(ACCEPT)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .flat_map(|value| value.split(','))
            .any(|media_range| {
                media_range
                    .trim()
                    .to_ascii_lowercase()
                    .starts_with("application/openmetrics-text")
            });

        if accepts_openmetrics && self.encoder.supports(Format::OpenMetrics) {
            Format::OpenMetrics
        } else {
            Format::Text
        }
    }
}

/// Always renders the Prometheus text format.
pub async fn handle_metrics<E: MetricsEncoder>(
    State(handler): State<MetricsHandler<E>>,
) -> Response {
    handler.render(Format::Text)
}

/// Renders the OpenMetrics format, including exemplars.
pub async fn handle_openmetrics<E: MetricsEncoder>(
    State(handler): State<MetricsHandler<E>>,
) -> Response {
    handler.render(Format::OpenMetrics)
}

/// Renders whichever format the `Accept` header asks for.
pub async fn handle_negotiated<E: MetricsEncoder>(
    State(handler): State<MetricsHandler<E>>,
    headers: HeaderMap,
) -> Response {
    let format = handler.negotiate(&headers);
    handler.render(format)
}
