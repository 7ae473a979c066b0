//! A Prometheus middleware to collect HTTP metrics for Axum applications.
//!
//! `axum-exporter` records every request passing through a [`tower::Layer`] and exposes the
//! result in the Prometheus text format or in the OpenMetrics format. The registry itself is
//! provided by [`prometheus_client`] (feature `openmetrics`, with exemplars) or by any
//! [`metrics`] exporter, such as [`metrics_exporter_prometheus`] (feature `prometheus`).
//!
//! ## Metrics
//!
//! By default three HTTP metrics are tracked
//! - `starlette_requests_total` (labels: method, path, status_code, app_name): the total number of HTTP requests handled (counter)
//! - `starlette_request_duration_seconds` (labels: method, path, status_code, app_name): the request duration for all HTTP requests handled (histogram)
//! - `starlette_requests_in_progress` (labels: method, app_name): the number of currently in-flight requests (gauge)
//!
//! Two more counters can be selected with [`MetricLayerBuilder::with_optional_metrics`]:
//! - `starlette_response_body_size_bytes`: the response body bytes sent
//! - `starlette_request_body_size_bytes`: the declared request body bytes received
//!
//! With the OpenMetrics backend these two counters carry the `_total` suffix required for
//! counters, e.g. `starlette_response_body_size_bytes_total`.
//!
//! Custom labels (see [`labels`]) are appended to every metric in declaration order. The
//! `starlette` prefix and the `app_name` label can be changed on the builder.
//!
//! ## Usage
//!
//! Add `axum-exporter` to your `Cargo.toml`.
//! ```not_rust
//! [dependencies]
//! axum-exporter = "0.1.0"
//! ```
//!
//! Then you instantiate the middleware:
//! ```rust,no_run
//! use std::time::Duration;
//! use axum::{routing::get, Router};
//! use axum_exporter::{
//!     handler::{handle_negotiated, MetricsHandler},
//!     recorder::openmetrics::OpenMetricsHandle,
//!     MetricLayerBuilder,
//! };
//!
//! #[tokio::main]
//! async fn main() {
//!     let (prometheus_layer, metric_handle) = MetricLayerBuilder::new()
//!         .with_app_name("shop")
//!         .with_skip_paths(["/metrics"])
//!         .build_pair()
//!         .unwrap();
//!
//!     let app: Router = Router::new()
//!         .route("/fast", get(|| async {}))
//!         .route(
//!             "/slow",
//!             get(|| async {
//!                 tokio::time::sleep(Duration::from_secs(1)).await;
//!             }),
//!         )
//!         .route("/metrics", get(handle_negotiated::<OpenMetricsHandle>))
//!         .with_state(MetricsHandler::new(metric_handle))
//!         .layer(prometheus_layer);
//!
//!     // let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await.unwrap();
//!     // axum::serve(listener, app).await.unwrap();
//! }
//! ```
//!
//! Note that the `/metrics` endpoint is not automatically exposed, so you need to add that as a route manually.
//! Calling the `/metrics` endpoint will expose your metrics:
//! ```not_rust
//! # HELP starlette_requests_total Total HTTP requests.
//! # TYPE starlette_requests_total counter
//! starlette_requests_total{method="GET",path="/fast",status_code="200",app_name="shop"} 5
//! # HELP starlette_request_duration_seconds HTTP request duration, in seconds.
//! # TYPE starlette_request_duration_seconds histogram
//! starlette_request_duration_seconds_sum{method="GET",path="/fast",status_code="200",app_name="shop"} 0.000236
//! starlette_request_duration_seconds_count{method="GET",path="/fast",status_code="200",app_name="shop"} 5
//! starlette_request_duration_seconds_bucket{le="0.005",method="GET",path="/fast",status_code="200",app_name="shop"} 5
//! ...
//! # HELP starlette_requests_in_progress Total HTTP requests currently in progress.
//! # TYPE starlette_requests_in_progress gauge
//! starlette_requests_in_progress{method="GET",app_name="shop"} 0
//! ```
//!
//! Requests that do not match any route are ignored by default, as are paths and methods
//! given to [`MetricLayerBuilder::with_skip_paths`] and friends.

#![allow(clippy::module_name_repetitions, clippy::unreadable_literal)]

/// The default value of the `app_name` label.
pub const DEFAULT_APP_NAME: &str = "starlette";

/// The default prefix of the metric names.
pub const DEFAULT_PREFIX: &str = "starlette";

mod body;
mod builder;
mod config;
mod error;
mod future;
pub mod handler;
pub mod labels;
mod layer;
pub mod recorder;
mod resolver;
mod service;
mod utils;

pub use body::ResponseBody;
pub use builder::MetricLayerBuilder;
pub use config::{Config, OptionalMetric, SkipPath, RESERVED_LABELS, UNKNOWN_PATH};
pub use error::Error;
pub use future::ResponseFuture;
pub use layer::PrometheusMetricLayer;
pub use recorder::{Format, MetricKind, MetricsEncoder, MetricsRecorder};
pub use service::PrometheusMetricService;
pub use utils::{MetricNames, SECONDS_DURATION_BUCKETS};

pub use metrics;
#[cfg(feature = "prometheus")]
pub use metrics_exporter_prometheus;
#[cfg(feature = "openmetrics")]
pub use prometheus_client;
