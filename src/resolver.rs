//! Maps a request/response pair to the label set reported for it.
use std::{
    borrow::Cow,
    panic::{self, AssertUnwindSafe},
};

use axum::extract::MatchedPath;
use http::{request::Parts, HeaderMap, StatusCode};
use tokio::time::Instant;
use tower::BoxError;

use crate::{
    config::{Config, UNKNOWN_PATH},
    labels::{LabelSet, LabelValue},
};

/// Everything known about an observed request before the inner service runs.
#[derive(Debug)]
pub(crate) struct RequestContext {
    pub(crate) start: Instant,
    pub(crate) method: Cow<'static, str>,
    pub(crate) path: String,
    pub(crate) route: Option<String>,
    /// One entry per custom label, `None` for labels read from the response.
    pub(crate) label_values: Vec<Option<String>>,
    pub(crate) request_body_size: u64,
}

/// The route template the request was dispatched to, if any.
///
/// axum's [`MatchedPath`] wins; route patterns registered on the builder are only consulted
/// when the middleware sits outside of a router.
pub(crate) fn route_template(config: &Config, parts: &Parts) -> Option<String> {
    if let Some(matched) = parts.extensions.get::<MatchedPath>() {
        return Some(matched.as_str().to_owned());
    }
    config
        .routes
        .as_ref()
        .and_then(|routes| routes.at(parts.uri.path()).ok())
        .map(|matched| matched.value.clone())
}

/// Unmatched requests are dropped when `filter_unhandled_paths` is on, so that probing traffic
/// cannot create new label values.
pub(crate) fn is_filtered(config: &Config, route: Option<&str>) -> bool {
    route.is_none() && config.filter_unhandled_paths
}

/// Evaluates every request-time custom label exactly once.
pub(crate) fn request_label_values(config: &Config, parts: &Parts) -> Vec<Option<String>> {
    config
        .labels
        .iter()
        .map(|(name, value)| match value {
            LabelValue::Static(value) => Some(value.clone()),
            LabelValue::FromRequest(f) => {
                Some(run_callback("label", name, || f(parts)).unwrap_or_default())
            }
            LabelValue::FromResponseHeader(_) => None,
        })
        .collect()
}

pub(crate) fn path_label<'a>(config: &Config, context: &'a RequestContext) -> &'a str {
    match context.route.as_deref() {
        Some(route) if config.group_paths => route,
        None if config.group_unhandled_paths => UNKNOWN_PATH,
        _ => &context.path,
    }
}

pub(crate) fn status_label(status: StatusCode, always_use_int_status: bool) -> String {
    if always_use_int_status {
        status.as_u16().to_string()
    } else {
        status.as_str().to_owned()
    }
}

/// The labels of the counters and the histogram.
///
/// `headers` are the response headers, or `None` when the inner service failed without
/// producing a response.
pub(crate) fn resolve(
    config: &Config,
    context: &RequestContext,
    status: StatusCode,
    headers: Option<&HeaderMap>,
) -> LabelSet {
    let mut labels = LabelSet::with_capacity(4 + config.labels.len());
    labels.push("method", &*context.method);
    labels.push("path", path_label(config, context));
    labels.push("status_code", status_label(status, config.always_use_int_status));
    labels.push("app_name", config.app_name.as_str());

    for ((name, value), resolved) in config.labels.iter().zip(&context.label_values) {
        let value = match (value, resolved) {
            (_, Some(resolved)) => resolved.clone(),
            (LabelValue::FromResponseHeader(label), None) => label.value(headers),
            (_, None) => String::new(),
        };
        labels.push(name.as_str(), value);
    }
    labels
}

/// The labels of the in-progress gauge.
pub(crate) fn in_progress_labels(config: &Config, context: &RequestContext) -> LabelSet {
    let mut labels = LabelSet::with_capacity(2 + config.labels.len());
    labels.push("method", &*context.method);
    labels.push("app_name", config.app_name.as_str());

    for ((name, _), resolved) in config.labels.iter().zip(&context.label_values) {
        if let Some(value) = resolved {
            labels.push(name.as_str(), value.as_str());
        }
    }
    labels
}

/// Evaluates the exemplar callbacks. Empty values are left out, and no exemplar is attached
/// at all when every value is empty.
pub(crate) fn exemplar(config: &Config) -> Option<LabelSet> {
    if config.exemplars.is_empty() {
        return None;
    }
    let mut exemplar = LabelSet::with_capacity(config.exemplars.len());
    for (name, f) in &config.exemplars {
        match run_callback("exemplar", name, || f()) {
            Some(value) if !value.is_empty() => exemplar.push(name.as_str(), value),
            _ => {}
        }
    }
    (!exemplar.is_empty()).then_some(exemplar)
}

/// Runs a user callback. Errors and panics are logged and yield `None`, so the request
/// carrying on is never affected.
fn run_callback<F>(kind: &'static str, name: &str, f: F) -> Option<String>
where
    F: FnOnce() -> Result<String, BoxError>,
{
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(value)) => Some(value),
        Ok(Err(err)) => {
            tracing::warn!(kind, callback = %name, error = %err, "metrics callback failed");
            None
        }
        Err(_) => {
            tracing::warn!(kind, callback = %name, "metrics callback panicked");
            None
        }
    }
}
