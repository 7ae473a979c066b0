use std::borrow::Cow;

use http::Method;

/// Standard HTTP request duration buckets measured in seconds. The default buckets are tailored to broadly
/// measure the response time of a network service. Most likely, however, you will be required to define
/// buckets customized to your use case.
pub const SECONDS_DURATION_BUCKETS: &[f64; 11] = &[
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

/// The method label. Standard methods never allocate, extension methods are uppercased.
pub(crate) fn method_label(method: &Method) -> Cow<'static, str> {
    match *method {
        Method::OPTIONS => Cow::Borrowed("OPTIONS"),
        Method::GET => Cow::Borrowed("GET"),
        Method::POST => Cow::Borrowed("POST"),
        Method::PUT => Cow::Borrowed("PUT"),
        Method::DELETE => Cow::Borrowed("DELETE"),
        Method::HEAD => Cow::Borrowed("HEAD"),
        Method::TRACE => Cow::Borrowed("TRACE"),
        Method::CONNECT => Cow::Borrowed("CONNECT"),
        Method::PATCH => Cow::Borrowed("PATCH"),
        _ => Cow::Owned(method.as_str().to_ascii_uppercase()),
    }
}

/// Whether `name` is usable as a Prometheus label name (`[a-zA-Z_][a-zA-Z0-9_]*`).
pub(crate) fn is_valid_label_name(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Whether `prefix` is usable as a metric name prefix (`[a-zA-Z_:][a-zA-Z0-9_:]*`).
pub(crate) fn is_valid_metric_prefix(prefix: &str) -> bool {
    let mut chars = prefix.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_' || c == ':')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == ':')
}

/// The metric family names in use by one middleware instance.
///
/// Names are derived from the prefix given to [`with_prefix`] and never change afterwards.
///
/// [`with_prefix`]: crate::MetricLayerBuilder::with_prefix
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricNames {
    /// `{prefix}_requests_total`
    pub requests_total: String,
    /// `{prefix}_request_duration_seconds`
    pub request_duration_seconds: String,
    /// `{prefix}_requests_in_progress`
    pub requests_in_progress: String,
    /// `{prefix}_response_body_size_bytes`
    pub response_body_size_bytes: String,
    /// `{prefix}_request_body_size_bytes`
    pub request_body_size_bytes: String,
}

impl MetricNames {
    pub fn with_prefix(prefix: &str) -> Self {
        Self {
            requests_total: format!("{prefix}_requests_total"),
            request_duration_seconds: format!("{prefix}_request_duration_seconds"),
            requests_in_progress: format!("{prefix}_requests_in_progress"),
            response_body_size_bytes: format!("{prefix}_response_body_size_bytes"),
            request_body_size_bytes: format!("{prefix}_request_body_size_bytes"),
        }
    }
}

impl Default for MetricNames {
    fn default() -> Self {
        Self::with_prefix(crate::DEFAULT_PREFIX)
    }
}
