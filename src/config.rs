use std::{fmt, str::FromStr, sync::Arc};

use regex::Regex;

use crate::{
    labels::{ExemplarFn, LabelValue},
    utils::{self, MetricNames, SECONDS_DURATION_BUCKETS},
    Error, DEFAULT_APP_NAME, DEFAULT_PREFIX,
};

/// Label names set by the middleware itself, which custom labels cannot use.
pub const RESERVED_LABELS: [&str; 4] = ["app_name", "method", "path", "status_code"];

/// The path label used for unmatched requests when [`with_group_unhandled_paths`] is enabled.
///
/// [`with_group_unhandled_paths`]: crate::MetricLayerBuilder::with_group_unhandled_paths
pub const UNKNOWN_PATH: &str = "__unknown__";

/// Metrics that are only recorded when explicitly selected.
///
/// Both are counters. The [`metrics`] backend exposes them under the names below, while the
/// OpenMetrics backend appends the mandatory `_total` suffix, e.g.
/// `{prefix}_response_body_size_bytes_total`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OptionalMetric {
    /// `{prefix}_response_body_size_bytes`, the number of response body bytes sent.
    ResponseBodySize,
    /// `{prefix}_request_body_size_bytes`, the declared size of request bodies.
    RequestBodySize,
}

impl OptionalMetric {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ResponseBodySize => "response_body_size",
            Self::RequestBodySize => "request_body_size",
        }
    }
}

impl FromStr for OptionalMetric {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "response_body_size" => Ok(Self::ResponseBodySize),
            "request_body_size" => Ok(Self::RequestBodySize),
            other => Err(Error::UnknownOptionalMetric(other.to_owned())),
        }
    }
}

impl fmt::Display for OptionalMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A rule that excludes request paths from observation.
#[derive(Debug, Clone)]
pub enum SkipPath {
    /// The path must be equal to the given string.
    Exact(String),
    /// The whole path must match the regular expression.
    Pattern(Regex),
}

impl SkipPath {
    /// Compile `pattern` into a [`SkipPath::Pattern`]. The pattern is anchored at both ends, so
    /// `/health.*` matches `/healthz` but `/health` does not match `/api/health`.
    pub fn pattern(pattern: &str) -> Result<Self, Error> {
        Ok(Self::Pattern(Regex::new(&format!("^(?:{pattern})$"))?))
    }

    pub fn matches(&self, path: &str) -> bool {
        match self {
            Self::Exact(exact) => exact == path,
            Self::Pattern(regex) => regex.is_match(path),
        }
    }
}

impl From<&str> for SkipPath {
    fn from(path: &str) -> Self {
        Self::Exact(path.to_owned())
    }
}

impl From<String> for SkipPath {
    fn from(path: String) -> Self {
        Self::Exact(path)
    }
}

impl From<Regex> for SkipPath {
    /// The regex is anchored at both ends, like [`SkipPath::pattern`].
    fn from(regex: Regex) -> Self {
        let anchored = format!("^(?:{})$", regex.as_str());
        // a valid regex only fails again here by exceeding the size limit
        match Regex::new(&anchored) {
            Ok(anchored) => Self::Pattern(anchored),
            Err(_) => Self::Pattern(regex),
        }
    }
}

/// The immutable configuration of the middleware.
///
/// Built and validated once by [`MetricLayerBuilder::config`], then shared by every request.
///
/// [`MetricLayerBuilder::config`]: crate::MetricLayerBuilder::config
pub struct Config {
    pub(crate) app_name: String,
    pub(crate) prefix: String,
    pub(crate) names: MetricNames,
    pub(crate) buckets: Option<Vec<f64>>,
    pub(crate) group_paths: bool,
    pub(crate) filter_unhandled_paths: bool,
    pub(crate) group_unhandled_paths: bool,
    pub(crate) skip_paths: Vec<SkipPath>,
    pub(crate) skip_methods: Vec<String>,
    pub(crate) always_use_int_status: bool,
    pub(crate) labels: Vec<(String, LabelValue)>,
    pub(crate) exemplars: Vec<(String, ExemplarFn)>,
    pub(crate) optional_metrics: Vec<OptionalMetric>,
    pub(crate) routes: Option<Arc<matchit::Router<String>>>,
}

impl Config {
    pub fn app_name(&self) -> &str {
        &self.app_name
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn metric_names(&self) -> &MetricNames {
        &self.names
    }

    /// The histogram buckets, falling back to [`SECONDS_DURATION_BUCKETS`] when none were set.
    pub fn buckets(&self) -> &[f64] {
        self.buckets
            .as_deref()
            .unwrap_or(SECONDS_DURATION_BUCKETS.as_slice())
    }

    pub fn group_paths(&self) -> bool {
        self.group_paths
    }

    pub fn filter_unhandled_paths(&self) -> bool {
        self.filter_unhandled_paths
    }

    pub fn group_unhandled_paths(&self) -> bool {
        self.group_unhandled_paths
    }

    pub fn always_use_int_status(&self) -> bool {
        self.always_use_int_status
    }

    pub fn is_enabled(&self, metric: OptionalMetric) -> bool {
        self.optional_metrics.contains(&metric)
    }

    /// The label names of the counters and the histogram, in order.
    pub fn label_names(&self) -> Vec<&str> {
        ["method", "path", "status_code", "app_name"]
            .into_iter()
            .chain(self.labels.iter().map(|(name, _)| name.as_str()))
            .collect()
    }

    /// The label names of the in-progress gauge, in order. Labels read from the response are
    /// left out, as the gauge is updated before a response exists.
    pub fn in_progress_label_names(&self) -> Vec<&str> {
        ["method", "app_name"]
            .into_iter()
            .chain(
                self.labels
                    .iter()
                    .filter(|(_, value)| value.is_request_time())
                    .map(|(name, _)| name.as_str()),
            )
            .collect()
    }

    pub(crate) fn should_skip(&self, method: &str, path: &str) -> bool {
        self.skip_methods.iter().any(|m| m == method)
            || self.skip_paths.iter().any(|skip| skip.matches(path))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            app_name: DEFAULT_APP_NAME.to_owned(),
            prefix: DEFAULT_PREFIX.to_owned(),
            names: MetricNames::with_prefix(DEFAULT_PREFIX),
            buckets: None,
            group_paths: true,
            filter_unhandled_paths: true,
            group_unhandled_paths: false,
            skip_paths: Vec::new(),
            skip_methods: Vec::new(),
            always_use_int_status: false,
            labels: Vec::new(),
            exemplars: Vec::new(),
            optional_metrics: Vec::new(),
            routes: None,
        }
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("app_name", &self.app_name)
            .field("prefix", &self.prefix)
            .field("buckets", &self.buckets())
            .field("group_paths", &self.group_paths)
            .field("filter_unhandled_paths", &self.filter_unhandled_paths)
            .field("group_unhandled_paths", &self.group_unhandled_paths)
            .field("skip_paths", &self.skip_paths)
            .field("skip_methods", &self.skip_methods)
            .field("always_use_int_status", &self.always_use_int_status)
            .field("labels", &self.labels)
            .field(
                "exemplars",
                &self.exemplars.iter().map(|(name, _)| name).collect::<Vec<_>>(),
            )
            .field("optional_metrics", &self.optional_metrics)
            .finish_non_exhaustive()
    }
}

pub(crate) fn validate_prefix(prefix: &str) -> Result<(), Error> {
    if utils::is_valid_metric_prefix(prefix) {
        Ok(())
    } else {
        Err(Error::InvalidPrefix(prefix.to_owned()))
    }
}

pub(crate) fn validate_buckets(buckets: &[f64]) -> Result<(), Error> {
    if buckets.is_empty() {
        return Err(Error::EmptyBuckets);
    }
    if let Some(&bucket) = buckets.iter().find(|b| !b.is_finite() || **b <= 0.0) {
        return Err(Error::InvalidBucket(bucket));
    }
    match buckets.windows(2).find(|pair| pair[0] >= pair[1]) {
        Some(pair) => Err(Error::UnsortedBuckets {
            prev: pair[0],
            next: pair[1],
        }),
        None => Ok(()),
    }
}

pub(crate) fn validate_label_names<'a>(
    names: impl IntoIterator<Item = &'a str>,
) -> Result<(), Error> {
    let mut seen: Vec<&str> = Vec::new();
    for name in names {
        if RESERVED_LABELS.contains(&name) {
            return Err(Error::ReservedLabel(name.to_owned()));
        }
        if !utils::is_valid_label_name(name) {
            return Err(Error::InvalidLabelName(name.to_owned()));
        }
        if seen.contains(&name) {
            return Err(Error::DuplicateLabel(name.to_owned()));
        }
        seen.push(name);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buckets_must_be_ascending_and_positive() {
        assert!(validate_buckets(&[0.1, 0.25, 0.5]).is_ok());
        assert!(matches!(validate_buckets(&[]), Err(Error::EmptyBuckets)));
        assert!(matches!(
            validate_buckets(&[0.5, 0.25]),
            Err(Error::UnsortedBuckets { prev, next }) if prev == 0.5 && next == 0.25
        ));
        assert!(matches!(
            validate_buckets(&[0.1, 0.1]),
            Err(Error::UnsortedBuckets { .. })
        ));
        assert!(matches!(
            validate_buckets(&[0.0, 1.0]),
            Err(Error::InvalidBucket(b)) if b == 0.0
        ));
        assert!(matches!(
            validate_buckets(&[1.0, f64::INFINITY]),
            Err(Error::InvalidBucket(_))
        ));
    }

    #[test]
    fn reserved_and_duplicate_labels() {
        assert!(validate_label_names(["tenant", "region"]).is_ok());
        assert!(matches!(
            validate_label_names(["method"]),
            Err(Error::ReservedLabel(name)) if name == "method"
        ));
        assert!(matches!(
            validate_label_names(["tenant", "tenant"]),
            Err(Error::DuplicateLabel(_))
        ));
        assert!(matches!(
            validate_label_names(["x-tenant"]),
            Err(Error::InvalidLabelName(_))
        ));
    }

    #[test]
    fn skip_patterns_are_anchored() {
        let skip = SkipPath::pattern("/health.*").unwrap();
        assert!(skip.matches("/healthz"));
        assert!(skip.matches("/health"));
        assert!(!skip.matches("/api/health"));

        let exact = SkipPath::from("/metrics");
        assert!(exact.matches("/metrics"));
        assert!(!exact.matches("/metrics/"));
    }

    #[test]
    fn compiled_regex_is_anchored() {
        let skip = SkipPath::from(Regex::new("/items/[0-9]+").unwrap());
        assert!(skip.matches("/items/12"));
        assert!(!skip.matches("/api/items/12/reviews"));
        assert!(!skip.matches("/items/12/reviews"));

        let alternation = SkipPath::from(Regex::new("/a|/ab").unwrap());
        assert!(alternation.matches("/ab"));
        assert!(!alternation.matches("/abc"));
    }

    #[test]
    fn invalid_skip_pattern() {
        assert!(matches!(
            SkipPath::pattern("/items/(["),
            Err(Error::InvalidSkipPattern(_))
        ));
    }

    #[test]
    fn optional_metrics_parse() {
        assert_eq!(
            "response_body_size".parse::<OptionalMetric>().unwrap(),
            OptionalMetric::ResponseBodySize
        );
        assert_eq!(
            OptionalMetric::RequestBodySize.to_string(),
            "request_body_size"
        );
        assert!(matches!(
            "body_size".parse::<OptionalMetric>(),
            Err(Error::UnknownOptionalMetric(_))
        ));
    }

    #[test]
    fn default_label_names() {
        let config = Config::default();
        assert_eq!(
            config.label_names(),
            ["method", "path", "status_code", "app_name"]
        );
        assert_eq!(config.in_progress_label_names(), ["method", "app_name"]);
        assert_eq!(config.buckets(), SECONDS_DURATION_BUCKETS);
    }
}
