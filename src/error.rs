use thiserror::Error;

/// Errors produced while building the middleware or rendering the registry.
///
/// Everything except [`Error::Encode`] and [`Error::Exporter`] is a static
/// misconfiguration and is reported by [`MetricLayerBuilder`] before any
/// request is handled.
///
/// [`MetricLayerBuilder`]: crate::MetricLayerBuilder
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    #[error("label name `{0}` is reserved")]
    ReservedLabel(String),

    #[error("label `{0}` is declared more than once")]
    DuplicateLabel(String),

    #[error("`{0}` is not a valid label name")]
    InvalidLabelName(String),

    #[error("`{0}` is not a valid metric prefix")]
    InvalidPrefix(String),

    #[error("histogram buckets must not be empty")]
    EmptyBuckets,

    #[error("histogram bucket `{0}` is not a positive finite number")]
    InvalidBucket(f64),

    #[error("histogram buckets must be strictly ascending, found `{next}` after `{prev}`")]
    UnsortedBuckets { prev: f64, next: f64 },

    #[error("invalid skip path pattern")]
    InvalidSkipPattern(#[from] regex::Error),

    #[error("invalid route pattern `{route}`")]
    InvalidRoute {
        route: String,
        #[source]
        source: matchit::InsertError,
    },

    #[error("unknown optional metric `{0}`")]
    UnknownOptionalMetric(String),

    #[error("failed to encode metrics")]
    Encode(#[from] std::fmt::Error),

    #[cfg(feature = "prometheus")]
    #[error("failed to build the prometheus recorder")]
    Exporter(#[from] metrics_exporter_prometheus::BuildError),
}
