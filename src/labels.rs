//! Label sets and the providers for user defined labels.
//!
//! A custom label is declared with a name and a [`LabelValue`]:
//!
//! ```rust
//! use axum_exporter::{labels::{from_header, from_response_header, LabelValue}, MetricLayerBuilder};
//!
//! let config = MetricLayerBuilder::new()
//!     .with_label("service", LabelValue::fixed("checkout"))
//!     .with_label("user", from_header("x-user", Some(&["frank", "estelle"])))
//!     .with_label("cache", from_response_header("x-cache", Some(&["HIT", "MISS"]), "UNKNOWN"))
//!     .with_label(
//!         "api_version",
//!         LabelValue::computed(|parts| if parts.uri.path().starts_with("/v2") { "2" } else { "1" }),
//!     )
//!     .config()
//!     .unwrap();
//! ```
use std::{fmt, sync::Arc};

use http::{request::Parts, HeaderMap};
use tower::BoxError;

pub(crate) type RequestLabelFn = Arc<dyn Fn(&Parts) -> Result<String, BoxError> + Send + Sync>;
pub(crate) type ExemplarFn = Arc<dyn Fn() -> Result<String, BoxError> + Send + Sync>;

/// An ordered list of label name/value pairs.
///
/// Every observation of one request uses the same `LabelSet` for all metric families.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct LabelSet(Vec<(String, String)>);

impl LabelSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self(Vec::with_capacity(capacity))
    }

    pub fn push(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.push((name.into(), value.into()));
    }

    /// The value of the label `name`, if present.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|(k, _)| k.as_str())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_pairs(self) -> Vec<(String, String)> {
        self.0
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for LabelSet {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

impl fmt::Display for LabelSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (name, value)) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{name}={value:?}")?;
        }
        Ok(())
    }
}

/// Where the value of a custom label comes from.
#[derive(Clone)]
pub enum LabelValue {
    /// The same value for every request.
    Static(String),
    /// Computed from the request head, before the request is handed to the inner service.
    FromRequest(RequestLabelFn),
    /// Read from the response headers once the response is available.
    FromResponseHeader(ResponseHeaderLabel),
}

impl LabelValue {
    pub fn fixed(value: impl Into<String>) -> Self {
        Self::Static(value.into())
    }

    /// A label computed from the request head.
    pub fn computed<F, T>(f: F) -> Self
    where
        F: Fn(&Parts) -> T + Send + Sync + 'static,
        T: ToString,
    {
        Self::FromRequest(Arc::new(move |parts: &Parts| -> Result<String, BoxError> {
            Ok(f(parts).to_string())
        }))
    }

    /// A label computed from the request head that may fail.
    ///
    /// A failure is logged and the label is reported with an empty value, the request itself
    /// is never affected.
    pub fn try_computed<F, T, E>(f: F) -> Self
    where
        F: Fn(&Parts) -> Result<T, E> + Send + Sync + 'static,
        T: ToString,
        E: Into<BoxError>,
    {
        Self::FromRequest(Arc::new(move |parts: &Parts| -> Result<String, BoxError> {
            f(parts).map(|v| v.to_string()).map_err(Into::into)
        }))
    }

    pub(crate) fn is_request_time(&self) -> bool {
        !matches!(self, Self::FromResponseHeader(_))
    }
}

impl fmt::Debug for LabelValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Static(value) => f.debug_tuple("Static").field(value).finish(),
            Self::FromRequest(_) => f.write_str("FromRequest(..)"),
            Self::FromResponseHeader(label) => {
                f.debug_tuple("FromResponseHeader").field(label).finish()
            }
        }
    }
}

impl From<&str> for LabelValue {
    fn from(value: &str) -> Self {
        Self::fixed(value)
    }
}

impl From<String> for LabelValue {
    fn from(value: String) -> Self {
        Self::Static(value)
    }
}

/// A label populated from a response header.
#[derive(Debug, Clone)]
pub struct ResponseHeaderLabel {
    key: String,
    allowed_values: Option<Vec<String>>,
    default: String,
}

impl ResponseHeaderLabel {
    pub(crate) fn value(&self, headers: Option<&HeaderMap>) -> String {
        headers
            .and_then(|headers| headers.get(self.key.as_str()))
            .and_then(|value| value.to_str().ok())
            .filter(|value| is_allowed(self.allowed_values.as_deref(), value))
            .map_or_else(|| self.default.clone(), str::to_owned)
    }
}

fn is_allowed(allowed_values: Option<&[String]>, value: &str) -> bool {
    allowed_values.map_or(true, |allowed| allowed.iter().any(|a| a == value))
}

/// Use the value of a request header as a label value.
///
/// A missing header produces an empty value. If `allowed_values` is given, any value outside of
/// it is also reported as empty, which keeps the cardinality of the label bounded.
pub fn from_header(key: &str, allowed_values: Option<&[&str]>) -> LabelValue {
    let key = key.to_ascii_lowercase();
    let allowed_values: Option<Vec<String>> =
        allowed_values.map(|values| values.iter().map(|v| (*v).to_owned()).collect());

    LabelValue::try_computed(move |parts: &Parts| -> Result<String, BoxError> {
        let Some(value) = parts.headers.get(key.as_str()) else {
            return Ok(String::new());
        };
        let value = value.to_str()?;
        if is_allowed(allowed_values.as_deref(), value) {
            Ok(value.to_owned())
        } else {
            Ok(String::new())
        }
    })
}

/// Use the value of a response header as a label value.
///
/// The value is read when the response head is available. Missing or disallowed values, and
/// requests that failed without a response, are reported as `default`.
pub fn from_response_header(
    key: &str,
    allowed_values: Option<&[&str]>,
    default: impl Into<String>,
) -> LabelValue {
    LabelValue::FromResponseHeader(ResponseHeaderLabel {
        key: key.to_ascii_lowercase(),
        allowed_values: allowed_values
            .map(|values| values.iter().map(|v| (*v).to_owned()).collect()),
        default: default.into(),
    })
}
