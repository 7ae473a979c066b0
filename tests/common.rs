#![allow(dead_code)]

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use axum::body::Body;
use axum_exporter::{labels::LabelSet, MetricKind, MetricsRecorder};
use http::Request;
use http_body_util::BodyExt;

/// Records everything in memory so that tests can inspect single observations.
#[derive(Clone, Default)]
pub struct MemoryRecorder {
    state: Arc<Mutex<State>>,
}

#[derive(Default)]
struct State {
    counters: HashMap<(MetricKind, LabelSet), u64>,
    histograms: HashMap<(MetricKind, LabelSet), Vec<f64>>,
    gauges: HashMap<LabelSet, i64>,
    gauge_peak: i64,
    exemplars: Vec<LabelSet>,
}

impl MemoryRecorder {
    pub fn counter(&self, metric: MetricKind, labels: &[(&str, &str)]) -> u64 {
        let labels: LabelSet = labels.iter().copied().collect();
        let state = self.state.lock().unwrap();
        state.counters.get(&(metric, labels)).copied().unwrap_or(0)
    }

    /// Sum of a counter over every label set.
    pub fn counter_total(&self, metric: MetricKind) -> u64 {
        let state = self.state.lock().unwrap();
        state
            .counters
            .iter()
            .filter(|((kind, _), _)| *kind == metric)
            .map(|(_, value)| value)
            .sum()
    }

    /// Every label set a counter was incremented with.
    pub fn counter_labels(&self, metric: MetricKind) -> Vec<LabelSet> {
        let state = self.state.lock().unwrap();
        state
            .counters
            .keys()
            .filter(|(kind, _)| *kind == metric)
            .map(|(_, labels)| labels.clone())
            .collect()
    }

    /// Every label set a histogram was observed with.
    pub fn histogram_labels(&self, metric: MetricKind) -> Vec<LabelSet> {
        let state = self.state.lock().unwrap();
        state
            .histograms
            .keys()
            .filter(|(kind, _)| *kind == metric)
            .map(|(_, labels)| labels.clone())
            .collect()
    }

    pub fn observations(&self) -> Vec<f64> {
        let state = self.state.lock().unwrap();
        state.histograms.values().flatten().copied().collect()
    }

    /// Current value of the in-progress gauge, over every label set.
    pub fn in_progress(&self) -> i64 {
        self.state.lock().unwrap().gauges.values().sum()
    }

    pub fn in_progress_labels(&self) -> Vec<LabelSet> {
        self.state.lock().unwrap().gauges.keys().cloned().collect()
    }

    pub fn in_progress_peak(&self) -> i64 {
        self.state.lock().unwrap().gauge_peak
    }

    pub fn exemplars(&self) -> Vec<LabelSet> {
        self.state.lock().unwrap().exemplars.clone()
    }
}

impl MetricsRecorder for MemoryRecorder {
    fn increment_counter(
        &self,
        metric: MetricKind,
        labels: &LabelSet,
        value: u64,
        exemplar: Option<&LabelSet>,
    ) {
        let mut state = self.state.lock().unwrap();
        *state.counters.entry((metric, labels.clone())).or_default() += value;
        state.exemplars.extend(exemplar.cloned());
    }

    fn observe_histogram(
        &self,
        metric: MetricKind,
        labels: &LabelSet,
        value: f64,
        _exemplar: Option<&LabelSet>,
    ) {
        let mut state = self.state.lock().unwrap();
        state
            .histograms
            .entry((metric, labels.clone()))
            .or_default()
            .push(value);
    }

    fn adjust_gauge(&self, _metric: MetricKind, labels: &LabelSet, delta: i64) {
        let mut state = self.state.lock().unwrap();
        *state.gauges.entry(labels.clone()).or_default() += delta;
        let total: i64 = state.gauges.values().sum();
        state.gauge_peak = state.gauge_peak.max(total);
    }
}

pub fn get(uri: &str) -> Request<Body> {
    Request::get(uri).body(Body::empty()).unwrap()
}

pub async fn body_string(body: Body) -> String {
    let bytes = body.collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}

/// The value of the first sample of `name` whose line contains every fragment.
pub fn sample(exposition: &str, name: &str, fragments: &[&str]) -> Option<f64> {
    exposition
        .lines()
        .filter(|line| line.starts_with(name) && line[name.len()..].starts_with('{'))
        .find(|line| fragments.iter().all(|fragment| line.contains(fragment)))
        .and_then(|line| line.split_once("} "))
        .and_then(|(_, value)| value.split_whitespace().next())
        .and_then(|value| value.parse().ok())
}
