use std::{
    future::Future,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};

use futures_core::ready;
use http::{HeaderMap, Response, StatusCode};
use pin_project::{pin_project, pinned_drop};

use crate::{
    body::{BodySizeTracker, ResponseBody},
    config::OptionalMetric,
    labels::LabelSet,
    layer::Shared,
    recorder::MetricKind,
    resolver::{self, RequestContext},
};

/// Keeps a request counted in the in-progress gauge for as long as it is alive.
pub(crate) struct InProgressGuard {
    shared: Arc<Shared>,
    labels: LabelSet,
}

impl InProgressGuard {
    pub(crate) fn acquire(shared: Arc<Shared>, labels: LabelSet) -> Self {
        shared
            .recorder
            .adjust_gauge(MetricKind::RequestsInProgress, &labels, 1);
        Self { shared, labels }
    }
}

impl Drop for InProgressGuard {
    fn drop(&mut self) {
        self.shared
            .recorder
            .adjust_gauge(MetricKind::RequestsInProgress, &self.labels, -1);
    }
}

/// An observed request that has not been committed yet. Dropping it without calling
/// [`Observation::finish`] only releases the in-progress gauge.
pub(crate) struct Observation {
    shared: Arc<Shared>,
    context: RequestContext,
    guard: InProgressGuard,
}

impl Observation {
    pub(crate) fn new(shared: Arc<Shared>, context: RequestContext, guard: InProgressGuard) -> Self {
        Self {
            shared,
            context,
            guard,
        }
    }

    /// Commit the counter, the histogram and the request body size. The response body size
    /// is committed by the returned tracker once it is dropped.
    fn finish(self, status: StatusCode, headers: Option<&HeaderMap>) -> Option<BodySizeTracker> {
        let Self {
            shared,
            context,
            guard,
        } = self;
        let duration_seconds = context.start.elapsed().as_secs_f64();
        drop(guard);

        let config = &shared.config;
        let recorder = &shared.recorder;
        let labels = resolver::resolve(config, &context, status, headers);
        let exemplar = resolver::exemplar(config);

        recorder.increment_counter(MetricKind::RequestsTotal, &labels, 1, exemplar.as_ref());
        recorder.observe_histogram(
            MetricKind::RequestDuration,
            &labels,
            duration_seconds,
            exemplar.as_ref(),
        );
        if config.is_enabled(OptionalMetric::RequestBodySize) {
            recorder.increment_counter(
                MetricKind::RequestBodySize,
                &labels,
                context.request_body_size,
                exemplar.as_ref(),
            );
        }

        config
            .is_enabled(OptionalMetric::ResponseBodySize)
            .then(|| BodySizeTracker::new(shared.clone(), labels, exemplar))
    }
}

/// Response future for [`PrometheusMetricService`](crate::service::PrometheusMetricService).
#[pin_project(PinnedDrop)]
pub struct ResponseFuture<F> {
    #[pin]
    inner: F,
    observation: Option<Observation>,
    in_poll: bool,
}

impl<F> ResponseFuture<F> {
    pub(crate) fn passthrough(inner: F) -> Self {
        Self {
            inner,
            observation: None,
            in_poll: false,
        }
    }

    pub(crate) fn observed(inner: F, observation: Observation) -> Self {
        Self {
            inner,
            observation: Some(observation),
            in_poll: false,
        }
    }
}

impl<F, B, E> Future for ResponseFuture<F>
where
    F: Future<Output = Result<Response<B>, E>>,
{
    type Output = Result<Response<ResponseBody<B>>, E>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();

        *this.in_poll = true;
        let result = this.inner.poll(cx);
        *this.in_poll = false;
        let result = ready!(result);

        let Some(observation) = this.observation.take() else {
            return Poll::Ready(result.map(|res| res.map(ResponseBody::untracked)));
        };

        match result {
            Ok(res) => {
                let tracker = observation.finish(res.status(), Some(res.headers()));
                Poll::Ready(Ok(res.map(|body| ResponseBody::new(body, tracker))))
            }
            Err(err) => {
                // no response body, the tracker commits zero bytes right away
                drop(observation.finish(StatusCode::INTERNAL_SERVER_ERROR, None));
                Poll::Ready(Err(err))
            }
        }
    }
}

#[pinned_drop]
impl<F> PinnedDrop for ResponseFuture<F> {
    fn drop(self: Pin<&mut Self>) {
        let this = self.project();
        let Some(observation) = this.observation.take() else {
            return;
        };
        // Still flagged as polling: the inner future panicked. Otherwise the request was
        // cancelled and only the gauge is released.
        if *this.in_poll {
            drop(observation.finish(StatusCode::INTERNAL_SERVER_ERROR, None));
        }
    }
}
