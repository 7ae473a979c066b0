use std::{
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};

use bytes::Buf;
use futures_core::ready;
use http_body::{Body, Frame, SizeHint};
use pin_project::pin_project;

use crate::{labels::LabelSet, layer::Shared, recorder::MetricKind};

/// Counts the response body bytes streamed to the client, and commits the count to the response
/// body size counter when dropped.
pub(crate) struct BodySizeTracker {
    shared: Arc<Shared>,
    labels: LabelSet,
    exemplar: Option<LabelSet>,
    bytes: u64,
}

impl BodySizeTracker {
    pub(crate) fn new(shared: Arc<Shared>, labels: LabelSet, exemplar: Option<LabelSet>) -> Self {
        Self {
            shared,
            labels,
            exemplar,
            bytes: 0,
        }
    }
}

impl Drop for BodySizeTracker {
    fn drop(&mut self) {
        self.shared.recorder.increment_counter(
            MetricKind::ResponseBodySize,
            &self.labels,
            self.bytes,
            self.exemplar.as_ref(),
        );
    }
}

/// Response body for [`PrometheusMetricService`](crate::service::PrometheusMetricService).
#[pin_project]
pub struct ResponseBody<B> {
    #[pin]
    inner: B,
    tracker: Option<BodySizeTracker>,
}

impl<B> ResponseBody<B> {
    pub(crate) fn new(inner: B, tracker: Option<BodySizeTracker>) -> Self {
        Self { inner, tracker }
    }

    pub(crate) fn untracked(inner: B) -> Self {
        Self::new(inner, None)
    }
}

impl<B: Body> Body for ResponseBody<B> {
    type Data = B::Data;
    type Error = B::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.project();
        let frame = ready!(this.inner.poll_frame(cx));

        match &frame {
            Some(Ok(frame)) => {
                if let (Some(tracker), Some(data)) = (this.tracker.as_mut(), frame.data_ref()) {
                    tracker.bytes += data.remaining() as u64;
                }
            }
            // end of stream or a failed body, commit what was sent so far
            Some(Err(_)) | None => drop(this.tracker.take()),
        }

        Poll::Ready(frame)
    }

    #[inline]
    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    #[inline]
    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}
