use std::{
    sync::Arc,
    task::{Context, Poll},
};

use http::{header::CONTENT_LENGTH, request::Parts, Request, Response};
use http_body::Body;
use tokio::time::Instant;
use tower::Service;

use crate::{
    body::ResponseBody,
    future::{InProgressGuard, Observation, ResponseFuture},
    layer::Shared,
    resolver::{self, RequestContext},
    utils::method_label,
};

/// The service produced by [`PrometheusMetricLayer`](crate::PrometheusMetricLayer).
#[derive(Clone)]
pub struct PrometheusMetricService<S> {
    inner: S,
    shared: Arc<Shared>,
}

impl<S> PrometheusMetricService<S> {
    pub(crate) fn new(inner: S, shared: Arc<Shared>) -> Self {
        Self { inner, shared }
    }
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for PrometheusMetricService<S>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>>,
    ReqBody: Body,
{
    type Response = Response<ResponseBody<ResBody>>;
    type Error = S::Error;
    type Future = ResponseFuture<S::Future>;

    #[inline]
    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request<ReqBody>) -> Self::Future {
        let config = &self.shared.config;
        let method = method_label(request.method());

        if config.should_skip(&method, request.uri().path()) {
            tracing::trace!(%method, path = request.uri().path(), "skipping request");
            return ResponseFuture::passthrough(self.inner.call(request));
        }

        let (parts, body) = request.into_parts();
        let route = resolver::route_template(config, &parts);
        if resolver::is_filtered(config, route.as_deref()) {
            tracing::trace!(%method, path = parts.uri.path(), "ignoring unhandled path");
            return ResponseFuture::passthrough(self.inner.call(Request::from_parts(parts, body)));
        }

        let request_body_size = request_body_size(&parts, &body);
        let label_values = resolver::request_label_values(config, &parts);
        let mut context = RequestContext {
            start: Instant::now(),
            method,
            path: parts.uri.path().to_owned(),
            route,
            label_values,
            request_body_size,
        };
        let guard = InProgressGuard::acquire(
            self.shared.clone(),
            resolver::in_progress_labels(config, &context),
        );

        context.start = Instant::now();
        let inner = self.inner.call(Request::from_parts(parts, body));
        ResponseFuture::observed(inner, Observation::new(self.shared.clone(), context, guard))
    }
}

/// The declared `Content-Length`, falling back to the exact size of the body when it is known.
fn request_body_size<B: Body>(parts: &Parts, body: &B) -> u64 {
    parts
        .headers
        .get(CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse().ok())
        .or_else(|| body.size_hint().exact())
        .unwrap_or(0)
}
