mod common;
use common::{body_string, get, MemoryRecorder};

use std::{sync::Arc, time::Duration};

use axum::{
    body::Body,
    extract::Path,
    routing::{get as get_route, post},
    Router,
};
use axum_exporter::{
    labels::{from_header, from_response_header, LabelSet, LabelValue},
    MetricKind, MetricLayerBuilder, OptionalMetric, PrometheusMetricLayer,
};
use bytes::Bytes;
use http::{header::CONTENT_LENGTH, Request, Response, StatusCode};
use http_body_util::Full;
use tokio::sync::Barrier;
use tower::{BoxError, ServiceBuilder, ServiceExt};

fn app(layer: PrometheusMetricLayer) -> Router {
    Router::new()
        .route("/", get_route(|| async { "hello world" }))
        .route(
            "/items/:id",
            get_route(|Path(id): Path<String>| async move { id }),
        )
        .route(
            "/error",
            get_route(|| async { StatusCode::INTERNAL_SERVER_ERROR }),
        )
        .route("/panic", get_route(panicking_handler))
        .route(
            "/slow",
            get_route(|| async {
                tokio::time::sleep(Duration::from_secs(1)).await;
                "slow"
            }),
        )
        .route(
            "/cached",
            get_route(|| async { ([("x-cache", "HIT")], "cached") }),
        )
        .route(
            "/upload",
            post(|body: String| async move { body.len().to_string() }),
        )
        .layer(layer)
}

async fn panicking_handler() -> &'static str {
    panic!("handler panicked")
}

fn build(builder: MetricLayerBuilder, recorder: &MemoryRecorder) -> Router {
    let recorder = recorder.clone();
    app(builder.build_with_recorder(|_| recorder).unwrap())
}

fn core_labels<'a>(method: &'a str, path: &'a str, status: &'a str) -> [(&'a str, &'a str); 4] {
    [
        ("method", method),
        ("path", path),
        ("status_code", status),
        ("app_name", "starlette"),
    ]
}

#[tokio::test]
async fn records_the_matched_route() {
    let recorder = MemoryRecorder::default();
    let app = build(MetricLayerBuilder::new(), &recorder);

    for _ in 0..2 {
        let res = app.clone().oneshot(get("/items/42")).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(body_string(res.into_body()).await, "42");
    }

    assert_eq!(
        recorder.counter(
            MetricKind::RequestsTotal,
            &core_labels("GET", "/items/:id", "200")
        ),
        2
    );
    assert_eq!(recorder.observations().len(), 2);
    assert_eq!(recorder.in_progress(), 0);
    assert_eq!(recorder.in_progress_peak(), 1);

    let gauge_labels: LabelSet = [("method", "GET"), ("app_name", "starlette")]
        .into_iter()
        .collect();
    assert_eq!(recorder.in_progress_labels(), vec![gauge_labels]);
}

#[tokio::test]
async fn records_server_errors() {
    let recorder = MemoryRecorder::default();
    let app = build(MetricLayerBuilder::new(), &recorder);

    let res = app.oneshot(get("/error")).await.unwrap();
    assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(
        recorder.counter(
            MetricKind::RequestsTotal,
            &core_labels("GET", "/error", "500")
        ),
        1
    );
}

#[tokio::test]
async fn unmatched_paths_are_filtered_by_default() {
    let recorder = MemoryRecorder::default();
    let app = build(MetricLayerBuilder::new(), &recorder);

    let res = app.oneshot(get("/nope")).await.unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
    assert_eq!(recorder.counter_total(MetricKind::RequestsTotal), 0);
    assert_eq!(recorder.in_progress_peak(), 0);
    assert!(recorder.observations().is_empty());
}

#[tokio::test]
async fn unmatched_paths_can_be_reported() {
    let recorder = MemoryRecorder::default();
    let app = build(
        MetricLayerBuilder::new().with_filter_unhandled_paths(false),
        &recorder,
    );
    app.oneshot(get("/nope")).await.unwrap();
    assert_eq!(
        recorder.counter(
            MetricKind::RequestsTotal,
            &core_labels("GET", "/nope", "404")
        ),
        1
    );

    let recorder = MemoryRecorder::default();
    let app = build(
        MetricLayerBuilder::new().with_group_unhandled_paths(true),
        &recorder,
    );
    app.clone().oneshot(get("/nope")).await.unwrap();
    app.oneshot(get("/also/missing")).await.unwrap();
    assert_eq!(
        recorder.counter(
            MetricKind::RequestsTotal,
            &core_labels("GET", "__unknown__", "404")
        ),
        2
    );
}

#[tokio::test]
async fn raw_paths_without_grouping() {
    let recorder = MemoryRecorder::default();
    let app = build(MetricLayerBuilder::new().with_group_paths(false), &recorder);

    app.clone().oneshot(get("/items/1")).await.unwrap();
    app.oneshot(get("/items/2")).await.unwrap();
    assert_eq!(
        recorder.counter(
            MetricKind::RequestsTotal,
            &core_labels("GET", "/items/1", "200")
        ),
        1
    );
    assert_eq!(
        recorder.counter(
            MetricKind::RequestsTotal,
            &core_labels("GET", "/items/2", "200")
        ),
        1
    );
}

#[tokio::test]
async fn skipped_requests_are_not_recorded() {
    let recorder = MemoryRecorder::default();
    let app = build(
        MetricLayerBuilder::new()
            .with_skip_paths(["/"])
            .with_skip_patterns(["/items/.*"])
            .with_skip_methods(["post"]),
        &recorder,
    );

    let res = app.clone().oneshot(get("/")).await.unwrap();
    assert_eq!(body_string(res.into_body()).await, "hello world");
    app.clone().oneshot(get("/items/7")).await.unwrap();
    let res = app
        .clone()
        .oneshot(Request::post("/upload").body(Body::from("abc")).unwrap())
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    assert_eq!(recorder.counter_total(MetricKind::RequestsTotal), 0);
    assert_eq!(recorder.in_progress_peak(), 0);

    app.oneshot(get("/error")).await.unwrap();
    assert_eq!(recorder.counter_total(MetricKind::RequestsTotal), 1);
}

#[tokio::test]
async fn panic_releases_the_gauge_and_records_a_server_error() {
    let recorder = MemoryRecorder::default();
    let app = build(MetricLayerBuilder::new(), &recorder);

    let Err(err) = tokio::spawn(app.oneshot(get("/panic"))).await else {
        panic!("the handler should have panicked");
    };
    assert!(err.is_panic());

    assert_eq!(recorder.in_progress(), 0);
    assert_eq!(
        recorder.counter(
            MetricKind::RequestsTotal,
            &core_labels("GET", "/panic", "500")
        ),
        1
    );
}

#[tokio::test(start_paused = true)]
async fn cancellation_only_releases_the_gauge() {
    let recorder = MemoryRecorder::default();
    let app = build(MetricLayerBuilder::new(), &recorder);

    let res = tokio::time::timeout(Duration::from_millis(10), app.oneshot(get("/slow"))).await;
    assert!(res.is_err());

    assert_eq!(recorder.in_progress_peak(), 1);
    assert_eq!(recorder.in_progress(), 0);
    assert_eq!(recorder.counter_total(MetricKind::RequestsTotal), 0);
    assert!(recorder.observations().is_empty());
}

#[tokio::test]
async fn failing_label_function_does_not_affect_the_request() {
    let recorder = MemoryRecorder::default();
    let app = build(
        MetricLayerBuilder::new().with_label(
            "tenant",
            LabelValue::try_computed(|_| Err::<String, _>("no tenant")),
        ),
        &recorder,
    );

    let res = app.oneshot(get("/")).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(body_string(res.into_body()).await, "hello world");

    let [method, path, status, app_name] = core_labels("GET", "/", "200");
    assert_eq!(
        recorder.counter(
            MetricKind::RequestsTotal,
            &[method, path, status, app_name, ("tenant", "")]
        ),
        1
    );
}

#[tokio::test]
async fn panicking_callbacks_do_not_affect_the_request() {
    let recorder = MemoryRecorder::default();
    let app = build(
        MetricLayerBuilder::new()
            .with_label(
                "tenant",
                LabelValue::computed(|parts| {
                    parts.headers["x-tenant"].to_str().unwrap().to_owned()
                }),
            )
            .with_exemplar("trace_id", || -> String { panic!("no active trace") }),
        &recorder,
    );

    let res = app.oneshot(get("/")).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(body_string(res.into_body()).await, "hello world");

    let [method, path, status, app_name] = core_labels("GET", "/", "200");
    assert_eq!(
        recorder.counter(
            MetricKind::RequestsTotal,
            &[method, path, status, app_name, ("tenant", "")]
        ),
        1
    );
    assert_eq!(recorder.observations().len(), 1);
    assert!(recorder.exemplars().is_empty());
    assert_eq!(recorder.in_progress(), 0);
}

#[tokio::test]
async fn request_and_response_header_labels() {
    let recorder = MemoryRecorder::default();
    let app = build(
        MetricLayerBuilder::new()
            .with_label("tenant", from_header("x-tenant", Some(&["acme"])))
            .with_label(
                "cache",
                from_response_header("x-cache", Some(&["HIT", "MISS"]), "UNKNOWN"),
            ),
        &recorder,
    );

    let req = Request::get("/cached")
        .header("x-tenant", "acme")
        .body(Body::empty())
        .unwrap();
    app.clone().oneshot(req).await.unwrap();
    app.oneshot(get("/")).await.unwrap();

    let [method, path, status, app_name] = core_labels("GET", "/cached", "200");
    assert_eq!(
        recorder.counter(
            MetricKind::RequestsTotal,
            &[method, path, status, app_name, ("tenant", "acme"), ("cache", "HIT")]
        ),
        1
    );
    let [method, path, status, app_name] = core_labels("GET", "/", "200");
    assert_eq!(
        recorder.counter(
            MetricKind::RequestsTotal,
            &[method, path, status, app_name, ("tenant", ""), ("cache", "UNKNOWN")]
        ),
        1
    );

    for labels in recorder.in_progress_labels() {
        assert_eq!(
            labels.names().collect::<Vec<_>>(),
            ["method", "app_name", "tenant"]
        );
    }
}

#[tokio::test]
async fn body_size_counters() {
    let recorder = MemoryRecorder::default();
    let app = build(
        MetricLayerBuilder::new().with_optional_metrics([
            OptionalMetric::ResponseBodySize,
            OptionalMetric::RequestBodySize,
        ]),
        &recorder,
    );

    let req = Request::post("/upload")
        .header(CONTENT_LENGTH, "3")
        .body(Body::from("abc"))
        .unwrap();
    let res = app.clone().oneshot(req).await.unwrap();
    assert_eq!(body_string(res.into_body()).await, "3");

    let res = app.oneshot(get("/")).await.unwrap();
    assert_eq!(body_string(res.into_body()).await, "hello world");

    let upload = core_labels("POST", "/upload", "200");
    assert_eq!(recorder.counter(MetricKind::RequestBodySize, &upload), 3);
    assert_eq!(recorder.counter(MetricKind::ResponseBodySize, &upload), 1);

    let index = core_labels("GET", "/", "200");
    assert_eq!(recorder.counter(MetricKind::RequestBodySize, &index), 0);
    assert_eq!(recorder.counter(MetricKind::ResponseBodySize, &index), 11);
}

#[tokio::test]
async fn every_family_shares_the_label_set_of_a_request() {
    let recorder = MemoryRecorder::default();
    let app = build(
        MetricLayerBuilder::new()
            .with_label("service", "shop")
            .with_label("tenant", from_header("x-tenant", None))
            .with_label("cache", from_response_header("x-cache", None, "UNKNOWN"))
            .with_optional_metrics([
                OptionalMetric::ResponseBodySize,
                OptionalMetric::RequestBodySize,
            ]),
        &recorder,
    );

    let req = Request::get("/cached")
        .header("x-tenant", "acme")
        .body(Body::empty())
        .unwrap();
    let res = app.oneshot(req).await.unwrap();
    assert_eq!(body_string(res.into_body()).await, "cached");

    let [method, path, status, app_name] = core_labels("GET", "/cached", "200");
    let expected: LabelSet = [
        method,
        path,
        status,
        app_name,
        ("service", "shop"),
        ("tenant", "acme"),
        ("cache", "HIT"),
    ]
    .into_iter()
    .collect();

    assert_eq!(recorder.counter_labels(MetricKind::RequestsTotal), vec![expected.clone()]);
    assert_eq!(
        recorder.histogram_labels(MetricKind::RequestDuration),
        vec![expected.clone()]
    );
    assert_eq!(
        recorder.counter_labels(MetricKind::ResponseBodySize),
        vec![expected.clone()]
    );
    assert_eq!(recorder.counter_labels(MetricKind::RequestBodySize), vec![expected]);
}

#[tokio::test]
async fn body_size_counters_are_off_by_default() {
    let recorder = MemoryRecorder::default();
    let app = build(MetricLayerBuilder::new(), &recorder);

    let res = app.oneshot(get("/")).await.unwrap();
    body_string(res.into_body()).await;

    assert_eq!(recorder.counter_total(MetricKind::ResponseBodySize), 0);
    assert!(recorder.counter_labels(MetricKind::ResponseBodySize).is_empty());
    assert!(recorder.counter_labels(MetricKind::RequestBodySize).is_empty());
}

#[tokio::test]
async fn exemplars_are_attached_to_observations() {
    let recorder = MemoryRecorder::default();
    let app = build(
        MetricLayerBuilder::new()
            .with_exemplar("trace_id", || "abc123")
            .with_exemplar("span_id", String::new),
        &recorder,
    );

    app.oneshot(get("/")).await.unwrap();

    let exemplar: LabelSet = [("trace_id", "abc123")].into_iter().collect();
    assert_eq!(recorder.exemplars(), vec![exemplar]);
}

#[tokio::test]
async fn concurrent_requests_are_all_in_progress() {
    const REQUESTS: usize = 8;

    let recorder = MemoryRecorder::default();
    let entered = Arc::new(Barrier::new(REQUESTS + 1));
    let release = Arc::new(Barrier::new(REQUESTS + 1));

    let layer = {
        let recorder = recorder.clone();
        MetricLayerBuilder::new()
            .build_with_recorder(|_| recorder)
            .unwrap()
    };
    let app = Router::new()
        .route(
            "/wait",
            get_route({
                let (entered, release) = (entered.clone(), release.clone());
                move || async move {
                    entered.wait().await;
                    release.wait().await;
                    "done"
                }
            }),
        )
        .layer(layer);

    let tasks: Vec<_> = (0..REQUESTS)
        .map(|_| tokio::spawn(app.clone().oneshot(get("/wait"))))
        .collect();

    entered.wait().await;
    assert_eq!(recorder.in_progress(), REQUESTS as i64);
    release.wait().await;

    for task in tasks {
        let res = task.await.unwrap().unwrap();
        assert_eq!(res.status(), StatusCode::OK);
    }
    assert_eq!(recorder.in_progress(), 0);
    assert_eq!(recorder.in_progress_peak(), REQUESTS as i64);
    assert_eq!(
        recorder.counter(
            MetricKind::RequestsTotal,
            &core_labels("GET", "/wait", "200")
        ),
        REQUESTS as u64
    );
}

#[tokio::test]
async fn service_errors_are_recorded_as_server_errors() {
    let recorder = MemoryRecorder::default();
    let layer = {
        let recorder = recorder.clone();
        MetricLayerBuilder::new()
            .with_route_patterns(["/items/:id"])
            .build_with_recorder(|_| recorder)
            .unwrap()
    };
    let service = ServiceBuilder::new()
        .layer(layer)
        .service_fn(|_req: Request<Full<Bytes>>| async {
            Err::<Response<Full<Bytes>>, BoxError>("backend unavailable".into())
        });

    let req = Request::get("/items/7").body(Full::default()).unwrap();
    let Err(err) = service.clone().oneshot(req).await else {
        panic!("expected the inner error");
    };
    assert_eq!(err.to_string(), "backend unavailable");
    assert_eq!(
        recorder.counter(
            MetricKind::RequestsTotal,
            &core_labels("GET", "/items/:id", "500")
        ),
        1
    );
    assert_eq!(recorder.in_progress(), 0);

    // no route pattern matches, so the request is filtered
    let req = Request::get("/other").body(Full::default()).unwrap();
    assert!(service.oneshot(req).await.is_err());
    assert_eq!(recorder.counter_total(MetricKind::RequestsTotal), 1);
}
