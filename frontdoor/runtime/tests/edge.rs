mod support;

use frontdoor_runtime::{
    core::listener::{Listener, TargetGroupRef},
    AdmissionMetrics, EdgeGate, EdgeMetrics, HealthCheck, OriginFilter, TargetGroup,
};
use http::{uri::Authority, StatusCode};
use maplit::hashmap;
use std::{net::SocketAddr, sync::Arc};
use support::{Backend, TestClient, SECRET};

fn authority(addr: SocketAddr) -> Authority {
    addr.to_string().parse().unwrap()
}

async fn edge(secret: &str, origin: SocketAddr, drain: drain::Watch) -> SocketAddr {
    let svc = EdgeGate::new(
        Arc::new(support::verify(secret)),
        authority(origin),
        frontdoor_runtime::client(),
        EdgeMetrics::default(),
    );
    support::spawn("edge", svc, drain).await
}

/// Runs a backend behind an origin gated on [`SECRET`].
async fn origin(drain: drain::Watch) -> (Backend, SocketAddr) {
    let backend = Backend::default();
    let backend_addr = support::spawn("backend", backend.clone(), drain.clone()).await;
    let group = TargetGroup::new(
        TargetGroupRef::new("backend"),
        Some(authority(backend_addr)),
        HealthCheck::default(),
    );
    let svc = OriginFilter::new(
        Arc::new(Listener::origin_gate(
            &support::verify(SECRET),
            "backend".into(),
        )),
        Arc::new(hashmap! { TargetGroupRef::new("backend") => group }),
        frontdoor_runtime::client(),
        AdmissionMetrics::default(),
    );
    let addr = support::spawn("origin", svc, drain).await;
    (backend, addr)
}

#[tokio::test(flavor = "current_thread")]
async fn edge_reaches_backend_through_origin() {
    let _trace = support::init_tracing();
    let (_signal, drain) = drain::channel();

    let (backend, origin_addr) = origin(drain.clone()).await;
    let edge_addr = edge(SECRET, origin_addr, drain).await;

    let (status, body) = TestClient::new(edge_addr).get("/", &[]).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "hello from backend");

    // Bypassing the edge is refused.
    let (status, _) = TestClient::new(origin_addr).get("/", &[]).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    assert_eq!(backend.seen().len(), 1);
}

#[tokio::test(flavor = "current_thread")]
async fn forged_headers_are_replaced() {
    let _trace = support::init_tracing();
    let (_signal, drain) = drain::channel();

    let (backend, origin_addr) = origin(drain.clone()).await;
    let edge_addr = edge(SECRET, origin_addr, drain).await;

    let (status, _) = TestClient::new(edge_addr)
        .get(
            "/",
            &[("X-From-CloudFront", "forged"), ("X-From-CloudFront", "other")],
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let seen = backend.seen();
    assert_eq!(seen.len(), 1);
    let values = seen[0]
        .headers
        .get_all("x-from-cloudfront")
        .iter()
        .collect::<Vec<_>>();
    assert_eq!(values, vec![SECRET]);
}

#[tokio::test(flavor = "current_thread")]
async fn mismatched_secret_is_forbidden() {
    let _trace = support::init_tracing();
    let (_signal, drain) = drain::channel();

    let (backend, origin_addr) = origin(drain.clone()).await;
    let edge_addr = edge("zZ9Qx3Ba", origin_addr, drain).await;

    let (status, _) = TestClient::new(edge_addr).get("/", &[]).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert!(backend.seen().is_empty());
}

#[tokio::test(flavor = "current_thread")]
async fn unreachable_origin_is_bad_gateway() {
    let _trace = support::init_tracing();
    let (_signal, drain) = drain::channel();

    let edge_addr = edge(SECRET, support::closed_addr().await, drain).await;
    let (status, _) = TestClient::new(edge_addr).get("/", &[]).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
}
