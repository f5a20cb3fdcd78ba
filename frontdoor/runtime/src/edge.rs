use crate::{
    forward::{self, Body, HttpClient},
    EdgeMetrics,
};
use frontdoor_core::OriginVerify;
use futures::future;
use http::{uri::Authority, Request, Response, StatusCode};
use hyper::body::Incoming;
use std::{convert::Infallible, sync::Arc};
use tracing::{debug, warn};

/// Forwards every request to the origin with the verification header set to
/// the shared secret.
#[derive(Clone, Debug)]
pub struct EdgeGate {
    verify: Arc<OriginVerify>,
    origin: Authority,
    client: HttpClient,
    metrics: EdgeMetrics,
}

// === impl EdgeGate ===

impl EdgeGate {
    pub fn new(
        verify: Arc<OriginVerify>,
        origin: Authority,
        client: HttpClient,
        metrics: EdgeMetrics,
    ) -> Self {
        Self {
            verify,
            origin,
            client,
            metrics,
        }
    }
}

impl tower::Service<Request<Incoming>> for EdgeGate {
    type Response = Response<Body>;
    type Error = Infallible;
    type Future = future::BoxFuture<'static, Result<Response<Body>, Infallible>>;

    fn poll_ready(
        &mut self,
        _cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Infallible>> {
        std::task::Poll::Ready(Ok(()))
    }

    fn call(&mut self, mut req: Request<Incoming>) -> Self::Future {
        if req.headers().contains_key(self.verify.header_name()) {
            debug!(header = %self.verify.header_name(), "Replacing client-supplied header");
        }
        self.verify.stamp(req.headers_mut());

        let origin = self.origin.clone();
        let client = self.client.clone();
        let metrics = self.metrics.clone();
        Box::pin(async move {
            metrics.forwarded();
            match forward::proxy(&client, &origin, req).await {
                Ok(rsp) => Ok(rsp),
                Err(error) => {
                    warn!(%error, %origin, "Origin request failed");
                    metrics.upstream_error();
                    Ok(forward::status(StatusCode::BAD_GATEWAY))
                }
            }
        })
    }
}
