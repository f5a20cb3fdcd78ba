use bytes::Bytes;
use futures::future;
use http::{header, Method, Request, Response, StatusCode};
use http_body_util::Full;
use prometheus_client::registry::Registry;
use std::{convert::Infallible, sync::Arc};
use tokio::sync::watch;
use tracing::warn;

/// Serves `/ready` and `/metrics`.
#[derive(Clone, Debug)]
pub struct Admin {
    ready: watch::Receiver<bool>,
    registry: Arc<Registry>,
}

type Body = Full<Bytes>;

// === impl Admin ===

impl Admin {
    pub fn new(ready: watch::Receiver<bool>, registry: Arc<Registry>) -> Self {
        Self { ready, registry }
    }

    fn handle_ready(&self, method: &Method) -> Response<Body> {
        match *method {
            Method::GET | Method::HEAD => {
                if *self.ready.borrow() {
                    text(StatusCode::OK, "ready\n")
                } else {
                    text(StatusCode::INTERNAL_SERVER_ERROR, "not ready\n")
                }
            }
            _ => empty(StatusCode::METHOD_NOT_ALLOWED),
        }
    }

    fn handle_metrics(&self, method: &Method) -> Response<Body> {
        if !matches!(*method, Method::GET | Method::HEAD) {
            return empty(StatusCode::METHOD_NOT_ALLOWED);
        }

        let mut buf = String::new();
        if let Err(error) = prometheus_client::encoding::text::encode(&mut buf, &self.registry) {
            warn!(%error, "Failed to encode metrics");
            return empty(StatusCode::INTERNAL_SERVER_ERROR);
        }
        let mut rsp = Response::new(Body::from(buf));
        rsp.headers_mut().insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static(
                "application/openmetrics-text; version=1.0.0; charset=utf-8",
            ),
        );
        rsp
    }
}

impl<B> tower::Service<Request<B>> for Admin {
    type Response = Response<Body>;
    type Error = Infallible;
    type Future = future::Ready<Result<Response<Body>, Infallible>>;

    fn poll_ready(
        &mut self,
        _cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Infallible>> {
        std::task::Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<B>) -> Self::Future {
        let rsp = match req.uri().path() {
            "/ready" => self.handle_ready(req.method()),
            "/metrics" => self.handle_metrics(req.method()),
            _ => empty(StatusCode::NOT_FOUND),
        };
        future::ok(rsp)
    }
}

fn text(status: StatusCode, body: &'static str) -> Response<Body> {
    let mut rsp = Response::new(Body::from(body));
    *rsp.status_mut() = status;
    rsp.headers_mut().insert(
        header::CONTENT_TYPE,
        header::HeaderValue::from_static("text/plain"),
    );
    rsp
}

fn empty(status: StatusCode) -> Response<Body> {
    let mut rsp = Response::new(Body::default());
    *rsp.status_mut() = status;
    rsp
}
