#![allow(dead_code)]

use bytes::Bytes;
use frontdoor_runtime::core::{HeaderName, OriginVerify};
use http::{HeaderMap, Method, Request, Response, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use parking_lot::Mutex;
use std::{convert::Infallible, net::SocketAddr, sync::Arc};
use tokio::net::TcpListener;

pub const SECRET: &str = "aB3xQ9kZ";

pub fn init_tracing() -> tracing::subscriber::DefaultGuard {
    tracing::subscriber::set_default(
        tracing_subscriber::fmt()
            .with_test_writer()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "frontdoor=trace,debug".parse().unwrap()),
            )
            .finish(),
    )
}

pub fn verify(secret: &str) -> OriginVerify {
    OriginVerify::new(
        HeaderName::from_static("x-from-cloudfront"),
        secret.parse().unwrap(),
    )
}

/// Binds an ephemeral port on localhost.
pub async fn bind() -> (TcpListener, SocketAddr) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    (listener, addr)
}

/// Returns an address with nothing listening on it.
pub async fn closed_addr() -> SocketAddr {
    let (listener, addr) = bind().await;
    drop(listener);
    addr
}

/// Spawns `svc` on an ephemeral port, serving until `drain` is signaled.
pub async fn spawn<S, B>(name: &'static str, svc: S, drain: drain::Watch) -> SocketAddr
where
    S: tower::Service<Request<hyper::body::Incoming>, Response = Response<B>, Error = Infallible>
        + Clone
        + Send
        + 'static,
    S::Future: Send + 'static,
    B: hyper::body::Body + Send + 'static,
    B::Data: Send,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let (listener, addr) = bind().await;
    tokio::spawn(frontdoor_runtime::serve(name, listener, svc, drain));
    addr
}

/// A request as observed by the backend.
#[derive(Clone, Debug)]
pub struct Seen {
    pub method: Method,
    pub path: String,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// A backend that records every request it receives and answers 200.
#[derive(Clone, Debug, Default)]
pub struct Backend {
    seen: Arc<Mutex<Vec<Seen>>>,
}

impl Backend {
    pub fn seen(&self) -> Vec<Seen> {
        self.seen.lock().clone()
    }
}

impl tower::Service<Request<hyper::body::Incoming>> for Backend {
    type Response = Response<Full<Bytes>>;
    type Error = Infallible;
    type Future = futures::future::BoxFuture<'static, Result<Self::Response, Infallible>>;

    fn poll_ready(
        &mut self,
        _cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Infallible>> {
        std::task::Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<hyper::body::Incoming>) -> Self::Future {
        let seen = self.seen.clone();
        Box::pin(async move {
            let (parts, body) = req.into_parts();
            let body = body.collect().await.map(|b| b.to_bytes()).unwrap_or_default();
            seen.lock().push(Seen {
                method: parts.method,
                path: parts.uri.path().to_string(),
                headers: parts.headers,
                body,
            });
            Ok(Response::new(Full::new(Bytes::from_static(b"hello from backend"))))
        })
    }
}

pub struct TestClient {
    client: Client<HttpConnector, Full<Bytes>>,
    addr: SocketAddr,
}

impl TestClient {
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            client: Client::builder(TokioExecutor::new()).build_http(),
            addr,
        }
    }

    pub async fn get(&self, path: &str, headers: &[(&str, &str)]) -> (StatusCode, String) {
        self.send(Method::GET, path, headers, Bytes::new()).await
    }

    pub async fn send(
        &self,
        method: Method,
        path: &str,
        headers: &[(&str, &str)],
        body: Bytes,
    ) -> (StatusCode, String) {
        let mut req = Request::builder()
            .method(method)
            .uri(format!("http://{}{}", self.addr, path));
        for (name, value) in headers {
            req = req.header(*name, *value);
        }
        let rsp = self
            .client
            .request(req.body(Full::new(body)).unwrap())
            .await
            .expect("request must complete");
        let status = rsp.status();
        let body = rsp.into_body().collect().await.unwrap().to_bytes();
        (status, String::from_utf8_lossy(&body).into_owned())
    }
}
