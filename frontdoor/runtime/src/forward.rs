use bytes::Bytes;
use frontdoor_core::listener::FixedResponse;
use http::{
    header::{self, HeaderName},
    uri::{Authority, PathAndQuery, Scheme},
    HeaderMap, HeaderValue, Request, Response, StatusCode, Uri,
};
use http_body_util::{combinators::UnsyncBoxBody, BodyExt, Full};
use hyper::body::Incoming;
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};

/// The response body type shared by the edge and origin services.
pub type Body = UnsyncBoxBody<Bytes, hyper::Error>;

pub type HttpClient = Client<HttpConnector, Incoming>;

pub fn client() -> HttpClient {
    Client::builder(TokioExecutor::new()).build_http()
}

/// Headers that describe a single connection and are never forwarded.
/// hyper re-frames bodies on the next hop, so `transfer-encoding` goes too.
const HOP_BY_HOP: [&str; 9] = [
    "connection",
    "keep-alive",
    "upgrade",
    "te",
    "proxy-connection",
    "proxy-authenticate",
    "proxy-authorization",
    "trailer",
    "transfer-encoding",
];

/// Sends `req` to `authority` over plain HTTP, leaving everything but the
/// request target and hop-by-hop headers untouched.
pub(crate) async fn proxy(
    client: &HttpClient,
    authority: &Authority,
    mut req: Request<Incoming>,
) -> Result<Response<Body>, hyper_util::client::legacy::Error> {
    *req.uri_mut() = retarget(req.uri(), authority);
    strip_connection_headers(req.headers_mut());
    let mut rsp = client.request(req).await?;
    strip_connection_headers(rsp.headers_mut());
    Ok(rsp.map(BodyExt::boxed_unsync))
}

/// Removes hop-by-hop headers, including any named by `Connection`.
fn strip_connection_headers(headers: &mut HeaderMap) {
    // A `Connection` header may list other headers that are meant only for
    // this connection.
    let named = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| name.trim().parse::<HeaderName>().ok())
        .collect::<Vec<_>>();
    for name in named {
        headers.remove(name);
    }
    for name in HOP_BY_HOP {
        headers.remove(name);
    }
}

fn retarget(uri: &Uri, authority: &Authority) -> Uri {
    let path = uri
        .path_and_query()
        .cloned()
        .unwrap_or_else(|| PathAndQuery::from_static("/"));
    let mut parts = http::uri::Parts::default();
    parts.scheme = Some(Scheme::HTTP);
    parts.authority = Some(authority.clone());
    parts.path_and_query = Some(path);
    // Scheme, authority, and path are all set, so the parts are valid.
    Uri::from_parts(parts).unwrap_or_else(|_| uri.clone())
}

pub(crate) fn status(status: StatusCode) -> Response<Body> {
    let mut rsp = Response::new(empty());
    *rsp.status_mut() = status;
    rsp
}

pub(crate) fn fixed(fixed: &FixedResponse) -> Response<Body> {
    let body = match &fixed.body {
        Some(body) => Full::new(Bytes::from(body.clone()))
            .map_err(|never| match never {})
            .boxed_unsync(),
        None => empty(),
    };
    let mut rsp = Response::new(body);
    *rsp.status_mut() = fixed.status;
    if let Some(ct) = fixed
        .content_type
        .as_deref()
        .and_then(|ct| HeaderValue::from_str(ct).ok())
    {
        rsp.headers_mut().insert(header::CONTENT_TYPE, ct);
    }
    rsp
}

fn empty() -> Body {
    http_body_util::Empty::<Bytes>::new()
        .map_err(|never| match never {})
        .boxed_unsync()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retarget_keeps_path_and_query() {
        let authority = Authority::from_static("10.0.0.1:8080");
        let uri = retarget(&"/a/b?c=d".parse().unwrap(), &authority);
        assert_eq!(uri, "http://10.0.0.1:8080/a/b?c=d");

        let uri = retarget(&"http://edge.example.com".parse().unwrap(), &authority);
        assert_eq!(uri, "http://10.0.0.1:8080/");
    }

    #[test]
    fn strips_hop_by_hop_headers() {
        let mut headers = HeaderMap::new();
        headers.append(header::CONNECTION, HeaderValue::from_static("keep-alive, X-Debug"));
        headers.append(header::CONNECTION, HeaderValue::from_static("x-session"));
        headers.insert("keep-alive", HeaderValue::from_static("timeout=5"));
        headers.insert("x-debug", HeaderValue::from_static("1"));
        headers.insert("x-session", HeaderValue::from_static("abc"));
        headers.insert(header::UPGRADE, HeaderValue::from_static("websocket"));
        headers.insert(header::TE, HeaderValue::from_static("trailers"));
        headers.insert("proxy-connection", HeaderValue::from_static("keep-alive"));
        headers.insert(header::PROXY_AUTHORIZATION, HeaderValue::from_static("Basic Zm9v"));
        headers.insert(header::PROXY_AUTHENTICATE, HeaderValue::from_static("Basic"));
        headers.insert(header::TRAILER, HeaderValue::from_static("x-checksum"));
        headers.insert(header::TRANSFER_ENCODING, HeaderValue::from_static("chunked"));
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/plain"));
        headers.insert("x-from-cloudfront", HeaderValue::from_static("aB3xQ9kZ"));
        headers.insert("x-trace", HeaderValue::from_static("t1"));

        strip_connection_headers(&mut headers);

        let mut left = headers.keys().map(|k| k.as_str()).collect::<Vec<_>>();
        left.sort_unstable();
        assert_eq!(left, ["content-type", "x-from-cloudfront", "x-trace"]);
        assert_eq!(headers["x-from-cloudfront"], "aB3xQ9kZ");
    }

    #[test]
    fn fixed_response_sets_content_type() {
        let rsp = fixed(&FixedResponse {
            status: StatusCode::FORBIDDEN,
            content_type: Some("text/plain".to_string()),
            body: Some("denied".to_string()),
        });
        assert_eq!(rsp.status(), StatusCode::FORBIDDEN);
        assert_eq!(rsp.headers()[header::CONTENT_TYPE], "text/plain");
    }
}
