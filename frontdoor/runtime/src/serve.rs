use anyhow::Result;
use http::{Request, Response};
use hyper::body::Incoming;
use hyper_util::{rt::TokioIo, service::TowerToHyperService};
use std::convert::Infallible;
use tokio::net::TcpListener;
use tracing::{debug, info, info_span, warn, Instrument};

/// Accepts HTTP/1 connections on `listener` until `drain` is signaled, then
/// stops accepting and lets in-flight connections finish.
pub async fn serve<S, B>(
    name: &'static str,
    listener: TcpListener,
    svc: S,
    drain: drain::Watch,
) -> Result<()>
where
    S: tower::Service<Request<Incoming>, Response = Response<B>, Error = Infallible>
        + Clone
        + Send
        + 'static,
    S::Future: Send + 'static,
    B: hyper::body::Body + Send + 'static,
    B::Data: Send,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let addr = listener.local_addr()?;
    info!(%addr, "{name} server listening");

    let shutdown = drain.clone().signaled();
    tokio::pin!(shutdown);

    loop {
        let (io, client) = tokio::select! {
            res = listener.accept() => match res {
                Ok(conn) => conn,
                Err(error) => {
                    warn!(%error, "Failed to accept connection");
                    continue;
                }
            },
            _ = &mut shutdown => {
                debug!(%addr, "{name} server no longer accepting connections");
                return Ok(());
            }
        };

        let svc = TowerToHyperService::new(svc.clone());
        let drain = drain.clone();
        tokio::spawn(
            async move {
                let conn = hyper::server::conn::http1::Builder::new()
                    .serve_connection(TokioIo::new(io), svc);
                tokio::pin!(conn);
                let res = tokio::select! {
                    res = &mut conn => res,
                    handle = drain.signaled() => {
                        conn.as_mut().graceful_shutdown();
                        handle.release_after(conn).await
                    }
                };
                if let Err(error) = res {
                    debug!(%error, "Connection closed");
                }
            }
            .instrument(info_span!("conn", %client)),
        );
    }
}

/// Completes when the process receives SIGINT or SIGTERM.
pub async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => info!("Received SIGINT"),
                    _ = term.recv() => info!("Received SIGTERM"),
                }
                return;
            }
            Err(error) => warn!(%error, "Failed to register SIGTERM handler"),
        }
    }

    if tokio::signal::ctrl_c().await.is_ok() {
        info!("Received SIGINT");
    }
}
