use crate::{
    forward::{self, Body, HttpClient},
    metrics::{ActionLabel, AdmissionMetrics},
    TargetGroups,
};
use frontdoor_core::listener::{Action, Listener};
use futures::future;
use http::{Request, Response, StatusCode};
use hyper::body::Incoming;
use std::{convert::Infallible, sync::Arc};
use tracing::{debug, trace, warn};

/// Admits requests according to a [`Listener`]: matched forward actions are
/// proxied to a healthy target, everything else receives the action's fixed
/// response.
#[derive(Clone, Debug)]
pub struct OriginFilter {
    listener: Arc<Listener>,
    targets: Arc<TargetGroups>,
    client: HttpClient,
    metrics: AdmissionMetrics,
}

// === impl OriginFilter ===

impl OriginFilter {
    pub fn new(
        listener: Arc<Listener>,
        targets: Arc<TargetGroups>,
        client: HttpClient,
        metrics: AdmissionMetrics,
    ) -> Self {
        Self {
            listener,
            targets,
            client,
            metrics,
        }
    }

    /// Fails if the listener forwards to a target group that isn't known.
    pub fn check_targets(&self) -> anyhow::Result<()> {
        for tg in self.listener.target_groups() {
            if !self.targets.contains_key(tg) {
                anyhow::bail!("listener forwards to unknown target group {tg}");
            }
        }
        Ok(())
    }
}

impl tower::Service<Request<Incoming>> for OriginFilter {
    type Response = Response<Body>;
    type Error = Infallible;
    type Future = future::BoxFuture<'static, Result<Response<Body>, Infallible>>;

    fn poll_ready(
        &mut self,
        _cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Infallible>> {
        std::task::Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<Incoming>) -> Self::Future {
        let verdict = self.listener.evaluate_request(&req);
        let rule = verdict.rule_name();
        trace!(method = %req.method(), uri = %req.uri(), rule, "Evaluated request");

        let target = match verdict.action {
            Action::FixedResponse(fixed) => {
                debug!(rule, status = %fixed.status, "Rejected");
                self.metrics.decision(rule, ActionLabel::FixedResponse);
                return Box::pin(future::ok(forward::fixed(fixed)));
            }
            Action::Forward(target) => target,
        };
        self.metrics.decision(rule, ActionLabel::Forward);

        let Some(group) = self.targets.get(target) else {
            warn!(rule, target_group = %target, "No such target group");
            self.metrics.unavailable(target.as_str());
            return Box::pin(future::ok(forward::status(
                StatusCode::SERVICE_UNAVAILABLE,
            )));
        };
        let Some(authority) = group.next_target() else {
            warn!(target_group = %target, "No healthy targets");
            self.metrics.unavailable(target.as_str());
            return Box::pin(future::ok(forward::status(
                StatusCode::SERVICE_UNAVAILABLE,
            )));
        };

        let target = target.clone();
        let client = self.client.clone();
        let metrics = self.metrics.clone();
        Box::pin(async move {
            debug!(target_group = %target, %authority, "Forwarding");
            match forward::proxy(&client, &authority, req).await {
                Ok(rsp) => Ok(rsp),
                Err(error) => {
                    warn!(%error, target_group = %target, %authority, "Target request failed");
                    metrics.upstream_error(target.as_str());
                    Ok(forward::status(StatusCode::BAD_GATEWAY))
                }
            }
        })
    }
}
