use bytes::Bytes;
use frontdoor_core::listener::TargetGroupRef;
use http::{uri::Authority, Request, Uri};
use http_body_util::Empty;
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
};
use tokio::time::{self, Duration};
use tracing::{debug, info, info_span, warn, Instrument};

/// How targets in a group are probed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HealthCheck {
    pub path: String,
    pub interval: Duration,
    pub timeout: Duration,
}

/// A named set of backend addresses. Requests are spread round-robin over
/// the targets that last passed their health check.
#[derive(Clone, Debug)]
pub struct TargetGroup {
    inner: Arc<Inner>,
}

/// Target groups by name, as referenced by listener forward actions.
pub type TargetGroups = HashMap<TargetGroupRef, TargetGroup>;

#[derive(Debug)]
struct Inner {
    name: TargetGroupRef,
    targets: Vec<Target>,
    next: AtomicUsize,
    health_check: HealthCheck,
}

#[derive(Debug)]
struct Target {
    authority: Authority,
    healthy: AtomicBool,
}

type ProbeClient = Client<HttpConnector, Empty<Bytes>>;

// === impl HealthCheck ===

impl Default for HealthCheck {
    fn default() -> Self {
        Self {
            path: "/".to_string(),
            interval: Duration::from_secs(30),
            timeout: Duration::from_secs(5),
        }
    }
}

// === impl TargetGroup ===

impl TargetGroup {
    /// Targets are considered healthy until a probe fails.
    pub fn new(
        name: TargetGroupRef,
        targets: impl IntoIterator<Item = Authority>,
        health_check: HealthCheck,
    ) -> Self {
        let targets = targets
            .into_iter()
            .map(|authority| Target {
                authority,
                healthy: AtomicBool::new(true),
            })
            .collect();
        Self {
            inner: Arc::new(Inner {
                name,
                targets,
                next: AtomicUsize::new(0),
                health_check,
            }),
        }
    }

    pub fn name(&self) -> &TargetGroupRef {
        &self.inner.name
    }

    /// Picks the next healthy target, or `None` if every target is down.
    pub fn next_target(&self) -> Option<Authority> {
        let targets = &self.inner.targets;
        if targets.is_empty() {
            return None;
        }
        let start = self.inner.next.fetch_add(1, Ordering::Relaxed);
        (0..targets.len())
            .map(|i| &targets[(start + i) % targets.len()])
            .find(|t| t.healthy.load(Ordering::Acquire))
            .map(|t| t.authority.clone())
    }

    pub fn healthy_count(&self) -> usize {
        self.inner
            .targets
            .iter()
            .filter(|t| t.healthy.load(Ordering::Acquire))
            .count()
    }

    pub fn set_healthy(&self, authority: &Authority, healthy: bool) {
        for target in self.inner.targets.iter().filter(|t| &t.authority == authority) {
            let was = target.healthy.swap(healthy, Ordering::AcqRel);
            if was != healthy {
                info!(target_group = %self.inner.name, %authority, healthy, "Target health changed");
            }
        }
    }

    /// Probes every target once and records the results.
    pub async fn probe(&self) {
        let client: ProbeClient = Client::builder(TokioExecutor::new()).build_http();
        self.probe_with(&client).await;
    }

    /// Spawns a task that probes the group until `drain` is signaled.
    pub fn spawn_health_checks(&self, drain: drain::Watch) -> tokio::task::JoinHandle<()> {
        let group = self.clone();
        let span = info_span!("health", target_group = %self.inner.name);
        tokio::spawn(
            async move {
                let client: ProbeClient = Client::builder(TokioExecutor::new()).build_http();
                let mut interval = time::interval(group.inner.health_check.interval);
                interval.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
                let shutdown = drain.signaled();
                tokio::pin!(shutdown);
                loop {
                    tokio::select! {
                        _ = interval.tick() => group.probe_with(&client).await,
                        _ = &mut shutdown => return,
                    }
                }
            }
            .instrument(span),
        )
    }

    async fn probe_with(&self, client: &ProbeClient) {
        let hc = &self.inner.health_check;
        for target in &self.inner.targets {
            let healthy = match probe_uri(&target.authority, &hc.path) {
                Some(uri) => check(client, uri, hc.timeout).await,
                None => false,
            };
            self.set_healthy(&target.authority, healthy);
        }
    }
}

fn probe_uri(authority: &Authority, path: &str) -> Option<Uri> {
    Uri::builder()
        .scheme("http")
        .authority(authority.clone())
        .path_and_query(path)
        .build()
        .ok()
}

async fn check(client: &ProbeClient, uri: Uri, timeout: Duration) -> bool {
    let req = match Request::get(uri.clone()).body(Empty::new()) {
        Ok(req) => req,
        Err(error) => {
            warn!(%error, %uri, "Invalid health check request");
            return false;
        }
    };
    match time::timeout(timeout, client.request(req)).await {
        Ok(Ok(rsp)) => {
            debug!(%uri, status = %rsp.status(), "Health check");
            rsp.status().is_success()
        }
        Ok(Err(error)) => {
            debug!(%error, %uri, "Health check failed");
            false
        }
        Err(_) => {
            debug!(%uri, "Health check timed out");
            false
        }
    }
}
