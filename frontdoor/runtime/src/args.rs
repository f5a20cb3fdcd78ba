use crate::{
    pipeline::{CommandDeploy, LocalObjectStore, Pipeline, Poller, ShellBuild},
    secret, serve, shutdown_signal, Admin, AdmissionMetrics, EdgeGate, EdgeMetrics, HealthCheck,
    OriginFilter, PipelineMetrics, TargetGroup, TargetGroups,
};
use anyhow::{bail, Context, Result};
use clap::{Args as ClapArgs, Parser, Subcommand};
use frontdoor_core::{
    listener::{spec::ListenerSpec, Listener, TargetGroupRef},
    pipeline::{BuildContext, BuildSpec, RunId, RunOutcome, Stage, TriggerEvent, TriggerKind},
    HeaderName, OriginVerify, SharedSecret, DEFAULT_SECRET_LENGTH,
};
use http::uri::Authority;
use prometheus_client::registry::Registry;
use std::{collections::HashMap, net::SocketAddr, path::PathBuf, sync::Arc};
use tokio::{
    net::TcpListener,
    sync::{mpsc, watch},
    task::JoinHandle,
    time::Duration,
};
use tracing::{info, info_span, Instrument};

// Triggers are processed one at a time; a few may queue behind a long run.
const TRIGGER_QUEUE_SIZE: usize = 16;

#[derive(Debug, Parser)]
#[clap(name = "frontdoor", about = "An edge-gated origin and its delivery pipeline", version)]
pub struct Args {
    #[clap(long, default_value = "frontdoor=info,warn", env = "FRONTDOOR_LOG")]
    log_level: kubert::LogFilter,

    #[clap(long, default_value = "plain", env = "FRONTDOOR_LOG_FORMAT")]
    log_format: kubert::LogFormat,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Manages the shared secret
    Secret {
        #[clap(subcommand)]
        command: SecretCommand,
    },

    /// Runs the edge gate, which stamps the secret onto requests it forwards
    /// to the origin
    Edge(EdgeArgs),

    /// Runs the origin listener, which only forwards requests that carry the
    /// secret
    Origin(OriginArgs),

    /// Runs the source, build, and deploy pipeline
    Pipeline {
        #[clap(subcommand)]
        command: PipelineCommand,
    },

    /// Prints the stack's resource graph as JSON
    Synth(SynthArgs),
}

#[derive(Debug, Subcommand)]
enum SecretCommand {
    /// Generates a new secret and writes it to a file, or to stdout
    Generate {
        #[clap(long, default_value_t = DEFAULT_SECRET_LENGTH)]
        length: usize,

        #[clap(long, short = 'o')]
        out: Option<PathBuf>,

        /// Replaces an existing secret file
        #[clap(long)]
        force: bool,
    },
}

#[derive(Debug, ClapArgs)]
struct GateArgs {
    #[clap(long, env = "FRONTDOOR_SECRET_FILE")]
    secret_file: PathBuf,

    #[clap(long, env = "FRONTDOOR_HEADER_NAME", default_value = frontdoor_core::DEFAULT_ORIGIN_HEADER)]
    header_name: HeaderName,

    #[clap(long, env = "FRONTDOOR_ADMIN_ADDR", default_value = "0.0.0.0:9990")]
    admin_addr: SocketAddr,
}

#[derive(Debug, ClapArgs)]
struct EdgeArgs {
    #[clap(long, env = "FRONTDOOR_EDGE_ADDR", default_value = "0.0.0.0:8000")]
    addr: SocketAddr,

    /// The origin's `host:port`
    #[clap(long, env = "FRONTDOOR_ORIGIN")]
    origin: Authority,

    #[clap(flatten)]
    gate: GateArgs,
}

#[derive(Debug, ClapArgs)]
struct OriginArgs {
    #[clap(long, env = "FRONTDOOR_ORIGIN_ADDR", default_value = "0.0.0.0:8080")]
    addr: SocketAddr,

    /// The target group the gating rule forwards to
    #[clap(long, default_value = "backend")]
    target_group: String,

    /// A backend `host:port`, optionally prefixed with `GROUP=`
    #[clap(long = "target", required = true)]
    targets: Vec<TargetArg>,

    /// A YAML file of additional listener rules
    #[clap(long)]
    rules: Option<PathBuf>,

    #[clap(long, default_value = "/")]
    health_check_path: String,

    #[clap(long, default_value = "30")]
    health_check_interval_secs: u64,

    #[clap(long, default_value = "5")]
    health_check_timeout_secs: u64,

    #[clap(flatten)]
    gate: GateArgs,
}

#[derive(Clone, Debug)]
struct TargetArg {
    group: Option<String>,
    authority: Authority,
}

#[derive(Debug, Subcommand)]
enum PipelineCommand {
    /// Watches the source object and runs the pipeline whenever it changes
    Watch {
        #[clap(long, default_value = "10")]
        poll_interval_secs: u64,

        #[clap(long, env = "FRONTDOOR_ADMIN_ADDR", default_value = "0.0.0.0:9990")]
        admin_addr: SocketAddr,

        #[clap(flatten)]
        pipeline: PipelineArgs,
    },

    /// Runs the pipeline once for the current source object
    Start {
        #[clap(flatten)]
        pipeline: PipelineArgs,
    },

    /// Re-runs a recorded run from the given stage
    Retry {
        #[clap(long)]
        run: RunId,

        #[clap(long)]
        from: Stage,

        #[clap(flatten)]
        pipeline: PipelineArgs,
    },
}

#[derive(Debug, ClapArgs)]
struct PipelineArgs {
    /// Holds run records, stage artifacts, and the deployed image
    #[clap(long, env = "FRONTDOOR_WORK_DIR", default_value = ".frontdoor")]
    work_dir: PathBuf,

    /// The directory standing in for the source bucket
    #[clap(long, env = "FRONTDOOR_BUCKET_DIR")]
    bucket_dir: PathBuf,

    /// The object key, or key prefix, holding the build context
    #[clap(long, env = "FRONTDOOR_SOURCE_KEY", default_value = "source")]
    key: String,

    #[clap(long, env = "AWS_ACCOUNT_ID")]
    account_id: String,

    #[clap(long, env = "AWS_DEFAULT_REGION")]
    region: String,

    #[clap(long, default_value = "docker-codebuild")]
    repository_name: String,

    /// Overrides the repository URI derived from the account and region
    #[clap(long)]
    repository_uri: Option<String>,

    #[clap(long, default_value = "latest")]
    tag: String,

    #[clap(long, default_value = "cdk-codebuild")]
    container_name: String,

    /// A YAML file with `pre_build`, `build`, and `post_build` commands
    #[clap(long)]
    buildspec: Option<PathBuf>,

    /// Updates the service; runs with `IMAGE_URI` and `CONTAINER_NAME` set
    #[clap(long, env = "FRONTDOOR_DEPLOY_COMMAND")]
    deploy_command: Option<String>,
}

#[derive(Debug, ClapArgs)]
struct SynthArgs {
    /// A YAML stack configuration; defaults apply when omitted
    #[clap(long)]
    config: Option<PathBuf>,

    /// Uses this secret rather than generating a new one
    #[clap(long, env = "FRONTDOOR_SECRET_FILE")]
    secret_file: Option<PathBuf>,
}

// === impl Args ===

impl Args {
    #[inline]
    pub async fn parse_and_run() -> Result<()> {
        Self::parse().run().await
    }

    pub async fn run(self) -> Result<()> {
        let Self {
            log_level,
            log_format,
            command,
        } = self;

        log_format.try_init(log_level)?;

        match command {
            Command::Secret {
                command: SecretCommand::Generate { length, out, force },
            } => generate_secret(length, out, force).await,
            Command::Edge(args) => edge(args).await,
            Command::Origin(args) => origin(args).await,
            Command::Pipeline { command } => pipeline(command).await,
            Command::Synth(SynthArgs {
                config,
                secret_file,
            }) => {
                let json = crate::synth(config.as_deref(), secret_file.as_deref()).await?;
                println!("{json}");
                Ok(())
            }
        }
    }
}

async fn generate_secret(length: usize, out: Option<PathBuf>, force: bool) -> Result<()> {
    if length == 0 {
        bail!("secret length must be at least 1");
    }
    let secret = SharedSecret::generate(length);
    match out {
        Some(path) => {
            secret::write(&path, &secret, force).await?;
            info!(path = %path.display(), "Wrote shared secret");
        }
        None => println!("{}", secret.as_str()),
    }
    Ok(())
}

async fn edge(args: EdgeArgs) -> Result<()> {
    let EdgeArgs { addr, origin, gate } = args;
    let verify = Arc::new(gate.verify().await?);

    let mut prom = <Registry>::default();
    let metrics = EdgeMetrics::register(prom.sub_registry_with_prefix("edge"));

    let (drain_tx, drain_rx) = drain::channel();
    let (ready_tx, admin) = spawn_admin(gate.admin_addr, prom, drain_rx.clone()).await?;

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    let svc = EdgeGate::new(verify, origin.clone(), crate::client(), metrics);
    info!(%origin, "Forwarding to origin");
    let server = tokio::spawn(serve("edge", listener, svc, drain_rx).instrument(info_span!("edge")));

    let _ = ready_tx.send(true);
    run_until_shutdown(drain_tx, vec![admin, server]).await
}

async fn origin(args: OriginArgs) -> Result<()> {
    let OriginArgs {
        addr,
        target_group,
        targets,
        rules,
        health_check_path,
        health_check_interval_secs,
        health_check_timeout_secs,
        gate,
    } = args;
    let verify = gate.verify().await?;

    let mut listener = Listener::origin_gate(&verify, TargetGroupRef::new(&target_group));
    if let Some(path) = rules {
        let yaml = tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("failed to read {}", path.display()))?;
        let spec: ListenerSpec = serde_yaml::from_str(&yaml)
            .with_context(|| format!("invalid listener rules in {}", path.display()))?;
        spec.apply(&mut listener)
            .with_context(|| format!("invalid listener rules in {}", path.display()))?;
    }
    info!(rules = listener.rules().len(), "Loaded listener");

    let health_check = HealthCheck {
        path: health_check_path,
        interval: Duration::from_secs(health_check_interval_secs),
        timeout: Duration::from_secs(health_check_timeout_secs),
    };
    let mut by_group = HashMap::<TargetGroupRef, Vec<Authority>>::new();
    for TargetArg { group, authority } in targets {
        let group = TargetGroupRef::new(group.as_deref().unwrap_or(&target_group));
        by_group.entry(group).or_default().push(authority);
    }
    let groups = by_group
        .into_iter()
        .map(|(name, addrs)| {
            let group = TargetGroup::new(name.clone(), addrs, health_check.clone());
            (name, group)
        })
        .collect::<TargetGroups>();

    let mut prom = <Registry>::default();
    let metrics = AdmissionMetrics::register(prom.sub_registry_with_prefix("origin"));

    let (drain_tx, drain_rx) = drain::channel();
    for group in groups.values() {
        group.spawn_health_checks(drain_rx.clone());
    }

    let svc = OriginFilter::new(
        Arc::new(listener),
        Arc::new(groups),
        crate::client(),
        metrics,
    );
    svc.check_targets()?;

    let (ready_tx, admin) = spawn_admin(gate.admin_addr, prom, drain_rx.clone()).await?;
    let tcp = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    let server = tokio::spawn(serve("origin", tcp, svc, drain_rx).instrument(info_span!("origin")));

    let _ = ready_tx.send(true);
    run_until_shutdown(drain_tx, vec![admin, server]).await
}

async fn pipeline(command: PipelineCommand) -> Result<()> {
    match command {
        PipelineCommand::Watch {
            poll_interval_secs,
            admin_addr,
            pipeline,
        } => {
            let mut prom = <Registry>::default();
            let metrics = PipelineMetrics::register(prom.sub_registry_with_prefix("pipeline"));
            let store = LocalObjectStore::new(&pipeline.bucket_dir);
            let key = pipeline.key.clone();
            let pipeline = pipeline.build(metrics).await?;

            let (drain_tx, drain_rx) = drain::channel();
            let (ready_tx, admin) = spawn_admin(admin_addr, prom, drain_rx.clone()).await?;

            let (tx, rx) = mpsc::channel(TRIGGER_QUEUE_SIZE);
            let poller = Poller::new(store, key, Duration::from_secs(poll_interval_secs));
            let poller = tokio::spawn(poller.run(tx, drain_rx.clone()).instrument(info_span!("poller")));

            // Shutdown waits for an in-flight run to finish.
            let running = drain_rx;
            let runner = tokio::spawn(
                async move {
                    pipeline.process(rx).await;
                    drop(running);
                    Ok::<_, anyhow::Error>(())
                }
                .instrument(info_span!("pipeline")),
            );

            let _ = ready_tx.send(true);
            run_until_shutdown(drain_tx, vec![admin, poller, runner]).await
        }

        PipelineCommand::Start { pipeline } => {
            let trigger = TriggerEvent::new(pipeline.key.clone(), TriggerKind::Manual);
            let pipeline = pipeline.build(PipelineMetrics::default()).await?;
            let run = pipeline.start(trigger).await?;
            report(&run)
        }

        PipelineCommand::Retry {
            run,
            from,
            pipeline,
        } => {
            let pipeline = pipeline.build(PipelineMetrics::default()).await?;
            let run = pipeline.retry(run, from).await?;
            report(&run)
        }
    }
}

fn report(run: &frontdoor_core::pipeline::PipelineRun) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(run)?);
    match run.outcome() {
        RunOutcome::Succeeded => Ok(()),
        RunOutcome::Failed(stage) => bail!("run {} failed at {stage}", run.id()),
        RunOutcome::Incomplete => bail!("run {} did not complete", run.id()),
    }
}

async fn spawn_admin(
    addr: SocketAddr,
    prom: Registry,
    drain: drain::Watch,
) -> Result<(watch::Sender<bool>, JoinHandle<Result<()>>)> {
    let (ready_tx, ready_rx) = watch::channel(false);
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind admin server on {addr}"))?;
    let admin = Admin::new(ready_rx, Arc::new(prom));
    let task = tokio::spawn(serve("admin", listener, admin, drain).instrument(info_span!("admin")));
    Ok((ready_tx, task))
}

/// Blocks until a shutdown signal, then drains every server and waits for
/// the spawned tasks.
async fn run_until_shutdown(drain: drain::Signal, tasks: Vec<JoinHandle<Result<()>>>) -> Result<()> {
    shutdown_signal().await;
    info!("Shutting down");
    drain.drain().await;
    for task in tasks {
        task.await??;
    }
    Ok(())
}

// === impl GateArgs ===

impl GateArgs {
    async fn verify(&self) -> Result<OriginVerify> {
        let secret = secret::read(&self.secret_file).await?;
        Ok(OriginVerify::new(self.header_name.clone(), secret))
    }
}

// === impl PipelineArgs ===

impl PipelineArgs {
    async fn build(self, metrics: PipelineMetrics) -> Result<Pipeline> {
        let spec = match &self.buildspec {
            Some(path) => {
                let yaml = tokio::fs::read_to_string(path)
                    .await
                    .with_context(|| format!("failed to read {}", path.display()))?;
                serde_yaml::from_str::<BuildSpec>(&yaml)
                    .with_context(|| format!("invalid buildspec {}", path.display()))?
            }
            None => BuildSpec::docker(),
        };

        let mut context =
            BuildContext::new(self.account_id, self.region, self.repository_name, self.tag);
        if let Some(uri) = self.repository_uri {
            context = context.with_repository_uri(uri);
        }

        let source = LocalObjectStore::new(self.bucket_dir);
        let build = ShellBuild::new(spec, context, self.container_name.clone());
        let deploy = CommandDeploy::new(
            self.container_name,
            self.deploy_command,
            self.work_dir.join("deployed-image"),
        );
        Ok(Pipeline::new(
            self.work_dir,
            Arc::new(source),
            Arc::new(build),
            Arc::new(deploy),
            metrics,
        ))
    }
}

// === impl TargetArg ===

impl std::str::FromStr for TargetArg {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let (group, addr) = match s.split_once('=') {
            Some((group, addr)) if !group.is_empty() => (Some(group.to_string()), addr),
            Some(_) => bail!("invalid target {s:?}"),
            None => (None, s),
        };
        let authority = addr
            .parse::<Authority>()
            .with_context(|| format!("invalid target address {addr:?}"))?;
        if authority.port_u16().is_none() {
            bail!("target {addr:?} must include a port");
        }
        Ok(Self { group, authority })
    }
}
