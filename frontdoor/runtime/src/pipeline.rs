//! Executes pipeline runs and persists their state.
//!
//! Each run lives in `{work}/runs/{id}/`: `run.json` records stage status and
//! each stage writes its artifact into a directory named after the stage.

mod build;
mod deploy;
mod source;
mod trigger;

pub use self::{
    build::ShellBuild,
    deploy::CommandDeploy,
    source::LocalObjectStore,
    trigger::{Fingerprint, Poller},
};
use crate::{metrics::StageOutcome, PipelineMetrics};
use anyhow::{Context, Result};
use frontdoor_core::pipeline::{
    Artifact, BuildAction, DeployAction, DeployOutcome, PipelineRun, RunId, RunOutcome,
    SourceAction, Stage, TriggerEvent,
};
use std::{
    path::{Path, PathBuf},
    sync::Arc,
};
use tokio::sync::mpsc;
use tracing::{info, info_span, warn, Instrument};

pub const RUN_FILE: &str = "run.json";

#[derive(Clone)]
pub struct Pipeline {
    work_dir: PathBuf,
    source: Arc<dyn SourceAction>,
    build: Arc<dyn BuildAction>,
    deploy: Arc<dyn DeployAction>,
    metrics: PipelineMetrics,
}

// === impl Pipeline ===

impl Pipeline {
    pub fn new(
        work_dir: impl Into<PathBuf>,
        source: Arc<dyn SourceAction>,
        build: Arc<dyn BuildAction>,
        deploy: Arc<dyn DeployAction>,
        metrics: PipelineMetrics,
    ) -> Self {
        Self {
            work_dir: work_dir.into(),
            source,
            build,
            deploy,
            metrics,
        }
    }

    pub fn run_dir(&self, id: RunId) -> PathBuf {
        self.work_dir.join("runs").join(id.to_string())
    }

    /// Starts a new run for `trigger` and drives it until it completes or a
    /// stage fails.
    pub async fn start(&self, trigger: TriggerEvent) -> Result<PipelineRun> {
        let mut run = PipelineRun::new(trigger);
        let id = run.id();
        let dir = self.run_dir(id);
        tokio::fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("failed to create {}", dir.display()))?;
        info!(run = %id, key = %run.trigger().key, "Starting run");
        self.persist(&run).await?;
        self.drive(&mut run)
            .instrument(info_span!("run", %id))
            .await?;
        Ok(run)
    }

    /// Resets `from` and every later stage of a recorded run, then resumes it
    /// from the artifact of the stage before `from`.
    pub async fn retry(&self, id: RunId, from: Stage) -> Result<PipelineRun> {
        let mut run = self.load(id).await?;
        if let Some(stage) = run.in_progress() {
            warn!(run = %id, %stage, "Resetting a stage left in progress by an interrupted attempt");
        }
        run.reset_from(from)?;
        info!(run = %id, %from, "Retrying run");
        self.persist(&run).await?;
        self.drive(&mut run)
            .instrument(info_span!("run", %id))
            .await?;
        Ok(run)
    }

    pub async fn load(&self, id: RunId) -> Result<PipelineRun> {
        let path = self.run_dir(id).join(RUN_FILE);
        let json = tokio::fs::read(&path)
            .await
            .with_context(|| format!("failed to read {}", path.display()))?;
        serde_json::from_slice(&json)
            .with_context(|| format!("invalid run record {}", path.display()))
    }

    /// Runs one pipeline per trigger, in the order received, until the
    /// channel closes. Runs never overlap.
    pub async fn process(self, mut triggers: mpsc::Receiver<TriggerEvent>) {
        while let Some(trigger) = triggers.recv().await {
            match self.start(trigger).await {
                Ok(run) => match run.outcome() {
                    RunOutcome::Succeeded => info!(run = %run.id(), "Run succeeded"),
                    outcome => warn!(run = %run.id(), ?outcome, "Run did not succeed"),
                },
                Err(error) => warn!(%error, "Failed to execute run"),
            }
        }
    }

    async fn drive(&self, run: &mut PipelineRun) -> Result<()> {
        let dir = self.run_dir(run.id());
        while let Some(stage) = run.next_stage() {
            let input = run.begin(stage)?;
            self.persist(run).await?;

            let out = dir.join(stage.as_str());
            let res = match prepare(&out).await {
                Ok(()) => self.execute(stage, run.trigger(), input.as_ref(), &out).await,
                Err(error) => Err(error),
            };
            match res {
                Ok(artifact) => {
                    info!(%stage, "Stage succeeded");
                    self.metrics.stage(stage, StageOutcome::Succeeded);
                    run.succeed(stage, artifact)?;
                }
                Err(error) => {
                    warn!(%stage, error = %format!("{error:#}"), "Stage failed");
                    self.metrics.stage(stage, StageOutcome::Failed);
                    run.fail(stage, format!("{error:#}"))?;
                }
            }
            self.persist(run).await?;
        }
        Ok(())
    }

    async fn execute(
        &self,
        stage: Stage,
        trigger: &TriggerEvent,
        input: Option<&Artifact>,
        out: &Path,
    ) -> Result<Option<Artifact>> {
        match (stage, input) {
            (Stage::Source, _) => self.source.fetch(trigger, out).await.map(Some),
            (Stage::Build, Some(input)) => self.build.build(input, out).await.map(Some),
            (Stage::Deploy, Some(input)) => {
                match self.deploy.deploy(input).await? {
                    DeployOutcome::Updated { previous, image } => {
                        info!(?previous, %image, "Service updated")
                    }
                    DeployOutcome::Unchanged { image } => {
                        info!(%image, "Service already runs image")
                    }
                    DeployOutcome::Skipped { image } => {
                        warn!(%image, "No deploy command configured; the service was not updated")
                    }
                }
                Ok(None)
            }
            (stage, None) => anyhow::bail!("{stage} requires an input artifact"),
        }
    }

    async fn persist(&self, run: &PipelineRun) -> Result<()> {
        let path = self.run_dir(run.id()).join(RUN_FILE);
        let json = serde_json::to_vec_pretty(run)?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json)
            .await
            .with_context(|| format!("failed to write {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .with_context(|| format!("failed to write {}", path.display()))?;
        Ok(())
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("work_dir", &self.work_dir)
            .finish_non_exhaustive()
    }
}

/// Clears any output left by an earlier attempt of the stage.
async fn prepare(out: &Path) -> Result<()> {
    if tokio::fs::try_exists(out).await? {
        tokio::fs::remove_dir_all(out)
            .await
            .with_context(|| format!("failed to clear {}", out.display()))?;
    }
    tokio::fs::create_dir_all(out)
        .await
        .with_context(|| format!("failed to create {}", out.display()))?;
    Ok(())
}
