//! The source → build → deploy stage contract.
//!
//! A [`PipelineRun`] records the status of each stage of a single run and
//! enforces ordering: a stage may only begin once the stage before it has
//! succeeded, and it consumes that stage's artifact. Failed stages are never
//! retried implicitly; an operator resets a stage with
//! [`PipelineRun::reset_from`].

mod build;
mod descriptor;
#[cfg(test)]
mod tests;

pub use self::{
    build::{BuildContext, BuildSpec, Phase},
    descriptor::{ImageDefinition, ImageDefinitions, IMAGE_DEFINITIONS_FILE},
};
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{fmt, path::Path, path::PathBuf, str::FromStr};
use thiserror::Error;
use uuid::Uuid;

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Source,
    Build,
    Deploy,
}

/// Files handed from one stage to the next.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    pub stage: Stage,
    pub dir: PathBuf,
    pub files: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "kebab-case")]
pub enum StageStatus {
    Pending,
    InProgress {
        started_at: DateTime<Utc>,
    },
    Succeeded {
        finished_at: DateTime<Utc>,
        artifact: Option<Artifact>,
    },
    Failed {
        finished_at: DateTime<Utc>,
        reason: String,
    },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageState {
    pub stage: Stage,
    pub status: StageStatus,
    pub attempts: u32,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(Uuid);

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerEvent {
    /// The object key that changed.
    pub key: String,
    pub kind: TriggerKind,
    pub observed_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerKind {
    Created,
    Updated,
    Manual,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineRun {
    id: RunId,
    trigger: TriggerEvent,
    created_at: DateTime<Utc>,
    stages: Vec<StageState>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RunOutcome {
    /// At least one stage has not yet completed.
    Incomplete,
    Succeeded,
    Failed(Stage),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DeployOutcome {
    Updated {
        previous: Option<String>,
        image: String,
    },
    /// The service already runs the described image.
    Unchanged { image: String },
    /// No deployment target is configured, so the image was not rolled out.
    Skipped { image: String },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PipelineError {
    #[error("{stage} cannot start before {waiting_on} succeeds")]
    Blocked { stage: Stage, waiting_on: Stage },

    #[error("{0} is already in progress")]
    InProgress(Stage),

    #[error("{0} has already completed; reset it to run again")]
    Completed(Stage),

    #[error("{0} is not in progress")]
    NotInProgress(Stage),

    #[error("{0} succeeded without producing an artifact")]
    MissingArtifact(Stage),

    #[error("invalid stage {0:?}")]
    InvalidStage(String),

    #[error("image definitions list no container named {0:?}")]
    ContainerNotFound(String),

    #[error("image definitions must contain at least one record")]
    EmptyDescriptor,
}

/// Copies the object named by a trigger into the source artifact.
#[async_trait::async_trait]
pub trait SourceAction: Send + Sync {
    async fn fetch(&self, trigger: &TriggerEvent, out: &Path) -> Result<Artifact>;
}

/// Builds and publishes an image from the source artifact, producing the
/// image definitions artifact.
#[async_trait::async_trait]
pub trait BuildAction: Send + Sync {
    async fn build(&self, input: &Artifact, out: &Path) -> Result<Artifact>;
}

/// Points the running service at the image described by the build artifact.
#[async_trait::async_trait]
pub trait DeployAction: Send + Sync {
    async fn deploy(&self, input: &Artifact) -> Result<DeployOutcome>;
}

// === impl Stage ===

impl Stage {
    pub const ALL: [Stage; 3] = [Stage::Source, Stage::Build, Stage::Deploy];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Source => "source",
            Self::Build => "build",
            Self::Deploy => "deploy",
        }
    }

    pub fn previous(self) -> Option<Self> {
        match self {
            Self::Source => None,
            Self::Build => Some(Self::Source),
            Self::Deploy => Some(Self::Build),
        }
    }

    pub fn next(self) -> Option<Self> {
        match self {
            Self::Source => Some(Self::Build),
            Self::Build => Some(Self::Deploy),
            Self::Deploy => None,
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.as_str().fmt(f)
    }
}

impl FromStr for Stage {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "source" => Ok(Self::Source),
            "build" => Ok(Self::Build),
            "deploy" => Ok(Self::Deploy),
            s => Err(PipelineError::InvalidStage(s.to_string())),
        }
    }
}

// === impl Artifact ===

impl Artifact {
    pub fn path(&self, file: &str) -> PathBuf {
        self.dir.join(file)
    }
}

// === impl RunId ===

impl RunId {
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for RunId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse().map(Self)
    }
}

// === impl TriggerEvent ===

impl TriggerEvent {
    pub fn new(key: impl Into<String>, kind: TriggerKind) -> Self {
        Self {
            key: key.into(),
            kind,
            observed_at: Utc::now(),
        }
    }
}

// === impl PipelineRun ===

impl PipelineRun {
    pub fn new(trigger: TriggerEvent) -> Self {
        Self {
            id: RunId::new(),
            trigger,
            created_at: Utc::now(),
            stages: Stage::ALL
                .iter()
                .map(|&stage| StageState {
                    stage,
                    status: StageStatus::Pending,
                    attempts: 0,
                })
                .collect(),
        }
    }

    pub fn id(&self) -> RunId {
        self.id
    }

    pub fn trigger(&self) -> &TriggerEvent {
        &self.trigger
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn stages(&self) -> &[StageState] {
        &self.stages
    }

    pub fn status(&self, stage: Stage) -> &StageStatus {
        &self.stages[stage.index()].status
    }

    /// The artifact a stage produced, if it succeeded with one.
    pub fn artifact(&self, stage: Stage) -> Option<&Artifact> {
        match self.status(stage) {
            StageStatus::Succeeded { artifact, .. } => artifact.as_ref(),
            _ => None,
        }
    }

    /// The next stage to execute, or `None` if the run has finished, failed,
    /// or has a stage in progress.
    pub fn next_stage(&self) -> Option<Stage> {
        for state in &self.stages {
            match state.status {
                StageStatus::Succeeded { .. } => continue,
                StageStatus::Pending => return Some(state.stage),
                StageStatus::InProgress { .. } | StageStatus::Failed { .. } => return None,
            }
        }
        None
    }

    pub fn outcome(&self) -> RunOutcome {
        let mut complete = true;
        for state in &self.stages {
            match state.status {
                StageStatus::Failed { .. } => return RunOutcome::Failed(state.stage),
                StageStatus::Succeeded { .. } => {}
                _ => complete = false,
            }
        }
        if complete {
            RunOutcome::Succeeded
        } else {
            RunOutcome::Incomplete
        }
    }

    /// Marks `stage` in progress and returns the artifact it consumes.
    ///
    /// The source stage consumes the trigger rather than an artifact, so it
    /// returns `None`.
    pub fn begin(&mut self, stage: Stage) -> Result<Option<Artifact>, PipelineError> {
        match self.status(stage) {
            StageStatus::Pending => {}
            StageStatus::InProgress { .. } => return Err(PipelineError::InProgress(stage)),
            StageStatus::Succeeded { .. } | StageStatus::Failed { .. } => {
                return Err(PipelineError::Completed(stage))
            }
        }

        let input = match stage.previous() {
            None => None,
            Some(prior) => {
                if !matches!(self.status(prior), StageStatus::Succeeded { .. }) {
                    return Err(PipelineError::Blocked {
                        stage,
                        waiting_on: prior,
                    });
                }
                let artifact = self
                    .artifact(prior)
                    .cloned()
                    .ok_or(PipelineError::MissingArtifact(prior))?;
                Some(artifact)
            }
        };

        let state = &mut self.stages[stage.index()];
        state.status = StageStatus::InProgress {
            started_at: Utc::now(),
        };
        state.attempts += 1;
        Ok(input)
    }

    pub fn succeed(
        &mut self,
        stage: Stage,
        artifact: Option<Artifact>,
    ) -> Result<(), PipelineError> {
        self.finish(
            stage,
            StageStatus::Succeeded {
                finished_at: Utc::now(),
                artifact,
            },
        )
    }

    pub fn fail(&mut self, stage: Stage, reason: impl Into<String>) -> Result<(), PipelineError> {
        self.finish(
            stage,
            StageStatus::Failed {
                finished_at: Utc::now(),
                reason: reason.into(),
            },
        )
    }

    /// The stage currently marked in progress, if any.
    pub fn in_progress(&self) -> Option<Stage> {
        self.stages
            .iter()
            .find(|s| matches!(s.status, StageStatus::InProgress { .. }))
            .map(|s| s.stage)
    }

    /// Resets `stage` and every later stage to pending so the run can resume
    /// from the artifact of the stage before it.
    ///
    /// A stage recorded as in progress at or after `stage` is reset as well:
    /// a persisted run is only driven by one process, so such a record was
    /// left behind by an interrupted attempt.
    pub fn reset_from(&mut self, stage: Stage) -> Result<(), PipelineError> {
        if let Some(prior) = stage.previous() {
            if !matches!(self.status(prior), StageStatus::Succeeded { .. }) {
                return Err(PipelineError::Blocked {
                    stage,
                    waiting_on: prior,
                });
            }
        }

        for state in &mut self.stages[stage.index()..] {
            state.status = StageStatus::Pending;
        }
        Ok(())
    }

    fn finish(&mut self, stage: Stage, status: StageStatus) -> Result<(), PipelineError> {
        let state = &mut self.stages[stage.index()];
        if !matches!(state.status, StageStatus::InProgress { .. }) {
            return Err(PipelineError::NotInProgress(stage));
        }
        state.status = status;
        Ok(())
    }
}
