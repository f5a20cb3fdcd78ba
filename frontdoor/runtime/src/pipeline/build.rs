use anyhow::{bail, Context, Result};
use frontdoor_core::pipeline::{
    Artifact, BuildAction, BuildContext, BuildSpec, Stage, IMAGE_DEFINITIONS_FILE,
};
use std::path::Path;
use tokio::process::Command;
use tracing::{debug, info};

/// Runs a [`BuildSpec`] through `sh -c` in the source artifact's directory,
/// then writes the image definitions for the configured container.
#[derive(Clone, Debug)]
pub struct ShellBuild {
    spec: BuildSpec,
    context: BuildContext,
    container: String,
}

// === impl ShellBuild ===

impl ShellBuild {
    pub fn new(spec: BuildSpec, context: BuildContext, container: impl Into<String>) -> Self {
        Self {
            spec,
            context,
            container: container.into(),
        }
    }
}

#[async_trait::async_trait]
impl BuildAction for ShellBuild {
    async fn build(&self, input: &Artifact, out: &Path) -> Result<Artifact> {
        for (phase, cmd) in self.spec.commands() {
            info!(%phase, %cmd, "Running");
            let output = Command::new("sh")
                .arg("-c")
                .arg(cmd)
                .current_dir(&input.dir)
                .envs(self.context.env())
                .kill_on_drop(true)
                .output()
                .await
                .with_context(|| format!("failed to spawn {cmd:?}"))?;

            for line in String::from_utf8_lossy(&output.stdout).lines() {
                debug!(%phase, "{line}");
            }
            if !output.status.success() {
                let stderr = String::from_utf8_lossy(&output.stderr);
                bail!(
                    "{phase} command {cmd:?} failed with {}: {}",
                    output.status,
                    stderr.trim()
                );
            }
        }

        let defs = self.context.image_definitions(&self.container);
        let path = out.join(IMAGE_DEFINITIONS_FILE);
        tokio::fs::write(&path, defs.to_json()?)
            .await
            .with_context(|| format!("failed to write {}", path.display()))?;
        info!(image = %self.context.image_uri(), "Wrote image definitions");

        Ok(Artifact {
            stage: Stage::Build,
            dir: out.to_path_buf(),
            files: vec![IMAGE_DEFINITIONS_FILE.to_string()],
        })
    }
}
