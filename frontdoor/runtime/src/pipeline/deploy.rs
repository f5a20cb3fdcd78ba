use anyhow::{Context, Result};
use frontdoor_core::pipeline::{
    Artifact, DeployAction, DeployOutcome, ImageDefinitions, IMAGE_DEFINITIONS_FILE,
};
use std::path::PathBuf;
use tokio::process::Command;
use tracing::info;

/// Points the service at the image named by the build artifact.
///
/// The update itself is delegated to a shell command, which sees `IMAGE_URI`
/// and `CONTAINER_NAME` in its environment. The deployed image is recorded in
/// `state_file`, and deploying the recorded image again is a no-op. Without a
/// command the stage reports [`DeployOutcome::Skipped`] and records nothing.
#[derive(Clone, Debug)]
pub struct CommandDeploy {
    container: String,
    command: Option<String>,
    state_file: PathBuf,
}

// === impl CommandDeploy ===

impl CommandDeploy {
    pub fn new(
        container: impl Into<String>,
        command: Option<String>,
        state_file: impl Into<PathBuf>,
    ) -> Self {
        Self {
            container: container.into(),
            command,
            state_file: state_file.into(),
        }
    }

    /// The image most recently deployed, if any.
    pub async fn current_image(&self) -> Result<Option<String>> {
        match tokio::fs::read_to_string(&self.state_file).await {
            Ok(s) => Ok(Some(s.trim().to_string()).filter(|s| !s.is_empty())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("failed to read {}", self.state_file.display())),
        }
    }
}

#[async_trait::async_trait]
impl DeployAction for CommandDeploy {
    async fn deploy(&self, input: &Artifact) -> Result<DeployOutcome> {
        let path = input.path(IMAGE_DEFINITIONS_FILE);
        let json = tokio::fs::read(&path)
            .await
            .with_context(|| format!("failed to read {}", path.display()))?;
        let defs = ImageDefinitions::from_json(&json)
            .with_context(|| format!("invalid image definitions in {}", path.display()))?;
        let image = defs.image_for(&self.container)?.to_string();

        let previous = self.current_image().await?;
        if previous.as_deref() == Some(image.as_str()) {
            return Ok(DeployOutcome::Unchanged { image });
        }

        let Some(cmd) = &self.command else {
            return Ok(DeployOutcome::Skipped { image });
        };

        info!(%cmd, container = %self.container, %image, "Updating service");
        let output = Command::new("sh")
            .arg("-c")
            .arg(cmd)
            .env("IMAGE_URI", &image)
            .env("CONTAINER_NAME", &self.container)
            .kill_on_drop(true)
            .output()
            .await
            .with_context(|| format!("failed to spawn {cmd:?}"))?;
        if !output.status.success() {
            anyhow::bail!(
                "deploy command failed with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        if let Some(parent) = self.state_file.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&self.state_file, format!("{image}\n"))
            .await
            .with_context(|| format!("failed to write {}", self.state_file.display()))?;
        Ok(DeployOutcome::Updated { previous, image })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use frontdoor_core::pipeline::Stage;
    use std::path::Path;

    fn artifact(dir: &Path, json: &str) -> Artifact {
        std::fs::write(dir.join(IMAGE_DEFINITIONS_FILE), json).unwrap();
        Artifact {
            stage: Stage::Build,
            dir: dir.to_path_buf(),
            files: vec![IMAGE_DEFINITIONS_FILE.to_string()],
        }
    }

    #[tokio::test]
    async fn deploys_once_per_image() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("deploys");
        let deploy = CommandDeploy::new(
            "cdk-codebuild",
            Some(format!(
                "echo $CONTAINER_NAME=$IMAGE_URI >> {}",
                log.display()
            )),
            dir.path().join("state/deployed-image"),
        );

        let input = artifact(dir.path(), r#"[{"name":"cdk-codebuild","imageUri":"R:1"}]"#);
        assert_eq!(
            deploy.deploy(&input).await.unwrap(),
            DeployOutcome::Updated {
                previous: None,
                image: "R:1".to_string()
            }
        );
        assert_eq!(
            deploy.deploy(&input).await.unwrap(),
            DeployOutcome::Unchanged {
                image: "R:1".to_string()
            }
        );

        let input = artifact(dir.path(), r#"[{"name":"cdk-codebuild","imageUri":"R:2"}]"#);
        assert_eq!(
            deploy.deploy(&input).await.unwrap(),
            DeployOutcome::Updated {
                previous: Some("R:1".to_string()),
                image: "R:2".to_string()
            }
        );
        assert_eq!(
            std::fs::read_to_string(&log).unwrap(),
            "cdk-codebuild=R:1\ncdk-codebuild=R:2\n"
        );
    }

    #[tokio::test]
    async fn without_command_nothing_is_deployed() {
        let dir = tempfile::tempdir().unwrap();
        let state = dir.path().join("deployed-image");
        let deploy = CommandDeploy::new("cdk-codebuild", None, &state);
        let input = artifact(dir.path(), r#"[{"name":"cdk-codebuild","imageUri":"R:T"}]"#);

        assert_eq!(
            deploy.deploy(&input).await.unwrap(),
            DeployOutcome::Skipped {
                image: "R:T".to_string()
            }
        );
        assert!(!state.exists());
        assert_eq!(deploy.current_image().await.unwrap(), None);
    }

    #[tokio::test]
    async fn missing_container_fails() {
        let dir = tempfile::tempdir().unwrap();
        let deploy = CommandDeploy::new("cdk-codebuild", None, dir.path().join("deployed-image"));
        let input = artifact(dir.path(), r#"[{"name":"other","imageUri":"R:1"}]"#);
        assert!(deploy.deploy(&input).await.is_err());
        assert_eq!(deploy.current_image().await.unwrap(), None);
    }
}
