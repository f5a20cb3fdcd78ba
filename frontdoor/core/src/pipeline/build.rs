use super::ImageDefinitions;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifies the image a build produces and where it is pushed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildContext {
    pub account_id: String,
    pub region: String,
    pub repository_name: String,
    pub repository_uri: String,
    pub tag: String,
}

/// Shell commands run by the build stage, grouped by phase.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BuildSpec {
    #[serde(default)]
    pub pre_build: Vec<String>,
    #[serde(default)]
    pub build: Vec<String>,
    #[serde(default)]
    pub post_build: Vec<String>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Phase {
    PreBuild,
    Build,
    PostBuild,
}

// === impl BuildContext ===

impl BuildContext {
    /// A context whose repository lives in the account's private registry.
    pub fn new(
        account_id: impl Into<String>,
        region: impl Into<String>,
        repository_name: impl Into<String>,
        tag: impl Into<String>,
    ) -> Self {
        let account_id = account_id.into();
        let region = region.into();
        let repository_name = repository_name.into();
        let repository_uri = format!(
            "{}/{}",
            registry_host(&account_id, &region),
            repository_name
        );
        Self {
            account_id,
            region,
            repository_name,
            repository_uri,
            tag: tag.into(),
        }
    }

    pub fn with_repository_uri(mut self, uri: impl Into<String>) -> Self {
        self.repository_uri = uri.into();
        self
    }

    /// The registry host, e.g. `123456789012.dkr.ecr.us-east-1.amazonaws.com`.
    pub fn registry(&self) -> String {
        registry_host(&self.account_id, &self.region)
    }

    /// The tag applied by `docker build`.
    pub fn local_image(&self) -> String {
        format!("{}:{}", self.repository_name, self.tag)
    }

    /// The tag applied before pushing.
    pub fn remote_image(&self) -> String {
        format!("{}/{}:{}", self.registry(), self.repository_name, self.tag)
    }

    /// The image reference written to the image definitions.
    pub fn image_uri(&self) -> String {
        format!("{}:{}", self.repository_uri, self.tag)
    }

    pub fn image_definitions(&self, container: &str) -> ImageDefinitions {
        ImageDefinitions::single(container, self.image_uri())
    }

    /// Environment variables exposed to build commands.
    pub fn env(&self) -> Vec<(&'static str, String)> {
        vec![
            ("AWS_DEFAULT_REGION", self.region.clone()),
            ("AWS_ACCOUNT_ID", self.account_id.clone()),
            ("IMAGE_REPO_NAME", self.repository_name.clone()),
            ("IMAGE_REPO_URI", self.repository_uri.clone()),
            ("IMAGE_TAG", self.tag.clone()),
        ]
    }
}

fn registry_host(account_id: &str, region: &str) -> String {
    format!("{account_id}.dkr.ecr.{region}.amazonaws.com")
}

// === impl BuildSpec ===

impl BuildSpec {
    /// Logs in to the registry, builds and tags the image, and pushes it.
    pub fn docker() -> Self {
        const REMOTE: &str =
            "$AWS_ACCOUNT_ID.dkr.ecr.$AWS_DEFAULT_REGION.amazonaws.com/$IMAGE_REPO_NAME:$IMAGE_TAG";
        Self {
            pre_build: vec![
                "echo Logging in to Amazon ECR...".to_string(),
                "aws ecr get-login-password --region $AWS_DEFAULT_REGION | docker login --username AWS --password-stdin $AWS_ACCOUNT_ID.dkr.ecr.$AWS_DEFAULT_REGION.amazonaws.com".to_string(),
            ],
            build: vec![
                "echo Build started on `date`".to_string(),
                "echo Building the Docker image...".to_string(),
                "docker build -t $IMAGE_REPO_NAME:$IMAGE_TAG .".to_string(),
                format!("docker tag $IMAGE_REPO_NAME:$IMAGE_TAG {REMOTE}"),
            ],
            post_build: vec![
                "echo Build completed on `date`".to_string(),
                "echo Pushing the Docker image...".to_string(),
                format!("docker push {REMOTE}"),
            ],
        }
    }

    /// Commands in execution order.
    pub fn commands(&self) -> impl Iterator<Item = (Phase, &str)> + '_ {
        phase(Phase::PreBuild, &self.pre_build)
            .chain(phase(Phase::Build, &self.build))
            .chain(phase(Phase::PostBuild, &self.post_build))
    }
}

fn phase(p: Phase, cmds: &[String]) -> impl Iterator<Item = (Phase, &str)> + '_ {
    cmds.iter().map(move |c| (p, c.as_str()))
}

impl Default for BuildSpec {
    fn default() -> Self {
        Self::docker()
    }
}

// === impl Phase ===

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PreBuild => "pre_build",
            Self::Build => "build",
            Self::PostBuild => "post_build",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.as_str().fmt(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> BuildContext {
        BuildContext::new("123456789012", "us-east-1", "docker-codebuild", "latest")
    }

    #[test]
    fn image_names() {
        let ctx = ctx();
        assert_eq!(ctx.registry(), "123456789012.dkr.ecr.us-east-1.amazonaws.com");
        assert_eq!(ctx.local_image(), "docker-codebuild:latest");
        assert_eq!(
            ctx.remote_image(),
            "123456789012.dkr.ecr.us-east-1.amazonaws.com/docker-codebuild:latest"
        );
        assert_eq!(ctx.image_uri(), ctx.remote_image());
    }

    #[test]
    fn descriptor_uses_repository_uri_and_tag() {
        let ctx = ctx().with_repository_uri("R");
        assert_eq!(
            ctx.image_definitions("cdk-codebuild").to_json().unwrap(),
            r#"[{"name":"cdk-codebuild","imageUri":"R:latest"}]"#
        );
    }

    #[test]
    fn docker_spec_orders_phases() {
        let spec = BuildSpec::docker();
        let cmds = spec.commands().collect::<Vec<_>>();
        assert_eq!(cmds.first().map(|(p, _)| *p), Some(Phase::PreBuild));
        assert_eq!(cmds.last().map(|(p, _)| *p), Some(Phase::PostBuild));

        let pos = |needle: &str| {
            cmds.iter()
                .position(|(_, c)| c.starts_with(needle))
                .unwrap_or_else(|| panic!("missing {needle}"))
        };
        assert!(pos("aws ecr get-login-password") < pos("docker build"));
        assert!(pos("docker build") < pos("docker tag"));
        assert!(pos("docker tag") < pos("docker push"));
    }

    #[test]
    fn env_exposes_context() {
        let env = ctx().env();
        assert!(env.contains(&("IMAGE_TAG", "latest".to_string())));
        assert!(env.contains(&("IMAGE_REPO_NAME", "docker-codebuild".to_string())));
        assert!(env.contains(&("AWS_DEFAULT_REGION", "us-east-1".to_string())));
    }
}
