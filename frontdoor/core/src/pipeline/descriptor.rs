use super::PipelineError;
use serde::{Deserialize, Serialize};

/// The file the build stage hands to the deploy stage.
pub const IMAGE_DEFINITIONS_FILE: &str = "imagedefinitions.json";

/// Maps a container name to the image it should run.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageDefinition {
    pub name: String,
    pub image_uri: String,
}

/// The contents of `imagedefinitions.json`: a JSON array of records.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ImageDefinitions(Vec<ImageDefinition>);

// === impl ImageDefinitions ===

impl ImageDefinitions {
    pub fn single(name: impl Into<String>, image_uri: impl Into<String>) -> Self {
        Self(vec![ImageDefinition {
            name: name.into(),
            image_uri: image_uri.into(),
        }])
    }

    /// Serializes to compact JSON, e.g.
    /// `[{"name":"cdk-codebuild","imageUri":"repo:latest"}]`.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_json(bytes: &[u8]) -> anyhow::Result<Self> {
        let defs: Self = serde_json::from_slice(bytes)?;
        if defs.0.is_empty() {
            return Err(PipelineError::EmptyDescriptor.into());
        }
        Ok(defs)
    }

    pub fn image_for(&self, container: &str) -> Result<&str, PipelineError> {
        self.0
            .iter()
            .find(|d| d.name == container)
            .map(|d| d.image_uri.as_str())
            .ok_or_else(|| PipelineError::ContainerNotFound(container.to_string()))
    }

    pub fn iter(&self) -> impl Iterator<Item = &ImageDefinition> + '_ {
        self.0.iter()
    }
}
