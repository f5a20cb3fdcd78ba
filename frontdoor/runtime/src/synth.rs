use anyhow::{Context, Result};
use frontdoor_core::{
    stack::{Stack, StackConfig},
    HeaderName, OriginVerify, SharedSecret,
};
use std::path::Path;
use tracing::{debug, info};

/// Renders the stack described by `config` (or the default stack) as JSON.
///
/// The secret is read from `secret_file` when given; otherwise a new one is
/// generated, so each synthesis without a file yields a distinct secret.
pub async fn synth(config: Option<&Path>, secret_file: Option<&Path>) -> Result<String> {
    let config = match config {
        Some(path) => {
            let yaml = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("failed to read {}", path.display()))?;
            serde_yaml::from_str::<StackConfig>(&yaml)
                .with_context(|| format!("invalid stack config in {}", path.display()))?
        }
        None => StackConfig::default(),
    };
    debug!(?config);
    config.validate()?;

    let secret = match secret_file {
        Some(path) => crate::secret::read(path).await?,
        None => {
            info!(len = config.gate.secret_length, "Generating a new shared secret");
            SharedSecret::generate(config.gate.secret_length)
        }
    };

    let name = config
        .gate
        .header_name
        .parse::<HeaderName>()
        .with_context(|| format!("invalid header name {:?}", config.gate.header_name))?;
    let verify = OriginVerify::new(name, secret);
    let stack = Stack::synthesize(&config, &verify)?;
    for resource in stack.resources.iter() {
        debug!(
            id = %resource.id,
            kind = resource.kind,
            dependents = stack.resources.dependents(&resource.id).count(),
            "Resource"
        );
    }
    info!(stack = %stack.name, resources = stack.resources.len(), "Synthesized");

    Ok(serde_json::to_string_pretty(&stack)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn synthesizes_with_persisted_secret() {
        let dir = tempfile::tempdir().unwrap();
        let secret_path = dir.path().join("secret");
        std::fs::write(&secret_path, "aB3xQ9kZ\n").unwrap();
        let config_path = dir.path().join("stack.yaml");
        std::fs::write(&config_path, "name: test\n").unwrap();

        let json = synth(Some(&config_path), Some(&secret_path)).await.unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["name"], "test");
        assert_eq!(value["resources"][0]["id"], "vpcResources/vpc");
        assert_eq!(value["resources"][0]["layer"], "network");
        assert_eq!(json.matches("aB3xQ9kZ").count(), 2, "{json}");
    }

    #[tokio::test]
    async fn generates_secret_of_configured_length() {
        let json = synth(None, None).await.unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        let rule = value["resources"]
            .as_array()
            .unwrap()
            .iter()
            .find(|r| r["id"] == "ecsResources/ForwardFromCloudFront")
            .unwrap();
        let secret = rule["properties"]["conditions"][0]["values"][0]
            .as_str()
            .unwrap();
        assert_eq!(secret.len(), 8);
    }

    #[tokio::test]
    async fn zero_secret_length_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("stack.yaml");
        std::fs::write(&config_path, "gate:\n  secretLength: 0\n").unwrap();

        let error = synth(Some(&config_path), None).await.unwrap_err();
        assert_eq!(error.to_string(), "gate.secretLength must be at least 1");
    }
}
