use anyhow::{bail, Context, Result};
use frontdoor_core::pipeline::{Artifact, SourceAction, Stage, TriggerEvent};
use std::path::{Component, Path, PathBuf};
use tracing::debug;

/// An object store backed by a local directory. Keys are relative paths; a
/// key may name a single object or a prefix holding many.
#[derive(Clone, Debug)]
pub struct LocalObjectStore {
    root: PathBuf,
}

// === impl LocalObjectStore ===

impl LocalObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolves `key` beneath the root, refusing keys that would escape it.
    pub fn object_path(&self, key: &str) -> Result<PathBuf> {
        let rel = Path::new(key);
        if key.is_empty() || !rel.components().all(|c| matches!(c, Component::Normal(_))) {
            bail!("invalid object key {key:?}");
        }
        Ok(self.root.join(rel))
    }
}

#[async_trait::async_trait]
impl SourceAction for LocalObjectStore {
    async fn fetch(&self, trigger: &TriggerEvent, out: &Path) -> Result<Artifact> {
        let src = self.object_path(&trigger.key)?;
        let meta = tokio::fs::metadata(&src)
            .await
            .with_context(|| format!("object {:?} not found", trigger.key))?;

        let mut files = Vec::new();
        if meta.is_file() {
            let name = src
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .with_context(|| format!("object {:?} has no file name", trigger.key))?;
            tokio::fs::copy(&src, out.join(&name)).await?;
            files.push(name);
        } else {
            copy_tree(&src, out, &mut files).await?;
        }
        files.sort();
        debug!(key = %trigger.key, files = files.len(), "Fetched source");

        Ok(Artifact {
            stage: Stage::Source,
            dir: out.to_path_buf(),
            files,
        })
    }
}

async fn copy_tree(src: &Path, dst: &Path, files: &mut Vec<String>) -> Result<()> {
    let mut pending = vec![PathBuf::new()];
    while let Some(rel) = pending.pop() {
        tokio::fs::create_dir_all(dst.join(&rel)).await?;
        let mut entries = tokio::fs::read_dir(src.join(&rel))
            .await
            .with_context(|| format!("failed to list {}", src.join(&rel).display()))?;
        while let Some(entry) = entries.next_entry().await? {
            let path = rel.join(entry.file_name());
            let kind = entry.file_type().await?;
            if kind.is_dir() {
                pending.push(path);
            } else if kind.is_file() {
                tokio::fs::copy(src.join(&path), dst.join(&path)).await?;
                files.push(path.to_string_lossy().into_owned());
            }
        }
    }
    Ok(())
}
