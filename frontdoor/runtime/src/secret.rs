//! Persists the shared secret so separately-run edge and origin processes
//! agree on its value.

use anyhow::{Context, Result};
use frontdoor_core::SharedSecret;
use std::path::Path;
use tokio::io::AsyncWriteExt;

/// Reads a secret written by [`write`]. Surrounding whitespace is ignored.
pub async fn read(path: &Path) -> Result<SharedSecret> {
    let contents = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read secret from {}", path.display()))?;
    contents
        .trim()
        .parse()
        .with_context(|| format!("invalid secret in {}", path.display()))
}

/// Writes `secret` to `path`, readable only by the owner.
///
/// An existing file is never replaced unless `force` is set.
pub async fn write(path: &Path, secret: &SharedSecret, force: bool) -> Result<()> {
    let mut opts = tokio::fs::OpenOptions::new();
    opts.write(true);
    if force {
        opts.create(true).truncate(true);
    } else {
        opts.create_new(true);
    }
    #[cfg(unix)]
    opts.mode(0o600);

    let mut file = opts.open(path).await.with_context(|| {
        if path.exists() && !force {
            format!("{} already exists; use --force to replace it", path.display())
        } else {
            format!("failed to create {}", path.display())
        }
    })?;
    file.write_all(secret.as_str().as_bytes()).await?;
    file.write_all(b"\n").await?;
    file.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn write_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("secret");
        let secret = SharedSecret::generate(8);

        write(&path, &secret, false).await.unwrap();
        assert_eq!(read(&path).await.unwrap(), secret);

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }

    #[tokio::test]
    async fn refuses_to_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("secret");
        let first = "aB3xQ9kZ".parse::<SharedSecret>().unwrap();
        write(&path, &first, false).await.unwrap();

        let second = "zzzzzzzz".parse::<SharedSecret>().unwrap();
        let err = write(&path, &second, false).await.unwrap_err();
        assert!(err.to_string().contains("--force"), "{err}");
        assert_eq!(read(&path).await.unwrap(), first);

        write(&path, &second, true).await.unwrap();
        assert_eq!(read(&path).await.unwrap(), second);
    }

    #[tokio::test]
    async fn rejects_invalid_contents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("secret");
        std::fs::write(&path, "not a secret!").unwrap();
        assert!(read(&path).await.is_err());
    }
}
