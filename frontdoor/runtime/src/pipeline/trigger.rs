use super::LocalObjectStore;
use anyhow::Result;
use frontdoor_core::pipeline::{TriggerEvent, TriggerKind};
use std::{path::Path, time::SystemTime};
use tokio::{sync::mpsc, time};
use tracing::{debug, info, warn};

/// Summarizes an object's metadata so that changes can be detected without
/// reading its contents.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Fingerprint {
    modified: Option<SystemTime>,
    len: u64,
    entries: usize,
}

/// Polls an object's metadata and emits a trigger whenever it is created or
/// changes.
#[derive(Clone, Debug)]
pub struct Poller {
    store: LocalObjectStore,
    key: String,
    interval: time::Duration,
}

// === impl Fingerprint ===

impl Fingerprint {
    /// Returns `None` if the object does not exist.
    pub async fn read(path: &Path) -> Result<Option<Self>> {
        let meta = match tokio::fs::metadata(path).await {
            Ok(meta) => meta,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        if meta.is_file() {
            return Ok(Some(Self {
                modified: meta.modified().ok(),
                len: meta.len(),
                entries: 1,
            }));
        }

        let mut fp = Self {
            modified: meta.modified().ok(),
            len: 0,
            entries: 0,
        };
        let mut pending = vec![path.to_path_buf()];
        while let Some(dir) = pending.pop() {
            let mut entries = tokio::fs::read_dir(&dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                let meta = entry.metadata().await?;
                if meta.is_dir() {
                    pending.push(entry.path());
                    continue;
                }
                fp.entries += 1;
                fp.len += meta.len();
                fp.modified = fp.modified.max(meta.modified().ok());
            }
        }
        Ok(Some(fp))
    }
}

// === impl Poller ===

impl Poller {
    pub fn new(store: LocalObjectStore, key: impl Into<String>, interval: time::Duration) -> Self {
        Self {
            store,
            key: key.into(),
            interval,
        }
    }

    /// Emits triggers until `drain` is signaled or the receiver is dropped.
    ///
    /// An object that already exists when polling starts is reported as
    /// created.
    pub async fn run(self, tx: mpsc::Sender<TriggerEvent>, drain: drain::Watch) -> Result<()> {
        let path = self.store.object_path(&self.key)?;
        let mut last = None;
        let mut interval = time::interval(self.interval);
        interval.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
        let shutdown = drain.signaled();
        tokio::pin!(shutdown);

        info!(key = %self.key, root = %self.store.root().display(), "Watching for source changes");
        loop {
            tokio::select! {
                _ = interval.tick() => {}
                _ = &mut shutdown => return Ok(()),
            }

            let current = match Fingerprint::read(&path).await {
                Ok(fp) => fp,
                Err(error) => {
                    warn!(%error, key = %self.key, "Failed to read object metadata");
                    continue;
                }
            };
            let kind = match (&last, &current) {
                (None, Some(_)) => TriggerKind::Created,
                (Some(prev), Some(cur)) if prev != cur => TriggerKind::Updated,
                _ => {
                    last = current;
                    continue;
                }
            };
            last = current;

            debug!(key = %self.key, ?kind, "Source changed");
            if tx.send(TriggerEvent::new(self.key.clone(), kind)).await.is_err() {
                return Ok(());
            }
        }
    }
}
