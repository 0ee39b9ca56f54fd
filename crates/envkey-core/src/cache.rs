//! Disk cache of encrypted envelopes, one file per credential id.
//!
//! Writes are fire-and-forget: the pipeline dispatches them after a
//! successful fetch and returns without waiting. Each write lands in a
//! staging file first and is renamed into place, so a concurrent reader
//! never observes torn contents. Entries live until explicitly deleted
//! (revoked or undecryptable credentials) or externally pruned.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::io::AsyncWriteExt;
use tokio::sync::oneshot;
use tracing::warn;
use uuid::Uuid;

pub struct Cache {
    dir: PathBuf,
    pending: Mutex<Option<oneshot::Receiver<()>>>,
}

impl Cache {
    /// Open (and create if needed) a cache directory.
    pub fn open(dir: impl Into<PathBuf>) -> io::Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            pending: Mutex::new(None),
        })
    }

    /// `$HOME/.envkey/cache`, or `None` when `HOME` is unset.
    pub fn default_dir() -> Option<PathBuf> {
        std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".envkey").join("cache"))
    }

    fn path_for(&self, id: &str) -> PathBuf {
        self.dir.join(id)
    }

    pub async fn read(&self, id: &str) -> io::Result<Vec<u8>> {
        tokio::fs::read(self.path_for(id)).await
    }

    /// Persist the raw envelope bytes for `id` off the caller's path. The
    /// spawned write posts completion on a signal checked by
    /// [`Cache::write_settled`]; failures are logged and otherwise ignored.
    pub fn write(self: &Arc<Self>, id: &str, bytes: Vec<u8>) {
        let (tx, rx) = oneshot::channel();
        *self.pending.lock() = Some(rx);

        let cache = Arc::clone(self);
        let id = id.to_string();
        tokio::spawn(async move {
            if let Err(err) = cache.write_atomic(&id, &bytes).await {
                warn!(%id, %err, "cache write failed");
            }
            let _ = tx.send(());
        });
    }

    async fn write_atomic(&self, id: &str, bytes: &[u8]) -> io::Result<()> {
        let staging = self.dir.join(format!(".{}.staging", Uuid::new_v4()));
        let mut file = tokio::fs::File::create(&staging).await?;
        file.write_all(bytes).await?;
        file.sync_all().await?;
        drop(file);
        tokio::fs::rename(&staging, self.path_for(id)).await
    }

    pub fn delete(&self, id: &str) -> io::Result<()> {
        match std::fs::remove_file(self.path_for(id)) {
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            other => other,
        }
    }

    /// Non-blocking: has the most recently dispatched write finished?
    pub fn write_settled(&self) -> bool {
        let mut pending = self.pending.lock();
        match pending.as_mut() {
            None => true,
            Some(rx) => match rx.try_recv() {
                Ok(()) | Err(oneshot::error::TryRecvError::Closed) => {
                    *pending = None;
                    true
                }
                Err(oneshot::error::TryRecvError::Empty) => false,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::tempdir;

    async fn settle(cache: &Cache) {
        while !cache.write_settled() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    #[tokio::test]
    async fn write_then_read_roundtrip() {
        let dir = tempdir().unwrap();
        let cache = Arc::new(Cache::open(dir.path().join("cache")).unwrap());

        cache.write("AAAA", b"ciphertext".to_vec());
        settle(&cache).await;

        assert_eq!(cache.read("AAAA").await.unwrap(), b"ciphertext");
    }

    #[tokio::test]
    async fn write_leaves_no_staging_files() {
        let dir = tempdir().unwrap();
        let cache_dir = dir.path().join("cache");
        let cache = Arc::new(Cache::open(&cache_dir).unwrap());

        cache.write("AAAA", b"one".to_vec());
        settle(&cache).await;
        cache.write("AAAA", b"two".to_vec());
        settle(&cache).await;

        let entries: Vec<_> = std::fs::read_dir(&cache_dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(entries, vec!["AAAA".to_string()]);
        assert_eq!(cache.read("AAAA").await.unwrap(), b"two");
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let dir = tempdir().unwrap();
        let cache = Arc::new(Cache::open(dir.path().join("cache")).unwrap());

        cache.write("AAAA", b"ciphertext".to_vec());
        settle(&cache).await;

        cache.delete("AAAA").unwrap();
        cache.delete("AAAA").unwrap();
        assert!(cache.read("AAAA").await.is_err());
    }

    #[test]
    fn settled_with_no_writes() {
        let dir = tempdir().unwrap();
        let cache = Cache::open(dir.path().join("cache")).unwrap();
        assert!(cache.write_settled());
    }
}
