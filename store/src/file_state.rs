//! [`StateStore`] kept in a single JSON file, for processes that come and go.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::Value;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::state::StateStore;

/// State persisted as one JSON object on disk.
///
/// The whole file is read once on [`open`](Self::open) and rewritten after
/// every change, through a sibling temporary file and a rename so a crash
/// never leaves a half-written file behind.
pub struct FileStateStore {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, Value>>,
}

impl FileStateStore {
    /// Open the store at `path`. A missing file starts empty; an unreadable
    /// one is set aside as `<path>.bak` and the store starts empty.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let entries = match fs::read_to_string(&path).await {
            Ok(json) => match serde_json::from_str(&json) {
                Ok(entries) => entries,
                Err(e) => {
                    let backup = path.with_extension("json.bak");
                    warn!(
                        "State file {} is unreadable ({e}); moving it to {}",
                        path.display(),
                        backup.display()
                    );
                    fs::rename(&path, &backup).await?;
                    BTreeMap::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("No state file at {}, starting empty", path.display());
                BTreeMap::new()
            }
            Err(e) => return Err(e.into()),
        };

        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(&self, entries: &BTreeMap<String, Value>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let json = serde_json::to_vec_pretty(entries)?;
        let staging = self.path.with_extension("json.tmp");
        fs::write(&staging, json).await?;
        fs::rename(&staging, &self.path).await?;
        debug!("Saved {} state entries to {}", entries.len(), self.path.display());
        Ok(())
    }
}

#[async_trait]
impl StateStore for FileStateStore {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.entries.lock().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: Value) -> Result<()> {
        let mut entries = self.entries.lock().await;
        entries.insert(key.to_string(), value);
        self.persist(&entries).await
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let mut entries = self.entries.lock().await;
        if entries.remove(key).is_none() {
            return Ok(false);
        }
        self.persist(&entries).await?;
        Ok(true)
    }

    async fn keys(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .entries
            .lock()
            .await
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("state.json");

        let store = FileStateStore::open(&path).await.unwrap();
        store.set("conversation:a", json!({"turns": 1})).await.unwrap();
        store.set("conversation:b", json!({"turns": 2})).await.unwrap();
        assert!(store.delete("conversation:b").await.unwrap());
        assert!(!store.delete("conversation:b").await.unwrap());
        drop(store);

        let reopened = FileStateStore::open(&path).await.unwrap();
        assert_eq!(
            reopened.get("conversation:a").await.unwrap(),
            Some(json!({"turns": 1}))
        );
        assert_eq!(
            reopened.keys("conversation:").await.unwrap(),
            vec!["conversation:a".to_string()]
        );
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[tokio::test]
    async fn test_corrupt_file_is_set_aside() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, "{not json").unwrap();

        let store = FileStateStore::open(&path).await.unwrap();
        assert!(store.keys("").await.unwrap().is_empty());
        assert!(path.with_extension("json.bak").exists());

        store.set("k", json!(1)).await.unwrap();
        assert!(std::fs::read_to_string(&path).unwrap().contains("\"k\""));
    }
}
