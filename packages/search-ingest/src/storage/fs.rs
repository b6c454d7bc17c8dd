//! Filesystem block content store.
//!
//! Blocks land at `{root}/{search_id}/block-{index}.json`. Keys are
//! write-once; an existing file is never overwritten.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;

use super::BlockStore;

pub struct FsBlockStore {
    root: PathBuf,
}

impl FsBlockStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl BlockStore for FsBlockStore {
    async fn put_block(&self, key: &str, payload: &str) -> Result<()> {
        let path = self.root.join(key);

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create block directory for {key}"))?;
        }

        if tokio::fs::try_exists(&path)
            .await
            .with_context(|| format!("Failed to stat block {key}"))?
        {
            bail!("block {key} already exists; blocks are write-once");
        }

        tokio::fs::write(&path, payload)
            .await
            .with_context(|| format!("Failed to write block {key}"))?;

        Ok(())
    }

    async fn get_block(&self, key: &str) -> Result<Option<String>> {
        match tokio::fs::read_to_string(self.root.join(key)).await {
            Ok(payload) => Ok(Some(payload)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err).with_context(|| format!("Failed to read block {key}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_and_get_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlockStore::new(dir.path());

        store
            .put_block("abc123/block-1.json", r#"{"records":[]}"#)
            .await
            .unwrap();

        let payload = store.get_block("abc123/block-1.json").await.unwrap();
        assert_eq!(payload.as_deref(), Some(r#"{"records":[]}"#));
    }

    #[tokio::test]
    async fn test_missing_key_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlockStore::new(dir.path());

        assert_eq!(store.get_block("nope/block-1.json").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_existing_key_is_not_overwritten() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlockStore::new(dir.path());

        store.put_block("run/block-1.json", "first").await.unwrap();
        let err = store.put_block("run/block-1.json", "second").await;
        assert!(err.is_err());

        let payload = store.get_block("run/block-1.json").await.unwrap();
        assert_eq!(payload.as_deref(), Some("first"));
    }
}
