// Copyright (c) 2025 TexasFortress.AI
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::path::PathBuf;

use async_trait::async_trait;
use tokio::fs;
use tokio::io::AsyncWriteExt;

use super::{BlobError, BlobResult, BlobStore};

/// Two-level fan-out directory layout (`ab/cd/abcd...`) to keep any one
/// directory from holding an unbounded number of entries, the same shape
/// `dashboard/services/cache.rs::initialize()` uses for its own data
/// directory (via the `dirs` crate to find a sensible base path).
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn data_dir_under_home(app_name: &str) -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join(app_name)
            .join("blobs")
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let mut path = self.root.clone();
        if key.len() >= 4 {
            path.push(&key[0..2]);
            path.push(&key[2..4]);
        }
        path.push(key);
        path
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn put(&self, key: &str, bytes: &[u8]) -> BlobResult<()> {
        let path = self.path_for(key);
        if fs::metadata(&path).await.is_ok() {
            return Ok(());
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let tmp_path = path.with_extension("tmp");
        let mut file = fs::File::create(&tmp_path).await?;
        file.write_all(bytes).await?;
        file.flush().await?;
        fs::rename(&tmp_path, &path).await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> BlobResult<Option<Vec<u8>>> {
        match fs::read(self.path_for(key)).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(BlobError::from(e)),
        }
    }

    async fn exists(&self, key: &str) -> BlobResult<bool> {
        Ok(fs::metadata(self.path_for(key)).await.is_ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let dir = TempDir::new().unwrap();
        let store = FsBlobStore::new(dir.path());

        store.put("deadbeefcafe", b"hello world").await.unwrap();

        assert!(store.exists("deadbeefcafe").await.unwrap());
        assert_eq!(store.get("deadbeefcafe").await.unwrap(), Some(b"hello world".to_vec()));
    }

    #[tokio::test]
    async fn get_missing_key_returns_none() {
        let dir = TempDir::new().unwrap();
        let store = FsBlobStore::new(dir.path());

        assert_eq!(store.get("0000000000000000").await.unwrap(), None);
        assert!(!store.exists("0000000000000000").await.unwrap());
    }

    #[tokio::test]
    async fn put_is_idempotent_and_does_not_overwrite() {
        let dir = TempDir::new().unwrap();
        let store = FsBlobStore::new(dir.path());

        store.put("aabbccddeeff0011", b"first").await.unwrap();
        store.put("aabbccddeeff0011", b"second").await.unwrap();

        assert_eq!(store.get("aabbccddeeff0011").await.unwrap(), Some(b"first".to_vec()));
    }

    #[tokio::test]
    async fn short_keys_skip_the_fan_out_prefix() {
        let dir = TempDir::new().unwrap();
        let store = FsBlobStore::new(dir.path());

        store.put("ab", b"short").await.unwrap();
        assert_eq!(store.get("ab").await.unwrap(), Some(b"short".to_vec()));
    }
}
