// Copyright (c) 2025 TexasFortress.AI
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Content-addressed payload storage for MIME part bytes. `put` is idempotent:
//! a key already present is left untouched rather than rewritten, which is what
//! lets the folder worker fire off N concurrent puts per chunk without needing
//! to dedup at the call site.

pub mod fs;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BlobError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type BlobResult<T> = Result<T, BlobError>;

#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn put(&self, key: &str, bytes: &[u8]) -> BlobResult<()>;
    async fn get(&self, key: &str) -> BlobResult<Option<Vec<u8>>>;
    async fn exists(&self, key: &str) -> BlobResult<bool>;
}
