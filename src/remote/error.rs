// Copyright (c) 2025 TexasFortress.AI
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use thiserror::Error;

/// Transport-level errors. `UidInvalid` is not really an "error" — it is the
/// structural signal the folder worker's state machine switches on, carried
/// through the same `Result` channel so the retry decorator can tell it apart
/// from transient failures without a second side channel.
#[derive(Debug, Error, Clone)]
pub enum RemoteError {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("authentication error: {0}")]
    Auth(String),

    #[error("folder not found: {0}")]
    FolderNotFound(String),

    #[error("UIDVALIDITY changed for folder {folder}: expected {expected}, got {actual}")]
    UidInvalid {
        folder: String,
        expected: u32,
        actual: u32,
    },

    #[error("command error: {0}")]
    Command(String),

    #[error("fetch error: {0}")]
    Fetch(String),

    #[error("pool exhausted or closed")]
    PoolUnavailable,

    #[error("operation timed out: {0}")]
    Timeout(String),
}

impl From<async_imap::error::Error> for RemoteError {
    fn from(err: async_imap::error::Error) -> Self {
        match err {
            async_imap::error::Error::Parse(e) => RemoteError::Fetch(e.to_string()),
            async_imap::error::Error::No(msg) => RemoteError::Command(msg),
            async_imap::error::Error::Bad(msg) => RemoteError::Command(msg),
            async_imap::error::Error::Io(e) => RemoteError::Connection(e.to_string()),
            async_imap::error::Error::Validate(e) => RemoteError::Command(e.to_string()),
            other => RemoteError::Command(other.to_string()),
        }
    }
}

impl From<tokio_native_tls::native_tls::Error> for RemoteError {
    fn from(err: tokio_native_tls::native_tls::Error) -> Self {
        RemoteError::Tls(err.to_string())
    }
}

impl From<std::io::Error> for RemoteError {
    fn from(err: std::io::Error) -> Self {
        RemoteError::Connection(err.to_string())
    }
}
