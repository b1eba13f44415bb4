// Copyright (c) 2025 TexasFortress.AI
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use thiserror::Error;

use crate::blob::BlobError;
use crate::remote::pool::PoolError;
use crate::remote::RemoteError;
use crate::store::StoreError;

/// Top-level error for the sync core, chaining the boundary errors (§7).
/// `UidInvalid` (surfaced structurally via [`RemoteError::UidInvalid`]) is
/// handled before it ever reaches a caller as an `Err` — folder-worker
/// handlers catch it at the point of `select_folder` and turn it into a
/// `SyncState::*UidInvalid` return value instead. It stays a variant here so
/// code outside the happy path (e.g. `resync_uids`'s own `select_folder` call)
/// can still match on it explicitly.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("UIDVALIDITY changed for folder {folder}")]
    UidInvalid { folder: String },

    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Blob(#[from] BlobError),

    #[error(transparent)]
    Pool(#[from] PoolError),

    /// Memory pressure, supervisor invariant violations, and anything else
    /// that must never be silently retried (§7).
    #[error("fatal: {0}")]
    Fatal(String),
}

pub type SyncResult<T> = Result<T, SyncError>;

impl SyncError {
    /// Transient network/backend errors the retry decorator should back off
    /// and retry (§5 Cancellation & timeouts, §7).
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            SyncError::Remote(
                RemoteError::Connection(_)
                    | RemoteError::Tls(_)
                    | RemoteError::Timeout(_)
                    | RemoteError::PoolUnavailable
            ) | SyncError::Pool(PoolError::LeaseTimeout | PoolError::ConnectFailed { .. })
        )
    }

    pub fn is_uid_invalid(&self) -> bool {
        matches!(self, SyncError::UidInvalid { .. })
            || matches!(self, SyncError::Remote(RemoteError::UidInvalid { .. }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_errors_are_transient_not_uid_invalid() {
        let err = SyncError::Remote(RemoteError::Connection("reset".to_string()));
        assert!(err.is_transient());
        assert!(!err.is_uid_invalid());
    }

    #[test]
    fn uid_invalid_is_neither_transient_nor_retried() {
        let err = SyncError::Remote(RemoteError::UidInvalid {
            folder: "INBOX".to_string(),
            expected: 1,
            actual: 2,
        });
        assert!(!err.is_transient());
        assert!(err.is_uid_invalid());
    }

    #[test]
    fn fatal_errors_are_neither_transient_nor_uid_invalid() {
        let err = SyncError::Fatal("out of memory".to_string());
        assert!(!err.is_transient());
        assert!(!err.is_uid_invalid());
    }
}
