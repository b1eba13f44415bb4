// Copyright (c) 2025 TexasFortress.AI
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The wire-protocol boundary: everything the sync core needs from a mailbox,
//! abstracted behind [`RemoteMailbox`] so the concrete `async-imap` transport in
//! [`imap_mailbox`] can be swapped for a test double.

pub mod error;
pub mod imap_mailbox;
pub mod pool;

pub use error::RemoteError;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;

use crate::model::message::RemoteMeta;

pub type RemoteResult<T> = Result<T, RemoteError>;

/// What `SELECT` returned, handed to the caller's validity callback so it can
/// compare against the persisted checkpoint before deciding the session is usable.
#[derive(Debug, Clone, Copy)]
pub struct SelectInfo {
    pub uidvalidity: u32,
    pub highestmodseq: u64,
    pub exists: u32,
}

/// A cheap `STATUS` probe, used by the poll loop to decide whether a full
/// `SELECT` + delta pass is worth the round trip.
#[derive(Debug, Clone, Copy)]
pub struct FolderStatus {
    pub uidvalidity: u32,
    pub highestmodseq: u64,
}

#[derive(Debug, Clone)]
pub struct RawMessage {
    pub uid: u32,
    pub rfc822: Vec<u8>,
    pub internal_date: Option<DateTime<Utc>>,
    pub flags: Vec<String>,
    pub labels: Vec<String>,
}

/// Validity callback signature: given the just-selected folder's name and
/// `SelectInfo`, return an error (typically `RemoteError::UidInvalid`) if the
/// session shouldn't be trusted as a continuation of the prior one.
pub type ValidityCallback<'a> = &'a (dyn Fn(&str, SelectInfo) -> RemoteResult<()> + Send + Sync);

/// One leased, folder-scoped mailbox session. Implementations may hold a lock
/// on an underlying pooled connection for their whole lifetime; callers get one
/// of these per handler pass and drop it when done.
#[async_trait]
pub trait RemoteMailbox: Send + Sync {
    /// Select `folder_name`, invoking `validity_cb` with the negotiated
    /// UIDVALIDITY/HIGHESTMODSEQ before returning successfully.
    async fn select_folder(
        &self,
        folder_name: &str,
        validity_cb: ValidityCallback<'_>,
    ) -> RemoteResult<SelectInfo>;

    /// Lightweight `STATUS` probe; does not change the selected folder.
    async fn folder_status(&self, folder_name: &str) -> RemoteResult<FolderStatus>;

    /// All UIDs currently in the selected folder.
    async fn all_uids(&self) -> RemoteResult<Vec<u32>>;

    /// Full RFC822 fetch for the given UIDs (flags/labels included).
    async fn uids(&self, uids: &[u32]) -> RemoteResult<Vec<RawMessage>>;

    /// Flags/labels only, for UIDs already known locally.
    async fn flags(&self, uids: &[u32]) -> RemoteResult<HashMap<u32, (Vec<String>, Vec<String>)>>;

    /// Gmail X-GM-MSGID/X-GM-THRID metadata for the given UIDs. Non-Gmail
    /// implementations return an empty map.
    async fn g_metadata(&self, uids: &[u32]) -> RemoteResult<HashMap<u32, RemoteMeta>>;

    /// UIDs new or changed since `since_modseq` (CONDSTORE `CHANGEDSINCE`).
    async fn new_and_updated_uids(&self, since_modseq: u64) -> RemoteResult<Vec<u32>>;

    /// Given a set of X-GM-THRID values, return every UID in the currently
    /// selected folder (expected to be All Mail) belonging to one of them.
    async fn expand_threads(&self, thrids: &[u64]) -> RemoteResult<Vec<u32>>;

    /// Folder names the provider expects to poll continuously.
    async fn poll_folders(&self) -> RemoteResult<Vec<String>>;

    /// All syncable folder names, in the order initial sync should visit them.
    async fn sync_folders(&self) -> RemoteResult<Vec<String>>;

    /// Chunk size this provider/connection is tuned for bulk UID fetches.
    fn chunk_size(&self) -> usize {
        100
    }
}

/// Produces a fresh, already-authenticated [`RemoteMailbox`] for one account.
/// Generalizes the teacher's `ImapSessionFactory` type alias away from a single
/// hardcoded credential source.
#[async_trait]
pub trait RemoteMailboxFactory: Send + Sync {
    async fn connect(&self, account: &crate::model::Account) -> RemoteResult<Box<dyn RemoteMailbox>>;
}
