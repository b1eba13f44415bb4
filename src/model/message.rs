// Copyright (c) 2025 TexasFortress.AI
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One MIME part payload, addressed in the blob store by `blob_key`. The sync
/// core stores parts opaquely — it does not parse or render MIME, only fetches
/// and persists the bytes plus enough metadata to re-assemble them later.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MimePart {
    pub content_type: String,
    pub blob_key: String,
    pub size_bytes: u64,
}

/// A message, keyed by its own id and best-effort deduplicated by provider
/// message-id (X-GM-MSGID for Gmail; absent for plain IMAP, where dedup across
/// folders isn't possible and every FolderItem gets its own Message).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: i64,
    pub account_id: i64,
    pub provider_msgid: Option<String>,
    pub provider_thrid: Option<String>,
    pub subject: Option<String>,
    pub from_address: Option<String>,
    pub internal_date: Option<DateTime<Utc>>,
    pub parts: Vec<MimePart>,
}

/// The per-folder binding of a UID to a Message. Under Gmail's label model many
/// FolderItems across folders may reference the same Message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FolderItem {
    pub account_id: i64,
    pub folder_name: String,
    pub uid: u32,
    pub message_id: i64,
    pub flags: Vec<String>,
    pub labels: Vec<String>,
}

/// Remote Gmail-extension metadata for one UID, as returned by `g_metadata`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteMeta {
    pub msgid: Option<u64>,
    pub thrid: Option<u64>,
}
