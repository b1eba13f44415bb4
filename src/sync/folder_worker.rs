// Copyright (c) 2025 TexasFortress.AI
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The per-(account, folder) state machine and its four reconciliation
//! algorithms (§4.1-§4.4): initial sync, expanded-thread download, deduplicated
//! download, and the MODSEQ delta poll path. Control flow (state dispatch,
//! UID-invalid transition, commit-after-handler) is grounded on
//! `original_source`'s `FolderSyncMonitor`; the chunked fetch-then-persist
//! loop with blobs-before-commit ordering is grounded on this codebase's own
//! `dashboard/services/sync.rs::sync_folder_to_cache`.

use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, HashSet};
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use log::{debug, info, warn};
use tokio::time::sleep;

use crate::blob::BlobStore;
use crate::cache::{g_metadata_key, GMetadataMap, MetaCache};
use crate::model::message::RemoteMeta;
use crate::model::{Account, FolderItem, Message, MimePart, SyncState};
use crate::remote::pool::ConnectionPool;
use crate::remote::{RemoteError, RemoteMailbox, SelectInfo};
use crate::search_index::SearchIndexNotifier;
use crate::store::MetadataStore;

use super::errors::{SyncError, SyncResult};
use super::thread_detector::ThreadDetectorHandle;

/// One progress update; cheap enough to build on every chunk/poll tick.
#[derive(Debug, Clone)]
pub struct SyncProgress {
    pub folder_name: String,
    pub phase: &'static str,
    pub detail: String,
}

pub type StatusCallback = Arc<dyn Fn(i64, SyncProgress) + Send + Sync>;

#[derive(Clone)]
pub struct FolderWorkerConfig {
    pub poll_frequency: Duration,
    pub max_retries: u32,
    pub retry_initial_backoff: Duration,
    pub retry_max_backoff: Duration,
}

impl Default for FolderWorkerConfig {
    fn default() -> Self {
        Self {
            poll_frequency: Duration::from_secs(30),
            max_retries: 5,
            retry_initial_backoff: Duration::from_millis(500),
            retry_max_backoff: Duration::from_secs(30),
        }
    }
}

pub struct FolderSyncWorker {
    account: Account,
    folder_name: String,
    store: Arc<dyn MetadataStore>,
    blobs: Arc<dyn BlobStore>,
    cache: Arc<dyn MetaCache>,
    pool: Arc<ConnectionPool>,
    threads: ThreadDetectorHandle,
    search_index: Arc<dyn SearchIndexNotifier>,
    status_callback: StatusCallback,
    config: FolderWorkerConfig,
}

impl FolderSyncWorker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        account: Account,
        folder_name: String,
        store: Arc<dyn MetadataStore>,
        blobs: Arc<dyn BlobStore>,
        cache: Arc<dyn MetaCache>,
        pool: Arc<ConnectionPool>,
        threads: ThreadDetectorHandle,
        search_index: Arc<dyn SearchIndexNotifier>,
        status_callback: StatusCallback,
        config: FolderWorkerConfig,
    ) -> Self {
        Self {
            account,
            folder_name,
            store,
            blobs,
            cache,
            pool,
            threads,
            search_index,
            status_callback,
            config,
        }
    }

    pub fn folder_name(&self) -> &str {
        &self.folder_name
    }

    /// Runs the state machine to completion (`Finish`) or until externally
    /// aborted by the supervisor via `JoinHandle::abort`. A clean `Ok(())`
    /// return means the folder reached `Finish`; any `Err` is fatal and
    /// propagates to the supervisor, which stops the account.
    pub async fn run(mut self) -> SyncResult<()> {
        let mut state = self
            .store
            .load_folder_state(self.account.id, &self.folder_name)
            .await?
            .unwrap_or(SyncState::Initial);

        // §3: "FolderSyncProgress is created on first worker entry". Persist
        // it before the first handler dispatch, not just after — otherwise a
        // fresh folder has no row while its initial sync is running, and the
        // supervisor's "at most one folder in Initial" guard (which reads
        // this row) can't see that it's busy.
        self.store
            .save_folder_state(self.account.id, &self.folder_name, state)
            .await?;

        loop {
            let next = match self.with_retry(state).await {
                Ok(next) => next,
                Err(err) if err.is_uid_invalid() => {
                    warn!(
                        "account {} folder {} UIDVALIDITY changed, recovering",
                        self.account.id, self.folder_name
                    );
                    state.uidinvalid_variant()
                }
                Err(err) => return Err(err),
            };

            self.store
                .save_folder_state(self.account.id, &self.folder_name, next)
                .await?;
            info!(
                "account {} folder {} {} -> {}",
                self.account.id, self.folder_name, state, next
            );
            state = next;

            if state.is_terminal() {
                return Ok(());
            }
        }
    }

    async fn with_retry(&mut self, state: SyncState) -> SyncResult<SyncState> {
        let mut attempt = 0;
        let mut backoff = self.config.retry_initial_backoff;
        loop {
            let result = self.dispatch(state).await;
            match result {
                Ok(next) => return Ok(next),
                Err(err) if err.is_transient() && attempt < self.config.max_retries => {
                    attempt += 1;
                    warn!(
                        "account {} folder {} transient error (attempt {}/{}): {} — retrying in {:?}",
                        self.account.id, self.folder_name, attempt, self.config.max_retries, err, backoff
                    );
                    sleep(backoff).await;
                    backoff = (backoff * 2).min(self.config.retry_max_backoff);
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn dispatch(&self, state: SyncState) -> SyncResult<SyncState> {
        match state {
            SyncState::Initial => self.initial_sync().await,
            SyncState::Poll => self.poll().await,
            SyncState::InitialUidInvalid | SyncState::PollUidInvalid => self.resync_uids(state).await,
            SyncState::Finish => Ok(SyncState::Finish),
        }
    }

    fn validity_callback(
        checkpoint: Option<crate::model::UidValidityCheckpoint>,
    ) -> impl Fn(&str, SelectInfo) -> crate::remote::RemoteResult<()> + Send + Sync {
        move |name, info| {
            if let Some(checkpoint) = checkpoint {
                if checkpoint.uidvalidity != 0 && checkpoint.uidvalidity != info.uidvalidity {
                    return Err(RemoteError::UidInvalid {
                        folder: name.to_string(),
                        expected: checkpoint.uidvalidity,
                        actual: info.uidvalidity,
                    });
                }
            }
            Ok(())
        }
    }

    /// §4.1 initial sync.
    async fn initial_sync(&self) -> SyncResult<SyncState> {
        let account_id = self.account.id;
        let folder = self.folder_name.clone();

        let local_uids = self.store.local_uids(account_id, &folder).await?;
        let conn = self.pool.lease(&self.account).await?;

        let checkpoint = self.store.get_checkpoint(account_id, &folder).await?;
        let cb = Self::validity_callback(checkpoint);
        let select_info = conn.select_folder(&folder, &cb).await?;

        let remote_uids = conn.all_uids().await?;
        let remote_meta = self
            .build_remote_g_metadata(&*conn, &folder, select_info, &remote_uids)
            .await?;

        self.remove_deleted_messages(&folder, &local_uids, &remote_uids).await?;

        let local_set: HashSet<u32> = local_uids.iter().copied().collect();
        let unknown_uids: Vec<u32> = remote_uids.iter().copied().filter(|u| !local_set.contains(u)).collect();

        if self.account.provider.capabilities().has_labels && !self.account.provider.is_all_mail(&folder) {
            let flags_map = conn.flags(&remote_uids).await?;
            self.expanded_thread_download(&*conn, &folder, &remote_meta, &flags_map).await?;
        } else {
            self.dedup_download(&*conn, &folder, &unknown_uids, &remote_meta).await?;
        }

        let pollable = conn.poll_folders().await?;
        self.cache.remove(&g_metadata_key(account_id, &folder)).await;
        drop(conn);

        Ok(if pollable.iter().any(|f| f == &folder) {
            SyncState::Poll
        } else {
            SyncState::Finish
        })
    }

    /// §4.1 step 3.
    async fn build_remote_g_metadata(
        &self,
        mailbox: &dyn RemoteMailbox,
        folder: &str,
        select_info: SelectInfo,
        remote_uids: &[u32],
    ) -> SyncResult<GMetadataMap> {
        let account_id = self.account.id;
        let key = g_metadata_key(account_id, folder);
        let checkpoint = self.store.get_checkpoint(account_id, folder).await?;
        let cached = self.cache.get(&key).await;

        let metadata = match (cached, checkpoint) {
            (Some(mut metadata), Some(checkpoint)) => {
                if select_info.highestmodseq > checkpoint.highestmodseq {
                    let changed = mailbox.new_and_updated_uids(checkpoint.highestmodseq).await?;
                    let remote_set: HashSet<u32> = remote_uids.iter().copied().collect();

                    let truly_new: Vec<u32> = changed.iter().copied().filter(|u| !metadata.contains_key(u)).collect();
                    if !truly_new.is_empty() {
                        let fresh = mailbox.g_metadata(&truly_new).await?;
                        metadata.extend(fresh);
                    }

                    metadata.retain(|uid, _| remote_set.contains(uid));

                    let updated: Vec<u32> = changed
                        .iter()
                        .copied()
                        .filter(|u| !truly_new.contains(u) && metadata.contains_key(u))
                        .collect();
                    if !updated.is_empty() {
                        let flags = mailbox.flags(&updated).await?;
                        for (uid, (flags_vec, labels_vec)) in flags {
                            self.store
                                .update_folder_item_flags(account_id, folder, uid, flags_vec, labels_vec)
                                .await?;
                        }
                    }
                }
                metadata
            }
            _ => mailbox.g_metadata(remote_uids).await?,
        };

        self.cache.set(&key, metadata.clone()).await;
        self.store
            .upsert_checkpoint(account_id, folder, select_info.uidvalidity, select_info.highestmodseq)
            .await?;
        Ok(metadata)
    }

    /// §8 invariant 7: after this, no FolderItem has `uid ∈ local \ remote`.
    async fn remove_deleted_messages(&self, folder: &str, local_uids: &[u32], remote_uids: &[u32]) -> SyncResult<()> {
        let remote_set: HashSet<u32> = remote_uids.iter().copied().collect();
        let stale: Vec<u32> = local_uids.iter().copied().filter(|u| !remote_set.contains(u)).collect();
        if !stale.is_empty() {
            debug!(
                "account {} folder {} removing {} deleted uids",
                self.account.id,
                folder,
                stale.len()
            );
            self.store.delete_folder_items(self.account.id, folder, &stale).await?;
        }
        Ok(())
    }

    /// §4.3 deduplicated chunked download. Returns every `(uid, Message)` pair
    /// now bound to `folder_name`, whether newly downloaded or already known.
    async fn dedup_download(
        &self,
        mailbox: &dyn RemoteMailbox,
        folder_name: &str,
        candidate_uids: &[u32],
        remote_meta: &GMetadataMap,
    ) -> SyncResult<Vec<(u32, Message)>> {
        if candidate_uids.is_empty() {
            return Ok(Vec::new());
        }
        let account_id = self.account.id;
        let mut results = Vec::with_capacity(candidate_uids.len());

        let mut full_download = Vec::new();
        let mut folderitem_only = Vec::new();
        for &uid in candidate_uids {
            let msgid = remote_meta.get(&uid).and_then(|m| m.msgid).map(|m| m.to_string());
            match msgid {
                Some(msgid) => match self.store.find_message_by_provider_msgid(account_id, &msgid).await? {
                    Some(existing) => folderitem_only.push((uid, existing)),
                    None => full_download.push(uid),
                },
                None => full_download.push(uid),
            }
        }

        if !folderitem_only.is_empty() {
            let uids: Vec<u32> = folderitem_only.iter().map(|(uid, _)| *uid).collect();
            let flags = mailbox.flags(&uids).await?;
            for (uid, message) in folderitem_only {
                let (flags_vec, labels_vec) = flags.get(&uid).cloned().unwrap_or_default();
                self.store
                    .upsert_folder_item(&FolderItem {
                        account_id,
                        folder_name: folder_name.to_string(),
                        uid,
                        message_id: message.id,
                        flags: flags_vec,
                        labels: labels_vec,
                    })
                    .await?;
                results.push((uid, message));
            }
        }

        if !full_download.is_empty() {
            full_download.sort_unstable_by(|a, b| b.cmp(a));
            let chunk_size = mailbox.chunk_size().max(1);
            let total = full_download.len();
            let mut done = 0usize;

            for chunk in full_download.chunks(chunk_size) {
                let raw_messages = mailbox.uids(chunk).await?;

                let mut pending = Vec::with_capacity(raw_messages.len());
                for raw in &raw_messages {
                    let meta = remote_meta.get(&raw.uid).copied().unwrap_or(RemoteMeta { msgid: None, thrid: None });
                    let key = blob_key(&raw.rfc822);
                    let part = MimePart {
                        content_type: "message/rfc822".to_string(),
                        blob_key: key.clone(),
                        size_bytes: raw.rfc822.len() as u64,
                    };
                    let message = Message {
                        id: 0,
                        account_id,
                        provider_msgid: meta.msgid.map(|m| m.to_string()),
                        provider_thrid: meta.thrid.map(|t| t.to_string()),
                        subject: extract_header(&raw.rfc822, "Subject"),
                        from_address: extract_header(&raw.rfc822, "From"),
                        internal_date: raw.internal_date,
                        parts: vec![part],
                    };
                    pending.push((raw.uid, key, raw.rfc822.clone(), message, raw.flags.clone(), raw.labels.clone()));
                }

                let puts = pending.iter().map(|(_, key, bytes, ..)| self.blobs.put(key, bytes));
                for result in futures_util::future::join_all(puts).await {
                    result?;
                }

                let batch: Vec<Message> = pending.iter().map(|(_, _, _, message, _, _)| message.clone()).collect();
                self.threads.submit(batch).await;

                for (uid, _key, _bytes, message, flags, labels) in pending {
                    let message_id = self.store.insert_message(&message).await?;
                    let mut stored = message;
                    stored.id = message_id;
                    self.store
                        .upsert_folder_item(&FolderItem {
                            account_id,
                            folder_name: folder_name.to_string(),
                            uid,
                            message_id,
                            flags,
                            labels,
                        })
                        .await?;
                    results.push((uid, stored));
                }

                done += raw_messages.len();
                if self.search_index.is_enabled() {
                    self.search_index.notify(self.account.namespace_id).await;
                }
                (self.status_callback)(
                    account_id,
                    SyncProgress {
                        folder_name: folder_name.to_string(),
                        phase: "initial",
                        detail: format!("{}", (done * 100 / total.max(1))),
                    },
                );
            }
        }

        Ok(results)
    }

    /// §4.2 expanded-thread download.
    async fn expanded_thread_download(
        &self,
        mailbox: &dyn RemoteMailbox,
        original_folder: &str,
        metadata: &GMetadataMap,
        flags_map: &HashMap<u32, (Vec<String>, Vec<String>)>,
    ) -> SyncResult<()> {
        let account_id = self.account.id;
        let all_mail = self
            .account
            .provider
            .all_mail_folder()
            .ok_or_else(|| SyncError::Fatal("expanded-thread download requires a Gmail All Mail folder".to_string()))?
            .to_string();

        let checkpoint = self.store.get_checkpoint(account_id, &all_mail).await?;
        let cb = Self::validity_callback(checkpoint);
        let select_info = mailbox.select_folder(&all_mail, &cb).await?;
        self.store
            .upsert_checkpoint(account_id, &all_mail, select_info.uidvalidity, select_info.highestmodseq)
            .await?;

        let mut all_thrids: Vec<u64> = metadata.values().filter_map(|m| m.thrid).collect();
        all_thrids.sort_unstable_by(|a, b| b.cmp(a));
        all_thrids.dedup();

        let msgid_to_original_uid: HashMap<String, u32> = metadata
            .iter()
            .filter_map(|(uid, m)| m.msgid.map(|msgid| (msgid.to_string(), *uid)))
            .collect();

        for thrid_chunk in all_thrids.chunks(500) {
            let candidate_uids = mailbox.expand_threads(thrid_chunk).await?;
            if candidate_uids.is_empty() {
                continue;
            }
            let candidate_meta = mailbox.g_metadata(&candidate_uids).await?;

            let mut by_thrid: HashMap<u64, Vec<u32>> = HashMap::new();
            for &uid in &candidate_uids {
                if let Some(thrid) = candidate_meta.get(&uid).and_then(|m| m.thrid) {
                    by_thrid.entry(thrid).or_default().push(uid);
                }
            }

            for &thrid in thrid_chunk {
                let Some(mut uids) = by_thrid.remove(&thrid) else {
                    continue;
                };
                uids.sort_unstable_by(|a, b| b.cmp(a));

                let downloaded = self.dedup_download(mailbox, &all_mail, &uids, &candidate_meta).await?;

                for (_all_mail_uid, message) in &downloaded {
                    if let Some(msgid) = &message.provider_msgid {
                        if let Some(&orig_uid) = msgid_to_original_uid.get(msgid) {
                            let (flags, labels) = flags_map.get(&orig_uid).cloned().unwrap_or_default();
                            self.store
                                .upsert_folder_item(&FolderItem {
                                    account_id,
                                    folder_name: original_folder.to_string(),
                                    uid: orig_uid,
                                    message_id: message.id,
                                    flags,
                                    labels,
                                })
                                .await?;
                        }
                    }
                }

                (self.status_callback)(
                    account_id,
                    SyncProgress {
                        folder_name: original_folder.to_string(),
                        phase: "initial",
                        detail: format!("thread {} done", thrid),
                    },
                );
            }
        }

        self.cache.remove(&g_metadata_key(account_id, &all_mail)).await;
        Ok(())
    }

    /// §4.1 poll algorithm.
    async fn poll(&self) -> SyncResult<SyncState> {
        let account_id = self.account.id;
        let folder = self.folder_name.clone();
        let conn = self.pool.lease(&self.account).await?;

        let checkpoint = self.store.get_checkpoint(account_id, &folder).await?;
        let status = conn.folder_status(&folder).await?;

        if checkpoint.map_or(true, |cp| status.highestmodseq > cp.highestmodseq) {
            let cb = Self::validity_callback(checkpoint);
            let select_info = conn.select_folder(&folder, &cb).await?;
            self.modseq_delta(&*conn, &folder, checkpoint, select_info).await?;
        }

        (self.status_callback)(
            account_id,
            SyncProgress {
                folder_name: folder.clone(),
                phase: "poll",
                detail: Utc::now().to_rfc3339(),
            },
        );

        drop(conn);
        sleep(self.config.poll_frequency).await;
        Ok(SyncState::Poll)
    }

    /// §4.4 MODSEQ delta.
    async fn modseq_delta(
        &self,
        mailbox: &dyn RemoteMailbox,
        folder: &str,
        checkpoint: Option<crate::model::UidValidityCheckpoint>,
        select_info: SelectInfo,
    ) -> SyncResult<()> {
        let account_id = self.account.id;
        let since = checkpoint.map(|c| c.highestmodseq).unwrap_or(0);
        let changed = mailbox.new_and_updated_uids(since).await?;

        let remote_uids = mailbox.all_uids().await?;
        let local_uids = self.store.local_uids(account_id, folder).await?;
        self.remove_deleted_messages(folder, &local_uids, &remote_uids).await?;

        let local_set: HashSet<u32> = local_uids.iter().copied().collect();
        let (new_uids, updated_uids): (Vec<u32>, Vec<u32>) = changed.into_iter().partition(|u| !local_set.contains(u));

        let cache_key = g_metadata_key(account_id, folder);
        let mut remote_meta = self.cache.get(&cache_key).await.unwrap_or_default();
        if !new_uids.is_empty() {
            let fresh = mailbox.g_metadata(&new_uids).await?;
            remote_meta.extend(fresh);
            self.cache.set(&cache_key, remote_meta.clone()).await;
        }

        if !new_uids.is_empty() {
            if self.account.provider.capabilities().has_labels && !self.account.provider.is_all_mail(folder) {
                let flags_map = mailbox.flags(&new_uids).await?;
                self.expanded_thread_download(mailbox, folder, &remote_meta, &flags_map).await?;
            } else {
                self.dedup_download(mailbox, folder, &new_uids, &remote_meta).await?;
            }
        }

        if !updated_uids.is_empty() {
            let flags = mailbox.flags(&updated_uids).await?;
            for (uid, (flags_vec, labels_vec)) in flags {
                self.store.update_folder_item_flags(account_id, folder, uid, flags_vec, labels_vec).await?;
            }
        }

        self.store
            .upsert_checkpoint(account_id, folder, select_info.uidvalidity, select_info.highestmodseq)
            .await?;
        Ok(())
    }

    /// UID-invalid recovery (§9 Open Question (a), implemented for real): remaps
    /// `FolderItem.uid` by matching `provider_msgid`, downloads nothing.
    async fn resync_uids(&self, state: SyncState) -> SyncResult<SyncState> {
        let account_id = self.account.id;
        let folder = self.folder_name.clone();
        let conn = self.pool.lease(&self.account).await?;

        // No validity callback here: a mismatch is exactly what brought us to
        // this handler, and it is resolved by rewriting the checkpoint below,
        // not by rejecting the new UIDVALIDITY.
        let select_info = conn.select_folder(&folder, &|_, _| Ok(())).await?;
        let remote_uids = conn.all_uids().await?;
        let remote_meta = conn.g_metadata(&remote_uids).await?;

        let local_msgid_to_uid = self.store.folder_items_by_provider_msgid(account_id, &folder).await?;

        for &uid in &remote_uids {
            if let Some(msgid) = remote_meta.get(&uid).and_then(|m| m.msgid).map(|m| m.to_string()) {
                if let Some(&old_uid) = local_msgid_to_uid.get(&msgid) {
                    if old_uid != uid {
                        self.store.rewrite_folder_item_uid(account_id, &folder, old_uid, uid).await?;
                    }
                }
            }
        }

        self.store
            .upsert_checkpoint(account_id, &folder, select_info.uidvalidity, select_info.highestmodseq)
            .await?;
        Ok(state.recovery_target())
    }
}

/// Non-cryptographic content address (§9's "Trimmed" notes drop `sha2`; the
/// core's invariant only needs idempotence, not collision-resistance).
fn blob_key(bytes: &[u8]) -> String {
    let mut hasher = DefaultHasher::new();
    bytes.hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}

/// Crude single-pass header scan. Full MIME parsing/rendering is a non-goal;
/// this exists only to populate the two display fields `Message` carries.
fn extract_header(rfc822: &[u8], name: &str) -> Option<String> {
    let text = String::from_utf8_lossy(rfc822);
    let prefix = format!("{}:", name);
    for line in text.lines() {
        if line.len() > prefix.len() && line[..prefix.len()].eq_ignore_ascii_case(&prefix) {
            return Some(line[prefix.len()..].trim().to_string());
        }
        if line.is_empty() {
            break;
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blob_key_is_stable_for_identical_content() {
        assert_eq!(blob_key(b"hello"), blob_key(b"hello"));
        assert_ne!(blob_key(b"hello"), blob_key(b"world"));
    }

    #[test]
    fn extract_header_reads_subject_and_from() {
        let raw = b"From: a@example.com\r\nSubject: hi there\r\n\r\nbody";
        assert_eq!(extract_header(raw, "Subject").as_deref(), Some("hi there"));
        assert_eq!(extract_header(raw, "From").as_deref(), Some("a@example.com"));
        assert_eq!(extract_header(raw, "Missing"), None);
    }
}
