// Copyright (c) 2025 TexasFortress.AI
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Persistence boundary. [`MetadataStore`] is the trait the sync core talks to;
//! [`sqlite::SqlxMetadataStore`] is the one concrete, production-shaped backend
//! this crate ships.

pub mod error;
pub mod sqlite;

pub use error::StoreError;

use async_trait::async_trait;
use std::collections::HashMap;

use crate::model::{Account, FolderItem, Message, SyncState, Thread, UidValidityCheckpoint};

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait MetadataStore: Send + Sync {
    // -- accounts / host affinity --
    async fn get_account(&self, account_id: i64) -> StoreResult<Option<Account>>;
    async fn all_accounts(&self) -> StoreResult<Vec<Account>>;
    async fn accounts_with_sync_host(&self) -> StoreResult<Vec<Account>>;
    async fn find_account_by_email(&self, email: &str) -> StoreResult<Option<Account>>;

    /// Compare-and-swap style claim: succeeds (true) only if the account is
    /// currently idle, atomically setting `sync_host`. This is the core's
    /// host-affinity lock, a `MetadataStore`-backed stand-in for the original's
    /// external lock service (out of scope here).
    async fn claim_sync_host(&self, account_id: i64, fqdn: &str) -> StoreResult<bool>;
    async fn release_sync_host(&self, account_id: i64, fqdn: &str) -> StoreResult<()>;

    // -- folder progress --
    async fn load_folder_state(&self, account_id: i64, folder_name: &str) -> StoreResult<Option<SyncState>>;
    async fn save_folder_state(&self, account_id: i64, folder_name: &str, state: SyncState) -> StoreResult<()>;

    // -- UID validity checkpoints --
    async fn get_checkpoint(
        &self,
        account_id: i64,
        folder_name: &str,
    ) -> StoreResult<Option<UidValidityCheckpoint>>;
    async fn upsert_checkpoint(
        &self,
        account_id: i64,
        folder_name: &str,
        uidvalidity: u32,
        highestmodseq: u64,
    ) -> StoreResult<()>;

    // -- folder items / messages --
    async fn local_uids(&self, account_id: i64, folder_name: &str) -> StoreResult<Vec<u32>>;
    async fn find_message_by_provider_msgid(&self, account_id: i64, provider_msgid: &str) -> StoreResult<Option<Message>>;
    async fn insert_message(&self, message: &Message) -> StoreResult<i64>;
    async fn upsert_folder_item(&self, item: &FolderItem) -> StoreResult<()>;
    async fn delete_folder_items(&self, account_id: i64, folder_name: &str, uids: &[u32]) -> StoreResult<()>;
    async fn rewrite_folder_item_uid(
        &self,
        account_id: i64,
        folder_name: &str,
        old_uid: u32,
        new_uid: u32,
    ) -> StoreResult<()>;
    async fn folder_items_by_provider_msgid(
        &self,
        account_id: i64,
        folder_name: &str,
    ) -> StoreResult<HashMap<String, u32>>;
    async fn update_folder_item_flags(
        &self,
        account_id: i64,
        folder_name: &str,
        uid: u32,
        flags: Vec<String>,
        labels: Vec<String>,
    ) -> StoreResult<()>;

    // -- threads --
    async fn get_or_create_thread(&self, account_id: i64, provider_thrid: Option<&str>) -> StoreResult<Thread>;
    async fn update_thread(&self, thread: &Thread) -> StoreResult<()>;
}
