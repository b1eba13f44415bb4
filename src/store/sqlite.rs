// Copyright (c) 2025 TexasFortress.AI
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! `sqlx`/SQLite-backed [`MetadataStore`]. Grounded on
//! `dashboard/services/cache.rs::CacheService`: pool setup via
//! `SqlitePoolOptions` + `sqlx::migrate!`, and an `INSERT ... ON CONFLICT DO
//! UPDATE ... RETURNING id` upsert idiom reused here for folder items and
//! threads. A small `lru::LruCache` mirrors the teacher's in-memory
//! folder-id cache, fronting the hottest lookup (message-by-provider-msgid).

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Mutex as StdMutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lru::LruCache;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, SqlitePool};

use crate::model::{
    account::{Provider, ProviderCapabilities},
    Account, FolderItem, Message, MimePart, SyncState, Thread, UidValidityCheckpoint,
};

use super::{error::StoreError, MetadataStore, StoreResult};

pub struct SqlxMetadataStore {
    pool: SqlitePool,
    msgid_cache: StdMutex<LruCache<(i64, String), i64>>,
}

impl SqlxMetadataStore {
    pub async fn initialize(database_url: &str) -> StoreResult<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect(database_url)
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self {
            pool,
            msgid_cache: StdMutex::new(LruCache::new(NonZeroUsize::new(4096).unwrap())),
        })
    }

    fn account_from_row(row: &sqlx::sqlite::SqliteRow) -> Account {
        let kind: String = row.get("provider_kind");
        let provider = if kind == "gmail" {
            Provider::Gmail {
                all_mail_folder: row
                    .get::<Option<String>, _>("provider_all_mail_folder")
                    .unwrap_or_else(|| "[Gmail]/All Mail".to_string()),
            }
        } else {
            Provider::Imap
        };
        let _ = ProviderCapabilities::plain_imap(); // capabilities derived lazily from `provider`
        Account {
            id: row.get("id"),
            email_address: row.get("email_address"),
            namespace_id: row.get("namespace_id"),
            provider,
            imap_host: row.get("imap_host"),
            imap_port: row.get::<i64, _>("imap_port") as u16,
            imap_user: row.get("imap_user"),
            sync_host: row.get("sync_host"),
            sync_active: row.get::<i64, _>("sync_active") != 0,
        }
    }
}

#[async_trait]
impl MetadataStore for SqlxMetadataStore {
    async fn get_account(&self, account_id: i64) -> StoreResult<Option<Account>> {
        let row = sqlx::query("SELECT * FROM accounts WHERE id = ?")
            .bind(account_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(Self::account_from_row))
    }

    async fn all_accounts(&self) -> StoreResult<Vec<Account>> {
        let rows = sqlx::query("SELECT * FROM accounts").fetch_all(&self.pool).await?;
        Ok(rows.iter().map(Self::account_from_row).collect())
    }

    async fn accounts_with_sync_host(&self) -> StoreResult<Vec<Account>> {
        let rows = sqlx::query("SELECT * FROM accounts WHERE sync_host IS NOT NULL")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(Self::account_from_row).collect())
    }

    async fn find_account_by_email(&self, email: &str) -> StoreResult<Option<Account>> {
        let row = sqlx::query("SELECT * FROM accounts WHERE email_address = ?")
            .bind(email)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(Self::account_from_row))
    }

    async fn claim_sync_host(&self, account_id: i64, fqdn: &str) -> StoreResult<bool> {
        let result = sqlx::query(
            "UPDATE accounts SET sync_host = ?, sync_active = 1 WHERE id = ? AND sync_host IS NULL",
        )
        .bind(fqdn)
        .bind(account_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn release_sync_host(&self, account_id: i64, fqdn: &str) -> StoreResult<()> {
        sqlx::query(
            "UPDATE accounts SET sync_host = NULL, sync_active = 0 WHERE id = ? AND sync_host = ?",
        )
        .bind(account_id)
        .bind(fqdn)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn load_folder_state(&self, account_id: i64, folder_name: &str) -> StoreResult<Option<SyncState>> {
        let row = sqlx::query("SELECT state FROM folder_sync_progress WHERE account_id = ? AND folder_name = ?")
            .bind(account_id)
            .bind(folder_name)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| {
            let state: String = r.get("state");
            match state.as_str() {
                "initial" => SyncState::Initial,
                "initial-uidinvalid" => SyncState::InitialUidInvalid,
                "poll" => SyncState::Poll,
                "poll-uidinvalid" => SyncState::PollUidInvalid,
                _ => SyncState::Finish,
            }
        }))
    }

    async fn save_folder_state(&self, account_id: i64, folder_name: &str, state: SyncState) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO folder_sync_progress (account_id, folder_name, state) VALUES (?, ?, ?)
             ON CONFLICT(account_id, folder_name) DO UPDATE SET state = excluded.state",
        )
        .bind(account_id)
        .bind(folder_name)
        .bind(state.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_checkpoint(
        &self,
        account_id: i64,
        folder_name: &str,
    ) -> StoreResult<Option<UidValidityCheckpoint>> {
        let row = sqlx::query(
            "SELECT uidvalidity, highestmodseq FROM uid_validity_checkpoints WHERE account_id = ? AND folder_name = ?",
        )
        .bind(account_id)
        .bind(folder_name)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| UidValidityCheckpoint {
            account_id,
            uidvalidity: r.get::<i64, _>("uidvalidity") as u32,
            highestmodseq: r.get::<i64, _>("highestmodseq") as u64,
        }))
    }

    async fn upsert_checkpoint(
        &self,
        account_id: i64,
        folder_name: &str,
        uidvalidity: u32,
        highestmodseq: u64,
    ) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO uid_validity_checkpoints (account_id, folder_name, uidvalidity, highestmodseq)
             VALUES (?, ?, ?, ?)
             ON CONFLICT(account_id, folder_name) DO UPDATE SET
                uidvalidity = excluded.uidvalidity, highestmodseq = excluded.highestmodseq",
        )
        .bind(account_id)
        .bind(folder_name)
        .bind(uidvalidity as i64)
        .bind(highestmodseq as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn local_uids(&self, account_id: i64, folder_name: &str) -> StoreResult<Vec<u32>> {
        let rows = sqlx::query("SELECT uid FROM folder_items WHERE account_id = ? AND folder_name = ?")
            .bind(account_id)
            .bind(folder_name)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(|r| r.get::<i64, _>("uid") as u32).collect())
    }

    async fn find_message_by_provider_msgid(&self, account_id: i64, provider_msgid: &str) -> StoreResult<Option<Message>> {
        let key = (account_id, provider_msgid.to_string());
        if let Some(id) = self.msgid_cache.lock().unwrap().get(&key).copied() {
            return self.get_message_by_id(id).await;
        }
        let row = sqlx::query("SELECT * FROM messages WHERE account_id = ? AND provider_msgid = ?")
            .bind(account_id)
            .bind(provider_msgid)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => {
                let msg = Self::message_from_row(&row)?;
                self.msgid_cache.lock().unwrap().put(key, msg.id);
                Ok(Some(msg))
            }
            None => Ok(None),
        }
    }

    async fn insert_message(&self, message: &Message) -> StoreResult<i64> {
        let parts_json = serde_json::to_string(&message.parts)?;
        let row = sqlx::query(
            "INSERT INTO messages (account_id, provider_msgid, provider_thrid, subject, from_address, internal_date, parts_json)
             VALUES (?, ?, ?, ?, ?, ?, ?) RETURNING id",
        )
        .bind(message.account_id)
        .bind(&message.provider_msgid)
        .bind(&message.provider_thrid)
        .bind(&message.subject)
        .bind(&message.from_address)
        .bind(message.internal_date.map(|d| d.to_rfc3339()))
        .bind(parts_json)
        .fetch_one(&self.pool)
        .await?;
        let id: i64 = row.get("id");
        if let Some(msgid) = &message.provider_msgid {
            self.msgid_cache
                .lock()
                .unwrap()
                .put((message.account_id, msgid.clone()), id);
        }
        Ok(id)
    }

    async fn upsert_folder_item(&self, item: &FolderItem) -> StoreResult<()> {
        let flags_json = serde_json::to_string(&item.flags)?;
        let labels_json = serde_json::to_string(&item.labels)?;
        sqlx::query(
            "INSERT INTO folder_items (account_id, folder_name, uid, message_id, flags_json, labels_json)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT(account_id, folder_name, uid) DO UPDATE SET
                message_id = excluded.message_id, flags_json = excluded.flags_json, labels_json = excluded.labels_json",
        )
        .bind(item.account_id)
        .bind(&item.folder_name)
        .bind(item.uid as i64)
        .bind(item.message_id)
        .bind(flags_json)
        .bind(labels_json)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_folder_items(&self, account_id: i64, folder_name: &str, uids: &[u32]) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;
        for uid in uids {
            sqlx::query("DELETE FROM folder_items WHERE account_id = ? AND folder_name = ? AND uid = ?")
                .bind(account_id)
                .bind(folder_name)
                .bind(*uid as i64)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn rewrite_folder_item_uid(
        &self,
        account_id: i64,
        folder_name: &str,
        old_uid: u32,
        new_uid: u32,
    ) -> StoreResult<()> {
        sqlx::query("UPDATE folder_items SET uid = ? WHERE account_id = ? AND folder_name = ? AND uid = ?")
            .bind(new_uid as i64)
            .bind(account_id)
            .bind(folder_name)
            .bind(old_uid as i64)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn folder_items_by_provider_msgid(
        &self,
        account_id: i64,
        folder_name: &str,
    ) -> StoreResult<HashMap<String, u32>> {
        let rows = sqlx::query(
            "SELECT fi.uid as uid, m.provider_msgid as provider_msgid
             FROM folder_items fi JOIN messages m ON m.id = fi.message_id
             WHERE fi.account_id = ? AND fi.folder_name = ? AND m.provider_msgid IS NOT NULL",
        )
        .bind(account_id)
        .bind(folder_name)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .filter_map(|r| {
                let msgid: Option<String> = r.get("provider_msgid");
                msgid.map(|m| (m, r.get::<i64, _>("uid") as u32))
            })
            .collect())
    }

    async fn update_folder_item_flags(
        &self,
        account_id: i64,
        folder_name: &str,
        uid: u32,
        flags: Vec<String>,
        labels: Vec<String>,
    ) -> StoreResult<()> {
        sqlx::query("UPDATE folder_items SET flags_json = ?, labels_json = ? WHERE account_id = ? AND folder_name = ? AND uid = ?")
            .bind(serde_json::to_string(&flags)?)
            .bind(serde_json::to_string(&labels)?)
            .bind(account_id)
            .bind(folder_name)
            .bind(uid as i64)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get_or_create_thread(&self, account_id: i64, provider_thrid: Option<&str>) -> StoreResult<Thread> {
        if let Some(thrid) = provider_thrid {
            if let Some(row) = sqlx::query("SELECT * FROM threads WHERE account_id = ? AND provider_thrid = ?")
                .bind(account_id)
                .bind(thrid)
                .fetch_optional(&self.pool)
                .await?
            {
                return Ok(Self::thread_from_row(&row));
            }
        }
        let row = sqlx::query(
            "INSERT INTO threads (account_id, provider_thrid) VALUES (?, ?) RETURNING id",
        )
        .bind(account_id)
        .bind(provider_thrid)
        .fetch_one(&self.pool)
        .await?;
        Ok(Thread {
            id: row.get("id"),
            account_id,
            provider_thrid: provider_thrid.map(str::to_string),
            subject: None,
            latest_date: None,
        })
    }

    async fn update_thread(&self, thread: &Thread) -> StoreResult<()> {
        sqlx::query("UPDATE threads SET subject = ?, latest_date = ? WHERE id = ?")
            .bind(&thread.subject)
            .bind(thread.latest_date.map(|d| d.to_rfc3339()))
            .bind(thread.id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

impl SqlxMetadataStore {
    async fn get_message_by_id(&self, id: i64) -> StoreResult<Option<Message>> {
        let row = sqlx::query("SELECT * FROM messages WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::message_from_row).transpose()
    }

    fn message_from_row(row: &sqlx::sqlite::SqliteRow) -> StoreResult<Message> {
        let parts_json: String = row.get("parts_json");
        let parts: Vec<MimePart> = serde_json::from_str(&parts_json)?;
        let internal_date: Option<String> = row.get("internal_date");
        Ok(Message {
            id: row.get("id"),
            account_id: row.get("account_id"),
            provider_msgid: row.get("provider_msgid"),
            provider_thrid: row.get("provider_thrid"),
            subject: row.get("subject"),
            from_address: row.get("from_address"),
            internal_date: internal_date.and_then(|d| DateTime::parse_from_rfc3339(&d).ok()).map(|d| d.with_timezone(&Utc)),
            parts,
        })
    }

    fn thread_from_row(row: &sqlx::sqlite::SqliteRow) -> Thread {
        let latest_date: Option<String> = row.get("latest_date");
        Thread {
            id: row.get("id"),
            account_id: row.get("account_id"),
            provider_thrid: row.get("provider_thrid"),
            subject: row.get("subject"),
            latest_date: latest_date.and_then(|d| DateTime::parse_from_rfc3339(&d).ok()).map(|d| d.with_timezone(&Utc)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn store_with_account() -> (SqlxMetadataStore, i64) {
        let store = SqlxMetadataStore::initialize("sqlite::memory:").await.unwrap();
        sqlx::query(
            "INSERT INTO accounts (id, email_address, namespace_id, provider_kind, imap_host, imap_port, imap_user)
             VALUES (1, 'a@example.com', 1, 'imap', 'imap.example.com', 993, 'a@example.com')",
        )
        .execute(&store.pool)
        .await
        .unwrap();
        (store, 1)
    }

    #[tokio::test]
    async fn folder_state_round_trips() {
        let (store, account_id) = store_with_account().await;
        assert_eq!(store.load_folder_state(account_id, "INBOX").await.unwrap(), None);

        store.save_folder_state(account_id, "INBOX", SyncState::Initial).await.unwrap();
        assert_eq!(store.load_folder_state(account_id, "INBOX").await.unwrap(), Some(SyncState::Initial));

        store.save_folder_state(account_id, "INBOX", SyncState::Poll).await.unwrap();
        assert_eq!(store.load_folder_state(account_id, "INBOX").await.unwrap(), Some(SyncState::Poll));
    }

    #[tokio::test]
    async fn checkpoint_upsert_overwrites_prior_value() {
        let (store, account_id) = store_with_account().await;
        assert!(store.get_checkpoint(account_id, "INBOX").await.unwrap().is_none());

        store.upsert_checkpoint(account_id, "INBOX", 100, 5).await.unwrap();
        store.upsert_checkpoint(account_id, "INBOX", 100, 9).await.unwrap();

        let checkpoint = store.get_checkpoint(account_id, "INBOX").await.unwrap().unwrap();
        assert_eq!(checkpoint.uidvalidity, 100);
        assert_eq!(checkpoint.highestmodseq, 9);
    }

    #[tokio::test]
    async fn folder_item_and_message_insert_then_lookup_by_msgid() {
        let (store, account_id) = store_with_account().await;
        let message = Message {
            id: 0,
            account_id,
            provider_msgid: Some("m1".to_string()),
            provider_thrid: Some("t1".to_string()),
            subject: Some("hi".to_string()),
            from_address: Some("a@example.com".to_string()),
            internal_date: None,
            parts: Vec::new(),
        };
        let message_id = store.insert_message(&message).await.unwrap();

        store
            .upsert_folder_item(&FolderItem {
                account_id,
                folder_name: "INBOX".to_string(),
                uid: 42,
                message_id,
                flags: vec!["\\Seen".to_string()],
                labels: Vec::new(),
            })
            .await
            .unwrap();

        assert_eq!(store.local_uids(account_id, "INBOX").await.unwrap(), vec![42]);

        let found = store.find_message_by_provider_msgid(account_id, "m1").await.unwrap().unwrap();
        assert_eq!(found.id, message_id);
        assert_eq!(found.subject.as_deref(), Some("hi"));
    }

    #[tokio::test]
    async fn delete_folder_items_removes_only_the_given_uids() {
        let (store, account_id) = store_with_account().await;
        let message_id = store
            .insert_message(&Message {
                id: 0,
                account_id,
                provider_msgid: None,
                provider_thrid: None,
                subject: None,
                from_address: None,
                internal_date: None,
                parts: Vec::new(),
            })
            .await
            .unwrap();
        for uid in [1u32, 2, 3] {
            store
                .upsert_folder_item(&FolderItem {
                    account_id,
                    folder_name: "INBOX".to_string(),
                    uid,
                    message_id,
                    flags: Vec::new(),
                    labels: Vec::new(),
                })
                .await
                .unwrap();
        }

        store.delete_folder_items(account_id, "INBOX", &[2]).await.unwrap();

        let mut remaining = store.local_uids(account_id, "INBOX").await.unwrap();
        remaining.sort_unstable();
        assert_eq!(remaining, vec![1, 3]);
    }

    #[tokio::test]
    async fn rewrite_folder_item_uid_moves_the_row() {
        let (store, account_id) = store_with_account().await;
        let message_id = store
            .insert_message(&Message {
                id: 0,
                account_id,
                provider_msgid: Some("m1".to_string()),
                provider_thrid: None,
                subject: None,
                from_address: None,
                internal_date: None,
                parts: Vec::new(),
            })
            .await
            .unwrap();
        store
            .upsert_folder_item(&FolderItem {
                account_id,
                folder_name: "INBOX".to_string(),
                uid: 7,
                message_id,
                flags: Vec::new(),
                labels: Vec::new(),
            })
            .await
            .unwrap();

        store.rewrite_folder_item_uid(account_id, "INBOX", 7, 99).await.unwrap();

        assert_eq!(store.local_uids(account_id, "INBOX").await.unwrap(), vec![99]);
        let by_msgid = store.folder_items_by_provider_msgid(account_id, "INBOX").await.unwrap();
        assert_eq!(by_msgid.get("m1"), Some(&99));
    }

    #[tokio::test]
    async fn claim_sync_host_is_exclusive() {
        let (store, account_id) = store_with_account().await;
        assert!(store.claim_sync_host(account_id, "host-a").await.unwrap());
        assert!(!store.claim_sync_host(account_id, "host-b").await.unwrap());

        store.release_sync_host(account_id, "host-a").await.unwrap();
        assert!(store.claim_sync_host(account_id, "host-b").await.unwrap());
    }

    #[tokio::test]
    async fn get_or_create_thread_is_stable_per_thrid() {
        let (store, account_id) = store_with_account().await;
        let t1 = store.get_or_create_thread(account_id, Some("T1")).await.unwrap();
        let t1_again = store.get_or_create_thread(account_id, Some("T1")).await.unwrap();
        let t2 = store.get_or_create_thread(account_id, Some("T2")).await.unwrap();

        assert_eq!(t1.id, t1_again.id);
        assert_ne!(t1.id, t2.id);
    }
}
