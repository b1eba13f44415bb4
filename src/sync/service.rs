// Copyright (c) 2025 TexasFortress.AI
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Process-wide control plane (§4.7). Holds the account-supervisor registry,
//! the status map workers publish into, and the host-affinity lock. Grounded
//! on `original_source`'s `SyncService`, with the host lock reworked as a
//! `MetadataStore` compare-and-swap (`claim_sync_host`/`release_sync_host`)
//! since no external lock service is in scope here.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use log::{error, info};
use serde::Serialize;
use tokio::task::JoinHandle;

use crate::blob::BlobStore;
use crate::cache::MetaCache;
use crate::model::Account;
use crate::remote::pool::ConnectionPool;
use crate::search_index::SearchIndexNotifier;
use crate::store::MetadataStore;

use super::errors::SyncResult;
use super::folder_worker::{StatusCallback, SyncProgress};
use super::supervisor::{AccountSyncSupervisor, AccountSyncSupervisorConfig, AccountSyncSupervisorHandle};

/// Either a single RPC-style result string, or one per targeted account —
/// the two return shapes `start_sync`/`stop_sync` can take depending on
/// whether `email_address` was given (§6).
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum SyncOpResult {
    Single(String),
    Many(HashMap<String, String>),
}

type StatusKey = (i64, String);
type StatusValue = (String, String);

pub struct SyncServiceConfig {
    pub fqdn: String,
    pub supervisor: AccountSyncSupervisorConfig,
}

pub struct SyncService {
    store: Arc<dyn MetadataStore>,
    blobs: Arc<dyn BlobStore>,
    cache: Arc<dyn MetaCache>,
    pool: Arc<ConnectionPool>,
    search_index: Arc<dyn SearchIndexNotifier>,
    config: SyncServiceConfig,
    monitors: DashMap<i64, (JoinHandle<()>, AccountSyncSupervisorHandle)>,
    statuses: Arc<DashMap<StatusKey, StatusValue>>,
}

impl SyncService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn MetadataStore>,
        blobs: Arc<dyn BlobStore>,
        cache: Arc<dyn MetaCache>,
        pool: Arc<ConnectionPool>,
        search_index: Arc<dyn SearchIndexNotifier>,
        config: SyncServiceConfig,
    ) -> Self {
        Self {
            store,
            blobs,
            cache,
            pool,
            search_index,
            config,
            monitors: DashMap::new(),
            statuses: Arc::new(DashMap::new()),
        }
    }

    fn status_callback(&self) -> StatusCallback {
        let statuses = self.statuses.clone();
        Arc::new(move |account_id: i64, progress: SyncProgress| {
            statuses.insert((account_id, progress.folder_name), (progress.phase.to_string(), progress.detail));
        })
    }

    /// Startup rehydration (§4.7): restart supervisors for every account this
    /// host owned before the process last stopped. Accounts owned by a
    /// different host are left alone — they are presumed still running there.
    pub async fn rehydrate(&self) -> SyncResult<()> {
        let accounts = self.store.accounts_with_sync_host().await?;
        for account in accounts {
            if account.sync_host.as_deref() == Some(self.config.fqdn.as_str()) {
                info!("rehydrating account {} ({}) owned by this host", account.id, account.email_address);
                self.spawn_supervisor(account);
            }
        }
        Ok(())
    }

    fn spawn_supervisor(&self, account: Account) {
        let account_id = account.id;
        let supervisor = AccountSyncSupervisor::new(
            account,
            self.store.clone(),
            self.blobs.clone(),
            self.cache.clone(),
            self.pool.clone(),
            self.search_index.clone(),
            self.status_callback(),
            self.config.supervisor.clone(),
        );
        let (join, handle) = supervisor.spawn();
        self.monitors.insert(account_id, (join, handle));
    }

    async fn targets(&self, email_address: Option<&str>) -> SyncResult<Vec<Account>> {
        match email_address {
            Some(email) => Ok(self.store.find_account_by_email(email).await?.into_iter().collect()),
            None => Ok(self.store.all_accounts().await?.into_iter().filter(|a| a.sync_active).collect()),
        }
    }

    pub async fn start_sync(&self, email_address: Option<&str>) -> SyncOpResult {
        if let Some(email) = email_address {
            let accounts = match self.targets(Some(email)).await {
                Ok(accounts) => accounts,
                Err(err) => return SyncOpResult::Single(self.logged_error(err)),
            };
            return match accounts.into_iter().next() {
                Some(account) => SyncOpResult::Single(self.start_one(&account).await),
                None => SyncOpResult::Single("OK no such user".to_string()),
            };
        }

        let accounts = match self.targets(None).await {
            Ok(accounts) => accounts,
            Err(err) => return SyncOpResult::Single(self.logged_error(err)),
        };
        let mut results = HashMap::with_capacity(accounts.len());
        for account in accounts {
            let email = account.email_address.clone();
            let result = self.start_one(&account).await;
            results.insert(email, result);
        }
        SyncOpResult::Many(results)
    }

    async fn start_one(&self, account: &Account) -> String {
        if let Some(host) = &account.sync_host {
            if host != &self.config.fqdn {
                return format!("Account {} is syncing on host {}", account.email_address, host);
            }
            if self.monitors.contains_key(&account.id) {
                return "OK sync already started".to_string();
            }
        }

        match self.store.claim_sync_host(account.id, &self.config.fqdn).await {
            Ok(true) => {}
            Ok(false) => return "OK sync already started".to_string(),
            Err(err) => return self.logged_error(err.into()),
        }

        self.spawn_supervisor(account.clone());
        "OK sync started".to_string()
    }

    pub async fn stop_sync(&self, email_address: Option<&str>) -> SyncOpResult {
        if let Some(email) = email_address {
            let account = match self.store.find_account_by_email(email).await {
                Ok(account) => account,
                Err(err) => return SyncOpResult::Single(self.logged_error(err.into())),
            };
            return match account {
                Some(account) => SyncOpResult::Single(self.stop_one(&account).await),
                None => SyncOpResult::Single("OK no such user".to_string()),
            };
        }

        let account_ids: Vec<i64> = self.monitors.iter().map(|entry| *entry.key()).collect();
        let mut results = HashMap::with_capacity(account_ids.len());
        for account_id in account_ids {
            if let Ok(Some(account)) = self.store.get_account(account_id).await {
                let email = account.email_address.clone();
                let result = self.stop_one(&account).await;
                results.insert(email, result);
            }
        }
        SyncOpResult::Many(results)
    }

    async fn stop_one(&self, account: &Account) -> String {
        match self.monitors.remove(&account.id) {
            Some((_, (join, handle))) => {
                handle.shutdown().await;
                let _ = join.await;
                if let Err(err) = self.store.release_sync_host(account.id, &self.config.fqdn).await {
                    error!("account {} release_sync_host failed: {}", account.id, err);
                }
                "OK sync stopped".to_string()
            }
            None => "OK sync stopped already".to_string(),
        }
    }

    pub fn sync_status(&self, account_id: i64) -> Option<HashMap<String, (String, String)>> {
        let mut out = HashMap::new();
        for entry in self.statuses.iter() {
            let (id, folder) = entry.key();
            if *id == account_id {
                out.insert(folder.clone(), entry.value().clone());
            }
        }
        if out.is_empty() {
            None
        } else {
            Some(out)
        }
    }

    pub fn status(&self) -> HashMap<i64, HashMap<String, (String, String)>> {
        let mut out: HashMap<i64, HashMap<String, (String, String)>> = HashMap::new();
        for entry in self.statuses.iter() {
            let (id, folder) = entry.key();
            out.entry(*id).or_default().insert(folder.clone(), entry.value().clone());
        }
        out
    }

    /// Open Question (b): log before converting to the RPC-facing string,
    /// rather than the source's re-raise-before-log ordering.
    fn logged_error(&self, err: super::errors::SyncError) -> String {
        error!("sync RPC error: {}", err);
        format!("ERROR {}", err)
    }
}
