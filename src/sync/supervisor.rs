// Copyright (c) 2025 TexasFortress.AI
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Per-account supervisor (§4.6). Owns the account's `ThreadDetector`, lists
//! syncable folders, spawns one `FolderSyncWorker` per folder not already
//! `Finish`, serializing spawns so at most one folder is in `Initial` at a
//! time (providers rate-limit concurrent initial syncs by user shard), then
//! parks until told to shut down. Grounded on `original_source`'s
//! `MailSyncMonitor`.

use std::sync::Arc;
use std::time::Duration;

use log::{error, warn};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::sleep;

use crate::blob::BlobStore;
use crate::cache::MetaCache;
use crate::model::{Account, SyncState};
use crate::remote::pool::ConnectionPool;
use crate::search_index::SearchIndexNotifier;
use crate::store::MetadataStore;

use super::folder_worker::{FolderSyncWorker, FolderWorkerConfig, StatusCallback};
use super::thread_detector;

pub enum SupervisorCommand {
    Shutdown(oneshot::Sender<()>),
}

/// Handle kept by `SyncService`. Cloning it is cheap; only the `run` task
/// itself owns the supervisor's state.
#[derive(Clone)]
pub struct AccountSyncSupervisorHandle {
    commands: mpsc::Sender<SupervisorCommand>,
}

impl AccountSyncSupervisorHandle {
    pub async fn shutdown(&self) {
        let (tx, rx) = oneshot::channel();
        if self.commands.send(SupervisorCommand::Shutdown(tx)).await.is_ok() {
            let _ = rx.await;
        }
    }
}

#[derive(Clone)]
pub struct AccountSyncSupervisorConfig {
    pub heartbeat: Duration,
    pub worker: FolderWorkerConfig,
    pub thread_detector_queue_depth: usize,
}

impl Default for AccountSyncSupervisorConfig {
    fn default() -> Self {
        Self {
            heartbeat: Duration::from_secs(1),
            worker: FolderWorkerConfig::default(),
            thread_detector_queue_depth: 64,
        }
    }
}

pub struct AccountSyncSupervisor {
    account: Account,
    store: Arc<dyn MetadataStore>,
    blobs: Arc<dyn BlobStore>,
    cache: Arc<dyn MetaCache>,
    pool: Arc<ConnectionPool>,
    search_index: Arc<dyn SearchIndexNotifier>,
    status_callback: StatusCallback,
    config: AccountSyncSupervisorConfig,
}

impl AccountSyncSupervisor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        account: Account,
        store: Arc<dyn MetadataStore>,
        blobs: Arc<dyn BlobStore>,
        cache: Arc<dyn MetaCache>,
        pool: Arc<ConnectionPool>,
        search_index: Arc<dyn SearchIndexNotifier>,
        status_callback: StatusCallback,
        config: AccountSyncSupervisorConfig,
    ) -> Self {
        Self {
            account,
            store,
            blobs,
            cache,
            pool,
            search_index,
            status_callback,
            config,
        }
    }

    /// Spawns the supervisor's own task and returns a handle to it. The
    /// returned `JoinHandle` resolving is itself the fatal-error signal: a
    /// supervisor task is never expected to finish on its own.
    pub fn spawn(self) -> (JoinHandle<()>, AccountSyncSupervisorHandle) {
        let (tx, rx) = mpsc::channel(8);
        let handle = AccountSyncSupervisorHandle { commands: tx };
        let join = tokio::spawn(self.run(rx));
        (join, handle)
    }

    async fn run(self, mut commands: mpsc::Receiver<SupervisorCommand>) {
        let account_id = self.account.id;
        let threads = thread_detector::spawn(account_id, self.store.clone(), self.config.thread_detector_queue_depth);

        let folders = match self.pool.lease(&self.account).await {
            Ok(conn) => match conn.sync_folders().await {
                Ok(names) => names,
                Err(err) => {
                    error!("account {} could not list syncable folders: {}", account_id, err);
                    return;
                }
            },
            Err(err) => {
                error!("account {} could not connect to list folders: {}", account_id, err);
                return;
            }
        };

        let mut worker_handles = Vec::new();
        let mut spawned_folders: Vec<String> = Vec::new();

        for folder_name in folders {
            let state = match self.store.load_folder_state(account_id, &folder_name).await {
                Ok(state) => state.unwrap_or(SyncState::Initial),
                Err(err) => {
                    error!("account {} folder {} could not load state: {}", account_id, folder_name, err);
                    continue;
                }
            };
            if state.is_terminal() {
                continue;
            }

            self.wait_for_prior_initials(&spawned_folders).await;

            let worker = FolderSyncWorker::new(
                self.account.clone(),
                folder_name.clone(),
                self.store.clone(),
                self.blobs.clone(),
                self.cache.clone(),
                self.pool.clone(),
                threads.clone(),
                self.search_index.clone(),
                self.status_callback.clone(),
                self.config.worker.clone(),
            );
            spawned_folders.push(folder_name);
            worker_handles.push(tokio::spawn(worker.run()));
        }

        loop {
            match commands.recv().await {
                Some(SupervisorCommand::Shutdown(ack)) => {
                    for handle in &worker_handles {
                        handle.abort();
                    }
                    for handle in worker_handles {
                        let _ = handle.await;
                    }
                    let _ = ack.send(());
                    return;
                }
                None => {
                    error!("account {} supervisor command channel closed unexpectedly", account_id);
                    return;
                }
            }
        }
    }

    /// Serialisation rule (§4.6): block until every already-spawned folder
    /// has left `Initial`/`InitialUidInvalid`.
    async fn wait_for_prior_initials(&self, spawned_folders: &[String]) {
        loop {
            let mut any_initializing = false;
            for folder in spawned_folders {
                match self.store.load_folder_state(self.account.id, folder).await {
                    Ok(Some(state)) if state == SyncState::Initial || state == SyncState::InitialUidInvalid => {
                        any_initializing = true;
                        break;
                    }
                    // No persisted row yet means the worker hasn't had its
                    // first chance to write one (it hasn't even been polled,
                    // or is mid-write) — a spawned folder with nothing but
                    // `poll`/`finish` on record is the only case that counts
                    // as "not initializing".
                    Ok(None) => {
                        any_initializing = true;
                        break;
                    }
                    Ok(Some(_)) => {}
                    Err(err) => {
                        warn!("account {} folder {} state check failed: {}", self.account.id, folder, err);
                    }
                }
            }
            if !any_initializing {
                return;
            }
            sleep(self.config.heartbeat).await;
        }
    }
}
