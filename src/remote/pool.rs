// Copyright (c) 2025 TexasFortress.AI
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Bounded, per-account connection pool with scoped lease semantics. Generalizes
//! `connection_pool.rs` (DashMap of queues + a counting `Semaphore` + a
//! `Drop`-released handle) from a single-account pool to one keyed by account id,
//! and from a concrete `ImapClient` to any `RemoteMailbox`.

use std::sync::Arc;
use std::time::Duration;

use crossbeam::queue::ArrayQueue;
use dashmap::DashMap;
use log::{debug, info, warn};
use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::sleep;

use super::{RemoteMailbox, RemoteMailboxFactory};
use crate::model::Account;

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("pool closed")]
    Closed,
    #[error("connect failed after {attempts} attempts: {last_error}")]
    ConnectFailed { attempts: u32, last_error: String },
    #[error("lease timed out waiting for a free connection")]
    LeaseTimeout,
}

#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub max_connections_per_account: usize,
    pub lease_timeout: Duration,
    pub max_reconnect_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections_per_account: 4,
            lease_timeout: Duration::from_secs(30),
            max_reconnect_attempts: 5,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
        }
    }
}

struct AccountPool {
    idle: ArrayQueue<Box<dyn RemoteMailbox>>,
    semaphore: Arc<Semaphore>,
}

/// A leased connection. Dropping it returns the connection to its account's
/// idle queue and releases the semaphore permit, on every exit path including
/// an early `return` or a panic unwind out of the handler that borrowed it.
pub struct Leased {
    conn: Option<Box<dyn RemoteMailbox>>,
    account_id: i64,
    pool: Arc<ConnectionPool>,
    _permit: OwnedSemaphorePermit,
}

impl std::ops::Deref for Leased {
    type Target = dyn RemoteMailbox;
    fn deref(&self) -> &Self::Target {
        self.conn.as_deref().expect("connection taken only on drop")
    }
}

impl Drop for Leased {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.release(self.account_id, conn);
        }
    }
}

pub struct ConnectionPool {
    config: PoolConfig,
    factory: Arc<dyn RemoteMailboxFactory>,
    pools: DashMap<i64, AccountPool>,
}

impl ConnectionPool {
    pub fn new(config: PoolConfig, factory: Arc<dyn RemoteMailboxFactory>) -> Self {
        Self {
            config,
            factory,
            pools: DashMap::new(),
        }
    }

    fn semaphore_for(&self, account_id: i64) -> Arc<Semaphore> {
        self.pools
            .entry(account_id)
            .or_insert_with(|| AccountPool {
                idle: ArrayQueue::new(self.config.max_connections_per_account),
                semaphore: Arc::new(Semaphore::new(self.config.max_connections_per_account)),
            })
            .semaphore
            .clone()
    }

    /// Lease a connection for `account`, reconnecting with exponential backoff
    /// if the idle queue is empty and a new connection must be established.
    pub async fn lease(self: &Arc<Self>, account: &Account) -> Result<Leased, PoolError> {
        let semaphore = self.semaphore_for(account.id);
        let permit = tokio::time::timeout(self.config.lease_timeout, semaphore.acquire_owned())
            .await
            .map_err(|_| PoolError::LeaseTimeout)?
            .map_err(|_| PoolError::Closed)?;

        let conn = match self.pools.get(&account.id).and_then(|p| p.idle.pop()) {
            Some(conn) => conn,
            None => self.connect_with_backoff(account).await?,
        };

        Ok(Leased {
            conn: Some(conn),
            account_id: account.id,
            pool: Arc::clone(self),
            _permit: permit,
        })
    }

    async fn connect_with_backoff(&self, account: &Account) -> Result<Box<dyn RemoteMailbox>, PoolError> {
        let mut attempt = 0;
        let mut backoff = self.config.initial_backoff;
        loop {
            attempt += 1;
            match self.factory.connect(account).await {
                Ok(conn) => return Ok(conn),
                Err(err) if attempt >= self.config.max_reconnect_attempts => {
                    return Err(PoolError::ConnectFailed {
                        attempts: attempt,
                        last_error: err.to_string(),
                    });
                }
                Err(err) => {
                    warn!(
                        "account {} connect attempt {} failed: {} (retrying in {:?})",
                        account.id, attempt, err, backoff
                    );
                    sleep(backoff).await;
                    backoff = (backoff * 2).min(self.config.max_backoff);
                }
            }
        }
    }

    fn release(&self, account_id: i64, conn: Box<dyn RemoteMailbox>) {
        if let Some(entry) = self.pools.get(&account_id) {
            if entry.idle.push(conn).is_err() {
                debug!("idle queue full for account {}, dropping connection", account_id);
            }
        }
    }

    /// Background task: periodic liveness log, mirroring the maintenance loop
    /// in `connection_pool.rs`. Left simple since IMAP servers already enforce
    /// their own idle timeouts; this mainly surfaces pool occupancy in logs.
    pub async fn run_maintenance(self: Arc<Self>, interval: Duration) {
        loop {
            sleep(interval).await;
            info!("connection pool maintenance pass over {} accounts", self.pools.len());
        }
    }
}
