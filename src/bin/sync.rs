// Copyright (c) 2025 TexasFortress.AI
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Long-running sync daemon: loads settings, rehydrates any accounts this
//! host owned before its last restart, starts the requested accounts (or all
//! active ones), then serves the JSON-RPC control plane over stdin/stdout
//! until `Ctrl-C`, at which point every supervisor is stopped cleanly.

use std::io::{self, Write as IoWrite};
use std::sync::Arc;

use clap::Parser;
use log::{error, info, warn};
use tokio::io::{AsyncBufReadExt, BufReader as AsyncBufReader};

use rustymail::blob::fs::FsBlobStore;
use rustymail::cache::dashmap_cache::DashMapMetaCache;
use rustymail::config::SyncSettings;
use rustymail::credentials::EnvCredentialStore;
use rustymail::remote::imap_mailbox::{ImapMailboxFactory, ImapMailboxFactoryConfig};
use rustymail::remote::pool::{ConnectionPool, PoolConfig};
use rustymail::rpc::{self, JsonRpcRequest};
use rustymail::search_index::{HttpSearchIndexNotifier, NoopSearchIndexNotifier, SearchIndexNotifier};
use rustymail::store::sqlite::SqlxMetadataStore;
use rustymail::sync::{AccountSyncSupervisorConfig, SyncService, SyncServiceConfig};

// jemalloc releases memory back to the OS, which matters for a long-running
// daemon holding many IMAP session buffers over its lifetime.
#[cfg(all(not(target_env = "msvc"), not(feature = "system-alloc")))]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

#[derive(Parser)]
#[command(name = "rustymail-sync", about = "Multi-account IMAP sync daemon")]
struct Cli {
    /// Path to a TOML config file (defaults to config/sync.toml if present).
    #[arg(long)]
    config: Option<String>,

    /// Start sync for only this account (email address). All active accounts
    /// otherwise.
    #[arg(long)]
    account: Option<String>,
}

/// Check if a process with the given PID is still running.
#[cfg(unix)]
fn process_exists(pid: u32) -> bool {
    extern "C" {
        fn kill(pid: i32, sig: i32) -> i32;
    }
    unsafe { kill(pid as i32, 0) == 0 }
}

#[cfg(not(unix))]
fn process_exists(_pid: u32) -> bool {
    false
}

enum LockResult {
    Acquired(std::fs::File),
    AlreadyRunning(u32),
    Error(String),
}

const LOCK_PATH: &str = "data/.sync.lock";

/// Acquire a lock file with crash recovery: a stale lock from a dead PID is
/// removed rather than trusted, same discipline the prior single-shot binary
/// used, since this daemon is still the only process meant to hold the sync
/// database open for writes.
fn acquire_lock() -> LockResult {
    if let Ok(contents) = std::fs::read_to_string(LOCK_PATH) {
        if let Ok(pid) = contents.trim().parse::<u32>() {
            if process_exists(pid) {
                return LockResult::AlreadyRunning(pid);
            }
            info!("removing stale lock from crashed process {}", pid);
            if let Err(e) = std::fs::remove_file(LOCK_PATH) {
                return LockResult::Error(format!("failed to remove stale lock: {}", e));
            }
        }
    }

    if let Some(parent) = std::path::Path::new(LOCK_PATH).parent() {
        let _ = std::fs::create_dir_all(parent);
    }

    let mut file = match std::fs::File::create(LOCK_PATH) {
        Ok(f) => f,
        Err(e) => return LockResult::Error(format!("failed to create lock file: {}", e)),
    };
    if let Err(e) = write!(file, "{}", std::process::id()) {
        return LockResult::Error(format!("failed to write pid to lock file: {}", e));
    }
    LockResult::Acquired(file)
}

fn release_lock() {
    let _ = std::fs::remove_file(LOCK_PATH);
}

struct LockGuard;

impl Drop for LockGuard {
    fn drop(&mut self) {
        release_lock();
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let cli = Cli::parse();

    let _lock = match acquire_lock() {
        LockResult::Acquired(f) => f,
        LockResult::AlreadyRunning(pid) => {
            info!("another sync daemon is already running (pid: {})", pid);
            std::process::exit(2);
        }
        LockResult::Error(e) => {
            error!("failed to acquire lock: {}", e);
            std::process::exit(1);
        }
    };
    let _cleanup = LockGuard;

    let settings = SyncSettings::load(cli.config.as_deref()).unwrap_or_else(|err| {
        eprintln!("failed to load configuration: {}", err);
        std::process::exit(1);
    });

    let store: Arc<dyn rustymail::store::MetadataStore> =
        Arc::new(SqlxMetadataStore::initialize(&settings.database_url).await?);

    let blob_root = settings
        .blob_store_dir
        .clone()
        .map(std::path::PathBuf::from)
        .unwrap_or_else(|| FsBlobStore::data_dir_under_home("rustymail-sync"));
    let blobs: Arc<dyn rustymail::blob::BlobStore> = Arc::new(FsBlobStore::new(blob_root));

    let cache: Arc<dyn rustymail::cache::MetaCache> = Arc::new(DashMapMetaCache::new());

    let credentials = Arc::new(EnvCredentialStore::new());
    let factory = Arc::new(ImapMailboxFactory {
        config: Arc::new(ImapMailboxFactoryConfig::default()),
        credentials,
    });
    let pool = Arc::new(ConnectionPool::new(
        PoolConfig {
            max_connections_per_account: settings.max_connections_per_account,
            ..PoolConfig::default()
        },
        factory,
    ));

    let search_index: Arc<dyn SearchIndexNotifier> = match settings.search_server_loc() {
        Some(endpoint) if settings.search_index_enabled => Arc::new(HttpSearchIndexNotifier::new(endpoint)),
        _ => Arc::new(NoopSearchIndexNotifier),
    };

    let fqdn = settings.resolved_fqdn();
    info!("starting sync daemon on host {}", fqdn);

    let service = Arc::new(SyncService::new(
        store,
        blobs,
        cache,
        pool,
        search_index,
        SyncServiceConfig {
            fqdn,
            supervisor: AccountSyncSupervisorConfig {
                heartbeat: settings.heartbeat(),
                worker: rustymail::sync::FolderWorkerConfig {
                    poll_frequency: settings.poll_frequency(),
                    max_retries: settings.max_retries,
                    ..rustymail::sync::FolderWorkerConfig::default()
                },
                ..AccountSyncSupervisorConfig::default()
            },
        },
    ));

    if let Err(err) = service.rehydrate().await {
        error!("rehydration failed: {}", err);
    }

    let start_result = service.start_sync(cli.account.as_deref()).await;
    info!("start_sync result: {:?}", start_result);

    let rpc_service = service.clone();
    let rpc_task = tokio::spawn(async move { serve_rpc(rpc_service).await });

    tokio::signal::ctrl_c().await?;
    info!("shutdown requested, stopping all accounts");
    rpc_task.abort();
    let stop_result = service.stop_sync(None).await;
    info!("stop_sync result: {:?}", stop_result);

    Ok(())
}

/// One JSON-RPC request per line on stdin, one response per line on stdout
/// (§6). This is deliberately the simplest transport that satisfies the
/// control-plane contract; an HTTP front end can be layered on the same
/// `rpc::dispatch` without touching `SyncService`.
async fn serve_rpc(service: Arc<SyncService>) {
    let stdin = tokio::io::stdin();
    let mut lines = AsyncBufReader::new(stdin).lines();
    let stdout = io::stdout();

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(err) => {
                warn!("rpc stdin read error: {}", err);
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        let request: JsonRpcRequest = match serde_json::from_str(&line) {
            Ok(req) => req,
            Err(err) => {
                warn!("malformed rpc request: {}", err);
                continue;
            }
        };
        let response = rpc::dispatch(&service, request).await;
        if let Ok(text) = serde_json::to_string(&response) {
            let mut out = stdout.lock();
            let _ = writeln!(out, "{}", text);
        }
    }
}
