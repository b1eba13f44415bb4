// Copyright (c) 2025 TexasFortress.AI
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The sync core: the per-folder state machine, the account supervisor, the
//! thread detector, and the process-wide control plane on top of them.

pub mod errors;
pub mod folder_worker;
pub mod service;
pub mod supervisor;
pub mod thread_detector;

pub use errors::{SyncError, SyncResult};
pub use folder_worker::{FolderSyncWorker, FolderWorkerConfig, StatusCallback, SyncProgress};
pub use service::{SyncOpResult, SyncService, SyncServiceConfig};
pub use supervisor::{AccountSyncSupervisor, AccountSyncSupervisorConfig, AccountSyncSupervisorHandle};
