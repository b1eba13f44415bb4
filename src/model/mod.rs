// Copyright (c) 2025 TexasFortress.AI
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Persisted and in-flight data types shared across the sync core.

pub mod account;
pub mod folder;
pub mod message;
pub mod thread;

pub use account::{Account, Provider, ProviderCapabilities};
pub use folder::{FolderSyncProgress, SyncState, UidValidityCheckpoint};
pub use message::{FolderItem, Message, MimePart};
pub use thread::Thread;
