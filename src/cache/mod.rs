// Copyright (c) 2025 TexasFortress.AI
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Short-lived, large-artifact cache — chiefly the `remote_g_metadata` map
//! (UID -> {msgid, thrid}) a folder's initial sync builds up and discards once
//! the folder transitions out of `Initial`. Keyed hierarchically as
//! `{account_id}/{folder_name}/remote_g_metadata`, matching the layout
//! described in the control-plane design.

pub mod dashmap_cache;

use async_trait::async_trait;
use std::collections::HashMap;

use crate::model::message::RemoteMeta;

pub type GMetadataMap = HashMap<u32, RemoteMeta>;

pub fn g_metadata_key(account_id: i64, folder_name: &str) -> String {
    format!("{}/{}/remote_g_metadata", account_id, folder_name)
}

#[async_trait]
pub trait MetaCache: Send + Sync {
    async fn get(&self, key: &str) -> Option<GMetadataMap>;
    async fn set(&self, key: &str, value: GMetadataMap);
    async fn remove(&self, key: &str);
}
