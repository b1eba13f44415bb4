// Copyright (c) 2025 TexasFortress.AI
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use async_trait::async_trait;
use dashmap::DashMap;

use super::{GMetadataMap, MetaCache};

/// Lock-free concurrent map, in keeping with this codebase's preference for
/// `dashmap` over `Mutex<HashMap<_>>` anywhere contention is expected
/// (`connection_pool.rs` does the same for its per-account idle queues).
#[derive(Default)]
pub struct DashMapMetaCache {
    entries: DashMap<String, GMetadataMap>,
}

impl DashMapMetaCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MetaCache for DashMapMetaCache {
    async fn get(&self, key: &str) -> Option<GMetadataMap> {
        self.entries.get(key).map(|entry| entry.clone())
    }

    async fn set(&self, key: &str, value: GMetadataMap) {
        self.entries.insert(key.to_string(), value);
    }

    async fn remove(&self, key: &str) {
        self.entries.remove(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::message::RemoteMeta;

    #[tokio::test]
    async fn set_get_remove_round_trips() {
        let cache = DashMapMetaCache::new();
        let key = "1/INBOX/remote_g_metadata";
        assert!(cache.get(key).await.is_none());

        let mut value = GMetadataMap::new();
        value.insert(1, RemoteMeta { msgid: Some(10), thrid: Some(20) });
        cache.set(key, value.clone()).await;

        assert_eq!(cache.get(key).await, Some(value));

        cache.remove(key).await;
        assert!(cache.get(key).await.is_none());
    }
}
