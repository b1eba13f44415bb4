// Copyright (c) 2025 TexasFortress.AI
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Fire-and-forget hook into an external full-text index, invoked after a
//! folder's chunk commits. The indexer itself is out of scope (§1 Non-goals);
//! this is the notification call the original source has commented out and
//! Open Question (c) asks implementers to resolve. Gated behind
//! `SyncSettings::search_index_enabled`, tied to `SEARCH_SERVER_LOC`; default
//! is disabled (see DESIGN.md).

use async_trait::async_trait;
use log::warn;

#[async_trait]
pub trait SearchIndexNotifier: Send + Sync {
    fn is_enabled(&self) -> bool;

    /// Tell the index a namespace has new committed mail. Best-effort: a
    /// failure here never blocks or fails a sync chunk, it is only logged.
    async fn notify(&self, namespace_id: i64);
}

pub struct NoopSearchIndexNotifier;

#[async_trait]
impl SearchIndexNotifier for NoopSearchIndexNotifier {
    fn is_enabled(&self) -> bool {
        false
    }

    async fn notify(&self, _namespace_id: i64) {}
}

/// Posts a `{"namespace_id": ...}` body to `SEARCH_SERVER_LOC`. Grounded on
/// this codebase's other outbound `reqwest` call sites
/// (`dashboard/services/oauth_service.rs`'s token-exchange POSTs).
pub struct HttpSearchIndexNotifier {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpSearchIndexNotifier {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl SearchIndexNotifier for HttpSearchIndexNotifier {
    fn is_enabled(&self) -> bool {
        true
    }

    async fn notify(&self, namespace_id: i64) {
        let result = self
            .client
            .post(&self.endpoint)
            .json(&serde_json::json!({ "namespace_id": namespace_id }))
            .send()
            .await;
        if let Err(err) = result {
            warn!("search index notify failed for namespace {namespace_id}: {err}");
        }
    }
}
