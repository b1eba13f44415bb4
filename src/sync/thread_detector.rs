// Copyright (c) 2025 TexasFortress.AI
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Per-account single-consumer thread assignment (§4.5). Nothing outside this
//! task touches `MetadataStore`'s thread rows — that is what keeps "at most
//! one Thread per provider_thrid" true without a database-level unique
//! constraint (§9 "best-effort dedup").

use std::collections::HashMap;
use std::sync::Arc;

use log::warn;
use tokio::sync::{mpsc, oneshot};

use crate::model::{Message, Thread};
use crate::store::MetadataStore;

type Batch = (Vec<Message>, oneshot::Sender<()>);

/// Handle held by folder workers. Cloneable: many workers across the same
/// account's folders share one detector task.
#[derive(Clone)]
pub struct ThreadDetectorHandle {
    sender: mpsc::Sender<Batch>,
}

impl ThreadDetectorHandle {
    /// Enqueue a batch and wait for it to be fully assigned. Mirrors the
    /// "enqueue then await completion_event before committing" ordering
    /// `dedup_download` depends on (§4.3 step 5).
    pub async fn submit(&self, messages: Vec<Message>) {
        if messages.is_empty() {
            return;
        }
        let (tx, rx) = oneshot::channel();
        if self.sender.send((messages, tx)).await.is_err() {
            warn!("thread detector task gone, batch dropped");
            return;
        }
        let _ = rx.await;
    }
}

/// Spawns the consumer task and returns a handle to it. The task runs until
/// every handle is dropped, at which point the channel closes and it exits.
pub fn spawn(account_id: i64, store: Arc<dyn MetadataStore>, queue_depth: usize) -> ThreadDetectorHandle {
    let (sender, mut receiver) = mpsc::channel::<Batch>(queue_depth);

    tokio::spawn(async move {
        let mut cache: HashMap<String, Thread> = HashMap::new();

        while let Some((messages, completion)) = receiver.recv().await {
            for message in &messages {
                if let Err(err) = assign(&store, account_id, message, &mut cache).await {
                    warn!(
                        "account {} thread assignment failed for message {}: {}",
                        account_id, message.id, err
                    );
                }
            }
            cache.clear();
            let _ = completion.send(());
        }
    });

    ThreadDetectorHandle { sender }
}

async fn assign(
    store: &Arc<dyn MetadataStore>,
    account_id: i64,
    message: &Message,
    cache: &mut HashMap<String, Thread>,
) -> crate::store::StoreResult<()> {
    let key = message.provider_thrid.clone().unwrap_or_else(|| format!("__no-thrid-{}", message.id));

    let mut thread = match cache.get(&key) {
        Some(thread) => thread.clone(),
        None => store
            .get_or_create_thread(account_id, message.provider_thrid.as_deref())
            .await?,
    };

    thread.update_from_message(message.subject.as_deref(), message.internal_date);
    store.update_thread(&thread).await?;
    cache.insert(key, thread);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::sqlite::SqlxMetadataStore;

    async fn memory_store() -> Arc<dyn MetadataStore> {
        Arc::new(
            SqlxMetadataStore::initialize("sqlite::memory:")
                .await
                .expect("in-memory store"),
        )
    }

    fn message(id: i64, account_id: i64, thrid: Option<&str>) -> Message {
        Message {
            id,
            account_id,
            provider_msgid: Some(format!("m{id}")),
            provider_thrid: thrid.map(str::to_string),
            subject: Some("hello".to_string()),
            from_address: None,
            internal_date: None,
            parts: Vec::new(),
        }
    }

    #[tokio::test]
    async fn concurrent_duplicate_thrid_collapses_to_one_thread() {
        let store = memory_store().await;
        let handle = spawn(1, store.clone(), 16);
        let a = handle.clone();
        let b = handle.clone();

        let batch_a = vec![message(1, 1, Some("T1")), message(2, 1, Some("T2"))];
        let batch_b = vec![message(3, 1, Some("T1"))];

        let (ra, rb) = tokio::join!(a.submit(batch_a), b.submit(batch_b));
        let _ = (ra, rb);

        let t1 = store.get_or_create_thread(1, Some("T1")).await.unwrap();
        let t1_again = store.get_or_create_thread(1, Some("T1")).await.unwrap();
        assert_eq!(t1.id, t1_again.id);
    }
}
