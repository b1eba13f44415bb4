// Copyright (c) 2025 TexasFortress.AI
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Transport-agnostic JSON-RPC 2.0 front end for [`crate::sync::SyncService`].
//! The four control-plane operations (`start_sync`, `stop_sync`,
//! `sync_status`, `status`) can be mounted behind HTTP, stdio, or anything
//! else without this crate depending on a web framework.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::sync::SyncService;

#[derive(Debug, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub id: Option<Value>,
    pub method: String,
    pub params: Option<Value>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

const INVALID_PARAMS: i32 = -32602;
const METHOD_NOT_FOUND: i32 = -32601;

#[derive(Debug, Deserialize, Default)]
struct EmailParam {
    email_address: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AccountIdParam {
    account_id: i64,
}

impl JsonRpcResponse {
    fn ok(id: Value, result: impl Serialize) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: Some(serde_json::to_value(result).unwrap_or(Value::Null)),
            error: None,
        }
    }

    fn err(id: Value, code: i32, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: None,
            error: Some(JsonRpcError {
                code,
                message: message.into(),
                data: None,
            }),
        }
    }
}

/// Dispatches one request to the matching [`SyncService`] operation. The
/// four methods are `start_sync`, `stop_sync`, `sync_status`, `status`.
pub async fn dispatch(service: &SyncService, request: JsonRpcRequest) -> JsonRpcResponse {
    let id = request.id.unwrap_or(Value::Null);

    match request.method.as_str() {
        "start_sync" => {
            let params: EmailParam = match parse_params(request.params) {
                Ok(p) => p,
                Err(msg) => return JsonRpcResponse::err(id, INVALID_PARAMS, msg),
            };
            let result = service.start_sync(params.email_address.as_deref()).await;
            JsonRpcResponse::ok(id, result)
        }
        "stop_sync" => {
            let params: EmailParam = match parse_params(request.params) {
                Ok(p) => p,
                Err(msg) => return JsonRpcResponse::err(id, INVALID_PARAMS, msg),
            };
            let result = service.stop_sync(params.email_address.as_deref()).await;
            JsonRpcResponse::ok(id, result)
        }
        "sync_status" => {
            let params: AccountIdParam = match request.params {
                Some(value) => match serde_json::from_value(value) {
                    Ok(p) => p,
                    Err(err) => return JsonRpcResponse::err(id, INVALID_PARAMS, err.to_string()),
                },
                None => return JsonRpcResponse::err(id, INVALID_PARAMS, "missing account_id"),
            };
            JsonRpcResponse::ok(id, service.sync_status(params.account_id))
        }
        "status" => JsonRpcResponse::ok(id, service.status()),
        other => JsonRpcResponse::err(id, METHOD_NOT_FOUND, format!("unknown method: {other}")),
    }
}

fn parse_params(params: Option<Value>) -> Result<EmailParam, String> {
    match params {
        None | Some(Value::Null) => Ok(EmailParam::default()),
        Some(value) => serde_json::from_value(value).map_err(|err| err.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Arc;

    use crate::blob::fs::FsBlobStore;
    use crate::cache::dashmap_cache::DashMapMetaCache;
    use crate::model::Account;
    use crate::remote::pool::{ConnectionPool, PoolConfig};
    use crate::remote::{RemoteMailbox, RemoteMailboxFactory, RemoteResult};
    use crate::search_index::NoopSearchIndexNotifier;
    use crate::store::sqlite::SqlxMetadataStore;
    use crate::sync::{AccountSyncSupervisorConfig, SyncServiceConfig};

    struct NeverConnectFactory;

    #[async_trait]
    impl RemoteMailboxFactory for NeverConnectFactory {
        async fn connect(&self, _account: &Account) -> RemoteResult<Box<dyn RemoteMailbox>> {
            Err(crate::remote::RemoteError::Connection("no network in tests".to_string()))
        }
    }

    async fn test_service() -> SyncService {
        let store = Arc::new(SqlxMetadataStore::initialize("sqlite::memory:").await.unwrap());
        let blobs = Arc::new(FsBlobStore::new(std::env::temp_dir().join("rustymail-rpc-test")));
        let cache = Arc::new(DashMapMetaCache::new());
        let pool = Arc::new(ConnectionPool::new(PoolConfig::default(), Arc::new(NeverConnectFactory)));
        let search_index = Arc::new(NoopSearchIndexNotifier);
        SyncService::new(
            store,
            blobs,
            cache,
            pool,
            search_index,
            SyncServiceConfig {
                fqdn: "test-host".to_string(),
                supervisor: AccountSyncSupervisorConfig::default(),
            },
        )
    }

    #[tokio::test]
    async fn unknown_method_returns_method_not_found() {
        let service = test_service().await;
        let request = JsonRpcRequest {
            jsonrpc: "2.0".to_string(),
            id: Some(Value::from(1)),
            method: "does_not_exist".to_string(),
            params: None,
        };
        let response = dispatch(&service, request).await;
        assert_eq!(response.error.unwrap().code, METHOD_NOT_FOUND);
    }

    #[tokio::test]
    async fn sync_status_missing_account_id_is_invalid_params() {
        let service = test_service().await;
        let request = JsonRpcRequest {
            jsonrpc: "2.0".to_string(),
            id: Some(Value::from(1)),
            method: "sync_status".to_string(),
            params: None,
        };
        let response = dispatch(&service, request).await;
        assert_eq!(response.error.unwrap().code, INVALID_PARAMS);
    }

    #[tokio::test]
    async fn status_with_no_running_accounts_is_empty() {
        let service = test_service().await;
        let request = JsonRpcRequest {
            jsonrpc: "2.0".to_string(),
            id: Some(Value::from(1)),
            method: "status".to_string(),
            params: None,
        };
        let response = dispatch(&service, request).await;
        assert_eq!(response.result, Some(serde_json::json!({})));
    }

    #[tokio::test]
    async fn start_sync_for_unknown_email_reports_no_such_user() {
        let service = test_service().await;
        let request = JsonRpcRequest {
            jsonrpc: "2.0".to_string(),
            id: Some(Value::from(1)),
            method: "start_sync".to_string(),
            params: Some(serde_json::json!({ "email_address": "nobody@example.com" })),
        };
        let response = dispatch(&service, request).await;
        assert_eq!(response.result, Some(serde_json::json!("OK no such user")));
    }
}

