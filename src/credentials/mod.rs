// Copyright (c) 2025 TexasFortress.AI
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Secret/credential boundary. Out of scope for the sync core proper (§1):
//! this module defines the interfaces the [`crate::remote::RemoteMailboxFactory`]
//! needs to authenticate a connection, plus one small env-backed implementation
//! so the crate is runnable end to end. Modelled on this codebase's existing
//! OAuth2 plumbing (`imap::oauth2::MicrosoftOAuth2Config::from_env`,
//! `imap::oauth2::StoredToken`) and Nylas's `GTokenManager.new_token` contract
//! from the original sync engine: refresh on demand, mark the account invalid
//! on failure rather than retrying forever.

use async_trait::async_trait;
use thiserror::Error;

/// What a connection attempt authenticates with. Plain-password IMAP and
/// XOAUTH2 are the two shapes `ImapMailbox::connect*` understands.
#[derive(Debug, Clone)]
pub enum Credential {
    Password(String),
    OAuthAccessToken(String),
}

#[derive(Debug, Error, Clone)]
pub enum CredentialError {
    #[error("no credential on file for account {0}")]
    NotFound(i64),
    #[error("token refresh failed: {0}")]
    RefreshFailed(String),
}

/// Supplies the secret a `RemoteMailboxFactory` needs to log in. A real
/// deployment backs this with an encrypted secrets table; that implementation
/// is explicitly out of scope here (§1).
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn credential_for(&self, account_id: i64) -> Result<Credential, CredentialError>;

    /// Called by the worker (via the pool's connect failure path) when the
    /// credential owner should stop trusting this account's secret — e.g. an
    /// OAuth refresh came back with `invalid_grant`. The core never retries
    /// past this; see §7 "OAuth/credential failure".
    async fn mark_invalid(&self, account_id: i64, reason: &str);
}

/// Refreshes an OAuth access token for an account. Kept separate from
/// `CredentialStore` because not every provider needs it (plain IMAP accounts
/// never call this), and because refreshing is itself a fallible network
/// operation with its own non-retriable failure mode.
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    async fn refresh(&self, account_id: i64) -> Result<String, CredentialError>;
}

/// Reads one secret per account out of the process environment:
/// `SYNC_ACCOUNT_{id}_OAUTH_TOKEN` (preferred, checked first) or
/// `SYNC_ACCOUNT_{id}_PASSWORD`. Adequate for the single-process demo this
/// binary ships; a production deployment swaps this for a real secret store
/// without touching `RemoteMailboxFactory` or anything upstream of it.
pub struct EnvCredentialStore;

impl EnvCredentialStore {
    pub fn new() -> Self {
        Self
    }
}

impl Default for EnvCredentialStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CredentialStore for EnvCredentialStore {
    async fn credential_for(&self, account_id: i64) -> Result<Credential, CredentialError> {
        if let Ok(token) = std::env::var(format!("SYNC_ACCOUNT_{account_id}_OAUTH_TOKEN")) {
            return Ok(Credential::OAuthAccessToken(token));
        }
        if let Ok(password) = std::env::var(format!("SYNC_ACCOUNT_{account_id}_PASSWORD")) {
            return Ok(Credential::Password(password));
        }
        Err(CredentialError::NotFound(account_id))
    }

    async fn mark_invalid(&self, account_id: i64, reason: &str) {
        log::error!("account {account_id} credentials marked invalid: {reason}");
    }
}
