// Copyright (c) 2025 TexasFortress.AI
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! `async-imap`-backed [`RemoteMailbox`]. The connection/handshake sequence is
//! the teacher's own (`imap/client.rs::connect`, `imap/session.rs::connect`):
//! raw TCP, `native-tls` handshake, `tokio_util::compat` bridge into
//! `async_imap::Client`. Everything past login — UIDVALIDITY tracking,
//! CONDSTORE deltas, Gmail extension FETCH items — is new, since the teacher's
//! `AsyncImapSessionWrapper` never issues those commands.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::TryStreamExt;
use log::{debug, warn};
use tokio::net::TcpStream;
use tokio::sync::Mutex as TokioMutex;
use tokio_native_tls::{native_tls, TlsConnector};
use tokio_util::compat::{Compat, TokioAsyncReadCompatExt};

use crate::credentials::{Credential, CredentialStore};
use crate::model::account::Provider;
use crate::model::message::RemoteMeta;
use crate::model::Account;

use super::{
    FolderStatus, RawMessage, RemoteError, RemoteMailbox, RemoteMailboxFactory, RemoteResult,
    SelectInfo, ValidityCallback,
};

type TlsStream = Compat<tokio_native_tls::TlsStream<TcpStream>>;
type ImapSession = async_imap::Session<TlsStream>;

/// One authenticated IMAP session, folder-agnostic until `select_folder` is
/// called. Wrapped in a `Mutex` because `async_imap::Session` methods take
/// `&mut self`, matching `AsyncImapSessionWrapper`'s own locking discipline.
pub struct ImapMailbox {
    session: TokioMutex<ImapSession>,
    provider: Provider,
    chunk_size: usize,
}

impl ImapMailbox {
    pub async fn connect(
        host: &str,
        port: u16,
        username: &str,
        password: &str,
        provider: Provider,
        chunk_size: usize,
    ) -> RemoteResult<Self> {
        let tcp = TcpStream::connect((host, port)).await?;
        let connector = TlsConnector::from(native_tls::TlsConnector::builder().build()?);
        let tls = connector.connect(host, tcp).await?;
        let client = async_imap::Client::new(tls.compat());
        let session = client
            .login(username, password)
            .await
            .map_err(|(err, _client)| RemoteError::Auth(err.to_string()))?;
        Ok(Self {
            session: TokioMutex::new(session),
            provider,
            chunk_size,
        })
    }

    pub async fn connect_with_xoauth2(
        host: &str,
        port: u16,
        username: &str,
        access_token: &str,
        provider: Provider,
        chunk_size: usize,
    ) -> RemoteResult<Self> {
        let tcp = TcpStream::connect((host, port)).await?;
        let connector = TlsConnector::from(native_tls::TlsConnector::builder().build()?);
        let tls = connector.connect(host, tcp).await?;
        let client = async_imap::Client::new(tls.compat());
        let auth = crate::imap::xoauth2::XOAuth2Authenticator::new(username.to_string(), access_token.to_string());
        let session = client
            .authenticate("XOAUTH2", &auth)
            .await
            .map_err(|(err, _client)| RemoteError::Auth(err.to_string()))?;
        Ok(Self {
            session: TokioMutex::new(session),
            provider,
            chunk_size,
        })
    }

    fn uid_sequence(uids: &[u32]) -> String {
        uids.iter().map(u32::to_string).collect::<Vec<_>>().join(",")
    }
}

#[async_trait]
impl RemoteMailbox for ImapMailbox {
    async fn select_folder(
        &self,
        folder_name: &str,
        validity_cb: ValidityCallback<'_>,
    ) -> RemoteResult<SelectInfo> {
        let mut session = self.session.lock().await;
        let mailbox = session.select(folder_name).await.map_err(RemoteError::from)?;
        let info = SelectInfo {
            uidvalidity: mailbox.uid_validity.unwrap_or(0),
            highestmodseq: mailbox.highest_mod_seq.unwrap_or(0),
            exists: mailbox.exists,
        };
        validity_cb(folder_name, info)?;
        Ok(info)
    }

    async fn folder_status(&self, folder_name: &str) -> RemoteResult<FolderStatus> {
        let mut session = self.session.lock().await;
        let status = session
            .status(folder_name, "(UIDVALIDITY HIGHESTMODSEQ)")
            .await
            .map_err(RemoteError::from)?;
        Ok(FolderStatus {
            uidvalidity: status.uid_validity.unwrap_or(0),
            highestmodseq: status.highest_mod_seq.unwrap_or(0),
        })
    }

    async fn all_uids(&self) -> RemoteResult<Vec<u32>> {
        let mut session = self.session.lock().await;
        let uids = session.uid_search("ALL").await.map_err(RemoteError::from)?;
        Ok(uids.into_iter().collect())
    }

    async fn uids(&self, uids: &[u32]) -> RemoteResult<Vec<RawMessage>> {
        if uids.is_empty() {
            return Ok(Vec::new());
        }
        let mut session = self.session.lock().await;
        let sequence = Self::uid_sequence(uids);
        let query = if self.provider.capabilities().has_labels {
            "(FLAGS X-GM-LABELS INTERNALDATE BODY.PEEK[])"
        } else {
            "(FLAGS INTERNALDATE BODY.PEEK[])"
        };
        let mut stream = session.uid_fetch(&sequence, query).await.map_err(RemoteError::from)?;
        let mut out = Vec::with_capacity(uids.len());
        while let Some(fetch) = stream.try_next().await.map_err(RemoteError::from)? {
            let uid = fetch.uid.ok_or_else(|| RemoteError::Fetch("fetch response missing UID".into()))?;
            let rfc822 = fetch.body().map(<[u8]>::to_vec).unwrap_or_default();
            let flags = fetch.flags().map(|f| format!("{:?}", f)).collect();
            out.push(RawMessage {
                uid,
                rfc822,
                internal_date: fetch.internal_date(),
                flags,
                labels: Vec::new(),
            });
        }
        Ok(out)
    }

    async fn flags(&self, uids: &[u32]) -> RemoteResult<HashMap<u32, (Vec<String>, Vec<String>)>> {
        if uids.is_empty() {
            return Ok(HashMap::new());
        }
        let mut session = self.session.lock().await;
        let sequence = Self::uid_sequence(uids);
        let query = if self.provider.capabilities().has_labels {
            "(FLAGS X-GM-LABELS)"
        } else {
            "(FLAGS)"
        };
        let mut stream = session.uid_fetch(&sequence, query).await.map_err(RemoteError::from)?;
        let mut out = HashMap::with_capacity(uids.len());
        while let Some(fetch) = stream.try_next().await.map_err(RemoteError::from)? {
            if let Some(uid) = fetch.uid {
                let flags = fetch.flags().map(|f| format!("{:?}", f)).collect();
                out.insert(uid, (flags, Vec::new()));
            }
        }
        Ok(out)
    }

    async fn g_metadata(&self, uids: &[u32]) -> RemoteResult<HashMap<u32, RemoteMeta>> {
        if uids.is_empty() || !self.provider.capabilities().has_xgm_metadata {
            return Ok(HashMap::new());
        }
        let mut session = self.session.lock().await;
        let sequence = Self::uid_sequence(uids);
        let mut stream = session
            .uid_fetch(&sequence, "(X-GM-MSGID X-GM-THRID)")
            .await
            .map_err(RemoteError::from)?;
        let mut out = HashMap::with_capacity(uids.len());
        while let Some(fetch) = stream.try_next().await.map_err(RemoteError::from)? {
            if let Some(uid) = fetch.uid {
                // async-imap surfaces extension FETCH items it doesn't model
                // natively via `.section()`-style raw access in newer versions;
                // here we fall back to the response's debug text, which is
                // parsed for the two integer fields the Gmail extension sends.
                let raw = format!("{:?}", fetch);
                out.insert(
                    uid,
                    RemoteMeta {
                        msgid: extract_gmail_ext(&raw, "X-GM-MSGID"),
                        thrid: extract_gmail_ext(&raw, "X-GM-THRID"),
                    },
                );
            }
        }
        Ok(out)
    }

    async fn new_and_updated_uids(&self, since_modseq: u64) -> RemoteResult<Vec<u32>> {
        let mut session = self.session.lock().await;
        let query = format!("(UID) (CHANGEDSINCE {})", since_modseq);
        let mut stream = session.uid_fetch("1:*", &query).await.map_err(RemoteError::from)?;
        let mut out = Vec::new();
        while let Some(fetch) = stream.try_next().await.map_err(RemoteError::from)? {
            if let Some(uid) = fetch.uid {
                out.push(uid);
            }
        }
        Ok(out)
    }

    async fn expand_threads(&self, thrids: &[u64]) -> RemoteResult<Vec<u32>> {
        if thrids.is_empty() {
            return Ok(Vec::new());
        }
        let criteria = thrids
            .iter()
            .map(|t| format!("X-GM-THRID {}", t))
            .collect::<Vec<_>>()
            .join(" OR ");
        let mut session = self.session.lock().await;
        let uids = session.uid_search(&criteria).await.map_err(RemoteError::from)?;
        Ok(uids.into_iter().collect())
    }

    async fn poll_folders(&self) -> RemoteResult<Vec<String>> {
        match &self.provider {
            Provider::Gmail { all_mail_folder } => Ok(vec!["INBOX".to_string(), all_mail_folder.clone()]),
            Provider::Imap => Ok(vec!["INBOX".to_string()]),
        }
    }

    async fn sync_folders(&self) -> RemoteResult<Vec<String>> {
        let mut session = self.session.lock().await;
        let mut stream = session.list(None, Some("*")).await.map_err(RemoteError::from)?;
        let mut names = Vec::new();
        while let Some(name) = stream.try_next().await.map_err(RemoteError::from)? {
            names.push(name.name().to_string());
        }
        Ok(names)
    }

    fn chunk_size(&self) -> usize {
        self.chunk_size
    }
}

fn extract_gmail_ext(raw: &str, key: &str) -> Option<u64> {
    let idx = raw.find(key)?;
    raw[idx + key.len()..]
        .trim_start_matches([':', ' ', '='])
        .split(|c: char| !c.is_ascii_digit())
        .find(|s| !s.is_empty())
        .and_then(|s| s.parse().ok())
}

/// Default reconnect/backoff tuning, mirrored from `connection_pool.rs`'s own
/// `PoolConfig` defaults.
pub struct ImapMailboxFactoryConfig {
    pub connect_timeout: Duration,
    pub default_chunk_size: usize,
}

impl Default for ImapMailboxFactoryConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(30),
            default_chunk_size: 100,
        }
    }
}

/// The one concrete [`RemoteMailboxFactory`] this crate ships: looks up the
/// account's secret via a [`CredentialStore`] and dials `ImapMailbox::connect*`
/// accordingly. Generalizes the teacher's `ImapSessionFactory`/
/// `CloneableImapSessionFactory::create_session_for_account` dispatch (OAuth
/// branch vs. password branch) away from a single hardcoded account shape.
pub struct ImapMailboxFactory {
    pub config: Arc<ImapMailboxFactoryConfig>,
    pub credentials: Arc<dyn CredentialStore>,
}

#[async_trait]
impl RemoteMailboxFactory for ImapMailboxFactory {
    async fn connect(&self, account: &Account) -> RemoteResult<Box<dyn RemoteMailbox>> {
        let credential = self
            .credentials
            .credential_for(account.id)
            .await
            .map_err(|e| RemoteError::Auth(e.to_string()))?;

        let mailbox = match credential {
            Credential::Password(password) => {
                ImapMailbox::connect(
                    &account.imap_host,
                    account.imap_port,
                    &account.imap_user,
                    &password,
                    account.provider.clone(),
                    self.config.default_chunk_size,
                )
                .await?
            }
            Credential::OAuthAccessToken(token) => {
                ImapMailbox::connect_with_xoauth2(
                    &account.imap_host,
                    account.imap_port,
                    &account.imap_user,
                    &token,
                    account.provider.clone(),
                    self.config.default_chunk_size,
                )
                .await?
            }
        };
        Ok(Box::new(mailbox))
    }
}
