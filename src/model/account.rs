// Copyright (c) 2025 TexasFortress.AI
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use serde::{Deserialize, Serialize};

/// Per-provider capability flags the sync core dispatches on.
///
/// Kept as plain data on the enum variant rather than a trait object hierarchy —
/// the two providers this core knows about differ by a handful of booleans and
/// one folder name, not by behavior worth virtual-dispatching.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProviderCapabilities {
    pub has_xgm_metadata: bool,
    pub supports_condstore: bool,
    pub has_labels: bool,
}

impl ProviderCapabilities {
    pub const fn plain_imap() -> Self {
        Self {
            has_xgm_metadata: false,
            supports_condstore: true,
            has_labels: false,
        }
    }

    pub const fn gmail() -> Self {
        Self {
            has_xgm_metadata: true,
            supports_condstore: true,
            has_labels: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Provider {
    Imap,
    Gmail { all_mail_folder: String },
}

impl Provider {
    pub fn capabilities(&self) -> ProviderCapabilities {
        match self {
            Provider::Imap => ProviderCapabilities::plain_imap(),
            Provider::Gmail { .. } => ProviderCapabilities::gmail(),
        }
    }

    pub fn all_mail_folder(&self) -> Option<&str> {
        match self {
            Provider::Imap => None,
            Provider::Gmail { all_mail_folder } => Some(all_mail_folder.as_str()),
        }
    }

    pub fn is_all_mail(&self, folder_name: &str) -> bool {
        self.all_mail_folder() == Some(folder_name)
    }
}

/// A mail account the sync core is responsible for.
///
/// `sync_host` is the host-affinity lock described in the control-plane design:
/// non-null means some process owns this account's sync loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: i64,
    pub email_address: String,
    pub namespace_id: i64,
    pub provider: Provider,
    pub imap_host: String,
    pub imap_port: u16,
    pub imap_user: String,
    pub sync_host: Option<String>,
    pub sync_active: bool,
}

impl Account {
    pub fn is_owned_by(&self, fqdn: &str) -> bool {
        self.sync_host.as_deref() == Some(fqdn)
    }

    pub fn is_idle(&self) -> bool {
        self.sync_host.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_imap_has_no_gmail_capabilities() {
        let caps = Provider::Imap.capabilities();
        assert!(!caps.has_xgm_metadata);
        assert!(!caps.has_labels);
        assert!(caps.supports_condstore);
        assert_eq!(Provider::Imap.all_mail_folder(), None);
    }

    #[test]
    fn gmail_all_mail_is_recognised_by_name() {
        let provider = Provider::Gmail { all_mail_folder: "[Gmail]/All Mail".to_string() };
        let caps = provider.capabilities();
        assert!(caps.has_xgm_metadata);
        assert!(caps.has_labels);
        assert!(provider.is_all_mail("[Gmail]/All Mail"));
        assert!(!provider.is_all_mail("INBOX"));
    }

    #[test]
    fn ownership_helpers_match_sync_host() {
        let account = Account {
            id: 1,
            email_address: "a@example.com".to_string(),
            namespace_id: 1,
            provider: Provider::Imap,
            imap_host: "imap.example.com".to_string(),
            imap_port: 993,
            imap_user: "a@example.com".to_string(),
            sync_host: Some("host-a".to_string()),
            sync_active: true,
        };
        assert!(account.is_owned_by("host-a"));
        assert!(!account.is_owned_by("host-b"));
        assert!(!account.is_idle());
    }
}
