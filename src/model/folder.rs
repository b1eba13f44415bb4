// Copyright (c) 2025 TexasFortress.AI
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use serde::{Deserialize, Serialize};

/// The resumable per-folder state machine state. Persisted after every handler
/// return so a restart resumes from exactly where it left off.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum SyncState {
    Initial,
    InitialUidInvalid,
    Poll,
    PollUidInvalid,
    Finish,
}

impl SyncState {
    pub fn is_uidinvalid(&self) -> bool {
        matches!(self, SyncState::InitialUidInvalid | SyncState::PollUidInvalid)
    }

    /// The state to recover into once `resync_uids` has repaired the UID mapping.
    pub fn recovery_target(&self) -> SyncState {
        match self {
            SyncState::InitialUidInvalid => SyncState::Initial,
            SyncState::PollUidInvalid => SyncState::Poll,
            other => *other,
        }
    }

    pub fn uidinvalid_variant(&self) -> SyncState {
        match self {
            SyncState::Initial => SyncState::InitialUidInvalid,
            SyncState::Poll => SyncState::PollUidInvalid,
            other => *other,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SyncState::Finish)
    }
}

impl std::fmt::Display for SyncState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SyncState::Initial => "initial",
            SyncState::InitialUidInvalid => "initial-uidinvalid",
            SyncState::Poll => "poll",
            SyncState::PollUidInvalid => "poll-uidinvalid",
            SyncState::Finish => "finish",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uidinvalid_variant_maps_initial_and_poll() {
        assert_eq!(SyncState::Initial.uidinvalid_variant(), SyncState::InitialUidInvalid);
        assert_eq!(SyncState::Poll.uidinvalid_variant(), SyncState::PollUidInvalid);
        assert_eq!(SyncState::Finish.uidinvalid_variant(), SyncState::Finish);
    }

    #[test]
    fn recovery_target_undoes_uidinvalid_variant() {
        for state in [SyncState::Initial, SyncState::Poll] {
            assert_eq!(state.uidinvalid_variant().recovery_target(), state);
        }
    }

    #[test]
    fn only_finish_is_terminal() {
        assert!(SyncState::Finish.is_terminal());
        assert!(!SyncState::Initial.is_terminal());
        assert!(!SyncState::Poll.is_terminal());
        assert!(!SyncState::InitialUidInvalid.is_terminal());
        assert!(!SyncState::PollUidInvalid.is_terminal());
    }

    #[test]
    fn display_matches_persisted_string_form() {
        assert_eq!(SyncState::Initial.to_string(), "initial");
        assert_eq!(SyncState::InitialUidInvalid.to_string(), "initial-uidinvalid");
        assert_eq!(SyncState::Poll.to_string(), "poll");
        assert_eq!(SyncState::PollUidInvalid.to_string(), "poll-uidinvalid");
        assert_eq!(SyncState::Finish.to_string(), "finish");
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FolderSyncProgress {
    pub account_id: i64,
    pub folder_name: String,
    pub state: SyncState,
}

/// Caches the last successfully observed UIDVALIDITY/HIGHESTMODSEQ pair for a
/// folder. Absence means the folder has never been selected.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct UidValidityCheckpoint {
    pub account_id: i64,
    pub uidvalidity: u32,
    pub highestmodseq: u64,
}
