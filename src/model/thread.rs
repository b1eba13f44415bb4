// Copyright (c) 2025 TexasFortress.AI
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A thread row. Created and updated exclusively by the account's
/// `ThreadDetector` — nothing else is allowed to write these, which is what
/// keeps "at most one Thread per provider_thrid" true without a DB-level lock.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Thread {
    pub id: i64,
    pub account_id: i64,
    pub provider_thrid: Option<String>,
    pub subject: Option<String>,
    pub latest_date: Option<DateTime<Utc>>,
}

impl Thread {
    pub fn update_from_message(&mut self, subject: Option<&str>, date: Option<DateTime<Utc>>) {
        if self.subject.is_none() {
            self.subject = subject.map(str::to_string);
        }
        if let Some(date) = date {
            if self.latest_date.map_or(true, |latest| date > latest) {
                self.latest_date = Some(date);
            }
        }
    }
}
