// Copyright (c) 2025 TexasFortress.AI
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! SASL authenticators for `async-imap`. The session/client/types scaffolding
//! this module used to carry moved to [`crate::remote::imap_mailbox`]; only
//! the XOAUTH2 authenticator survives here since it plugs directly into
//! `async_imap::Session::authenticate`.

pub mod xoauth2;

pub use xoauth2::XOAuth2Authenticator;
