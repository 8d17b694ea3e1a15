/*!
 * Copyright (c) 2026 Ming Lyu, aka mingcheng
 *
 * This source code is licensed under the MIT License,
 * which is located in the LICENSE file in the source tree's root directory.
 *
 * File: lib.rs
 * Author: mingcheng <mingcheng@apache.org>
 * File Created: 2026-03-02 10:05:11
 *
 * Modified By: mingcheng <mingcheng@apache.org>
 * Last Modified: 2026-03-05 17:44:20
 */

//! Outgoing mail over SMTP, Proton Mail Bridge, the Gmail API and AgentMail,
//! behind one [`MailTransport`] trait.

pub mod agentmail;
pub mod callback;
pub mod config;
pub mod error;
pub mod gmail;
pub mod mime;
pub mod oauth;
pub mod proton;
pub mod provider;
pub mod sanitize;
pub mod secrets;
pub mod smtp_sender;
pub mod traits;

pub use error::{MailError, Result};
pub use provider::{ProviderConfig, ProviderKind, ProviderSettings, create_transport};
pub use secrets::SecretResolver;
pub use traits::{Attachment, Email, MailTransport};
