/*!
 * Copyright (c) 2026 Ming Lyu, aka mingcheng
 *
 * This source code is licensed under the MIT License,
 * which is located in the LICENSE file in the source tree's root directory.
 *
 * File: error.rs
 * Author: mingcheng <mingcheng@apache.org>
 * File Created: 2026-03-02 10:12:45
 *
 * Modified By: mingcheng <mingcheng@apache.org>
 * Last Modified: 2026-03-04 18:40:11
 */

use crate::secrets::SecretError;
use thiserror::Error;

/// Every failure a transport, the factory or an OAuth flow can report.
///
/// Nothing in this crate retries; each variant carries enough context
/// (stage, status, field) for the caller to decide what to do.
#[derive(Debug, Error)]
pub enum MailError {
    /// Missing or contradictory provider settings.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A secret reference was present but could not be resolved.
    #[error("failed to resolve {field}: {source}")]
    SecretResolution {
        field: String,
        #[source]
        source: SecretError,
    },

    #[error("auth failed ({stage}): {message}")]
    Auth { stage: String, message: String },

    #[error("{stage} failed: {message}")]
    Transport { stage: String, message: String },

    #[error("failed to read attachment {name}: {reason}")]
    AttachmentRead { name: String, reason: String },
}

impl MailError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    pub fn auth(stage: impl Into<String>, message: impl ToString) -> Self {
        Self::Auth {
            stage: stage.into(),
            message: message.to_string(),
        }
    }

    pub fn transport(stage: impl Into<String>, message: impl ToString) -> Self {
        Self::Transport {
            stage: stage.into(),
            message: message.to_string(),
        }
    }

    /// Stage name for `Auth` and `Transport` errors.
    pub fn stage(&self) -> Option<&str> {
        match self {
            Self::Auth { stage, .. } | Self::Transport { stage, .. } => Some(stage),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, MailError>;
