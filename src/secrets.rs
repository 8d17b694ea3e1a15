/*!
 * Copyright (c) 2026 Ming Lyu, aka mingcheng
 *
 * This source code is licensed under the MIT License,
 * which is located in the LICENSE file in the source tree's root directory.
 *
 * File: secrets.rs
 * Author: mingcheng <mingcheng@apache.org>
 * File Created: 2026-03-02 11:15:40
 *
 * Modified By: mingcheng <mingcheng@apache.org>
 * Last Modified: 2026-03-05 09:21:08
 */

//! Secret indirection.
//!
//! A configuration value of the form `keychain:<account>` is not a secret but
//! a pointer into the platform keychain. [`SecretResolver`] turns such values
//! into plaintext right before a send and passes anything else through.

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

pub const REF_PREFIX: &str = "keychain:";

/// Keychain service every secret is filed under.
pub const SERVICE_NAME: &str = "mail-courier";

#[derive(Debug, Error)]
pub enum SecretError {
    #[error("keychain is only supported on macOS")]
    Unsupported,

    #[error("secret not found in keychain for {0:?}")]
    NotFound(String),

    #[error("keychain error: {0}")]
    Store(String),
}

/// The platform secret store. Only its contract is relied upon here.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Whether the store can be used on this host at all.
    fn is_supported(&self) -> bool;

    async fn set(&self, account: &str, secret: &str) -> Result<(), SecretError>;

    /// Returns `None` when no secret is stored for `account`.
    async fn get(&self, account: &str) -> Result<Option<String>, SecretError>;

    async fn delete(&self, account: &str) -> Result<(), SecretError>;
}

/// [`SecretStore`] backed by the macOS keychain through the keyring crate.
#[derive(Debug, Clone)]
pub struct KeychainStore {
    service: String,
}

impl KeychainStore {
    pub fn new() -> Self {
        Self::with_service(SERVICE_NAME)
    }

    /// Useful for keeping test entries away from real credentials.
    pub fn with_service(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    fn ensure_supported(&self) -> Result<(), SecretError> {
        if self.is_supported() {
            Ok(())
        } else {
            Err(SecretError::Unsupported)
        }
    }
}

impl Default for KeychainStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SecretStore for KeychainStore {
    fn is_supported(&self) -> bool {
        cfg!(target_os = "macos")
    }

    async fn set(&self, account: &str, secret: &str) -> Result<(), SecretError> {
        self.ensure_supported()?;
        let service = self.service.clone();
        let account = account.to_string();
        let secret = secret.to_string();

        tokio::task::spawn_blocking(move || {
            let entry = keyring::Entry::new(&service, &account)
                .map_err(|e| SecretError::Store(e.to_string()))?;
            entry
                .set_password(&secret)
                .map_err(|e| SecretError::Store(format!("failed to store {}: {}", account, e)))
        })
        .await
        .map_err(|e| SecretError::Store(e.to_string()))?
    }

    async fn get(&self, account: &str) -> Result<Option<String>, SecretError> {
        self.ensure_supported()?;
        let service = self.service.clone();
        let account = account.to_string();

        tokio::task::spawn_blocking(move || {
            let entry = keyring::Entry::new(&service, &account)
                .map_err(|e| SecretError::Store(e.to_string()))?;
            match entry.get_password() {
                Ok(secret) => Ok(Some(secret.trim().to_string())),
                Err(keyring::Error::NoEntry) => Ok(None),
                Err(e) => Err(SecretError::Store(e.to_string())),
            }
        })
        .await
        .map_err(|e| SecretError::Store(e.to_string()))?
    }

    async fn delete(&self, account: &str) -> Result<(), SecretError> {
        self.ensure_supported()?;
        let service = self.service.clone();
        let account = account.to_string();

        tokio::task::spawn_blocking(move || {
            let entry = keyring::Entry::new(&service, &account)
                .map_err(|e| SecretError::Store(e.to_string()))?;
            match entry.delete_credential() {
                Ok(()) => Ok(()),
                Err(keyring::Error::NoEntry) => Err(SecretError::NotFound(account)),
                Err(e) => Err(SecretError::Store(e.to_string())),
            }
        })
        .await
        .map_err(|e| SecretError::Store(e.to_string()))?
    }
}

/// Returns true if `value` points into the keychain. The prefix match is
/// case sensitive.
pub fn is_ref(value: &str) -> bool {
    value.starts_with(REF_PREFIX)
}

/// Account name behind a reference, or an empty string for plain values.
pub fn parse_ref(value: &str) -> &str {
    value.strip_prefix(REF_PREFIX).unwrap_or("")
}

/// Canonical reference for a provider field, e.g. `keychain:work/password`.
pub fn make_ref(namespace: &str, field: &str) -> String {
    format!("{}{}/{}", REF_PREFIX, namespace, field)
}

#[derive(Clone)]
pub struct SecretResolver {
    store: Arc<dyn SecretStore>,
}

impl SecretResolver {
    pub fn new(store: Arc<dyn SecretStore>) -> Self {
        Self { store }
    }

    pub fn keychain() -> Self {
        Self::new(Arc::new(KeychainStore::new()))
    }

    pub fn is_supported(&self) -> bool {
        self.store.is_supported()
    }

    /// Plain values come back untouched without consulting the store.
    pub async fn resolve(&self, value: &str) -> Result<String, SecretError> {
        if !is_ref(value) {
            return Ok(value.to_string());
        }
        if !self.store.is_supported() {
            return Err(SecretError::Unsupported);
        }

        let account = parse_ref(value);
        self.store
            .get(account)
            .await?
            .ok_or_else(|| SecretError::NotFound(account.to_string()))
    }

    /// Stores `secret` and returns the reference to write into config.
    pub async fn store(
        &self,
        namespace: &str,
        field: &str,
        secret: &str,
    ) -> Result<String, SecretError> {
        if !self.store.is_supported() {
            return Err(SecretError::Unsupported);
        }

        let reference = make_ref(namespace, field);
        let account = parse_ref(&reference);
        // Replace rather than fail on an existing entry
        let _ = self.store.delete(account).await;
        self.store.set(account, secret).await?;
        Ok(reference)
    }

    pub async fn forget(&self, reference: &str) -> Result<(), SecretError> {
        if !is_ref(reference) {
            return Ok(());
        }
        if !self.store.is_supported() {
            return Err(SecretError::Unsupported);
        }
        self.store.delete(parse_ref(reference)).await
    }
}
