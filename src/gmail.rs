//! Gmail API transport.
//!
//! Messages are rendered with [`crate::mime`] and submitted through
//! `users.messages.send` as a base64url `raw` payload. The API has no notion
//! of an envelope, so blind copies are delivered as separate messages.

use crate::error::{MailError, Result};
use crate::mime::build_message;
use crate::oauth::{OAuthFlow, OAuthToken};
use crate::sanitize::sanitize_address_list;
use crate::traits::{Email, MailTransport};
use async_trait::async_trait;
use base64::prelude::*;
use chrono::{DateTime, Utc};
use log::{debug, info};
use reqwest::Client;
use reqwest::header::{AUTHORIZATION, HeaderValue};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub const GMAIL_API_BASE: &str = "https://gmail.googleapis.com/gmail/v1";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GmailConfig {
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub access_token: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub refresh_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_expiry: Option<DateTime<Utc>>,
    #[serde(default)]
    pub oauth_flow: OAuthFlow,
}

impl GmailConfig {
    pub fn token(&self) -> OAuthToken {
        OAuthToken {
            access_token: self.access_token.clone(),
            refresh_token: self.refresh_token.clone(),
            expiry: self.token_expiry,
        }
    }
}

/// The one API call the transport needs.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RawMessageApi: Send + Sync {
    /// Submits a complete RFC 5322 message.
    async fn send_raw(&self, message: &[u8]) -> Result<()>;
}

#[derive(Serialize)]
struct SendRequest {
    raw: String,
}

#[derive(Deserialize)]
struct SendResponse {
    #[serde(default)]
    id: String,
}

/// Bearer authenticated client for `users.messages.send`.
pub struct GmailApiClient {
    http: Client,
    api_base: String,
    authorization: HeaderValue,
}

impl GmailApiClient {
    pub fn new(http: Client, token: &OAuthToken) -> Result<Self> {
        if token.access_token.is_empty() {
            return Err(MailError::auth(
                "gmail client",
                "no access token, authorize the provider first",
            ));
        }

        let mut authorization = HeaderValue::from_str(&format!("Bearer {}", token.access_token))
            .map_err(|e| MailError::auth("gmail client", format!("invalid access token: {}", e)))?;
        authorization.set_sensitive(true);

        Ok(Self {
            http,
            api_base: GMAIL_API_BASE.to_string(),
            authorization,
        })
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }
}

#[async_trait]
impl RawMessageApi for GmailApiClient {
    async fn send_raw(&self, message: &[u8]) -> Result<()> {
        let url = format!("{}/users/me/messages/send", self.api_base);
        let payload = SendRequest {
            raw: BASE64_URL_SAFE_NO_PAD.encode(message),
        };

        let response = self
            .http
            .post(&url)
            .header(AUTHORIZATION, self.authorization.clone())
            .json(&payload)
            .send()
            .await
            .map_err(|e| MailError::transport("gmail send", e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(MailError::transport(
                "gmail send",
                format!("{} (status {})", body, status.as_u16()),
            ));
        }

        let sent: SendResponse = response.json().await.unwrap_or(SendResponse { id: String::new() });
        debug!("Gmail accepted message {}", sent.id);
        Ok(())
    }
}

pub struct GmailSender {
    from: String,
    api: Arc<dyn RawMessageApi>,
}

impl GmailSender {
    /// Sets up the authenticated client. No request is made here.
    pub fn new(from: impl Into<String>, config: &GmailConfig, http: Client) -> Result<Self> {
        let api = GmailApiClient::new(http, &config.token())?;
        Ok(Self::new_with_api(from, Arc::new(api)))
    }

    pub fn new_with_api(from: impl Into<String>, api: Arc<dyn RawMessageApi>) -> Self {
        Self {
            from: from.into(),
            api,
        }
    }

    async fn send_single(&self, email: &Email) -> Result<()> {
        let message = build_message(email.from_or(&self.from), email)?;
        self.api.send_raw(&message).await
    }
}

#[async_trait]
impl MailTransport for GmailSender {
    /// Without Bcc this is one API call. With Bcc, the visible copy goes to
    /// To/Cc and each blind recipient gets an independent message addressed
    /// only to them. The first failure stops the fan-out.
    async fn send(&self, email: &Email) -> Result<()> {
        let to = sanitize_address_list(&email.to);
        let cc = sanitize_address_list(&email.cc);
        let bcc = sanitize_address_list(&email.bcc);

        if to.is_empty() && cc.is_empty() && bcc.is_empty() {
            return Err(MailError::transport(
                "recipients",
                "at least one recipient is required",
            ));
        }

        if bcc.is_empty() {
            self.send_single(email).await?;
            info!("Sent message via Gmail API");
            return Ok(());
        }

        if !to.is_empty() || !cc.is_empty() {
            let visible = Email {
                to,
                cc,
                bcc: Vec::new(),
                ..email.clone()
            };
            self.send_single(&visible).await?;
        }

        for recipient in &bcc {
            let private = Email {
                to: vec![recipient.clone()],
                cc: Vec::new(),
                bcc: Vec::new(),
                ..email.clone()
            };
            self.send_single(&private).await?;
        }

        info!("Sent message via Gmail API with {} blind copies", bcc.len());
        Ok(())
    }

    fn name(&self) -> &'static str {
        "google"
    }
}
