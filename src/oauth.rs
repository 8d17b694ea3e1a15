/*!
 * Copyright (c) 2026 Ming Lyu, aka mingcheng
 *
 * This source code is licensed under the MIT License,
 * which is located in the LICENSE file in the source tree's root directory.
 *
 * File: oauth.rs
 * Author: mingcheng <mingcheng@apache.org>
 * File Created: 2026-03-03 09:12:50
 *
 * Modified By: mingcheng <mingcheng@apache.org>
 * Last Modified: 2026-03-05 17:40:03
 */

//! OAuth 2.0 token acquisition for the Gmail transport.
//!
//! Two flows end in the same [`OAuthToken`]:
//!
//! - **Device code**: the operator opens a URL on any device and types a
//!   short code while we poll the token endpoint.
//! - **Local redirect**: the operator authorizes in a browser which then
//!   redirects to a loopback listener (see [`crate::callback`]).
//!
//! Tokens are never refreshed here.

use crate::callback::{CALLBACK_ADDR, CALLBACK_TIMEOUT, CallbackListener, REDIRECT_URL};
use crate::error::{MailError, Result};
use chrono::{DateTime, Utc};
use log::{debug, info};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use url::Url;

pub const GOOGLE_AUTH_URL: &str = "https://accounts.google.com/o/oauth2/auth";
pub const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
pub const GOOGLE_DEVICE_URL: &str = "https://oauth2.googleapis.com/device/code";
pub const GMAIL_SEND_SCOPE: &str = "https://www.googleapis.com/auth/gmail.send";

const DEVICE_GRANT_TYPE: &str = "urn:ietf:params:oauth:grant-type:device_code";
const SLOW_DOWN_STEP: Duration = Duration::from_secs(5);

/// Access/refresh token pair. Created once by a flow, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OAuthToken {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: String,
    #[serde(default)]
    pub expiry: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OAuthFlow {
    #[default]
    Local,
    Device,
}

#[derive(Debug, Clone)]
pub struct OAuthEndpoints {
    pub auth_url: String,
    pub token_url: String,
    pub device_url: String,
}

impl OAuthEndpoints {
    pub fn google() -> Self {
        Self {
            auth_url: GOOGLE_AUTH_URL.to_string(),
            token_url: GOOGLE_TOKEN_URL.to_string(),
            device_url: GOOGLE_DEVICE_URL.to_string(),
        }
    }

    /// Every endpoint under one base URL, for fake servers.
    pub fn with_base(base: &str) -> Self {
        Self {
            auth_url: format!("{}/o/oauth2/auth", base),
            token_url: format!("{}/token", base),
            device_url: format!("{}/device/code", base),
        }
    }
}

/// What the operator has to see to finish the device flow.
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceAuthorization {
    pub device_code: String,
    pub user_code: String,
    // Google answers with verification_url, RFC 8628 with verification_uri
    #[serde(alias = "verification_url")]
    pub verification_uri: String,
    #[serde(default)]
    pub verification_uri_complete: Option<String>,
    pub expires_in: u64,
    #[serde(default = "default_poll_interval")]
    pub interval: u64,
}

fn default_poll_interval() -> u64 {
    5
}

impl DeviceAuthorization {
    /// Prefers the complete URL that already embeds the user code.
    pub fn instructions(&self) -> String {
        match self.verification_uri_complete.as_deref().filter(|u| !u.is_empty()) {
            Some(url) => format!("Open this URL:\n{}", url),
            None => format!(
                "Open this URL:\n{}\nEnter this code: {}",
                self.verification_uri, self.user_code
            ),
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
struct TokenErrorResponse {
    #[serde(default)]
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

enum DevicePoll {
    Granted(OAuthToken),
    Pending,
    SlowDown,
}

/// 128 random bits, hex encoded, for the `state` parameter.
pub fn generate_state() -> String {
    let bytes: [u8; 16] = rand::random();
    hex::encode(bytes)
}

#[derive(Clone)]
pub struct OAuthClient {
    client_id: String,
    client_secret: String,
    scope: String,
    redirect_url: String,
    endpoints: OAuthEndpoints,
    http: Client,
}

impl OAuthClient {
    /// Google endpoints, `gmail.send` scope and the fixed loopback redirect.
    pub fn google(client_id: &str, client_secret: &str, http: Client) -> Self {
        Self {
            client_id: client_id.to_string(),
            client_secret: client_secret.to_string(),
            scope: GMAIL_SEND_SCOPE.to_string(),
            redirect_url: REDIRECT_URL.to_string(),
            endpoints: OAuthEndpoints::google(),
            http,
        }
    }

    pub fn with_endpoints(mut self, endpoints: OAuthEndpoints) -> Self {
        self.endpoints = endpoints;
        self
    }

    pub fn with_redirect_url(mut self, redirect_url: impl Into<String>) -> Self {
        self.redirect_url = redirect_url.into();
        self
    }

    /// Consent URL. `access_type=offline` plus `prompt=consent` makes the
    /// server issue a refresh token even on repeat authorizations.
    pub fn authorization_url(&self, state: &str) -> Result<String> {
        let url = Url::parse_with_params(
            &self.endpoints.auth_url,
            &[
                ("client_id", self.client_id.as_str()),
                ("redirect_uri", self.redirect_url.as_str()),
                ("response_type", "code"),
                ("scope", self.scope.as_str()),
                ("state", state),
                ("access_type", "offline"),
                ("prompt", "consent"),
            ],
        )
        .map_err(|e| MailError::config(format!("invalid authorization url: {}", e)))?;
        Ok(url.into())
    }

    async fn post_form(&self, url: &str, params: &[(&str, &str)]) -> Result<reqwest::Response> {
        self.http
            .post(url)
            .form(params)
            .send()
            .await
            .map_err(|e| MailError::auth("token request", e))
    }

    pub async fn exchange_code(&self, code: &str) -> Result<OAuthToken> {
        let response = self
            .post_form(
                &self.endpoints.token_url,
                &[
                    ("client_id", self.client_id.as_str()),
                    ("client_secret", self.client_secret.as_str()),
                    ("code", code),
                    ("grant_type", "authorization_code"),
                    ("redirect_uri", self.redirect_url.as_str()),
                ],
            )
            .await?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(MailError::auth(
                "code exchange",
                describe_token_error(status.as_u16(), &body),
            ));
        }

        parse_token(&body, "code exchange")
    }

    pub async fn request_device_code(&self) -> Result<DeviceAuthorization> {
        let response = self
            .post_form(
                &self.endpoints.device_url,
                &[
                    ("client_id", self.client_id.as_str()),
                    ("scope", self.scope.as_str()),
                ],
            )
            .await?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(MailError::auth(
                "device authorization",
                describe_token_error(status.as_u16(), &body),
            ));
        }

        serde_json::from_str(&body)
            .map_err(|e| MailError::auth("device authorization", format!("bad response: {}", e)))
    }

    async fn poll_once(&self, device: &DeviceAuthorization) -> Result<DevicePoll> {
        let response = self
            .post_form(
                &self.endpoints.token_url,
                &[
                    ("client_id", self.client_id.as_str()),
                    ("client_secret", self.client_secret.as_str()),
                    ("device_code", device.device_code.as_str()),
                    ("grant_type", DEVICE_GRANT_TYPE),
                ],
            )
            .await?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if status.is_success() {
            return parse_token(&body, "device token").map(DevicePoll::Granted);
        }

        let error: TokenErrorResponse = serde_json::from_str(&body).unwrap_or_default();
        match error.error.as_str() {
            "authorization_pending" => Ok(DevicePoll::Pending),
            "slow_down" => Ok(DevicePoll::SlowDown),
            "access_denied" => Err(MailError::auth("device token", "authorization denied")),
            "expired_token" => Err(MailError::auth("device token", "device code expired")),
            _ => Err(MailError::auth(
                "device token",
                describe_token_error(status.as_u16(), &body),
            )),
        }
    }

    /// Polls until the operator approves, denies, or the code expires.
    pub async fn poll_device_token(&self, device: &DeviceAuthorization) -> Result<OAuthToken> {
        let deadline = Instant::now() + Duration::from_secs(device.expires_in);
        let mut interval = Duration::from_secs(device.interval);

        loop {
            if Instant::now() >= deadline {
                return Err(MailError::auth("device token", "device code expired"));
            }

            match self.poll_once(device).await? {
                DevicePoll::Granted(token) => return Ok(token),
                DevicePoll::Pending => debug!("Device authorization pending"),
                DevicePoll::SlowDown => {
                    interval += SLOW_DOWN_STEP;
                    debug!("Device flow asked to slow down, interval now {:?}", interval);
                }
            }

            tokio::time::sleep(interval).await;
        }
    }

    pub async fn run_device_flow<F: FnOnce(&str)>(&self, present: F) -> Result<OAuthToken> {
        let device = self.request_device_code().await?;
        present(&device.instructions());
        let token = self.poll_device_token(&device).await?;
        info!("Device authorization completed");
        Ok(token)
    }

    /// Local redirect flow on the fixed loopback address.
    pub async fn run_local_flow<F: FnOnce(&str)>(&self, present: F) -> Result<OAuthToken> {
        self.run_local_flow_on(CALLBACK_ADDR, CALLBACK_TIMEOUT, present)
            .await
    }

    pub async fn run_local_flow_on<F: FnOnce(&str)>(
        &self,
        addr: &str,
        timeout: Duration,
        present: F,
    ) -> Result<OAuthToken> {
        let state = generate_state();
        let listener = CallbackListener::bind(addr, &state).await?;
        let url = self.authorization_url(&state)?;

        present(&format!("Open this URL in your browser to authorize:\n{}", url));

        let code = listener.wait(timeout).await?;
        let token = self.exchange_code(&code).await?;
        info!("Browser authorization completed");
        Ok(token)
    }

    pub async fn authorize<F: FnOnce(&str)>(&self, flow: OAuthFlow, present: F) -> Result<OAuthToken> {
        match flow {
            OAuthFlow::Local => self.run_local_flow(present).await,
            OAuthFlow::Device => self.run_device_flow(present).await,
        }
    }
}

/// An empty access token is a failed flow even on HTTP 200.
fn parse_token(body: &str, stage: &str) -> Result<OAuthToken> {
    let response: TokenResponse = serde_json::from_str(body)
        .map_err(|e| MailError::auth(stage, format!("bad token response: {}", e)))?;

    if response.access_token.is_empty() {
        return Err(MailError::auth(stage, "empty access token"));
    }

    Ok(OAuthToken {
        access_token: response.access_token,
        refresh_token: response.refresh_token.unwrap_or_default(),
        expiry: response
            .expires_in
            .map(|secs| Utc::now() + chrono::Duration::seconds(secs)),
    })
}

fn describe_token_error(status: u16, body: &str) -> String {
    match serde_json::from_str::<TokenErrorResponse>(body) {
        Ok(err) if !err.error.is_empty() => match err.error_description {
            Some(description) => format!("{}: {} (status {})", err.error, description, status),
            None => format!("{} (status {})", err.error, status),
        },
        _ => format!("{} (status {})", body, status),
    }
}
