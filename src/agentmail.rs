/*!
 * Copyright (c) 2026 Ming Lyu, aka mingcheng
 *
 * This source code is licensed under the MIT License,
 * which is located in the LICENSE file in the source tree's root directory.
 *
 * File: agentmail.rs
 * Author: mingcheng <mingcheng@apache.org>
 * File Created: 2026-03-04 11:20:37
 *
 * Modified By: mingcheng <mingcheng@apache.org>
 * Last Modified: 2026-03-05 16:18:09
 */

use crate::error::{MailError, Result};
use crate::mime::{attachment_filename, mime_type_for};
use crate::sanitize::{sanitize_address_list, sanitize_header_value};
use crate::traits::{Email, MailTransport};
use async_trait::async_trait;
use base64::prelude::*;
use log::{error, info};
use reqwest::Client;
use reqwest::header::AUTHORIZATION;
use serde::{Deserialize, Serialize};
use url::Url;

pub const AGENTMAIL_API_BASE: &str = "https://api.agentmail.to/v0";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentMailConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub inbox_id: String,
}

#[derive(Debug, Serialize)]
struct SendAttachment {
    filename: String,
    content: String,
    content_type: String,
}

#[derive(Debug, Default, Serialize)]
struct SendRequest {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    to: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    cc: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    bcc: Vec<String>,
    #[serde(skip_serializing_if = "String::is_empty")]
    subject: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    text: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    html: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    attachments: Vec<SendAttachment>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(default)]
    message: String,
}

/// Sends through the AgentMail REST API.
pub struct AgentMailSender {
    api_key: String,
    inbox_id: String,
    client: Client,
    api_base: String,
}

impl AgentMailSender {
    pub fn new(config: &AgentMailConfig, client: Client) -> Result<Self> {
        if config.api_key.is_empty() {
            return Err(MailError::config("agentmail api_key is required"));
        }
        if config.inbox_id.is_empty() {
            return Err(MailError::config("agentmail inbox_id is required"));
        }

        Ok(Self {
            api_key: config.api_key.clone(),
            inbox_id: config.inbox_id.clone(),
            client,
            api_base: AGENTMAIL_API_BASE.to_string(),
        })
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    /// `{base}/inboxes/{inbox_id}/messages/send`, with the inbox id escaped
    /// as a single path segment.
    fn send_url(&self) -> Result<Url> {
        let mut url = Url::parse(&self.api_base)
            .map_err(|e| MailError::config(format!("invalid agentmail api base: {}", e)))?;
        url.path_segments_mut()
            .map_err(|_| MailError::config("agentmail api base cannot hold a path"))?
            .pop_if_empty()
            .extend(["inboxes", self.inbox_id.as_str(), "messages", "send"]);
        Ok(url)
    }

    fn build_request(email: &Email) -> Result<SendRequest> {
        let attachments = email
            .attachments
            .iter()
            .map(|att| {
                let content = att.read_content()?;
                let filename = attachment_filename(att);
                Ok(SendAttachment {
                    content_type: mime_type_for(&filename),
                    content: BASE64_STANDARD.encode(content),
                    filename,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let mut request = SendRequest {
            to: sanitize_address_list(&email.to),
            cc: sanitize_address_list(&email.cc),
            bcc: sanitize_address_list(&email.bcc),
            subject: sanitize_header_value(&email.subject),
            text: email.body.clone(),
            attachments,
            ..Default::default()
        };
        if email.html {
            request.html = email.body.clone();
        }

        Ok(request)
    }
}

/// Prefers the structured `message`, falls back to the raw body and status.
fn describe_error(status: u16, body: &str) -> String {
    match serde_json::from_str::<ApiError>(body) {
        Ok(api) if !api.message.is_empty() => format!("agentmail error: {}", api.message),
        _ => format!("agentmail error: {} (status {})", body, status),
    }
}

#[async_trait]
impl MailTransport for AgentMailSender {
    async fn send(&self, email: &Email) -> Result<()> {
        let request = Self::build_request(email)?;
        if request.to.is_empty() && request.cc.is_empty() && request.bcc.is_empty() {
            return Err(MailError::transport(
                "recipients",
                "at least one recipient is required",
            ));
        }
        let url = self.send_url()?;

        let response = self
            .client
            .post(url)
            .header(AUTHORIZATION, format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await
            .map_err(|e| MailError::transport("agentmail send", e))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            error!("AgentMail API error: {} - {}", status, text);
            return Err(MailError::transport(
                "agentmail send",
                describe_error(status.as_u16(), &text),
            ));
        }

        info!("Sent message via AgentMail inbox {}", self.inbox_id);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "agentmail"
    }
}
