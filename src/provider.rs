//! Named provider configurations and the transport factory.

use crate::agentmail::{AgentMailConfig, AgentMailSender};
use crate::error::{MailError, Result};
use crate::gmail::{GmailConfig, GmailSender};
use crate::proton::{BridgeConfig, ProtonSender};
use crate::secrets::SecretResolver;
use crate::smtp_sender::{SmtpConfig, SmtpSender};
use crate::traits::MailTransport;
use log::debug;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Timeout for every HTTP call made by the API transports.
pub const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Smtp,
    Proton,
    Google,
    AgentMail,
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Smtp => "smtp",
            Self::Proton => "proton",
            Self::Google => "google",
            Self::AgentMail => "agentmail",
        };
        f.write_str(name)
    }
}

/// Settings of the one active provider variant.
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderSettings {
    Smtp(SmtpConfig),
    Proton(BridgeConfig),
    Google(GmailConfig),
    AgentMail(AgentMailConfig),
}

impl ProviderSettings {
    pub fn kind(&self) -> ProviderKind {
        match self {
            Self::Smtp(_) => ProviderKind::Smtp,
            Self::Proton(_) => ProviderKind::Proton,
            Self::Google(_) => ProviderKind::Google,
            Self::AgentMail(_) => ProviderKind::AgentMail,
        }
    }
}

/// A stored, named provider.
///
/// On disk this is `{ type, name, from, <type section> }`. The section
/// matching `type` must be present and no other section may be, otherwise
/// deserialization fails with a configuration error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawProviderConfig", into = "RawProviderConfig")]
pub struct ProviderConfig {
    pub name: String,
    pub from: String,
    pub settings: ProviderSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RawProviderConfig {
    #[serde(rename = "type")]
    kind: ProviderKind,
    #[serde(default)]
    name: String,
    #[serde(default)]
    from: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    smtp: Option<SmtpConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    proton: Option<BridgeConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    google: Option<GmailConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    agentmail: Option<AgentMailConfig>,
}

impl TryFrom<RawProviderConfig> for ProviderConfig {
    type Error = MailError;

    fn try_from(raw: RawProviderConfig) -> Result<Self> {
        let mut present = Vec::new();
        if raw.smtp.is_some() {
            present.push(ProviderKind::Smtp);
        }
        if raw.proton.is_some() {
            present.push(ProviderKind::Proton);
        }
        if raw.google.is_some() {
            present.push(ProviderKind::Google);
        }
        if raw.agentmail.is_some() {
            present.push(ProviderKind::AgentMail);
        }

        if let Some(other) = present.iter().find(|k| **k != raw.kind) {
            return Err(MailError::config(format!(
                "{} provider cannot carry a {} section",
                raw.kind, other
            )));
        }

        let settings = match raw.kind {
            ProviderKind::Smtp => raw.smtp.map(ProviderSettings::Smtp),
            ProviderKind::Proton => raw.proton.map(ProviderSettings::Proton),
            ProviderKind::Google => raw.google.map(ProviderSettings::Google),
            ProviderKind::AgentMail => raw.agentmail.map(ProviderSettings::AgentMail),
        }
        .ok_or_else(|| MailError::config(format!("{} config missing", raw.kind)))?;

        Ok(Self {
            name: raw.name,
            from: raw.from,
            settings,
        })
    }
}

impl From<ProviderConfig> for RawProviderConfig {
    fn from(config: ProviderConfig) -> Self {
        let mut raw = RawProviderConfig {
            kind: config.settings.kind(),
            name: config.name,
            from: config.from,
            smtp: None,
            proton: None,
            google: None,
            agentmail: None,
        };
        match config.settings {
            ProviderSettings::Smtp(c) => raw.smtp = Some(c),
            ProviderSettings::Proton(c) => raw.proton = Some(c),
            ProviderSettings::Google(c) => raw.google = Some(c),
            ProviderSettings::AgentMail(c) => raw.agentmail = Some(c),
        }
        raw
    }
}

async fn resolve_field(resolver: &SecretResolver, field: &str, value: &str) -> Result<String> {
    if value.is_empty() {
        return Ok(String::new());
    }
    resolver
        .resolve(value)
        .await
        .map_err(|source| MailError::SecretResolution {
            field: field.to_string(),
            source,
        })
}

impl ProviderConfig {
    pub fn kind(&self) -> ProviderKind {
        self.settings.kind()
    }

    /// Returns a copy with every secret-bearing field resolved to plaintext.
    ///
    /// Plain values pass through untouched; the first unresolvable reference
    /// fails the whole call.
    pub async fn resolve_secrets(&self, resolver: &SecretResolver) -> Result<ProviderConfig> {
        let settings = match &self.settings {
            ProviderSettings::Smtp(c) => ProviderSettings::Smtp(SmtpConfig {
                password: resolve_field(resolver, "smtp.password", &c.password).await?,
                ..c.clone()
            }),
            ProviderSettings::Proton(c) => ProviderSettings::Proton(BridgeConfig {
                password: resolve_field(resolver, "proton.password", &c.password).await?,
                ..c.clone()
            }),
            ProviderSettings::Google(c) => ProviderSettings::Google(GmailConfig {
                client_secret: resolve_field(resolver, "google.client_secret", &c.client_secret)
                    .await?,
                access_token: resolve_field(resolver, "google.access_token", &c.access_token)
                    .await?,
                refresh_token: resolve_field(resolver, "google.refresh_token", &c.refresh_token)
                    .await?,
                ..c.clone()
            }),
            ProviderSettings::AgentMail(c) => ProviderSettings::AgentMail(AgentMailConfig {
                api_key: resolve_field(resolver, "agentmail.api_key", &c.api_key).await?,
                ..c.clone()
            }),
        };

        Ok(ProviderConfig {
            name: self.name.clone(),
            from: self.from.clone(),
            settings,
        })
    }
}

/// The shared client for API transports.
pub fn default_http_client() -> Result<Client> {
    Client::builder()
        .timeout(HTTP_TIMEOUT)
        .build()
        .map_err(|e| MailError::config(format!("failed to build http client: {}", e)))
}

/// Builds the transport for `config`. Secrets must already be resolved.
///
/// Nothing here touches the network.
pub fn create_transport(config: &ProviderConfig, http: Client) -> Result<Box<dyn MailTransport>> {
    debug!("Creating {} transport for provider {:?}", config.kind(), config.name);

    match &config.settings {
        ProviderSettings::Smtp(smtp) => {
            if smtp.host.trim().is_empty() {
                return Err(MailError::config("smtp host is required"));
            }
            Ok(Box::new(SmtpSender::new(config.from.clone(), smtp.clone())))
        }
        ProviderSettings::Proton(bridge) => {
            Ok(Box::new(ProtonSender::new(config.from.clone(), bridge)))
        }
        ProviderSettings::Google(google) => {
            if google.client_id.is_empty() {
                return Err(MailError::config("google client_id is required"));
            }
            if google.client_secret.is_empty() {
                return Err(MailError::config("google client_secret is required"));
            }
            Ok(Box::new(GmailSender::new(config.from.clone(), google, http)?))
        }
        ProviderSettings::AgentMail(agentmail) => {
            Ok(Box::new(AgentMailSender::new(agentmail, http)?))
        }
    }
}
