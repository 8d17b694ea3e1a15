//! Proton Mail Bridge.
//!
//! Bridge exposes a local SMTP server (127.0.0.1:1025 by default) that only
//! speaks STARTTLS, so this is [`SmtpSender`] with bridge defaults and TLS
//! always on.

use crate::error::Result;
use crate::smtp_sender::{LettreConnector, SmtpConfig, SmtpConnector, SmtpSender};
use crate::traits::{Email, MailTransport};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub const DEFAULT_BRIDGE_HOST: &str = "127.0.0.1";
pub const DEFAULT_BRIDGE_PORT: u16 = 1025;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BridgeConfig {
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub port: u16,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

impl BridgeConfig {
    /// The SMTP settings actually used to reach the bridge.
    pub fn to_smtp_config(&self) -> SmtpConfig {
        SmtpConfig {
            host: if self.host.is_empty() {
                DEFAULT_BRIDGE_HOST.to_string()
            } else {
                self.host.clone()
            },
            port: if self.port == 0 {
                DEFAULT_BRIDGE_PORT
            } else {
                self.port
            },
            username: self.username.clone(),
            password: self.password.clone(),
            use_tls: true,
        }
    }
}

pub struct ProtonSender {
    smtp: SmtpSender,
}

impl ProtonSender {
    pub fn new(from: impl Into<String>, config: &BridgeConfig) -> Self {
        Self::new_with_connector(from, config, Arc::new(LettreConnector::new()))
    }

    pub fn new_with_connector(
        from: impl Into<String>,
        config: &BridgeConfig,
        connector: Arc<dyn SmtpConnector>,
    ) -> Self {
        Self {
            smtp: SmtpSender::new_with_connector(from, config.to_smtp_config(), connector),
        }
    }

    pub fn smtp_config(&self) -> &SmtpConfig {
        self.smtp.config()
    }
}

#[async_trait]
impl MailTransport for ProtonSender {
    async fn send(&self, email: &Email) -> Result<()> {
        self.smtp.send(email).await
    }

    fn name(&self) -> &'static str {
        "proton"
    }
}
