use crate::error::{MailError, Result};
use crate::mime::build_message;
use crate::sanitize::{sanitize_address_list, sanitize_header_value};
use crate::traits::{Email, MailTransport};
use async_trait::async_trait;
use lettre::Address;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::{Credentials, Mechanism};
use lettre::transport::smtp::client::{AsyncSmtpConnection, TlsParameters};
use lettre::transport::smtp::commands::{Data, Mail, Rcpt};
use lettre::transport::smtp::extension::ClientId;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_SUBMISSION_PORT: u16 = 587;
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SmtpConfig {
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub port: u16,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub use_tls: bool,
}

impl SmtpConfig {
    pub fn port_or_default(&self) -> u16 {
        if self.port == 0 {
            DEFAULT_SUBMISSION_PORT
        } else {
            self.port
        }
    }

    fn has_credentials(&self) -> bool {
        !self.username.is_empty() || !self.password.is_empty()
    }

    /// Plaintext AUTH is tolerated only towards the local machine.
    fn is_loopback(&self) -> bool {
        self.host.eq_ignore_ascii_case("localhost")
            || self
                .host
                .parse::<IpAddr>()
                .map(|ip| ip.is_loopback())
                .unwrap_or(false)
    }
}

/// The server answered but refused the session (greeting or EHLO). Unlike a
/// failed handshake this does not warrant a STARTTLS retry.
#[derive(Debug, Error)]
#[error("server rejected session: {0}")]
pub struct SessionRejected(pub String);

/// One open SMTP conversation. EHLO has already happened when a session is
/// handed out.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SmtpSession: Send {
    fn can_starttls(&self) -> bool;

    async fn starttls(&mut self, host: &str) -> anyhow::Result<()>;

    async fn authenticate(&mut self, username: &str, password: &str) -> anyhow::Result<()>;

    async fn mail_from(&mut self, from: &str) -> anyhow::Result<()>;

    async fn rcpt_to(&mut self, recipient: &str) -> anyhow::Result<()>;

    async fn data(&mut self, message: &[u8]) -> anyhow::Result<()>;

    async fn quit(&mut self) -> anyhow::Result<()>;
}

// Abstract the dialing so the state machine can be tested without a server
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SmtpConnector: Send + Sync {
    /// Implicit TLS from the first byte.
    async fn connect_tls(&self, host: &str, port: u16) -> anyhow::Result<Box<dyn SmtpSession>>;

    async fn connect_plain(&self, host: &str, port: u16) -> anyhow::Result<Box<dyn SmtpSession>>;
}

// Wrapper for a real lettre connection
pub struct LettreSession {
    conn: AsyncSmtpConnection,
    hello_name: ClientId,
}

/// Accepts both `user@host` and `Name <user@host>`.
fn parse_address(value: &str) -> anyhow::Result<Address> {
    if let Ok(address) = value.parse::<Address>() {
        return Ok(address);
    }
    value
        .parse::<Mailbox>()
        .map(|mailbox| mailbox.email)
        .map_err(|e| anyhow::anyhow!("invalid address {:?}: {}", value, e))
}

#[async_trait]
impl SmtpSession for LettreSession {
    fn can_starttls(&self) -> bool {
        self.conn.can_starttls()
    }

    async fn starttls(&mut self, host: &str) -> anyhow::Result<()> {
        let tls = TlsParameters::new(host.to_string())?;
        self.conn.starttls(tls, &self.hello_name).await?;
        Ok(())
    }

    async fn authenticate(&mut self, username: &str, password: &str) -> anyhow::Result<()> {
        let creds = Credentials::new(username.to_string(), password.to_string());
        self.conn.auth(&[Mechanism::Plain], &creds).await?;
        Ok(())
    }

    async fn mail_from(&mut self, from: &str) -> anyhow::Result<()> {
        let address = parse_address(from)?;
        self.conn.command(Mail::new(Some(address), vec![])).await?;
        Ok(())
    }

    async fn rcpt_to(&mut self, recipient: &str) -> anyhow::Result<()> {
        let address = parse_address(recipient)?;
        self.conn.command(Rcpt::new(address, vec![])).await?;
        Ok(())
    }

    async fn data(&mut self, message: &[u8]) -> anyhow::Result<()> {
        self.conn.command(Data).await?;
        self.conn.message(message).await?;
        Ok(())
    }

    async fn quit(&mut self) -> anyhow::Result<()> {
        self.conn.quit().await?;
        Ok(())
    }
}

pub struct LettreConnector {
    timeout: Duration,
}

impl LettreConnector {
    pub fn new() -> Self {
        Self {
            timeout: CONNECT_TIMEOUT,
        }
    }

    async fn connect(
        &self,
        host: &str,
        port: u16,
        tls: Option<TlsParameters>,
    ) -> anyhow::Result<Box<dyn SmtpSession>> {
        let hello_name = ClientId::default();
        let conn = AsyncSmtpConnection::connect_tokio1(
            (host, port),
            Some(self.timeout),
            &hello_name,
            tls,
            None,
        )
        .await
        .map_err(|e| {
            if e.is_transient() || e.is_permanent() {
                anyhow::Error::new(SessionRejected(e.to_string()))
            } else {
                anyhow::Error::new(e)
            }
        })?;

        Ok(Box::new(LettreSession { conn, hello_name }))
    }
}

impl Default for LettreConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SmtpConnector for LettreConnector {
    async fn connect_tls(&self, host: &str, port: u16) -> anyhow::Result<Box<dyn SmtpSession>> {
        let tls = TlsParameters::new(host.to_string())
            .map_err(|e| anyhow::anyhow!("Invalid TLS parameters: {}", e))?;
        self.connect(host, port, Some(tls)).await
    }

    async fn connect_plain(&self, host: &str, port: u16) -> anyhow::Result<Box<dyn SmtpSession>> {
        self.connect(host, port, None).await
    }
}

#[cfg(test)]
#[path = "./smtp_sender_tests.rs"]
mod smtp_sender_tests;

/// Generic SMTP submission with PLAIN auth.
pub struct SmtpSender {
    from: String,
    config: SmtpConfig,
    connector: Arc<dyn SmtpConnector>,
}

impl SmtpSender {
    pub fn new(from: impl Into<String>, config: SmtpConfig) -> Self {
        Self::new_with_connector(from, config, Arc::new(LettreConnector::new()))
    }

    pub fn new_with_connector(
        from: impl Into<String>,
        config: SmtpConfig,
        connector: Arc<dyn SmtpConnector>,
    ) -> Self {
        Self {
            from: from.into(),
            config,
            connector,
        }
    }

    pub fn config(&self) -> &SmtpConfig {
        &self.config
    }

    fn address(&self) -> String {
        format!("{}:{}", self.config.host, self.config.port_or_default())
    }

    /// Opens a session and reports whether it is encrypted.
    ///
    /// Direct TLS is tried first when TLS is requested; only a failure to
    /// establish that connection falls back to plaintext plus STARTTLS. A
    /// server that answers and refuses the session is reported as is.
    /// Without TLS, STARTTLS is still used when the server offers it.
    pub async fn open_session(&self) -> Result<(Box<dyn SmtpSession>, bool)> {
        let host = self.config.host.as_str();
        let port = self.config.port_or_default();

        if self.config.use_tls {
            match self.connector.connect_tls(host, port).await {
                Ok(session) => {
                    debug!("Connected to {} over TLS", self.address());
                    return Ok((session, true));
                }
                Err(e) if e.is::<SessionRejected>() => {
                    return Err(MailError::transport(
                        "connect",
                        format!("{}: {}", self.address(), e),
                    ));
                }
                Err(e) => {
                    warn!(
                        "Direct TLS to {} failed ({}), retrying with STARTTLS",
                        self.address(),
                        e
                    );
                }
            }
            return self.open_starttls_session(true).await;
        }

        self.open_starttls_session(false).await
    }

    async fn open_starttls_session(&self, required: bool) -> Result<(Box<dyn SmtpSession>, bool)> {
        let host = self.config.host.as_str();
        let mut session = self
            .connector
            .connect_plain(host, self.config.port_or_default())
            .await
            .map_err(|e| MailError::transport("connect", format!("{}: {}", self.address(), e)))?;

        if required || session.can_starttls() {
            session
                .starttls(host)
                .await
                .map_err(|e| MailError::transport("starttls", e))?;
            debug!("Upgraded connection to {} with STARTTLS", self.address());
            return Ok((session, true));
        }

        debug!("Continuing unencrypted with {}", self.address());
        Ok((session, false))
    }

    async fn deliver(
        &self,
        session: &mut dyn SmtpSession,
        secured: bool,
        mail_from: &str,
        recipients: &[String],
        message: &[u8],
    ) -> Result<()> {
        if self.config.has_credentials() {
            if !secured && !self.config.is_loopback() {
                let _ = session.quit().await;
                return Err(MailError::auth(
                    "smtp",
                    "refusing PLAIN auth over unencrypted connection",
                ));
            }
            session
                .authenticate(&self.config.username, &self.config.password)
                .await
                .map_err(|e| MailError::auth("smtp", e))?;
        }

        session
            .mail_from(mail_from)
            .await
            .map_err(|e| MailError::transport("mail from", e))?;

        for rcpt in recipients {
            session
                .rcpt_to(rcpt)
                .await
                .map_err(|e| MailError::transport("rcpt to", format!("{}: {}", rcpt, e)))?;
        }

        session
            .data(message)
            .await
            .map_err(|e| MailError::transport("data", e))?;

        session
            .quit()
            .await
            .map_err(|e| MailError::transport("quit", e))
    }
}

#[async_trait]
impl MailTransport for SmtpSender {
    async fn send(&self, email: &Email) -> Result<()> {
        let mail_from = sanitize_header_value(email.from_or(&self.from));
        let message = build_message(&mail_from, email)?;

        // Every listed recipient gets its own RCPT, duplicates included
        let recipients: Vec<String> = [&email.to, &email.cc, &email.bcc]
            .into_iter()
            .flat_map(|list| sanitize_address_list(list))
            .collect();

        if recipients.is_empty() {
            return Err(MailError::transport(
                "recipients",
                "at least one recipient is required",
            ));
        }

        let (mut session, secured) = self.open_session().await?;
        self.deliver(session.as_mut(), secured, &mail_from, &recipients, &message)
            .await?;

        info!(
            "Sent message via {} to {} recipient(s)",
            self.address(),
            recipients.len()
        );
        Ok(())
    }

    fn name(&self) -> &'static str {
        "smtp"
    }
}
