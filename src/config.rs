use crate::error::{MailError, Result};
use crate::provider::ProviderConfig;
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::collections::HashMap;

/// Prefix for environment overrides, e.g.
/// `MAIL_COURIER__PROVIDERS__WORK__SMTP__PASSWORD=keychain:work/password`.
pub const ENV_PREFIX: &str = "MAIL_COURIER";

#[derive(Debug, Deserialize, Clone, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub default_provider: Option<String>,
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,
    pub log_file: Option<String>,
    pub log_level: Option<String>,
    #[serde(default)]
    pub quiet: bool,
}

// Implement loading configuration
impl AppConfig {
    // Load config from defaults, then file (if exists), then environment variables
    pub fn new() -> std::result::Result<Self, ConfigError> {
        Self::configure_defaults()?
            .add_source(File::with_name("config").required(false))
            .add_source(Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()?
            .try_deserialize()
    }

    // Load config from a specific file path
    pub fn new_from_file(path: &str) -> std::result::Result<Self, ConfigError> {
        Self::configure_defaults()?
            .add_source(File::with_name(path).required(true))
            .add_source(Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()?
            .try_deserialize()
    }

    fn configure_defaults()
    -> std::result::Result<config::ConfigBuilder<config::builder::DefaultState>, ConfigError> {
        // log_level stays unset so RUST_LOG can take over
        Config::builder().set_default("quiet", false)
    }

    /// Looks up a provider by name, falling back to `default_provider`.
    ///
    /// Keys are matched case-insensitively since the loader lowercases them.
    /// An unnamed entry takes its map key as its name.
    pub fn provider(&self, name: Option<&str>) -> Result<ProviderConfig> {
        let name = name
            .filter(|n| !n.is_empty())
            .or(self.default_provider.as_deref().filter(|n| !n.is_empty()))
            .ok_or_else(|| MailError::config("no provider specified and no default set"))?;

        let (key, provider) = self
            .providers
            .get_key_value(name)
            .or_else(|| self.providers.get_key_value(name.to_lowercase().as_str()))
            .ok_or_else(|| MailError::config(format!("provider {:?} not found", name)))?;

        let mut provider = provider.clone();
        if provider.name.is_empty() {
            provider.name = key.clone();
        }
        Ok(provider)
    }
}
