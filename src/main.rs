/*!
 * Copyright (c) 2026 Ming Lyu, aka mingcheng
 *
 * This source code is licensed under the MIT License,
 * which is located in the LICENSE file in the source tree's root directory.
 *
 * File: main.rs
 * Author: mingcheng <mingcheng@apache.org>
 * File Created: 2026-02-12 15:38:23
 *
 * Modified By: mingcheng <mingcheng@apache.org>
 * Last Modified: 2026-03-05 17:51:02
 */

use clap::{Parser, Subcommand};
use log::info;
use mail_courier::config::AppConfig;
use mail_courier::oauth::{OAuthClient, OAuthFlow, OAuthToken};
use mail_courier::provider::default_http_client;
use mail_courier::{Attachment, Email, ProviderSettings, SecretResolver, create_transport};
use rustls::crypto;
use std::io::Write;
use std::path::PathBuf;
use tokio::io::AsyncReadExt;

struct MultiWriter {
    writers: Vec<Box<dyn Write + Send + 'static>>,
}

impl Write for MultiWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        for w in &mut self.writers {
            let _ = w.write(buf);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        for w in &mut self.writers {
            let _ = w.flush();
        }
        Ok(())
    }
}

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(short, long)]
    config: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Send a message through a configured provider
    Send {
        /// Provider name, defaults to `default_provider`
        #[arg(short, long)]
        provider: Option<String>,
        /// Overrides the provider's from address
        #[arg(long)]
        from: Option<String>,
        #[arg(short, long, value_delimiter = ',')]
        to: Vec<String>,
        #[arg(long, value_delimiter = ',')]
        cc: Vec<String>,
        #[arg(long, value_delimiter = ',')]
        bcc: Vec<String>,
        #[arg(short, long, default_value = "")]
        subject: String,
        /// Message body, read from stdin when omitted
        #[arg(short, long)]
        body: Option<String>,
        #[arg(long)]
        html: bool,
        #[arg(short, long)]
        attach: Vec<PathBuf>,
    },
    /// Obtain OAuth tokens for a Gmail provider
    Authorize {
        #[arg(short, long)]
        provider: Option<String>,
        /// Use the device code flow regardless of the configured one
        #[arg(long)]
        device: bool,
    },
}

fn initialize_logger(config: &AppConfig) -> anyhow::Result<()> {
    let mut builder = env_logger::Builder::new();

    if let Some(level) = &config.log_level {
        builder.parse_filters(level);
    } else if let Ok(env_level) = std::env::var("RUST_LOG") {
        builder.parse_filters(&env_level);
    } else {
        builder.filter_level(log::LevelFilter::Info);
    }

    if let Some(log_file) = &config.log_file {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_file)
            .map_err(|e| anyhow::anyhow!("Failed to open log file {}: {}", log_file, e))?;

        if config.quiet {
            builder.target(env_logger::Target::Pipe(Box::new(file)));
        } else {
            let multi_writer = MultiWriter {
                writers: vec![Box::new(file), Box::new(std::io::stderr())],
            };
            builder.target(env_logger::Target::Pipe(Box::new(multi_writer)));
        }
    } else if config.quiet {
        builder.target(env_logger::Target::Pipe(Box::new(std::io::sink())));
    }

    builder.init();
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn run_send(
    config: &AppConfig,
    provider: Option<String>,
    from: Option<String>,
    to: Vec<String>,
    cc: Vec<String>,
    bcc: Vec<String>,
    subject: String,
    body: Option<String>,
    html: bool,
    attach: Vec<PathBuf>,
) -> anyhow::Result<()> {
    let provider = config.provider(provider.as_deref())?;
    let provider = provider
        .resolve_secrets(&SecretResolver::keychain())
        .await?;
    let transport = create_transport(&provider, default_http_client()?)?;

    let body = match body {
        Some(body) => body,
        None => {
            let mut buf = String::new();
            tokio::io::stdin().read_to_string(&mut buf).await?;
            buf
        }
    };

    let email = Email {
        from,
        to,
        cc,
        bcc,
        subject,
        body,
        html,
        attachments: attach.into_iter().map(Attachment::from_path).collect(),
    };

    transport.send(&email).await?;
    info!(
        "Message sent via {} provider {:?}",
        transport.name(),
        provider.name
    );
    Ok(())
}

async fn run_authorize(
    config: &AppConfig,
    provider: Option<String>,
    device: bool,
) -> anyhow::Result<()> {
    let provider = config.provider(provider.as_deref())?;
    let ProviderSettings::Google(google) = &provider.settings else {
        anyhow::bail!(
            "provider {:?} is a {} provider, only google needs authorization",
            provider.name,
            provider.kind()
        );
    };
    if google.client_id.is_empty() || google.client_secret.is_empty() {
        anyhow::bail!("provider {:?} needs client_id and client_secret", provider.name);
    }

    let resolver = SecretResolver::keychain();
    let client_secret = resolver.resolve(&google.client_secret).await?;
    let flow = if device {
        OAuthFlow::Device
    } else {
        google.oauth_flow
    };

    let client = OAuthClient::google(&google.client_id, &client_secret, default_http_client()?);
    let token = client.authorize(flow, |text| println!("{}", text)).await?;

    let (access_token, refresh_token) = if resolver.is_supported() {
        let access = resolver
            .store(&provider.name, "access_token", &token.access_token)
            .await?;
        let refresh = if token.refresh_token.is_empty() {
            String::new()
        } else {
            resolver
                .store(&provider.name, "refresh_token", &token.refresh_token)
                .await?
        };
        (access, refresh)
    } else {
        (token.access_token.clone(), token.refresh_token.clone())
    };

    print_token_settings(
        &provider.name,
        &OAuthToken {
            access_token,
            refresh_token,
            expiry: token.expiry,
        },
    );
    Ok(())
}

fn print_token_settings(name: &str, token: &OAuthToken) {
    println!();
    println!("Add the following to the provider's google section:");
    println!();
    println!("[providers.{}.google]", name);
    println!("access_token = {:?}", token.access_token);
    if !token.refresh_token.is_empty() {
        println!("refresh_token = {:?}", token.refresh_token);
    }
    if let Some(expiry) = token.expiry {
        println!("token_expiry = {:?}", expiry.to_rfc3339());
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = crypto::ring::default_provider().install_default();

    let args = Args::parse();

    let config = match args.config {
        Some(path) => AppConfig::new_from_file(&path),
        None => AppConfig::new(),
    }
    .unwrap_or_else(|e| {
        eprintln!("Failed to load config: {:?}", e);
        if let Ok(path) = std::env::current_dir() {
            eprintln!("Current search path: {:?}", path);
        }
        eprintln!("Please create a `config.toml` or set MAIL_COURIER__... environment variables, or specify a config file with --config.");
        std::process::exit(1);
    });

    initialize_logger(&config)?;

    match args.command {
        Command::Send {
            provider,
            from,
            to,
            cc,
            bcc,
            subject,
            body,
            html,
            attach,
        } => {
            run_send(
                &config, provider, from, to, cc, bcc, subject, body, html, attach,
            )
            .await
        }
        Command::Authorize { provider, device } => {
            run_authorize(&config, provider, device).await
        }
    }
}
