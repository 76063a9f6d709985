use std::{path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::Parser;
use client_core::{
    load_settings, load_settings_from, ChannelOptions, CookieStorage, Credentials,
    FileCookieStorage, RealtimeChannel, Session, SessionError, TwoFactorProvider,
};
use shared::protocol::RealtimeEvent;
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    sync::mpsc,
};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

const DEFAULT_COOKIE_FILE: &str = "session_cookies.json";
const PASSWORD_ENV: &str = "CLIENT_PASSWORD";

#[derive(Parser, Debug)]
struct Args {
    /// Settings file; defaults to ./client.toml when present.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Login identifier, used when the stored cookies are missing or rejected.
    /// The password is read from CLIENT_PASSWORD.
    #[arg(long)]
    email: Option<String>,
    #[arg(long)]
    cookies: Option<PathBuf>,
    /// Report the client as in the foreground once connected.
    #[arg(long)]
    foreground: bool,
}

struct PromptCode;

#[async_trait]
impl TwoFactorProvider for PromptCode {
    async fn request_code(&self) -> Result<String, SessionError> {
        let mut stdout = tokio::io::stdout();
        let io_err = |err: std::io::Error| SessionError::transport(None, err.to_string());
        stdout
            .write_all(b"two-factor code: ")
            .await
            .map_err(io_err)?;
        stdout.flush().await.map_err(io_err)?;
        let mut line = String::new();
        BufReader::new(tokio::io::stdin())
            .read_line(&mut line)
            .await
            .map_err(io_err)?;
        Ok(line.trim().to_string())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_env_filter("info").init();
    let args = Args::parse();

    let settings = match &args.config {
        Some(path) => load_settings_from(path)?,
        None => load_settings(),
    };
    let cookie_path = args
        .cookies
        .clone()
        .or_else(|| settings.cookie_path.clone())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_COOKIE_FILE));
    let storage = FileCookieStorage::new(cookie_path);

    let credentials = match args.email {
        Some(email) => {
            let password = std::env::var(PASSWORD_ENV)
                .with_context(|| format!("{PASSWORD_ENV} must be set when --email is given"))?;
            Some(Credentials::new(email, password))
        }
        None => None,
    };

    let session = Session::builder(settings.clone())
        .restore_or_login(&storage, credentials.as_ref(), Some(&PromptCode))
        .await?;
    let session = Arc::new(session);
    println!("Logged in as user_id={}", session.user_id().await);

    let (tx, mut events) = mpsc::unbounded_channel();
    let cancel = CancellationToken::new();
    let mut options = ChannelOptions::from_settings(&settings);
    options.foreground = args.foreground;
    let channel =
        RealtimeChannel::open(Arc::clone(&session), Arc::new(tx), options, &cancel).await?;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => match event {
                Some(RealtimeEvent::Disconnected { reason }) => warn!(reason = %reason, "realtime connection lost"),
                Some(RealtimeEvent::Desynced { error_code }) => {
                    warn!(error_code = %error_code, "realtime queue was reset; refetch state");
                }
                Some(event) => println!("{}", serde_json::to_string(&event)?),
                None => break,
            },
        }
    }

    info!("shutting down");
    cancel.cancel();
    channel.disconnect().await;
    storage.save(&session.cookies()).await;
    Ok(())
}
