mod core;
mod engine;
mod error;
mod input;
mod overlay;
mod playlist;
mod tui;

use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use surf_proto::config::Config;
use surf_proto::protocol::ControllerSnapshot;
use surf_proto::state::{CredentialStore, Credentials};
use tokio::sync::{mpsc, watch};

use crate::core::{Controller, CoreEvent, SurfContext};
use crate::engine::mpv::MpvEngine;
use crate::error::{CredentialsError, PlaylistError};
use crate::playlist::{HttpPlaylistSource, Playlist, PlaylistSource, RefreshOutcome};

#[derive(Parser, Debug)]
#[command(author, version, about = "Channel surfing for M3U playlists, played through mpv", long_about = None)]
struct Cli {
    /// Config file (default: <config dir>/chansurf/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<CliCommand>,
}

#[derive(Subcommand, Debug)]
enum CliCommand {
    /// Start the player (default)
    Run,
    /// Store playlist credentials without opening the player
    Login {
        username: String,
        /// Read from stdin when omitted
        #[arg(long)]
        password: Option<String>,
    },
    /// Forget stored playlist credentials
    Logout,
    /// Fetch the playlist and print the channel list
    Channels,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let data_dir = surf_proto::platform::data_dir();
    std::fs::create_dir_all(&data_dir)?;
    let log_path = data_dir.join("chansurf.log");
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;

    // Allow RUST_LOG override.
    let log_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info,chansurf=debug".to_string());
    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_env_filter(log_filter.as_str())
        .with_ansi(false)
        .init();

    eprintln!("chansurf log: {}", log_path.display());
    tracing::info!("chansurf starting…");

    let config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load().unwrap_or_else(|e| {
            tracing::warn!("config unreadable, using defaults: {}", e);
            Config::default()
        }),
    };
    let ctx = SurfContext {
        config,
        http: reqwest::Client::builder().timeout(Duration::from_secs(20)).build()?,
    };

    match cli.command.unwrap_or(CliCommand::Run) {
        CliCommand::Run => run(ctx, log_path).await,
        CliCommand::Login { username, password } => login(&ctx, username, password),
        CliCommand::Logout => logout(&ctx),
        CliCommand::Channels => channels(&ctx).await,
    }
}

async fn run(ctx: SurfContext, log_path: PathBuf) -> anyhow::Result<()> {
    let source = HttpPlaylistSource::new(ctx.http.clone(), &ctx.config.playlist.url);
    let (engine, mut notice_rx) = MpvEngine::new(ctx.config.mpv.clone());

    // ── CoreEvent channel (front end / engine → Controller) ─────────────────
    let (event_tx, event_rx) = mpsc::channel::<CoreEvent>(256);
    let (snapshot_tx, snapshot_rx) = watch::channel(ControllerSnapshot::default());

    let notice_tx = event_tx.clone();
    tokio::spawn(async move {
        while let Some(notice) = notice_rx.recv().await {
            if notice_tx.send(CoreEvent::Notice(notice)).await.is_err() {
                break;
            }
        }
    });

    let controller = Controller::new(ctx.clone(), Arc::new(engine), source, snapshot_tx);
    let core_task = tokio::spawn(async move {
        if let Err(e) = controller.run(event_rx).await {
            tracing::error!("Controller exited with error: {}", e);
        }
    });

    let saved_username = CredentialStore::new(ctx.config.paths.credentials_file.clone())
        .load()
        .map(|c| c.username);
    let app = tui::App::new(event_tx, snapshot_rx, saved_username, log_path);
    let result = app.run().await;

    // The app sent Quit (or dropped its sender); let teardown finish.
    if tokio::time::timeout(Duration::from_secs(5), core_task).await.is_err() {
        tracing::warn!("controller teardown timed out");
    }
    tracing::info!("chansurf stopped");
    result
}

fn login(ctx: &SurfContext, username: String, password: Option<String>) -> anyhow::Result<()> {
    let password = match password {
        Some(p) => p,
        None => {
            eprint!("password for {}: ", username);
            io::stderr().flush()?;
            let mut line = String::new();
            io::stdin().lock().read_line(&mut line)?;
            line.trim_end_matches(['\r', '\n']).to_string()
        }
    };
    let credentials = Credentials::new(username.trim(), password);
    if !credentials.is_complete() {
        return Err(CredentialsError::Incomplete.into());
    }
    let path = &ctx.config.paths.credentials_file;
    CredentialStore::new(path.clone())
        .save(&credentials)
        .map_err(CredentialsError::from)?;
    println!("credentials saved to {}", path.display());
    Ok(())
}

fn logout(ctx: &SurfContext) -> anyhow::Result<()> {
    CredentialStore::new(ctx.config.paths.credentials_file.clone())
        .clear()
        .map_err(CredentialsError::from)?;
    println!("credentials removed");
    Ok(())
}

async fn channels(ctx: &SurfContext) -> anyhow::Result<()> {
    let credentials = CredentialStore::new(ctx.config.paths.credentials_file.clone())
        .load()
        .ok_or(PlaylistError::MissingCredentials)?;
    let source = HttpPlaylistSource::new(ctx.http.clone(), &ctx.config.playlist.url);

    let mut playlist = Playlist::new();
    let generation = playlist.begin_refresh();
    let result = source.fetch(credentials).await;
    match playlist.apply(generation, result) {
        RefreshOutcome::Replaced(list) => {
            for channel in list.iter() {
                println!("{:>4}  {:<32}  {}", channel.number(), channel.display_name, channel.source_url);
            }
            Ok(())
        }
        RefreshOutcome::Empty => Err(PlaylistError::Empty.into()),
        RefreshOutcome::Failed(e) => Err(e.into()),
        RefreshOutcome::Stale => Ok(()),
    }
}
