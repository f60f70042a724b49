//! # livepush
//!
//! Terminal host for the open-push client: connects with the configured
//! identity code, prints live events, and takes operator commands on stdin.

#![deny(unsafe_code)]

mod commands;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use livepush_client::{ConnectionState, LivePushClient};
use livepush_core::LiveEvent;
use livepush_settings::{ClientSettings, CodeStore, FileCodeStore};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use crate::commands::{HELP, HostCommand};

/// How often the code file is checked for external edits.
const CODE_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Open-push live event client.
#[derive(Parser, Debug)]
#[command(name = "livepush", about = "Live platform open-push client")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Connect and print live events until interrupted.
    Run {
        /// Identity code (saved to the code file; defaults to the stored one).
        #[arg(long)]
        code: Option<String>,

        /// Settings file (defaults to `~/.livepush/settings.json`).
        #[arg(long)]
        settings: Option<PathBuf>,

        /// Code file (defaults to `~/.livepush/code.json`).
        #[arg(long)]
        code_file: Option<PathBuf>,

        /// Log level when `RUST_LOG` is unset.
        #[arg(long, default_value = "info")]
        log_level: String,

        /// Emit JSON log lines.
        #[arg(long)]
        json_logs: bool,
    },
    /// Save an identity code for later runs.
    SetId {
        /// Identity code from the broadcaster's dashboard.
        code: String,

        /// Code file (defaults to `~/.livepush/code.json`).
        #[arg(long)]
        code_file: Option<PathBuf>,
    },
}

fn open_store(path: Option<PathBuf>) -> FileCodeStore {
    path.map_or_else(FileCodeStore::open_default, FileCodeStore::new)
}

fn load_client_settings(path: Option<&PathBuf>) -> Result<ClientSettings> {
    let settings = match path {
        Some(path) => livepush_settings::load_settings_from_path(path)
            .with_context(|| format!("Failed to load settings from {}", path.display()))?,
        None => livepush_settings::load_settings().context("Failed to load settings")?,
    };
    settings.validate().context("Invalid settings")?;
    Ok(settings)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::SetId { code, code_file } => {
            let store = open_store(code_file);
            store
                .save(&code)
                .with_context(|| format!("Failed to write {}", store.path().display()))?;
            println!("identity code saved to {}", store.path().display());
            Ok(())
        }
        Command::Run {
            code,
            settings,
            code_file,
            log_level,
            json_logs,
        } => {
            if json_logs {
                livepush_core::logging::init_json_subscriber(&log_level);
            } else {
                livepush_core::logging::init_subscriber(&log_level);
            }
            let settings = load_client_settings(settings.as_ref())?;
            let store = Arc::new(open_store(code_file));
            run(settings, store, code).await
        }
    }
}

async fn run(settings: ClientSettings, store: Arc<FileCodeStore>, code: Option<String>) -> Result<()> {
    let code = match code {
        Some(code) => {
            store.save(&code).context("Failed to save identity code")?;
            code
        }
        None => store.load().context("Failed to read identity code")?,
    };
    if code.is_empty() {
        bail!("no identity code configured; pass --code or run `livepush set-id <code>`");
    }

    let client = LivePushClient::new(settings).context("Failed to build client")?;
    let printer = tokio::spawn(print_events(client.subscribe()));

    if let Err(e) = client.start(&code).await {
        error!(error = %e, "could not start");
        client.close().await;
        printer.abort();
        return Err(e).context("Failed to start session");
    }
    println!("{}", client.status());
    println!("{HELP}");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    let mut poll = tokio::time::interval(CODE_POLL_INTERVAL);
    poll.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            line = lines.next_line(), if stdin_open => {
                let Some(line) = line.context("Failed to read stdin")? else {
                    info!("stdin closed, waiting for ctrl-c");
                    stdin_open = false;
                    continue;
                };
                match commands::parse(&line) {
                    Ok(Some(HostCommand::Quit)) => break,
                    Ok(Some(command)) => handle(&client, store.as_ref(), command).await,
                    Ok(None) => {}
                    Err(message) => println!("{message}"),
                }
            }
            _ = poll.tick() => {
                let _ = reload_on_code_change(&client, store.as_ref()).await;
            }
            signal = tokio::signal::ctrl_c() => {
                signal.context("Failed to listen for ctrl-c")?;
                break;
            }
        }
    }

    info!("Shutting down...");
    client.close().await;
    printer.abort();
    Ok(())
}

/// Pick up an identity code written by another process. Returns whether
/// a reload was issued.
async fn reload_on_code_change(client: &LivePushClient, store: &dyn CodeStore) -> bool {
    if !store.changed() {
        return false;
    }
    match store.load() {
        Ok(code) => {
            info!("identity code changed on disk, reloading");
            client.set_code(&code);
            client.reload().await;
            true
        }
        Err(e) => {
            warn!(error = %e, "failed to re-read identity code");
            false
        }
    }
}

async fn handle(client: &LivePushClient, store: &dyn CodeStore, command: HostCommand) {
    match command {
        HostCommand::Status => {
            let stats = client.stats();
            println!(
                "{} | reconnects {} | reloads {} | attempt {}",
                client.status(),
                stats.reconnect_triggers,
                stats.reloads,
                stats.attempt
            );
        }
        HostCommand::Start => {
            if client.state() != ConnectionState::Disconnected {
                println!("already {}", client.state());
                return;
            }
            match store.load() {
                Ok(code) if !code.is_empty() => {
                    if let Err(e) = client.start(&code).await {
                        println!("start failed: {e}");
                    }
                }
                Ok(_) => println!("no identity code configured"),
                Err(e) => println!("failed to read identity code: {e}"),
            }
        }
        HostCommand::Reload => {
            client.reload().await;
            println!("{}", client.status());
        }
        HostCommand::SetId(code) => {
            if let Err(e) = store.save(&code) {
                println!("failed to save identity code: {e}");
                return;
            }
            client.set_code(&code);
            if client.state() == ConnectionState::Disconnected {
                if let Err(e) = client.start(&code).await {
                    println!("start failed: {e}");
                }
            } else {
                client.reload().await;
            }
            println!("{}", client.status());
        }
        HostCommand::Help => println!("{HELP}"),
        HostCommand::Quit => {}
    }
}

async fn print_events(mut events: broadcast::Receiver<LiveEvent>) {
    loop {
        match events.recv().await {
            Ok(event) => println!("{}", event.summary()),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "event printer fell behind");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
