//! spool-link - console client for RFID/NFC filament spool stations
//!
//! Holds a WebSocket link to the device, logs what it reports and sends
//! it one-shot commands from the command line.

mod cli;
mod config;
mod connection;
mod console;
mod error;
mod logging;
mod protocol;
mod version;

use std::time::Duration;

use clap::Parser;
use tokio::sync::{broadcast, mpsc};
use tokio::time;
use tracing::{debug, info, warn};

use crate::cli::{Cli, Commands};
use crate::config::LinkConfig;
use crate::connection::{ConnectionManager, ConnectionState, LinkEvent, ManagerConfig};
use crate::console::StatusBoard;
use crate::error::{Error, Result};
use crate::protocol::{kinds, CommandResult, InboundMessage, OutboundMessage};
use crate::version::BuildInfo;

fn main() -> Result<()> {
    // Parse before logging so verbosity is known
    let cli = Cli::parse();

    match &cli.command {
        Commands::Version { short } => {
            version::print_version(*short);
            return Ok(());
        }
        Commands::Config { subcommand } => {
            logging::init_simple(tracing::Level::WARN)?;
            return handle_config_command(subcommand.clone());
        }
        _ => {}
    }

    let config = match LinkConfig::load(cli.command.config_path()) {
        Ok(cfg) => cfg,
        Err(e) => exit_with(&e),
    };

    // Held until exit so the file writer flushes
    let _log_guards = logging::init_logging(&config.logging, cli.verbose, cli.quiet)?;

    let manager_config = match config.manager_config() {
        Ok(mc) => mc,
        Err(e) => exit_with(&e),
    };

    let build = BuildInfo::current();
    info!(
        version = %build.short_version(),
        endpoint = %manager_config.endpoint,
        "Starting spool-link"
    );

    // One connection, one task doing all the work: a current-thread
    // runtime is enough
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| Error::Internal(format!("Failed to create async runtime: {}", e)))?;

    let outcome = match &cli.command {
        Commands::Run { .. } => runtime.block_on(run_console(manager_config)),
        Commands::Status { link } => runtime.block_on(show_status(manager_config, link.wait())),
        command => match (command.action(), command.link()) {
            (Ok(Some(message)), Some(link)) => {
                runtime.block_on(run_action(manager_config, message, link.wait()))
            }
            (Ok(_), _) => Err(Error::Internal("command has no device action".to_string())),
            (Err(e), _) => Err(e),
        },
    };

    if let Err(e) = outcome {
        exit_with(&e);
    }
    Ok(())
}

fn exit_with(e: &Error) -> ! {
    eprint!("{}", e.format_for_terminal());
    std::process::exit(e.exit_code());
}

// ─────────────────────────────────────────────────────────────────
// Long-running console
// ─────────────────────────────────────────────────────────────────

async fn run_console(config: ManagerConfig) -> Result<()> {
    let board = StatusBoard::new();
    let mut manager = ConnectionManager::websocket(config);
    board.install(manager.handlers_mut());

    let mut events = manager.subscribe();
    manager.start()?;

    let shutdown_signal = tokio::signal::ctrl_c();
    tokio::pin!(shutdown_signal);

    loop {
        tokio::select! {
            _ = &mut shutdown_signal => {
                info!("Shutdown signal received");
                break;
            }

            event = events.recv() => match event {
                Ok(event) => board.on_link_event(&event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Link events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }

    manager.stop().await;
    info!("Disconnected, bye");
    Ok(())
}

// ─────────────────────────────────────────────────────────────────
// One-shot commands
// ─────────────────────────────────────────────────────────────────

async fn show_status(config: ManagerConfig, wait: Duration) -> Result<()> {
    let board = StatusBoard::new();
    let mut manager = ConnectionManager::websocket(config);
    board.install(manager.handlers_mut());

    let result = exchange(&mut manager, OutboundMessage::Heartbeat, wait, |event| {
        board.on_link_event(event)
    })
    .await;
    manager.stop().await;

    result?;
    print!("{}", board.render());
    Ok(())
}

async fn run_action(config: ManagerConfig, message: OutboundMessage, wait: Duration) -> Result<()> {
    let message_type = message.type_name();
    let mut manager = ConnectionManager::websocket(config);

    let result = exchange(&mut manager, message, wait, |_| {}).await;
    manager.stop().await;

    match result? {
        Some(reply) => report(&reply),
        None => {
            println!("Sent {}", message_type);
            Ok(())
        }
    }
}

/// Connect, send one message and wait for its reply if it has one
async fn exchange<F>(
    manager: &mut ConnectionManager,
    message: OutboundMessage,
    wait: Duration,
    mut on_event: F,
) -> Result<Option<InboundMessage>>
where
    F: FnMut(&LinkEvent),
{
    let reply_kind = message.reply_kind();
    let mut replies = reply_kind.map(|kind| listen(manager, kind));

    // The device answers in order, so a heartbeat round trip flushes its
    // greeting frames; some of them share a type with replies
    let mut sync = match reply_kind {
        Some(kind) if kind != kinds::HEARTBEAT => Some(listen(manager, kinds::HEARTBEAT)),
        _ => None,
    };

    let mut events = manager.subscribe();
    manager.start()?;

    let connected = time::timeout(wait, async {
        loop {
            match events.recv().await {
                Ok(event) => {
                    on_event(&event);
                    if event == LinkEvent::StateChanged(ConnectionState::Connected) {
                        return Ok(());
                    }
                }
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => {
                    return Err(Error::connection_lost("connection manager stopped"))
                }
            }
        }
    })
    .await;

    match connected {
        Ok(result) => result?,
        Err(_) => {
            return Err(Error::ConnectionTimeout {
                url: manager.config().endpoint.to_string(),
                timeout_ms: wait.as_millis() as u64,
            })
        }
    }

    if let Some(rx) = sync.as_mut() {
        manager.send(OutboundMessage::Heartbeat)?;
        if !matches!(time::timeout(wait, rx.recv()).await, Ok(Some(_))) {
            return Err(Error::Protocol(format!(
                "no '{}' reply from the device within {}s",
                kinds::HEARTBEAT,
                wait.as_secs()
            )));
        }
    }

    // Anything received before our send is not an answer
    if let Some(rx) = replies.as_mut() {
        while rx.try_recv().is_ok() {}
    }

    let message_type = message.type_name();
    manager.send(message)?;
    debug!(message_type, "Command sent");

    let (Some(kind), Some(rx)) = (reply_kind, replies.as_mut()) else {
        // Give the frame a moment to leave before the link is closed
        time::sleep(Duration::from_millis(200)).await;
        return Ok(None);
    };

    match time::timeout(wait, rx.recv()).await {
        Ok(Some(reply)) => Ok(Some(reply)),
        Ok(None) => Err(Error::connection_lost("reply handler dropped")),
        Err(_) => Err(Error::Protocol(format!(
            "no '{}' reply from the device within {}s",
            kind,
            wait.as_secs()
        ))),
    }
}

/// Forward every inbound message of `kind` into a channel
fn listen(manager: &mut ConnectionManager, kind: &str) -> mpsc::UnboundedReceiver<InboundMessage> {
    let (tx, rx) = mpsc::unbounded_channel();
    manager.on(kind, move |reply| {
        let _ = tx.send(reply.clone());
    });
    rx
}

/// Print a device reply; failures become errors so the exit code reflects them
fn report(reply: &InboundMessage) -> Result<()> {
    let (what, result) = match reply {
        InboundMessage::WriteNfcTag(write) => {
            return if write.success {
                println!("Write success");
                Ok(())
            } else {
                Err(Error::Protocol("Write failed".to_string()))
            };
        }
        InboundMessage::SetSpoolmanSettings(result) => ("Spoolman settings", result),
        InboundMessage::Scale(result) => ("Scale command", result),
        InboundMessage::SaveMoonrakerSettings(result) => ("Moonraker settings", result),
        InboundMessage::SavePrintFarmerSettings(result) => ("PrintFarmer settings", result),
        other => {
            println!("Device answered with '{}'", other.type_name());
            return Ok(());
        }
    };

    match result {
        CommandResult::Success => {
            println!("{} applied", what);
            Ok(())
        }
        CommandResult::Failed(reason) => {
            Err(Error::Protocol(format!("{} rejected: {}", what, reason)))
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// Config command
// ─────────────────────────────────────────────────────────────────

fn handle_config_command(subcommand: cli::ConfigSubcommand) -> Result<()> {
    use cli::ConfigSubcommand;

    match subcommand {
        ConfigSubcommand::Show { config } => {
            let cfg = LinkConfig::load(config.as_deref())?;
            println!("{}", toml::to_string_pretty(&cfg)?);
            println!("# endpoint: {}", cfg.endpoint()?);
        }
        ConfigSubcommand::Init { path, force } => {
            let written = config::init_config(path.as_deref(), force)?;
            println!("Configuration written to {}", written.display());
        }
        ConfigSubcommand::Validate { config } => match LinkConfig::load(config.as_deref()) {
            Ok(cfg) => {
                println!("Configuration is valid.");
                println!("Device endpoint: {}", cfg.endpoint()?);
            }
            Err(e) => exit_with(&e),
        },
    }

    Ok(())
}
