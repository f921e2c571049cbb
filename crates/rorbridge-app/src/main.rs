//! The rorbridge binary: joins a RoR multiplayer server and bridges it to
//! the terminal.

mod console;
mod wiring;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use rorbridge_bridge::{Bridge, LevelPolicy, PermissionLevel};
use rorbridge_config::{CliArgs, Config};
use rorbridge_net::Supervisor;
use tokio::sync::mpsc;

const REQUEST_CAPACITY: usize = 64;
const INBOUND_CAPACITY: usize = 64;

/// `debug.log_dir`, else `<platform data dir>/rorbridge/logs`.
fn log_dir(config: &Config) -> Option<PathBuf> {
    config
        .debug
        .log_dir
        .clone()
        .or_else(|| dirs::data_local_dir().map(|dir| dir.join("rorbridge").join("logs")))
}

fn load_config(args: &CliArgs) -> Result<Config, rorbridge_config::ConfigError> {
    let mut config = Config::load_or_create(&args.config_dir())?;
    config.apply_cli_overrides(args);
    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = CliArgs::parse();
    let config = match load_config(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("rorbridge: {e}");
            return ExitCode::FAILURE;
        }
    };

    match rorbridge_log::init_logging(log_dir(&config).as_deref(), config.debug.file_logging, Some(&config)) {
        Ok(Some(path)) => tracing::info!(path = %path.display(), "writing JSON log"),
        Ok(None) => {}
        Err(e) => eprintln!("rorbridge: logging unavailable: {e}"),
    }
    tracing::info!(
        server = %config.server.address(),
        username = %config.bot.username,
        channel = %config.chat.channel,
        "starting"
    );

    let (supervisor, handle, events) =
        Supervisor::new(wiring::connector(&config), wiring::reconnect_config(&config), REQUEST_CAPACITY);
    let supervisor_task = tokio::spawn(supervisor.run());

    let (chat, writer) = console::ConsoleChat::spawn(tokio::io::stdout());
    let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_CAPACITY);
    let channel = config.chat.channel.clone();
    let input = std::thread::Builder::new()
        .name("console-input".to_string())
        .spawn(move || {
            let stdin = std::io::stdin();
            console::read_inbound(stdin.lock(), &channel, "console", PermissionLevel::Admin, inbound_tx)
        });
    if let Err(e) = input {
        tracing::error!(error = %e, "cannot read from the terminal");
        handle.shutdown();
    }

    let bridge = Bridge::new(wiring::bridge_config(&config), chat, LevelPolicy, handle.clone());
    let mut bridge_task = tokio::spawn(bridge.run(events, inbound_rx));

    let outcome = tokio::select! {
        outcome = &mut bridge_task => outcome,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("interrupted, shutting down");
            handle.shutdown();
            bridge_task.await
        }
    };
    let _ = supervisor_task.await;
    if let Ok(Err(e)) = writer.await {
        tracing::warn!(error = %e, "terminal output failed");
    }

    match outcome {
        Ok(Ok(())) => ExitCode::SUCCESS,
        Ok(Err(e)) => {
            tracing::error!(error = %e, "bridge failed");
            ExitCode::FAILURE
        }
        Err(e) => {
            tracing::error!(error = %e, "bridge task panicked");
            ExitCode::FAILURE
        }
    }
}
