mod cli;
mod client;
mod commands;
mod scripthash;

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use eyre::{eyre, WrapErr};

use spindle_core::trust::{FirstUsePolicy, TrustStore};
use spindle_core::{ConnectionOptions, Endpoint, Session, SessionConfig};

use cli::{Cli, Command};

#[tokio::main]
async fn main() -> eyre::Result<()> {
    let args = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_file(true)
        .with_line_number(true)
        .with_level(true)
        .init();

    let config_dir = resolve_config_dir(args.config_dir.clone())?;
    let first_use = if args.trust_new_certs {
        FirstUsePolicy::TrustSilently
    } else {
        FirstUsePolicy::Refuse
    };

    if let Command::Certs = args.command {
        let store = TrustStore::new(&config_dir, first_use);
        return commands::certs(&store).await;
    }

    let endpoint: Endpoint = args.server.parse().context("parse --server")?;
    let config = SessionConfig {
        endpoint,
        config_dir,
        first_use,
        connection: ConnectionOptions {
            read_timeout: args.read_timeout_secs.map(Duration::from_secs),
            ..ConnectionOptions::default()
        },
        verbose: args.verbose,
    };

    let session = Session::from_config(config);
    session
        .open()
        .await
        .wrap_err_with(|| format!("connect to {}", session.server()))?;
    tracing::info!(server = session.server(), "connected");

    let client = client::Client::start(session, client::TICK);
    let mut notifications = client.notifications();
    tokio::spawn(async move {
        while let Ok(frame) = notifications.recv().await {
            tracing::info!(%frame, "notification");
        }
    });

    let outcome = tokio::select! {
        outcome = run(&client, &args.command) => outcome,
        _ = tokio::signal::ctrl_c() => Err(eyre!("interrupted")),
    };
    client.shutdown().await;
    outcome
}

async fn run(client: &client::Client, command: &Command) -> eyre::Result<()> {
    match command {
        Command::Version => commands::version(client).await,
        Command::History { address, network } => {
            commands::history(client, address, *network).await
        }
        Command::Certs => Ok(()),
    }
}

/// `--config-dir`, or `spindle` under the platform config directory
/// (`~/.config` on Linux, `%APPDATA%` on Windows).
fn resolve_config_dir(explicit: Option<PathBuf>) -> eyre::Result<PathBuf> {
    if let Some(dir) = explicit {
        return Ok(dir);
    }
    let base = dirs::config_dir().ok_or_else(|| {
        eyre!("failed to resolve config directory; pass --config-dir or set SPINDLE_CONFIG_DIR")
    })?;
    Ok(base.join("spindle"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_config_dir_wins() {
        let dir = PathBuf::from("/srv/spindle-test");
        assert_eq!(resolve_config_dir(Some(dir.clone())).expect("explicit"), dir);
    }

    #[test]
    fn default_config_dir_lives_under_platform_config_dir() {
        let Some(base) = dirs::config_dir() else {
            return;
        };
        assert_eq!(
            resolve_config_dir(None).expect("platform dir"),
            base.join("spindle")
        );
    }
}
