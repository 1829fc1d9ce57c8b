use std::{path::PathBuf, process::ExitCode};

use clap::Parser;
use config::Config;
use discord::{Delivery, DiscordClient, DryRun};
use session::StreamSession;
use sources::TwitterClient;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

mod config;
mod discord;
mod embed;
mod enrich;
mod format;
mod rules;
mod session;
mod sources;
#[cfg(test)]
mod testing;

#[derive(Parser)]
#[command(version, about)]
struct Args {
    /// Path to configuration file.
    #[arg(long, default_value = ".tweethook.yml")]
    config: PathBuf,

    /// Log messages instead of posting them to Discord.
    #[arg(long)]
    dry_run: bool,

    /// Emit logs as JSON lines.
    #[arg(long)]
    log_json: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let Args {
        config,
        dry_run,
        log_json,
    } = Args::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "tweethook=info".into());
    if log_json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    let cfg = match Config::load(&config) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!(path = %config.display(), "{e}");
            return ExitCode::FAILURE;
        }
    };

    let (stop_tx, stop_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutting down");
            stop_tx.send_replace(true);
        }
    });

    let delivery: Box<dyn Delivery> = if dry_run {
        Box::new(DryRun)
    } else {
        match DiscordClient::new(cfg.discord_webhook_url) {
            Ok(client) => {
                Box::new(client.with_identity(cfg.discord.username, cfg.discord.avatar_url))
            }
            Err(e) => {
                error!("failed to set up discord client: {e}");
                return ExitCode::FAILURE;
            }
        }
    };
    let twitter = match TwitterClient::new(cfg.twitter_bearer_token, cfg.stream_timeout) {
        Ok(client) => client,
        Err(e) => {
            error!("failed to set up twitter client: {e}");
            return ExitCode::FAILURE;
        }
    };

    let mut session = StreamSession::new(twitter, delivery, cfg.twitter_filtered_stream_rule)
        .missing_reference_text(cfg.deleted_reference_text)
        .reconnect_policy(cfg.reconnect);

    match session.run(stop_rx).await {
        Ok(()) => {
            info!("stopped");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}
