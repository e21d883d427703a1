//! Mux Relay
//!
//! Forwards byte streams between a local listener and remote endpoints,
//! optionally through an encrypted, multiplexed tunnel. Runs either from
//! a config file describing many relay instances or from flags
//! describing a single one.

use anyhow::{Context, Result};
use clap::Parser;
use mux_relay::config::{Config, ListenType, LoggingConfig, RelayConfig, TransportType};
use mux_relay::relay::Relay;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "mux-relay")]
#[command(about = "A network relay tool with a multiplexed tunnel transport")]
#[command(version)]
struct Args {
    /// Configuration file path; when set, all other relay flags are ignored
    #[arg(short, long)]
    config: Option<String>,

    /// Listen address
    #[arg(short, long, default_value = "0.0.0.0:1234")]
    listen: String,

    /// Listen type (raw, tls, mux)
    #[arg(long, default_value = "raw")]
    listen_type: String,

    /// Remote address to forward to (repeatable)
    #[arg(short, long)]
    remote: Vec<String>,

    /// Transport type (raw, tls, mux)
    #[arg(long, default_value = "raw")]
    transport_type: String,

    /// Log level (trace, debug, info, warn, error); overrides the
    /// config file's logging section
    #[arg(short = 'v', long)]
    log_level: Option<String>,
}

impl Args {
    fn to_config(&self) -> Result<Config> {
        Ok(Config {
            relays: vec![RelayConfig {
                listen: self.listen.clone(),
                listen_type: self.listen_type.parse::<ListenType>()?,
                remotes: self.remote.clone(),
                transport_type: self.transport_type.parse::<TransportType>()?,
                ..RelayConfig::default()
            }],
            ..Config::default()
        })
    }
}

fn init_logging(args: &Args, config: &Config) {
    let level = effective_log_level(args.log_level.as_deref(), &config.logging);
    let builder = tracing_subscriber::fmt().with_env_filter(level);
    match config.logging.format.as_str() {
        "compact" => builder.compact().init(),
        _ => builder.init(),
    }
}

/// The --log-level flag wins over the config file's logging section
fn effective_log_level<'a>(flag: Option<&'a str>, logging: &'a LoggingConfig) -> &'a str {
    flag.unwrap_or(&logging.level)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => Config::load(path).context("Failed to load configuration")?,
        None => args.to_config()?,
    };

    init_logging(&args, &config);

    if config.relays.is_empty() {
        anyhow::bail!("No relay instances configured");
    }

    info!("mux-relay v{}", mux_relay::VERSION);

    // First relay failure brings the process down, like a failed bind at
    // startup would
    let (err_tx, mut err_rx) = mpsc::channel(1);
    for cfg in config.relays {
        let relay = Arc::new(Relay::new(cfg, config.tls.clone()).context("Invalid relay config")?);
        let err_tx = err_tx.clone();
        tokio::spawn(async move {
            if let Err(e) = relay.listen_and_serve().await {
                let _ = err_tx.send(e).await;
            }
        });
    }
    drop(err_tx);

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down...");
            Ok(())
        }
        err = err_rx.recv() => match err {
            Some(e) => {
                error!("relay failed: {}", e);
                Err(e.into())
            }
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flag_overrides_config_log_level() {
        let logging = LoggingConfig {
            level: "debug".to_string(),
            ..LoggingConfig::default()
        };
        assert_eq!(effective_log_level(Some("warn"), &logging), "warn");
        assert_eq!(effective_log_level(None, &logging), "debug");
    }
}
