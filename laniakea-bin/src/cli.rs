use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

use laniakea_config::{ConfigLoader, LaniakeaConfig};
use laniakea_plugin::{serve_controller, serve_datasource};

use crate::rng::RngDatasource;
use crate::ticker::TickerController;

/// Demo Laniakea plugins.
///
/// The plugin prints its handshake line on stdout and logs to stderr.
#[derive(Parser)]
#[command(name = "laniakea-demo", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to laniakea-plugin.toml
    #[arg(short, long, global = true, env = "LANIAKEA_PLUGIN_CONFIG")]
    config: Option<PathBuf>,

    /// Log level override (e.g. debug, info, warn, error)
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    /// Enable verbose output (debug logging)
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,

    /// Suppress all log output (errors only)
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    /// Address to listen on, overriding server.listen
    #[arg(long, global = true)]
    listen: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve a Datasource emitting 8 random bytes per interval while recording
    Rng {
        /// Milliseconds between frames
        #[arg(long, default_value = "100")]
        interval_ms: u64,
    },
    /// Serve a Controller answering ping/start/stop JSON commands
    Ticker,
    /// Show the effective configuration
    Config {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

impl Cli {
    pub async fn run(self) -> anyhow::Result<()> {
        let mut config = ConfigLoader::load(self.config.as_deref())
            .context("failed to load configuration")?
            .into_config();
        if let Some(listen) = &self.listen {
            config.server.listen = listen.clone();
        }

        // --verbose > --quiet > --log-level > config
        let log_level = if self.verbose {
            "debug"
        } else if self.quiet {
            "error"
        } else {
            self.log_level.as_deref().unwrap_or(&config.logging.level)
        };
        init_tracing(log_level, &config.logging.format);

        match self.command {
            Commands::Rng { interval_ms } => {
                let logic = RngDatasource::new(
                    config.plugin.name.clone(),
                    config.plugin.version_gate()?,
                    Duration::from_millis(interval_ms.max(1)),
                )
                .with_buffer(config.stream.buffer);
                serve_datasource(logic, &config)
                    .await
                    .context("rng datasource failed")
            }
            Commands::Ticker => {
                let logic = TickerController::new(
                    config.plugin.name.clone(),
                    config.plugin.version_gate()?,
                )
                .with_buffer(config.stream.buffer);
                serve_controller(logic, &config)
                    .await
                    .context("ticker controller failed")
            }
            Commands::Config { json } => Self::cmd_config(&config, json),
        }
    }

    fn cmd_config(config: &LaniakeaConfig, json: bool) -> anyhow::Result<()> {
        if json {
            println!("{}", serde_json::to_string_pretty(config)?);
        } else {
            println!("plugin:  {} v{}", config.plugin.name, config.plugin.version);
            println!(
                "accepts: {}",
                config
                    .plugin
                    .host_version_constraint
                    .as_deref()
                    .unwrap_or("any host version")
            );
            println!("listen:  {}", config.server.listen);
            println!("buffer:  {} frames", config.stream.buffer);
            println!("logging: {} ({})", config.logging.level, config.logging.format);
        }
        Ok(())
    }
}

/// Logs go to stderr; stdout carries the handshake line.
fn init_tracing(level: &str, format: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));
    if format == "json" {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .json()
            .with_target(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_target(false)
            .init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_rng_with_interval() {
        let cli = Cli::try_parse_from(["laniakea-demo", "-v", "rng", "--interval-ms", "5"]).unwrap();
        assert!(cli.verbose);
        assert!(matches!(cli.command, Commands::Rng { interval_ms: 5 }));
    }

    #[test]
    fn verbose_and_quiet_conflict() {
        assert!(Cli::try_parse_from(["laniakea-demo", "-v", "-q", "ticker"]).is_err());
    }
}
