mod config;
mod pairing;
mod terminal_output;

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};

use codepair_config::{write_config, LoggingConfig, PairingConfig};
use codepair_core::KeyStrength;
use codepair_logging::init_logger;

use config::Overrides;
use terminal_output::{note_error, note_success};

#[derive(Parser)]
#[command(name = "codepair")]
#[command(about = "Pair two devices over a relay with a short code")]
#[command(version)]
struct Cli {
    /// Config file (default: ~/.codepair/config.yaml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Relay base URL, overrides `server` in the config
    #[arg(long, global = true)]
    server: Option<String>,

    /// Key strength: standard, high or maximum
    #[arg(long, global = true)]
    strength: Option<KeyStrength>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show a pairing code and send a JSON payload to the device that enters it
    Initiate {
        /// JSON value to deliver
        #[arg(long)]
        payload: String,
    },
    /// Enter a code shown by another device and print the payload it sends
    Join {
        code: String,
    },
    /// Run an in-memory relay server
    Relay {
        #[arg(long, default_value = "127.0.0.1:8080")]
        listen: SocketAddr,
    },
    /// Write a config file with default values
    InitConfig {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    if let Err(err) = run(cli).await {
        note_error(&format!("{err:#}"));
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let overrides = Overrides { server: cli.server.clone(), strength: cli.strength };

    match cli.command {
        Commands::Initiate { payload } => {
            let payload: serde_json::Value =
                serde_json::from_str(&payload).context("--payload is not valid JSON")?;
            let config = config::resolve(cli.config.as_deref(), &overrides).await?;
            init_logging(&config);
            pairing::initiate(&config, payload).await
        }
        Commands::Join { code } => {
            let config = config::resolve(cli.config.as_deref(), &overrides).await?;
            init_logging(&config);
            pairing::join(&config, &code).await
        }
        Commands::Relay { listen } => {
            let config = config::resolve(cli.config.as_deref(), &overrides).await?;
            init_logging(&config);
            codepair_relay::serve(listen).await
        }
        Commands::InitConfig { force } => {
            let path = cli.config.unwrap_or_else(config::default_config_path);
            if path.exists() && !force {
                bail!("{} already exists; pass --force to overwrite", path.display());
            }
            let config = PairingConfig {
                server: overrides.server,
                strength: overrides.strength,
                ..Default::default()
            };
            let config = codepair_config::apply_all_defaults(config);
            write_config(&config, &path).await?;
            note_success(&format!("Wrote {}", path.display()));
            Ok(())
        }
    }
}

fn init_logging(config: &PairingConfig) {
    let logging = config.logging.clone().unwrap_or_else(LoggingConfig::default);
    let level = logging.level.as_deref().unwrap_or("info");
    init_logger(logging.dir.as_deref(), level);
}
