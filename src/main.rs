use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{info, warn};

use folderlink::config::Config;
use folderlink::{client, server};

#[derive(Parser, Debug)]
#[command(
    name = "folderlink",
    version = env!("CARGO_PKG_VERSION"),
    about = "Host a folder as a website from the command line",
    long_about = "folderlink serves a local folder through a public relay, without opening any inbound port"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration directory path
    #[arg(short, long, env = "FOLDERLINK_CONFIG", default_value = "~/.folderlink")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, env = "FOLDERLINK_LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Increase verbosity (same as --log-level debug)
    #[arg(long, global = true)]
    debug: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Write a default configuration file
    Init {
        /// Force overwrite existing configuration
        #[arg(short, long)]
        force: bool,
    },

    /// Start a relay
    Relay {
        /// Public URL to use
        #[arg(short, long)]
        url: Option<String>,

        /// Port of the relay
        #[arg(short, long)]
        port: Option<u16>,

        /// Bind address for the admin API
        #[arg(short, long)]
        admin_bind: Option<String>,
    },

    /// Host files from your computer
    Host {
        /// URL of relay to connect to
        #[arg(short, long, env = "FOLDERLINK_RELAY")]
        url: Option<String>,

        /// Domain to use (default is random)
        #[arg(short, long)]
        domain: Option<String>,

        /// Key value to use (default is random)
        #[arg(short, long)]
        key: Option<String>,

        /// Folder to serve files from
        #[arg(short, long)]
        folder: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.debug { "debug" } else { cli.log_level.as_str() };

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(level.parse()?)
                .from_env_lossy(),
        )
        .with_target(false)
        .with_thread_ids(false)
        .init();

    // Expand home directory in config path
    let config_dir = shellexpand::tilde(&cli.config.to_string_lossy()).to_string();
    let config_path = PathBuf::from(config_dir);

    let mut config = Config::load(&config_path)?;

    match cli.command {
        Commands::Init { force } => {
            let config_file = config_path.join("config.toml");
            if config_file.exists() && !force {
                warn!("Configuration already exists. Use --force to overwrite.");
                return Ok(());
            }

            std::fs::create_dir_all(&config_path)
                .with_context(|| format!("Failed to create config directory: {:?}", config_path))?;
            Config::default().save(&config_path)?;

            info!("✓ Wrote {:?}", config_file);
        }

        Commands::Relay {
            url,
            port,
            admin_bind,
        } => {
            if let Some(url) = url {
                config.relay.url = url;
            }
            if let Some(port) = port {
                config.relay.port = port;
            }
            if admin_bind.is_some() {
                config.relay.admin_bind = admin_bind;
            }

            server::run_server(config.relay).await?;
        }

        Commands::Host {
            url,
            domain,
            key,
            folder,
        } => {
            if let Some(url) = url {
                config.host.url = url;
            }
            if domain.is_some() {
                config.host.domain = domain;
            }
            if key.is_some() {
                config.host.key = key;
            }
            if let Some(folder) = folder {
                config.host.folder = folder;
            }

            client::run_host(config.host).await?;
        }
    }

    Ok(())
}

mod shellexpand {
    pub fn tilde(s: &str) -> std::borrow::Cow<str> {
        if s.starts_with("~/") {
            if let Ok(home) = std::env::var("HOME") {
                return std::borrow::Cow::Owned(s.replacen("~", &home, 1));
            }
        }
        std::borrow::Cow::Borrowed(s)
    }
}
