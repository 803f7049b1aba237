//! Brainmap - collaborative concept-map server

use brainmap_agent::{GraphRepository, LocalFsRepository};
use brainmap_gateway::config::DEFAULT_CONFIG_FILE;
use brainmap_gateway::{start_gateway, BindMode, BrainmapConfig};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "brainmap", about = "Brainmap - AI-assisted concept map server")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the WebSocket server
    Serve {
        #[arg(short, long)]
        port: Option<u16>,
        #[arg(short, long)]
        bind: Option<String>,
        /// Config file (default: ./brainmap.toml)
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Directory holding the graph files
        #[arg(short, long)]
        data_dir: Option<PathBuf>,
    },
    /// List saved graphs
    Graphs {
        #[arg(short, long)]
        data_dir: Option<PathBuf>,
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Write a config file with the default settings
    InitConfig {
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
    /// Show version
    Version,
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "brainmap=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Serve {
        port: None,
        bind: None,
        config: None,
        data_dir: None,
    }) {
        Commands::Serve {
            port,
            bind,
            config,
            data_dir,
        } => {
            init_tracing();

            let path = config.unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
            let mut config = BrainmapConfig::load(&path);
            if let Some(port) = port {
                config.server.port = port;
            }
            if let Some(bind) = bind {
                config.server.bind = BindMode::parse(&bind);
            }
            if let Some(dir) = data_dir {
                config.storage.data_dir = dir;
            }
            start_gateway(config, Some(path)).await?;
        }

        Commands::Graphs { data_dir, config } => {
            let path = config.unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
            let dir = data_dir.unwrap_or_else(|| BrainmapConfig::load(&path).storage.data_dir);
            let repo = LocalFsRepository::new(&dir);
            for name in repo.list().await? {
                println!("{}", name);
            }
        }

        Commands::InitConfig { config, force } => {
            let path = config.unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
            if path.exists() && !force {
                anyhow::bail!("{} already exists (use --force to overwrite)", path.display());
            }
            BrainmapConfig::default().save(&path)?;
            println!("Wrote {}", path.display());
        }

        Commands::Version => {
            println!("brainmap v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
