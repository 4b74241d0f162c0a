use anyhow::Result;
use clap::Parser;
use tracing::{error, info};

use hotcog::{Config, Daemon};

#[derive(Parser)]
#[command(name = "hotcog")]
#[command(about = "Keep Lua extensions in sync with their source files")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "hotcog.toml")]
    config: String,

    /// Directory holding extension sources (overrides the config file)
    #[arg(short, long)]
    extensions_path: Option<String>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let log_level = if cli.debug {
        "debug"
    } else if cli.verbose {
        "info"
    } else {
        "warn"
    };

    tracing_subscriber::fmt()
        .with_env_filter(format!("hotcog={log_level}"))
        .with_target(false)
        .init();

    info!("🦀 Starting hotcog v{}", env!("CARGO_PKG_VERSION"));

    let mut config = match Config::load_or_default(&cli.config).await {
        Ok(config) => config,
        Err(e) => {
            error!("❌ Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };
    config.apply_env();
    if let Some(path) = cli.extensions_path {
        config.hot_reload.extensions_path = path;
    }

    match Daemon::new(config).await {
        Ok(mut daemon) => {
            if let Err(e) = daemon.run().await {
                error!("❌ Daemon error: {}", e);
                std::process::exit(1);
            }
        }
        Err(e) => {
            error!("❌ Failed to create daemon: {}", e);
            std::process::exit(1);
        }
    }

    Ok(())
}
