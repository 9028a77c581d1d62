use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::info;

use platform_bridge::{agent, comms, utils};

#[derive(Parser)]
#[command(name = "bridge", version, about = "Authenticated lifecycle and webhook bridge")]
struct AppCli {
    /// Config file path
    #[arg(short, long, default_value = "config.json", global = true)]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP bridge
    Serve {
        #[arg(long, default_value_t = 8080)]
        port: u16,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    utils::logging::init();

    let args = AppCli::parse();
    let config = agent::config::Config::from_file(&args.config)?;

    match args.command {
        Commands::Serve { port } => {
            info!(version = platform_bridge::VERSION, "starting bridge on port {port}");
            comms::local_api::serve(config, port).await?;
        }
    }

    Ok(())
}
