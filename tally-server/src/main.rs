use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use tally_server::config;
use tally_server::http::{self, AppState};
use tally_server::llm::HostedModel;
use tally_server::store::JsonFileStore;

#[derive(Parser, Debug)]
#[command(name = "tally", version, about = "Conversational expense tracker API")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the HTTP API
    Serve {
        /// Port to listen on (overrides the config)
        #[arg(long)]
        port: Option<u16>,

        /// Directory for per-user state files (overrides the config)
        #[arg(long)]
        data_dir: Option<PathBuf>,
    },

    /// Write the default config to ~/.tally/config.toml
    InitConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("tally_server=info,tower_http=info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Serve { port, data_dir } => {
            let cfg = config::load_config()?;

            let port = port.unwrap_or(cfg.server.port);
            let data_dir = match data_dir.or_else(|| cfg.server.data_dir.clone()) {
                Some(dir) => dir,
                None => config::default_data_dir()?,
            };

            let store = JsonFileStore::new(data_dir)?;
            let model = HostedModel::from_config(&cfg.llm)?;
            let state = Arc::new(AppState::new(Arc::new(model), Arc::new(store)));

            http::run_server(state, port).await
        }

        Command::InitConfig => config::init_config(),
    }
}
