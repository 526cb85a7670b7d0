mod cli;
mod config;
mod http;
mod logging;
mod manager;
mod process;
mod registration;
mod registry;
mod rules;

use anyhow::Result;
use clap::Parser;
use tracing::Level;

#[tokio::main]
async fn main() -> Result<()> {
    logging::init_tracing(Level::INFO);
    cli::Cli::parse().execute().await
}
