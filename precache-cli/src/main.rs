mod cli;
mod commands;
mod config;
mod error;
mod serve;

use crate::{
    cli::{Args, Commands},
    commands::CommandExecutor,
    config::AppConfig,
};
use anyhow::Result;
use clap::Parser;
use std::process;
use tracing::{Level, debug, error};
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

#[tokio::main]
async fn main() {
    let result = run().await;

    if let Err(e) = result {
        error!("Application error: {:#}", e);
        eprintln!("Error: {:#}", e);
        process::exit(1);
    }
}

async fn run() -> Result<()> {
    let args = Args::parse();

    init_logging(args.verbose, args.quiet);

    let mut config = AppConfig::load(args.config.as_deref())?;
    config.apply_args(&args)?;
    debug!("Loaded configuration: {:?}", config);

    let executor = CommandExecutor::new(config)?;

    match args.command {
        Commands::Install => executor.install().await?,
        Commands::Fetch { targets, document } => executor.fetch(&targets, document).await?,
        Commands::Generations => executor.generations().await?,
        Commands::Purge { generation } => executor.purge(&generation).await?,
        Commands::Serve { listen } => {
            let listen = listen.unwrap_or(executor.config().listen);
            serve::serve(&executor, listen).await?
        }
    }

    Ok(())
}

fn init_logging(verbose: bool, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env().add_directive(Level::INFO.into())
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_level(verbose))
        .with(filter)
        .init();
}
