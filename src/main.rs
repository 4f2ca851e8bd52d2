mod cli;
mod config;
mod fanout;
mod merge;
mod model;
mod registry;
mod remote;
mod report;
mod trace;

use std::process;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use config::Config;

fn main() {
    let cli = cli::Cli::parse();

    let (config, origin) = match Config::load() {
        Ok(loaded) => loaded,
        Err(e) => {
            eprintln!("Failed to load config: {e}");
            process::exit(1);
        }
    };

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
    origin.log();

    if let Err(e) = cli::run(cli, &config) {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}
