use std::fs;
use std::path::Path;
use std::process;

use berth::config::parse_env_file;
use berth::pipeline::{self, Cli};
use clap::Parser;
use tracing_subscriber::EnvFilter;

fn main() {
    let cli = Cli::parse();

    // RUST_LOG wins over LOG_LEVEL from the environment file.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level(&cli.env_file)));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    if let Err(e) = run(&cli) {
        eprintln!("error: {e:#}");
        process::exit(1);
    }
}

fn run(cli: &Cli) -> anyhow::Result<()> {
    pipeline::run(cli)?;
    Ok(())
}

fn log_level(env_file: &Path) -> String {
    fs::read_to_string(env_file)
        .ok()
        .and_then(|content| {
            parse_env_file(&content)
                .into_iter()
                .find(|(k, _)| k.eq_ignore_ascii_case("log_level"))
                .map(|(_, v)| v.to_ascii_lowercase())
        })
        .unwrap_or_else(|| "info".to_string())
}
