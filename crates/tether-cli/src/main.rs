use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::filter::EnvFilter;

mod commands;
mod config;

use commands::{EvalCommand, RunCommand};

#[derive(Parser)]
#[command(name = "tether", version, about = "Run JavaScript in thread-confined contexts")]
struct Cli {
    /// Config file (default: nearest tether.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Evaluate an expression in a fresh context and print the result
    Eval(EvalCommand),
    /// Run script files on a context pool
    Run(RunCommand),
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = config::load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Eval(cmd) => cmd.run(&config),
        Commands::Run(cmd) => cmd.run(&config),
    }
}
