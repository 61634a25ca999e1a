//! offergridd — the offergrid daemon.
//!
//! Loads a scheduler config and task classes, then runs the scheduler
//! against the in-process cluster described by the config's `[[agents]]`.
//!
//! # Usage
//!
//! ```text
//! offergridd run --config offergrid.toml --deploy readout=2 --deploy qc=1
//! offergridd check --config offergrid.toml
//! offergridd classes --dir ./classes
//! ```

mod standalone;

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "offergridd", about = "offergrid scheduler daemon")]
struct Cli {
    /// Log output format.
    #[arg(long, value_enum, default_value = "text", global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// Run the scheduler against the configured local agents.
    Run {
        #[arg(long)]
        config: PathBuf,

        /// Deploy a demo environment, e.g. `--deploy readout=2`.
        #[arg(long = "deploy", value_parser = standalone::parse_deploy)]
        deploy: Vec<standalone::DeploySpec>,

        /// Seconds between offer rounds.
        #[arg(long, default_value = "1")]
        offer_interval: u64,
    },
    /// Validate a config file and the task classes it points at.
    Check {
        #[arg(long)]
        config: PathBuf,
    },
    /// List the task classes found under a directory.
    Classes {
        #[arg(long)]
        dir: PathBuf,

        #[arg(long, default_value = "local")]
        repo: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_format);

    match cli.command {
        Command::Run {
            config,
            deploy,
            offer_interval,
        } => standalone::run(&config, deploy, offer_interval).await,
        Command::Check { config } => standalone::check(&config),
        Command::Classes { dir, repo } => standalone::classes(&dir, &repo),
    }
}

fn init_logging(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("offergrid=info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}
