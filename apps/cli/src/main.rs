//! Ensemble CLI.
//!
//! Runs crews of role-playing agents defined in TOML files.

use std::path::PathBuf;

use anyhow::Context;
use clap::{CommandFactory, Parser, Subcommand};
use colored::Colorize;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

mod commands;
mod config;

use commands::{init, run, show};
use config::CliConfig;

/// Ensemble - sequential multi-agent crews
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Log level (trace, debug, info, warn, error). RUST_LOG takes precedence.
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a crew and print its final output
    ///
    /// Without CREW_FILE the built-in quantum computing keynote crew is used.
    Run {
        /// Crew definition file
        crew_file: Option<PathBuf>,

        /// Replace every model with an offline mock
        #[arg(long)]
        mock: bool,

        /// Directory relative task output files are written to
        #[arg(short, long)]
        output_dir: Option<PathBuf>,

        /// Print the whole crew output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Validate a crew file and print its agents and tasks
    Show {
        /// Crew definition file
        crew_file: Option<PathBuf>,
    },

    /// Write the built-in crew definition to a file
    Init {
        /// Destination file
        #[arg(default_value = "crew.toml")]
        path: PathBuf,

        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() {
    if let Err(e) = run_cli().await {
        eprintln!("{} {}", "error:".red().bold(), e);
        for cause in e.chain().skip(1) {
            eprintln!("  {} {}", "caused by:".dimmed(), cause);
        }
        std::process::exit(1);
    }
}

async fn run_cli() -> anyhow::Result<()> {
    let args = Args::parse();

    let cli_config = CliConfig::discover_and_load().context("Failed to load CLI configuration")?;

    // Initialize tracing
    let level = args.log_level.as_deref().or(cli_config.log_level.as_deref()).unwrap_or("info");
    let level: LevelFilter = level.parse().with_context(|| {
        format!("Invalid log level '{}' (expected trace, debug, info, warn, error or off)", level)
    })?;
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::builder().with_default_directive(level.into()).parse_lossy(""));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .without_time()
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    // If no command provided, show help
    let Some(command) = args.command else {
        Args::command().print_help()?;
        return Ok(());
    };

    match command {
        Command::Run { crew_file, mock, output_dir, json } => {
            run::execute(run::RunOptions {
                crew_file: crew_file.or(cli_config.crew_file),
                mock,
                output_dir: output_dir.or(cli_config.output_dir),
                json,
            })
            .await?;
        }
        Command::Show { crew_file } => {
            show::execute(crew_file.or(cli_config.crew_file).as_deref())?;
        }
        Command::Init { path, force } => {
            init::execute(&path, force).await?;
        }
    }

    Ok(())
}
