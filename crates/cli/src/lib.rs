pub mod commands;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use pulse_core::config::{AppConfig, LogFormat};

#[derive(Debug, Parser)]
#[command(
    name = "pulse",
    about = "Pulse customer-behavior analytics CLI",
    long_about = "Inspect configuration, check worker readiness, replay behavior logs through the \
                  analytics engine, and run the pricing optimizer.",
    after_help = "Examples:\n  pulse doctor --json\n  pulse config\n  pulse replay events.jsonl\n  \
                  pulse price catalog.json"
)]
pub struct Cli {
    #[arg(long, global = true, help = "Path to a pulse.toml config file")]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
    #[command(about = "Validate config, sanitizer salt, and worker pool readiness")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(about = "Replay a JSON-lines file of behavior events and feedback")]
    Replay {
        input: PathBuf,
        #[arg(long, help = "Analyze on the calling thread instead of the worker pool")]
        synchronous: bool,
    },
    #[command(about = "Optimize prices for the products in a JSON pricing request")]
    Price { input: PathBuf },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();
    if let Ok(config) = AppConfig::load(commands::load_options(cli.config.clone())) {
        init_logging(&config);
    }

    let result = match cli.command {
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run(cli.config) }
        }
        Command::Doctor { json } => commands::CommandResult {
            exit_code: 0,
            output: commands::doctor::run(json, cli.config),
        },
        Command::Replay { input, synchronous } => {
            commands::replay::run(input, cli.config, synchronous)
        }
        Command::Price { input } => commands::price::run(input, cli.config),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}

/// Logs go to stderr so command output on stdout stays machine-readable.
fn init_logging(config: &AppConfig) {
    use tracing::Level;

    let log_level = config.logging.level.parse::<Level>().unwrap_or(Level::INFO);
    let builder = tracing_subscriber::fmt()
        .with_target(false)
        .with_max_level(log_level)
        .with_writer(std::io::stderr);

    let result = match config.logging.format {
        LogFormat::Compact => builder.compact().try_init(),
        LogFormat::Pretty => builder.pretty().try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    if result.is_err() {
        eprintln!("logging was already initialized");
    }
}
